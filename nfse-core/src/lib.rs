//! Rust toolkit for the Brazilian national NFS-e API (DPS issue, queries and events).
//!
//! # Examples
//! ```rust
//! use nfse_core::config::{Config, EnvironmentType};
//!
//! let config = Config::new(EnvironmentType::Staging);
//! # let _ = config;
//! ```
pub mod api;
pub mod config;
pub mod credential;
pub mod document;
pub mod envelope;
pub mod material;
pub mod sign;
pub mod transport;

use thiserror::Error;

/// Top-level error wrapper for core operations.
///
/// Each flow stage keeps its own variant, so callers can tell a build failure
/// from a signing or transport failure.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Credential(#[from] credential::CredentialError),
    #[error(transparent)]
    Material(#[from] material::MaterialError),
    #[error(transparent)]
    Document(#[from] document::DocumentError),
    #[error(transparent)]
    Signing(#[from] sign::SigningError),
    #[error(transparent)]
    Transport(#[from] transport::TransportError),
    #[error(transparent)]
    Decode(#[from] envelope::EnvelopeError),
}

impl Error {
    /// Missing or invalid credential, material or TLS setup.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::Credential(_) | Error::Material(_)
        )
    }

    /// HTTP status of a rejected response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Transport(err) => err.status(),
            _ => None,
        }
    }
}
