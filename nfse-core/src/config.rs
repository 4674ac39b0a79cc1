//! Configuration and environment selection.
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use thiserror::Error;

/// Environment variable that replaces the environment base URL, mainly for tests.
pub const BASE_URL_ENV: &str = "NFSE_BASE_URL";

/// NFS-e national environment selection for API endpoints.
/// This determines which URL the client will use and the `tpAmb` value
/// filled into documents that do not carry one.
/// - Production: the live "Produção" environment.
/// - Staging: what the fiscal authority calls "Produção Restrita" (homologação).
/// # Examples
/// ```rust
/// use std::str::FromStr;
/// use nfse_core::config::EnvironmentType;
///
/// let env = EnvironmentType::from_str("staging")?;
/// assert_eq!(env, EnvironmentType::Staging);
/// assert_eq!(env.tp_amb(), 2);
/// # Ok::<(), nfse_core::config::ConfigError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvironmentType {
    Production,
    Staging,
}

/// Configuration errors that are detected before any request is made.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid environment type: {input}")]
    InvalidEnvironment { input: String },
    #[error("cipher policy '{policy}' matches no supported cipher suite")]
    CipherPolicy { policy: String },
    #[error("failed to read CA bundle {path}: {message}")]
    CaBundle { path: PathBuf, message: String },
    #[error("TLS setup failed: {0}")]
    Tls(String),
}

impl FromStr for EnvironmentType {
    type Err = ConfigError;
    fn from_str(env: &str) -> Result<EnvironmentType, ConfigError> {
        match env.trim().to_ascii_lowercase().as_str() {
            "production" | "producao" | "1" => Ok(EnvironmentType::Production),
            "staging" | "homologacao" | "producao_restrita" | "2" => Ok(EnvironmentType::Staging),
            _ => Err(ConfigError::InvalidEnvironment {
                input: env.to_string(),
            }),
        }
    }
}

impl EnvironmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentType::Production => "production",
            EnvironmentType::Staging => "staging",
        }
    }

    pub fn endpoint_url(&self) -> &'static str {
        match self {
            EnvironmentType::Production => "https://sefin.nfse.gov.br/sefinnacional",
            EnvironmentType::Staging => "https://sefin.producaorestrita.nfse.gov.br/SefinNacional",
        }
    }

    /// `tpAmb` code used inside documents.
    pub fn tp_amb(&self) -> u8 {
        match self {
            EnvironmentType::Production => 1,
            EnvironmentType::Staging => 2,
        }
    }
}

/// Server certificate verification mode.
///
/// `Disabled` is the default because the national endpoints chain up to
/// ICP-Brasil roots that are absent from common trust stores. It leaves the
/// connection open to interception; use `Strict` with a CA bundle whenever
/// the roots are available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsVerification {
    #[default]
    Disabled,
    /// Full chain and hostname verification.
    Strict,
}

/// Options applied to every HTTP call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub verification: TlsVerification,
    /// Colon separated list of cipher suite names (e.g.
    /// `TLS13_AES_256_GCM_SHA384:TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384`).
    pub cipher_policy: Option<String>,
    /// Extra PEM roots trusted in strict mode.
    pub ca_bundle: Option<PathBuf>,
    /// Passphrase protecting the private key PEM on disk.
    pub key_passphrase: Option<String>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            timeout: Duration::from_secs(30),
            verification: TlsVerification::Disabled,
            cipher_policy: None,
            ca_bundle: None,
            key_passphrase: None,
        }
    }
}

/// Client configuration.
///
/// # Examples
/// ```rust
/// use nfse_core::config::{Config, EnvironmentType};
///
/// let config = Config::new(EnvironmentType::Staging);
/// assert_eq!(config.retention().as_secs(), 45 * 60);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    env: EnvironmentType,
    transport: TransportOptions,
    retention: Duration,
    material_root: Option<PathBuf>,
    allow_expired_credential: bool,
}

impl Config {
    pub fn new(env: EnvironmentType) -> Self {
        Self {
            env,
            ..Self::default()
        }
    }

    pub fn with_transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Write credential material under `root` instead of the OS temp directory.
    pub fn with_material_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.material_root = Some(root.into());
        self
    }

    pub fn allow_expired_credential(mut self, allow: bool) -> Self {
        self.allow_expired_credential = allow;
        self
    }

    pub fn env(&self) -> EnvironmentType {
        self.env
    }

    pub fn transport(&self) -> &TransportOptions {
        &self.transport
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn material_root(&self) -> Option<&Path> {
        self.material_root.as_deref()
    }

    pub fn allows_expired_credential(&self) -> bool {
        self.allow_expired_credential
    }

    /// Base URL for the configured environment, honouring [`BASE_URL_ENV`].
    pub fn base_url(&self) -> String {
        std::env::var(BASE_URL_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| self.env.endpoint_url().to_string())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            env: EnvironmentType::Staging,
            transport: TransportOptions::default(),
            retention: Duration::from_secs(45 * 60),
            material_root: None,
            allow_expired_credential: false,
        }
    }
}
