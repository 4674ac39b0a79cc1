//! HTTP transport authenticated with the session's client certificate.
use std::{fs, path::Path, sync::Arc};

use reqwest::{Client, Method};
use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider},
    pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime},
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    api::Session,
    config::{ConfigError, TlsVerification, TransportOptions},
    material::CredentialMaterial,
    Error,
};

/// Failure to obtain a usable response. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request to {url} failed: {message}")]
    Connection { url: String, message: String },
    #[error("HTTP {status} from {url}: {body}")]
    Status { status: u16, url: String, body: String },
    #[error("HTTP {status} from {url}, body could not be read: {message}")]
    Body { status: u16, url: String, message: String },
}

impl TransportError {
    /// HTTP status for rejected responses, `None` when nothing was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Connection { .. } => None,
            TransportError::Status { status, .. } | TransportError::Body { status, .. } => {
                Some(*status)
            }
        }
    }

    pub fn url(&self) -> &str {
        match self {
            TransportError::Connection { url, .. }
            | TransportError::Status { url, .. }
            | TransportError::Body { url, .. } => url,
        }
    }
}

/// One request's response, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResult {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
    url: String,
}

impl TransportResult {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First header value with `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// URL after redirects.
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Mutual-TLS HTTP client.
///
/// A fresh connection pool is built per call from the session's current
/// material, so rotated or re-written PEM files are always picked up.
#[derive(Debug, Default)]
pub struct TransportClient {
    options: TransportOptions,
    last: Option<TransportResult>,
}

impl TransportClient {
    pub fn new(options: TransportOptions) -> Self {
        Self {
            options,
            last: None,
        }
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Response of the most recent call that received one.
    pub fn last_result(&self) -> Option<&TransportResult> {
        self.last.as_ref()
    }

    /// GET `url`. When a body is given the request goes out as a POST
    /// carrying it as JSON, since GET bodies are dropped by many servers.
    ///
    /// # Errors
    /// Material and TLS setup failures surface as configuration errors;
    /// no response or a status of 400 and above as [`TransportError`].
    pub async fn get(
        &mut self,
        session: &mut Session,
        url: &str,
        body: Option<&Value>,
    ) -> Result<String, Error> {
        let method = if body.is_some() {
            Method::POST
        } else {
            Method::GET
        };
        self.execute(session, method, url, body, &[]).await
    }

    /// POST `body` as JSON to `url` with extra `headers`.
    pub async fn post(
        &mut self,
        session: &mut Session,
        url: &str,
        body: &Value,
        headers: &[(&str, &str)],
    ) -> Result<String, Error> {
        self.execute(session, Method::POST, url, Some(body), headers)
            .await
    }

    async fn execute(
        &mut self,
        session: &mut Session,
        method: Method,
        url: &str,
        body: Option<&Value>,
        headers: &[(&str, &str)],
    ) -> Result<String, Error> {
        let material = session.material()?;
        let client = build_client(&self.options, material)?;

        let mut request = client
            .request(method.clone(), url)
            .header("Accept", "application/json");
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Connection {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        let status = response.status().as_u16();
        let effective_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Body {
                status,
                url: effective_url.clone(),
                message: e.to_string(),
            })?;
        info!(method = %method, url = %effective_url, status, "request completed");

        self.last = Some(TransportResult {
            status,
            headers,
            body: text.clone(),
            url: effective_url.clone(),
        });

        if status >= 400 {
            return Err(TransportError::Status {
                status,
                url: effective_url,
                body: text,
            }
            .into());
        }
        Ok(text)
    }
}

fn build_client(options: &TransportOptions, material: &CredentialMaterial) -> Result<Client, ConfigError> {
    let tls = tls_config(options, material)?;
    Client::builder()
        .use_preconfigured_tls(tls)
        .connect_timeout(options.connect_timeout)
        .timeout(options.timeout)
        .build()
        .map_err(|e| ConfigError::Tls(e.to_string()))
}

fn tls_config(options: &TransportOptions, material: &CredentialMaterial) -> Result<ClientConfig, ConfigError> {
    let provider = Arc::new(provider(options.cipher_policy.as_deref())?);
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| ConfigError::Tls(e.to_string()))?;

    let builder = match options.verification {
        TlsVerification::Strict => builder.with_root_certificates(root_store(options)?),
        TlsVerification::Disabled => {
            warn!("TLS server certificate verification is disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
        }
    };

    let certs = client_chain(material)?;
    let key = read_private_key(material.private_key_path(), options.key_passphrase.as_deref())?;
    builder
        .with_client_auth_cert(certs, key)
        .map_err(|e| ConfigError::Tls(e.to_string()))
}

/// Ring provider, optionally restricted to a colon separated list of suite names.
fn provider(cipher_policy: Option<&str>) -> Result<CryptoProvider, ConfigError> {
    let mut provider = rustls::crypto::ring::default_provider();
    if let Some(policy) = cipher_policy {
        let wanted: Vec<&str> = policy
            .split(':')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect();
        provider.cipher_suites.retain(|suite| {
            let name = format!("{:?}", suite.suite());
            wanted.iter().any(|w| w.eq_ignore_ascii_case(&name))
        });
        if provider.cipher_suites.is_empty() {
            return Err(ConfigError::CipherPolicy {
                policy: policy.to_string(),
            });
        }
    }
    Ok(provider)
}

fn root_store(options: &TransportOptions) -> Result<RootCertStore, ConfigError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    if let Some(bundle) = &options.ca_bundle {
        let bundle_error = |message: String| ConfigError::CaBundle {
            path: bundle.clone(),
            message,
        };
        let pem = fs::read(bundle).map_err(|e| bundle_error(e.to_string()))?;
        for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
            let cert = cert.map_err(|e| bundle_error(e.to_string()))?;
            roots.add(cert).map_err(|e| bundle_error(e.to_string()))?;
        }
    }
    Ok(roots)
}

/// Leaf certificate followed by its intermediates, as stored in the combined PEM.
fn client_chain(material: &CredentialMaterial) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    read_certificates(material.combined_path())
}

fn read_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let pem = fs::read(path).map_err(|e| ConfigError::Tls(format!("{}: {e}", path.display())))?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::Tls(format!("{}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(ConfigError::Tls(format!(
            "{}: no certificate found",
            path.display()
        )));
    }
    Ok(certs)
}

fn read_private_key(path: &Path, passphrase: Option<&str>) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let pem = fs::read(path).map_err(|e| ConfigError::Tls(format!("{}: {e}", path.display())))?;
    if let Some(passphrase) = passphrase {
        let key = openssl::pkey::PKey::private_key_from_pem_passphrase(&pem, passphrase.as_bytes())
            .and_then(|key| key.private_key_to_pkcs8())
            .map_err(|e| ConfigError::Tls(format!("{}: {e}", path.display())))?;
        return Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key)));
    }
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|e| ConfigError::Tls(format!("{}: {e}", path.display())))?
        .ok_or_else(|| ConfigError::Tls(format!("{}: no private key found", path.display())))
}

/// Server verifier used when verification is disabled. Handshake signatures
/// are still checked so the peer must hold the key it presents.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
