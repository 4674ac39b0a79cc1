//! NFS-e national API client: issue, query and event flows.
use serde_json::Value;
use tracing::info;

use crate::{
    config::Config,
    credential::{ensure_valid, Credential, CredentialError},
    document::{BuiltDocument, DocumentBuilder, DocumentError, DocumentKind},
    envelope::{Envelope, ResponseBody},
    material::{CleanupReport, CredentialMaterial, MaterialError, MaterialStore},
    sign::{DocumentSigner, SignaturePrimitive, XmlDsig},
    transport::{TransportClient, TransportResult},
    Error,
};

/// A credential together with the on-disk material derived from it.
///
/// Material is written on the first request and removed when the session
/// is released or dropped.
#[derive(Debug)]
pub struct Session {
    credential: Credential,
    store: MaterialStore,
}

impl Session {
    /// # Errors
    /// [`CredentialError::Expired`] unless the config allows expired credentials.
    pub fn new(credential: Credential, config: &Config) -> Result<Self, CredentialError> {
        ensure_valid(&credential, config.allows_expired_credential())?;
        Ok(Self {
            credential,
            store: MaterialStore::new(config),
        })
    }

    /// Session over an explicitly configured store.
    pub fn with_store(
        credential: Credential,
        store: MaterialStore,
        allow_expired: bool,
    ) -> Result<Self, CredentialError> {
        ensure_valid(&credential, allow_expired)?;
        Ok(Self { credential, store })
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Material for the TLS client, written on first use.
    pub fn material(&mut self) -> Result<&CredentialMaterial, MaterialError> {
        self.store.ensure(&self.credential)
    }

    pub fn material_ready(&self) -> bool {
        self.store.material().is_some()
    }

    /// Remove this session's material and sweep stale files.
    pub fn release(&mut self) -> CleanupReport {
        self.store.release()
    }
}

/// NFS-e API client.
///
/// # Examples
/// ```rust,no_run
/// use nfse_core::api::{NfseClient, Session};
/// use nfse_core::config::{Config, EnvironmentType};
/// use nfse_core::credential::Credential;
///
/// # async fn run() -> Result<(), nfse_core::Error> {
/// let config = Config::new(EnvironmentType::Staging);
/// let pfx = std::fs::read("certificate.pfx").unwrap_or_default();
/// let credential = Credential::from_pkcs12(&pfx, "secret")?;
/// let mut session = Session::new(credential, &config)?;
/// let mut client = NfseClient::new(config);
/// let response = client.query_nfse(&mut session, "35503082212345678000199000000000000124050000000001").await?;
/// # let _ = response;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct NfseClient<P = XmlDsig> {
    config: Config,
    base_url: String,
    builder: DocumentBuilder,
    signer: DocumentSigner<P>,
    transport: TransportClient,
}

impl NfseClient<XmlDsig> {
    pub fn new(config: Config) -> Self {
        Self::with_signer(config, DocumentSigner::new())
    }
}

// Public API
impl<P: SignaturePrimitive> NfseClient<P> {
    pub fn with_signer(config: Config, signer: DocumentSigner<P>) -> Self {
        let base_url = config.base_url();
        Self {
            builder: DocumentBuilder::new().with_environment(config.env()),
            transport: TransportClient::new(config.transport().clone()),
            config,
            base_url,
            signer,
        }
    }

    /// Replace the document builder, e.g. to change the XML format.
    pub fn with_builder(mut self, builder: DocumentBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Response of the last request that received one.
    pub fn last_result(&self) -> Option<&TransportResult> {
        self.transport.last_result()
    }

    /// Build, sign and submit an invoice declaration (`POST /nfse`).
    ///
    /// # Errors
    /// The first failing stage's error: document, signing, envelope,
    /// configuration or transport.
    pub async fn issue_dps(
        &mut self,
        session: &mut Session,
        attributes: &Value,
    ) -> Result<ResponseBody, Error> {
        let document = self.builder.build(DocumentKind::Invoice, attributes)?;
        info!(id = %document.id(), "issuing DPS");
        let url = self.build_endpoint("nfse");
        self.submit(session, &document, &url).await
    }

    /// Fetch an issued NFS-e by its access key (`GET /nfse/{key}`).
    pub async fn query_nfse(&mut self, session: &mut Session, key: &str) -> Result<ResponseBody, Error> {
        let url = self.build_endpoint(&format!("nfse/{key}"));
        self.query(session, &url).await
    }

    /// Look up the NFS-e generated from a DPS by the DPS id (`GET /dps/{id}`).
    pub async fn query_dps(&mut self, session: &mut Session, key: &str) -> Result<ResponseBody, Error> {
        let url = self.build_endpoint(&format!("dps/{key}"));
        self.query(session, &url).await
    }

    /// Build, sign and submit an event (`POST /nfse/{chNFSe}/eventos`).
    pub async fn register_event(
        &mut self,
        session: &mut Session,
        attributes: &Value,
    ) -> Result<ResponseBody, Error> {
        let document = self.builder.build(DocumentKind::Event, attributes)?;
        let key = document
            .document()
            .invoice_key()
            .ok_or_else(|| DocumentError::Missing {
                path: "infpedreg.chnfse".into(),
            })?
            .to_string();
        info!(id = %document.id(), invoice = %key, "registering event");
        let url = self.build_endpoint(&format!("nfse/{key}/eventos"));
        self.submit(session, &document, &url).await
    }

    /// Cancel an NFS-e. Same flow as [`register_event`](Self::register_event).
    pub async fn cancel_nfse(
        &mut self,
        session: &mut Session,
        attributes: &Value,
    ) -> Result<ResponseBody, Error> {
        self.register_event(session, attributes).await
    }
}

// Private API
impl<P: SignaturePrimitive> NfseClient<P> {
    fn build_endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn submit(
        &mut self,
        session: &mut Session,
        document: &BuiltDocument,
        url: &str,
    ) -> Result<ResponseBody, Error> {
        let signed = self.signer.sign_document(session.credential(), document)?;
        let envelope = Envelope::seal(document.kind().into(), &signed)?;
        let body = self
            .transport
            .post(session, url, &envelope.to_json(), &[])
            .await?;
        info!(id = %document.id(), "document accepted");
        Ok(ResponseBody::decode(&body))
    }

    async fn query(&mut self, session: &mut Session, url: &str) -> Result<ResponseBody, Error> {
        let body = self.transport.get(session, url, None).await?;
        Ok(ResponseBody::decode(&body))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Session;
    use crate::credential::test_support::credential_with_cn;
    use crate::material::MaterialStore;
    use std::{path::Path, time::Duration};

    pub(crate) const TEST_CN: &str = "EMPRESA TESTE LTDA:12345678000199";

    pub(crate) fn session_in(root: &Path) -> Session {
        let store = MaterialStore::with_root(root, Duration::from_secs(45 * 60));
        Session::with_store(credential_with_cn(TEST_CN, 30), store, false).expect("session")
    }

    pub(crate) fn session_with_passphrase(root: &Path, passphrase: &str) -> Session {
        let store = MaterialStore::with_root(root, Duration::from_secs(45 * 60))
            .with_passphrase(Some(passphrase.to_string()));
        Session::with_store(credential_with_cn(TEST_CN, 30), store, false).expect("session")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{session_in, TEST_CN};
    use super::*;
    use crate::config::{EnvironmentType, BASE_URL_ENV};
    use crate::credential::test_support::credential_with_cn;
    use crate::document::test_support::minimal_dps;
    use crate::envelope::decode_decompress;
    use crate::sign::{SignatureOptions, SignatureTarget, SigningError};
    use httpmock::{Method::GET, Method::POST, MockServer};
    use serde_json::json;
    use std::sync::{Mutex, OnceLock};

    fn base_url_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    struct BaseUrlGuard {
        _lock: std::sync::MutexGuard<'static, ()>,
        previous: Option<String>,
    }

    impl BaseUrlGuard {
        fn new(url: &str) -> Self {
            let lock = base_url_lock()
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let previous = std::env::var(BASE_URL_ENV).ok();
            unsafe {
                std::env::set_var(BASE_URL_ENV, url);
            }
            Self {
                _lock: lock,
                previous,
            }
        }
    }

    impl Drop for BaseUrlGuard {
        fn drop(&mut self) {
            match self.previous.as_ref() {
                Some(value) => unsafe {
                    std::env::set_var(BASE_URL_ENV, value);
                },
                None => unsafe {
                    std::env::remove_var(BASE_URL_ENV);
                },
            }
        }
    }

    fn try_start_server() -> Option<MockServer> {
        std::panic::catch_unwind(MockServer::start).ok()
    }

    fn cancellation() -> Value {
        json!({
            "nPedRegEvento": "1",
            "infPedReg": {
                "verAplic": "nfse-core-0.1",
                "dhEvento": "2024-05-01T10:00:00-03:00",
                "CNPJAutor": "12345678000199",
                "chNFSe": "KEY123",
                "e101101": {"cMotivo": "1", "xMotivo": "Erro"}
            }
        })
    }

    #[test]
    fn session_rejects_expired_credential_unless_allowed() {
        let expired = credential_with_cn(TEST_CN, 0);
        let config = Config::new(EnvironmentType::Staging);
        // valid for zero days, so expired once a second has passed
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(matches!(
            Session::new(expired.clone(), &config),
            Err(CredentialError::Expired { .. })
        ));
        assert!(Session::new(expired, &config.allow_expired_credential(true)).is_ok());
    }

    #[test]
    fn endpoints_are_built_from_base_url() {
        let _guard = BaseUrlGuard::new("http://localhost:9999/api/");
        let client = NfseClient::new(Config::new(EnvironmentType::Production));
        assert_eq!(client.base_url(), "http://localhost:9999/api");
        assert_eq!(client.build_endpoint("/nfse/KEY"), "http://localhost:9999/api/nfse/KEY");
    }

    #[test]
    fn environment_url_is_used_without_override() {
        let _guard = base_url_lock()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if std::env::var(BASE_URL_ENV).is_ok() {
            return;
        }
        let client = NfseClient::new(Config::new(EnvironmentType::Production));
        assert_eq!(client.base_url(), "https://sefin.nfse.gov.br/sefinnacional");
    }

    #[test]
    fn issue_cancel_and_query_hit_expected_endpoints() {
        let server = match try_start_server() {
            Some(server) => server,
            None => return,
        };
        let _guard = BaseUrlGuard::new(&server.base_url());

        let issue = server.mock(|when, then| {
            when.method(POST)
                .path("/nfse")
                .header("content-type", "application/json")
                .matches(|req| {
                    let body: Value = match req.body.as_deref().map(serde_json::from_slice) {
                        Some(Ok(body)) => body,
                        _ => return false,
                    };
                    body.get("dpsXmlGZipB64").and_then(Value::as_str).is_some()
                });
            then.status(201)
                .header("content-type", "application/json")
                .body(r#"{"chaveAcesso":"KEY123"}"#);
        });
        let cancel = server.mock(|when, then| {
            when.method(POST)
                .path("/nfse/KEY123/eventos")
                .matches(|req| {
                    let body: Value = match req.body.as_deref().map(serde_json::from_slice) {
                        Some(Ok(body)) => body,
                        _ => return false,
                    };
                    body.get("pedidoRegistroEventoXmlGZipB64").is_some()
                });
            then.status(201).body(r#"{"eventoXmlGZipB64":"x"}"#);
        });
        let query_nfse = server.mock(|when, then| {
            when.method(GET).path("/nfse/KEY123");
            then.status(200).body("plain text body");
        });
        let query_dps = server.mock(|when, then| {
            when.method(GET).path("/dps/DPS1");
            then.status(200).body(r#"{"chaveAcesso":"KEY123"}"#);
        });

        let dir = tempfile::tempdir().expect("tempdir");
        let mut session = session_in(dir.path());
        let mut client = NfseClient::new(Config::new(EnvironmentType::Staging));
        let rt = tokio::runtime::Runtime::new().expect("runtime");
        rt.block_on(async {
            let issued = client
                .issue_dps(&mut session, &minimal_dps())
                .await
                .expect("issue");
            assert_eq!(issued, ResponseBody::Json(json!({"chaveAcesso": "KEY123"})));

            let cancelled = client
                .cancel_nfse(&mut session, &cancellation())
                .await
                .expect("cancel");
            assert!(cancelled.as_json().is_some());

            let raw = client
                .query_nfse(&mut session, "KEY123")
                .await
                .expect("query nfse");
            assert_eq!(raw, ResponseBody::Raw("plain text body".into()));

            let by_dps = client
                .query_dps(&mut session, "DPS1")
                .await
                .expect("query dps");
            assert!(by_dps.as_json().is_some());
        });

        issue.assert();
        cancel.assert();
        query_nfse.assert();
        query_dps.assert();
        assert_eq!(client.last_result().map(|r| r.status()), Some(200));
    }

    #[test]
    fn issued_envelope_carries_signed_dps() {
        let server = match try_start_server() {
            Some(server) => server,
            None => return,
        };
        let _guard = BaseUrlGuard::new(&server.base_url());
        let mock = server.mock(|when, then| {
            when.method(POST).path("/nfse").matches(|req| {
                let body: Value = match req.body.as_deref().map(serde_json::from_slice) {
                    Some(Ok(body)) => body,
                    _ => return false,
                };
                let Some(payload) = body.get("dpsXmlGZipB64").and_then(Value::as_str) else {
                    return false;
                };
                match decode_decompress(payload) {
                    Ok(xml) => {
                        xml.starts_with(
                            r#"<?xml version="1.0" encoding="UTF-8"?><DPS versao="1.00""#,
                        ) && xml.contains(
                            r#"<infDPS Id="DPS355030821234567800019900901000000000000002">"#,
                        ) && xml.contains("<SignatureValue>")
                    }
                    Err(_) => false,
                }
            });
            then.status(200).body("{}");
        });

        let dir = tempfile::tempdir().expect("tempdir");
        let mut session = session_in(dir.path());
        let mut client = NfseClient::new(Config::new(EnvironmentType::Staging));
        let rt = tokio::runtime::Runtime::new().expect("runtime");
        let response = rt
            .block_on(client.issue_dps(&mut session, &minimal_dps()))
            .expect("issue");

        mock.assert();
        assert_eq!(response, ResponseBody::Json(json!({})));
    }

    #[test]
    fn build_failure_stops_before_transport() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut session = session_in(dir.path());
        let mut client = NfseClient::new(Config::new(EnvironmentType::Staging));
        let rt = tokio::runtime::Runtime::new().expect("runtime");
        let err = rt
            .block_on(client.issue_dps(&mut session, &json!({"infDPS": {}})))
            .expect_err("incomplete");
        assert!(matches!(err, Error::Document(_)));
        assert!(!session.material_ready());
        assert!(client.last_result().is_none());
    }

    struct Refusing;

    impl SignaturePrimitive for Refusing {
        fn sign(
            &self,
            _credential: &Credential,
            _xml: &str,
            _target: SignatureTarget<'_>,
            _options: &SignatureOptions,
        ) -> Result<String, SigningError> {
            Err(SigningError::SigningError("refused".into()))
        }
    }

    #[test]
    fn signing_failure_surfaces_unchanged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut session = session_in(dir.path());
        let mut client = NfseClient::with_signer(
            Config::new(EnvironmentType::Staging),
            DocumentSigner::with_primitive(Refusing),
        );
        let rt = tokio::runtime::Runtime::new().expect("runtime");
        let err = rt
            .block_on(client.cancel_nfse(&mut session, &cancellation()))
            .expect_err("signing");
        assert!(matches!(err, Error::Signing(SigningError::SigningError(_))));
        assert!(!session.material_ready());
    }
}
