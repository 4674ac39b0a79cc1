//! Client certificate capability: key pair, certificate and the tax id it identifies.
use chrono::{DateTime, Duration, Utc};
use openssl::{
    asn1::Asn1Time,
    nid::Nid,
    pkcs12::Pkcs12,
    pkey::{PKey, Private},
    symm::Cipher,
    x509::X509,
};
use std::fmt;
use thiserror::Error;

/// Errors raised while loading or projecting a certificate.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to read PKCS#12 container: {0}")]
    Container(String),
    #[error("PKCS#12 container has no {0}")]
    MissingPart(&'static str),
    #[error("invalid PEM material: {0}")]
    Pem(String),
    #[error("certificate expired at {not_after}")]
    Expired { not_after: DateTime<Utc> },
    #[error("failed to export key material: {0}")]
    Export(String),
}

/// Taxpayer identifier carried by the certificate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaxId {
    /// Corporate taxpayer (14 digits).
    Cnpj(String),
    /// Individual taxpayer (11 digits).
    Cpf(String),
}

impl TaxId {
    /// Classify a digit string by length; anything else is rejected.
    pub fn parse(value: &str) -> Option<Self> {
        let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
        match digits.len() {
            14 => Some(TaxId::Cnpj(digits)),
            11 => Some(TaxId::Cpf(digits)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TaxId::Cnpj(value) | TaxId::Cpf(value) => value,
        }
    }
}

impl fmt::Display for TaxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client certificate and its private key.
///
/// Read-only to the rest of the crate: the PEM projections written to disk by
/// [`MaterialStore`](crate::material::MaterialStore) are derived from it and
/// removed again on release.
///
/// # Examples
/// ```rust,no_run
/// use nfse_core::credential::Credential;
///
/// let pfx = std::fs::read("certificate.pfx")?;
/// let credential = Credential::from_pkcs12(&pfx, "secret")?;
/// println!("{:?}", credential.tax_id());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone)]
pub struct Credential {
    key: PKey<Private>,
    certificate: X509,
    chain: Vec<X509>,
    tax_id: Option<TaxId>,
    not_after: DateTime<Utc>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("tax_id", &self.tax_id)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

impl Credential {
    /// Decode a PKCS#12 (`.pfx`) container.
    ///
    /// # Errors
    /// Returns [`CredentialError::Container`] for a malformed container or wrong
    /// password, [`CredentialError::MissingPart`] if key or certificate is absent.
    pub fn from_pkcs12(der: &[u8], password: &str) -> Result<Self, CredentialError> {
        let parsed = Pkcs12::from_der(der)
            .and_then(|container| container.parse2(password))
            .map_err(|e| CredentialError::Container(e.to_string()))?;
        let key = parsed.pkey.ok_or(CredentialError::MissingPart("private key"))?;
        let certificate = parsed.cert.ok_or(CredentialError::MissingPart("certificate"))?;
        let chain = parsed
            .ca
            .map(|stack| stack.into_iter().collect())
            .unwrap_or_default();
        Self::from_parts(key, certificate, chain)
    }

    /// Build from a PEM private key and a PEM certificate (optionally followed by its chain).
    pub fn from_pem(private_key_pem: &[u8], certificate_pem: &[u8]) -> Result<Self, CredentialError> {
        let key = PKey::private_key_from_pem(private_key_pem)
            .map_err(|e| CredentialError::Pem(format!("private key: {e}")))?;
        let mut certificates = X509::stack_from_pem(certificate_pem)
            .map_err(|e| CredentialError::Pem(format!("certificate: {e}")))?
            .into_iter();
        let certificate = certificates
            .next()
            .ok_or_else(|| CredentialError::Pem("no certificate block".into()))?;
        Self::from_parts(key, certificate, certificates.collect())
    }

    fn from_parts(
        key: PKey<Private>,
        certificate: X509,
        chain: Vec<X509>,
    ) -> Result<Self, CredentialError> {
        let not_after = not_after_utc(&certificate)?;
        let tax_id = tax_id_from_subject(&certificate);
        Ok(Self {
            key,
            certificate,
            chain,
            tax_id,
            not_after,
        })
    }

    /// Override the tax id for certificates that do not carry it in the subject.
    pub fn with_tax_id(mut self, tax_id: TaxId) -> Self {
        self.tax_id = Some(tax_id);
        self
    }

    pub fn tax_id(&self) -> Option<&TaxId> {
        self.tax_id.as_ref()
    }

    pub fn cnpj(&self) -> Option<&str> {
        match &self.tax_id {
            Some(TaxId::Cnpj(value)) => Some(value),
            _ => None,
        }
    }

    pub fn cpf(&self) -> Option<&str> {
        match &self.tax_id {
            Some(TaxId::Cpf(value)) => Some(value),
            _ => None,
        }
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn is_expired(&self) -> bool {
        self.not_after <= Utc::now()
    }

    pub fn private_key(&self) -> &PKey<Private> {
        &self.key
    }

    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    /// PKCS#8 private key PEM, encrypted with AES-256-CBC when a passphrase is given.
    pub fn private_key_pem(&self, passphrase: Option<&str>) -> Result<String, CredentialError> {
        let pem = match passphrase {
            Some(pass) => self
                .key
                .private_key_to_pem_pkcs8_passphrase(Cipher::aes_256_cbc(), pass.as_bytes()),
            None => self.key.private_key_to_pem_pkcs8(),
        }
        .map_err(|e| CredentialError::Export(e.to_string()))?;
        pem_to_string(pem)
    }

    /// Certificate PEM (the public half used for the TLS handshake).
    pub fn public_key_pem(&self) -> Result<String, CredentialError> {
        let pem = self
            .certificate
            .to_pem()
            .map_err(|e| CredentialError::Export(e.to_string()))?;
        pem_to_string(pem)
    }

    /// Private key followed by the certificate and its chain.
    pub fn combined_pem(&self, passphrase: Option<&str>) -> Result<String, CredentialError> {
        let mut combined = self.private_key_pem(passphrase)?;
        combined.push_str(&self.public_key_pem()?);
        for cert in &self.chain {
            let pem = cert
                .to_pem()
                .map_err(|e| CredentialError::Export(e.to_string()))?;
            combined.push_str(&pem_to_string(pem)?);
        }
        Ok(combined)
    }

    /// DER certificate, base64 encoded, as embedded in `X509Certificate`.
    pub fn certificate_base64(&self) -> Result<String, CredentialError> {
        use base64ct::{Base64, Encoding};
        let der = self
            .certificate
            .to_der()
            .map_err(|e| CredentialError::Export(e.to_string()))?;
        Ok(Base64::encode_string(&der))
    }
}

fn pem_to_string(pem: Vec<u8>) -> Result<String, CredentialError> {
    String::from_utf8(pem).map_err(|e| CredentialError::Export(e.to_string()))
}

// ICP-Brasil subjects carry the holder as `CN=NAME:DIGITS`.
fn tax_id_from_subject(certificate: &X509) -> Option<TaxId> {
    certificate
        .subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .filter_map(|entry| entry.data().as_utf8().ok())
        .find_map(|cn| {
            let cn = cn.to_string();
            let (_, digits) = cn.rsplit_once(':')?;
            TaxId::parse(digits)
        })
}

fn not_after_utc(certificate: &X509) -> Result<DateTime<Utc>, CredentialError> {
    let now = Asn1Time::days_from_now(0).map_err(|e| CredentialError::Pem(e.to_string()))?;
    let diff = now
        .diff(certificate.not_after())
        .map_err(|e| CredentialError::Pem(e.to_string()))?;
    Ok(Utc::now() + Duration::days(i64::from(diff.days)) + Duration::seconds(i64::from(diff.secs)))
}

/// Fails when the credential is past its validity unless `allow_expired` is set.
pub(crate) fn ensure_valid(credential: &Credential, allow_expired: bool) -> Result<(), CredentialError> {
    if !allow_expired && credential.is_expired() {
        return Err(CredentialError::Expired {
            not_after: credential.not_after(),
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Credential;
    use openssl::{
        asn1::Asn1Time,
        bn::BigNum,
        hash::MessageDigest,
        pkey::{PKey, Private},
        rsa::Rsa,
        x509::{X509, X509NameBuilder},
    };

    /// Self-signed RSA credential with an ICP-Brasil style subject.
    pub(crate) fn credential_with_cn(common_name: &str, valid_days: u32) -> Credential {
        let (key_pem, cert_pem) = pem_pair(common_name, valid_days);
        Credential::from_pem(&key_pem, &cert_pem).expect("credential")
    }

    /// Credential whose certificate is issued by a throwaway CA that travels
    /// with it as chain. Returns the CA certificate too.
    pub(crate) fn chained_credential(common_name: &str, valid_days: u32) -> (Credential, X509) {
        let (ca_key, ca) = issue("AC TESTE", None, valid_days);
        let (leaf_key, leaf) = issue(common_name, Some((&ca_key, &ca)), valid_days);
        let mut chain_pem = leaf.to_pem().expect("leaf pem");
        chain_pem.extend(ca.to_pem().expect("ca pem"));
        let credential = Credential::from_pem(
            &leaf_key.private_key_to_pem_pkcs8().expect("key pem"),
            &chain_pem,
        )
        .expect("credential");
        (credential, ca)
    }

    fn issue(
        common_name: &str,
        issuer: Option<(&PKey<Private>, &X509)>,
        valid_days: u32,
    ) -> (PKey<Private>, X509) {
        let key = PKey::from_rsa(Rsa::generate(2048).expect("rsa")).expect("pkey");
        let mut name = X509NameBuilder::new().expect("name");
        name.append_entry_by_text("C", "BR").expect("country");
        name.append_entry_by_text("CN", common_name).expect("cn");
        let name = name.build();
        let mut builder = X509::builder().expect("builder");
        builder.set_version(2).expect("version");
        let serial = BigNum::from_u32(if issuer.is_some() { 2 } else { 1 })
            .and_then(|n| n.to_asn1_integer())
            .expect("serial");
        builder.set_serial_number(&serial).expect("serial");
        builder.set_subject_name(&name).expect("subject");
        builder.set_pubkey(&key).expect("pubkey");
        builder
            .set_not_before(&Asn1Time::days_from_now(0).expect("not before"))
            .expect("not before");
        builder
            .set_not_after(&Asn1Time::days_from_now(valid_days).expect("not after"))
            .expect("not after");
        match issuer {
            Some((issuer_key, issuer_cert)) => {
                builder
                    .set_issuer_name(issuer_cert.subject_name())
                    .expect("issuer");
                builder.sign(issuer_key, MessageDigest::sha256()).expect("sign");
            }
            None => {
                builder.set_issuer_name(&name).expect("issuer");
                builder.sign(&key, MessageDigest::sha256()).expect("sign");
            }
        }
        (key, builder.build())
    }

    pub(crate) fn pem_pair(common_name: &str, valid_days: u32) -> (Vec<u8>, Vec<u8>) {
        let rsa = Rsa::generate(2048).expect("rsa");
        let key = PKey::from_rsa(rsa).expect("pkey");
        let mut name = X509NameBuilder::new().expect("name");
        name.append_entry_by_text("C", "BR").expect("country");
        name.append_entry_by_text("CN", common_name).expect("cn");
        let name = name.build();
        let mut builder = X509::builder().expect("builder");
        builder.set_version(2).expect("version");
        let serial = BigNum::from_u32(1).expect("serial").to_asn1_integer().expect("asn1");
        builder.set_serial_number(&serial).expect("serial");
        builder.set_subject_name(&name).expect("subject");
        builder.set_issuer_name(&name).expect("issuer");
        builder.set_pubkey(&key).expect("pubkey");
        builder
            .set_not_before(&Asn1Time::days_from_now(0).expect("not before"))
            .expect("not before");
        builder
            .set_not_after(&Asn1Time::days_from_now(valid_days).expect("not after"))
            .expect("not after");
        builder.sign(&key, MessageDigest::sha256()).expect("sign");
        let cert = builder.build();
        (
            key.private_key_to_pem_pkcs8().expect("key pem"),
            cert.to_pem().expect("cert pem"),
        )
    }
}
