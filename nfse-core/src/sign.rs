//! XML digital signature for documents.
//!
//! [`DocumentSigner`] is the adapter the submission flows use. The actual
//! canonicalization and signature computation sits behind
//! [`SignaturePrimitive`]; [`XmlDsig`] is the default implementation
//! (enveloped XML-DSig, RSA key from the credential, certificate in `KeyInfo`).
use base64ct::{Base64, Encoding};
use libxml::{
    parser::Parser,
    tree::{c14n, Document, Node},
    xpath,
};
use openssl::{
    error::ErrorStack,
    hash::{hash, MessageDigest},
    sign::Signer,
};
use thiserror::Error;
use tracing::debug;

use crate::credential::Credential;
use crate::document::BuiltDocument;

const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
// Advertised as inclusive C14N as the national validators expect; for these
// prefix-free documents it yields the same bytes as the exclusive form we compute.
const C14N_ALGORITHM: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
const ENVELOPED_ALGORITHM: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Signing error: {0}")]
    SigningError(String),
    #[error("element <{element}> not found in document")]
    MissingElement { element: String },
    #[error("element <{element}> has no {attribute} attribute")]
    MissingId { element: String, attribute: String },
    #[error("document root is <{found}>, expected <{expected}>")]
    UnexpectedRoot { expected: String, found: String },
    #[error("signature computation failed: {0}")]
    Crypto(#[from] ErrorStack),
}

/// Digest and signature algorithm pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DigestAlgorithm {
    /// SHA-1 digest with RSA-SHA1 signature, as the national layout requires.
    #[default]
    Sha1,
    Sha256,
}

impl DigestAlgorithm {
    fn message_digest(&self) -> MessageDigest {
        match self {
            DigestAlgorithm::Sha1 => MessageDigest::sha1(),
            DigestAlgorithm::Sha256 => MessageDigest::sha256(),
        }
    }

    pub fn digest_uri(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "http://www.w3.org/2000/09/xmldsig#sha1",
            DigestAlgorithm::Sha256 => "http://www.w3.org/2001/04/xmlenc#sha256",
        }
    }

    pub fn signature_uri(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "http://www.w3.org/2000/09/xmldsig#rsa-sha1",
            DigestAlgorithm::Sha256 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
        }
    }
}

/// Canonicalization and algorithm settings handed to the primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureOptions {
    pub exclusive: bool,
    pub with_comments: bool,
    pub algorithm: DigestAlgorithm,
}

impl SignatureOptions {
    /// Exclusive canonicalization without comments, SHA-1.
    pub const NFSE: SignatureOptions = SignatureOptions {
        exclusive: true,
        with_comments: false,
        algorithm: DigestAlgorithm::Sha1,
    };

    fn canonicalization(&self) -> c14n::CanonicalizationOptions {
        c14n::CanonicalizationOptions {
            mode: if self.exclusive {
                c14n::CanonicalizationMode::ExclusiveCanonical1_0
            } else {
                c14n::CanonicalizationMode::Canonical1_0
            },
            inclusive_ns_prefixes: vec![],
            with_comments: self.with_comments,
        }
    }
}

impl Default for SignatureOptions {
    fn default() -> Self {
        Self::NFSE
    }
}

/// What to sign inside an XML document.
#[derive(Debug, Clone, Copy)]
pub struct SignatureTarget<'a> {
    /// Element whose subtree is digested, e.g. `infDPS`.
    pub element: &'a str,
    /// Attribute holding the reference id, e.g. `Id`.
    pub id_attribute: &'a str,
    /// Root element the `Signature` is appended to.
    pub root: &'a str,
}

/// Canonicalization plus signature computation over one element.
pub trait SignaturePrimitive {
    fn sign(
        &self,
        credential: &Credential,
        xml: &str,
        target: SignatureTarget<'_>,
        options: &SignatureOptions,
    ) -> Result<String, SigningError>;
}

/// Enveloped XML-DSig backed by libxml canonicalization and OpenSSL.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlDsig;

impl SignaturePrimitive for XmlDsig {
    fn sign(
        &self,
        credential: &Credential,
        xml: &str,
        target: SignatureTarget<'_>,
        options: &SignatureOptions,
    ) -> Result<String, SigningError> {
        let mut doc = parse(xml)?;
        let mut root = doc
            .get_root_element()
            .ok_or_else(|| SigningError::SigningError("document has no root element".into()))?;
        if root.get_name() != target.root {
            return Err(SigningError::UnexpectedRoot {
                expected: target.root.to_string(),
                found: root.get_name(),
            });
        }

        let mut element = find_element(&doc, target.element)?;
        let reference = element.get_attribute(target.id_attribute).ok_or_else(|| {
            SigningError::MissingId {
                element: target.element.to_string(),
                attribute: target.id_attribute.to_string(),
            }
        })?;

        let canonical = element
            .canonicalize(options.canonicalization())
            .map_err(|e| SigningError::SigningError(format!("Failed to canonicalize xml: {e:?}")))?;
        let digest = digest_base64(canonical.as_bytes(), options.algorithm)?;

        let signed_info = canonical_signed_info(&reference, &digest, options)?;
        let signature_value = rsa_signature_base64(credential, signed_info.as_bytes(), options.algorithm)?;
        let certificate = credential
            .certificate_base64()
            .map_err(|e| SigningError::SigningError(e.to_string()))?;

        let signature_xml = format!(
            concat!(
                r#"<Signature xmlns="{ns}">{signed_info}<SignatureValue>{value}</SignatureValue>"#,
                "<KeyInfo><X509Data><X509Certificate>{cert}</X509Certificate></X509Data></KeyInfo>",
                "</Signature>"
            ),
            ns = DSIG_NS,
            signed_info = signed_info,
            value = signature_value,
            cert = certificate,
        );
        let mut signature = import_fragment(&mut doc, &signature_xml)?;
        root.add_child(&mut signature)
            .map_err(|e| SigningError::SigningError(e.to_string()))?;

        debug!(element = target.element, reference = %reference, "document signed");
        Ok(doc.node_to_string(&root))
    }
}

/// Signer adapter used by the submission flows.
///
/// Always signs with [`SignatureOptions::NFSE`] and never retries.
#[derive(Debug, Clone, Default)]
pub struct DocumentSigner<P = XmlDsig> {
    primitive: P,
}

impl DocumentSigner<XmlDsig> {
    pub fn new() -> Self {
        Self { primitive: XmlDsig }
    }
}

impl<P: SignaturePrimitive> DocumentSigner<P> {
    pub fn with_primitive(primitive: P) -> Self {
        Self { primitive }
    }

    pub fn sign(
        &self,
        credential: &Credential,
        xml: &str,
        element: &str,
        id_attribute: &str,
        root: &str,
    ) -> Result<String, SigningError> {
        let target = SignatureTarget {
            element,
            id_attribute,
            root,
        };
        self.primitive
            .sign(credential, xml, target, &SignatureOptions::NFSE)
    }

    /// Sign a built document at its kind's signed element.
    pub fn sign_document(
        &self,
        credential: &Credential,
        document: &BuiltDocument,
    ) -> Result<String, SigningError> {
        let kind = document.kind();
        self.sign(
            credential,
            document.xml(),
            kind.signed_element(),
            "Id",
            kind.root_element(),
        )
    }
}

fn parse(xml: &str) -> Result<Document, SigningError> {
    Parser::default()
        .parse_string(xml)
        .map_err(|e| SigningError::SigningError(format!("XML parse error: {e:?}")))
}

fn find_element(doc: &Document, name: &str) -> Result<Node, SigningError> {
    let ctx = xpath::Context::new(doc)
        .map_err(|e| SigningError::SigningError(format!("XPath context error: {e:?}")))?;
    ctx.evaluate(&format!("//*[local-name()='{name}']"))
        .map_err(|e| SigningError::SigningError(format!("XPath error for {name}: {e:?}")))?
        .get_nodes_as_vec()
        .into_iter()
        .next()
        .ok_or_else(|| SigningError::MissingElement {
            element: name.to_string(),
        })
}

fn import_fragment(doc: &mut Document, xml: &str) -> Result<Node, SigningError> {
    let fragment = parse(xml)?;
    let mut node = fragment
        .get_root_element()
        .ok_or_else(|| SigningError::SigningError("missing fragment root".into()))?;
    node.unlink();
    doc.import_node(&mut node)
        .map_err(|_| SigningError::SigningError("failed to import fragment".into()))
}

fn digest_base64(bytes: &[u8], algorithm: DigestAlgorithm) -> Result<String, SigningError> {
    let digest = hash(algorithm.message_digest(), bytes)?;
    Ok(Base64::encode_string(&digest))
}

fn rsa_signature_base64(
    credential: &Credential,
    bytes: &[u8],
    algorithm: DigestAlgorithm,
) -> Result<String, SigningError> {
    let mut signer = Signer::new(algorithm.message_digest(), credential.private_key())?;
    signer.update(bytes)?;
    Ok(Base64::encode_string(&signer.sign_to_vec()?))
}

/// Canonical `SignedInfo`, exactly as it will be digested by a verifier.
fn canonical_signed_info(
    reference: &str,
    digest: &str,
    options: &SignatureOptions,
) -> Result<String, SigningError> {
    let xml = format!(
        concat!(
            r#"<SignedInfo xmlns="{ns}">"#,
            r#"<CanonicalizationMethod Algorithm="{c14n}"/>"#,
            r#"<SignatureMethod Algorithm="{signature}"/>"#,
            r##"<Reference URI="#{reference}">"##,
            r#"<Transforms><Transform Algorithm="{enveloped}"/><Transform Algorithm="{c14n}"/></Transforms>"#,
            r#"<DigestMethod Algorithm="{digest_method}"/>"#,
            "<DigestValue>{digest}</DigestValue>",
            "</Reference></SignedInfo>"
        ),
        ns = DSIG_NS,
        c14n = C14N_ALGORITHM,
        signature = options.algorithm.signature_uri(),
        reference = reference,
        enveloped = ENVELOPED_ALGORITHM,
        digest_method = options.algorithm.digest_uri(),
        digest = digest,
    );
    parse(&xml)?
        .canonicalize(options.canonicalization(), None)
        .map_err(|e| SigningError::SigningError(format!("Failed to canonicalize xml: {e:?}")))
}
