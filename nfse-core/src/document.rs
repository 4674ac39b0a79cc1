//! Document building: loosely typed attributes in, typed document and XML out.
mod attributes;
pub mod dps;
pub mod event;
pub mod id;
pub mod xml;

pub use attributes::canonicalize_keys;
pub use dps::{
    Address, AddressDetail, Dps, InfDps, Party, PartyId, Service, Substitution, TaxRegime, Values,
};
pub use event::{EventDetail, EventRequest, InfPedReg};
pub use id::DocumentId;
pub use xml::{ToXml, XmlFormat};

use crate::config::EnvironmentType;
use attributes::Node;
use quick_xml::se::SeError;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Namespace carried by both document roots.
pub const NFSE_NAMESPACE: &str = "http://www.sped.fazenda.gov.br/nfse";
/// Layout version written when the input does not carry one.
pub const DEFAULT_VERSION: &str = "1.00";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("incomplete document: missing {path}")]
    Missing { path: String },
    #[error("expected a scalar value at {path}")]
    NotScalar { path: String },
    #[error("document attributes must be an object")]
    NotAnObject,
    #[error("failed to serialize document to XML: {source}")]
    Serialize {
        #[from]
        source: SeError,
    },
}

/// The two document kinds the service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    /// `DPS`, the service invoice declaration.
    Invoice,
    /// `pedRegEvento`, an event registration such as a cancellation.
    Event,
}

impl DocumentKind {
    pub fn root_element(&self) -> &'static str {
        match self {
            DocumentKind::Invoice => "DPS",
            DocumentKind::Event => "pedRegEvento",
        }
    }

    /// Element that carries the `Id` attribute and gets signed.
    pub fn signed_element(&self) -> &'static str {
        match self {
            DocumentKind::Invoice => "infDPS",
            DocumentKind::Event => "infPedReg",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Document {
    Invoice(Dps),
    Event(EventRequest),
}

impl Document {
    pub fn id(&self) -> &DocumentId {
        match self {
            Document::Invoice(dps) => &dps.inf.id,
            Document::Event(event) => &event.inf.id,
        }
    }

    pub fn kind(&self) -> DocumentKind {
        match self {
            Document::Invoice(_) => DocumentKind::Invoice,
            Document::Event(_) => DocumentKind::Event,
        }
    }

    /// Access key of the invoice an event refers to.
    pub fn invoice_key(&self) -> Option<&str> {
        match self {
            Document::Invoice(_) => None,
            Document::Event(event) => Some(event.invoice_key()),
        }
    }
}

impl ToXml for Document {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, DocumentError> {
        match self {
            Document::Invoice(dps) => dps.to_xml_with_format(format),
            Document::Event(event) => event.to_xml_with_format(format),
        }
    }
}

/// Typed document together with its serialized form.
#[derive(Debug, Clone)]
pub struct BuiltDocument {
    document: Document,
    xml: String,
}

impl BuiltDocument {
    pub fn id(&self) -> &DocumentId {
        self.document.id()
    }

    pub fn kind(&self) -> DocumentKind {
        self.document.kind()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Serialized XML, without prolog.
    pub fn xml(&self) -> &str {
        &self.xml
    }

    pub fn into_parts(self) -> (Document, String) {
        (self.document, self.xml)
    }
}

/// Builds documents from nested attribute maps.
///
/// Keys are matched case-insensitively. Each call starts from the attributes
/// it is given; nothing is carried over between calls.
///
/// # Examples
/// ```rust
/// use nfse_core::config::EnvironmentType;
/// use nfse_core::document::{DocumentBuilder, DocumentKind};
/// use serde_json::json;
///
/// let builder = DocumentBuilder::new().with_environment(EnvironmentType::Staging);
/// let built = builder.build(DocumentKind::Event, &json!({
///     "nPedRegEvento": "1",
///     "infPedReg": {
///         "verAplic": "app-1.0",
///         "dhEvento": "2024-05-01T10:00:00-03:00",
///         "CNPJAutor": "12345678000199",
///         "chNFSe": "35503082212345678000199000000000000124050000000001",
///         "e101101": {"cMotivo": "1", "xMotivo": "Erro na emissao"}
///     }
/// }))?;
/// assert!(built.id().as_str().starts_with("PRE3550308"));
/// assert!(built.xml().contains("<tpAmb>2</tpAmb>"));
/// # Ok::<(), nfse_core::document::DocumentError>(())
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentBuilder {
    environment: Option<EnvironmentType>,
    format: XmlFormat,
}

impl DocumentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment used for `tpAmb` when the attributes do not set it.
    pub fn with_environment(mut self, environment: EnvironmentType) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn with_format(mut self, format: XmlFormat) -> Self {
        self.format = format;
        self
    }

    pub fn environment(&self) -> Option<EnvironmentType> {
        self.environment
    }

    pub fn build(
        &self,
        kind: DocumentKind,
        attributes: &Value,
    ) -> Result<BuiltDocument, DocumentError> {
        let canonical = canonicalize_keys(attributes);
        let root = Node::root(&canonical)?;
        let document = match kind {
            DocumentKind::Invoice => Document::Invoice(Dps::from_attributes(&root, self.environment)?),
            DocumentKind::Event => {
                Document::Event(EventRequest::from_attributes(&root, self.environment)?)
            }
        };
        let xml = document.to_xml_with_format(self.format)?;
        debug!(id = %document.id(), kind = ?kind, "document built");
        Ok(BuiltDocument { document, xml })
    }

    pub fn build_dps(&self, attributes: &Value) -> Result<BuiltDocument, DocumentError> {
        self.build(DocumentKind::Invoice, attributes)
    }

    pub fn build_event(&self, attributes: &Value) -> Result<BuiltDocument, DocumentError> {
        self.build(DocumentKind::Event, attributes)
    }
}

/// `tpAmb` from the attributes, else from the builder environment.
fn environment_code(
    node: &Node<'_>,
    environment: Option<EnvironmentType>,
) -> Result<String, DocumentError> {
    match (node.opt_text("tpamb")?, environment) {
        (Some(code), _) => Ok(code),
        (None, Some(env)) => Ok(env.tp_amb().to_string()),
        (None, None) => node.text("tpamb"),
    }
}

/// Root `versao`, accepting the older `version` spelling.
fn version(root: &Node<'_>) -> Result<String, DocumentError> {
    Ok(root
        .non_empty_text("versao")?
        .or(root.non_empty_text("version")?)
        .unwrap_or_else(|| DEFAULT_VERSION.to_string()))
}
