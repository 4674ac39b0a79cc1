//! Transport envelope: signed XML ⇄ gzip ⇄ base64 ⇄ JSON field.
use std::io::{Read, Write};

use base64ct::{Base64, Encoding};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::document::DocumentKind;

/// Prolog prepended to signed XML before compression.
pub const XML_PROLOG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("compression failed: {0}")]
    Compress(#[source] std::io::Error),
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64ct::Error),
    #[error("payload is not valid gzip: {0}")]
    Decompress(#[source] std::io::Error),
    #[error("response has no '{field}' field")]
    MissingField { field: String },
}

/// JSON field that carries a compressed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeField {
    Dps,
    Event,
}

impl EnvelopeField {
    pub fn name(&self) -> &'static str {
        match self {
            EnvelopeField::Dps => "dpsXmlGZipB64",
            EnvelopeField::Event => "pedidoRegistroEventoXmlGZipB64",
        }
    }
}

impl From<DocumentKind> for EnvelopeField {
    fn from(kind: DocumentKind) -> Self {
        match kind {
            DocumentKind::Invoice => EnvelopeField::Dps,
            DocumentKind::Event => EnvelopeField::Event,
        }
    }
}

pub fn compress_encode(data: &str) -> Result<String, EnvelopeError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data.as_bytes())
        .map_err(EnvelopeError::Compress)?;
    let compressed = encoder.finish().map_err(EnvelopeError::Compress)?;
    Ok(Base64::encode_string(&compressed))
}

pub fn decode_decompress(payload: &str) -> Result<String, EnvelopeError> {
    let compressed = Base64::decode_vec(payload.trim())?;
    let mut decoder = GzDecoder::new(compressed.as_slice());
    let mut out = String::new();
    decoder
        .read_to_string(&mut out)
        .map_err(EnvelopeError::Decompress)?;
    Ok(out)
}

/// Signed document wrapped for submission.
///
/// # Examples
/// ```rust
/// use nfse_core::envelope::{decode_decompress, Envelope, EnvelopeField, XML_PROLOG};
///
/// let envelope = Envelope::seal(EnvelopeField::Dps, "<DPS/>")?;
/// let body = envelope.to_json();
/// let xml = decode_decompress(body["dpsXmlGZipB64"].as_str().unwrap_or_default())?;
/// assert_eq!(xml, format!("{XML_PROLOG}<DPS/>"));
/// # Ok::<(), nfse_core::envelope::EnvelopeError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    field: EnvelopeField,
    payload: String,
}

impl Envelope {
    /// Prepend the XML prolog, gzip and base64 encode.
    pub fn seal(field: EnvelopeField, signed_xml: &str) -> Result<Self, EnvelopeError> {
        let mut xml = String::with_capacity(XML_PROLOG.len() + signed_xml.len());
        xml.push_str(XML_PROLOG);
        xml.push_str(signed_xml);
        Ok(Self {
            field,
            payload: compress_encode(&xml)?,
        })
    }

    pub fn field(&self) -> EnvelopeField {
        self.field
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn to_json(&self) -> Value {
        let mut body = Map::with_capacity(1);
        body.insert(self.field.name().to_string(), Value::String(self.payload.clone()));
        Value::Object(body)
    }
}

/// Service response: structured JSON when it parses as one, raw text otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Raw(String),
}

impl ResponseBody {
    pub fn decode(body: &str) -> Self {
        match serde_json::from_str::<Value>(body) {
            Ok(value @ (Value::Object(_) | Value::Array(_))) => ResponseBody::Json(value),
            _ => ResponseBody::Raw(body.to_string()),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&str> {
        match self {
            ResponseBody::Raw(text) => Some(text),
            ResponseBody::Json(_) => None,
        }
    }

    /// Decode a `*XmlGZipB64` field of a JSON response back to XML.
    pub fn decompressed_xml(&self, field: &str) -> Result<String, EnvelopeError> {
        let payload = self
            .as_json()
            .and_then(|value| value.get(field))
            .and_then(Value::as_str)
            .ok_or_else(|| EnvelopeError::MissingField {
                field: field.to_string(),
            })?;
        decode_decompress(payload)
    }
}
