//! Event registration request (`pedRegEvento`) schema.
use super::attributes::Node;
use super::dps::PartyId;
use super::id::{event_id, DocumentId};
use super::{environment_code, version, DocumentError};
use crate::config::EnvironmentType;

const CANCELLATION_DESCRIPTION: &str = "Cancelamento de NFS-e";
const SUBSTITUTION_DESCRIPTION: &str = "Cancelamento de NFS-e por Substituição";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRequest {
    pub versao: String,
    pub inf: InfPedReg,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfPedReg {
    pub id: DocumentId,
    pub tp_amb: String,
    pub ver_aplic: String,
    pub dh_evento: String,
    pub author: Option<PartyId>,
    pub ch_nfse: String,
    pub n_ped_reg_evento: String,
    pub detail: EventDetail,
}

/// Event payload block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDetail {
    /// `e101101`
    Cancellation {
        x_desc: String,
        c_motivo: String,
        x_motivo: String,
    },
    /// `e105102`
    SubstitutionCancellation {
        x_desc: String,
        c_motivo: String,
        x_motivo: Option<String>,
        ch_substituta: String,
    },
    None,
}

impl EventDetail {
    /// Six digit event type code used in the identifier.
    pub fn code(&self) -> &'static str {
        match self {
            EventDetail::Cancellation { .. } => "101101",
            EventDetail::SubstitutionCancellation { .. } => "105102",
            EventDetail::None => "000000",
        }
    }

    fn from_node(node: &Node<'_>) -> Result<Self, DocumentError> {
        if let Some(block) = node.child("e101101") {
            return Ok(EventDetail::Cancellation {
                x_desc: block
                    .non_empty_text("xdesc")?
                    .unwrap_or_else(|| CANCELLATION_DESCRIPTION.to_string()),
                c_motivo: block.text("cmotivo")?,
                x_motivo: block.text("xmotivo")?,
            });
        }
        if let Some(block) = node.child("e105102") {
            return Ok(EventDetail::SubstitutionCancellation {
                x_desc: block
                    .non_empty_text("xdesc")?
                    .unwrap_or_else(|| SUBSTITUTION_DESCRIPTION.to_string()),
                c_motivo: block.text("cmotivo")?,
                x_motivo: block.non_empty_text("xmotivo")?,
                ch_substituta: block.text("chsubstituta")?,
            });
        }
        Ok(EventDetail::None)
    }
}

impl EventRequest {
    pub(crate) fn from_attributes(
        root: &Node<'_>,
        environment: Option<EnvironmentType>,
    ) -> Result<Self, DocumentError> {
        let inf = root.require("infpedreg")?;
        let ch_nfse = inf.text("chnfse")?;
        let n_ped_reg_evento = match inf.opt_text("npedregevento")? {
            Some(sequence) => sequence,
            None => root.text("npedregevento")?,
        };
        let detail = EventDetail::from_node(&inf)?;
        let id = event_id(&ch_nfse, detail.code(), &n_ped_reg_evento);

        Ok(EventRequest {
            versao: version(root)?,
            inf: InfPedReg {
                id,
                tp_amb: environment_code(&inf, environment)?,
                ver_aplic: inf.text("veraplic")?,
                dh_evento: inf.text("dhevento")?,
                author: PartyId::from_author(&inf)?,
                ch_nfse,
                n_ped_reg_evento,
                detail,
            },
        })
    }

    /// Key of the invoice the event refers to.
    pub fn invoice_key(&self) -> &str {
        &self.inf.ch_nfse
    }
}

impl PartyId {
    fn from_author(node: &Node<'_>) -> Result<Option<Self>, DocumentError> {
        if let Some(value) = node.opt_text("cnpjautor")? {
            return Ok(Some(PartyId::Cnpj(value)));
        }
        Ok(node.opt_text("cpfautor")?.map(PartyId::Cpf))
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Document, DocumentBuilder, DocumentKind};
    use super::*;
    use serde_json::{json, Value};

    const KEY: &str = "35503082212345678000199000000000000124050000000001";

    fn cancellation() -> Value {
        json!({
            "nPedRegEvento": 1,
            "infPedReg": {
                "tpAmb": "2",
                "verAplic": "nfse-core-0.1",
                "dhEvento": "2024-05-01T10:00:00-03:00",
                "CNPJAutor": "12345678000199",
                "chNFSe": KEY,
                "e101101": {"cMotivo": "1", "xMotivo": "Erro na emissao"}
            }
        })
    }

    #[test]
    fn cancellation_id_and_layout() {
        let built = DocumentBuilder::new()
            .build_event(&cancellation())
            .expect("build");
        assert_eq!(built.kind(), DocumentKind::Event);
        assert_eq!(built.id().as_str(), format!("PRE{KEY}101101001"));
        let expected = format!(
            concat!(
                r#"<pedRegEvento versao="1.00" xmlns="http://www.sped.fazenda.gov.br/nfse">"#,
                r#"<infPedReg Id="PRE{key}101101001"><tpAmb>2</tpAmb><verAplic>nfse-core-0.1</verAplic>"#,
                "<dhEvento>2024-05-01T10:00:00-03:00</dhEvento><CNPJAutor>12345678000199</CNPJAutor>",
                "<chNFSe>{key}</chNFSe><nPedRegEvento>1</nPedRegEvento>",
                "<e101101><xDesc>Cancelamento de NFS-e</xDesc><cMotivo>1</cMotivo>",
                "<xMotivo>Erro na emissao</xMotivo></e101101></infPedReg></pedRegEvento>"
            ),
            key = KEY
        );
        assert_eq!(built.xml(), expected);
    }

    #[test]
    fn substitution_block_selects_its_code() {
        let mut attrs = cancellation();
        let inf = attrs["infPedReg"].as_object_mut().expect("object");
        inf.remove("e101101");
        inf.insert(
            "e105102".into(),
            json!({"cMotivo": "01", "chSubstituta": "NEWKEY"}),
        );
        let built = DocumentBuilder::new().build_event(&attrs).expect("build");
        assert!(built.id().as_str().ends_with("105102001"));
        assert!(built.xml().contains(
            "<e105102><xDesc>Cancelamento de NFS-e por Substituição</xDesc><cMotivo>01</cMotivo><chSubstituta>NEWKEY</chSubstituta></e105102>"
        ));
    }

    #[test]
    fn unknown_event_uses_zero_code() {
        let mut attrs = cancellation();
        attrs["infPedReg"]
            .as_object_mut()
            .expect("object")
            .remove("e101101");
        let built = DocumentBuilder::new().build_event(&attrs).expect("build");
        assert!(built.id().as_str().ends_with("000000001"));
        assert!(!built.xml().contains("<e1"));
    }

    #[test]
    fn sequence_may_live_inside_inf_ped_reg() {
        let mut attrs = cancellation();
        attrs.as_object_mut().expect("object").remove("nPedRegEvento");
        attrs["infPedReg"]["nPedRegEvento"] = json!("12");
        let built = DocumentBuilder::new().build_event(&attrs).expect("build");
        assert!(built.id().as_str().ends_with("101101012"));
        match built.document() {
            Document::Event(event) => assert_eq!(event.invoice_key(), KEY),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_sequence_is_reported_at_root() {
        let mut attrs = cancellation();
        attrs.as_object_mut().expect("object").remove("nPedRegEvento");
        assert!(matches!(
            DocumentBuilder::new().build_event(&attrs),
            Err(DocumentError::Missing { ref path }) if path == "npedregevento"
        ));
    }
}
