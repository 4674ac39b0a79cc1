//! Invoice declaration (`DPS`) schema.
use super::attributes::Node;
use super::id::{dps_id, DocumentId};
use super::{environment_code, version, DocumentError};
use crate::config::EnvironmentType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dps {
    pub versao: String,
    pub inf: InfDps,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfDps {
    pub id: DocumentId,
    pub tp_amb: String,
    pub dh_emi: String,
    pub ver_aplic: String,
    pub serie: String,
    pub n_dps: String,
    pub d_compet: String,
    pub tp_emit: String,
    pub c_loc_emi: String,
    pub subst: Option<Substitution>,
    pub prest: Option<Party>,
    pub toma: Option<Party>,
    pub serv: Service,
    pub valores: Values,
}

/// Reference to the invoice being replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub ch_substda: String,
    pub c_motivo: String,
    pub x_motivo: String,
}

/// Federal tax id. CNPJ wins when the input carries both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartyId {
    Cnpj(String),
    Cpf(String),
}

impl PartyId {
    pub fn value(&self) -> &str {
        match self {
            PartyId::Cnpj(value) | PartyId::Cpf(value) => value,
        }
    }

    fn from_node(node: &Node<'_>, cnpj: &str, cpf: &str) -> Result<Option<Self>, DocumentError> {
        if let Some(value) = node.opt_text(cnpj)? {
            return Ok(Some(PartyId::Cnpj(value)));
        }
        Ok(node.opt_text(cpf)?.map(PartyId::Cpf))
    }
}

/// Provider (`prest`) or taker (`toma`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Party {
    pub id: Option<PartyId>,
    pub im: Option<String>,
    pub x_nome: Option<String>,
    pub end: Option<Address>,
    pub fone: Option<String>,
    pub email: Option<String>,
    /// Only providers carry a tax regime.
    pub reg_trib: Option<TaxRegime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub detail: AddressDetail,
    pub x_lgr: String,
    pub nro: String,
    pub x_cpl: Option<String>,
    pub x_bairro: String,
}

/// `endNac` and `endExt` are mutually exclusive; national wins if both are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressDetail {
    National {
        c_mun: String,
        cep: String,
    },
    Foreign {
        c_pais: String,
        c_end_post: String,
        x_cidade: Option<String>,
        x_est_prov_reg: Option<String>,
    },
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxRegime {
    pub op_simp_nac: String,
    pub reg_ap_trib_sn: Option<String>,
    pub reg_esp_trib: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub c_loc_prestacao: String,
    pub c_trib_nac: String,
    pub c_trib_mun: Option<String>,
    pub x_desc_serv: String,
    pub c_nbs: Option<String>,
    pub c_int_contrib: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Values {
    pub v_serv: String,
    pub trib_issqn: String,
    pub tp_ret_issqn: Option<String>,
    pub ind_tot_trib: String,
}

impl Dps {
    pub(crate) fn from_attributes(
        root: &Node<'_>,
        environment: Option<EnvironmentType>,
    ) -> Result<Self, DocumentError> {
        let inf = root.require("infdps")?;

        let subst = inf.child("subst").map(|s| Substitution::from_node(&s)).transpose()?;
        let prest = inf
            .child("prest")
            .map(|p| Party::from_node(&p, true))
            .transpose()?;
        let toma = inf
            .child("toma")
            .map(|t| Party::from_node(&t, false))
            .transpose()?;

        let serie = inf.text("serie")?;
        let n_dps = inf.text("ndps")?;
        let c_loc_emi = inf.text("clocemi")?;
        let id = dps_id(
            &c_loc_emi,
            prest.as_ref().and_then(|p| p.id.as_ref()),
            &serie,
            &n_dps,
        );

        Ok(Dps {
            versao: version(root)?,
            inf: InfDps {
                id,
                tp_amb: environment_code(&inf, environment)?,
                dh_emi: inf.text("dhemi")?,
                ver_aplic: inf.text("veraplic")?,
                serie,
                n_dps,
                d_compet: inf.text("dcompet")?,
                tp_emit: inf.text("tpemit")?,
                c_loc_emi,
                subst,
                prest,
                toma,
                serv: Service::from_node(&inf.require("serv")?)?,
                valores: Values::from_node(&inf.require("valores")?)?,
            },
        })
    }
}

impl Substitution {
    fn from_node(node: &Node<'_>) -> Result<Self, DocumentError> {
        Ok(Substitution {
            ch_substda: node.text("chsubstda")?,
            c_motivo: node.text("cmotivo")?,
            x_motivo: node.text("xmotivo")?,
        })
    }
}

impl Party {
    fn from_node(node: &Node<'_>, provider: bool) -> Result<Self, DocumentError> {
        let reg_trib = if provider {
            Some(TaxRegime::from_node(&node.require("regtrib")?)?)
        } else {
            None
        };
        Ok(Party {
            id: PartyId::from_node(node, "cnpj", "cpf")?,
            im: node.non_empty_text("im")?,
            x_nome: if provider {
                node.non_empty_text("xnome")?
            } else {
                Some(node.text("xnome")?)
            },
            end: node.child("end").map(|e| Address::from_node(&e)).transpose()?,
            fone: node.non_empty_text("fone")?,
            email: node.non_empty_text("email")?,
            reg_trib,
        })
    }
}

impl Address {
    fn from_node(node: &Node<'_>) -> Result<Self, DocumentError> {
        let detail = if let Some(national) = node.child("endnac") {
            AddressDetail::National {
                c_mun: national.text("cmun")?,
                cep: national.text("cep")?,
            }
        } else if let Some(foreign) = node.child("endext") {
            AddressDetail::Foreign {
                c_pais: foreign.text("cpais")?,
                c_end_post: foreign.text("cendpost")?,
                x_cidade: foreign.non_empty_text("xcidade")?,
                x_est_prov_reg: foreign.non_empty_text("xestprovreg")?,
            }
        } else {
            AddressDetail::None
        };
        Ok(Address {
            detail,
            x_lgr: node.text("xlgr")?,
            nro: node.text("nro")?,
            x_cpl: node.non_empty_text("xcpl")?,
            x_bairro: node.text("xbairro")?,
        })
    }
}

impl TaxRegime {
    fn from_node(node: &Node<'_>) -> Result<Self, DocumentError> {
        Ok(TaxRegime {
            op_simp_nac: node.text("opsimpnac")?,
            reg_ap_trib_sn: node.opt_text("regaptribsn")?,
            reg_esp_trib: node.text("regesptrib")?,
        })
    }
}

impl Service {
    fn from_node(node: &Node<'_>) -> Result<Self, DocumentError> {
        let loc = node.require("locprest")?;
        let code = node.require("cserv")?;
        Ok(Service {
            c_loc_prestacao: loc.text("clocprestacao")?,
            c_trib_nac: code.text("ctribnac")?,
            c_trib_mun: code.opt_text("ctribmun")?,
            x_desc_serv: code.text("xdescserv")?,
            c_nbs: code.opt_text("cnbs")?,
            c_int_contrib: code.opt_text("cintcontrib")?,
        })
    }
}

impl Values {
    fn from_node(node: &Node<'_>) -> Result<Self, DocumentError> {
        let trib = node.require("trib")?;
        let municipal = trib.require("tribmun")?;
        Ok(Values {
            v_serv: node.require("vservprest")?.text("vserv")?,
            trib_issqn: municipal.text("tribissqn")?,
            tp_ret_issqn: municipal.opt_text("tpretissqn")?,
            ind_tot_trib: trib.require("tottrib")?.text("indtottrib")?,
        })
    }
}
