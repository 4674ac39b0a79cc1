//! XML serialization for documents.
use super::dps::{Address, AddressDetail, Dps, Party, PartyId, Service, Substitution, TaxRegime, Values};
use super::event::{EventDetail, EventRequest};
use super::{DocumentError, NFSE_NAMESPACE};

use quick_xml::se::Serializer as QuickXmlSerializer;
use serde::ser::{Serialize, SerializeStruct, Serializer};

/// XML formatting options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum XmlFormat {
    #[default]
    Compact,
    Pretty {
        indent_char: char,
        indent_size: usize,
    },
}

/// Trait for types that can be serialized to document XML.
pub trait ToXml {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, DocumentError>;

    fn to_xml(&self) -> Result<String, DocumentError> {
        self.to_xml_with_format(XmlFormat::Compact)
    }

    fn to_xml_pretty(&self) -> Result<String, DocumentError> {
        self.to_xml_with_format(XmlFormat::Pretty {
            indent_char: ' ',
            indent_size: 2,
        })
    }
}

impl ToXml for Dps {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, DocumentError> {
        to_xml_with_format(&DpsXml(self), format)
    }
}

impl ToXml for EventRequest {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, DocumentError> {
        to_xml_with_format(&EventRequestXml(self), format)
    }
}

fn to_xml_with_format<T: Serialize>(value: &T, format: XmlFormat) -> Result<String, DocumentError> {
    let mut buffer = String::with_capacity(2048);
    {
        let mut serializer = QuickXmlSerializer::new(&mut buffer);
        if let XmlFormat::Pretty {
            indent_char,
            indent_size,
        } = format
        {
            serializer.indent(indent_char, indent_size);
        }
        value.serialize(serializer)?;
    }
    Ok(buffer)
}

struct DpsXml<'a>(&'a Dps);

impl<'a> Serialize for DpsXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let dps = self.0;
        let inf = &dps.inf;

        let mut root = s.serialize_struct("DPS", 0)?;
        root.serialize_field("@versao", &dps.versao)?;
        root.serialize_field("@xmlns", NFSE_NAMESPACE)?;
        root.serialize_field("infDPS", &InfDpsXml(inf))?;
        root.end()
    }
}

struct InfDpsXml<'a>(&'a super::InfDps);

impl<'a> Serialize for InfDpsXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let inf = self.0;
        let mut st = s.serialize_struct("infDPS", 0)?;
        st.serialize_field("@Id", inf.id.as_str())?;

        // ---- identification ----
        st.serialize_field("tpAmb", &inf.tp_amb)?;
        st.serialize_field("dhEmi", &inf.dh_emi)?;
        st.serialize_field("verAplic", &inf.ver_aplic)?;
        st.serialize_field("serie", &inf.serie)?;
        st.serialize_field("nDPS", &inf.n_dps)?;
        st.serialize_field("dCompet", &inf.d_compet)?;
        st.serialize_field("tpEmit", &inf.tp_emit)?;
        st.serialize_field("cLocEmi", &inf.c_loc_emi)?;
        if let Some(subst) = &inf.subst {
            st.serialize_field("subst", &SubstitutionXml(subst))?;
        }

        // ---- parties ----
        if let Some(prest) = &inf.prest {
            st.serialize_field("prest", &PartyXml("prest", prest))?;
        }
        if let Some(toma) = &inf.toma {
            st.serialize_field("toma", &PartyXml("toma", toma))?;
        }

        // ---- service & values ----
        st.serialize_field("serv", &ServiceXml(&inf.serv))?;
        st.serialize_field("valores", &ValuesXml(&inf.valores))?;
        st.end()
    }
}

struct SubstitutionXml<'a>(&'a Substitution);

impl<'a> Serialize for SubstitutionXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let subst = self.0;
        let mut st = s.serialize_struct("subst", 3)?;
        st.serialize_field("chSubstda", &subst.ch_substda)?;
        st.serialize_field("cMotivo", &subst.c_motivo)?;
        st.serialize_field("xMotivo", &subst.x_motivo)?;
        st.end()
    }
}

struct PartyXml<'a>(&'static str, &'a Party);

impl<'a> Serialize for PartyXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let p = self.1;
        let mut st = s.serialize_struct(self.0, 0)?;

        match &p.id {
            Some(PartyId::Cnpj(cnpj)) => st.serialize_field("CNPJ", cnpj)?,
            Some(PartyId::Cpf(cpf)) => st.serialize_field("CPF", cpf)?,
            None => {}
        }
        if let Some(im) = &p.im {
            st.serialize_field("IM", im)?;
        }
        if let Some(name) = &p.x_nome {
            st.serialize_field("xNome", name)?;
        }
        if let Some(end) = &p.end {
            st.serialize_field("end", &AddressXml(end))?;
        }
        if let Some(fone) = &p.fone {
            st.serialize_field("fone", fone)?;
        }
        if let Some(email) = &p.email {
            st.serialize_field("email", email)?;
        }
        if let Some(regime) = &p.reg_trib {
            st.serialize_field("regTrib", &TaxRegimeXml(regime))?;
        }
        st.end()
    }
}

struct AddressXml<'a>(&'a Address);

impl<'a> Serialize for AddressXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let a = self.0;
        let mut st = s.serialize_struct("end", 0)?;
        match &a.detail {
            AddressDetail::National { .. } => {
                st.serialize_field("endNac", &AddressDetailXml(&a.detail))?
            }
            AddressDetail::Foreign { .. } => {
                st.serialize_field("endExt", &AddressDetailXml(&a.detail))?
            }
            AddressDetail::None => {}
        }
        st.serialize_field("xLgr", &a.x_lgr)?;
        st.serialize_field("nro", &a.nro)?;
        if let Some(complement) = &a.x_cpl {
            st.serialize_field("xCpl", complement)?;
        }
        st.serialize_field("xBairro", &a.x_bairro)?;
        st.end()
    }
}

struct AddressDetailXml<'a>(&'a AddressDetail);

impl<'a> Serialize for AddressDetailXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.0 {
            AddressDetail::National { c_mun, cep } => {
                let mut st = s.serialize_struct("endNac", 2)?;
                st.serialize_field("cMun", c_mun)?;
                st.serialize_field("CEP", cep)?;
                st.end()
            }
            AddressDetail::Foreign {
                c_pais,
                c_end_post,
                x_cidade,
                x_est_prov_reg,
            } => {
                let mut st = s.serialize_struct("endExt", 0)?;
                st.serialize_field("cPais", c_pais)?;
                st.serialize_field("cEndPost", c_end_post)?;
                if let Some(city) = x_cidade {
                    st.serialize_field("xCidade", city)?;
                }
                if let Some(region) = x_est_prov_reg {
                    st.serialize_field("xEstProvReg", region)?;
                }
                st.end()
            }
            AddressDetail::None => s.serialize_unit(),
        }
    }
}

struct TaxRegimeXml<'a>(&'a TaxRegime);

impl<'a> Serialize for TaxRegimeXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let r = self.0;
        let mut st = s.serialize_struct("regTrib", 0)?;
        st.serialize_field("opSimpNac", &r.op_simp_nac)?;
        if let Some(apportionment) = &r.reg_ap_trib_sn {
            st.serialize_field("regApTribSN", apportionment)?;
        }
        st.serialize_field("regEspTrib", &r.reg_esp_trib)?;
        st.end()
    }
}

struct ServiceXml<'a>(&'a Service);

impl<'a> Serialize for ServiceXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let serv = self.0;
        let mut st = s.serialize_struct("serv", 2)?;
        st.serialize_field("locPrest", &LocationXml(&serv.c_loc_prestacao))?;
        st.serialize_field("cServ", &ServiceCodeXml(serv))?;
        st.end()
    }
}

struct LocationXml<'a>(&'a str);

impl<'a> Serialize for LocationXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("locPrest", 1)?;
        st.serialize_field("cLocPrestacao", self.0)?;
        st.end()
    }
}

struct ServiceCodeXml<'a>(&'a Service);

impl<'a> Serialize for ServiceCodeXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let serv = self.0;
        let mut st = s.serialize_struct("cServ", 0)?;
        st.serialize_field("cTribNac", &serv.c_trib_nac)?;
        if let Some(municipal) = &serv.c_trib_mun {
            st.serialize_field("cTribMun", municipal)?;
        }
        st.serialize_field("xDescServ", &serv.x_desc_serv)?;
        if let Some(nbs) = &serv.c_nbs {
            st.serialize_field("cNBS", nbs)?;
        }
        if let Some(internal) = &serv.c_int_contrib {
            st.serialize_field("cIntContrib", internal)?;
        }
        st.end()
    }
}

struct ValuesXml<'a>(&'a Values);

impl<'a> Serialize for ValuesXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let v = self.0;
        let mut st = s.serialize_struct("valores", 2)?;
        st.serialize_field("vServPrest", &Single("vServPrest", "vServ", &v.v_serv))?;
        st.serialize_field("trib", &TributesXml(v))?;
        st.end()
    }
}

struct TributesXml<'a>(&'a Values);

impl<'a> Serialize for TributesXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let v = self.0;
        let mut st = s.serialize_struct("trib", 2)?;
        st.serialize_field("tribMun", &MunicipalTaxXml(v))?;
        st.serialize_field("totTrib", &Single("totTrib", "indTotTrib", &v.ind_tot_trib))?;
        st.end()
    }
}

struct MunicipalTaxXml<'a>(&'a Values);

impl<'a> Serialize for MunicipalTaxXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let v = self.0;
        let mut st = s.serialize_struct("tribMun", 0)?;
        st.serialize_field("tribISSQN", &v.trib_issqn)?;
        if let Some(retention) = &v.tp_ret_issqn {
            st.serialize_field("tpRetISSQN", retention)?;
        }
        st.end()
    }
}

/// Wrapper element with exactly one text child.
struct Single<'a>(&'static str, &'static str, &'a str);

impl<'a> Serialize for Single<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct(self.0, 1)?;
        st.serialize_field(self.1, self.2)?;
        st.end()
    }
}

struct EventRequestXml<'a>(&'a EventRequest);

impl<'a> Serialize for EventRequestXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let event = self.0;
        let inf = &event.inf;

        let mut root = s.serialize_struct("pedRegEvento", 0)?;
        root.serialize_field("@versao", &event.versao)?;
        root.serialize_field("@xmlns", NFSE_NAMESPACE)?;
        root.serialize_field("infPedReg", &InfPedRegXml(inf))?;
        root.end()
    }
}

struct InfPedRegXml<'a>(&'a super::InfPedReg);

impl<'a> Serialize for InfPedRegXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let inf = self.0;
        let mut st = s.serialize_struct("infPedReg", 0)?;
        st.serialize_field("@Id", inf.id.as_str())?;
        st.serialize_field("tpAmb", &inf.tp_amb)?;
        st.serialize_field("verAplic", &inf.ver_aplic)?;
        st.serialize_field("dhEvento", &inf.dh_evento)?;
        match &inf.author {
            Some(PartyId::Cnpj(cnpj)) => st.serialize_field("CNPJAutor", cnpj)?,
            Some(PartyId::Cpf(cpf)) => st.serialize_field("CPFAutor", cpf)?,
            None => {}
        }
        st.serialize_field("chNFSe", &inf.ch_nfse)?;
        st.serialize_field("nPedRegEvento", &inf.n_ped_reg_evento)?;
        match &inf.detail {
            EventDetail::Cancellation { .. } => {
                st.serialize_field("e101101", &EventDetailXml(&inf.detail))?
            }
            EventDetail::SubstitutionCancellation { .. } => {
                st.serialize_field("e105102", &EventDetailXml(&inf.detail))?
            }
            EventDetail::None => {}
        }
        st.end()
    }
}

struct EventDetailXml<'a>(&'a EventDetail);

impl<'a> Serialize for EventDetailXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.0 {
            EventDetail::Cancellation {
                x_desc,
                c_motivo,
                x_motivo,
            } => {
                let mut st = s.serialize_struct("e101101", 3)?;
                st.serialize_field("xDesc", x_desc)?;
                st.serialize_field("cMotivo", c_motivo)?;
                st.serialize_field("xMotivo", x_motivo)?;
                st.end()
            }
            EventDetail::SubstitutionCancellation {
                x_desc,
                c_motivo,
                x_motivo,
                ch_substituta,
            } => {
                let mut st = s.serialize_struct("e105102", 0)?;
                st.serialize_field("xDesc", x_desc)?;
                st.serialize_field("cMotivo", c_motivo)?;
                if let Some(reason) = x_motivo {
                    st.serialize_field("xMotivo", reason)?;
                }
                st.serialize_field("chSubstituta", ch_substituta)?;
                st.end()
            }
            EventDetail::None => s.serialize_unit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::minimal_dps;
    use super::super::DocumentBuilder;
    use super::*;

    #[test]
    fn text_is_escaped() {
        let mut attrs = minimal_dps();
        attrs["infDPS"]["serv"]["cServ"]["xDescServ"] = "Obras & <reparos>".into();
        let built = DocumentBuilder::new().build_dps(&attrs).expect("build");
        assert!(built.xml().contains("Obras &amp; &lt;reparos&gt;"));
    }

    #[test]
    fn compact_and_pretty_carry_same_content() {
        let built = DocumentBuilder::new().build_dps(&minimal_dps()).expect("build");
        let (document, compact) = built.into_parts();
        let pretty = document.to_xml_pretty().expect("pretty");
        let squeezed: String = pretty
            .lines()
            .map(str::trim)
            .collect::<Vec<_>>()
            .concat();
        assert_eq!(squeezed, compact);
        assert_eq!(document.to_xml().expect("compact"), compact);
    }
}
