use nfse_core::credential::Credential;
use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    hash::MessageDigest,
    pkey::PKey,
    rsa::Rsa,
    x509::{X509NameBuilder, X509},
};
use serde_json::{json, Value};

#[allow(dead_code)]
pub const COMPANY_CN: &str = "EMPRESA TESTE LTDA:12345678000199";

#[allow(dead_code)]
pub fn self_signed_credential(common_name: &str, valid_days: u32) -> Credential {
    let key = PKey::from_rsa(Rsa::generate(2048).expect("rsa")).expect("pkey");
    let mut name = X509NameBuilder::new().expect("name");
    name.append_entry_by_text("C", "BR").expect("country");
    name.append_entry_by_text("O", "ICP-Brasil").expect("org");
    name.append_entry_by_text("CN", common_name).expect("cn");
    let name = name.build();

    let mut builder = X509::builder().expect("builder");
    builder.set_version(2).expect("version");
    let serial = BigNum::from_u32(7)
        .and_then(|n| n.to_asn1_integer())
        .expect("serial");
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

    Credential::from_pem(
        &key.private_key_to_pem_pkcs8().expect("key pem"),
        &cert.to_pem().expect("cert pem"),
    )
    .expect("credential")
}

#[allow(dead_code)]
pub fn invoice_attributes() -> Value {
    json!({
        "infDPS": {
            "tpAmb": "2",
            "dhEmi": "2024-05-01T10:00:00-03:00",
            "verAplic": "integration-1.0",
            "serie": "901",
            "nDPS": "2",
            "dCompet": "2024-05-01",
            "tpEmit": "1",
            "cLocEmi": "3550308",
            "prest": {
                "CNPJ": "12345678000199",
                "IM": "1234567",
                "email": "fiscal@empresa.test",
                "regTrib": {"opSimpNac": "1", "regEspTrib": "0"}
            },
            "toma": {
                "CPF": "12345678901",
                "xNome": "Cliente & Filhos",
                "end": {
                    "endNac": {"cMun": "3550308", "CEP": "01001000"},
                    "xLgr": "Praca da Se",
                    "nro": "100",
                    "xBairro": "Se"
                }
            },
            "serv": {
                "locPrest": {"cLocPrestacao": "3550308"},
                "cServ": {"cTribNac": "010101", "xDescServ": "Consultoria em TI"}
            },
            "valores": {
                "vServPrest": {"vServ": "1500.00"},
                "trib": {
                    "tribMun": {"tribISSQN": "1", "tpRetISSQN": "1"},
                    "totTrib": {"indTotTrib": "0"}
                }
            }
        }
    })
}

#[allow(dead_code)]
pub fn cancellation_attributes(key: &str) -> Value {
    json!({
        "nPedRegEvento": "1",
        "infPedReg": {
            "verAplic": "integration-1.0",
            "dhEvento": "2024-05-02T09:00:00-03:00",
            "CNPJAutor": "12345678000199",
            "chNFSe": key,
            "e101101": {"cMotivo": "1", "xMotivo": "Erro na emissao"}
        }
    })
}
