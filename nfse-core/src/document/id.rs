//! Document identifiers.
//!
//! Invoice: `DPS` + location(7) + issuer kind(1) + issuer tax id(14) +
//! series(5) + sequence(15). Event: `PRE` + invoice key + event code(6) +
//! event sequence(3). Fields are left padded with zeros and never truncated,
//! except the location code which is cut to 7 characters.
use std::fmt;

use super::dps::PartyId;

const DPS_PREFIX: &str = "DPS";
const EVENT_PREFIX: &str = "PRE";
const LOCATION_WIDTH: usize = 7;
const TAX_ID_WIDTH: usize = 14;
const SERIES_WIDTH: usize = 5;
const SEQUENCE_WIDTH: usize = 15;
const EVENT_SEQUENCE_WIDTH: usize = 3;

/// Value of the signed element's `Id` attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn pad_left(value: &str, width: usize) -> String {
    format!("{value:0>width$}")
}

/// Identifier of an invoice declaration.
///
/// # Examples
/// ```rust
/// use nfse_core::document::{id::dps_id, PartyId};
///
/// let issuer = PartyId::Cnpj("12345678000199".into());
/// let id = dps_id("3550308", Some(&issuer), "901", "2");
/// assert_eq!(id.as_str(), "DPS355030821234567800019900901000000000000002");
/// ```
pub fn dps_id(location: &str, issuer: Option<&PartyId>, series: &str, sequence: &str) -> DocumentId {
    let location: String = location.chars().take(LOCATION_WIDTH).collect();
    let kind = match issuer {
        Some(PartyId::Cnpj(_)) => '2',
        _ => '1',
    };
    let tax_id = issuer.map(PartyId::value).unwrap_or_default();

    let mut id = String::with_capacity(45);
    id.push_str(DPS_PREFIX);
    id.push_str(&pad_left(&location, LOCATION_WIDTH));
    id.push(kind);
    id.push_str(&pad_left(tax_id, TAX_ID_WIDTH));
    id.push_str(&pad_left(series, SERIES_WIDTH));
    id.push_str(&pad_left(sequence, SEQUENCE_WIDTH));
    DocumentId(id)
}

/// Identifier of an event registration request.
pub fn event_id(invoice_key: &str, event_code: &str, sequence: &str) -> DocumentId {
    let mut id = String::with_capacity(EVENT_PREFIX.len() + invoice_key.len() + 9);
    id.push_str(EVENT_PREFIX);
    id.push_str(invoice_key);
    id.push_str(event_code);
    id.push_str(&pad_left(sequence, EVENT_SEQUENCE_WIDTH));
    DocumentId(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn individual_issuer_uses_flag_one() {
        let issuer = PartyId::Cpf("12345678909".into());
        let id = dps_id("3550308", Some(&issuer), "1", "10");
        assert_eq!(id.as_str(), "DPS355030810001234567890900001000000000000010");
    }

    #[test]
    fn missing_issuer_pads_zero_tax_id() {
        let id = dps_id("3550308", None, "1", "1");
        assert_eq!(&id.as_str()[10..25], "100000000000000");
    }

    #[test]
    fn location_is_cut_and_padded_to_seven() {
        let long = dps_id("355030899", None, "1", "1");
        assert_eq!(&long.as_str()[3..10], "3550308");
        let short = dps_id("42", None, "1", "1");
        assert_eq!(&short.as_str()[3..10], "0000042");
    }

    #[test]
    fn oversized_fields_are_not_truncated() {
        let id = dps_id("3550308", None, "1234567", "1");
        assert_eq!(id.as_str().len(), 47);
        assert!(id.as_str().contains("1234567"));
    }

    #[test]
    fn event_id_concatenates_key_code_and_sequence() {
        let id = event_id("KEY", "101101", "1");
        assert_eq!(id.as_str(), "PREKEY101101001");
    }

    proptest! {
        #[test]
        fn series_and_sequence_are_zero_padded(
            series in "[0-9]{1,5}",
            sequence in "[0-9]{1,15}",
        ) {
            let issuer = PartyId::Cnpj("12345678000199".into());
            let id = dps_id("3550308", Some(&issuer), &series, &sequence);
            let id = id.as_str();
            prop_assert_eq!(id.len(), 45);
            let series_part = &id[25..30];
            let sequence_part = &id[30..45];
            prop_assert!(series_part.ends_with(series.as_str()));
            prop_assert!(series_part[..5 - series.len()].chars().all(|c| c == '0'));
            prop_assert!(sequence_part.ends_with(sequence.as_str()));
            prop_assert!(sequence_part[..15 - sequence.len()].chars().all(|c| c == '0'));
        }

        #[test]
        fn identical_fields_give_identical_ids(
            location in "[0-9]{7}",
            tax_id in "[0-9]{14}",
            series in "[0-9]{1,5}",
            sequence in "[0-9]{1,15}",
        ) {
            let issuer = PartyId::Cnpj(tax_id);
            let first = dps_id(&location, Some(&issuer), &series, &sequence);
            let second = dps_id(&location, Some(&issuer), &series, &sequence);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn issuer_kind_changes_only_the_flag(tax_id in "[0-9]{11}") {
            let cnpj = dps_id("3550308", Some(&PartyId::Cnpj(tax_id.clone())), "1", "1");
            let cpf = dps_id("3550308", Some(&PartyId::Cpf(tax_id)), "1", "1");
            prop_assert_eq!(&cnpj.as_str()[10..11], "2");
            prop_assert_eq!(&cpf.as_str()[10..11], "1");
            prop_assert_eq!(&cnpj.as_str()[11..], &cpf.as_str()[11..]);
        }
    }
}
