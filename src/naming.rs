//! Deterministic rule-name generation for externally scheduled jobs.
//!
//! The scheduling provider caps rule names at 64 characters and silently
//! rejects or mismatches anything longer, so the ceiling is enforced here as a
//! hard error. Names are rebuilt from the same inputs on every reconciliation
//! pass, which is what makes re-scheduling and teardown lookups idempotent
//! without a secondary index.

use thiserror::Error;

/// Hard ceiling imposed by the scheduling provider's namespace.
pub const MAX_RULE_NAME_LEN: usize = 64;

const STAGE_WIDTH: usize = 4;
const KIND_WIDTH: usize = 6;
const SUBTYPE_WIDTH: usize = 6;
const UID_WIDTH: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NamingError {
    #[error("rule name '{name}' is {len} chars, over the 64 char provider limit")]
    TooLong { name: String, len: usize },
}

/// Destination kind of a scheduled job. Each variant carries a visually
/// distinct infix so truncated names stay human-diagnosable and cannot collide
/// across kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    AgolUpdate,
    KmlUpdate { period_hours: u32 },
    GetData,
    ExcelExport,
}

impl Destination {
    fn infix(&self) -> &'static str {
        match self {
            Destination::AgolUpdate => "agol-update",
            Destination::KmlUpdate { .. } => "kml-update",
            Destination::GetData => "get-data",
            Destination::ExcelExport => "excel-export",
        }
    }
}

fn truncate(value: &str, width: usize) -> &str {
    match value.char_indices().nth(width) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

/// Builds the scheduled-job rule name for one (source account, destination)
/// pair. Deterministic for identical inputs. The organization short name is
/// never truncated; the other components are cut to fixed widths before
/// joining, and the result is lower-cased.
pub fn generate_rule_name(
    org_short_name: &str,
    stage: &str,
    source_kind: &str,
    subtype: &str,
    source_uid: &str,
    destination: Destination,
) -> Result<String, NamingError> {
    // First hyphen-delimited segment of the uid is enough to disambiguate
    // within one organization and keeps uuids from eating the whole budget.
    let uid_segment = source_uid.split('-').next().unwrap_or(source_uid);

    let mut name = format!(
        "{}-{}-{}-{}-{}-{}",
        org_short_name,
        truncate(stage, STAGE_WIDTH),
        truncate(source_kind, KIND_WIDTH),
        truncate(subtype, SUBTYPE_WIDTH),
        truncate(uid_segment, UID_WIDTH),
        destination.infix(),
    );
    if let Destination::KmlUpdate { period_hours } = destination {
        name.push_str(&format!("-{}h", period_hours));
    }
    let name = name.to_lowercase();

    if name.len() > MAX_RULE_NAME_LEN {
        return Err(NamingError::TooLong {
            len: name.len(),
            name,
        });
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_identical_inputs() {
        let a = generate_rule_name(
            "acme",
            "production",
            "collar",
            "vectronic",
            "7f3b9a2c-11aa-4d00-9c1f-0c8e2d3a4b5c",
            Destination::AgolUpdate,
        )
        .unwrap();
        let b = generate_rule_name(
            "acme",
            "production",
            "collar",
            "vectronic",
            "7f3b9a2c-11aa-4d00-9c1f-0c8e2d3a4b5c",
            Destination::AgolUpdate,
        )
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(a, "acme-prod-collar-vectro-7f3b9a2c-agol-update");
    }

    #[test]
    fn components_are_truncated_and_lowercased() {
        let name = generate_rule_name(
            "acme",
            "Staging",
            "custom_source",
            "SpreadsheetFeed",
            "ABCDEF123456-rest",
            Destination::GetData,
        )
        .unwrap();
        assert_eq!(name, "acme-stag-custom-spread-abcdef12-get-data");
        assert!(name.len() <= MAX_RULE_NAME_LEN);
    }

    #[test]
    fn kml_names_carry_the_lookback_period() {
        let name = generate_rule_name(
            "acme",
            "prod",
            "radio",
            "vhf",
            "9912",
            Destination::KmlUpdate { period_hours: 168 },
        )
        .unwrap();
        assert_eq!(name, "acme-prod-radio-vhf-9912-kml-update-168h");
    }

    #[test]
    fn destination_infixes_never_collide() {
        let mk = |d| generate_rule_name("acme", "prod", "collar", "lotek", "77aa", d).unwrap();
        let names = [
            mk(Destination::AgolUpdate),
            mk(Destination::KmlUpdate { period_hours: 24 }),
            mk(Destination::GetData),
            mk(Destination::ExcelExport),
        ];
        for (i, a) in names.iter().enumerate() {
            for b in names.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn oversized_name_is_an_error_not_a_silent_truncation() {
        let long_org = "a".repeat(MAX_RULE_NAME_LEN);
        let err = generate_rule_name(
            &long_org,
            "prod",
            "collar",
            "lotek",
            "1234",
            Destination::AgolUpdate,
        )
        .unwrap_err();
        match err {
            NamingError::TooLong { len, .. } => assert!(len > MAX_RULE_NAME_LEN),
        }
    }
}
