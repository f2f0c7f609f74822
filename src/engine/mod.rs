//! Validation rules engine.
//!
//! Runs once per provider, strictly after all of that provider's tasks are
//! terminal. Input is the original submission plus the authoritative
//! evidence per source; output is one [`ValidationResult`] per fired rule.
//!
//! Rules live in a registry ordered by field. A rule fires only when its
//! required source evidence is present (local format rules need none), and
//! at most one rule fires per (field, rule type). Field state moves
//! `unknown -> {valid|warning|invalid}` and the engine never reopens a
//! decided field.

mod email;
mod identifier;
mod name;
mod phone;

pub use email::{MxResolver, PermissiveMxResolver, StaticMxResolver};

use chrono::Utc;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::model::{ProviderRecord, TaskKind, ValidationResult, ValidationStatus, WorkerTaskResult};

/// Name-similarity threshold shared by the license and fuzzy-name rules.
pub const NAME_MATCH_THRESHOLD: f64 = 0.85;

const PHONE_PASS_CONFIDENCE: f64 = 0.90;
const EMAIL_PASS_CONFIDENCE: f64 = 0.90;
const EMAIL_NO_MX_CONFIDENCE: f64 = 0.40;
const LICENSE_PASS_CONFIDENCE: f64 = 0.95;
const IDENTIFIER_PASS_CONFIDENCE: f64 = 0.95;
const ADDRESS_ROOFTOP_CONFIDENCE: f64 = 0.95;
const ADDRESS_INTERPOLATED_CONFIDENCE: f64 = 0.85;
const ADDRESS_APPROXIMATE_CONFIDENCE: f64 = 0.60;
/// Below this similarity the returned address is treated as a different
/// place, not a formatting variant.
const ADDRESS_MATCH_FLOOR: f64 = 0.40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RuleKind {
    CheckDigit,
    FuzzyNameMatch,
    E164Normalization,
    PlaceMatching,
    StateBoardVerification,
    MxRecordCheck,
}

struct Rule {
    field: &'static str,
    kind: RuleKind,
    source: TaskKind,
}

fn default_rules() -> Vec<Rule> {
    vec![
        Rule {
            field: "identifier",
            kind: RuleKind::CheckDigit,
            source: TaskKind::IdentifierCheck,
        },
        Rule {
            field: "given_name",
            kind: RuleKind::FuzzyNameMatch,
            source: TaskKind::IdentifierCheck,
        },
        Rule {
            field: "family_name",
            kind: RuleKind::FuzzyNameMatch,
            source: TaskKind::IdentifierCheck,
        },
        Rule {
            field: "phone_primary",
            kind: RuleKind::E164Normalization,
            source: TaskKind::IdentifierCheck,
        },
        Rule {
            field: "address_street",
            kind: RuleKind::PlaceMatching,
            source: TaskKind::AddressValidation,
        },
        Rule {
            field: "license_number",
            kind: RuleKind::StateBoardVerification,
            source: TaskKind::LicenseVerification,
        },
        Rule {
            field: "email",
            kind: RuleKind::MxRecordCheck,
            source: TaskKind::EnrichmentLookup,
        },
    ]
}

/// Authoritative evidence per source for one provider.
struct Evidence<'a> {
    by_kind: BTreeMap<TaskKind, &'a WorkerTaskResult>,
}

impl<'a> Evidence<'a> {
    fn new(results: &'a [WorkerTaskResult]) -> Self {
        let mut by_kind = BTreeMap::new();
        for result in results {
            by_kind.insert(result.kind, result);
        }
        Self { by_kind }
    }

    fn successful(&self, kind: TaskKind) -> Option<&'a WorkerTaskResult> {
        self.by_kind.get(&kind).copied().filter(|r| r.success)
    }

    fn metadata_str(&self, kind: TaskKind, key: &str) -> Option<String> {
        self.successful(kind)?
            .source_metadata
            .as_ref()?
            .get(key)?
            .as_str()
            .map(str::to_string)
    }

    fn metadata_bool(&self, kind: TaskKind, key: &str) -> Option<bool> {
        self.successful(kind)?
            .source_metadata
            .as_ref()?
            .get(key)?
            .as_bool()
    }
}

pub struct RulesEngine {
    rules: Vec<Rule>,
    mx_resolver: Arc<dyn MxResolver>,
}

impl RulesEngine {
    pub fn new(mx_resolver: Arc<dyn MxResolver>) -> Self {
        Self {
            rules: default_rules(),
            mx_resolver,
        }
    }

    /// Evaluate every applicable rule for one provider.
    pub async fn evaluate(
        &self,
        record: &ProviderRecord,
        results: &[WorkerTaskResult],
    ) -> Vec<ValidationResult> {
        let evidence = Evidence::new(results);
        let mut fired: HashSet<(&'static str, RuleKind)> = HashSet::new();
        let mut outcomes = Vec::new();

        for rule in &self.rules {
            if !fired.insert((rule.field, rule.kind)) {
                continue;
            }
            let outcome = match rule.kind {
                RuleKind::CheckDigit => self.check_identifier(record, &evidence),
                RuleKind::FuzzyNameMatch => self.check_name(rule.field, record, &evidence),
                RuleKind::E164Normalization => self.check_phone(rule, record),
                RuleKind::PlaceMatching => self.check_address(record, &evidence),
                RuleKind::StateBoardVerification => self.check_license(record, &evidence),
                RuleKind::MxRecordCheck => self.check_email(rule, record).await,
            };
            if let Some(result) = outcome {
                debug!(
                    provider_id = %record.provider_id,
                    field = %result.field_name,
                    status = ?result.status,
                    confidence = result.confidence,
                    "Rule fired"
                );
                outcomes.push(result);
            }
        }

        outcomes
    }

    fn check_identifier(
        &self,
        record: &ProviderRecord,
        evidence: &Evidence<'_>,
    ) -> Option<ValidationResult> {
        let submitted = record.identifier.as_deref()?;
        let source = evidence.successful(TaskKind::IdentifierCheck)?;

        let record_found = evidence
            .metadata_bool(TaskKind::IdentifierCheck, "record_found")
            .unwrap_or(!source.normalized_fields.is_empty());
        let check_digit_valid = identifier::is_valid(submitted);
        let passed = record_found && check_digit_valid;

        Some(result(
            "identifier",
            submitted,
            if passed {
                ValidationStatus::Valid
            } else {
                ValidationStatus::Invalid
            },
            if passed { IDENTIFIER_PASS_CONFIDENCE } else { 0.0 },
            TaskKind::IdentifierCheck,
            passed,
            json!({
                "record_found": record_found,
                "check_digit_valid": check_digit_valid,
            }),
        ))
    }

    fn check_name(
        &self,
        field: &'static str,
        record: &ProviderRecord,
        evidence: &Evidence<'_>,
    ) -> Option<ValidationResult> {
        let submitted = match field {
            "given_name" => record.given_name.as_deref()?,
            _ => record.family_name.as_deref()?,
        };
        let source = evidence.successful(TaskKind::IdentifierCheck)?;
        let registry_value = source.normalized_fields.get(field)?;

        let ratio = name::similarity(submitted, registry_value);
        let passed = ratio >= NAME_MATCH_THRESHOLD;

        Some(result(
            field,
            submitted,
            if passed {
                ValidationStatus::Valid
            } else {
                ValidationStatus::Invalid
            },
            ratio,
            TaskKind::IdentifierCheck,
            passed,
            json!({
                "similarity_ratio": ratio,
                "registry_value": registry_value,
            }),
        ))
    }

    fn check_phone(&self, rule: &Rule, record: &ProviderRecord) -> Option<ValidationResult> {
        let raw = record.phone_primary.as_deref()?;

        match phone::normalize(raw) {
            Some(e164) => Some(result(
                rule.field,
                &e164,
                ValidationStatus::Valid,
                PHONE_PASS_CONFIDENCE,
                rule.source,
                true,
                json!({ "e164_format": e164 }),
            )),
            None => Some(result(
                rule.field,
                raw,
                ValidationStatus::Invalid,
                0.0,
                rule.source,
                false,
                json!({ "parse_error": true }),
            )),
        }
    }

    fn check_address(
        &self,
        record: &ProviderRecord,
        evidence: &Evidence<'_>,
    ) -> Option<ValidationResult> {
        let submitted = record.address_street.as_deref()?;
        let source = evidence.successful(TaskKind::AddressValidation)?;

        let place_id = evidence.metadata_str(TaskKind::AddressValidation, "place_id");
        let tier = evidence
            .metadata_str(TaskKind::AddressValidation, "geometry_accuracy")
            .unwrap_or_else(|| "none".to_string());

        let returned = source
            .normalized_fields
            .get("address_street")
            .map(String::as_str)
            .unwrap_or(submitted);

        if place_id.is_none() {
            return Some(result(
                "address_street",
                submitted,
                ValidationStatus::Invalid,
                0.0,
                TaskKind::AddressValidation,
                false,
                json!({ "place_id": serde_json::Value::Null, "geometry_accuracy": tier }),
            ));
        }

        // A returned address far from the submitted one is a different
        // place, whatever the accuracy tier claims.
        let match_ratio = name::similarity(submitted, returned);
        if match_ratio < ADDRESS_MATCH_FLOOR {
            return Some(result(
                "address_street",
                returned,
                ValidationStatus::Invalid,
                0.0,
                TaskKind::AddressValidation,
                false,
                json!({
                    "place_id": place_id,
                    "geometry_accuracy": tier,
                    "component_match": match_ratio,
                }),
            ));
        }

        let (status, confidence, passed) = match tier.as_str() {
            "rooftop" => (ValidationStatus::Valid, ADDRESS_ROOFTOP_CONFIDENCE, true),
            "range_interpolated" => (
                ValidationStatus::Valid,
                ADDRESS_INTERPOLATED_CONFIDENCE,
                true,
            ),
            "approximate" => (
                ValidationStatus::Warning,
                ADDRESS_APPROXIMATE_CONFIDENCE,
                false,
            ),
            _ => (ValidationStatus::Invalid, 0.0, false),
        };

        Some(result(
            "address_street",
            returned,
            status,
            confidence,
            TaskKind::AddressValidation,
            passed,
            json!({
                "place_id": place_id,
                "geometry_accuracy": tier,
                "component_match": match_ratio,
            }),
        ))
    }

    fn check_license(
        &self,
        record: &ProviderRecord,
        evidence: &Evidence<'_>,
    ) -> Option<ValidationResult> {
        let submitted = record.license_number.as_deref()?;
        record.license_state.as_deref()?;

        if evidence.successful(TaskKind::LicenseVerification).is_none() {
            // Board evidence never arrived; the field stays undecided.
            return Some(result(
                "license_number",
                submitted,
                ValidationStatus::Unknown,
                0.0,
                TaskKind::LicenseVerification,
                false,
                json!({ "license_status": serde_json::Value::Null }),
            ));
        }

        let status = evidence
            .metadata_str(TaskKind::LicenseVerification, "license_status")
            .unwrap_or_else(|| "unknown".to_string());

        if status != "active" {
            return Some(result(
                "license_number",
                submitted,
                match status.as_str() {
                    "suspended" | "revoked" | "expired" => ValidationStatus::Invalid,
                    _ => ValidationStatus::Unknown,
                },
                0.0,
                TaskKind::LicenseVerification,
                false,
                json!({ "license_status": status }),
            ));
        }

        // Active license still requires the name on record to agree; the
        // check is skipped when either side has no name to compare.
        let board_name = evidence.metadata_str(TaskKind::LicenseVerification, "provider_name");
        let submitted_name = [
            record.given_name.as_deref().unwrap_or(""),
            record.family_name.as_deref().unwrap_or(""),
        ]
        .join(" ")
        .trim()
        .to_string();

        let name_similarity = match board_name.as_deref() {
            Some(on_record) if !submitted_name.is_empty() => {
                Some(name::similarity(&submitted_name, on_record))
            }
            _ => None,
        };

        let name_agrees = name_similarity.is_none_or(|ratio| ratio >= NAME_MATCH_THRESHOLD);

        if name_agrees {
            Some(result(
                "license_number",
                submitted,
                ValidationStatus::Valid,
                LICENSE_PASS_CONFIDENCE,
                TaskKind::LicenseVerification,
                true,
                json!({
                    "license_status": status,
                    "name_similarity": name_similarity,
                }),
            ))
        } else {
            Some(result(
                "license_number",
                submitted,
                ValidationStatus::Invalid,
                0.0,
                TaskKind::LicenseVerification,
                false,
                json!({
                    "license_status": status,
                    "name_similarity": name_similarity,
                    "name_mismatch": true,
                }),
            ))
        }
    }

    async fn check_email(&self, rule: &Rule, record: &ProviderRecord) -> Option<ValidationResult> {
        let raw = record.email.as_deref()?;

        if !email::is_well_formed(raw) {
            return Some(result(
                rule.field,
                raw,
                ValidationStatus::Invalid,
                0.0,
                rule.source,
                false,
                json!({ "invalid_format": true }),
            ));
        }

        let domain = email::domain_of(raw).unwrap_or_default();
        let mx_exists = self.mx_resolver.has_mx(domain).await;

        if mx_exists {
            Some(result(
                rule.field,
                raw,
                ValidationStatus::Valid,
                EMAIL_PASS_CONFIDENCE,
                rule.source,
                true,
                json!({ "mx_record_exists": true, "domain": domain }),
            ))
        } else {
            Some(result(
                rule.field,
                raw,
                ValidationStatus::Warning,
                EMAIL_NO_MX_CONFIDENCE,
                rule.source,
                false,
                json!({ "mx_record_exists": false, "domain": domain }),
            ))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn result(
    field: &str,
    value: &str,
    status: ValidationStatus,
    confidence: f64,
    source: TaskKind,
    criteria_met: bool,
    details: serde_json::Value,
) -> ValidationResult {
    ValidationResult {
        field_name: field.to_string(),
        value: value.to_string(),
        status,
        confidence,
        source,
        criteria_met,
        details,
        timestamp: Utc::now(),
    }
}
