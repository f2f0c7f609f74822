//! Report aggregation: fuses rule outcomes and worker evidence into the
//! per-provider verdict.
//!
//! Fusion rules:
//! - a field is aggregated only when at least one rule fired for it
//! - candidate values come from rule results and from worker-normalized
//!   fields; disagreements resolve by declared source weight, then per-field
//!   confidence, then lexicographically smaller value, and each losing
//!   source leaves a `DISAGREEMENT:<field>:<source>` flag
//! - field confidence is the weight-normalized mean over contributing
//!   sources; overall confidence is the unweighted mean over fields
//! - the verdict is `invalid` only when a critical field (identifier,
//!   license, family name) is invalid; warnings and threshold misses
//!   downgrade to `warning`

use chrono::Utc;
use std::collections::BTreeMap;

use crate::model::{
    round_confidence, FieldMap, FieldSummary, ProviderRecord, ProviderReport, ReportStatus,
    TaskKind, ValidationResult, ValidationStatus, WorkerTaskResult,
};

/// Fields whose invalidity fails the whole report.
const CRITICAL_FIELDS: [&str; 3] = ["identifier", "license_number", "family_name"];

struct Candidate {
    source: TaskKind,
    confidence: f64,
    value: String,
    from_rule: bool,
}

/// Build the provisional report returned while a provider's tasks are
/// still outstanding.
pub fn pending_report(job_id: &str, provider_id: &str) -> ProviderReport {
    ProviderReport {
        provider_id: provider_id.to_string(),
        job_id: job_id.to_string(),
        overall_confidence: 0.0,
        validation_status: ReportStatus::Pending,
        field_summaries: BTreeMap::new(),
        aggregated_fields: FieldMap::new(),
        flags: Vec::new(),
        validation_timestamp: Utc::now(),
        processing_time: 0.0,
    }
}

/// Fuse all evidence for one provider into its final report.
pub fn aggregate(
    job_id: &str,
    record: &ProviderRecord,
    worker_results: &[WorkerTaskResult],
    rule_results: &[ValidationResult],
    confidence_threshold: f64,
    processing_time: f64,
) -> ProviderReport {
    let mut flags = Vec::new();

    // Rule results grouped by field drive which fields get aggregated.
    let mut by_field: BTreeMap<&str, Vec<&ValidationResult>> = BTreeMap::new();
    for result in rule_results {
        by_field.entry(&result.field_name).or_default().push(result);
    }

    let mut field_summaries = BTreeMap::new();
    let mut aggregated_fields = FieldMap::new();

    for (field, results) in &by_field {
        let candidates = collect_candidates(field, results, worker_results);
        let (summary, agreed_value, disagreements) = fuse_field(field, results, candidates);

        for source in disagreements {
            flags.push(format!("DISAGREEMENT:{}:{}", field, source.source()));
        }
        aggregated_fields.insert((*field).to_string(), agreed_value);
        field_summaries.insert((*field).to_string(), summary);
    }

    let overall_confidence = overall_confidence(&field_summaries);
    let validation_status = verdict(&field_summaries, overall_confidence, confidence_threshold);

    rule_flags(rule_results, &mut flags);
    evidence_flags(record, worker_results, &mut flags);

    flags.sort();
    flags.dedup();

    ProviderReport {
        provider_id: record.provider_id.clone(),
        job_id: job_id.to_string(),
        overall_confidence: round_confidence(overall_confidence),
        validation_status,
        field_summaries,
        aggregated_fields,
        flags,
        validation_timestamp: Utc::now(),
        processing_time,
    }
}

fn collect_candidates(
    field: &str,
    rule_results: &[&ValidationResult],
    worker_results: &[WorkerTaskResult],
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = rule_results
        .iter()
        .map(|r| Candidate {
            source: r.source,
            confidence: r.confidence,
            value: r.value.clone(),
            from_rule: true,
        })
        .collect();

    for result in worker_results.iter().filter(|r| r.success) {
        if let Some(value) = result.normalized_fields.get(field) {
            // A rule outcome supersedes raw evidence from the same source.
            if candidates
                .iter()
                .any(|c| c.from_rule && c.source == result.kind)
            {
                continue;
            }
            let confidence = result
                .field_confidence
                .get(field)
                .copied()
                .unwrap_or(result.overall_confidence);
            candidates.push(Candidate {
                source: result.kind,
                confidence,
                value: value.clone(),
                from_rule: false,
            });
        }
    }

    candidates
}

/// Tie-break candidates and compute the field summary. Returns the summary,
/// the agreed value, and the sources that lost a value disagreement.
fn fuse_field(
    field: &str,
    rule_results: &[&ValidationResult],
    mut candidates: Vec<Candidate>,
) -> (FieldSummary, String, Vec<TaskKind>) {
    candidates.sort_by(|a, b| {
        b.source
            .weight()
            .total_cmp(&a.source.weight())
            .then(b.confidence.total_cmp(&a.confidence))
            .then(a.value.cmp(&b.value))
    });

    let agreed_value = candidates
        .first()
        .map(|c| c.value.clone())
        .unwrap_or_default();

    let disagreements: Vec<TaskKind> = candidates
        .iter()
        .skip(1)
        .filter(|c| c.value != agreed_value)
        .map(|c| c.source)
        .collect();

    // Weight-normalized mean over contributing sources.
    let mut weight_sum = 0.0;
    let mut weighted = 0.0;
    let mut contributing_sources = Vec::new();
    for candidate in &candidates {
        if contributing_sources.contains(&candidate.source) {
            continue;
        }
        contributing_sources.push(candidate.source);
        weight_sum += candidate.source.weight();
        weighted += candidate.source.weight() * candidate.confidence;
    }
    let confidence = if weight_sum > 0.0 {
        weighted / weight_sum
    } else {
        0.0
    };

    let status = field_status(rule_results);

    (
        FieldSummary {
            field_name: field.to_string(),
            agreed_value: agreed_value.clone(),
            confidence,
            status,
            contributing_sources,
            validation_count: rule_results.len(),
        },
        agreed_value,
        disagreements,
    )
}

/// Field state machine: invalid dominates, then warning, then valid.
fn field_status(rule_results: &[&ValidationResult]) -> ValidationStatus {
    let mut status = ValidationStatus::Unknown;
    for result in rule_results {
        status = match (status, result.status) {
            (_, ValidationStatus::Invalid) | (ValidationStatus::Invalid, _) => {
                ValidationStatus::Invalid
            }
            (_, ValidationStatus::Warning) | (ValidationStatus::Warning, _) => {
                ValidationStatus::Warning
            }
            (_, ValidationStatus::Valid) | (ValidationStatus::Valid, _) => ValidationStatus::Valid,
            _ => ValidationStatus::Unknown,
        };
    }
    status
}

/// Unweighted mean over fields present.
fn overall_confidence(field_summaries: &BTreeMap<String, FieldSummary>) -> f64 {
    if field_summaries.is_empty() {
        return 0.0;
    }
    let sum: f64 = field_summaries.values().map(|s| s.confidence).sum();
    sum / field_summaries.len() as f64
}

fn verdict(
    field_summaries: &BTreeMap<String, FieldSummary>,
    overall_confidence: f64,
    threshold: f64,
) -> ReportStatus {
    let critical_invalid = CRITICAL_FIELDS.iter().any(|field| {
        field_summaries
            .get(*field)
            .is_some_and(|s| s.status == ValidationStatus::Invalid)
    });
    if critical_invalid {
        return ReportStatus::Invalid;
    }

    let any_warning = field_summaries
        .values()
        .any(|s| s.status == ValidationStatus::Warning);
    // The threshold is a closed lower bound: exactly at it is valid.
    if any_warning || overall_confidence < threshold {
        return ReportStatus::Warning;
    }

    ReportStatus::Valid
}

fn rule_flags(rule_results: &[ValidationResult], flags: &mut Vec<String>) {
    for result in rule_results {
        match (result.field_name.as_str(), result.status) {
            ("phone_primary", ValidationStatus::Invalid) => {
                flags.push("PHONE_INVALID".to_string());
            }
            ("email", ValidationStatus::Warning) => {
                flags.push("EMAIL_NO_MX".to_string());
            }
            ("email", ValidationStatus::Invalid) => {
                flags.push("EMAIL_INVALID".to_string());
            }
            ("address_street", ValidationStatus::Warning) => {
                flags.push("ADDRESS_LOW_ACCURACY".to_string());
            }
            ("identifier", ValidationStatus::Invalid) => {
                flags.push("IDENTIFIER_INVALID".to_string());
            }
            ("given_name" | "family_name", ValidationStatus::Invalid) => {
                flags.push("NAME_MISMATCH".to_string());
            }
            ("license_number", ValidationStatus::Invalid) => {
                match result.details["license_status"].as_str() {
                    Some("suspended") => flags.push("LICENSE_SUSPENDED".to_string()),
                    Some("revoked") => flags.push("LICENSE_REVOKED".to_string()),
                    Some("expired") => flags.push("LICENSE_EXPIRED".to_string()),
                    _ => flags.push("NAME_MISMATCH".to_string()),
                }
            }
            _ => {}
        }
    }
}

fn evidence_flags(
    record: &ProviderRecord,
    worker_results: &[WorkerTaskResult],
    flags: &mut Vec<String>,
) {
    if record.identifier.is_none() {
        flags.push("MISSING_IDENTIFIER".to_string());
    }

    let mut failed = 0usize;
    for result in worker_results.iter().filter(|r| !r.success) {
        failed += 1;
        let robot = result
            .source_metadata
            .as_ref()
            .and_then(|m| m.get("robot_detected"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if robot {
            flags.push(format!("ROBOT_DETECTED:{}", result.kind.source()));
        }
    }
    if failed > 0 {
        flags.push(format!("FAILED_VALIDATIONS:{}", failed));
    }
}
