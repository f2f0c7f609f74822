/// Key layout and encoding utilities for Fjall partitions
///
/// Partition structure:
/// - `jobs`: job:{job_id} -> Job (JSON)
/// - `manifests`: manifest:{job_id} -> Vec<ProviderManifestEntry> (JSON)
/// - `task_results`: result:{job_id}:{provider_id}:{kind} -> WorkerTaskResult (JSON)
/// - `provider_reports`: report:{job_id}:{provider_id} -> ProviderReport (JSON)
/// - `idempotency`: idem:{key} -> IdempotencyRecord (JSON)
use crate::model::TaskKind;

/// Encode a job key: job:{job_id}
pub fn encode_job_key(job_id: &str) -> Vec<u8> {
    format!("job:{}", job_id).into_bytes()
}

/// Encode a provider manifest key: manifest:{job_id}
pub fn encode_manifest_key(job_id: &str) -> Vec<u8> {
    format!("manifest:{}", job_id).into_bytes()
}

/// Encode a task result key: result:{job_id}:{provider_id}:{kind}
pub fn encode_result_key(job_id: &str, provider_id: &str, kind: TaskKind) -> Vec<u8> {
    format!("result:{}:{}:{}", job_id, provider_id, kind).into_bytes()
}

/// Encode a task result prefix for one provider: result:{job_id}:{provider_id}:
pub fn encode_result_prefix(job_id: &str, provider_id: &str) -> Vec<u8> {
    format!("result:{}:{}:", job_id, provider_id).into_bytes()
}

/// Encode a report key: report:{job_id}:{provider_id}
pub fn encode_report_key(job_id: &str, provider_id: &str) -> Vec<u8> {
    format!("report:{}:{}", job_id, provider_id).into_bytes()
}

/// Encode a report prefix for one job: report:{job_id}:
pub fn encode_report_prefix(job_id: &str) -> Vec<u8> {
    format!("report:{}:", job_id).into_bytes()
}

/// Encode an idempotency key: idem:{key}
pub fn encode_idem_key(key: &str) -> Vec<u8> {
    format!("idem:{}", key).into_bytes()
}
