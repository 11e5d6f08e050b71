/// Key layout and encoding utilities for the metadata partitions
///
/// Partition structure:
/// - `tenants`: tenant:{tenant_id} -> Tenant (JSON)
/// - `sessions`: sess:{token} -> tenant_id (string)
/// - `jobs`: job:{job_id} -> ProcessingJob (JSON)
/// - `candidates`: cand:{candidate_id} -> Candidate (JSON)
/// - `credits`: tx:{tenant_id}:{seq:016} -> CreditTransaction (JSON)
///              usage:{candidate_id} -> transaction id (string)
///              txseq:{tenant_id} -> u64 (big-endian)
/// - `idempotency`: idem:{tenant_id}:{key} -> job_id (string)
/// - `webhook_failures`: whf:{job_id}:{phase} -> WebhookFailure (JSON)
/// - `synonyms`: syn:{variant} -> canonical (string)

pub fn encode_tenant_key(tenant_id: &str) -> Vec<u8> {
    format!("tenant:{}", tenant_id).into_bytes()
}

pub fn encode_session_key(token: &str) -> Vec<u8> {
    format!("sess:{}", token).into_bytes()
}

pub fn encode_job_key(job_id: &str) -> Vec<u8> {
    format!("job:{}", job_id).into_bytes()
}

pub fn encode_candidate_key(candidate_id: &str) -> Vec<u8> {
    format!("cand:{}", candidate_id).into_bytes()
}

/// tx:{tenant_id}:{seq:016} — zero-padded so a prefix scan yields
/// transactions in append order
pub fn encode_tx_key(tenant_id: &str, seq: u64) -> Vec<u8> {
    format!("tx:{}:{:016}", tenant_id, seq).into_bytes()
}

pub fn encode_tx_prefix(tenant_id: &str) -> Vec<u8> {
    format!("tx:{}:", tenant_id).into_bytes()
}

pub fn encode_tx_seq_key(tenant_id: &str) -> Vec<u8> {
    format!("txseq:{}", tenant_id).into_bytes()
}

pub fn encode_usage_key(candidate_id: &str) -> Vec<u8> {
    format!("usage:{}", candidate_id).into_bytes()
}

pub fn encode_idem_key(tenant_id: &str, key: &str) -> Vec<u8> {
    format!("idem:{}:{}", tenant_id, key).into_bytes()
}

pub fn encode_webhook_failure_key(job_id: &str, phase: &str) -> Vec<u8> {
    format!("whf:{}:{}", job_id, phase).into_bytes()
}

pub fn encode_synonym_key(variant: &str) -> Vec<u8> {
    format!("syn:{}", variant).into_bytes()
}

pub fn decode_synonym_key(key: &[u8]) -> Option<String> {
    let key_str = std::str::from_utf8(key).ok()?;
    key_str.strip_prefix("syn:").map(String::from)
}
