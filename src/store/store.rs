use std::path::Path;

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info};

use crate::model::{Candidate, CreditTransaction, ProcessingJob, Tenant, WebhookFailure};

use super::error::{Result, StoreError};
use super::partitions::{
    decode_synonym_key, encode_candidate_key, encode_idem_key, encode_job_key,
    encode_session_key, encode_synonym_key, encode_tenant_key, encode_tx_key, encode_tx_prefix,
    encode_tx_seq_key, encode_usage_key, encode_webhook_failure_key,
};

/// Starter synonym set loaded into an empty `synonyms` partition so search
/// normalization works out of the box; operators extend it at runtime.
const SYNONYM_SEED: &[(&str, &str)] = &[
    ("js", "javascript"),
    ("ts", "typescript"),
    ("node", "nodejs"),
    ("node.js", "nodejs"),
    ("react.js", "react"),
    ("reactjs", "react"),
    ("py", "python"),
    ("golang", "go"),
    ("k8s", "kubernetes"),
    ("postgres", "postgresql"),
    ("ml", "machine learning"),
    ("tf", "terraform"),
];

/// Fjall-backed metadata store: tenants, jobs, candidates, the credit
/// transaction log, idempotency keys, webhook failures, and skill synonyms.
///
/// Reads that serve a tenant-scoped request go through the `*_scoped`
/// accessors, which reject rows owned by another tenant.
#[derive(Clone)]
pub struct MetadataStore {
    keyspace: Keyspace,
    tenants: PartitionHandle,
    sessions: PartitionHandle,
    jobs: PartitionHandle,
    candidates: PartitionHandle,
    credits: PartitionHandle,
    idempotency: PartitionHandle,
    webhook_failures: PartitionHandle,
    synonyms: PartitionHandle,
}

impl MetadataStore {
    /// Open or create a metadata store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening metadata store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let tenants = keyspace.open_partition("tenants", PartitionCreateOptions::default())?;
        let sessions = keyspace.open_partition("sessions", PartitionCreateOptions::default())?;
        let jobs = keyspace.open_partition("jobs", PartitionCreateOptions::default())?;
        let candidates =
            keyspace.open_partition("candidates", PartitionCreateOptions::default())?;
        let credits = keyspace.open_partition("credits", PartitionCreateOptions::default())?;
        let idempotency =
            keyspace.open_partition("idempotency", PartitionCreateOptions::default())?;
        let webhook_failures =
            keyspace.open_partition("webhook_failures", PartitionCreateOptions::default())?;
        let synonyms = keyspace.open_partition("synonyms", PartitionCreateOptions::default())?;

        let store = Self {
            keyspace,
            tenants,
            sessions,
            jobs,
            candidates,
            credits,
            idempotency,
            webhook_failures,
            synonyms,
        };
        store.seed_synonyms()?;

        info!("Metadata store opened");
        Ok(store)
    }

    fn seed_synonyms(&self) -> Result<()> {
        if self.synonyms.iter().next().is_some() {
            return Ok(());
        }
        for (variant, canonical) in SYNONYM_SEED {
            self.synonyms
                .insert(encode_synonym_key(variant), canonical.as_bytes())?;
        }
        debug!(count = SYNONYM_SEED.len(), "Seeded synonym partition");
        Ok(())
    }

    // --- tenants & sessions ---

    pub fn upsert_tenant(&self, tenant: &Tenant) -> Result<()> {
        let value = serde_json::to_vec(tenant)?;
        self.tenants.insert(encode_tenant_key(&tenant.id), value)?;
        Ok(())
    }

    pub fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        match self.tenants.get(encode_tenant_key(tenant_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn put_session(&self, token: &str, tenant_id: &str) -> Result<()> {
        self.sessions
            .insert(encode_session_key(token), tenant_id.as_bytes())?;
        Ok(())
    }

    /// Resolve a bearer token to its tenant id
    pub fn resolve_session(&self, token: &str) -> Result<Option<String>> {
        match self.sessions.get(encode_session_key(token))? {
            Some(value) => Ok(Some(String::from_utf8_lossy(&value).to_string())),
            None => Ok(None),
        }
    }

    // --- jobs ---

    pub fn upsert_job(&self, job: &ProcessingJob) -> Result<()> {
        let value = serde_json::to_vec(job)?;
        self.jobs.insert(encode_job_key(&job.id), value)?;
        debug!(job_id = %job.id, status = ?job.status, "Upserted job");
        Ok(())
    }

    /// Unscoped read, for the worker side which owns jobs across tenants
    pub fn get_job(&self, job_id: &str) -> Result<Option<ProcessingJob>> {
        match self.jobs.get(encode_job_key(job_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Tenant-guarded read for API request paths
    pub fn get_job_scoped(&self, tenant_id: &str, job_id: &str) -> Result<Option<ProcessingJob>> {
        match self.get_job(job_id)? {
            Some(job) if job.tenant_id == tenant_id => Ok(Some(job)),
            Some(_) => Err(StoreError::TenantMismatch),
            None => Ok(None),
        }
    }

    // --- candidates ---

    pub fn upsert_candidate(&self, candidate: &Candidate) -> Result<()> {
        let value = serde_json::to_vec(candidate)?;
        self.candidates
            .insert(encode_candidate_key(&candidate.id), value)?;
        debug!(candidate_id = %candidate.id, "Upserted candidate");
        Ok(())
    }

    pub fn get_candidate(&self, candidate_id: &str) -> Result<Option<Candidate>> {
        match self.candidates.get(encode_candidate_key(candidate_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn get_candidate_scoped(
        &self,
        tenant_id: &str,
        candidate_id: &str,
    ) -> Result<Option<Candidate>> {
        match self.get_candidate(candidate_id)? {
            Some(c) if c.tenant_id == tenant_id => Ok(Some(c)),
            Some(_) => Err(StoreError::TenantMismatch),
            None => Ok(None),
        }
    }

    // --- idempotency ---

    pub fn remember_idempotency(&self, tenant_id: &str, key: &str, job_id: &str) -> Result<()> {
        self.idempotency
            .insert(encode_idem_key(tenant_id, key), job_id.as_bytes())?;
        Ok(())
    }

    pub fn get_idempotent(&self, tenant_id: &str, key: &str) -> Result<Option<String>> {
        match self.idempotency.get(encode_idem_key(tenant_id, key))? {
            Some(value) => Ok(Some(String::from_utf8_lossy(&value).to_string())),
            None => Ok(None),
        }
    }

    // --- credit transaction log ---

    /// Append a transaction, assigning its sequence number and running
    /// balance. Callers must hold the tenant's credit lock; the store only
    /// guarantees key-level atomicity.
    pub fn append_transaction(&self, mut tx: CreditTransaction) -> Result<CreditTransaction> {
        let seq_key = encode_tx_seq_key(&tx.tenant_id);
        let seq = match self.credits.get(&seq_key)? {
            Some(raw) => u64::from_be_bytes(raw.as_ref().try_into().unwrap_or([0u8; 8])),
            None => 0,
        };

        tx.balance_after = self.last_balance(&tx.tenant_id)? + tx.amount;

        let value = serde_json::to_vec(&tx)?;
        self.credits.insert(encode_tx_key(&tx.tenant_id, seq), value)?;
        self.credits.insert(seq_key, (seq + 1).to_be_bytes())?;

        debug!(
            tenant = %tx.tenant_id,
            seq,
            amount = tx.amount,
            balance_after = tx.balance_after,
            "Appended credit transaction"
        );
        Ok(tx)
    }

    /// Signed sum of the tenant's transaction log (balance after the most
    /// recent write, 0 for an empty log)
    pub fn last_balance(&self, tenant_id: &str) -> Result<i64> {
        let mut balance = 0;
        for item in self.credits.prefix(encode_tx_prefix(tenant_id)) {
            let (_key, value) = item?;
            let tx: CreditTransaction = serde_json::from_slice(&value)?;
            balance = tx.balance_after;
        }
        Ok(balance)
    }

    pub fn list_transactions(&self, tenant_id: &str) -> Result<Vec<CreditTransaction>> {
        let mut out = Vec::new();
        for item in self.credits.prefix(encode_tx_prefix(tenant_id)) {
            let (_key, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    /// Record that usage was charged for a candidate. Returns `false` when a
    /// marker already existed (the charge must not be repeated).
    pub fn remember_usage(&self, candidate_id: &str, tx_id: &str) -> Result<bool> {
        let key = encode_usage_key(candidate_id);
        if self.credits.get(&key)?.is_some() {
            return Ok(false);
        }
        self.credits.insert(key, tx_id.as_bytes())?;
        Ok(true)
    }

    pub fn usage_exists(&self, candidate_id: &str) -> Result<bool> {
        Ok(self.credits.get(encode_usage_key(candidate_id))?.is_some())
    }

    // --- webhook failures ---

    pub fn record_webhook_failure(&self, failure: &WebhookFailure) -> Result<()> {
        let key = encode_webhook_failure_key(&failure.job_id, failure.status.as_str());
        let value = serde_json::to_vec(failure)?;
        self.webhook_failures.insert(key, value)?;
        Ok(())
    }

    pub fn list_webhook_failures(&self, limit: usize) -> Result<Vec<WebhookFailure>> {
        let mut out = Vec::new();
        for item in self.webhook_failures.iter().take(limit) {
            let (_key, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    pub fn delete_webhook_failure(&self, job_id: &str, phase: &str) -> Result<()> {
        self.webhook_failures
            .remove(encode_webhook_failure_key(job_id, phase))?;
        Ok(())
    }

    /// Operator purge: drop every retained failure, returning the count
    pub fn purge_webhook_failures(&self) -> Result<usize> {
        let mut keys = Vec::new();
        for item in self.webhook_failures.iter() {
            let (key, _value) = item?;
            keys.push(key);
        }
        let count = keys.len();
        for key in keys {
            self.webhook_failures.remove(key)?;
        }
        Ok(count)
    }

    // --- skill synonyms ---

    pub fn put_synonym(&self, variant: &str, canonical: &str) -> Result<()> {
        self.synonyms
            .insert(encode_synonym_key(variant), canonical.as_bytes())?;
        Ok(())
    }

    pub fn get_canonical(&self, variant: &str) -> Result<Option<String>> {
        match self.synonyms.get(encode_synonym_key(variant))? {
            Some(value) => Ok(Some(String::from_utf8_lossy(&value).to_string())),
            None => Ok(None),
        }
    }

    /// Full variant → canonical map, loaded once per analysis
    pub fn synonym_map(&self) -> Result<std::collections::BTreeMap<String, String>> {
        let mut map = std::collections::BTreeMap::new();
        for item in self.synonyms.iter() {
            let (key, value) = item?;
            if let Some(variant) = decode_synonym_key(&key) {
                map.insert(variant, String::from_utf8_lossy(&value).to_string());
            }
        }
        Ok(map)
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::FileKind;
    use crate::model::{
        AnalysisMode, Candidate, JobStatus, Plan, ProcessingJob, TransactionType,
    };
    use chrono::Utc;
    use tempfile::TempDir;

    fn create_test_store() -> (MetadataStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = MetadataStore::open(temp_dir.path().join("metadata")).unwrap();
        (store, temp_dir)
    }

    fn create_test_job(job_id: &str, tenant_id: &str) -> ProcessingJob {
        let now = Utc::now();
        ProcessingJob {
            id: job_id.to_string(),
            tenant_id: tenant_id.to_string(),
            candidate_id: format!("cand-{job_id}"),
            file_name: "resume.pdf".into(),
            file_type: FileKind::Pdf,
            file_size: 2048,
            file_path: format!("uploads/{tenant_id}/{job_id}.pdf"),
            analysis_mode: AnalysisMode::Phase1,
            status: JobStatus::Queued,
            attempt_count: 0,
            error_code: None,
            error_message: None,
            idempotency_key: None,
            retry_of: None,
            raw_text: None,
            emitted_phases: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn create_test_tx(tenant_id: &str, amount: i64) -> CreditTransaction {
        CreditTransaction {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            tx_type: TransactionType::Usage,
            amount,
            balance_after: 0,
            candidate_id: None,
            job_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_job_roundtrip() {
        let (store, _temp) = create_test_store();
        let job = create_test_job("job_1", "t1");
        store.upsert_job(&job).unwrap();

        let loaded = store.get_job("job_1").unwrap().unwrap();
        assert_eq!(loaded.candidate_id, "cand-job_1");
        assert_eq!(loaded.status, JobStatus::Queued);
        assert!(store.get_job("missing").unwrap().is_none());
    }

    #[test]
    fn test_scoped_reads_reject_cross_tenant() {
        let (store, _temp) = create_test_store();
        store.upsert_job(&create_test_job("job_1", "t1")).unwrap();

        assert!(store.get_job_scoped("t1", "job_1").unwrap().is_some());
        assert!(matches!(
            store.get_job_scoped("t2", "job_1"),
            Err(StoreError::TenantMismatch)
        ));

        let candidate = Candidate::placeholder("c1", "t1", "resume.pdf");
        store.upsert_candidate(&candidate).unwrap();
        assert!(matches!(
            store.get_candidate_scoped("t2", "c1"),
            Err(StoreError::TenantMismatch)
        ));
    }

    #[test]
    fn test_tenant_and_session() {
        let (store, _temp) = create_test_store();
        let tenant = Tenant::new("t1", "a@b.co", Plan::Starter);
        store.upsert_tenant(&tenant).unwrap();
        store.put_session("token-abc", "t1").unwrap();

        assert_eq!(store.resolve_session("token-abc").unwrap().unwrap(), "t1");
        assert!(store.resolve_session("nope").unwrap().is_none());
        assert_eq!(store.get_tenant("t1").unwrap().unwrap().base_credits, 20);
    }

    #[test]
    fn test_transaction_log_running_balance() {
        let (store, _temp) = create_test_store();

        let tx1 = store.append_transaction(create_test_tx("t1", 50)).unwrap();
        assert_eq!(tx1.balance_after, 50);

        let tx2 = store.append_transaction(create_test_tx("t1", -1)).unwrap();
        assert_eq!(tx2.balance_after, 49);

        // other tenants are unaffected
        let other = store.append_transaction(create_test_tx("t2", -1)).unwrap();
        assert_eq!(other.balance_after, -1);

        let txs = store.list_transactions("t1").unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(store.last_balance("t1").unwrap(), 49);
    }

    #[test]
    fn test_usage_marker_is_once_only() {
        let (store, _temp) = create_test_store();
        assert!(store.remember_usage("c1", "tx1").unwrap());
        assert!(!store.remember_usage("c1", "tx2").unwrap());
        assert!(store.usage_exists("c1").unwrap());
        assert!(!store.usage_exists("c2").unwrap());
    }

    #[test]
    fn test_idempotency_scoping() {
        let (store, _temp) = create_test_store();
        store.remember_idempotency("t1", "key", "job_1").unwrap();

        assert_eq!(store.get_idempotent("t1", "key").unwrap().unwrap(), "job_1");
        assert!(store.get_idempotent("t2", "key").unwrap().is_none());
    }

    #[test]
    fn test_webhook_failures_record_and_purge() {
        let (store, _temp) = create_test_store();
        let failure = WebhookFailure {
            job_id: "j1".into(),
            status: crate::model::Phase::Completed,
            payload: crate::model::WebhookPayload {
                job_id: "j1".into(),
                status: crate::model::Phase::Completed,
                phase: None,
                result: None,
                error: None,
            },
            error: "HTTP 502".into(),
            retry_count: 3,
            next_retry_at: Utc::now(),
        };
        store.record_webhook_failure(&failure).unwrap();
        assert_eq!(store.list_webhook_failures(10).unwrap().len(), 1);

        assert_eq!(store.purge_webhook_failures().unwrap(), 1);
        assert!(store.list_webhook_failures(10).unwrap().is_empty());
    }

    #[test]
    fn test_synonyms_seeded_and_extendable() {
        let (store, _temp) = create_test_store();
        assert_eq!(store.get_canonical("k8s").unwrap().unwrap(), "kubernetes");

        store.put_synonym("rustlang", "rust").unwrap();
        let map = store.synonym_map().unwrap();
        assert_eq!(map.get("rustlang").unwrap(), "rust");
        assert!(map.len() >= SYNONYM_SEED.len() + 1);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("metadata");
        {
            let store = MetadataStore::open(&path).unwrap();
            store.upsert_job(&create_test_job("job_1", "t1")).unwrap();
            store.append_transaction(create_test_tx("t1", 50)).unwrap();
            store.persist().unwrap();
        }

        let store = MetadataStore::open(&path).unwrap();
        assert!(store.get_job("job_1").unwrap().is_some());
        assert_eq!(store.last_balance("t1").unwrap(), 50);
    }
}
