use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Message not found: seq={0}")]
    MessageNotFound(u64),

    #[error("Stale receipt for seq={0}")]
    StaleReceipt(u64),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// The queue envelope. Carries only identifiers — never file content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobMessage {
    pub job_id: String,
    pub tenant_id: String,
    pub enqueued_at_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingRecord {
    message: JobMessage,
    delivery_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InflightRecord {
    message: JobMessage,
    delivery_count: u32,
    receipt: String,
    deadline_ms: u64,
}

/// A message handed to a worker. The receipt must accompany every
/// heartbeat/ack/nack; a redelivery invalidates older receipts.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub seq: u64,
    pub receipt: String,
    pub message: JobMessage,
    pub delivery_count: u32,
}

/// Message that exceeded its delivery budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterJob {
    pub message: JobMessage,
    pub failure_code: String,
    pub failure_message: String,
    pub attempts: u32,
    pub failed_at_ms: u64,
}

/// Durable FIFO over fjall with per-message visibility leases.
///
/// Partitions:
/// - `pending`: u64 (big-endian) → PendingRecord (JSON)
/// - `inflight`: u64 (big-endian) → InflightRecord (JSON)
/// - `dlq`: u64 (big-endian) → DeadLetterJob (JSON)
/// - `meta`: "next_seq" → u64 counter
///
/// Lifecycle: enqueue → pending; receive moves pending → inflight with a
/// visibility deadline and bumps the delivery count; ack deletes; nack (or
/// deadline expiry, via `sweep_expired`) returns the record to pending.
/// A record whose delivery count exceeds `max_attempts` routes to `dlq`
/// instead of being redelivered.
pub struct JobQueue {
    keyspace: Keyspace,
    pending: PartitionHandle,
    inflight: PartitionHandle,
    dlq: PartitionHandle,
    meta: PartitionHandle,
    seq_counter: Arc<AtomicU64>,
    visibility_ms: u64,
    max_attempts: u32,
}

impl JobQueue {
    pub fn open<P: AsRef<Path>>(
        path: P,
        visibility: std::time::Duration,
        max_attempts: u32,
    ) -> Result<Self> {
        info!("Opening job queue at: {}", path.as_ref().display());

        let keyspace = Config::new(path).open()?;

        let pending = keyspace.open_partition("pending", PartitionCreateOptions::default())?;
        let inflight = keyspace.open_partition("inflight", PartitionCreateOptions::default())?;
        let dlq = keyspace.open_partition("dlq", PartitionCreateOptions::default())?;
        let meta = keyspace.open_partition("meta", PartitionCreateOptions::default())?;

        let current_seq = meta
            .get(b"next_seq")?
            .map(|bytes| u64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])))
            .unwrap_or(0);

        info!(current_seq, "Job queue opened");

        Ok(Self {
            keyspace,
            pending,
            inflight,
            dlq,
            meta,
            seq_counter: Arc::new(AtomicU64::new(current_seq)),
            visibility_ms: visibility.as_millis() as u64,
            max_attempts,
        })
    }

    /// Enqueue a message and return its sequence number
    pub fn enqueue(&self, message: &JobMessage) -> Result<u64> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);

        let record = PendingRecord {
            message: message.clone(),
            delivery_count: 0,
        };
        self.pending
            .insert(seq.to_be_bytes(), serde_json::to_vec(&record)?)?;
        self.meta.insert(b"next_seq", (seq + 1).to_be_bytes())?;

        debug!(seq, job_id = %message.job_id, "Message enqueued");
        Ok(seq)
    }

    /// Move up to `limit` pending messages into the inflight set.
    ///
    /// Returns the deliveries plus any records that exceeded the delivery
    /// budget and were dead-lettered instead.
    pub fn receive_ready(&self, limit: usize) -> Result<(Vec<Delivery>, Vec<DeadLetterJob>)> {
        let mut deliveries = Vec::new();
        let mut dead = Vec::new();

        let mut batch = Vec::new();
        for item in self.pending.iter().take(limit) {
            let (key, value) = item?;
            let seq = u64::from_be_bytes(key.as_ref().try_into().unwrap_or([0u8; 8]));
            let record: PendingRecord = serde_json::from_slice(&value)?;
            batch.push((seq, record));
        }

        for (seq, record) in batch {
            self.pending.remove(seq.to_be_bytes())?;
            let delivery_count = record.delivery_count + 1;

            if delivery_count > self.max_attempts {
                let entry = self.dead_letter(seq, record.message, delivery_count, "DLQ")?;
                dead.push(entry);
                continue;
            }

            let receipt = uuid::Uuid::new_v4().to_string();
            let inflight = InflightRecord {
                message: record.message.clone(),
                delivery_count,
                receipt: receipt.clone(),
                deadline_ms: now_ms() + self.visibility_ms,
            };
            self.inflight
                .insert(seq.to_be_bytes(), serde_json::to_vec(&inflight)?)?;

            deliveries.push(Delivery {
                seq,
                receipt,
                message: record.message,
                delivery_count,
            });
        }

        Ok((deliveries, dead))
    }

    /// Extend the visibility lease for an inflight message
    pub fn heartbeat(&self, seq: u64, receipt: &str) -> Result<()> {
        let mut record = self.load_inflight(seq)?;
        if record.receipt != receipt {
            return Err(QueueError::StaleReceipt(seq));
        }
        record.deadline_ms = now_ms() + self.visibility_ms;
        self.inflight
            .insert(seq.to_be_bytes(), serde_json::to_vec(&record)?)?;
        Ok(())
    }

    /// Remove a completed message
    pub fn ack(&self, seq: u64, receipt: &str) -> Result<()> {
        let record = self.load_inflight(seq)?;
        if record.receipt != receipt {
            return Err(QueueError::StaleReceipt(seq));
        }
        self.inflight.remove(seq.to_be_bytes())?;
        debug!(seq, "Message acked");
        Ok(())
    }

    /// Return a message to the pending set (or dead-letter it when the
    /// delivery budget is exhausted)
    pub fn nack(&self, seq: u64, receipt: &str, reason: &str) -> Result<Option<DeadLetterJob>> {
        let record = self.load_inflight(seq)?;
        if record.receipt != receipt {
            return Err(QueueError::StaleReceipt(seq));
        }
        self.inflight.remove(seq.to_be_bytes())?;

        if record.delivery_count >= self.max_attempts {
            let entry =
                self.dead_letter(seq, record.message, record.delivery_count, reason)?;
            return Ok(Some(entry));
        }

        let pending = PendingRecord {
            message: record.message,
            delivery_count: record.delivery_count,
        };
        self.pending
            .insert(seq.to_be_bytes(), serde_json::to_vec(&pending)?)?;
        debug!(seq, reason, "Message nacked back to pending");
        Ok(None)
    }

    /// Return every inflight message whose visibility lease has lapsed to
    /// the pending set. Called periodically by the broker's sweeper.
    pub fn sweep_expired(&self) -> Result<usize> {
        let now = now_ms();
        let mut expired = Vec::new();

        for item in self.inflight.iter() {
            let (key, value) = item?;
            let seq = u64::from_be_bytes(key.as_ref().try_into().unwrap_or([0u8; 8]));
            let record: InflightRecord = serde_json::from_slice(&value)?;
            if record.deadline_ms <= now {
                expired.push((seq, record));
            }
        }

        let count = expired.len();
        for (seq, record) in expired {
            warn!(seq, job_id = %record.message.job_id, "Visibility lease expired, returning message");
            self.inflight.remove(seq.to_be_bytes())?;
            let pending = PendingRecord {
                message: record.message,
                delivery_count: record.delivery_count,
            };
            self.pending
                .insert(seq.to_be_bytes(), serde_json::to_vec(&pending)?)?;
        }

        Ok(count)
    }

    fn dead_letter(
        &self,
        seq: u64,
        message: JobMessage,
        attempts: u32,
        reason: &str,
    ) -> Result<DeadLetterJob> {
        let entry = DeadLetterJob {
            message,
            failure_code: "DLQ".to_string(),
            failure_message: reason.to_string(),
            attempts,
            failed_at_ms: now_ms(),
        };
        self.dlq
            .insert(seq.to_be_bytes(), serde_json::to_vec(&entry)?)?;
        warn!(seq, attempts, job_id = %entry.message.job_id, "Message dead-lettered");
        Ok(entry)
    }

    fn load_inflight(&self, seq: u64) -> Result<InflightRecord> {
        let bytes = self
            .inflight
            .get(seq.to_be_bytes())?
            .ok_or(QueueError::MessageNotFound(seq))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// List dead-lettered messages (for inspection/replay tooling)
    pub fn list_dlq(&self, limit: usize) -> Result<Vec<(u64, DeadLetterJob)>> {
        let mut results = Vec::new();
        for item in self.dlq.iter().take(limit) {
            let (key, value) = item?;
            let seq = u64::from_be_bytes(key.as_ref().try_into().unwrap_or([0u8; 8]));
            results.push((seq, serde_json::from_slice(&value)?));
        }
        Ok(results)
    }

    pub fn pending_len(&self) -> Result<usize> {
        let mut n = 0;
        for item in self.pending.iter() {
            item?;
            n += 1;
        }
        Ok(n)
    }

    pub fn current_seq(&self) -> u64 {
        self.seq_counter.load(Ordering::SeqCst)
    }

    pub fn flush(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Health check - verify the keyspace is readable
    pub fn health_check(&self) -> Result<()> {
        let _ = self.meta.get(b"next_seq")?;
        Ok(())
    }
}

pub(crate) fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_message(job_id: &str) -> JobMessage {
        JobMessage {
            job_id: job_id.to_string(),
            tenant_id: "t1".to_string(),
            enqueued_at_ms: now_ms(),
        }
    }

    fn open_queue(dir: &TempDir, visibility: Duration) -> JobQueue {
        JobQueue::open(dir.path().join("queue"), visibility, 3).unwrap()
    }

    #[test]
    fn test_enqueue_receive_ack() {
        let temp = TempDir::new().unwrap();
        let queue = open_queue(&temp, Duration::from_secs(60));

        let seq = queue.enqueue(&create_message("job1")).unwrap();
        assert_eq!(seq, 0);

        let (deliveries, dead) = queue.receive_ready(10).unwrap();
        assert!(dead.is_empty());
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].message.job_id, "job1");
        assert_eq!(deliveries[0].delivery_count, 1);

        queue.ack(seq, &deliveries[0].receipt).unwrap();
        assert_eq!(queue.pending_len().unwrap(), 0);
        let (again, _) = queue.receive_ready(10).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_stale_receipt_is_rejected() {
        let temp = TempDir::new().unwrap();
        let queue = open_queue(&temp, Duration::from_millis(0));

        let seq = queue.enqueue(&create_message("job1")).unwrap();
        let (deliveries, _) = queue.receive_ready(10).unwrap();
        let old_receipt = deliveries[0].receipt.clone();

        // lease expires immediately; sweeper returns it and a new delivery
        // supersedes the receipt
        assert_eq!(queue.sweep_expired().unwrap(), 1);
        let (redelivered, _) = queue.receive_ready(10).unwrap();
        assert_eq!(redelivered[0].delivery_count, 2);

        assert!(matches!(
            queue.ack(seq, &old_receipt).unwrap_err(),
            QueueError::StaleReceipt(_)
        ));
        queue.ack(seq, &redelivered[0].receipt).unwrap();
    }

    #[test]
    fn test_nack_returns_to_pending_with_count() {
        let temp = TempDir::new().unwrap();
        let queue = open_queue(&temp, Duration::from_secs(60));

        let seq = queue.enqueue(&create_message("job1")).unwrap();
        let (d1, _) = queue.receive_ready(10).unwrap();
        assert!(queue.nack(seq, &d1[0].receipt, "transient").unwrap().is_none());

        let (d2, _) = queue.receive_ready(10).unwrap();
        assert_eq!(d2[0].delivery_count, 2);
    }

    #[test]
    fn test_exhausted_deliveries_route_to_dlq() {
        let temp = TempDir::new().unwrap();
        let queue = open_queue(&temp, Duration::from_secs(60));

        let seq = queue.enqueue(&create_message("job1")).unwrap();

        // attempts 1 and 2 nack back; the third nack dead-letters
        for attempt in 1..=2 {
            let (d, _) = queue.receive_ready(10).unwrap();
            assert_eq!(d[0].delivery_count, attempt);
            assert!(queue.nack(seq, &d[0].receipt, "boom").unwrap().is_none());
        }
        let (d, _) = queue.receive_ready(10).unwrap();
        assert_eq!(d[0].delivery_count, 3);
        let dead = queue.nack(seq, &d[0].receipt, "boom").unwrap();
        assert!(dead.is_some());
        assert_eq!(dead.unwrap().attempts, 3);

        let dlq = queue.list_dlq(10).unwrap();
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].1.message.job_id, "job1");

        // nothing left to deliver
        let (none, no_dead) = queue.receive_ready(10).unwrap();
        assert!(none.is_empty());
        assert!(no_dead.is_empty());
    }

    #[test]
    fn test_heartbeat_extends_lease() {
        let temp = TempDir::new().unwrap();
        let queue = open_queue(&temp, Duration::from_secs(60));

        let seq = queue.enqueue(&create_message("job1")).unwrap();
        let (d, _) = queue.receive_ready(10).unwrap();

        queue.heartbeat(seq, &d[0].receipt).unwrap();
        assert_eq!(queue.sweep_expired().unwrap(), 0);

        assert!(matches!(
            queue.heartbeat(seq, "bogus").unwrap_err(),
            QueueError::StaleReceipt(_)
        ));
    }

    #[test]
    fn test_sequence_persists_across_reopen() {
        let temp = TempDir::new().unwrap();
        {
            let queue = open_queue(&temp, Duration::from_secs(60));
            queue.enqueue(&create_message("job1")).unwrap();
            queue.flush().unwrap();
        }
        let queue = open_queue(&temp, Duration::from_secs(60));
        assert_eq!(queue.current_seq(), 1);
        let seq = queue.enqueue(&create_message("job2")).unwrap();
        assert_eq!(seq, 1);
        assert_eq!(queue.pending_len().unwrap(), 2);
    }
}
