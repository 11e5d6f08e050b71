//! Credit ledger: per-tenant accounting tied to job outcome.
//!
//! Remaining allowance is derived from the tenant row's counters; the
//! append-only transaction log in the store is the audit trail whose
//! running balance mirrors `base + bonus - used`. Every mutation runs
//! under a per-tenant async lock so reserve checks and commits cannot
//! interleave across workers in this process.
//!
//! Usage is committed only when a pipeline run completes successfully,
//! and at most once per candidate: retries of an already-charged
//! candidate are free.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{Months, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::model::{CreditTransaction, Tenant, TransactionType};
use crate::store::{MetadataStore, StoreError};

#[derive(Debug, Error)]
pub enum CreditError {
    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("insufficient credits")]
    Insufficient,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, CreditError>;

/// Credit accounting facade over the metadata store
#[derive(Clone)]
pub struct CreditLedger {
    store: MetadataStore,
    locks: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl CreditLedger {
    pub fn new(store: MetadataStore) -> Self {
        Self {
            store,
            locks: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    async fn lock_tenant(&self, tenant_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().expect("credit lock table poisoned");
            locks
                .entry(tenant_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Register a tenant and open its transaction log with a `subscription`
    /// grant covering the initial allowance.
    pub async fn register_tenant(&self, tenant: &Tenant) -> Result<()> {
        let _guard = self.lock_tenant(&tenant.id).await;

        self.store.upsert_tenant(tenant)?;
        if self.store.list_transactions(&tenant.id)?.is_empty() {
            let grant = (tenant.base_credits + tenant.bonus_credits) as i64;
            self.store.append_transaction(CreditTransaction {
                id: Uuid::new_v4().to_string(),
                tenant_id: tenant.id.clone(),
                tx_type: TransactionType::Subscription,
                amount: grant,
                balance_after: 0,
                candidate_id: None,
                job_id: None,
                created_at: Utc::now(),
            })?;
            info!(tenant = %tenant.id, grant, "Opened credit log");
        }
        Ok(())
    }

    /// Credits currently available to the tenant. Applies a lazy monthly
    /// reset when the billing cycle has rolled over.
    pub async fn remaining(&self, tenant_id: &str) -> Result<u32> {
        let _guard = self.lock_tenant(tenant_id).await;
        let tenant = self.load_fresh(tenant_id)?;
        Ok(Self::remaining_for(&tenant))
    }

    /// Run the monthly reset for one tenant if its cycle has elapsed.
    /// Also invoked lazily by every locked read.
    pub async fn monthly_reset(&self, tenant_id: &str) -> Result<()> {
        let _guard = self.lock_tenant(tenant_id).await;
        self.load_fresh(tenant_id)?;
        Ok(())
    }

    /// Charge one credit for a successfully analyzed candidate.
    ///
    /// Returns `true` when a credit was consumed, `false` when the
    /// candidate had already been charged (retry path — a no-op).
    pub async fn commit_usage(
        &self,
        tenant_id: &str,
        job_id: &str,
        candidate_id: &str,
    ) -> Result<bool> {
        let _guard = self.lock_tenant(tenant_id).await;
        let mut tenant = self.load_fresh(tenant_id)?;

        if self.store.usage_exists(candidate_id)? {
            debug!(candidate_id, "Usage already committed, skipping charge");
            return Ok(false);
        }

        if Self::remaining_for(&tenant) == 0 {
            return Err(CreditError::Insufficient);
        }

        // dip into overage only once base + bonus are exhausted
        let base_pool =
            (tenant.base_credits + tenant.bonus_credits).saturating_sub(tenant.credits_used_this_month);
        if base_pool > 0 {
            tenant.credits_used_this_month += 1;
        } else {
            tenant.overage_used_this_month += 1;
        }

        let tx = self.store.append_transaction(CreditTransaction {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            tx_type: TransactionType::Usage,
            amount: -1,
            balance_after: 0,
            candidate_id: Some(candidate_id.to_string()),
            job_id: Some(job_id.to_string()),
            created_at: Utc::now(),
        })?;
        self.store.remember_usage(candidate_id, &tx.id)?;
        self.store.upsert_tenant(&tenant)?;

        info!(
            tenant = tenant_id,
            job_id, candidate_id, "Committed usage credit"
        );
        Ok(true)
    }

    /// Operator adjustment (bonus grants, refunds-by-hand, corrections)
    pub async fn record_adjustment(&self, tenant_id: &str, amount: i64) -> Result<CreditTransaction> {
        let _guard = self.lock_tenant(tenant_id).await;
        let mut tenant = self.load_fresh(tenant_id)?;

        if amount > 0 {
            tenant.bonus_credits += amount as u32;
        } else {
            tenant.bonus_credits = tenant.bonus_credits.saturating_sub((-amount) as u32);
        }
        self.store.upsert_tenant(&tenant)?;

        let tx = self.store.append_transaction(CreditTransaction {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            tx_type: TransactionType::Adjustment,
            amount,
            balance_after: 0,
            candidate_id: None,
            job_id: None,
            created_at: Utc::now(),
        })?;
        Ok(tx)
    }

    /// Load the tenant, applying the monthly reset when due
    fn load_fresh(&self, tenant_id: &str) -> Result<Tenant> {
        let mut tenant = self
            .store
            .get_tenant(tenant_id)?
            .ok_or_else(|| CreditError::TenantNotFound(tenant_id.to_string()))?;

        let now = Utc::now();
        let mut rolled = false;
        while let Some(next) = tenant.billing_cycle_start.checked_add_months(Months::new(1)) {
            if now < next {
                break;
            }
            tenant.billing_cycle_start = next;
            rolled = true;
        }

        if rolled {
            tenant.credits_used_this_month = 0;
            tenant.overage_used_this_month = 0;
            self.store.upsert_tenant(&tenant)?;

            // restore the log's running balance to the full allowance
            let allowance = (tenant.base_credits + tenant.bonus_credits) as i64;
            let correction = allowance - self.store.last_balance(tenant_id)?;
            self.store.append_transaction(CreditTransaction {
                id: Uuid::new_v4().to_string(),
                tenant_id: tenant_id.to_string(),
                tx_type: TransactionType::Adjustment,
                amount: correction,
                balance_after: 0,
                candidate_id: None,
                job_id: None,
                created_at: now,
            })?;
            info!(tenant = tenant_id, "Monthly credit reset applied");
        }

        Ok(tenant)
    }

    fn remaining_for(tenant: &Tenant) -> u32 {
        let base = (tenant.base_credits + tenant.bonus_credits)
            .saturating_sub(tenant.credits_used_this_month);

        let overage = if tenant.overage_enabled && tenant.plan.overage_eligible() {
            tenant.overage_limit.saturating_sub(tenant.overage_used_this_month)
        } else {
            0
        };

        base + overage
    }
}
