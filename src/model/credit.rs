use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Subscription,
    Usage,
    Overage,
    Refund,
    Adjustment,
}

/// One row of the append-only credit transaction log.
///
/// `balance_after` is the signed running sum over the tenant's transactions
/// at the time this row was written. `usage` rows are unique per candidate —
/// a retried analysis never charges twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: String,
    pub tenant_id: String,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub amount: i64,
    pub balance_after: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_serde() {
        let tx = CreditTransaction {
            id: "tx1".into(),
            tenant_id: "t1".into(),
            tx_type: TransactionType::Usage,
            amount: -1,
            balance_after: 49,
            candidate_id: Some("c1".into()),
            job_id: Some("j1".into()),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["type"], "usage");
        assert_eq!(json["amount"], -1);
    }
}
