use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subscription plan, the billing tier a tenant signed up for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Starter,
    Pro,
    Enterprise,
}

impl Plan {
    /// Monthly base credit allowance for the tier
    pub fn base_credits(&self) -> u32 {
        match self {
            Plan::Starter => 20,
            Plan::Pro => 100,
            Plan::Enterprise => 500,
        }
    }

    /// Only paid tiers may opt into overage billing
    pub fn overage_eligible(&self) -> bool {
        matches!(self, Plan::Pro | Plan::Enterprise)
    }
}

/// The billing and isolation principal (one recruiter account)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub email: String,
    pub plan: Plan,
    pub base_credits: u32,
    pub bonus_credits: u32,
    pub credits_used_this_month: u32,
    pub billing_cycle_start: DateTime<Utc>,
    #[serde(default)]
    pub overage_enabled: bool,
    #[serde(default)]
    pub overage_limit: u32,
    #[serde(default)]
    pub overage_used_this_month: u32,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(id: impl Into<String>, email: impl Into<String>, plan: Plan) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            email: email.into(),
            plan,
            base_credits: plan.base_credits(),
            bonus_credits: 0,
            credits_used_this_month: 0,
            billing_cycle_start: now,
            overage_enabled: false,
            overage_limit: 0,
            overage_used_this_month: 0,
            created_at: now,
        }
    }
}
