use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Candidate record lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl Default for RiskLevel {
    fn default() -> Self {
        RiskLevel::Low
    }
}

/// Structured warning attached during analysis.
///
/// `kind` values in use: `disagreement`, `low_confidence`,
/// `single_model_fallback`, `embedding_failed`, `career_overlap`,
/// `future_date`, `gap_fill_incomplete`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Warning {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Competing values observed across models (disagreement warnings)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Warning {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            field: None,
            candidates: Vec::new(),
            message: None,
        }
    }

    pub fn disagreement(field: impl Into<String>, candidates: Vec<String>) -> Self {
        Self {
            kind: "disagreement".into(),
            field: Some(field.into()),
            candidates,
            message: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CareerEntry {
    pub company: String,
    pub position: String,
    /// Canonical `YYYY-MM`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    /// `None` means current employment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EducationEntry {
    pub school: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degree: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub major: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tech: Vec<String>,
}

/// The structured, searchable candidate record.
///
/// PII only ever appears here in encrypted/hashed/masked form; plaintext
/// phone, email, and address are stripped by the privacy stage before the
/// record reaches the store. Encrypted blobs and hashes are produced
/// together or not at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub tenant_id: String,
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub is_latest: bool,
    pub status: CandidateStatus,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_position: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp_years: Option<f32>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub careers: Vec<CareerEntry>,
    #[serde(default)]
    pub education: Vec<EducationEntry>,
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub confidence_score: f64,
    #[serde(default)]
    pub field_confidence: BTreeMap<String, f64>,
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub requires_review: bool,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    // PII: base64(nonce || ciphertext || tag), salted-SHA-256 hex, display mask
    pub phone_encrypted: Option<String>,
    pub email_encrypted: Option<String>,
    pub address_encrypted: Option<String>,
    pub phone_hash: Option<String>,
    pub email_hash: Option<String>,
    pub phone_masked: Option<String>,
    pub email_masked: Option<String>,
    pub address_masked: Option<String>,
    /// Semantic embedding, 1536 float32 components
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Candidate {
    /// Placeholder row inserted at submit time so the UI has something to
    /// render while the pipeline runs. Named after the file until parsing
    /// extracts the real name.
    pub fn placeholder(id: impl Into<String>, tenant_id: impl Into<String>, file_name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            version: 1,
            parent_id: None,
            is_latest: true,
            status: CandidateStatus::Processing,
            name: file_name.to_string(),
            last_position: None,
            last_company: None,
            exp_years: None,
            skills: Vec::new(),
            careers: Vec::new(),
            education: Vec::new(),
            projects: Vec::new(),
            summary: None,
            confidence_score: 0.0,
            field_confidence: BTreeMap::new(),
            risk_level: RiskLevel::Low,
            requires_review: false,
            warnings: Vec::new(),
            phone_encrypted: None,
            email_encrypted: None,
            address_encrypted: None,
            phone_hash: None,
            email_hash: None,
            phone_masked: None,
            email_masked: None,
            address_masked: None,
            embedding: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Encrypted blob and hash must be produced together (or both absent)
    pub fn pii_consistent(&self) -> bool {
        self.phone_encrypted.is_some() == self.phone_hash.is_some()
            && self.email_encrypted.is_some() == self.email_hash.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_defaults() {
        let c = Candidate::placeholder("c1", "t1", "resume.pdf");
        assert_eq!(c.name, "resume.pdf");
        assert_eq!(c.version, 1);
        assert!(c.is_latest);
        assert_eq!(c.status, CandidateStatus::Processing);
        assert!(c.pii_consistent());
    }

    #[test]
    fn test_warning_serde_uses_type_key() {
        let w = Warning::disagreement("last_company", vec!["Acme Inc".into(), "Acme".into()]);
        let json = serde_json::to_value(&w).unwrap();
        assert_eq!(json["type"], "disagreement");
        assert_eq!(json["field"], "last_company");
        assert_eq!(json["candidates"][0], "Acme Inc");
    }

    #[test]
    fn test_pii_consistency_detects_partial_writes() {
        let mut c = Candidate::placeholder("c1", "t1", "x.pdf");
        c.phone_encrypted = Some("blob".into());
        assert!(!c.pii_consistent());
        c.phone_hash = Some("hash".into());
        assert!(c.pii_consistent());
    }
}
