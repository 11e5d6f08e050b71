//! CoverageCalculator and GapFiller (both feature-gated).
//!
//! Coverage is a weighted fill ratio over the record's fields. When it
//! lands below the configured threshold, the gap filler re-prompts the
//! primary model for the missing fields only — bounded retries, merging
//! only what was empty, never overwriting a reconciled value.

use tracing::{debug, warn};

use crate::crosscheck::Consensus;
use crate::llm::{LlmManager, parse_draft, schema};
use crate::model::Warning;

/// Gap-filled fields carry this confidence: one model, second pass
const GAP_FILL_CONFIDENCE: f64 = 0.6;

#[derive(Debug, Clone, PartialEq)]
pub struct CoverageReport {
    pub score: f64,
    pub missing_fields: Vec<String>,
}

/// Required fields weigh double; contact and narrative fields weigh one
pub fn coverage(consensus: &Consensus) -> CoverageReport {
    let draft = &consensus.draft;

    let slots: [(&str, bool, u32); 10] = [
        ("name", draft.name.is_some(), 2),
        ("last_position", draft.last_position.is_some(), 2),
        ("last_company", draft.last_company.is_some(), 2),
        ("exp_years", draft.exp_years.is_some(), 2),
        ("phone", draft.phone.is_some(), 1),
        ("email", draft.email.is_some(), 1),
        ("skills", !draft.skills.is_empty(), 1),
        ("careers", !draft.careers.is_empty(), 1),
        ("education", !draft.education.is_empty(), 1),
        ("summary", draft.summary.is_some(), 1),
    ];

    let total: u32 = slots.iter().map(|(_, _, w)| w).sum();
    let filled: u32 = slots
        .iter()
        .filter(|(_, present, _)| *present)
        .map(|(_, _, w)| w)
        .sum();
    let missing_fields = slots
        .iter()
        .filter(|(_, present, _)| !present)
        .map(|(name, _, _)| name.to_string())
        .collect();

    CoverageReport {
        score: filled as f64 / total as f64,
        missing_fields,
    }
}

/// Ask the primary model to fill the missing fields, up to `max_retries`
/// passes. LLM failures here are non-fatal: the record ships as-is with a
/// `gap_fill_incomplete` warning.
pub async fn fill_gaps(
    llm: &LlmManager,
    raw_text: &str,
    consensus: &mut Consensus,
    max_retries: u32,
) {
    for attempt in 0..max_retries {
        let report = coverage(consensus);
        if report.missing_fields.is_empty() {
            return;
        }

        debug!(
            attempt,
            missing = ?report.missing_fields,
            "Requesting gap fill"
        );

        let prompt = schema::gap_fill_prompt(raw_text, &report.missing_fields);
        let draft = match llm.generate(0, &prompt).await.and_then(parse_draft) {
            Ok(draft) => draft,
            Err(e) => {
                warn!(attempt, error = %e, "Gap fill pass failed");
                consensus.warnings.push(Warning {
                    kind: "gap_fill_incomplete".into(),
                    field: None,
                    candidates: Vec::new(),
                    message: Some(e.to_string()),
                });
                return;
            }
        };

        let mut filled_any = false;
        let target = &mut consensus.draft;

        macro_rules! fill_scalar {
            ($field:ident, $key:literal) => {
                if target.$field.is_none() {
                    if let Some(value) = draft.$field.clone() {
                        target.$field = Some(value);
                        consensus
                            .field_confidence
                            .insert($key.to_string(), GAP_FILL_CONFIDENCE);
                        filled_any = true;
                    }
                }
            };
        }

        fill_scalar!(name, "name");
        fill_scalar!(last_position, "last_position");
        fill_scalar!(last_company, "last_company");
        fill_scalar!(exp_years, "exp_years");
        fill_scalar!(phone, "phone");
        fill_scalar!(email, "email");
        fill_scalar!(summary, "summary");

        if target.skills.is_empty() && !draft.skills.is_empty() {
            target.skills = draft.skills.clone();
            consensus
                .field_confidence
                .insert("skills".into(), GAP_FILL_CONFIDENCE);
            filled_any = true;
        }
        if target.careers.is_empty() && !draft.careers.is_empty() {
            target.careers = draft.careers.clone();
            consensus
                .field_confidence
                .insert("careers".into(), GAP_FILL_CONFIDENCE);
            filled_any = true;
        }
        if target.education.is_empty() && !draft.education.is_empty() {
            target.education = draft.education.clone();
            filled_any = true;
        }

        if !filled_any {
            // the model has nothing more to offer; stop burning passes
            break;
        }
        consensus.recompute_score();
    }

    let report = coverage(consensus);
    if !report.missing_fields.is_empty() {
        consensus.warnings.push(Warning {
            kind: "gap_fill_incomplete".into(),
            field: None,
            candidates: Vec::new(),
            message: Some(format!("still missing: {}", report.missing_fields.join(", "))),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crosscheck::reconcile;
    use crate::llm::mock::{MockOutcome, ScriptedProvider};
    use crate::llm::{CircuitBreakerConfig, LlmProvider, RetryPolicy};
    use crate::llm::schema::ExtractionDraft;
    use crate::observability::Metrics;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn manager(provider: Arc<ScriptedProvider>) -> LlmManager {
        LlmManager::new(
            vec![("primary".into(), provider as Arc<dyn LlmProvider>)],
            None,
            RetryPolicy::new(0, Duration::from_millis(1)),
            CircuitBreakerConfig::default(),
            Duration::from_secs(5),
            Duration::from_secs(5),
            Arc::new(Metrics::new()),
        )
    }

    fn sparse_consensus() -> Consensus {
        reconcile(
            &[ExtractionDraft {
                name: Some("Kim Jiwoo".into()),
                last_company: Some("Acme Inc".into()),
                last_position: Some("Backend Engineer".into()),
                exp_years: Some(6.0),
                ..Default::default()
            }],
            &BTreeMap::new(),
        )
    }

    #[test]
    fn test_coverage_scoring() {
        let full = reconcile(
            &[ExtractionDraft {
                name: Some("A".into()),
                last_position: Some("B".into()),
                last_company: Some("C".into()),
                exp_years: Some(1.0),
                phone: Some("010-1234-5678".into()),
                email: Some("a@b.co".into()),
                skills: vec!["rust".into()],
                summary: Some("s".into()),
                ..Default::default()
            }],
            &BTreeMap::new(),
        );
        let report = coverage(&full);
        assert!(report.score > 0.85);
        assert_eq!(report.missing_fields, vec!["careers", "education"]);

        let sparse = sparse_consensus();
        let report = coverage(&sparse);
        assert!(report.score < 0.85);
        assert!(report.missing_fields.contains(&"email".to_string()));
    }

    #[tokio::test]
    async fn test_gap_fill_merges_only_missing() {
        let provider = Arc::new(ScriptedProvider::new(
            "primary",
            json!({
                "name": "WRONG NAME",
                "email": "jiwoo@example.com",
                "summary": "Backend engineer with six years of experience.",
                "skills": ["rust", "go"],
                "careers": [{"company": "Acme Inc", "position": "Backend Engineer"}],
                "education": [{"school": "Seoul National University"}],
                "phone": "010-1234-5678"
            }),
        ));
        let llm = manager(provider);

        let mut consensus = sparse_consensus();
        fill_gaps(&llm, "text", &mut consensus, 2).await;

        // existing values survive; gaps are filled at reduced confidence
        assert_eq!(consensus.draft.name.as_deref(), Some("Kim Jiwoo"));
        assert_eq!(consensus.draft.email.as_deref(), Some("jiwoo@example.com"));
        assert_eq!(consensus.field_confidence["email"], GAP_FILL_CONFIDENCE);
        assert_eq!(consensus.field_confidence["name"], 0.92);
        assert!(coverage(&consensus).missing_fields.is_empty());
    }

    #[tokio::test]
    async fn test_gap_fill_failure_is_non_fatal() {
        let provider = Arc::new(ScriptedProvider::new("primary", json!({})));
        provider.push(MockOutcome::Status(500));
        let llm = manager(provider);

        let mut consensus = sparse_consensus();
        fill_gaps(&llm, "text", &mut consensus, 2).await;

        assert!(consensus
            .warnings
            .iter()
            .any(|w| w.kind == "gap_fill_incomplete"));
    }

    #[tokio::test]
    async fn test_gap_fill_stops_when_model_has_nothing() {
        let provider = Arc::new(ScriptedProvider::new("primary", json!({})));
        let llm = manager(provider);

        let mut consensus = sparse_consensus();
        fill_gaps(&llm, "text", &mut consensus, 2).await;

        // one pass, nothing filled, warning attached
        assert!(consensus
            .warnings
            .iter()
            .any(|w| w.kind == "gap_fill_incomplete"));
    }
}
