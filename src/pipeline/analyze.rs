//! Analysis stage: run the provider set the analysis mode calls for and
//! fold the drafts through cross-check reconciliation.

use std::collections::BTreeMap;

use tracing::warn;

use crate::crosscheck::{self, Consensus};
use crate::llm::{ExtractionDraft, LlmError, LlmManager, parse_draft, schema};
use crate::model::{AnalysisMode, ErrorCode, Warning};

use super::StageError;

/// Run extraction per `mode` and reconcile.
///
/// `phase_1` uses the primary alone; `phase_2` runs every configured
/// provider and cross-checks. A `phase_2` deployment with a single
/// provider degrades to single-model analysis with a
/// `single_model_fallback` warning, as does a run where every secondary
/// fails while the primary answers.
pub async fn analyze(
    llm: &LlmManager,
    mode: AnalysisMode,
    raw_text: &str,
    synonyms: &BTreeMap<String, String>,
) -> Result<Consensus, StageError> {
    if llm.provider_count() == 0 {
        return Err(StageError::fatal(
            ErrorCode::AnalysisFailed,
            "no LLM provider configured",
        ));
    }

    let provider_indices: Vec<usize> = match mode {
        AnalysisMode::Phase1 => vec![0],
        AnalysisMode::Phase2 => (0..llm.provider_count()).collect(),
    };
    let cross_check_requested = mode == AnalysisMode::Phase2;

    let prompt = schema::extraction_prompt(raw_text);

    let mut drafts: Vec<ExtractionDraft> = Vec::new();
    let mut secondary_failure: Option<LlmError> = None;

    for index in provider_indices {
        match llm.generate(index, &prompt).await.and_then(parse_draft) {
            Ok(draft) => drafts.push(draft),
            Err(e) if index == 0 => {
                // the primary is load-bearing; its failure fails the stage
                return Err(e.into());
            }
            Err(e) => {
                warn!(provider_index = index, error = %e, "Secondary extraction failed, degrading");
                secondary_failure = Some(e);
            }
        }
    }

    let mut consensus = crosscheck::reconcile(&drafts, synonyms);

    if cross_check_requested && drafts.len() < 2 {
        let reason = match &secondary_failure {
            Some(e) => format!("cross-check degraded to single model: {e}"),
            None => "cross-check requested but only one provider is configured".to_string(),
        };
        consensus.warnings.push(Warning {
            kind: "single_model_fallback".into(),
            field: None,
            candidates: Vec::new(),
            message: Some(reason),
        });
    }

    Ok(consensus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{MockOutcome, ScriptedProvider};
    use crate::llm::{CircuitBreakerConfig, LlmProvider, RetryPolicy};
    use crate::model::RiskLevel;
    use crate::observability::Metrics;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn draft_json(company: &str) -> serde_json::Value {
        json!({
            "name": "Kim Jiwoo",
            "last_position": "Backend Engineer",
            "last_company": company,
            "exp_years": 6.0,
            "skills": ["rust"],
        })
    }

    fn manager(providers: Vec<Arc<ScriptedProvider>>) -> LlmManager {
        let named = providers
            .into_iter()
            .enumerate()
            .map(|(i, p)| (format!("p{i}"), p as Arc<dyn LlmProvider>))
            .collect();
        LlmManager::new(
            named,
            None,
            RetryPolicy::new(0, Duration::from_millis(1)),
            CircuitBreakerConfig::default(),
            Duration::from_secs(5),
            Duration::from_secs(5),
            Arc::new(Metrics::new()),
        )
    }

    #[tokio::test]
    async fn test_phase1_uses_primary_only() {
        let primary = Arc::new(ScriptedProvider::new("p", draft_json("Acme Inc")));
        let secondary = Arc::new(ScriptedProvider::new("s", draft_json("Globex")));
        let llm = manager(vec![primary.clone(), secondary.clone()]);

        let consensus = analyze(&llm, AnalysisMode::Phase1, "text", &BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(consensus.draft.last_company.as_deref(), Some("Acme Inc"));
        assert_eq!(consensus.confidence_score, 0.92);
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn test_phase2_cross_checks_disagreement() {
        let primary = Arc::new(ScriptedProvider::new("p", draft_json("Acme Inc")));
        let secondary = Arc::new(ScriptedProvider::new("s", draft_json("Acme")));
        let llm = manager(vec![primary, secondary]);

        let consensus = analyze(&llm, AnalysisMode::Phase2, "text", &BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(consensus.draft.last_company.as_deref(), Some("Acme Inc"));
        assert_eq!(consensus.field_confidence["last_company"], 0.7);
        assert_eq!(consensus.risk_level, RiskLevel::Medium);
        assert!(consensus.warnings.iter().any(|w| w.kind == "disagreement"));
    }

    #[tokio::test]
    async fn test_phase2_single_provider_degrades_with_warning() {
        let primary = Arc::new(ScriptedProvider::new("p", draft_json("Acme Inc")));
        let llm = manager(vec![primary]);

        let consensus = analyze(&llm, AnalysisMode::Phase2, "text", &BTreeMap::new())
            .await
            .unwrap();

        assert!(consensus
            .warnings
            .iter()
            .any(|w| w.kind == "single_model_fallback"));
    }

    #[tokio::test]
    async fn test_phase2_secondary_failure_degrades() {
        let primary = Arc::new(ScriptedProvider::new("p", draft_json("Acme Inc")));
        let secondary = Arc::new(ScriptedProvider::new("s", json!({})));
        secondary.push(MockOutcome::Status(500));
        let llm = manager(vec![primary, secondary]);

        let consensus = analyze(&llm, AnalysisMode::Phase2, "text", &BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(consensus.draft.last_company.as_deref(), Some("Acme Inc"));
        assert!(consensus
            .warnings
            .iter()
            .any(|w| w.kind == "single_model_fallback"));
    }

    #[tokio::test]
    async fn test_primary_failure_fails_stage() {
        let primary = Arc::new(ScriptedProvider::new("p", json!({})));
        primary.push(MockOutcome::Status(400));
        let llm = manager(vec![primary]);

        let err = analyze(&llm, AnalysisMode::Phase1, "text", &BTreeMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::AnalysisFailed);
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_no_providers_configured() {
        let llm = manager(vec![]);
        let err = analyze(&llm, AnalysisMode::Phase1, "text", &BTreeMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::AnalysisFailed);
    }
}
