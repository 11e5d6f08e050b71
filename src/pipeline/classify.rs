//! Gated document classification and the identity check.
//!
//! The classifier asks the primary model whether the document is a resume
//! at all (rejecting invoices, contracts, slide decks wearing a .pdf
//! extension). The identity check is a pure heuristic over the distinct
//! contact identities in the text: a document carrying two people's
//! contact blocks is not a single candidate's resume.

use crate::llm::{LlmManager, parse_classifier_verdict, schema};
use crate::model::ErrorCode;

use super::StageError;
use super::parser::contact_clusters;

pub async fn classify_document(llm: &LlmManager, raw_text: &str) -> Result<(), StageError> {
    let prompt = schema::classifier_prompt(raw_text);
    let value = llm.generate(0, &prompt).await?;
    let verdict = parse_classifier_verdict(value)?;

    if verdict.is_resume {
        Ok(())
    } else {
        Err(StageError::fatal(
            ErrorCode::NotAResume,
            verdict
                .reason
                .unwrap_or_else(|| "document is not a resume".into()),
        ))
    }
}

/// Distinct contact clusters in the document. One cluster (or none — some
/// resumes omit contact data) passes; more than one fails the job.
pub fn check_identity(raw_text: &str) -> Result<usize, StageError> {
    let (emails, phones) = contact_clusters(raw_text);
    let person_count = emails.len().max(phones.len()).max(1);

    if person_count > 1 {
        return Err(StageError::fatal(
            ErrorCode::MultiplePersons,
            format!("document carries {person_count} distinct contact identities"),
        ));
    }
    Ok(person_count)
}
