//! Extraction schema: the JSON shape every provider is asked to produce,
//! the strict parse from untyped model output, and the prompt builders.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::provider::LlmError;

/// One provider's attempt at structuring a resume. Every field is optional
/// — reconciliation decides what survives.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractionDraft {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub last_position: Option<String>,
    #[serde(default)]
    pub last_company: Option<String>,
    #[serde(default)]
    pub exp_years: Option<f32>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub careers: Vec<DraftCareer>,
    #[serde(default)]
    pub education: Vec<DraftEducation>,
    #[serde(default)]
    pub projects: Vec<DraftProject>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DraftCareer {
    pub company: String,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DraftEducation {
    pub school: String,
    #[serde(default)]
    pub degree: Option<String>,
    #[serde(default)]
    pub major: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DraftProject {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tech: Vec<String>,
}

/// Document classifier verdict
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierVerdict {
    pub is_resume: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Strict parse of untyped model output into a draft. A non-object or a
/// shape mismatch is a schema violation, which is never retried.
pub fn parse_draft(value: Value) -> Result<ExtractionDraft, LlmError> {
    if !value.is_object() {
        return Err(LlmError::SchemaViolation(
            "extraction output must be a JSON object".into(),
        ));
    }
    serde_json::from_value(value).map_err(|e| LlmError::SchemaViolation(e.to_string()))
}

pub fn parse_classifier_verdict(value: Value) -> Result<ClassifierVerdict, LlmError> {
    serde_json::from_value(value).map_err(|e| LlmError::SchemaViolation(e.to_string()))
}

/// Prompt asking a model to structure the full resume text
pub fn extraction_prompt(raw_text: &str) -> String {
    format!(
        "You are a resume analysis engine. Extract the candidate profile from the \
resume text below and answer with a single JSON object using exactly these keys: \
name, last_position, last_company, exp_years (number), phone, email, address, \
skills (array of strings), careers (array of {{company, position, start_date, \
end_date, description}} with dates as YYYY-MM, end_date null for current roles), \
education (array of {{school, degree, major, start_date, end_date}}), projects \
(array of {{name, description, tech}}), summary (2-3 sentences). Use null for \
anything the resume does not state. Do not invent data.\n\
\n\
RESUME TEXT:\n{raw_text}"
    )
}

/// Prompt asking a model whether the document is a resume at all
pub fn classifier_prompt(raw_text: &str) -> String {
    let excerpt: String = raw_text.chars().take(2000).collect();
    format!(
        "Decide whether the following document is a personal resume/CV. Answer \
with a JSON object: {{\"is_resume\": true|false, \"reason\": \"...\"}}.\n\
\n\
DOCUMENT:\n{excerpt}"
    )
}

/// Prompt asking the primary model to fill only the listed missing fields
pub fn gap_fill_prompt(raw_text: &str, missing_fields: &[String]) -> String {
    format!(
        "A previous extraction of this resume left the following fields empty: \
{}. Re-read the resume and answer with a JSON object containing ONLY those \
fields (same schema as before: dates as YYYY-MM, arrays where applicable). Use \
null for fields the resume genuinely does not state.\n\
\n\
RESUME TEXT:\n{raw_text}",
        missing_fields.join(", ")
    )
}
