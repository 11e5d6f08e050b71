//! Cross-check reconciliation: fold N model drafts of the same resume into
//! one consensus record with per-field confidence.
//!
//! This is a pure function over the drafts and the synonym table — no I/O,
//! no provider knowledge — so the consensus rules are property-testable in
//! isolation. Draft order matters: index 0 is the primary model, whose
//! value wins whenever the models cannot agree.
//!
//! Scoring per field:
//! - at least two models agree exactly (after normalization) → 1.0
//! - values partially agree (one is a refinement of another, or dates share
//!   the year) → 0.7, primary's value kept, a `disagreement` warning lists
//!   every candidate value
//! - no agreement at all → 0.3, primary's value kept, `disagreement`
//!   warning, and the record is escalated to high risk
//! - only one model produced the field → 0.92 single-model baseline when
//!   running alone, 0.6 when its peers stayed silent
//!
//! `confidence_score` is the minimum over the required fields;
//! `requires_review` trips below 0.8.

pub mod normalize;

use std::collections::BTreeMap;

use crate::llm::schema::{DraftCareer, ExtractionDraft};
use crate::model::{RiskLevel, Warning};
use normalize::{canonical_skill, normalize_date, normalize_email, normalize_identifier, normalize_phone};

/// Fields whose confidence gates the overall score
pub const REQUIRED_FIELDS: &[&str] = &["name", "last_position", "last_company", "exp_years"];

/// Review threshold on the overall confidence score
pub const REVIEW_THRESHOLD: f64 = 0.8;

const SINGLE_MODEL_CONFIDENCE: f64 = 0.92;
const PARTIAL_AGREEMENT_CONFIDENCE: f64 = 0.7;
const LONE_VOICE_CONFIDENCE: f64 = 0.6;
const DISAGREEMENT_CONFIDENCE: f64 = 0.3;

/// Consensus over all drafts
#[derive(Debug, Clone)]
pub struct Consensus {
    pub draft: ExtractionDraft,
    pub field_confidence: BTreeMap<String, f64>,
    pub confidence_score: f64,
    pub requires_review: bool,
    pub risk_level: RiskLevel,
    pub warnings: Vec<Warning>,
}

impl Consensus {
    /// Re-derive the overall score and review flag from `field_confidence`,
    /// after a later stage (gap filling) adds or upgrades fields.
    pub fn recompute_score(&mut self) {
        self.confidence_score = REQUIRED_FIELDS
            .iter()
            .map(|field| self.field_confidence.get(*field).copied().unwrap_or(0.0))
            .fold(1.0_f64, f64::min);
        self.requires_review = self.confidence_score < REVIEW_THRESHOLD;
    }
}

/// Reconcile model drafts into a consensus record.
///
/// `drafts` must be non-empty and ordered primary-first.
pub fn reconcile(drafts: &[ExtractionDraft], synonyms: &BTreeMap<String, String>) -> Consensus {
    assert!(!drafts.is_empty(), "reconcile requires at least one draft");

    let mut field_confidence = BTreeMap::new();
    let mut warnings = Vec::new();
    let mut hard_disagreement = false;
    let mut merged = ExtractionDraft::default();

    // scalar text fields
    let scalar_fields: [(&str, fn(&ExtractionDraft) -> Option<String>); 3] = [
        ("name", |d| d.name.clone()),
        ("last_position", |d| d.last_position.clone()),
        ("last_company", |d| d.last_company.clone()),
    ];
    let mut scalar_results: BTreeMap<&str, Option<String>> = BTreeMap::new();
    for (field, getter) in scalar_fields {
        let values: Vec<Option<String>> = drafts.iter().map(getter).collect();
        let outcome = score_text_field(field, &values, normalize_identifier);
        apply_outcome(
            field,
            outcome,
            &mut field_confidence,
            &mut warnings,
            &mut hard_disagreement,
            |value| {
                scalar_results.insert(field, Some(value));
            },
        );
    }
    merged.name = scalar_results.remove("name").flatten();
    merged.last_position = scalar_results.remove("last_position").flatten();
    merged.last_company = scalar_results.remove("last_company").flatten();

    // experience years (numeric tolerance instead of string equality)
    let years: Vec<Option<f32>> = drafts.iter().map(|d| d.exp_years).collect();
    if let Some(outcome) = score_years(&years) {
        merged.exp_years = Some(outcome.value);
        field_confidence.insert("exp_years".into(), outcome.confidence);
        if let Some(w) = outcome.warning {
            warnings.push(w);
        }
        hard_disagreement |= outcome.hard;
    }

    // PII: compared on normal forms, never partially matched
    let phones: Vec<Option<String>> = drafts.iter().map(|d| d.phone.clone()).collect();
    apply_pii(
        "phone",
        &phones,
        |raw| normalize_phone(raw),
        &mut field_confidence,
        &mut warnings,
        &mut hard_disagreement,
        |value| merged.phone = Some(value),
    );
    let emails: Vec<Option<String>> = drafts.iter().map(|d| d.email.clone()).collect();
    apply_pii(
        "email",
        &emails,
        |raw| normalize_email(raw),
        &mut field_confidence,
        &mut warnings,
        &mut hard_disagreement,
        |value| merged.email = Some(value),
    );
    let addresses: Vec<Option<String>> = drafts.iter().map(|d| d.address.clone()).collect();
    apply_pii(
        "address",
        &addresses,
        |raw| normalize_identifier(raw),
        &mut field_confidence,
        &mut warnings,
        &mut hard_disagreement,
        |value| merged.address = Some(value),
    );

    // skills: union of canonical forms, confidence from cross-model overlap
    let (skills, skills_confidence) = merge_skills(drafts, synonyms);
    if !skills.is_empty() {
        field_confidence.insert("skills".into(), skills_confidence);
    }
    merged.skills = skills;

    // structured lists come from the primary; peers vote on the count
    merged.careers = normalize_careers(&drafts[0].careers);
    if !merged.careers.is_empty() {
        field_confidence.insert("careers".into(), list_confidence(drafts, |d| d.careers.len()));
    }
    merged.education = drafts[0]
        .education
        .iter()
        .map(|e| {
            let mut e = e.clone();
            e.start_date = e.start_date.as_deref().and_then(normalize_date);
            e.end_date = e.end_date.as_deref().and_then(normalize_date);
            e
        })
        .collect();
    merged.projects = drafts[0].projects.clone();

    // longest summary wins; the models rarely phrase these identically
    merged.summary = drafts
        .iter()
        .filter_map(|d| d.summary.clone())
        .max_by_key(|s| s.len());

    // overall score gates on required fields only
    let confidence_score = REQUIRED_FIELDS
        .iter()
        .map(|field| field_confidence.get(*field).copied().unwrap_or(0.0))
        .fold(1.0_f64, f64::min);
    let requires_review = confidence_score < REVIEW_THRESHOLD;

    for field in REQUIRED_FIELDS {
        if !field_confidence.contains_key(*field) {
            warnings.push(Warning {
                kind: "low_confidence".into(),
                field: Some((*field).into()),
                candidates: Vec::new(),
                message: Some("no model produced this field".into()),
            });
        }
    }

    let risk_level = if hard_disagreement {
        RiskLevel::High
    } else if requires_review || field_confidence.values().any(|c| *c < REVIEW_THRESHOLD) {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    Consensus {
        draft: merged,
        field_confidence,
        confidence_score,
        requires_review,
        risk_level,
        warnings,
    }
}

struct Outcome<T> {
    value: T,
    confidence: f64,
    warning: Option<Warning>,
    hard: bool,
}

fn apply_outcome(
    field: &str,
    outcome: Option<Outcome<String>>,
    field_confidence: &mut BTreeMap<String, f64>,
    warnings: &mut Vec<Warning>,
    hard_disagreement: &mut bool,
    mut set: impl FnMut(String),
) {
    if let Some(outcome) = outcome {
        set(outcome.value);
        field_confidence.insert(field.to_string(), outcome.confidence);
        if let Some(w) = outcome.warning {
            warnings.push(w);
        }
        *hard_disagreement |= outcome.hard;
    }
}

/// Score a text field across drafts using `normal` as the comparison form
fn score_text_field(
    field: &str,
    values: &[Option<String>],
    normal: fn(&str) -> String,
) -> Option<Outcome<String>> {
    let present: Vec<(usize, String)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| (i, s.to_string()))
        })
        .collect();

    if present.is_empty() {
        return None;
    }

    // single-model run: the baseline confidence
    if values.len() == 1 {
        return Some(Outcome {
            value: present[0].1.clone(),
            confidence: SINGLE_MODEL_CONFIDENCE,
            warning: None,
            hard: false,
        });
    }

    // exact agreement between at least two models
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, raw) in &present {
        groups.entry(normal(raw)).or_default().push(*i);
    }
    if let Some((_, members)) = groups.iter().find(|(_, members)| members.len() >= 2) {
        let representative = present
            .iter()
            .find(|(i, _)| members.contains(i))
            .map(|(_, raw)| raw.clone())
            .unwrap_or_default();
        return Some(Outcome {
            value: representative,
            confidence: 1.0,
            warning: None,
            hard: false,
        });
    }

    if present.len() == 1 {
        // only one of several models produced the field
        return Some(Outcome {
            value: present[0].1.clone(),
            confidence: LONE_VOICE_CONFIDENCE,
            warning: None,
            hard: false,
        });
    }

    // models disagree; primary's value is kept either way
    let primary = present
        .iter()
        .find(|(i, _)| *i == 0)
        .map(|(_, raw)| raw.clone())
        .unwrap_or_else(|| present[0].1.clone());
    let candidates: Vec<String> = present.iter().map(|(_, raw)| raw.clone()).collect();

    let partially_agrees = present.iter().any(|(i, a)| {
        present
            .iter()
            .any(|(j, b)| i != j && partial_match(&normal(a), &normal(b)))
    });

    Some(Outcome {
        value: primary,
        confidence: if partially_agrees {
            PARTIAL_AGREEMENT_CONFIDENCE
        } else {
            DISAGREEMENT_CONFIDENCE
        },
        warning: Some(Warning::disagreement(field, candidates)),
        hard: !partially_agrees,
    })
}

/// One normalized value being a refinement of the other ("acme" within
/// "acme inc"), or two dates sharing a year
fn partial_match(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.starts_with(b) || b.starts_with(a) || a.contains(b) || b.contains(a)
}

fn score_years(values: &[Option<f32>]) -> Option<Outcome<f32>> {
    let present: Vec<(usize, f32)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|y| (i, y)))
        .collect();

    if present.is_empty() {
        return None;
    }
    let primary = present
        .iter()
        .find(|(i, _)| *i == 0)
        .map(|(_, y)| *y)
        .unwrap_or(present[0].1);

    if values.len() == 1 {
        return Some(Outcome {
            value: primary,
            confidence: SINGLE_MODEL_CONFIDENCE,
            warning: None,
            hard: false,
        });
    }
    if present.len() == 1 {
        return Some(Outcome {
            value: present[0].1,
            confidence: LONE_VOICE_CONFIDENCE,
            warning: None,
            hard: false,
        });
    }

    let max_gap = present
        .iter()
        .flat_map(|(_, a)| present.iter().map(move |(_, b)| (a - b).abs()))
        .fold(0.0_f32, f32::max);

    if max_gap <= 0.5 {
        Some(Outcome {
            value: primary,
            confidence: 1.0,
            warning: None,
            hard: false,
        })
    } else {
        let candidates = present.iter().map(|(_, y)| y.to_string()).collect();
        let partial = max_gap <= 2.0;
        Some(Outcome {
            value: primary,
            confidence: if partial {
                PARTIAL_AGREEMENT_CONFIDENCE
            } else {
                DISAGREEMENT_CONFIDENCE
            },
            warning: Some(Warning::disagreement("exp_years", candidates)),
            hard: !partial,
        })
    }
}

/// PII fields never partially match: equal normal forms or a disagreement
fn apply_pii(
    field: &str,
    values: &[Option<String>],
    normal: impl Fn(&str) -> String,
    field_confidence: &mut BTreeMap<String, f64>,
    warnings: &mut Vec<Warning>,
    hard_disagreement: &mut bool,
    mut set: impl FnMut(String),
) {
    let present: Vec<(usize, String)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| (i, s.to_string()))
        })
        .collect();

    if present.is_empty() {
        return;
    }

    let primary = present
        .iter()
        .find(|(i, _)| *i == 0)
        .map(|(_, raw)| raw.clone())
        .unwrap_or_else(|| present[0].1.clone());

    if values.len() == 1 {
        set(primary);
        field_confidence.insert(field.to_string(), SINGLE_MODEL_CONFIDENCE);
        return;
    }

    let normals: Vec<String> = present.iter().map(|(_, raw)| normal(raw)).collect();
    let all_agree = present.len() >= 2 && normals.iter().all(|n| *n == normals[0]);

    if all_agree {
        set(primary);
        field_confidence.insert(field.to_string(), 1.0);
    } else if present.len() == 1 {
        set(primary);
        field_confidence.insert(field.to_string(), LONE_VOICE_CONFIDENCE);
    } else {
        let candidates: Vec<String> = present.iter().map(|(_, raw)| raw.clone()).collect();
        set(primary);
        field_confidence.insert(field.to_string(), DISAGREEMENT_CONFIDENCE);
        warnings.push(Warning::disagreement(field, candidates));
        *hard_disagreement = true;
    }
}

fn merge_skills(
    drafts: &[ExtractionDraft],
    synonyms: &BTreeMap<String, String>,
) -> (Vec<String>, f64) {
    let per_model: Vec<Vec<String>> = drafts
        .iter()
        .map(|d| {
            let mut seen = Vec::new();
            for skill in &d.skills {
                let canonical = canonical_skill(skill, synonyms);
                if !canonical.is_empty() && !seen.contains(&canonical) {
                    seen.push(canonical);
                }
            }
            seen
        })
        .collect();

    let mut union: Vec<String> = Vec::new();
    for skills in &per_model {
        for skill in skills {
            if !union.contains(skill) {
                union.push(skill.clone());
            }
        }
    }

    if union.is_empty() {
        return (union, 0.0);
    }
    if drafts.len() == 1 {
        return (union, SINGLE_MODEL_CONFIDENCE);
    }

    let in_all = union
        .iter()
        .filter(|s| per_model.iter().all(|m| m.contains(s)))
        .count();
    let jaccard = in_all as f64 / union.len() as f64;
    (union, 0.5 + 0.5 * jaccard)
}

fn list_confidence(drafts: &[ExtractionDraft], len: impl Fn(&ExtractionDraft) -> usize) -> f64 {
    if drafts.len() == 1 {
        return SINGLE_MODEL_CONFIDENCE;
    }
    let primary = len(&drafts[0]);
    if drafts.iter().skip(1).any(|d| len(d) == primary) {
        1.0
    } else {
        PARTIAL_AGREEMENT_CONFIDENCE
    }
}

fn normalize_careers(careers: &[DraftCareer]) -> Vec<DraftCareer> {
    let mut normalized: Vec<DraftCareer> = careers
        .iter()
        .map(|c| {
            let mut c = c.clone();
            c.company = c.company.trim().to_string();
            c.start_date = c.start_date.as_deref().and_then(normalize_date);
            c.end_date = c.end_date.as_deref().and_then(normalize_date);
            c
        })
        .filter(|c| !c.company.is_empty())
        .collect();

    // most recent first; open-ended roles sort above everything
    normalized.sort_by(|a, b| {
        let a_key = (a.end_date.is_none(), a.start_date.clone());
        let b_key = (b.end_date.is_none(), b.start_date.clone());
        b_key.cmp(&a_key)
    });
    normalized
}
