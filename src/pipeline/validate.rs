//! ValidationAgent: normalize the consensus record and attach sanity
//! warnings. This stage never fails a job.

use chrono::{Datelike, Utc};
use std::collections::BTreeMap;

use crate::crosscheck::Consensus;
use crate::crosscheck::normalize::canonical_skill;
use crate::model::Warning;

/// Maximum believable career length; anything above is clamped
const MAX_EXP_YEARS: f32 = 50.0;

pub fn validate_record(consensus: &mut Consensus, synonyms: &BTreeMap<String, String>) {
    let draft = &mut consensus.draft;

    for field in [&mut draft.name, &mut draft.last_position, &mut draft.last_company] {
        if let Some(value) = field {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                *field = None;
            } else if trimmed.len() != value.len() {
                *field = Some(trimmed.to_string());
            }
        }
    }

    if let Some(years) = draft.exp_years {
        draft.exp_years = Some(years.clamp(0.0, MAX_EXP_YEARS));
    }

    // skills: canonical, deduplicated, order-preserving
    let mut seen = Vec::new();
    for skill in draft.skills.drain(..) {
        let canonical = canonical_skill(&skill, synonyms);
        if !canonical.is_empty() && !seen.contains(&canonical) {
            seen.push(canonical);
        }
    }
    draft.skills = seen;

    let current_month = format!("{}-{:02}", Utc::now().year(), Utc::now().month());

    // date sanity over careers (already sorted most-recent-first)
    for career in &draft.careers {
        if let Some(start) = &career.start_date {
            if *start > current_month {
                consensus.warnings.push(Warning {
                    kind: "future_date".into(),
                    field: Some("careers".into()),
                    candidates: Vec::new(),
                    message: Some(format!("{} starts in the future ({start})", career.company)),
                });
            }
            if let Some(end) = &career.end_date {
                if end < start {
                    consensus.warnings.push(Warning {
                        kind: "career_overlap".into(),
                        field: Some("careers".into()),
                        candidates: Vec::new(),
                        message: Some(format!("{} ends before it starts", career.company)),
                    });
                }
            }
        }
    }

    // more than one open-ended role is usually an extraction artifact
    let open_roles = draft.careers.iter().filter(|c| c.end_date.is_none()).count();
    if open_roles > 1 {
        consensus.warnings.push(Warning {
            kind: "career_overlap".into(),
            field: Some("careers".into()),
            candidates: Vec::new(),
            message: Some(format!("{open_roles} concurrent open-ended roles")),
        });
    }
}
