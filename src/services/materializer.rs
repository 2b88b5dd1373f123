//! Projection of completed inference jobs into display-facing case records.
//!
//! Everything here is a pure function of its inputs: the same job and
//! payload always produce the same case.

use crate::models::case::{AiSummary, CaseRecord, PatientSummary, Priority};
use crate::models::job::{AnalysisResult, JobState, TrackedJob};

// ── Priority keyword tiers ───────────────────────────────────────────

/// Findings that need a read now. Checked before [`URGENT_KEYWORDS`].
pub const STAT_KEYWORDS: &[&str] = &["acute", "critical", "emergency"];

pub const URGENT_KEYWORDS: &[&str] = &["hematoma", "fracture", "hemorrhage", "stroke", "trauma"];

/// Tiers in precedence order; the first tier with any match wins.
const PRIORITY_TIERS: &[(Priority, &[&str])] = &[
    (Priority::Stat, STAT_KEYWORDS),
    (Priority::Urgent, URGENT_KEYWORDS),
];

const ANONYMOUS_PATIENT: &str = "Anonymous Patient";
const UNKNOWN_BODY_PART: &str = "Unknown";

/// Classify urgency from finding labels and the free-text summary.
///
/// Matching is a case-insensitive substring search.
pub fn classify_priority(findings: &[String], summary: Option<&str>) -> Priority {
    let haystack: Vec<String> = findings
        .iter()
        .map(String::as_str)
        .chain(summary)
        .map(str::to_lowercase)
        .collect();

    PRIORITY_TIERS
        .iter()
        .find(|(_, keywords)| {
            keywords
                .iter()
                .any(|kw| haystack.iter().any(|text| text.contains(kw)))
        })
        .map(|(priority, _)| *priority)
        .unwrap_or(Priority::Routine)
}

/// Guess the imaging modality from an upload's filename.
pub fn infer_modality(filename: &str) -> &'static str {
    let lower = filename.to_lowercase();
    if lower.contains("mri") || lower.contains("magnetic") {
        "MRI"
    } else if lower.contains("ct") || lower.contains("computed") {
        "CT"
    } else if lower.contains("xray") || lower.contains("x-ray") {
        "X-Ray"
    } else if lower.contains("ultrasound") {
        "Ultrasound"
    } else {
        "Unknown"
    }
}

/// Mask a case id down to its last four characters.
fn mask_mrn(job_id: &str) -> String {
    let chars: Vec<char> = job_id.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("••••{}", tail)
}

/// Build a case record from a completed result payload.
pub fn materialize(job_id: &str, result: &AnalysisResult) -> CaseRecord {
    let priority = classify_priority(&result.findings, result.summary.as_deref());

    CaseRecord {
        case_id: job_id.to_string(),
        patient: PatientSummary {
            display: ANONYMOUS_PATIENT.to_string(),
            mrn_masked: mask_mrn(job_id),
        },
        modality: "Unknown".to_string(),
        body_part: UNKNOWN_BODY_PART.to_string(),
        study_date_time: None,
        priority,
        sla_minutes_remaining: priority.sla_minutes(),
        ai: AiSummary {
            model_version: result.model_version.clone(),
            confidence_top: result.confidence,
            findings: result.findings.clone(),
            summary: result.summary.clone(),
        },
        anonymized: true,
        job_id: job_id.to_string(),
    }
}

/// Build a case record from a tracked job, filling in upload metadata.
///
/// Returns `None` unless the job has completed with a result.
pub fn materialize_job(job: &TrackedJob) -> Option<CaseRecord> {
    if job.state != JobState::Completed {
        return None;
    }
    let result = job.result.as_ref()?;

    let mut case = materialize(&job.job_id, result);
    case.modality = infer_modality(&job.filename).to_string();
    case.study_date_time = Some(job.created_at);
    Some(case)
}
