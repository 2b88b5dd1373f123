use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Reading-queue urgency derived from AI findings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Stat,
    Urgent,
    Routine,
}

impl Priority {
    /// Minutes a radiologist has to read a case of this priority.
    pub fn sla_minutes(self) -> u32 {
        match self {
            Priority::Stat => 30,
            Priority::Urgent => 60,
            Priority::Routine => 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientSummary {
    pub display: String,
    pub mrn_masked: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiSummary {
    pub model_version: String,
    /// Unrounded; see [`CaseRecord::confidence_display`].
    pub confidence_top: f64,
    pub findings: Vec<String>,
    pub summary: Option<String>,
}

/// Display-facing projection of a completed inference job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseRecord {
    pub case_id: String,
    pub patient: PatientSummary,
    pub modality: String,
    pub body_part: String,
    pub study_date_time: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub sla_minutes_remaining: u32,
    pub ai: AiSummary,
    pub anonymized: bool,
    pub job_id: String,
}

impl CaseRecord {
    /// Confidence as a percentage string with one decimal, for presentation.
    pub fn confidence_display(&self) -> String {
        format!("{:.1}%", self.ai.confidence_top * 100.0)
    }
}
