use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const NOTES_MAX_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum JobStatus {
    #[default]
    Inbox,
    Applied,
    Interview,
    Offer,
    Rejected,
    Hidden,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Inbox,
        JobStatus::Applied,
        JobStatus::Interview,
        JobStatus::Offer,
        JobStatus::Rejected,
        JobStatus::Hidden,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Inbox => "Inbox",
            JobStatus::Applied => "Applied",
            JobStatus::Interview => "Interview",
            JobStatus::Offer => "Offer",
            JobStatus::Rejected => "Rejected",
            JobStatus::Hidden => "Hidden",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "Unknown status '{}'. Expected one of: inbox, applied, interview, offer, rejected, hidden",
                    s
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchLabel {
    High,
    Medium,
    Low,
}

impl fmt::Display for MatchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchLabel::High => "high",
            MatchLabel::Medium => "medium",
            MatchLabel::Low => "low",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobLevel {
    Internship,
    Junior,
    #[serde(rename = "Mid-Level")]
    MidLevel,
    Senior,
    Leadership,
}

impl fmt::Display for JobLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobLevel::Internship => "Internship",
            JobLevel::Junior => "Junior",
            JobLevel::MidLevel => "Mid-Level",
            JobLevel::Senior => "Senior",
            JobLevel::Leadership => "Leadership",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub strength: String,
    pub risk: String,
    pub suggestion: String,
}

/// Match analysis as returned by the remote analysis endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub match_score: u8,
    pub match_label: MatchLabel,
    pub explanation: Explanation,
    pub gap_analysis: Vec<String>,
    pub tailored_bullets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedAnalysis {
    pub analysis: Analysis,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub job_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageContent {
    pub page_title: String,
    pub page_url: String,
    pub main_text: String,
    pub company: String,
    pub job_level: Option<JobLevel>,
    pub extracted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub role_title: String,
    #[serde(default)]
    pub page_title: String,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_label: Option<MatchLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<Explanation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap_analysis: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tailored_bullets: Option<Vec<String>>,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

impl JobRecord {
    /// Title shown on the board: role title, else the page title.
    pub fn display_title(&self) -> &str {
        if self.role_title.is_empty() {
            &self.page_title
        } else {
            &self.role_title
        }
    }
}

/// Input to a tracker save. Only `url` is required; fields left as `None`
/// keep whatever an existing record for the same URL already holds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEntry {
    pub url: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub role_title: Option<String>,
    #[serde(default)]
    pub page_title: Option<String>,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub match_score: Option<u8>,
    #[serde(default)]
    pub match_label: Option<MatchLabel>,
    #[serde(default)]
    pub explanation: Option<Explanation>,
    #[serde(default)]
    pub gap_analysis: Option<Vec<String>>,
    #[serde(default)]
    pub tailored_bullets: Option<Vec<String>>,
}

impl JobEntry {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub role_title: Option<String>,
}

pub fn cap_notes(notes: &str) -> String {
    notes.chars().take(NOTES_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!("interview".parse::<JobStatus>().unwrap(), JobStatus::Interview);
        assert_eq!(" HIDDEN ".parse::<JobStatus>().unwrap(), JobStatus::Hidden);
        assert!("closed".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_job_level_serializes_with_hyphen() {
        let json = serde_json::to_string(&JobLevel::MidLevel).unwrap();
        assert_eq!(json, "\"Mid-Level\"");
        assert_eq!(JobLevel::MidLevel.to_string(), "Mid-Level");
    }

    #[test]
    fn test_job_record_uses_camel_case_keys() {
        let now = Utc::now();
        let record = JobRecord {
            id: "abc-1".into(),
            url: "https://example.com/job".into(),
            company: "Acme".into(),
            role_title: "Engineer".into(),
            page_title: String::new(),
            status: JobStatus::Applied,
            notes: String::new(),
            match_score: Some(80),
            match_label: Some(MatchLabel::High),
            explanation: None,
            gap_analysis: None,
            tailored_bullets: None,
            created_at_utc: now,
            updated_at_utc: now,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["roleTitle"], "Engineer");
        assert_eq!(value["matchLabel"], "high");
        assert_eq!(value["status"], "Applied");
        assert!(value.get("createdAtUtc").is_some());
        assert!(value.get("explanation").is_none());
    }

    #[test]
    fn test_cap_notes_counts_chars() {
        let long = "é".repeat(NOTES_MAX_CHARS + 10);
        assert_eq!(cap_notes(&long).chars().count(), NOTES_MAX_CHARS);
        assert_eq!(cap_notes("short"), "short");
        assert_eq!(cap_notes(&"n".repeat(501)).len(), 500);
    }
}
