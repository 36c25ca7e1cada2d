use anyhow::{anyhow, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Active,
    Archived,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Active => "active",
            JobStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(JobStatus::Active),
            "archived" => Ok(JobStatus::Archived),
            other => Err(anyhow!("Unknown job status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub company: String,
    pub title: String,
    pub location: Option<String>,
    pub description: Option<String>,
    pub skills_raw: Option<String>, // last extractor response, verbatim JSON
    pub url: Option<String>,
    pub posted_date: Option<NaiveDate>,
    pub deadline: Option<NaiveDate>,
    pub scraped_at: NaiveDateTime,
    pub status: JobStatus,
    pub source_platform: Option<String>, // "linkedin", "manual", etc.
    pub raw_html: Option<String>,
}

/// Upsert payload. `None` optional fields leave the stored value untouched on update.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub company: String,
    pub title: String,
    pub location: Option<String>,
    pub description: Option<String>,
    pub skills_raw: Option<String>,
    pub url: Option<String>,
    pub posted_date: Option<NaiveDate>,
    pub deadline: Option<NaiveDate>,
    pub status: Option<JobStatus>,
    pub source_platform: Option<String>,
    pub raw_html: Option<String>,
}

impl NewJob {
    pub fn new(company: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            company: company.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    /// URL usable as an identity key; blank strings count as absent.
    pub fn canonical_url(&self) -> Option<&str> {
        self.url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }
}

/// One job card as parsed off the search results page.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedJob {
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub posted_date: Option<NaiveDate>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub raw_html: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub keywords: String,
    pub location: String,
    pub job_type: Option<String>,
    pub max_results: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: i64,
    pub skill_name: String,
    pub category: Option<String>,
    pub frequency: i64,
    pub priority: i64,
}

/// Skills pulled from one description, plus the model output they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub skills: Vec<String>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub job_id: i64,
    pub job_title: Option<String>, // denormalized for convenience
    pub company: Option<String>,
    pub applied_date: Option<NaiveDate>,
    pub status: String, // "applied", "interview", "offer", "rejected", ...
    pub notes: Option<String>,
    pub last_updated: NaiveDateTime,
}

/// Free-text filters over the active job list, shared by `list` and `browse`.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub search: Option<String>,
    pub location: Option<String>,
    pub sources: Vec<String>,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        if let Some(search) = normalized(self.search.as_deref()) {
            if !job.title.to_lowercase().contains(&search)
                && !job.company.to_lowercase().contains(&search)
            {
                return false;
            }
        }

        if let Some(location) = normalized(self.location.as_deref()) {
            let job_location = job.location.as_deref().unwrap_or("").to_lowercase();
            if !job_location.contains(&location) {
                return false;
            }
        }

        if !self.sources.is_empty() {
            let source = job.source_label();
            if !self.sources.iter().any(|s| s.eq_ignore_ascii_case(source)) {
                return false;
            }
        }

        true
    }

    pub fn apply(&self, jobs: Vec<Job>) -> Vec<Job> {
        jobs.into_iter().filter(|job| self.matches(job)).collect()
    }
}

impl Job {
    pub fn source_label(&self) -> &str {
        self.source_platform
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or("Unknown")
    }
}

fn normalized(value: Option<&str>) -> Option<String> {
    value
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
}
