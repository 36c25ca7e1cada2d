use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::db::Database;
use crate::models::SearchQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Ollama,
    OpenAI,
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(ProviderKind::Ollama),
            "openai" => Ok(ProviderKind::OpenAI),
            other => Err(anyhow!(
                "Unknown LLM provider '{}'. Available: ollama (default), openai",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    pub base_url: String,
    pub model: String,
    pub request_timeout: Duration,
}

/// Random pause taken before each request: uniform in `[min, max]`, or exactly `min`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Option<Duration>,
}

impl DelayRange {
    pub fn between(min_secs: f64, max_secs: f64) -> Self {
        Self {
            min: Duration::from_secs_f64(min_secs),
            max: Some(Duration::from_secs_f64(max_secs)),
        }
    }

    pub const fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub query: SearchQuery,
    pub search_delay: DelayRange,
    pub detail_delay: DelayRange,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub hour: u32,
    pub minute: u32,
}

/// Everything the composition root hands to the components.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub llm: LlmConfig,
    pub scrape: ScrapeConfig,
    pub schedule: ScheduleConfig,
    pub enrich_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: Database::default_path(),
            llm: LlmConfig {
                provider: ProviderKind::Ollama,
                base_url: "http://localhost:11434".to_string(),
                model: "llama3".to_string(),
                request_timeout: Duration::from_secs(120),
            },
            scrape: ScrapeConfig {
                query: SearchQuery {
                    keywords: "Python".to_string(),
                    location: "Remote".to_string(),
                    job_type: None,
                    max_results: None,
                },
                search_delay: DelayRange::between(1.0, 3.0),
                detail_delay: DelayRange::between(2.0, 5.0),
                request_timeout: Duration::from_secs(30),
            },
            schedule: ScheduleConfig { hour: 8, minute: 0 },
            enrich_limit: 25,
        }
    }
}

impl Config {
    /// Defaults, overridden by environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let mut config = Self::default();

        if let Ok(path) = env::var("JOBTRACK_DB") {
            config.database_path = PathBuf::from(path);
        }
        if let Ok(provider) = env::var("LLM_PROVIDER") {
            config.llm.provider = provider.parse()?;
            if config.llm.provider == ProviderKind::OpenAI {
                config.llm.model = "gpt-4o-mini".to_string();
            }
        }
        if let Ok(host) = env::var("OLLAMA_HOST") {
            config.llm.base_url = host;
        }
        let model_var = match config.llm.provider {
            ProviderKind::Ollama => "OLLAMA_MODEL",
            ProviderKind::OpenAI => "OPENAI_MODEL",
        };
        if let Ok(model) = env::var(model_var) {
            config.llm.model = model;
        }
        if let Some(secs) = parse_var::<u64>("LLM_TIMEOUT_SECS")? {
            config.llm.request_timeout = Duration::from_secs(secs);
        }
        if let Ok(keywords) = env::var("SCRAPE_KEYWORDS") {
            config.scrape.query.keywords = keywords;
        }
        if let Ok(location) = env::var("SCRAPE_LOCATION") {
            config.scrape.query.location = location;
        }
        if let Some(limit) = parse_var::<usize>("ENRICH_LIMIT")? {
            config.enrich_limit = limit;
        }
        if let Some(hour) = parse_var::<u32>("SCHEDULE_HOUR")? {
            config.schedule.hour = hour;
        }
        if let Some(minute) = parse_var::<u32>("SCHEDULE_MINUTE")? {
            config.schedule.minute = minute;
        }

        Ok(config)
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{} must be a valid number", name)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("ollama".parse::<ProviderKind>().unwrap(), ProviderKind::Ollama);
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAI);
        assert!("gpt-3".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.llm.model, "llama3");
        assert_eq!(config.llm.request_timeout, Duration::from_secs(120));
        assert_eq!(config.schedule, ScheduleConfig { hour: 8, minute: 0 });
        assert_eq!(config.scrape.query.keywords, "Python");
        assert_eq!(config.scrape.query.location, "Remote");
        assert_eq!(config.scrape.search_delay.min, Duration::from_secs(1));
        assert_eq!(config.scrape.search_delay.max, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_parse_var_rejects_garbage() {
        unsafe { env::set_var("JOBTRACK_TEST_LIMIT", "ten"); }
        let result = parse_var::<usize>("JOBTRACK_TEST_LIMIT");
        unsafe { env::remove_var("JOBTRACK_TEST_LIMIT"); }

        let err = result.unwrap_err().to_string();
        assert!(err.contains("JOBTRACK_TEST_LIMIT"));
        assert!(parse_var::<usize>("JOBTRACK_TEST_UNSET").unwrap().is_none());
    }
}
