use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::env;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{LlmConfig, ProviderKind};
use crate::models::ExtractionResult;

// --- Provider trait ---

/// A chat model that can be asked for a JSON object.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete_json(&self, prompt: &str) -> Result<String>;
    fn model_name(&self) -> &str;
}

pub fn create_provider(config: &LlmConfig) -> Result<Box<dyn LlmProvider>> {
    match config.provider {
        ProviderKind::Ollama => Ok(Box::new(OllamaProvider::new(
            config.base_url.clone(),
            config.model.clone(),
            config.request_timeout,
        )?)),
        ProviderKind::OpenAI => Ok(Box::new(OpenAIProvider::new(
            config.model.clone(),
            config.request_timeout,
        )?)),
    }
}

#[async_trait]
impl<P: LlmProvider + ?Sized> LlmProvider for Box<P> {
    async fn complete_json(&self, prompt: &str) -> Result<String> {
        (**self).complete_json(prompt).await
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// Every request is bounded by `timeout`, connect through body.
fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build LLM HTTP client")
}

// --- Ollama provider ---

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<ChatMessage>,
    format: &'static str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: Option<OllamaResponseMessage>,
}

#[derive(Debug)]
pub struct OllamaProvider {
    base_url: String,
    model_id: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(base_url: String, model_id: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model_id,
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn complete_json(&self, prompt: &str) -> Result<String> {
        let request = OllamaRequest {
            model: self.model_id.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            format: "json",
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Ollama request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: OllamaResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        api_response
            .message
            .map(|m| m.content)
            .ok_or_else(|| anyhow!("No message in Ollama response"))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- OpenAI provider ---

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug)]
pub struct OpenAIProvider {
    api_key: String,
    model_id: String,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(model_id: String, timeout: Duration) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set. Set it with: export OPENAI_API_KEY=your-key-here")?;
        let client = build_client(timeout)?;
        Ok(Self { api_key, model_id, client })
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    async fn complete_json(&self, prompt: &str) -> Result<String> {
        let request = OpenAIRequest {
            model: self.model_id.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let response = self
            .client
            .post(OPENAI_API_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to OpenAI API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "OpenAI API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: OpenAIResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI API response")?;

        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("No choices in OpenAI API response"))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Skill extraction ---

const SKILL_PROMPT: &str = "Extract technical skills from this job description. \
     Return JSON {skills: [list of strings]}.";

pub struct SkillExtractor<P> {
    provider: P,
}

impl<P: LlmProvider> SkillExtractor<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    #[cfg(test)]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Asks the model for the description's skills. `None` means "try again
    /// later": blank input, a failed call, or a response of the wrong shape.
    pub async fn extract(&self, description: &str) -> Option<ExtractionResult> {
        let description = description.trim();
        if description.is_empty() {
            return None;
        }

        let prompt = format!("{SKILL_PROMPT}\n\nJob description:\n{description}");
        let response = match self.provider.complete_json(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(model = self.provider.model_name(), error = %e, "LLM request failed");
                return None;
            }
        };

        let raw: Value = match serde_json::from_str(&response) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "LLM returned invalid JSON");
                return None;
            }
        };

        let Some(items) = raw.get("skills").and_then(Value::as_array) else {
            warn!("LLM response missing skills list");
            return None;
        };

        let skills = normalize_skills(items);
        debug!(count = skills.len(), "extracted skills");
        Some(ExtractionResult { skills, raw })
    }
}

/// Trims and lower-cases string entries, dropping non-strings, blanks and repeats.
pub fn normalize_skills(items: &[Value]) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter_map(Value::as_str)
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replays canned responses and records every prompt it receives.
    pub struct ScriptedProvider {
        pub responses: Mutex<Vec<Result<String>>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        pub fn new(responses: Vec<Result<String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn always(response: &str) -> Self {
            Self::new((0..16).map(|_| Ok(response.to_string())).collect())
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn complete_json(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(anyhow!("no scripted response left"));
            }
            responses.remove(0)
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    #[test]
    fn test_normalize_skills_folds_case_and_dedups() {
        let items = vec![json!("Python"), json!("python"), json!(" SQL ")];
        assert_eq!(normalize_skills(&items), vec!["python", "sql"]);
    }

    #[test]
    fn test_normalize_skills_drops_non_strings_and_blanks() {
        let items = vec![json!(42), json!("  "), json!(null), json!("Rust"), json!({"name": "go"})];
        assert_eq!(normalize_skills(&items), vec!["rust"]);
    }

    #[tokio::test]
    async fn test_extract_returns_normalized_skills_and_raw() {
        let provider = ScriptedProvider::always(r#"{"skills": ["Python", "python", " SQL "]}"#);
        let extractor = SkillExtractor::new(provider);

        let result = extractor.extract("We need Python and SQL").await.unwrap();
        assert_eq!(result.skills, vec!["python", "sql"]);
        assert_eq!(result.raw, json!({"skills": ["Python", "python", " SQL "]}));

        let prompts = extractor.provider.prompts.lock().unwrap();
        assert!(prompts[0].starts_with("Extract technical skills"));
        assert!(prompts[0].ends_with("We need Python and SQL"));
    }

    #[tokio::test]
    async fn test_extract_blank_description_skips_model() {
        let extractor = SkillExtractor::new(ScriptedProvider::always(r#"{"skills": []}"#));
        assert!(extractor.extract("   \n ").await.is_none());
        assert_eq!(extractor.provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_extract_degrades_to_none_on_bad_responses() {
        let provider = ScriptedProvider::new(vec![
            Err(anyhow!("connection refused")),
            Ok("not json".to_string()),
            Ok(r#"{"tools": ["rust"]}"#.to_string()),
            Ok(r#"{"skills": "rust"}"#.to_string()),
        ]);
        let extractor = SkillExtractor::new(provider);

        for _ in 0..4 {
            assert!(extractor.extract("Rust developer").await.is_none());
        }
        assert_eq!(extractor.provider.calls(), 4);
    }

    #[test]
    fn test_openai_provider_requires_api_key() {
        let original = env::var("OPENAI_API_KEY").ok();
        unsafe { env::remove_var("OPENAI_API_KEY"); }

        let result = OpenAIProvider::new("gpt-4o-mini".to_string(), Duration::from_secs(5));

        if let Some(val) = original {
            unsafe { env::set_var("OPENAI_API_KEY", val); }
        }

        assert!(result.is_err());
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("OPENAI_API_KEY"));
    }

    #[tokio::test]
    async fn test_unresponsive_model_server_times_out() {
        // Accepts connections and never writes a byte back.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let provider = OllamaProvider::new(
            format!("http://{}", addr),
            "llama3".to_string(),
            Duration::from_millis(300),
        )
        .unwrap();
        let extractor = SkillExtractor::new(provider);

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            extractor.extract("Rust developer"),
        )
        .await
        .expect("extract should give up once the request timeout passes");
        assert!(result.is_none());
    }

    #[test]
    fn test_ollama_provider_trims_base_url() {
        let provider = OllamaProvider::new(
            "http://localhost:11434/".to_string(),
            "llama3".to_string(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(provider.base_url, "http://localhost:11434");
        assert_eq!(provider.model_name(), "llama3");
    }
}
