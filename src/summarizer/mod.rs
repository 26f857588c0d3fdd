//! Natural-language interpretation of analyzed batches.
//!
//! The summarizer is an untrusted text generator. Its raw output is
//! normalized by [`interpret_response`], which never fails: anything that
//! is not the expected JSON shape degrades to a plain-text summary.

pub mod prompt;

use crate::analysis::summary::{extract_json_object, Summary};
use crate::error::SummarizerError;
use crate::models::value_to_strings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Summary used when the response omits one.
pub const DEFAULT_SUMMARY: &str = "Analysis completed.";

/// Text generation capability.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Send a prompt and return the raw generated text.
    async fn invoke(&self, prompt: &str) -> Result<String, SummarizerError>;
}

/// Normalized summarizer output.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmAnalysis {
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub summary: Summary,
    /// False when the response could not be parsed and was kept as text.
    pub parsed: bool,
}

/// Interpret raw generated text.
pub fn interpret_response(raw: &str) -> LlmAnalysis {
    let Some(Value::Object(mut object)) = extract_json_object(raw) else {
        warn!("Summarizer response is not JSON, keeping raw text as summary");
        return LlmAnalysis {
            insights: Vec::new(),
            recommendations: Vec::new(),
            summary: Summary::Plain(raw.trim().to_string()),
            parsed: false,
        };
    };

    let insights = object
        .get("insights")
        .map(value_to_strings)
        .unwrap_or_default();
    let recommendations = object
        .get("recommendations")
        .map(value_to_strings)
        .unwrap_or_default();
    let summary = match object.remove("summary") {
        Some(Value::Null) | None => Summary::Plain(DEFAULT_SUMMARY.to_string()),
        Some(value) => Summary::from_value(value),
    };

    LlmAnalysis {
        insights,
        recommendations,
        summary,
        parsed: true,
    }
}

/// Connection settings for the Ollama summarizer.
#[derive(Debug, Clone)]
pub struct OllamaSettings {
    pub ollama_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            model_name: "llama3.2:latest".to_string(),
            temperature: 0.3,
            timeout_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    format: &'static str,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
    #[serde(default)]
    eval_count: Option<u64>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
}

/// Summarizer backed by a local Ollama server.
pub struct OllamaSummarizer {
    settings: OllamaSettings,
    http_client: reqwest::Client,
}

impl OllamaSummarizer {
    pub fn new(settings: OllamaSettings) -> Result<Self, SummarizerError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .map_err(|e| SummarizerError::Request(e.to_string()))?;

        info!(
            "Summarizer using model {} at {}",
            settings.model_name, settings.ollama_url
        );

        Ok(Self {
            settings,
            http_client,
        })
    }
}

#[async_trait]
impl Summarizer for OllamaSummarizer {
    async fn invoke(&self, prompt: &str) -> Result<String, SummarizerError> {
        let url = format!("{}/api/chat", self.settings.ollama_url.trim_end_matches('/'));

        let request = OllamaChatRequest {
            model: self.settings.model_name.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: prompt::SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            stream: false,
            format: "json",
            options: OllamaOptions {
                temperature: self.settings.temperature,
            },
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SummarizerError::Timeout(self.settings.timeout_seconds)
                } else if e.is_connect() {
                    SummarizerError::Connect(self.settings.ollama_url.clone())
                } else {
                    SummarizerError::Request(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SummarizerError::Api { status, body });
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| SummarizerError::InvalidResponse(e.to_string()))?;

        debug!(
            prompt_tokens = chat_response.prompt_eval_count.unwrap_or(0),
            completion_tokens = chat_response.eval_count.unwrap_or(0),
            "summarizer_usage"
        );

        Ok(chat_response.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpret_plain_json() {
        let raw = r#"{"insights": ["HR stable"], "recommendations": ["Hydrate"], "summary": "All good"}"#;
        let analysis = interpret_response(raw);

        assert!(analysis.parsed);
        assert_eq!(analysis.insights, vec!["HR stable"]);
        assert_eq!(analysis.recommendations, vec!["Hydrate"]);
        assert_eq!(analysis.summary.text(), "All good");
    }

    #[test]
    fn test_interpret_fenced_json_with_structured_summary() {
        let raw = "```json\n{\"insights\": [], \"summary\": {\"health_status\": \"stable\", \"key_findings\": {\"hr\": \"normal\"}}}\n```";
        let analysis = interpret_response(raw);

        assert!(analysis.parsed);
        assert!(analysis.recommendations.is_empty());
        assert_eq!(analysis.summary.text(), "stable Key findings: normal");
    }

    #[test]
    fn test_missing_summary_defaults() {
        let analysis = interpret_response(r#"{"insights": [{"metric": "hr"}]}"#);
        assert_eq!(analysis.summary.text(), DEFAULT_SUMMARY);
        assert_eq!(analysis.insights, vec![r#"{"metric":"hr"}"#]);
    }

    #[test]
    fn test_unparseable_response_degrades() {
        let analysis = interpret_response("The patient looks fine overall.");
        assert!(!analysis.parsed);
        assert!(analysis.insights.is_empty());
        assert!(analysis.recommendations.is_empty());
        assert_eq!(analysis.summary.text(), "The patient looks fine overall.");
    }

    #[test]
    fn test_settings_default() {
        let settings = OllamaSettings::default();
        assert_eq!(settings.model_name, "llama3.2:latest");
        assert!(OllamaSummarizer::new(settings).is_ok());
    }

    #[tokio::test]
    async fn test_connect_failure_is_typed() {
        let summarizer = OllamaSummarizer::new(OllamaSettings {
            ollama_url: "http://127.0.0.1:9".to_string(),
            timeout_seconds: 5,
            ..OllamaSettings::default()
        })
        .unwrap();

        let err = summarizer.invoke("hi").await.unwrap_err();
        assert!(matches!(
            err,
            SummarizerError::Connect(_) | SummarizerError::Request(_) | SummarizerError::Timeout(_)
        ));
    }
}
