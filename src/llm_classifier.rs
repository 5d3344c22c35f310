//! LLM fallback classification stage.
//!
//! One chat-completion round trip per call: fixed prompt naming the two
//! candidate categories, category wrapped in `<category>` tags by the
//! model, tag extracted by regex. Every failure mode resolves to a label
//! rather than an error, so the dispatcher never sees an exception from
//! this stage. No retry, no backoff, no caching of repeated messages.

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::Config;
use crate::traits::{MessageClassifier, UNCLASSIFIED};

/// Fixed string returned when no API credential was configured. The stage
/// degrades without making a network call.
pub const NOT_INITIALIZED: &str = "Error: LLM client not initialized";

const GROQ_CHAT_COMPLETIONS_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const OPENAI_CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434";

const TEMPERATURE: f32 = 0.5;

static CATEGORY_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<category>(.*)</category>").expect("static tag pattern"));

pub struct LlmClassifier {
    provider: String,
    model: String,
    api_key: Option<String>,
    ollama_endpoint: String,
    http_client: reqwest::Client,
}

impl LlmClassifier {
    pub fn new(
        provider: String,
        model: String,
        api_key: Option<String>,
        ollama_endpoint: Option<String>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            provider,
            model,
            api_key,
            ollama_endpoint: ollama_endpoint
                .unwrap_or_else(|| DEFAULT_OLLAMA_ENDPOINT.to_string()),
            http_client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.llm_provider.clone(),
            config.llm_model.clone(),
            config.llm_api_key.clone(),
            config.ollama_endpoint.clone(),
            config.llm_timeout_secs,
        )
    }

    fn build_prompt(message: &str) -> String {
        format!(
            r#"Classify the log message into one of these categories:
(1) Workflow Error, (2) Deprecation Warning.
If you can't figure out a category, use "Unclassified".
Put the category inside <category> </category> tags.
Log message: {message}"#
        )
    }

    /// Extract the category between the tags, if the model produced them.
    fn extract_category(content: &str) -> Option<String> {
        CATEGORY_TAG
            .captures(content)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Map a completion outcome to a label. This is the only place the
    /// typed result is consumed; nothing past here handles errors.
    fn resolve_outcome(outcome: Result<String>) -> String {
        match outcome {
            Ok(content) => {
                Self::extract_category(&content).unwrap_or_else(|| UNCLASSIFIED.to_string())
            }
            Err(e) => {
                tracing::error!("LLM classification error: {}", e);
                UNCLASSIFIED.to_string()
            }
        }
    }

    /// Whether this client holds the credentials its provider needs.
    fn is_configured(&self) -> bool {
        match self.provider.as_str() {
            // Ollama is local and unauthenticated.
            "ollama" => true,
            _ => self.api_key.is_some(),
        }
    }

    /// Single completion round trip for the configured provider.
    async fn complete(&self, prompt: &str) -> Result<String> {
        match self.provider.as_str() {
            "groq" => self.call_openai_compat(GROQ_CHAT_COMPLETIONS_URL, prompt).await,
            "openai" => {
                self.call_openai_compat(OPENAI_CHAT_COMPLETIONS_URL, prompt)
                    .await
            }
            "ollama" => self.call_ollama(prompt).await,
            _ => anyhow::bail!("Unsupported provider: {}", self.provider),
        }
    }

    /// Groq and OpenAI share the OpenAI chat completions wire format.
    async fn call_openai_compat(&self, url: &str, prompt: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("API key not configured for {}", self.provider))?;

        let request_body = serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "user",
                    "content": prompt
                }
            ],
            "temperature": TEMPERATURE
        });

        let response = self
            .http_client
            .post(url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        let response_json: serde_json::Value = response.json().await?;

        if !status.is_success() {
            anyhow::bail!("{} API error: {}", self.provider, response_json);
        }

        if let Some(content) = response_json
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
        {
            Ok(content.to_string())
        } else {
            anyhow::bail!("No response content from {}", self.provider)
        }
    }

    async fn call_ollama(&self, prompt: &str) -> Result<String> {
        let request_body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": TEMPERATURE,
            }
        });

        let response = self
            .http_client
            .post(format!("{}/api/generate", self.ollama_endpoint))
            .json(&request_body)
            .send()
            .await?;

        let response_json: serde_json::Value = response.json().await?;

        if let Some(content) = response_json.get("response").and_then(|v| v.as_str()) {
            Ok(content.to_string())
        } else {
            anyhow::bail!("No response from Ollama")
        }
    }
}

#[async_trait]
impl MessageClassifier for LlmClassifier {
    async fn classify(&self, message: &str) -> String {
        if !self.is_configured() {
            return NOT_INITIALIZED.to_string();
        }

        let prompt = Self::build_prompt(message);
        Self::resolve_outcome(self.complete(&prompt).await)
    }

    fn name(&self) -> &str {
        "llm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_category_well_formed() {
        let content = "Sure. <category>Deprecation Warning</category>";
        assert_eq!(
            LlmClassifier::extract_category(content),
            Some("Deprecation Warning".to_string())
        );
    }

    #[test]
    fn test_extract_category_spans_lines() {
        // Reasoning models interleave commentary; the tag match is DOTALL.
        let content = "<think>\nThe log announces a retirement.\n</think>\n\n<category>Deprecation Warning</category>\n";
        assert_eq!(
            LlmClassifier::extract_category(content),
            Some("Deprecation Warning".to_string())
        );
    }

    #[test]
    fn test_extract_category_missing_tag() {
        assert_eq!(
            LlmClassifier::extract_category("I think this is a Workflow Error."),
            None
        );
    }

    #[test]
    fn test_resolve_tagged_content() {
        let outcome = Ok("<category>Workflow Error</category>".to_string());
        assert_eq!(LlmClassifier::resolve_outcome(outcome), "Workflow Error");
    }

    #[test]
    fn test_resolve_untagged_content() {
        let outcome = Ok("no tags here".to_string());
        assert_eq!(LlmClassifier::resolve_outcome(outcome), UNCLASSIFIED);
    }

    #[test]
    fn test_resolve_transport_error() {
        let outcome = Err(anyhow::anyhow!("connection reset"));
        assert_eq!(LlmClassifier::resolve_outcome(outcome), UNCLASSIFIED);
    }

    #[tokio::test]
    async fn test_unconfigured_client_degrades_without_network() {
        let classifier = LlmClassifier::new(
            "groq".to_string(),
            "deepseek-r1-distill-llama-70b".to_string(),
            None,
            None,
            1,
        );
        assert_eq!(classifier.classify("anything").await, NOT_INITIALIZED);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_degrades_to_sentinel() {
        // Nothing listens on this port; the request fails fast and the
        // failure must resolve to the sentinel, never an error.
        let classifier = LlmClassifier::new(
            "ollama".to_string(),
            "llama3".to_string(),
            None,
            Some("http://127.0.0.1:1".to_string()),
            1,
        );
        assert_eq!(classifier.classify("anything").await, UNCLASSIFIED);
    }

    #[test]
    fn test_prompt_names_both_categories_and_the_tag() {
        let prompt = LlmClassifier::build_prompt("Disk quota exceeded");
        assert!(prompt.contains("Workflow Error"));
        assert!(prompt.contains("Deprecation Warning"));
        assert!(prompt.contains("<category>"));
        assert!(prompt.contains("Disk quota exceeded"));
    }
}
