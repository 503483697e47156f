use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AiError, AiResult};
use crate::retry::with_retry;

/// Completion providers the platform speaks to. All share the
/// OpenAI-compatible chat completions wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    Groq,
    Qwen,
    DeepSeek,
    Custom,
}

impl ModelProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelProvider::Groq => "groq",
            ModelProvider::Qwen => "qwen",
            ModelProvider::DeepSeek => "deepseek",
            ModelProvider::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "groq" => Some(ModelProvider::Groq),
            "qwen" => Some(ModelProvider::Qwen),
            "deepseek" => Some(ModelProvider::DeepSeek),
            "custom" => Some(ModelProvider::Custom),
            _ => None,
        }
    }

    /// Chat completions endpoint. Custom providers supply their own URL.
    pub fn default_url(&self) -> Option<&'static str> {
        match self {
            ModelProvider::Groq => Some("https://api.groq.com/openai/v1/chat/completions"),
            ModelProvider::Qwen => {
                Some("https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions")
            }
            ModelProvider::DeepSeek => Some("https://api.deepseek.com/v1/chat/completions"),
            ModelProvider::Custom => None,
        }
    }

    pub fn default_model(&self) -> Option<&'static str> {
        match self {
            ModelProvider::Groq => Some("llama-3.3-70b-versatile"),
            ModelProvider::Qwen => Some("qwen-plus"),
            ModelProvider::DeepSeek => Some("deepseek-chat"),
            ModelProvider::Custom => None,
        }
    }
}

/// Text-in/text-out completion over a pluggable provider.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Complete a system+user prompt pair into raw model text.
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> AiResult<String>;

    /// Model identifier for logging.
    fn model_label(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Shared connection-pooled HTTP client for all completion providers.
///
/// Owned at the application root and cloned into each provider client.
pub fn shared_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(2)
        .build()
        .expect("Failed to create shared AI HTTP client")
}

/// HTTP-backed [`CompletionClient`] speaking OpenAI-compatible chat JSON.
///
/// Requests carry `temperature=0.5` and `max_tokens=4000`; the JSON shape of
/// the reply is enforced by the prompt and tolerant parsing downstream, never
/// by `response_format`.
#[derive(Clone)]
pub struct HttpCompletionClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl HttpCompletionClient {
    pub fn new(
        client: reqwest::Client,
        provider: ModelProvider,
        api_key: String,
        url: Option<String>,
        model: Option<String>,
    ) -> AiResult<Self> {
        let url = url
            .or_else(|| provider.default_url().map(str::to_string))
            .ok_or_else(|| {
                AiError::InvalidResponse("custom provider requires a url".to_string())
            })?;
        let model = model
            .or_else(|| provider.default_model().map(str::to_string))
            .ok_or_else(|| {
                AiError::InvalidResponse("custom provider requires a model name".to_string())
            })?;
        Ok(Self {
            client,
            url,
            api_key,
            model,
        })
    }

    /// Larger models get a longer request deadline.
    fn request_timeout(&self) -> Duration {
        if self.model.contains("70b") {
            Duration::from_secs(180)
        } else {
            Duration::from_secs(120)
        }
    }

    async fn complete_once(&self, system_prompt: &str, user_prompt: &str) -> AiResult<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: 0.5,
            max_tokens: 4000,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .timeout(self.request_timeout())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::ProviderStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = response.json::<ChatResponse>().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(AiError::EmptyCompletion);
        }
        Ok(content)
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> AiResult<String> {
        with_retry(&self.model, || {
            self.complete_once(system_prompt, user_prompt)
        })
        .await
    }

    fn model_label(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_providers_have_defaults() {
        for provider in [ModelProvider::Groq, ModelProvider::Qwen, ModelProvider::DeepSeek] {
            assert!(provider.default_url().is_some());
            assert!(provider.default_model().is_some());
        }
        assert!(ModelProvider::Custom.default_url().is_none());
    }

    #[test]
    fn custom_provider_requires_url_and_model() {
        let client = HttpCompletionClient::new(
            reqwest::Client::new(),
            ModelProvider::Custom,
            "key".to_string(),
            None,
            Some("my-model".to_string()),
        );
        assert!(client.is_err());

        let client = HttpCompletionClient::new(
            reqwest::Client::new(),
            ModelProvider::Custom,
            "key".to_string(),
            Some("https://llm.internal/v1/chat/completions".to_string()),
            None,
        );
        assert!(client.is_err());
    }

    #[test]
    fn large_models_get_longer_deadline() {
        let small = HttpCompletionClient::new(
            reqwest::Client::new(),
            ModelProvider::DeepSeek,
            "key".to_string(),
            None,
            None,
        )
        .unwrap();
        assert_eq!(small.request_timeout(), Duration::from_secs(120));

        let large = HttpCompletionClient::new(
            reqwest::Client::new(),
            ModelProvider::Groq,
            "key".to_string(),
            None,
            Some("llama-3.3-70b-versatile".to_string()),
        )
        .unwrap();
        assert_eq!(large.request_timeout(), Duration::from_secs(180));
    }
}
