//! OpenAI-compatible chat-completions client.

use async_trait::async_trait;
use feedpress_shared::{FeedpressError, OpenAiConfig, Result, read_secret};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Failure;

/// Generation requests can be slow; allow a full minute.
const GENERATION_TIMEOUT_SECS: u64 = 60;

/// A single-turn prompt.
#[derive(Debug, Clone, Default)]
pub struct Prompt {
    pub system: Option<String>,
    pub user: String,
    /// Ask the service for a JSON object reply.
    pub json_response: bool,
}

/// Text returned by a generator, with token usage.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

/// A language-generation service.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Model identifier, used as part of cache keys.
    fn model(&self) -> &str;

    async fn generate(&self, prompt: &Prompt) -> Result<Generation>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenAiGenerator {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiGenerator {
    pub fn new(api_key: &str, config: &OpenAiConfig) -> Result<Self> {
        Ok(Self {
            http: crate::build_http(GENERATION_TIMEOUT_SECS)?,
            api_key: api_key.to_string(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    /// Build a client with the key read from `config.api_key_env`.
    pub fn from_config(config: &OpenAiConfig) -> Result<Self> {
        let key = read_secret(&config.api_key_env)?;
        Self::new(&key, config)
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> Result<Generation> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &prompt.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &prompt.user,
        });

        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: prompt.json_response.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        debug!(model = %self.model, "chat completion request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Failure::Generation.from_send("chat completion", e))?;
        let response = Failure::Generation.check("chat completion", response).await?;
        let body: ChatResponse = Failure::Generation.json("chat completion", response).await?;

        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| FeedpressError::generation("chat completion returned no content"))?;

        let (tokens_in, tokens_out) = body
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(Generation {
            text,
            tokens_in,
            tokens_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> OpenAiGenerator {
        let config = OpenAiConfig {
            base_url: format!("{}/v1", server.uri()),
            ..OpenAiConfig::default()
        };
        OpenAiGenerator::new("sk-test", &config).unwrap()
    }

    #[tokio::test]
    async fn generate_returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4",
                "response_format": {"type": "json_object"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "{\"summary\":\"s\"}"}}],
                "usage": {"prompt_tokens": 120, "completion_tokens": 40}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let generation = client(&server)
            .generate(&Prompt {
                system: Some("You are an editor.".into()),
                user: "Rewrite this".into(),
                json_response: true,
            })
            .await
            .unwrap();
        assert_eq!(generation.text, "{\"summary\":\"s\"}");
        assert_eq!(generation.tokens_in, 120);
        assert_eq!(generation.tokens_out, 40);
    }

    #[tokio::test]
    async fn rate_limit_is_retryable_but_auth_is_not() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let generator = client(&server);
        let prompt = Prompt {
            user: "hi".into(),
            ..Prompt::default()
        };

        let err = generator.generate(&prompt).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("429"));

        let err = generator.generate(&prompt).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("bad key"));
    }

    #[tokio::test]
    async fn empty_choice_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .generate(&Prompt {
                user: "hi".into(),
                ..Prompt::default()
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no content"));
    }
}
