//! Anthropic Messages API as an [`AiProvider`]

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{AiError, AiProvider};
use crate::models::{AiRequest, AiResponse};
use crate::server::config::AnthropicConfig;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: i32 = 1024;

pub const PROVIDER_NAME: &str = "claude";

#[derive(Debug, Serialize)]
struct ClaudeApiRequest<'a> {
    model: &'a str,
    max_tokens: i32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeApiResponse {
    content: Vec<ContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: i64,
    output_tokens: i64,
}

#[derive(Debug, Deserialize)]
struct ClaudeError {
    error: ClaudeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ClaudeErrorDetail {
    message: String,
}

/// Claude-backed provider
pub struct ClaudeProvider {
    client: Client,
    api_key: String,
    model: String,
    cost_per_token: f64,
    base_url: String,
}

impl ClaudeProvider {
    pub fn new(config: &AnthropicConfig, client: Client) -> Self {
        Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            cost_per_token: config.cost_per_token,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn error(&self, message: impl Into<String>) -> AiError {
        AiError::Provider {
            provider: PROVIDER_NAME.to_string(),
            message: message.into(),
        }
    }

    fn prompt(request: &AiRequest) -> String {
        match &request.context {
            Value::Null => request.query.clone(),
            Value::Object(map) if map.is_empty() => request.query.clone(),
            context => format!("{}\n\nContext:\n{}", request.query, context),
        }
    }
}

#[async_trait]
impl AiProvider for ClaudeProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn call(&self, request: &AiRequest) -> Result<AiResponse, AiError> {
        let body = ClaudeApiRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            messages: vec![Message {
                role: "user",
                content: Self::prompt(request),
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.error(format!("network error: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.error(format!("network error: {e}")))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ClaudeError>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(self.error(format!("HTTP {}: {}", status.as_u16(), message)));
        }

        let api_response: ClaudeApiResponse = serde_json::from_str(&text)
            .map_err(|e| self.error(format!("unparseable response: {e}")))?;

        let answer = api_response
            .content
            .iter()
            .filter(|block| block.content_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        let tokens = api_response.usage.input_tokens + api_response.usage.output_tokens;
        let mut payload = Map::new();
        payload.insert("text".to_string(), Value::String(answer));
        payload.insert("model".to_string(), Value::String(api_response.model));
        if let Some(reason) = api_response.stop_reason {
            payload.insert("stop_reason".to_string(), Value::String(reason));
        }

        Ok(AiResponse::new(PROVIDER_NAME, tokens, tokens as f64 * self.cost_per_token)
            .with_payload(payload))
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn cost_per_token(&self) -> f64 {
        self.cost_per_token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AiPriority;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base_url: &str) -> ClaudeProvider {
        let config = AnthropicConfig {
            api_key: "sk-test".into(),
            model: "claude-test".into(),
            cost_per_token: 0.001,
        };
        ClaudeProvider::new(&config, Client::new()).with_base_url(base_url)
    }

    fn request() -> AiRequest {
        AiRequest {
            tenant_id: "t1".into(),
            query: "Summarise the last call".into(),
            context: json!({"call_id": "c1"}),
            priority: AiPriority::Normal,
        }
    }

    #[tokio::test]
    async fn test_call_reports_tokens_and_cost() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_1",
                "model": "claude-test",
                "stop_reason": "end_turn",
                "content": [{"type": "text", "text": "Customer asked for a callback."}],
                "usage": {"input_tokens": 30, "output_tokens": 20}
            })))
            .mount(&server)
            .await;

        let response = provider(&server.uri()).call(&request()).await.unwrap();
        assert_eq!(response.provider, "claude");
        assert_eq!(response.tokens_used, 50);
        assert!((response.cost - 0.05).abs() < 1e-9);
        assert_eq!(response.payload["text"], "Customer asked for a callback.");
    }

    #[tokio::test]
    async fn test_api_error_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"type": "rate_limit_error", "message": "slow down"}
            })))
            .mount(&server)
            .await;

        match provider(&server.uri()).call(&request()).await {
            Err(AiError::Provider { provider, message }) => {
                assert_eq!(provider, "claude");
                assert!(message.contains("429"));
                assert!(message.contains("slow down"));
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[test]
    fn test_prompt_appends_context_only_when_present() {
        let mut req = request();
        assert!(ClaudeProvider::prompt(&req).contains("call_id"));
        req.context = Value::Null;
        assert_eq!(ClaudeProvider::prompt(&req), "Summarise the last call");
    }
}
