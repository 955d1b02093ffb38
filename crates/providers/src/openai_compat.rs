//! OpenAI-compatible provider implementation.
//!
//! Works with any endpoint exposing `/chat/completions` in the OpenAI wire
//! format, including Gemini's OpenAI compatibility layer, OpenAI itself,
//! OpenRouter, and local servers.
//!
//! Every failure is classified here, at the client boundary, into one of
//! the three [`ProviderError`] variants. Nothing above this module looks
//! at HTTP status codes or `reqwest` error kinds.

use async_trait::async_trait;
use opsdesk_core::error::ProviderError;
use opsdesk_core::message::{Message, Role};
use opsdesk_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a provider sharing an existing HTTP client (one pool for all tiers).
    pub fn with_client(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                },
                content: Some(m.content.clone()),
            })
            .collect()
    }
}

/// Map a non-200 HTTP exchange to a classified error.
///
/// - 429, or any 4xx whose body reports an exhausted quota → `QuotaExceeded`
/// - 408 and 5xx → `Transient`
/// - everything else (400, 401, 403, 404, ...) → `NonRetryable`
pub fn classify_status(status: u16, body: &str, retry_after_secs: Option<u64>) -> ProviderError {
    let lower = body.to_lowercase();
    let mentions_quota = lower.contains("resource_exhausted") || lower.contains("quota");

    if status == 429 || ((400..500).contains(&status) && mentions_quota) {
        return ProviderError::QuotaExceeded {
            retry_after_secs,
            message: format!("HTTP {status}: {}", excerpt(body)),
        };
    }

    if status == 408 || status >= 500 {
        return ProviderError::Transient(format!("HTTP {status}: {}", excerpt(body)));
    }

    let message = match status {
        401 | 403 => "Invalid API key or insufficient permissions".to_string(),
        _ => excerpt(body),
    };
    ProviderError::NonRetryable {
        status_code: Some(status),
        message,
    }
}

/// Map a transport-level failure to a classified error.
fn classify_transport(err: &reqwest::Error) -> ProviderError {
    if err.is_builder() {
        ProviderError::rejected(format!("Could not build request: {err}"))
    } else {
        // Connect, timeout, reset, body read: all worth another try.
        ProviderError::Transient(err.to_string())
    }
}

fn excerpt(body: &str) -> String {
    const MAX: usize = 300;
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(MAX).collect();
        format!("{cut}...")
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

#[async_trait]
impl opsdesk_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": false,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status().as_u16();

        if status != 200 {
            let retry_after = parse_retry_after(response.headers());
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, "Provider returned error");
            return Err(classify_status(status, &error_body, retry_after));
        }

        let text = response.text().await.map_err(|e| classify_transport(&e))?;
        let api_response: ApiResponse = serde_json::from_str(&text).map_err(|e| {
            ProviderError::NonRetryable {
                status_code: Some(200),
                message: format!("Failed to parse response: {e}"),
            }
        })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Transient("No choices in response".into()))?;

        let message = Message::assistant(choice.message.content.unwrap_or_default());

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ProviderResponse {
            message,
            usage,
            model: api_response.model.unwrap_or(request.model),
        })
    }
}

// --- OpenAI API types ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsdesk_core::ErrorClass;
    use opsdesk_core::Provider;
    use std::time::Duration;

    fn provider(base_url: &str) -> OpenAiCompatProvider {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        OpenAiCompatProvider::with_client("local", base_url, "key", client)
    }

    #[test]
    fn trailing_slash_trimmed() {
        let provider = provider("http://localhost:8080/v1/");
        assert_eq!(provider.name(), "local");
        assert_eq!(provider.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::system("You are helpful"), Message::user("Hello")];
        let api_messages = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
    }

    #[test]
    fn rate_limit_is_quota() {
        let err = classify_status(429, "Too many requests", Some(30));
        assert_eq!(err.class(), ErrorClass::Quota);
        match err {
            ProviderError::QuotaExceeded { retry_after_secs, .. } => {
                assert_eq!(retry_after_secs, Some(30))
            }
            other => panic!("Expected QuotaExceeded, got: {other:?}"),
        }
    }

    #[test]
    fn resource_exhausted_body_is_quota() {
        let body = r#"{"error":{"code":403,"status":"RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(classify_status(403, body, None).class(), ErrorClass::Quota);
    }

    #[test]
    fn server_errors_are_transient() {
        assert_eq!(classify_status(500, "", None).class(), ErrorClass::Transient);
        assert_eq!(classify_status(503, "overloaded", None).class(), ErrorClass::Transient);
        assert_eq!(classify_status(408, "", None).class(), ErrorClass::Transient);
    }

    #[test]
    fn client_errors_are_non_retryable() {
        assert_eq!(classify_status(400, "bad json", None).class(), ErrorClass::NonRetryable);
        assert_eq!(classify_status(404, "no model", None).class(), ErrorClass::NonRetryable);
        let auth = classify_status(401, "", None);
        assert_eq!(auth.class(), ErrorClass::NonRetryable);
        assert!(auth.to_string().contains("Invalid API key"));
    }

    #[test]
    fn long_bodies_are_excerpted() {
        let body = "x".repeat(1000);
        let err = classify_status(400, &body, None);
        assert!(err.to_string().len() < 400);
    }

    #[test]
    fn parse_response_without_model() {
        let data = r#"{"choices":[{"message":{"role":"assistant","content":"4 open tickets"}}]}"#;
        let parsed: ApiResponse = serde_json::from_str(data).unwrap();
        assert!(parsed.model.is_none());
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("4 open tickets"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transient() {
        // Port 9 (discard) on localhost is closed in test environments.
        let provider = provider("http://127.0.0.1:9/v1");
        let request = ProviderRequest {
            model: "any".into(),
            messages: vec![Message::user("hi")],
            temperature: 0.0,
            max_tokens: None,
        };
        let err = provider.complete(request).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Transient);
    }
}
