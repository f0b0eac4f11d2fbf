//! Commentary provider abstraction
//!
//! One HTTP implementation speaking the chat-completions wire format,
//! and a deterministic mock for tests and keyless environments. The
//! provider reports observed token usage so the balancer can charge
//! the dispatching credential.

use async_trait::async_trait;
use newsforge_common::balancer::PoolCredential;
use newsforge_common::config::AiConfig;
use newsforge_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// A finished generation: the text plus the tokens it consumed
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub tokens_used: u64,
}

#[async_trait]
pub trait CommentaryProvider: Send + Sync {
    /// Generate a completion using the given credential
    async fn complete(&self, credential: &PoolCredential, prompt: &str) -> Result<Completion>;

    fn model_name(&self) -> &str;
}

// ---------------------------------------------------------------------
// HTTP provider (chat-completions wire format)
// ---------------------------------------------------------------------

pub struct HttpCommentaryProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: u64,
}

impl HttpCommentaryProvider {
    pub fn new(config: &AiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("failed to create HTTP client");

        Self {
            client,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    fn classify_failure(credential: &PoolCredential, status: reqwest::StatusCode, body: &str) -> AppError {
        let lowered = body.to_ascii_lowercase();
        if status.as_u16() == 429
            || lowered.contains("rate limit")
            || lowered.contains("limit exceeded")
            || lowered.contains("insufficient_quota")
        {
            return AppError::RateLimited {
                credential: credential.id,
                message: format!("{}: {}", status, truncate(body, 200)),
            };
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return AppError::AuthRejected {
                credential: credential.id,
                message: format!("{}", status),
            };
        }
        if status.is_server_error() {
            return AppError::UpstreamTransient {
                message: format!("{}: {}", status, truncate(body, 200)),
            };
        }
        AppError::Upstream {
            message: format!("{}: {}", status, truncate(body, 200)),
        }
    }
}

#[async_trait]
impl CommentaryProvider for HttpCommentaryProvider {
    async fn complete(&self, credential: &PoolCredential, prompt: &str) -> Result<Completion> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&credential.secret)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_failure(credential, status, &body));
        }

        let body: ChatResponse = response.json().await.map_err(|e| AppError::Upstream {
            message: format!("failed to parse completion response: {}", e),
        })?;

        let text = body
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(AppError::Upstream {
                message: "provider returned an empty completion".to_string(),
            });
        }

        // Fall back to a rough estimate when the provider omits usage
        let tokens_used = body
            .usage
            .map(|u| u.total_tokens)
            .unwrap_or_else(|| ((prompt.len() + text.len()) / 4) as u64);

        Ok(Completion { text, tokens_used })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ---------------------------------------------------------------------
// Mock provider
// ---------------------------------------------------------------------

/// Deterministic provider for tests and keyless local runs
pub struct MockCommentaryProvider {
    tokens_per_call: u64,
}

impl MockCommentaryProvider {
    pub fn new() -> Self {
        Self {
            tokens_per_call: 600,
        }
    }

    pub fn with_token_cost(tokens_per_call: u64) -> Self {
        Self { tokens_per_call }
    }
}

impl Default for MockCommentaryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommentaryProvider for MockCommentaryProvider {
    async fn complete(&self, _credential: &PoolCredential, prompt: &str) -> Result<Completion> {
        // Echo a structured commentary derived from the prompt so
        // assertions can tie output to input
        let digest: String = prompt.chars().take(40).collect();
        Ok(Completion {
            text: format!(
                "Key Points\nMock key points for: {d}.\n\n\
                 Impact Analysis\nMock impact analysis.\n\n\
                 Future Outlook\nMock future outlook.",
                d = digest.trim()
            ),
            tokens_used: self.tokens_per_call,
        })
    }

    fn model_name(&self) -> &str {
        "mock-commentary"
    }
}

/// Create a provider based on configuration
pub fn create_provider(config: &AiConfig) -> Arc<dyn CommentaryProvider> {
    match config.provider.as_str() {
        "http" => Arc::new(HttpCommentaryProvider::new(config)),
        "mock" => Arc::new(MockCommentaryProvider::new()),
        other => {
            warn!(provider = other, "unknown commentary provider, using mock");
            Arc::new(MockCommentaryProvider::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cred() -> PoolCredential {
        PoolCredential {
            id: 1,
            secret: "test".into(),
        }
    }

    #[tokio::test]
    async fn mock_emits_three_sections() {
        let p = MockCommentaryProvider::new();
        let out = p.complete(&cred(), "prompt text").await.unwrap();
        assert!(out.text.contains("Key Points"));
        assert!(out.text.contains("Impact Analysis"));
        assert!(out.text.contains("Future Outlook"));
        assert_eq!(out.tokens_used, 600);
    }

    #[test]
    fn failure_classification() {
        let c = cred();
        let err = HttpCommentaryProvider::classify_failure(
            &c,
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            "slow down",
        );
        assert!(err.is_rate_limit());

        let err = HttpCommentaryProvider::classify_failure(
            &c,
            reqwest::StatusCode::OK,
            "daily limit exceeded",
        );
        assert!(err.is_rate_limit());

        let err =
            HttpCommentaryProvider::classify_failure(&c, reqwest::StatusCode::UNAUTHORIZED, "");
        assert!(err.is_auth());

        let err = HttpCommentaryProvider::classify_failure(
            &c,
            reqwest::StatusCode::BAD_GATEWAY,
            "upstream busy",
        );
        assert!(err.is_transient());
    }
}
