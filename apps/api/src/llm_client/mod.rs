/// LLM Client: the only module that talks to the analysis service.
///
/// Speaks the OpenAI-compatible chat-completions protocol (OpenRouter by default).
/// One call per attempt: retry, backoff and credential rotation belong to the
/// stage executor, so this client never retries on its own.
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LlmSettings;
use crate::evaluation::credentials::Credential;
use crate::evaluation::invoker::{InvokeError, StageInvoker, StageRequest};
use crate::evaluation::prompts::render;
use crate::evaluation::qualification::QualificationPolicy;

pub mod prompts;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

impl ChatResponse {
    /// Text of the first choice, if it has any.
    pub fn text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .filter(|t| !t.trim().is_empty())
    }
}

#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    settings: LlmSettings,
    /// Rendered into the evaluator and QA prompts.
    policy: QualificationPolicy,
}

impl LlmClient {
    pub fn new(settings: LlmSettings, policy: QualificationPolicy) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .build()
                .context("Failed to build HTTP client")?,
            settings,
            policy,
        })
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'))
    }
}

/// Maps a non-success HTTP status onto the executor's failure classes.
fn classify_status(status: StatusCode) -> InvokeError {
    match status.as_u16() {
        429 => InvokeError::RateLimited,
        401 | 402 | 403 => InvokeError::Unauthorized {
            status: status.as_u16(),
        },
        code => InvokeError::Transport(format!("analysis service returned status {code}")),
    }
}

fn classify_transport(error: &reqwest::Error) -> InvokeError {
    if error.is_timeout() {
        InvokeError::Timeout
    } else {
        // Only the error kind leaves this module; URLs and headers stay out of logs.
        let kind = if error.is_connect() {
            "connection failed"
        } else if error.is_body() || error.is_decode() {
            "malformed response body"
        } else {
            "request failed"
        };
        InvokeError::Transport(kind.to_string())
    }
}

#[async_trait]
impl StageInvoker for LlmClient {
    async fn invoke(
        &self,
        credential: &Credential,
        request: &StageRequest<'_>,
        timeout: Duration,
    ) -> Result<String, InvokeError> {
        let prompt = render(
            request.stage,
            request.context,
            request.correction,
            &self.policy,
        );
        let body = ChatRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(credential.secret())
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                stage = %request.stage,
                credential = %credential.id,
                status = status.as_u16(),
                "Analysis service returned an error status"
            );
            return Err(classify_status(status));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| classify_transport(&e))?;

        if let Some(usage) = &parsed.usage {
            debug!(
                stage = %request.stage,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Analysis call succeeded"
            );
        }

        parsed
            .text()
            .map(str::to_string)
            .ok_or_else(|| InvokeError::Transport("empty completion".to_string()))
    }
}
