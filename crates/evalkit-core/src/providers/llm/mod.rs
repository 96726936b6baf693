//! Provider-neutral generation contract.
//!
//! [`ChatBackend`] implementations only translate requests and responses for
//! one upstream API. All control flow (retries, the safety sentinel, the
//! tool-use loop) lives in [`GenerationAdapter`], so every provider gets the
//! same behavior.

use crate::engine::tool_loop::ToolUseLoop;
use crate::errors::{FaultClass, ProviderFault};
use crate::model::{GenerationParams, GenerationResult};
use crate::retry::{call_with_retry, RetrySchedule};
use crate::sandbox::SandboxExecutor;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub mod anthropic;
pub mod fake;
pub mod openai;

/// Name of the single tool exposed to models.
pub const RUN_PYTHON_TOOL: &str = "run_python";
pub const RUN_PYTHON_DESCRIPTION: &str = "Execute Python code and return stdout/stderr. \
     Use this to write and run code that helps you solve the task.";

/// Per-call HTTP timeout for real providers.
pub const API_TIMEOUT: Duration = Duration::from_secs(120);

/// JSON schema of the `run_python` arguments, shared by every provider.
pub fn run_python_parameters() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "code": {
                "type": "string",
                "description": "Python code to execute"
            }
        },
        "required": ["code"]
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments as sent by the model.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolReply {
    pub call_id: String,
    pub content: String,
}

/// One entry of the provider-neutral transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    User(String),
    Assistant {
        text: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
    ToolReplies(Vec<ToolReply>),
}

#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub system: &'a str,
    pub turns: &'a [Turn],
    pub params: &'a GenerationParams,
    pub tools: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Other(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub stop: StopReason,
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// A plain end-of-turn text reply.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: vec![],
            stop: StopReason::EndTurn,
            usage: None,
        }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            text: None,
            tool_calls: vec![ToolCall {
                id: id.into(),
                name: name.into(),
                arguments: arguments.to_string(),
            }],
            stop: StopReason::ToolUse,
            usage: None,
        }
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = Some(Usage {
            input_tokens,
            output_tokens,
        });
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// The model is done when it says so or asks for nothing.
    pub fn is_final(&self) -> bool {
        self.stop == StopReason::EndTurn || self.tool_calls.is_empty()
    }
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn provider(&self) -> &str;
    fn model_name(&self) -> &str;

    async fn send(&self, req: &ChatRequest<'_>) -> Result<ChatResponse, ProviderFault>;

    /// Retry classification for this provider's faults.
    fn classify(&self, fault: &ProviderFault) -> FaultClass {
        fault.class()
    }
}

/// What the orchestrator talks to.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        system: &str,
        params: &GenerationParams,
    ) -> Result<GenerationResult, ProviderFault>;

    /// `"<provider>:<model>"`.
    fn model_id(&self) -> String {
        format!("{}:{}", self.provider(), self.model_name())
    }
    fn model_name(&self) -> &str;
    fn provider(&self) -> &str;
}

pub struct GenerationAdapter<B> {
    backend: B,
    retry: RetrySchedule,
    sandbox: Arc<SandboxExecutor>,
}

impl<B: ChatBackend> GenerationAdapter<B> {
    pub fn new(backend: B, sandbox: Arc<SandboxExecutor>) -> Self {
        Self {
            backend,
            retry: RetrySchedule::default(),
            sandbox,
        }
    }

    pub fn with_retry(mut self, retry: RetrySchedule) -> Self {
        self.retry = retry;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn sandbox(&self) -> &SandboxExecutor {
        &self.sandbox
    }

    /// One logical upstream call under the retry schedule.
    pub async fn call(&self, req: &ChatRequest<'_>) -> Result<(ChatResponse, f64), ProviderFault> {
        call_with_retry(
            &self.retry,
            |fault| self.backend.classify(fault),
            || self.backend.send(req),
        )
        .await
        .map_err(ProviderFault::from)
    }

    async fn generate_single(
        &self,
        prompt: &str,
        system: &str,
        params: &GenerationParams,
    ) -> Result<GenerationResult, ProviderFault> {
        let turns = [Turn::User(prompt.to_string())];
        let req = ChatRequest {
            system,
            turns: &turns,
            params,
            tools: false,
        };

        let (resp, elapsed_ms) = match self.call(&req).await {
            Ok(ok) => ok,
            Err(ProviderFault::ContentBlocked(reason)) => {
                tracing::warn!(
                    event = "generation.safety_blocked",
                    model = %self.backend.model_name(),
                    reason = %reason
                );
                return Ok(GenerationResult::safety_blocked());
            }
            Err(fault) => return Err(fault),
        };

        Ok(GenerationResult {
            text: resp.text.unwrap_or_default(),
            latency_ms: elapsed_ms,
            tokens_in: resp.usage.map(|u| u.input_tokens),
            tokens_out: resp.usage.map(|u| u.output_tokens),
            tool_meta: None,
        })
    }
}

#[async_trait]
impl<B: ChatBackend> ModelAdapter for GenerationAdapter<B> {
    async fn generate(
        &self,
        prompt: &str,
        system: &str,
        params: &GenerationParams,
    ) -> Result<GenerationResult, ProviderFault> {
        if params.tools_enabled {
            ToolUseLoop::new(self, params).run(prompt, system).await
        } else {
            self.generate_single(prompt, system, params).await
        }
    }

    fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    fn provider(&self) -> &str {
        self.backend.provider()
    }
}

/// Extract a readable message from a provider error body.
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(500).collect())
}

fn mentions_billing(body: &str) -> bool {
    let lower = body.to_lowercase();
    ["credit", "balance", "billing", "insufficient_quota"]
        .iter()
        .any(|k| lower.contains(k))
}

/// Map a non-success HTTP status to a fault. `on_bad_request` decides what a
/// plain 400 means for the provider.
pub(crate) fn fault_from_status(
    status: u16,
    body: &str,
    on_bad_request: fn(String, &str) -> ProviderFault,
) -> ProviderFault {
    let message = error_message(body);
    match status {
        401 | 402 | 403 => ProviderFault::Billing(message),
        400 if mentions_billing(body) => ProviderFault::Billing(message),
        400 => on_bad_request(message, body),
        408 => ProviderFault::Timeout(message),
        429 if mentions_billing(body) => ProviderFault::Billing(message),
        429 => ProviderFault::RateLimited(message),
        500..=599 => ProviderFault::Server {
            status: Some(status),
            message,
        },
        _ => ProviderFault::InvalidRequest(format!("HTTP {}: {}", status, message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked(message: String, _body: &str) -> ProviderFault {
        ProviderFault::ContentBlocked(message)
    }

    #[test]
    fn status_mapping_covers_taxonomy() {
        assert!(matches!(
            fault_from_status(401, "{}", blocked),
            ProviderFault::Billing(_)
        ));
        assert!(matches!(
            fault_from_status(429, r#"{"error":{"message":"slow down"}}"#, blocked),
            ProviderFault::RateLimited(m) if m == "slow down"
        ));
        assert!(matches!(
            fault_from_status(429, r#"{"error":{"code":"insufficient_quota"}}"#, blocked),
            ProviderFault::Billing(_)
        ));
        assert!(matches!(
            fault_from_status(529, "overloaded", blocked),
            ProviderFault::Server { status: Some(529), .. }
        ));
        assert!(matches!(
            fault_from_status(502, "bad gateway from load balancer", blocked),
            ProviderFault::Server { .. }
        ));
        assert!(matches!(
            fault_from_status(404, "no such model", blocked),
            ProviderFault::InvalidRequest(_)
        ));
    }

    #[test]
    fn bad_request_checks_billing_before_provider_policy() {
        let body = r#"{"error":{"message":"Your credit balance is too low"}}"#;
        assert!(matches!(
            fault_from_status(400, body, blocked),
            ProviderFault::Billing(_)
        ));
        assert!(matches!(
            fault_from_status(400, r#"{"error":{"message":"flagged"}}"#, blocked),
            ProviderFault::ContentBlocked(_)
        ));
    }

    #[test]
    fn final_response_detection() {
        assert!(ChatResponse::text("hi").is_final());
        let mut resp = ChatResponse::tool_call("t1", RUN_PYTHON_TOOL, serde_json::json!({}));
        assert!(!resp.is_final());
        resp.stop = StopReason::EndTurn;
        assert!(resp.is_final());
    }
}
