use super::{
    fault_from_status, run_python_parameters, ChatBackend, ChatRequest, ChatResponse,
    StopReason, ToolCall, Turn, Usage, API_TIMEOUT, RUN_PYTHON_DESCRIPTION, RUN_PYTHON_TOOL,
};
use crate::errors::ProviderFault;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const API_VERSION: &str = "2023-06-01";
/// The messages API requires `max_tokens`.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

pub struct AnthropicBackend {
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    client: reqwest::Client,
}

impl AnthropicBackend {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(API_TIMEOUT).build()?;
        Ok(Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_body(&self, req: &ChatRequest<'_>) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": req.params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": messages(req.turns),
        });
        if !req.system.is_empty() {
            body["system"] = json!(req.system);
        }
        if let Some(t) = req.params.temperature {
            body["temperature"] = json!(t);
        }
        if req.tools {
            body["tools"] = json!([tool_definition()]);
        }
        body
    }
}

pub fn tool_definition() -> Value {
    json!({
        "name": RUN_PYTHON_TOOL,
        "description": RUN_PYTHON_DESCRIPTION,
        "input_schema": run_python_parameters(),
    })
}

fn messages(turns: &[Turn]) -> Vec<Value> {
    turns
        .iter()
        .map(|turn| match turn {
            Turn::User(text) => json!({ "role": "user", "content": text }),
            Turn::Assistant { text, tool_calls } => {
                let mut content = Vec::new();
                if let Some(t) = text.as_deref().filter(|t| !t.is_empty()) {
                    content.push(json!({ "type": "text", "text": t }));
                }
                for tc in tool_calls {
                    let input: Value =
                        serde_json::from_str(&tc.arguments).unwrap_or_else(|_| json!({}));
                    content.push(json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.name,
                        "input": input,
                    }));
                }
                json!({ "role": "assistant", "content": content })
            }
            Turn::ToolReplies(replies) => {
                let content: Vec<Value> = replies
                    .iter()
                    .map(|r| {
                        json!({
                            "type": "tool_result",
                            "tool_use_id": r.call_id,
                            "content": r.content,
                        })
                    })
                    .collect();
                json!({ "role": "user", "content": content })
            }
        })
        .collect()
}

// Anthropic reports safety refusals as plain 400s.
fn bad_request(message: String, _body: &str) -> ProviderFault {
    ProviderFault::ContentBlocked(message)
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    content: Vec<WireBlock>,
    stop_reason: Option<String>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

fn into_chat_response(wire: WireResponse) -> ChatResponse {
    let mut text = None;
    let mut tool_calls = Vec::new();
    for block in wire.content {
        match block {
            // First text block wins.
            WireBlock::Text { text: t } => {
                if text.is_none() {
                    text = Some(t);
                }
            }
            WireBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                name,
                arguments: input.to_string(),
            }),
            WireBlock::Unknown => {}
        }
    }

    let stop = match wire.stop_reason.as_deref() {
        Some("end_turn") => StopReason::EndTurn,
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        Some(other) => StopReason::Other(other.to_string()),
        None => StopReason::Other("none".into()),
    };

    ChatResponse {
        text,
        tool_calls,
        stop,
        usage: wire.usage.map(|u| Usage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        }),
    }
}

#[async_trait]
impl ChatBackend for AnthropicBackend {
    fn provider(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send(&self, req: &ChatRequest<'_>) -> Result<ChatResponse, ProviderFault> {
        let url = format!("{}/v1/messages", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&self.build_body(req))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(fault_from_status(status.as_u16(), &body, bad_request));
        }

        let wire: WireResponse = resp.json().await?;
        Ok(into_chat_response(wire))
    }
}
