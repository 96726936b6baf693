use super::{
    fault_from_status, run_python_parameters, ChatBackend, ChatRequest, ChatResponse,
    StopReason, ToolCall, Turn, Usage, API_TIMEOUT, RUN_PYTHON_DESCRIPTION, RUN_PYTHON_TOOL,
};
use crate::errors::ProviderFault;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// Chat/completions backend. Also serves any OpenAI-compatible endpoint
/// (Ollama, vLLM) via [`OpenAIBackend::with_base_url`].
pub struct OpenAIBackend {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: String,
    provider: String,
    client: reqwest::Client,
}

impl OpenAIBackend {
    pub fn new(model: impl Into<String>, api_key: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(API_TIMEOUT).build()?;
        Ok(Self {
            model: model.into(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            provider: "openai".to_string(),
            client,
        })
    }

    /// Local Ollama server speaking the OpenAI protocol.
    pub fn ollama(model: impl Into<String>, base_url: Option<String>) -> anyhow::Result<Self> {
        let mut backend = Self::new(model, Some("ollama".to_string()))?
            .with_base_url(base_url.unwrap_or_else(|| OLLAMA_BASE_URL.to_string()));
        backend.provider = "ollama".to_string();
        Ok(backend)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_body(&self, req: &ChatRequest<'_>) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages(req),
        });
        if let Some(t) = req.params.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(m) = req.params.max_tokens {
            body["max_tokens"] = json!(m);
        }
        if req.tools {
            body["tools"] = json!([tool_definition()]);
        }
        body
    }
}

pub fn tool_definition() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": RUN_PYTHON_TOOL,
            "description": RUN_PYTHON_DESCRIPTION,
            "parameters": run_python_parameters(),
        }
    })
}

fn messages(req: &ChatRequest<'_>) -> Vec<Value> {
    let mut out = Vec::new();
    if !req.system.is_empty() {
        out.push(json!({ "role": "system", "content": req.system }));
    }
    for turn in req.turns {
        match turn {
            Turn::User(text) => out.push(json!({ "role": "user", "content": text })),
            Turn::Assistant { text, tool_calls } => {
                let mut msg = json!({ "role": "assistant", "content": text });
                if !tool_calls.is_empty() {
                    msg["tool_calls"] = tool_calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": { "name": tc.name, "arguments": tc.arguments }
                            })
                        })
                        .collect();
                }
                out.push(msg);
            }
            Turn::ToolReplies(replies) => {
                for r in replies {
                    out.push(json!({
                        "role": "tool",
                        "tool_call_id": r.call_id,
                        "content": r.content,
                    }));
                }
            }
        }
    }
    out
}

fn bad_request(message: String, body: &str) -> ProviderFault {
    let lower = body.to_lowercase();
    if ["content_filter", "content_policy", "safety", "flagged"]
        .iter()
        .any(|k| lower.contains(k))
    {
        ProviderFault::ContentBlocked(message)
    } else {
        ProviderFault::InvalidRequest(message)
    }
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn into_chat_response(wire: WireResponse) -> Result<ChatResponse, ProviderFault> {
    let choice = wire
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderFault::Server {
            status: None,
            message: "OpenAI response missing choices".into(),
        })?;

    let stop = match choice.finish_reason.as_deref() {
        Some("stop") => StopReason::EndTurn,
        Some("tool_calls") => StopReason::ToolUse,
        Some("length") => StopReason::MaxTokens,
        Some(other) => StopReason::Other(other.to_string()),
        None => StopReason::Other("none".into()),
    };

    Ok(ChatResponse {
        text: choice.message.content,
        tool_calls: choice
            .message
            .tool_calls
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect(),
        stop,
        usage: wire.usage.map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }),
    })
}

#[async_trait]
impl ChatBackend for OpenAIBackend {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send(&self, req: &ChatRequest<'_>) -> Result<ChatResponse, ProviderFault> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut http = self.client.post(&url).json(&self.build_body(req));
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let resp = http.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(fault_from_status(status.as_u16(), &body, bad_request));
        }

        let wire: WireResponse = resp.json().await?;
        into_chat_response(wire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GenerationParams;
    use crate::providers::llm::ToolReply;

    #[test]
    fn body_carries_system_history_and_tool() {
        let backend = OpenAIBackend::new("gpt-4o-mini", None).unwrap();
        let params = GenerationParams {
            temperature: Some(0.0),
            max_tokens: Some(64),
            ..Default::default()
        };
        let turns = vec![
            Turn::User("compute".into()),
            Turn::Assistant {
                text: None,
                tool_calls: vec![ToolCall {
                    id: "call_1".into(),
                    name: RUN_PYTHON_TOOL.into(),
                    arguments: r#"{"code":"print(1)"}"#.into(),
                }],
            },
            Turn::ToolReplies(vec![ToolReply {
                call_id: "call_1".into(),
                content: r#"{"stdout":"1\n"}"#.into(),
            }]),
        ];
        let req = ChatRequest {
            system: "be brief",
            turns: &turns,
            params: &params,
            tools: true,
        };

        let body = backend.build_body(&req);
        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[2]["tool_calls"][0]["function"]["name"], RUN_PYTHON_TOOL);
        assert_eq!(msgs[3]["role"], "tool");
        assert_eq!(msgs[3]["tool_call_id"], "call_1");
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["tools"][0]["function"]["name"], RUN_PYTHON_TOOL);
    }

    #[test]
    fn bad_request_splits_safety_from_malformed() {
        assert!(matches!(
            bad_request("x".into(), r#"{"error":{"code":"content_policy_violation"}}"#),
            ProviderFault::ContentBlocked(_)
        ));
        assert!(matches!(
            bad_request("x".into(), r#"{"error":{"code":"invalid_value"}}"#),
            ProviderFault::InvalidRequest(_)
        ));
    }

    #[test]
    fn ollama_identity() {
        let backend = OpenAIBackend::ollama("llama3", None).unwrap();
        assert_eq!(backend.provider(), "ollama");
        assert_eq!(backend.base_url, OLLAMA_BASE_URL);
    }
}
