//! Bounded multi-turn conversation in which the model may call `run_python`.
//!
//! The loop is limited by a turn budget and a wall-clock deadline fixed at
//! entry. Running out of either is a normal result flagged in [`ToolMeta`].

use crate::errors::ProviderFault;
use crate::model::{GenerationParams, GenerationResult, ToolMeta};
use crate::providers::llm::{
    ChatBackend, ChatRequest, GenerationAdapter, ToolCall, ToolReply, Turn, RUN_PYTHON_TOOL,
};
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;

#[derive(Deserialize)]
struct RunPythonArgs {
    code: String,
}

pub struct ToolUseLoop<'a, B> {
    adapter: &'a GenerationAdapter<B>,
    params: &'a GenerationParams,
    turns: Vec<Turn>,
    tokens_in: u64,
    tokens_out: u64,
    latency_ms: f64,
    tool_calls: u32,
    last_text: String,
}

impl<'a, B: ChatBackend> ToolUseLoop<'a, B> {
    pub fn new(adapter: &'a GenerationAdapter<B>, params: &'a GenerationParams) -> Self {
        Self {
            adapter,
            params,
            turns: Vec::new(),
            tokens_in: 0,
            tokens_out: 0,
            latency_ms: 0.0,
            tool_calls: 0,
            last_text: String::new(),
        }
    }

    pub async fn run(mut self, prompt: &str, system: &str) -> Result<GenerationResult, ProviderFault> {
        let deadline = Instant::now() + self.params.case_timeout();
        self.turns.push(Turn::User(prompt.to_string()));

        for turn in 0..self.params.max_tool_turns {
            if Instant::now() >= deadline {
                tracing::info!(
                    event = "tool_loop.timed_out",
                    turn,
                    tool_calls = self.tool_calls
                );
                let meta = ToolMeta::timed_out(self.tool_calls);
                return Ok(self.finish(Some(meta)));
            }

            let req = ChatRequest {
                system,
                turns: &self.turns,
                params: self.params,
                tools: true,
            };
            let called = self.adapter.call(&req).await;
            let (resp, elapsed_ms) = match called {
                Ok(ok) => ok,
                Err(ProviderFault::ContentBlocked(reason)) => {
                    tracing::warn!(
                        event = "tool_loop.safety_blocked",
                        turn,
                        tool_calls = self.tool_calls,
                        reason = %reason
                    );
                    let meta = (self.tool_calls > 0).then(|| ToolMeta::errored(self.tool_calls));
                    return Ok(self.finish(meta));
                }
                Err(fault) => return Err(fault),
            };

            self.latency_ms += elapsed_ms;
            if let Some(usage) = resp.usage {
                self.tokens_in += usage.input_tokens;
                self.tokens_out += usage.output_tokens;
            }
            if let Some(text) = resp.text.as_deref().filter(|t| !t.is_empty()) {
                self.last_text = text.to_string();
            }

            if resp.is_final() {
                let meta = (self.tool_calls > 0).then(|| ToolMeta::calls(self.tool_calls));
                return Ok(self.finish(meta));
            }

            let mut replies = Vec::with_capacity(resp.tool_calls.len());
            for call in &resp.tool_calls {
                self.tool_calls += 1;
                replies.push(ToolReply {
                    call_id: call.id.clone(),
                    content: self.dispatch(call).await,
                });
            }
            self.turns.push(Turn::Assistant {
                text: resp.text,
                tool_calls: resp.tool_calls,
            });
            self.turns.push(Turn::ToolReplies(replies));
        }

        tracing::info!(
            event = "tool_loop.max_turns_reached",
            max_tool_turns = self.params.max_tool_turns,
            tool_calls = self.tool_calls
        );
        let meta = ToolMeta::max_turns_reached(self.tool_calls);
        Ok(self.finish(Some(meta)))
    }

    async fn dispatch(&self, call: &ToolCall) -> String {
        if call.name != RUN_PYTHON_TOOL {
            return json!({ "error": format!("Unknown tool: {}", call.name) }).to_string();
        }

        let args: RunPythonArgs = match serde_json::from_str(&call.arguments) {
            Ok(args) => args,
            Err(e) => {
                return json!({ "stdout": "", "stderr": e.to_string(), "exit_code": -1 })
                    .to_string()
            }
        };

        tracing::debug!(event = "tool_loop.execute", call_id = %call.id, bytes = args.code.len());
        let result = self
            .adapter
            .sandbox()
            .execute(&args.code, self.params.tool_timeout())
            .await;
        serde_json::to_string(&result).unwrap_or_else(|e| {
            json!({ "stdout": "", "stderr": e.to_string(), "exit_code": -1 }).to_string()
        })
    }

    fn finish(self, tool_meta: Option<ToolMeta>) -> GenerationResult {
        GenerationResult {
            text: self.last_text,
            latency_ms: self.latency_ms,
            tokens_in: (self.tokens_in > 0).then_some(self.tokens_in),
            tokens_out: (self.tokens_out > 0).then_some(self.tokens_out),
            tool_meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::llm::fake::FakeBackend;
    use crate::providers::llm::{ChatResponse, ModelAdapter};
    use crate::retry::RetrySchedule;
    use crate::sandbox::{SandboxConfig, SandboxExecutor};
    use std::sync::Arc;

    fn adapter(backend: FakeBackend) -> GenerationAdapter<FakeBackend> {
        let sandbox = Arc::new(SandboxExecutor::new(SandboxConfig::shell(vec![(
            "PATH".into(),
            "/usr/bin:/bin".into(),
        )])));
        GenerationAdapter::new(backend, sandbox).with_retry(RetrySchedule::immediate())
    }

    fn tool_params(max_tool_turns: u32) -> GenerationParams {
        GenerationParams {
            tools_enabled: true,
            max_tool_turns,
            ..Default::default()
        }
    }

    fn always_tool() -> FakeBackend {
        FakeBackend::repeating(
            "loop",
            Ok(ChatResponse::tool_call("c1", RUN_PYTHON_TOOL, json!({ "code": "echo hi" }))
                .with_usage(5, 1)),
        )
    }

    #[tokio::test]
    async fn turn_budget_is_a_normal_result() {
        let adapter = adapter(always_tool());
        let res = adapter.generate("go", "", &tool_params(3)).await.unwrap();

        assert_eq!(res.tool_meta, Some(ToolMeta::max_turns_reached(3)));
        assert_eq!(adapter.backend().calls(), 3);
        assert_eq!(res.tokens_in, Some(15));
        assert_eq!(res.tokens_out, Some(3));
    }

    #[tokio::test]
    async fn expired_deadline_stops_before_calling() {
        let adapter = adapter(always_tool());
        let params = GenerationParams {
            case_timeout_secs: 0,
            ..tool_params(5)
        };
        let res = adapter.generate("go", "", &params).await.unwrap();

        assert_eq!(res.tool_meta, Some(ToolMeta::timed_out(0)));
        assert_eq!(res.text, "");
        assert_eq!(res.tokens_in, None);
        assert_eq!(adapter.backend().calls(), 0);
    }

    #[tokio::test]
    async fn final_answer_after_tool_use() {
        let backend = FakeBackend::scripted(
            "m",
            vec![
                Ok(ChatResponse::tool_call("c1", RUN_PYTHON_TOOL, json!({ "code": "echo 4" }))
                    .with_text("checking")),
                Ok(ChatResponse::text("")),
            ],
        );
        let adapter = adapter(backend);
        let res = adapter.generate("2+2?", "", &tool_params(10)).await.unwrap();

        // An empty final text keeps the last non-empty one.
        assert_eq!(res.text, "checking");
        assert_eq!(res.tool_meta, Some(ToolMeta::calls(1)));
        let recorded = adapter.backend().recorded();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[1].turns, 3);
        assert!(recorded.iter().all(|c| c.tools));
    }

    #[tokio::test]
    async fn immediate_answer_has_no_tool_meta() {
        let adapter = adapter(FakeBackend::echo("m"));
        let res = adapter.generate("ping", "", &tool_params(10)).await.unwrap();
        assert_eq!(res.text, "ping");
        assert_eq!(res.tool_meta, None);
    }

    #[tokio::test]
    async fn safety_block_mid_loop_flags_error() {
        let backend = FakeBackend::scripted(
            "m",
            vec![
                Ok(ChatResponse::tool_call("c1", RUN_PYTHON_TOOL, json!({ "code": "true" }))
                    .with_text("partial")),
                Err(ProviderFault::ContentBlocked("flagged".into())),
            ],
        );
        let adapter = adapter(backend);
        let res = adapter.generate("x", "", &tool_params(10)).await.unwrap();
        assert_eq!(res.text, "partial");
        assert_eq!(res.tool_meta, Some(ToolMeta::errored(1)));
    }

    #[tokio::test]
    async fn safety_block_on_first_turn_has_no_meta() {
        let backend = FakeBackend::repeating("m", Err(ProviderFault::ContentBlocked("no".into())));
        let adapter = adapter(backend);
        let res = adapter.generate("x", "", &tool_params(10)).await.unwrap();
        assert_eq!(res.tool_meta, None);
        assert_eq!(adapter.backend().calls(), 1);
    }

    #[tokio::test]
    async fn billing_propagates() {
        let backend = FakeBackend::repeating("m", Err(ProviderFault::Billing("no credit".into())));
        let adapter = adapter(backend);
        let err = adapter.generate("x", "", &tool_params(10)).await.unwrap_err();
        assert!(matches!(err, ProviderFault::Billing(_)));
        assert_eq!(adapter.backend().calls(), 1);
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments_are_replied_to() {
        let backend = FakeBackend::scripted(
            "m",
            vec![Ok(ChatResponse::tool_call("c1", "browse", json!({})))],
        );
        let adapter = adapter(backend);
        let params = tool_params(1);
        let tool_loop = ToolUseLoop::new(&adapter, &params);

        let unknown = ToolCall {
            id: "c1".into(),
            name: "browse".into(),
            arguments: "{}".into(),
        };
        let reply: serde_json::Value =
            serde_json::from_str(&tool_loop.dispatch(&unknown).await).unwrap();
        assert_eq!(reply["error"], "Unknown tool: browse");

        let malformed = ToolCall {
            id: "c2".into(),
            name: RUN_PYTHON_TOOL.into(),
            arguments: "not json".into(),
        };
        let reply: serde_json::Value =
            serde_json::from_str(&tool_loop.dispatch(&malformed).await).unwrap();
        assert_eq!(reply["exit_code"], -1);
        assert_eq!(reply["stdout"], "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_tool_times_out_without_ending_the_case() {
        let backend = FakeBackend::scripted(
            "m",
            vec![
                Ok(ChatResponse::tool_call("c1", RUN_PYTHON_TOOL, json!({ "code": "sleep 5" }))),
                Ok(ChatResponse::text("gave up waiting")),
            ],
        );
        let adapter = adapter(backend);
        let params = GenerationParams {
            tool_timeout_secs: 1,
            case_timeout_secs: 60,
            ..tool_params(10)
        };

        let started = Instant::now();
        let res = adapter.generate("slow", "", &params).await.unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(4));

        assert_eq!(res.text, "gave up waiting");
        assert_eq!(res.tool_meta, Some(ToolMeta::calls(1)));

        let recorded = adapter.backend().recorded();
        assert_eq!(recorded.len(), 2);
        let reply: serde_json::Value = serde_json::from_str(&recorded[1].tool_replies[0]).unwrap();
        assert_eq!(reply["exit_code"], -1);
        assert!(reply["stderr"].as_str().unwrap().contains("timed out"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn tool_reply_carries_execution_result() {
        let adapter = adapter(FakeBackend::echo("m"));
        let params = tool_params(1);
        let tool_loop = ToolUseLoop::new(&adapter, &params);
        let call = ToolCall {
            id: "c1".into(),
            name: RUN_PYTHON_TOOL.into(),
            arguments: json!({ "code": "echo 42" }).to_string(),
        };
        let reply: serde_json::Value =
            serde_json::from_str(&tool_loop.dispatch(&call).await).unwrap();
        assert_eq!(reply["stdout"], "42\n");
        assert_eq!(reply["exit_code"], 0);
    }
}
