use super::{ChatBackend, ChatRequest, ChatResponse, Turn};
use crate::errors::ProviderFault;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type Scripted = Result<ChatResponse, ProviderFault>;

/// What the fake saw on one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub turns: usize,
    pub tools: bool,
    /// Contents of the tool replies when the transcript ends with them.
    pub tool_replies: Vec<String>,
}

/// Offline backend. Echoes the last user message unless scripted.
pub struct FakeBackend {
    model: String,
    script: Mutex<VecDeque<Scripted>>,
    repeat: Option<Scripted>,
    calls: AtomicUsize,
    recorded: Mutex<Vec<RecordedCall>>,
}

impl FakeBackend {
    pub fn echo(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            script: Mutex::new(VecDeque::new()),
            repeat: None,
            calls: AtomicUsize::new(0),
            recorded: Mutex::new(Vec::new()),
        }
    }

    /// Replies from `script` in order, then falls back to echo.
    pub fn scripted(model: impl Into<String>, script: Vec<Scripted>) -> Self {
        let fake = Self::echo(model);
        *fake.script.lock().unwrap_or_else(|e| e.into_inner()) = script.into();
        fake
    }

    /// Same reply on every call.
    pub fn repeating(model: impl Into<String>, reply: Scripted) -> Self {
        Self {
            repeat: Some(reply),
            ..Self::echo(model)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.recorded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

fn last_user_text(turns: &[Turn]) -> String {
    turns
        .iter()
        .rev()
        .find_map(|t| match t {
            Turn::User(text) => Some(text.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

#[async_trait]
impl ChatBackend for FakeBackend {
    fn provider(&self) -> &str {
        "fake"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send(&self, req: &ChatRequest<'_>) -> Result<ChatResponse, ProviderFault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.recorded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                turns: req.turns.len(),
                tools: req.tools,
                tool_replies: match req.turns.last() {
                    Some(Turn::ToolReplies(replies)) => {
                        replies.iter().map(|r| r.content.clone()).collect()
                    }
                    _ => Vec::new(),
                },
            });

        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        if let Some(reply) = next {
            return reply;
        }
        if let Some(reply) = &self.repeat {
            return reply.clone();
        }

        let text = last_user_text(req.turns);
        let tokens = text.split_whitespace().count() as u64;
        Ok(ChatResponse::text(text).with_usage(tokens, tokens))
    }
}
