use crate::model::{GenerationResult, ToolMeta};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub model_id: String,
    pub name: String,
    pub provider: String,
    pub version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewOutput {
    pub run_id: String,
    pub case_id: String,
    pub raw_text: String,
    pub latency_ms: f64,
    pub tokens_in: Option<u64>,
    pub tokens_out: Option<u64>,
    pub tool_meta: Option<ToolMeta>,
}

impl NewOutput {
    pub fn from_generation(run_id: &str, case_id: &str, result: &GenerationResult) -> Self {
        Self {
            run_id: run_id.to_string(),
            case_id: case_id.to_string(),
            raw_text: result.text.clone(),
            latency_ms: result.latency_ms,
            tokens_in: result.tokens_in,
            tokens_out: result.tokens_out,
            tool_meta: result.tool_meta.clone(),
        }
    }
}

/// An output joined with its score and case.
#[derive(Debug, Clone, Serialize)]
pub struct OutputRow {
    pub output_id: String,
    pub case_id: String,
    pub raw_text: String,
    pub latency_ms: Option<f64>,
    pub tokens_in: Option<u64>,
    pub tokens_out: Option<u64>,
    pub tool_meta: Option<Value>,
    pub score: Option<f64>,
    pub label: Option<String>,
    pub reason: Option<String>,
    pub details: Option<Value>,
    pub expected: Option<String>,
    pub scheme: Option<String>,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreRow {
    pub output_id: String,
    pub case_id: String,
    pub score: Option<f64>,
    pub label: Option<String>,
    pub reason: Option<String>,
    pub details: Option<Value>,
    pub latency_ms: Option<f64>,
    pub tokens_in: Option<u64>,
    pub tokens_out: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRow {
    pub run_id: String,
    pub created_at: String,
    pub git_sha: Option<String>,
    pub pack_id: String,
    pub model_id: String,
    pub params: Option<Value>,
}
