use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Text substituted for model output when the provider refused on safety grounds.
pub const SAFETY_BLOCKED: &str = "SAFETY_BLOCKED";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub text: String,
    pub latency_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_out: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_meta: Option<ToolMeta>,
}

impl GenerationResult {
    pub fn safety_blocked() -> Self {
        Self {
            text: SAFETY_BLOCKED.to_string(),
            latency_ms: 0.0,
            tokens_in: None,
            tokens_out: None,
            tool_meta: None,
        }
    }

    pub fn is_safety_blocked(&self) -> bool {
        self.text == SAFETY_BLOCKED
    }
}

/// Bookkeeping attached to tool-augmented generations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMeta {
    pub tool_calls: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timed_out: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns_reached: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
}

impl ToolMeta {
    pub fn calls(tool_calls: u32) -> Self {
        Self {
            tool_calls,
            ..Default::default()
        }
    }

    pub fn timed_out(tool_calls: u32) -> Self {
        Self {
            tool_calls,
            timed_out: Some(true),
            ..Default::default()
        }
    }

    pub fn max_turns_reached(tool_calls: u32) -> Self {
        Self {
            tool_calls,
            max_turns_reached: Some(true),
            ..Default::default()
        }
    }

    pub fn errored(tool_calls: u32) -> Self {
        Self {
            tool_calls,
            error: Some(true),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub tools_enabled: bool,
    #[serde(default = "default_max_tool_turns")]
    pub max_tool_turns: u32,
    #[serde(default = "default_case_timeout_secs")]
    pub case_timeout_secs: u64,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: None,
            max_tokens: None,
            tools_enabled: false,
            max_tool_turns: default_max_tool_turns(),
            case_timeout_secs: default_case_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl GenerationParams {
    pub fn case_timeout(&self) -> Duration {
        Duration::from_secs(self.case_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

fn default_max_tool_turns() -> u32 {
    10
}

fn default_case_timeout_secs() -> u64 {
    120
}

fn default_tool_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pack {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grader: Option<GraderSpec>,
    #[serde(default)]
    pub cases: Vec<Case>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Case {
    pub id: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Declarative grader selection, read from `pack.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum GraderSpec {
    Contains {
        #[serde(default)]
        keyword: Option<String>,
        #[serde(default)]
        case_sensitive: bool,
    },
    Exact {
        #[serde(default)]
        case_sensitive: bool,
    },
    Regex {
        pattern: String,
        #[serde(default)]
        flags: Vec<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GradeOutcome {
    pub score: f64,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

impl GradeOutcome {
    /// Recorded when no grader is configured.
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn labeled(score: f64, label: &str, reason: impl Into<String>) -> Self {
        Self {
            score,
            label: Some(label.to_string()),
            reason: Some(reason.into()),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_meta_omits_absent_flags() {
        let v = serde_json::to_value(ToolMeta::calls(2)).unwrap();
        assert_eq!(v, serde_json::json!({ "tool_calls": 2 }));

        let v = serde_json::to_value(ToolMeta::max_turns_reached(3)).unwrap();
        assert_eq!(
            v,
            serde_json::json!({ "tool_calls": 3, "max_turns_reached": true })
        );
    }

    #[test]
    fn params_defaults_fill_missing_fields() {
        let p: GenerationParams = serde_json::from_str(r#"{"tools_enabled": true}"#).unwrap();
        assert!(p.tools_enabled);
        assert_eq!(p.max_tool_turns, 10);
        assert_eq!(p.case_timeout_secs, 120);
        assert_eq!(p.tool_timeout_secs, 30);
    }

    #[test]
    fn grader_spec_is_type_tagged() {
        let spec: GraderSpec = serde_yaml::from_str("type: contains\nkeyword: ping").unwrap();
        assert_eq!(
            spec,
            GraderSpec::Contains {
                keyword: Some("ping".into()),
                case_sensitive: false
            }
        );
    }
}
