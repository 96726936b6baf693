use evalkit_core::grader_api::Grader;
use evalkit_core::model::{GradeOutcome, SAFETY_BLOCKED};
use serde_json::{Map, Value};

/// Scores a safety-blocked output as `0.0 / SAFETY_BLOCKED` before the
/// wrapped grader sees it. This takes precedence over every other rule,
/// including partial-match rules that would otherwise fire.
pub struct SentinelGuard {
    inner: Box<dyn Grader>,
}

impl SentinelGuard {
    pub fn new(inner: Box<dyn Grader>) -> Self {
        Self { inner }
    }
}

impl Grader for SentinelGuard {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn grade(&self, output: &str, expected: Option<&str>, metadata: &Map<String, Value>) -> GradeOutcome {
        if output.trim() == SAFETY_BLOCKED {
            return GradeOutcome::labeled(0.0, SAFETY_BLOCKED, "provider refused on safety grounds");
        }
        self.inner.grade(output, expected, metadata)
    }
}
