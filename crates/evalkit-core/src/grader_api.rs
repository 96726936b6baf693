use crate::model::GradeOutcome;
use serde_json::{Map, Value};

/// Scores one model output. Graders are total: every input yields an outcome.
pub trait Grader: Send + Sync {
    fn name(&self) -> &'static str;

    fn grade(
        &self,
        output: &str,
        expected: Option<&str>,
        metadata: &Map<String, Value>,
    ) -> GradeOutcome;
}
