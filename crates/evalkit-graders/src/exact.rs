use evalkit_core::grader_api::Grader;
use evalkit_core::model::GradeOutcome;
use serde_json::{Map, Value};

/// Trimmed equality with the expected value.
pub struct ExactGrader {
    case_sensitive: bool,
}

impl ExactGrader {
    pub fn new(case_sensitive: bool) -> Self {
        Self { case_sensitive }
    }
}

impl Grader for ExactGrader {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn grade(&self, output: &str, expected: Option<&str>, _metadata: &Map<String, Value>) -> GradeOutcome {
        let Some(expected) = expected else {
            return GradeOutcome::labeled(0.0, "FAIL", "case has no expected value");
        };
        let (got, want) = (output.trim(), expected.trim());
        let equal = if self.case_sensitive {
            got == want
        } else {
            got.to_lowercase() == want.to_lowercase()
        };

        if equal {
            GradeOutcome::labeled(1.0, "PASS", "exact match")
        } else {
            GradeOutcome::labeled(0.0, "FAIL", format!("expected '{}'", want))
        }
    }
}
