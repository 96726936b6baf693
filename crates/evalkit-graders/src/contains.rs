use evalkit_core::grader_api::Grader;
use evalkit_core::model::GradeOutcome;
use serde_json::{json, Map, Value};

/// Passes when the output contains the keyword, or the case's expected value
/// when no keyword is configured.
pub struct ContainsGrader {
    keyword: Option<String>,
    case_sensitive: bool,
}

impl ContainsGrader {
    pub fn new(keyword: Option<String>, case_sensitive: bool) -> Self {
        Self {
            keyword,
            case_sensitive,
        }
    }
}

impl Grader for ContainsGrader {
    fn name(&self) -> &'static str {
        "contains"
    }

    fn grade(&self, output: &str, expected: Option<&str>, _metadata: &Map<String, Value>) -> GradeOutcome {
        let Some(needle) = self.keyword.as_deref().or(expected).filter(|k| !k.is_empty()) else {
            return GradeOutcome::labeled(0.0, "FAIL", "no keyword or expected value to look for");
        };

        let found = if self.case_sensitive {
            output.contains(needle)
        } else {
            output.to_lowercase().contains(&needle.to_lowercase())
        };

        let outcome = if found {
            GradeOutcome::labeled(1.0, "PASS", format!("found '{}'", needle))
        } else {
            GradeOutcome::labeled(0.0, "FAIL", format!("missing '{}'", needle))
        };
        outcome.with_details(json!({ "keyword": needle, "case_sensitive": self.case_sensitive }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_expected_and_ignores_case() {
        let g = ContainsGrader::new(None, false);
        let out = g.grade("PING!", Some("ping"), &Map::new());
        assert_eq!(out.score, 1.0);
        assert_eq!(out.label.as_deref(), Some("PASS"));
    }

    #[test]
    fn case_sensitive_keyword_wins_over_expected() {
        let g = ContainsGrader::new(Some("Ping".into()), true);
        assert_eq!(g.grade("ping", Some("ping"), &Map::new()).score, 0.0);
        assert_eq!(g.grade("Ping", None, &Map::new()).score, 1.0);
    }

    #[test]
    fn nothing_to_look_for_fails() {
        let g = ContainsGrader::new(None, false);
        let out = g.grade("anything", None, &Map::new());
        assert_eq!(out.label.as_deref(), Some("FAIL"));
    }
}
