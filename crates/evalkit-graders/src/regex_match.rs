use evalkit_core::grader_api::Grader;
use evalkit_core::model::GradeOutcome;
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};

pub struct RegexGrader {
    re: Regex,
}

impl RegexGrader {
    pub fn new(pattern: &str, flags: &[String]) -> anyhow::Result<Self> {
        let mut b = RegexBuilder::new(pattern);
        apply_flags(&mut b, flags);
        let re = b.build().map_err(|e| {
            anyhow::anyhow!("config error: invalid regex pattern '{}': {}", pattern, e)
        })?;
        Ok(Self { re })
    }
}

impl Grader for RegexGrader {
    fn name(&self) -> &'static str {
        "regex"
    }

    fn grade(&self, output: &str, _expected: Option<&str>, _metadata: &Map<String, Value>) -> GradeOutcome {
        if self.re.is_match(output) {
            GradeOutcome::labeled(1.0, "PASS", format!("pattern '{}' matched", self.re.as_str()))
        } else {
            GradeOutcome::labeled(
                0.0,
                "FAIL",
                format!("pattern '{}' did not match", self.re.as_str()),
            )
        }
    }
}

fn apply_flags(b: &mut RegexBuilder, flags: &[String]) {
    for f in flags {
        match f.as_str() {
            "i" => {
                b.case_insensitive(true);
            }
            "m" => {
                b.multi_line(true);
            }
            "s" => {
                b.dot_matches_new_line(true);
            }
            other => {
                tracing::warn!(event = "grader.unknown_regex_flag", flag = %other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_change_matching() {
        let plain = RegexGrader::new("^answer: \\d+$", &[]).unwrap();
        assert_eq!(plain.grade("intro\nANSWER: 7", None, &Map::new()).score, 0.0);

        let flagged = RegexGrader::new("^answer: \\d+$", &["i".into(), "m".into()]).unwrap();
        assert_eq!(flagged.grade("intro\nANSWER: 7", None, &Map::new()).score, 1.0);
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let err = RegexGrader::new("(unclosed", &[]).err().unwrap();
        assert!(err.to_string().contains("invalid regex pattern"));
    }
}
