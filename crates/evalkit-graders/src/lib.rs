use std::sync::Arc;

use evalkit_core::grader_api::Grader;
use evalkit_core::model::GraderSpec;

mod contains;
mod exact;
mod regex_match;

pub mod sentinel;

pub use sentinel::SentinelGuard;

/// Build the grader a pack asks for. Every grader is wrapped in
/// [`SentinelGuard`].
pub fn from_spec(spec: &GraderSpec) -> anyhow::Result<Arc<dyn Grader>> {
    let inner: Box<dyn Grader> = match spec {
        GraderSpec::Contains {
            keyword,
            case_sensitive,
        } => Box::new(contains::ContainsGrader::new(keyword.clone(), *case_sensitive)),
        GraderSpec::Exact { case_sensitive } => Box::new(exact::ExactGrader::new(*case_sensitive)),
        GraderSpec::Regex { pattern, flags } => Box::new(regex_match::RegexGrader::new(pattern, flags)?),
    };
    tracing::debug!(event = "grader.built", grader = inner.name());
    Ok(Arc::new(SentinelGuard::new(inner)))
}
