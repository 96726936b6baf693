use evalkit_core::errors::ConfigError;
use evalkit_core::providers::llm::anthropic::AnthropicBackend;
use evalkit_core::providers::llm::fake::FakeBackend;
use evalkit_core::providers::llm::openai::OpenAIBackend;
use evalkit_core::providers::llm::{GenerationAdapter, ModelAdapter};
use evalkit_core::sandbox::SandboxExecutor;
use std::env;
use std::sync::Arc;

/// Process environment, read once at startup.
#[derive(Clone, Debug)]
pub struct EnvConfig {
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: Option<String>,
    pub ollama_base_url: Option<String>,
    pub log_level: String,
    pub log_json: bool,
    pub python: String,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: None,
            anthropic_api_key: None,
            anthropic_base_url: None,
            ollama_base_url: None,
            log_level: "info".to_string(),
            log_json: false,
            python: "python3".to_string(),
        }
    }
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |k: &str| get(k).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();
        cfg.openai_api_key = non_empty("OPENAI_API_KEY");
        cfg.openai_base_url = non_empty("OPENAI_BASE_URL");
        cfg.anthropic_api_key = non_empty("ANTHROPIC_API_KEY");
        cfg.anthropic_base_url = non_empty("ANTHROPIC_BASE_URL");
        cfg.ollama_base_url = non_empty("OLLAMA_BASE_URL");
        if let Some(v) = non_empty("EVALKIT_LOG") {
            cfg.log_level = v;
        }
        if let Some(v) = non_empty("EVALKIT_LOG_JSON") {
            cfg.log_json = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = non_empty("EVALKIT_PYTHON") {
            cfg.python = v;
        }
        cfg
    }
}

/// Build an adapter from a `provider:model` spec.
pub fn build_adapter(
    spec: &str,
    env: &EnvConfig,
    sandbox: Arc<SandboxExecutor>,
) -> Result<Arc<dyn ModelAdapter>, ConfigError> {
    let (provider, model) = spec
        .split_once(':')
        .filter(|(p, m)| !p.is_empty() && !m.is_empty())
        .ok_or_else(|| {
            ConfigError(format!(
                "invalid model spec '{}': expected provider:model_name",
                spec
            ))
        })?;
    let http_err = |e: anyhow::Error| ConfigError(format!("failed to build HTTP client: {}", e));

    let adapter: Arc<dyn ModelAdapter> = match provider {
        "openai" => {
            let key = env
                .openai_api_key
                .clone()
                .ok_or_else(|| ConfigError("OPENAI_API_KEY is not set".into()))?;
            let mut backend = OpenAIBackend::new(model, Some(key)).map_err(http_err)?;
            if let Some(url) = &env.openai_base_url {
                backend = backend.with_base_url(url.as_str());
            }
            Arc::new(GenerationAdapter::new(backend, sandbox))
        }
        "anthropic" => {
            let key = env
                .anthropic_api_key
                .clone()
                .ok_or_else(|| ConfigError("ANTHROPIC_API_KEY is not set".into()))?;
            let mut backend = AnthropicBackend::new(model, key).map_err(http_err)?;
            if let Some(url) = &env.anthropic_base_url {
                backend = backend.with_base_url(url.as_str());
            }
            Arc::new(GenerationAdapter::new(backend, sandbox))
        }
        "ollama" => {
            let backend =
                OpenAIBackend::ollama(model, env.ollama_base_url.clone()).map_err(http_err)?;
            Arc::new(GenerationAdapter::new(backend, sandbox))
        }
        "fake" => Arc::new(GenerationAdapter::new(FakeBackend::echo(model), sandbox)),
        other => return Err(ConfigError(format!("unknown provider '{}'", other))),
    };
    Ok(adapter)
}
