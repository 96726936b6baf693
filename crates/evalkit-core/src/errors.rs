use thiserror::Error;

/// How the retry engine should treat a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    Retryable,
    NonRetryable,
}

/// Failures of a single upstream provider call, already classified by the backend.
#[derive(Debug, Clone, Error)]
pub enum ProviderFault {
    /// Provider returned 429.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Request timed out (client side or 408).
    #[error("timeout: {0}")]
    Timeout(String),

    /// Generic upstream failure (5xx, overloaded, undecodable body).
    #[error("server error ({status:?}): {message}")]
    Server { status: Option<u16>, message: String },

    /// Connection-level failure before a response arrived.
    #[error("transport error: {0}")]
    Transport(String),

    /// Billing or authentication problem. Halts the run.
    #[error("billing/auth failure: {0}")]
    Billing(String),

    /// Content-safety refusal. Recoverable: becomes a sentinel result.
    #[error("content blocked: {0}")]
    ContentBlocked(String),

    /// Malformed request rejected by the provider.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("call failed after {attempts} attempts: {last}")]
    ExhaustedRetries {
        attempts: usize,
        #[source]
        last: Box<ProviderFault>,
    },
}

impl ProviderFault {
    pub fn class(&self) -> FaultClass {
        match self {
            Self::RateLimited(_) | Self::Timeout(_) | Self::Server { .. } | Self::Transport(_) => {
                FaultClass::Retryable
            }
            Self::Billing(_)
            | Self::ContentBlocked(_)
            | Self::InvalidRequest(_)
            | Self::ExhaustedRetries { .. } => FaultClass::NonRetryable,
        }
    }

    /// Whether the fault should stop the whole run rather than just this case.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ContentBlocked(_))
    }

    /// Short code for structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "rate_limited",
            Self::Timeout(_) => "timeout",
            Self::Server { .. } => "server_error",
            Self::Transport(_) => "transport_error",
            Self::Billing(_) => "billing",
            Self::ContentBlocked(_) => "content_blocked",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ExhaustedRetries { .. } => "exhausted_retries",
        }
    }
}

impl From<reqwest::Error> for ProviderFault {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_decode() {
            Self::Server {
                status: e.status().map(|s| s.as_u16()),
                message: format!("undecodable response: {}", e),
            }
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// A fatal fault that stopped an orchestrator invocation.
#[derive(Debug, Error)]
#[error("run {run_id} halted at case {case_id} (repetition {repetition}): {source}")]
pub struct RunHalted {
    pub run_id: String,
    pub case_id: String,
    pub repetition: u32,
    #[source]
    pub source: ProviderFault,
}

#[derive(Debug, Error)]
#[error("config error: {0}")]
pub struct ConfigError(pub String);
