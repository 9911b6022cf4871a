use crate::envelope::ApiErrorItem;

/// Boxed error produced by a [`Transport`](crate::Transport) before any response arrived.
pub type TransportError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Returned by a cancellable sleep when the governing token fires first.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// Missing or invalid setting detected while constructing a client.
    #[error("configuration error: {0}")]
    Config(String),
    /// Invalid call argument (scope, endpoint, secret path, ...).
    #[error("validation error: {0}")]
    Validation(String),
    /// AWS region outside the platform allowlist.
    #[error("invalid aws region: {0}")]
    InvalidRegion(String),
    /// Network or request execution error before any response was received.
    #[error("{provider} request failed: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: TransportError,
    },
    /// Non-success HTTP status code with raw response body.
    #[error("{provider} request failed with status {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },
    /// 2xx response whose envelope reported `success: false`.
    #[error("{provider} API returned unsuccessful response: {message}")]
    Api {
        provider: &'static str,
        message: String,
        errors: Vec<ApiErrorItem>,
    },
    /// Lookup matched nothing (zone by name, secret by path).
    #[error("{resource} not found: {name}")]
    NotFound { resource: &'static str, name: String },
    /// The caller's cancellation token fired during a wait or a transport call.
    #[error("operation cancelled")]
    Cancelled,
    /// Request body serialization failure.
    #[error("encode error: {0}")]
    Encode(String),
    /// Response decoding or shape validation error.
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<Cancelled> for PlatformError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

impl PlatformError {
    /// HTTP status carried by a [`PlatformError::Status`] error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether retrying the same call could plausibly succeed.
    ///
    /// Transport failures and retryable statuses (408, 429, 5xx) are transient;
    /// everything else, including cancellation, is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => is_retryable_status_code(*status),
            _ => false,
        }
    }
}

pub(crate) fn is_retryable_status_code(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}
