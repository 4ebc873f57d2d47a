/// Failure taxonomy shared by the repository, artifact and installer layers.
///
/// Functions at the orchestration level return `anyhow::Result` and attach
/// context; callers recover the category with `err.downcast_ref::<KpmError>()`.
#[derive(Debug, thiserror::Error)]
pub enum KpmError {
    #[error("Invalid coordinates '{coordinates}': {reason}")]
    Format { coordinates: String, reason: String },

    #[error("Artifact not found: {url}")]
    NotFound { url: String },

    #[error("Operation '{operation}' is not supported by the {backend} repository")]
    Unsupported {
        operation: &'static str,
        backend: &'static str,
    },

    #[error("Network failure for {url}: {reason}")]
    TransientNetwork { url: String, reason: String },

    #[error("Unexpected HTTP status {status} for {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("Too many redirects (more than {max}) starting at {url}")]
    TooManyRedirects { url: String, max: usize },

    #[error("Invalid repository response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },

    #[error("SHA1 mismatch for {file}: expected {expected}, got {actual}")]
    Sha1Mismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("{0}")]
    Validation(String),
}

impl KpmError {
    pub fn format(coordinates: impl Into<String>, reason: impl Into<String>) -> Self {
        KpmError::Format {
            coordinates: coordinates.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        KpmError::Validation(message.into())
    }

    /// Only network-level hiccups are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KpmError::TransientNetwork { .. })
    }

    /// Short machine-readable name, used in result records.
    pub fn kind(&self) -> &'static str {
        match self {
            KpmError::Format { .. } => "format",
            KpmError::NotFound { .. } => "not_found",
            KpmError::Unsupported { .. } => "unsupported",
            KpmError::TransientNetwork { .. } => "network",
            KpmError::UnexpectedStatus { .. } => "unexpected_status",
            KpmError::TooManyRedirects { .. } => "too_many_redirects",
            KpmError::InvalidResponse { .. } => "invalid_response",
            KpmError::Sha1Mismatch { .. } => "sha1_mismatch",
            KpmError::Validation(_) => "validation",
        }
    }
}

/// Returns true when the error chain carries a retryable `KpmError`.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<KpmError>())
        .map(KpmError::is_retryable)
        .unwrap_or(false)
}
