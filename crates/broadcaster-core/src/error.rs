/// Failures talking to the broadcaster server.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// Endpoint could not be built from the server config.  Not retryable.
    #[error("Invalid URL")]
    InvalidUrl,

    #[error("Invalid server response")]
    InvalidResponse,

    /// Any status other than 200.
    #[error("Server error: {0}")]
    ServerError(u16),

    #[error("Failed to parse server response")]
    Decode(#[source] serde_json::Error),

    #[error("Network error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Request timed out")]
    Timeout,
}

impl DirectoryError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DirectoryError::Timeout
        } else if err.is_builder() {
            DirectoryError::InvalidUrl
        } else if err.is_decode() {
            DirectoryError::InvalidResponse
        } else {
            DirectoryError::Transport(err)
        }
    }
}

/// Failures reported by the media-player collaborator.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("player unavailable: {0}")]
    Unavailable(String),

    #[error("player command failed: {0}")]
    Command(String),
}
