use thiserror::Error;

pub type Result<T> = std::result::Result<T, SdkError>;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response; `message` is the node's `{success: false, message}` text.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("not authenticated: call login or register first")]
    NotAuthenticated,
}

impl SdkError {
    /// HTTP status of an API error, if this is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            SdkError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}
