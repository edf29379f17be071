use thiserror::Error;

/// Failure of a backend POI query.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("backend rejected query: {0}")]
    Rejected(String),
}

impl BackendError {
    /// Client-side rejections (4xx, validation) as opposed to transport trouble.
    pub fn is_rejection(&self) -> bool {
        match self {
            BackendError::Status { status, .. } => (400..500).contains(status),
            BackendError::Rejected(_) => true,
            BackendError::Http(_) | BackendError::Decode(_) => false,
        }
    }

    pub fn is_transient(&self) -> bool {
        !self.is_rejection()
    }
}
