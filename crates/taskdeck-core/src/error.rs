use thiserror::Error;

/// Failures reported by a [`crate::backend::Backend`].
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("not authenticated: {0}")]
    Auth(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("backend request failed: {0}")]
    Remote(String),

    #[error("datastore I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed record: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Remote(err.to_string())
    }
}

impl From<anyhow::Error> for BackendError {
    fn from(err: anyhow::Error) -> Self {
        BackendError::Remote(format!("{err:#}"))
    }
}

/// What the user sees when an operation fails.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("please log in: {0}")]
    Auth(String),

    #[error("{0}")]
    Remote(String),

    #[error("{0}")]
    NotFound(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::Auth(_) => "auth",
            AppError::Remote(_) => "remote",
            AppError::NotFound(_) => "not_found",
        }
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Auth(msg) => AppError::Auth(msg),
            BackendError::NotFound(msg) => AppError::NotFound(msg),
            other => AppError::Remote(other.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
