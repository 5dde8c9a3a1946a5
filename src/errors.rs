//! Errors handling

use std::fmt;

/// Failure of a single GitLab API call.
#[derive(Debug)]
pub enum ApiError {
    /// The server rejected the credential (HTTP 401).
    Unauthorized,
    /// The addressed resource does not exist or is not visible (HTTP 404).
    NotFound,
    /// Network failures, unexpected statuses and malformed bodies.
    Transport(anyhow::Error),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApiError::Transport(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApiError::Unauthorized => f.write_str("the server rejected the access token"),
            ApiError::NotFound => f.write_str("resource not found"),
            ApiError::Transport(e) => write!(f, "request failed: {e:#}"),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> ApiError {
        ApiError::Transport(e)
    }
}
