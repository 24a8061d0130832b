use thiserror::Error;

use crate::api::ApiError;

/// Errors surfaced to callers of the client library.
///
/// Each variant is one decision the caller has to make; transport details
/// are folded in at the call site by the `from_*` constructors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The backend refused the credential. Retrying the same one is futile.
    #[error("credential rejected: {reason}")]
    CredentialRejected { reason: String },

    /// Network failure, timeout or server error. Safe to retry.
    #[error("temporary failure: {0}")]
    Transient(String),

    /// The session token is no longer valid. Log in again.
    #[error("session expired or invalid, please log in again")]
    Unauthenticated,

    #[error("upload rejected: {reason}")]
    UploadRejected { reason: String },

    #[error("job {id} is not ready for download")]
    NotReady { id: String },

    #[error("payment {id} failed")]
    PaymentFailed { id: String },

    #[error("payment {id} was cancelled")]
    PaymentCancelled { id: String },

    /// The payment stayed pending for longer than the reconciler waits.
    #[error("payment {id} is still being processed, check back later")]
    PaymentUnresolved { id: String },

    /// Non-success response on an authorized endpoint.
    #[error("backend error (status {status}): {detail}")]
    Backend { status: u16, detail: String },

    /// An operation was attempted in a state that does not allow it.
    #[error("{0}")]
    InvalidFlow(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl ClientError {
    /// Classifies a failure of a credential exchange.
    pub fn from_auth(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized { detail } => ClientError::CredentialRejected { reason: detail },
            ApiError::Rejected { status, detail } if status < 500 => {
                ClientError::CredentialRejected { reason: detail }
            }
            other => ClientError::Transient(other.to_string()),
        }
    }

    /// Classifies a failure of a request that carried the session token.
    pub fn from_authorized(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized { .. } => ClientError::Unauthenticated,
            ApiError::Rejected { status, detail } => ClientError::Backend { status, detail },
            other => ClientError::Transient(other.to_string()),
        }
    }

    /// Classifies a failure of `POST /api/upload`.
    pub fn from_upload(err: ApiError) -> Self {
        match err {
            ApiError::Rejected { status, detail } if status < 500 => {
                ClientError::UploadRejected { reason: detail }
            }
            other => Self::from_authorized(other),
        }
    }

    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, ClientError::Unauthenticated)
    }

    /// True when repeating the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Transient(_) => true,
            ClientError::Backend { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
