// ── Core error types ──
//
// User-facing errors from ontoscope-core. Consumers never see raw wire
// failures; the `From<WireError>` impl and the contextual constructors
// translate them into domain variants.

use thiserror::Error;

use crate::wire::WireError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Fetch errors ─────────────────────────────────────────────────
    #[error("Failed to fetch {object_type}: {reason}")]
    Fetch { object_type: String, reason: String },

    #[error("Object not found: {object_type} with primary key {primary_key}")]
    NotFound {
        object_type: String,
        primary_key: String,
    },

    // ── Action errors ────────────────────────────────────────────────
    #[error("Action {action} failed: {message}")]
    Action {
        action: String,
        message: String,
        /// Server-side error code, when the wire layer reports one.
        code: Option<String>,
    },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Operation not supported: {operation}")]
    Unsupported { operation: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Wrap a wire failure that happened while loading `object_type` data.
    pub fn fetch(object_type: &str, err: WireError) -> Self {
        match err {
            WireError::NotFound {
                object_type,
                primary_key,
            } => Self::NotFound {
                object_type,
                primary_key,
            },
            other => match Self::from(other) {
                Self::Internal(reason) | Self::Fetch { reason, .. } => Self::Fetch {
                    object_type: object_type.to_owned(),
                    reason,
                },
                translated => translated,
            },
        }
    }

    /// Wrap a wire failure that happened while applying `action`.
    pub fn action(action: &str, err: WireError) -> Self {
        match err {
            WireError::Rejected { message, code } => Self::Action {
                action: action.to_owned(),
                message,
                code,
            },
            other => Self::Action {
                action: action.to_owned(),
                message: other.to_string(),
                code: None,
            },
        }
    }
}

// ── Conversion from wire-layer errors ────────────────────────────────

impl From<WireError> for CoreError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Transport { message } => CoreError::Fetch {
                object_type: "<unknown>".into(),
                reason: message,
            },
            WireError::NotFound {
                object_type,
                primary_key,
            } => CoreError::NotFound {
                object_type,
                primary_key,
            },
            WireError::Rejected { message, code } => CoreError::Action {
                action: "<unknown>".into(),
                message,
                code,
            },
            WireError::Deserialization { message } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
            WireError::Unsupported(op) => CoreError::Unsupported {
                operation: op.to_string(),
            },
        }
    }
}
