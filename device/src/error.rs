//! ==============================================================================
//! error.rs - error taxonomy for the device node
//! ==============================================================================
//!
//! none of these reach a peer or the process exit code. handlers log them
//! where they happen and drop the message; startup logs them and carries on
//! in degraded mode.
//!
//! ==============================================================================

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    /// payload of a message could not be decoded
    #[error("failed to decode {kind} from {sender}: {source}")]
    Decode {
        kind: &'static str,
        sender: String,
        #[source]
        source: serde_json::Error,
    },

    /// snapshot could not be written
    #[error("failed to persist snapshot to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// snapshot could not be serialized or parsed
    #[error("snapshot encoding error: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// key, certificate or trust bundle unusable
    #[error("credential error ({path}): {reason}")]
    Credential { path: PathBuf, reason: String },

    /// listener could not resolve or bind its address
    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    /// claimed sender does not match the record it pushed
    #[error("sender {sender} pushed a record named {claimed}")]
    SenderMismatch { sender: String, claimed: String },
}

impl NodeError {
    pub(crate) fn credential(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Credential {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type NodeResult<T> = std::result::Result<T, NodeError>;
