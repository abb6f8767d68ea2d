// src/errors.rs

//! Crate-wide error type and helpers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error carried by a terminal `Done` effect.
///
/// This is the only error representation that survives persistence, so it is
/// a plain message rather than a boxed error.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct EffectError {
    pub message: String,
}

impl EffectError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ActionQueueError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid effect: {0}")]
    InvalidEffect(String),

    #[error("Unexpected null effect while {0}")]
    NullEffect(&'static str),

    #[error("Invalid native amount: {0}")]
    InvalidAmount(String),

    #[error("Wallet '{0}' not found")]
    WalletNotFound(String),

    #[error("Borrow plugin '{0}' not found")]
    BorrowPluginNotFound(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Transaction was dropped")]
    TransactionDropped,

    #[error(transparent)]
    Effect(#[from] EffectError),

    #[error("Push event '{0}' not found on push server")]
    PushEventNotFound(String),

    #[error("Broadcast failed for {event_id} event:\n\t{}", errors.join("\n\t"))]
    PushBroadcastFailed { event_id: String, errors: Vec<String> },

    #[error("Program '{0}' not found")]
    ProgramNotFound(String),

    #[error("Program Interrupted")]
    Interrupted,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ActionQueueError {
    /// Whether an error raised while checking an effect ends the program.
    ///
    /// Non-fatal errors are retried with backoff on a later tick.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ActionQueueError::TransactionDropped
                | ActionQueueError::Effect(_)
                | ActionQueueError::NullEffect(_)
                | ActionQueueError::InvalidEffect(_)
                | ActionQueueError::Unsupported(_)
                | ActionQueueError::PushBroadcastFailed { .. }
        )
    }

    /// Convert into the error stored on a `Done` effect.
    ///
    /// An error that was itself re-thrown from a `Done` effect is returned
    /// unchanged.
    pub fn to_effect_error(&self) -> EffectError {
        match self {
            ActionQueueError::Effect(inner) => inner.clone(),
            other => EffectError::new(other.to_string()),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ActionQueueError>;
