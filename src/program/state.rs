// src/program/state.rs

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::program::effect::ActionEffect;
use crate::program::op::ActionOp;

/// `next_execution_time` value meaning "never run again".
pub const NEVER: i64 = -1;

/// Strings shown once the whole program has completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteMessage {
    pub title: String,
    pub message: String,
}

/// An immutable program definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionProgram {
    pub program_id: String,
    pub action_op: ActionOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_message: Option<CompleteMessage>,
}

impl ActionProgram {
    /// Wrap an operation tree with a freshly generated program id.
    pub fn new(action_op: ActionOp) -> Self {
        let program_id = generate_program_id(&action_op);
        Self {
            program_id,
            action_op,
            complete_message: None,
        }
    }

    pub fn with_complete_message(mut self, title: &str, message: &str) -> Self {
        self.complete_message = Some(CompleteMessage {
            title: title.to_string(),
            message: message.to_string(),
        });
        self
    }
}

/// Mutable progress record, persisted after every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramState {
    pub client_id: String,
    pub program_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<ActionEffect>,
    /// The current effect has been confirmed by the effect checker.
    pub effective: bool,
    /// Set while a scheduler run owns this program.
    pub executing: bool,
    pub last_execution_time: i64,
    pub next_execution_time: i64,
}

impl ProgramState {
    /// Initial state for a program that has not started yet.
    pub fn initial(client_id: &str, program_id: &str, now: i64) -> Self {
        Self {
            client_id: client_id.to_string(),
            program_id: program_id.to_string(),
            effect: None,
            effective: false,
            executing: false,
            last_execution_time: 0,
            next_execution_time: now,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.next_execution_time == NEVER
    }
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// 32 hex characters derived from the operation, the wall clock and a
/// process-local counter, so two identical operations scheduled in the same
/// instant still get distinct ids.
fn generate_program_id(op: &ActionOp) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut hasher = blake3::Hasher::new();
    hasher.update(&serde_json::to_vec(op).unwrap_or_default());
    hasher.update(&nanos.to_le_bytes());
    hasher.update(&counter.to_le_bytes());
    hasher.update(&std::process::id().to_le_bytes());

    let hex = hasher.finalize().to_hex();
    hex.as_str()[..32].to_string()
}
