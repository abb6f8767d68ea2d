// src/engine/mod.rs

//! Program execution engine.
//!
//! This module ties together:
//! - the evaluator, which turns a program and its effect into the next
//!   executable step
//! - the effect checker, which decides whether a step has taken effect
//! - the dry-run loop and push offload
//! - the runner, which performs one tick's worth of work for one program
//! - the scheduler, which owns the active programs and drives ticks
//!
//! Everything below the scheduler is a pure transition over the wallet and
//! push collaborators held by [`ExecutionContext`]; only the scheduler touches
//! the store.

use std::sync::Arc;
use std::time::Duration;

use crate::program::ActionEffect;
use crate::push::{PushMessage, PushServer};
use crate::wallet::{BroadcastTx, WalletApi};

pub mod checker;
pub mod clock;
pub mod dryrun;
pub mod evaluator;
pub mod runner;
pub mod scheduler;

pub use checker::check_effect;
pub use clock::{Clock, ManualClock, SystemClock};
pub use dryrun::{dryrun_program, offload_program, MAX_DRYRUN_STEPS};
pub use evaluator::{evaluate, ExecutableAction};
pub use runner::execute_program;
pub use scheduler::{ActiveProgram, Scheduler};

/// Result of performing (or simulating) one step.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutput {
    pub effect: ActionEffect,
    pub broadcast_txs: Vec<BroadcastTx>,
}

impl ExecutionOutput {
    pub fn done() -> Self {
        Self {
            effect: ActionEffect::done(),
            broadcast_txs: Vec::new(),
        }
    }
}

/// Outcome of one effect check.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub is_effective: bool,
    /// How long to wait before checking again, in milliseconds.
    pub delay_ms: i64,
    /// Set when a chained `Seq` effect advanced without anything being
    /// executed. The caller stores it and checks again right away.
    pub updated_effect: Option<ActionEffect>,
}

impl CheckResult {
    pub fn effective() -> Self {
        Self {
            is_effective: true,
            delay_ms: 0,
            updated_effect: None,
        }
    }

    pub fn waiting(delay_ms: i64) -> Self {
        Self {
            is_effective: false,
            delay_ms,
            updated_effect: None,
        }
    }
}

/// Retry policy for failed effect checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub min_ms: i64,
    pub max_ms: i64,
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min_ms: 2_000,
            max_ms: 10 * 60 * 1_000,
            factor: 1.2,
        }
    }
}

impl BackoffPolicy {
    /// Delay after a failure, given the delay used before it.
    pub fn next_delay(&self, last_delay_ms: i64) -> i64 {
        let scaled = (last_delay_ms.max(0) as f64 * self.factor).round() as i64;
        scaled.clamp(self.min_ms, self.max_ms)
    }
}

/// Knobs for the engine, derived from the validated config.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    pub tick_interval: Duration,
    pub enable_dryrun: bool,
    pub backoff: BackoffPolicy,
    /// Sent with the last push event of an offloaded chain.
    pub push_message: PushMessage,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1_000),
            enable_dryrun: true,
            backoff: BackoffPolicy::default(),
            push_message: PushMessage {
                title: "Actions complete".to_string(),
                body: "Your queued actions have finished.".to_string(),
            },
        }
    }
}

/// Collaborators and settings shared by every program this process runs.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub wallet: Arc<dyn WalletApi>,
    pub push: Arc<dyn PushServer>,
    /// Programs of other clients are left alone.
    pub client_id: String,
    pub options: EngineOptions,
}
