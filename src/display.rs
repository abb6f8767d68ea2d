// src/display.rs

//! Display projection for UI layers.
//!
//! A program's operation tree and its current effect are folded into a tree of
//! [`DisplayInfo`] nodes. Each node's status is derived from that node's own
//! effect only, so a failed step is shown as failed while the steps before it
//! keep showing as done.

use std::fmt;

use serde::Serialize;

use crate::errors::EffectError;
use crate::program::{is_terminal, ActionEffect, ActionOp, ActionProgram, CompleteMessage};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayStatus {
    Pending,
    Active,
    Done,
    Error(EffectError),
}

impl fmt::Display for DisplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayStatus::Pending => f.write_str("pending"),
            DisplayStatus::Active => f.write_str("active"),
            DisplayStatus::Done => f.write_str("done"),
            DisplayStatus::Error(err) => write!(f, "error: {err}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    pub title: String,
    pub message: String,
    pub status: DisplayStatus,
    pub steps: Vec<DisplayInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete_message: Option<CompleteMessage>,
}

impl DisplayInfo {
    fn write_tree(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        writeln!(f, "{indent}[{}] {}: {}", self.status, self.title, self.message)?;
        for step in &self.steps {
            step.write_tree(f, depth + 1)?;
        }
        Ok(())
    }
}

/// Indented tree, one line per node.
impl fmt::Display for DisplayInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_tree(f, 0)?;
        if let Some(complete) = &self.complete_message {
            writeln!(f, "on completion: {}: {}", complete.title, complete.message)?;
        }
        Ok(())
    }
}

/// Display tree for a whole program, including its completion strings.
pub fn program_display_info(program: &ActionProgram, effect: Option<&ActionEffect>) -> DisplayInfo {
    DisplayInfo {
        complete_message: program.complete_message.clone(),
        ..display_info(&program.action_op, effect)
    }
}

pub fn display_info(op: &ActionOp, effect: Option<&ActionEffect>) -> DisplayInfo {
    let (title, message) = describe(op);
    let steps = match op {
        ActionOp::Seq { actions } => actions
            .iter()
            .enumerate()
            .map(|(index, child)| display_info(child, seq_child_effect(effect, index).as_ref()))
            .collect(),
        ActionOp::Par { actions } => actions
            .iter()
            .enumerate()
            .map(|(index, child)| display_info(child, par_child_effect(effect, index).as_ref()))
            .collect(),
        _ => Vec::new(),
    };

    DisplayInfo {
        title,
        message,
        status: status_of(op, effect),
        steps,
        complete_message: None,
    }
}

fn status_of(op: &ActionOp, effect: Option<&ActionEffect>) -> DisplayStatus {
    let Some(effect) = effect else {
        return DisplayStatus::Pending;
    };
    if !is_terminal(op, effect) {
        return DisplayStatus::Active;
    }
    match effect.errors().into_iter().next() {
        Some(err) => DisplayStatus::Error(err),
        None => DisplayStatus::Done,
    }
}

/// A successful `Done` covers every child.
fn covers_children(effect: &ActionEffect) -> bool {
    matches!(effect, ActionEffect::Done { error: None, .. })
}

fn seq_child_effect(
    effect: Option<&ActionEffect>,
    index: usize,
) -> Option<ActionEffect> {
    let effect = effect?;
    if covers_children(effect) {
        return Some(effect.clone());
    }
    match effect {
        ActionEffect::Seq {
            op_index,
            child_effects,
        } => {
            if index < *op_index {
                Some(ActionEffect::done())
            } else if index == *op_index {
                // A push chain keeps later links after opIndex; the link at
                // opIndex is what this child is waiting for.
                child_effects.get(index).cloned().flatten()
            } else {
                None
            }
        }
        _ => None,
    }
}

fn par_child_effect(
    effect: Option<&ActionEffect>,
    index: usize,
) -> Option<ActionEffect> {
    let effect = effect?;
    if covers_children(effect) {
        return Some(effect.clone());
    }
    match effect {
        ActionEffect::Par { child_effects } => child_effects.get(index).cloned().flatten(),
        _ => None,
    }
}

fn describe(op: &ActionOp) -> (String, String) {
    match op {
        ActionOp::Seq { actions } => (
            "Sequence".to_string(),
            format!("Running {} steps in order", actions.len()),
        ),
        ActionOp::Par { actions } => (
            "Parallel".to_string(),
            format!("Running {} steps together", actions.len()),
        ),
        ActionOp::Swap {
            from_wallet_id,
            from_token_id,
            to_wallet_id,
            to_token_id,
            ..
        } => (
            "Swap".to_string(),
            format!(
                "Swapping {} from wallet {from_wallet_id} to {} in wallet {to_wallet_id}",
                asset(from_token_id),
                asset(to_token_id)
            ),
        ),
        ActionOp::BroadcastTx { wallet_id, tx } => (
            "Broadcast transaction".to_string(),
            format!("Broadcasting {} from wallet {wallet_id}", tx.txid),
        ),
        ActionOp::LoanBorrow {
            borrow_plugin_id,
            token_id,
            ..
        } => (
            "Borrow".to_string(),
            format!("Borrowing {} from {borrow_plugin_id}", asset(token_id)),
        ),
        ActionOp::LoanDeposit {
            borrow_plugin_id,
            token_id,
            ..
        } => (
            format!("Deposit {}", asset(token_id)),
            format!("Depositing {} as collateral on {borrow_plugin_id}", asset(token_id)),
        ),
        ActionOp::LoanRepay {
            borrow_plugin_id,
            from_token_id: Some(collateral),
            ..
        } => (
            "Repay with collateral".to_string(),
            format!("Repaying the {borrow_plugin_id} loan with {collateral} collateral"),
        ),
        ActionOp::LoanRepay {
            borrow_plugin_id,
            token_id,
            ..
        } => (
            "Repay".to_string(),
            format!("Repaying {} on {borrow_plugin_id}", asset(token_id)),
        ),
        ActionOp::LoanWithdraw {
            borrow_plugin_id,
            token_id,
            ..
        } => (
            "Withdraw".to_string(),
            format!("Withdrawing {} from {borrow_plugin_id}", asset(token_id)),
        ),
    }
}

fn asset(token_id: &Option<String>) -> &str {
    token_id.as_deref().unwrap_or("native asset")
}
