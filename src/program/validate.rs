// src/program/validate.rs

use std::sync::LazyLock;

use regex::Regex;

use crate::amount::is_native_amount;
use crate::errors::{ActionQueueError, Result};
use crate::program::effect::ActionEffect;
use crate::program::op::ActionOp;

/// Deepest operation tree accepted at scheduling time.
pub const MAX_OP_DEPTH: usize = 16;

static HEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(0x)?([0-9a-fA-F]{2})+$").expect("static regex"));

/// Check an operation tree before it is scheduled.
///
/// - combinators must have at least one child
/// - ids must be non-empty
/// - amounts must be decimal integers
/// - pre-signed transactions must be hex
pub fn validate_op(op: &ActionOp) -> Result<()> {
    validate_op_at(op, "root", 0)
}

fn validate_op_at(op: &ActionOp, path: &str, depth: usize) -> Result<()> {
    if depth >= MAX_OP_DEPTH {
        return Err(invalid(path, format!("nesting exceeds {MAX_OP_DEPTH} levels")));
    }

    match op {
        ActionOp::Seq { actions } | ActionOp::Par { actions } => {
            if actions.is_empty() {
                return Err(invalid(path, format!("'{}' has no actions", op.kind())));
            }
            let open = if matches!(op, ActionOp::Seq { .. }) { '[' } else { '(' };
            let close = if open == '[' { ']' } else { ')' };
            for (index, child) in actions.iter().enumerate() {
                validate_op_at(child, &format!("{path}{open}{index}{close}"), depth + 1)?;
            }
        }
        ActionOp::Swap {
            from_wallet_id,
            to_wallet_id,
            native_amount,
            expected_payout_native_amount,
            ..
        } => {
            require_id(path, "fromWalletId", from_wallet_id)?;
            require_id(path, "toWalletId", to_wallet_id)?;
            require_amount(path, "nativeAmount", native_amount)?;
            if let Some(payout) = expected_payout_native_amount {
                require_amount(path, "expectedPayoutNativeAmount", payout)?;
            }
        }
        ActionOp::BroadcastTx { wallet_id, tx } => {
            require_id(path, "walletId", wallet_id)?;
            require_id(path, "tx.txid", &tx.txid)?;
            if !HEX_RE.is_match(&tx.signed_tx) {
                return Err(invalid(path, "tx.signedTx is not hex".to_string()));
            }
        }
        ActionOp::LoanBorrow {
            borrow_plugin_id,
            wallet_id,
            native_amount,
            ..
        }
        | ActionOp::LoanDeposit {
            borrow_plugin_id,
            wallet_id,
            native_amount,
            ..
        }
        | ActionOp::LoanRepay {
            borrow_plugin_id,
            wallet_id,
            native_amount,
            ..
        }
        | ActionOp::LoanWithdraw {
            borrow_plugin_id,
            wallet_id,
            native_amount,
            ..
        } => {
            require_id(path, "borrowPluginId", borrow_plugin_id)?;
            require_id(path, "walletId", wallet_id)?;
            require_amount(path, "nativeAmount", native_amount)?;
        }
    }

    Ok(())
}

/// Check that a persisted effect can be polled: no `None` children and every
/// `Seq` index in range.
pub fn validate_effect(effect: &ActionEffect) -> Result<()> {
    match effect {
        ActionEffect::Seq {
            op_index,
            child_effects,
        } => {
            if *op_index >= child_effects.len() {
                return Err(ActionQueueError::InvalidEffect(format!(
                    "seq opIndex {op_index} out of range for {} child effects",
                    child_effects.len()
                )));
            }
            for child in child_effects {
                validate_effect(child.as_ref().ok_or(ActionQueueError::NullEffect(
                    "validating a persisted effect",
                ))?)?;
            }
        }
        ActionEffect::Par { child_effects } => {
            for child in child_effects {
                validate_effect(child.as_ref().ok_or(ActionQueueError::NullEffect(
                    "validating a persisted effect",
                ))?)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn require_id(path: &str, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(path, format!("{field} must not be empty")));
    }
    Ok(())
}

fn require_amount(path: &str, field: &str, value: &str) -> Result<()> {
    if !is_native_amount(value) {
        return Err(invalid(
            path,
            format!("{field} '{value}' is not a decimal integer"),
        ));
    }
    Ok(())
}

fn invalid(path: &str, msg: String) -> ActionQueueError {
    ActionQueueError::InvalidOperation(format!("{path}: {msg}"))
}
