// src/program/op.rs

use serde::{Deserialize, Serialize};

use crate::amount::NativeAmount;
use crate::wallet::SignedTransaction;

/// Which side of a swap `nativeAmount` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmountFor {
    From,
    To,
}

/// Immutable description of what a program should do.
///
/// The JSON form uses a `type` discriminant (`"seq"`, `"loan-borrow"`, ...)
/// and camelCase fields so persisted programs stay readable by other clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ActionOp {
    /// Run children strictly in order.
    Seq { actions: Vec<ActionOp> },

    /// Run children without ordering guarantees between them.
    Par { actions: Vec<ActionOp> },

    Swap {
        from_wallet_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_token_id: Option<String>,
        to_wallet_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to_token_id: Option<String>,
        native_amount: NativeAmount,
        amount_for: AmountFor,
        /// Overrides the quoted payout when deciding the target balance.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected_payout_native_amount: Option<NativeAmount>,
    },

    /// Broadcast a transaction that was signed ahead of time.
    BroadcastTx {
        wallet_id: String,
        tx: SignedTransaction,
    },

    LoanBorrow {
        borrow_plugin_id: String,
        wallet_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_id: Option<String>,
        native_amount: NativeAmount,
    },

    LoanDeposit {
        borrow_plugin_id: String,
        wallet_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_id: Option<String>,
        native_amount: NativeAmount,
    },

    LoanRepay {
        borrow_plugin_id: String,
        wallet_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_id: Option<String>,
        native_amount: NativeAmount,
        /// Repay using collateral of this token instead of the debt token.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_token_id: Option<String>,
    },

    LoanWithdraw {
        borrow_plugin_id: String,
        wallet_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_id: Option<String>,
        native_amount: NativeAmount,
    },
}

impl ActionOp {
    /// Combinator children, or an empty slice for leaves.
    pub fn children(&self) -> &[ActionOp] {
        match self {
            ActionOp::Seq { actions } | ActionOp::Par { actions } => actions,
            _ => &[],
        }
    }

    pub fn is_leaf(&self) -> bool {
        !matches!(self, ActionOp::Seq { .. } | ActionOp::Par { .. })
    }

    /// The `type` discriminant as it appears on disk.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionOp::Seq { .. } => "seq",
            ActionOp::Par { .. } => "par",
            ActionOp::Swap { .. } => "swap",
            ActionOp::BroadcastTx { .. } => "broadcast-tx",
            ActionOp::LoanBorrow { .. } => "loan-borrow",
            ActionOp::LoanDeposit { .. } => "loan-deposit",
            ActionOp::LoanRepay { .. } => "loan-repay",
            ActionOp::LoanWithdraw { .. } => "loan-withdraw",
        }
    }
}
