//! Shorthand constructors for operation trees.

use action_queue::program::{ActionOp, AmountFor};
use action_queue::wallet::SignedTransaction;

pub fn seq(actions: Vec<ActionOp>) -> ActionOp {
    ActionOp::Seq { actions }
}

pub fn par(actions: Vec<ActionOp>) -> ActionOp {
    ActionOp::Par { actions }
}

pub fn loan_borrow(wallet_id: &str, token_id: Option<&str>, amount: &str) -> ActionOp {
    ActionOp::LoanBorrow {
        borrow_plugin_id: "aave".to_string(),
        wallet_id: wallet_id.to_string(),
        token_id: token_id.map(str::to_string),
        native_amount: amount.to_string(),
    }
}

pub fn loan_deposit(wallet_id: &str, token_id: Option<&str>, amount: &str) -> ActionOp {
    ActionOp::LoanDeposit {
        borrow_plugin_id: "aave".to_string(),
        wallet_id: wallet_id.to_string(),
        token_id: token_id.map(str::to_string),
        native_amount: amount.to_string(),
    }
}

pub fn loan_repay(wallet_id: &str, token_id: Option<&str>, amount: &str) -> ActionOp {
    ActionOp::LoanRepay {
        borrow_plugin_id: "aave".to_string(),
        wallet_id: wallet_id.to_string(),
        token_id: token_id.map(str::to_string),
        native_amount: amount.to_string(),
        from_token_id: None,
    }
}

pub fn loan_withdraw(wallet_id: &str, token_id: Option<&str>, amount: &str) -> ActionOp {
    ActionOp::LoanWithdraw {
        borrow_plugin_id: "aave".to_string(),
        wallet_id: wallet_id.to_string(),
        token_id: token_id.map(str::to_string),
        native_amount: amount.to_string(),
    }
}

pub fn broadcast_tx(wallet_id: &str, txid: &str, signed_tx: &str) -> ActionOp {
    ActionOp::BroadcastTx {
        wallet_id: wallet_id.to_string(),
        tx: SignedTransaction {
            txid: txid.to_string(),
            signed_tx: signed_tx.to_string(),
        },
    }
}

/// Builder for `ActionOp::Swap`, defaulting to native assets and `AmountFor::From`.
pub struct SwapBuilder {
    from_wallet_id: String,
    from_token_id: Option<String>,
    to_wallet_id: String,
    to_token_id: Option<String>,
    native_amount: String,
    amount_for: AmountFor,
    expected_payout_native_amount: Option<String>,
}

impl SwapBuilder {
    pub fn new(from_wallet_id: &str, to_wallet_id: &str, amount: &str) -> Self {
        Self {
            from_wallet_id: from_wallet_id.to_string(),
            from_token_id: None,
            to_wallet_id: to_wallet_id.to_string(),
            to_token_id: None,
            native_amount: amount.to_string(),
            amount_for: AmountFor::From,
            expected_payout_native_amount: None,
        }
    }

    pub fn from_token(mut self, token_id: &str) -> Self {
        self.from_token_id = Some(token_id.to_string());
        self
    }

    pub fn to_token(mut self, token_id: &str) -> Self {
        self.to_token_id = Some(token_id.to_string());
        self
    }

    pub fn amount_for(mut self, amount_for: AmountFor) -> Self {
        self.amount_for = amount_for;
        self
    }

    pub fn expected_payout(mut self, amount: &str) -> Self {
        self.expected_payout_native_amount = Some(amount.to_string());
        self
    }

    pub fn build(self) -> ActionOp {
        ActionOp::Swap {
            from_wallet_id: self.from_wallet_id,
            from_token_id: self.from_token_id,
            to_wallet_id: self.to_wallet_id,
            to_token_id: self.to_token_id,
            native_amount: self.native_amount,
            amount_for: self.amount_for,
            expected_payout_native_amount: self.expected_payout_native_amount,
        }
    }
}

pub fn swap(from_wallet_id: &str, to_wallet_id: &str, amount: &str) -> ActionOp {
    SwapBuilder::new(from_wallet_id, to_wallet_id, amount).build()
}
