// src/wallet/mod.rs

//! Wallet and lending collaborator boundary.
//!
//! The engine never signs or broadcasts on its own; it asks a [`WalletApi`]
//! to do so. Production code plugs in an adapter over the wallet SDK; tests
//! use [`mock::MockWallet`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::amount::NativeAmount;
use crate::errors::Result;
use crate::program::op::AmountFor;

pub mod mock;

/// A signed transaction, ready to broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    pub txid: String,
    /// Hex-encoded raw transaction bytes.
    pub signed_tx: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkFee {
    pub currency_code: String,
    pub native_amount: NativeAmount,
}

/// A transaction an action has broadcast, or would broadcast when dry-run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastTx {
    pub wallet_id: String,
    pub network_fee: NetworkFee,
    pub tx: SignedTransaction,
}

/// Not-yet-confirmed transactions per wallet id, used to keep chained
/// simulations consistent (nonces, UTXO selection, balances).
///
/// Treated as a value: extend a clone, never the caller's map.
pub type PendingTxMap = BTreeMap<String, Vec<SignedTransaction>>;

/// Return a copy of `map` with every tx in `txs` appended under its wallet.
pub fn with_pending(map: &PendingTxMap, txs: &[BroadcastTx]) -> PendingTxMap {
    let mut next = map.clone();
    for broadcast in txs {
        next.entry(broadcast.wallet_id.clone())
            .or_default()
            .push(broadcast.tx.clone());
    }
    next
}

/// Confirmation state of a transaction as seen by its wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confirmations {
    Confirmed,
    Unconfirmed,
    Syncing,
    Dropped,
    #[serde(untagged)]
    Count(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletTransaction {
    pub txid: String,
    pub confirmations: Confirmations,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapRequest {
    pub from_wallet_id: String,
    pub from_token_id: Option<String>,
    pub to_wallet_id: String,
    pub to_token_id: Option<String>,
    pub native_amount: NativeAmount,
    pub quote_for: AmountFor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapResult {
    pub transaction: SignedTransaction,
    pub payout_native_amount: NativeAmount,
    pub payout_address: String,
}

/// A live swap quote. Approving it signs and broadcasts the swap.
pub trait SwapQuote: Send + Sync {
    fn network_fee(&self) -> NetworkFee;
    fn approve(&self) -> BoxFuture<'_, Result<SwapResult>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanRequest {
    pub native_amount: NativeAmount,
    pub token_id: Option<String>,
    /// Only meaningful for repay.
    pub from_token_id: Option<String>,
}

/// An action prepared by a borrow engine. Nothing happens until `approve`.
pub trait ApprovableAction: Send + Sync {
    /// Build the transactions `approve` would broadcast, without broadcasting.
    fn dryrun<'a>(&'a self, pending: &'a PendingTxMap) -> BoxFuture<'a, Result<Vec<BroadcastTx>>>;

    /// Sign, broadcast and save; returns the broadcast transactions in order.
    fn approve(&self) -> BoxFuture<'_, Result<Vec<BroadcastTx>>>;
}

/// A lending position on one wallet through one lending plugin.
pub trait BorrowEngine: Send + Sync {
    fn borrow(&self, request: LoanRequest) -> BoxFuture<'_, Result<Box<dyn ApprovableAction>>>;
    fn deposit(&self, request: LoanRequest) -> BoxFuture<'_, Result<Box<dyn ApprovableAction>>>;
    fn repay(&self, request: LoanRequest) -> BoxFuture<'_, Result<Box<dyn ApprovableAction>>>;
    fn withdraw(&self, request: LoanRequest) -> BoxFuture<'_, Result<Box<dyn ApprovableAction>>>;
}

/// Everything the engine needs from the wallet SDK.
pub trait WalletApi: Send + Sync {
    /// Current balance of `token_id` (or the native asset) in `wallet_id`.
    fn balance<'a>(
        &'a self,
        wallet_id: &'a str,
        token_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<NativeAmount>>;

    /// Look a transaction up by id. `None` while the wallet has not seen it.
    fn find_transaction<'a>(
        &'a self,
        wallet_id: &'a str,
        tx_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<WalletTransaction>>>;

    /// Currency plugin backing the wallet (e.g. `"ethereum"`).
    fn plugin_id<'a>(&'a self, wallet_id: &'a str) -> BoxFuture<'a, Result<String>>;

    fn fetch_swap_quote(&self, request: SwapRequest) -> BoxFuture<'_, Result<Box<dyn SwapQuote>>>;

    fn broadcast_and_save<'a>(
        &'a self,
        wallet_id: &'a str,
        tx: &'a SignedTransaction,
    ) -> BoxFuture<'a, Result<()>>;

    fn borrow_engine<'a>(
        &'a self,
        borrow_plugin_id: &'a str,
        wallet_id: &'a str,
    ) -> BoxFuture<'a, Result<Arc<dyn BorrowEngine>>>;
}

impl fmt::Debug for dyn WalletApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WalletApi")
    }
}
