// src/wallet/mock.rs

//! In-memory wallet used by tests.
//!
//! Every approval and broadcast is recorded so tests can assert on what the
//! engine actually did. Transactions are confirmed as soon as they are
//! broadcast unless configured otherwise.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use futures::future::BoxFuture;

use super::{
    ApprovableAction, BorrowEngine, BroadcastTx, Confirmations, LoanRequest, NetworkFee,
    PendingTxMap, SignedTransaction, SwapQuote, SwapRequest, SwapResult, WalletApi,
    WalletTransaction,
};
use crate::amount;
use crate::errors::{ActionQueueError, Result};

#[derive(Debug)]
struct MockWalletState {
    balances: HashMap<(String, Option<String>), String>,
    transactions: HashMap<String, WalletTransaction>,
    plugin_ids: HashMap<String, String>,
    borrow_plugins: HashSet<String>,
    auto_confirmations: Confirmations,
    swap_payout: String,
    credit_swap_payout: bool,
    /// Swap payouts that land right after the next balance read.
    pending_credits: Vec<((String, Option<String>), String)>,
    fail_next_approvals: usize,
    fail_lookups: usize,
    tx_counter: u64,
    approve_attempts: Vec<String>,
    approved: Vec<String>,
    broadcasts: Vec<SignedTransaction>,
    dryruns: Vec<(String, usize)>,
}

#[derive(Debug, Clone)]
pub struct MockWallet {
    state: Arc<Mutex<MockWalletState>>,
}

impl Default for MockWallet {
    fn default() -> Self {
        Self::new()
    }
}

impl MockWallet {
    /// A wallet with one lending plugin (`"aave"`), ethereum wallets,
    /// instant confirmations and a swap payout of `1000`.
    pub fn new() -> Self {
        let mut borrow_plugins = HashSet::new();
        borrow_plugins.insert("aave".to_string());
        Self {
            state: Arc::new(Mutex::new(MockWalletState {
                balances: HashMap::new(),
                transactions: HashMap::new(),
                plugin_ids: HashMap::new(),
                borrow_plugins,
                auto_confirmations: Confirmations::Count(1),
                swap_payout: "1000".to_string(),
                credit_swap_payout: true,
                pending_credits: Vec::new(),
                fail_next_approvals: 0,
                fail_lookups: 0,
                tx_counter: 0,
                approve_attempts: Vec::new(),
                approved: Vec::new(),
                broadcasts: Vec::new(),
                dryruns: Vec::new(),
            })),
        }
    }

    pub fn set_balance(&self, wallet_id: &str, token_id: Option<&str>, amount: &str) {
        let mut state = self.state.lock().unwrap();
        state.balances.insert(
            (wallet_id.to_string(), token_id.map(str::to_string)),
            amount.to_string(),
        );
    }

    pub fn set_plugin_id(&self, wallet_id: &str, plugin_id: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .plugin_ids
            .insert(wallet_id.to_string(), plugin_id.to_string());
    }

    /// Confirmation state given to newly broadcast transactions.
    pub fn set_auto_confirmations(&self, confirmations: Confirmations) {
        self.state.lock().unwrap().auto_confirmations = confirmations;
    }

    /// Insert or overwrite a transaction the wallet knows about.
    pub fn set_transaction(&self, txid: &str, confirmations: Confirmations) {
        let mut state = self.state.lock().unwrap();
        state.transactions.insert(
            txid.to_string(),
            WalletTransaction {
                txid: txid.to_string(),
                confirmations,
            },
        );
    }

    pub fn set_swap_payout(&self, payout: &str, credit_on_approve: bool) {
        let mut state = self.state.lock().unwrap();
        state.swap_payout = payout.to_string();
        state.credit_swap_payout = credit_on_approve;
    }

    /// Make the next `n` approvals (swap or loan) fail.
    pub fn fail_next_approvals(&self, n: usize) {
        self.state.lock().unwrap().fail_next_approvals = n;
    }

    /// Make the next `n` balance or transaction lookups fail.
    pub fn fail_next_lookups(&self, n: usize) {
        self.state.lock().unwrap().fail_lookups = n;
    }

    /// Labels of every approval attempt, including failed ones.
    pub fn approve_attempts(&self) -> Vec<String> {
        self.state.lock().unwrap().approve_attempts.clone()
    }

    /// Txids of successful approvals.
    pub fn approved(&self) -> Vec<String> {
        self.state.lock().unwrap().approved.clone()
    }

    pub fn broadcasts(&self) -> Vec<SignedTransaction> {
        self.state.lock().unwrap().broadcasts.clone()
    }

    /// `(label, pending tx count for the wallet)` per dry-run call.
    pub fn dryruns(&self) -> Vec<(String, usize)> {
        self.state.lock().unwrap().dryruns.clone()
    }

    fn take_lookup_failure(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_lookups > 0 {
            state.fail_lookups -= 1;
            return Err(anyhow!("mock wallet lookup failure").into());
        }
        Ok(())
    }

    /// Record an approval attempt; fails if a failure was scheduled.
    fn begin_approve(&self, label: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.approve_attempts.push(label.to_string());
        if state.fail_next_approvals > 0 {
            state.fail_next_approvals -= 1;
            return Err(anyhow!("mock approval failed for {label}").into());
        }
        Ok(())
    }

    /// Record a broadcast tx and make it visible to lookups.
    fn record_broadcast(&self, tx: &SignedTransaction) {
        let mut state = self.state.lock().unwrap();
        let confirmations = state.auto_confirmations;
        state.broadcasts.push(tx.clone());
        state.transactions.insert(
            tx.txid.clone(),
            WalletTransaction {
                txid: tx.txid.clone(),
                confirmations,
            },
        );
    }

    fn next_tx(&self, label: &str) -> SignedTransaction {
        let mut state = self.state.lock().unwrap();
        state.tx_counter += 1;
        SignedTransaction {
            txid: format!("{label}-{}", state.tx_counter),
            signed_tx: format!("{:04x}", state.tx_counter),
        }
    }

    fn fee() -> NetworkFee {
        NetworkFee {
            currency_code: "ETH".to_string(),
            native_amount: "21000".to_string(),
        }
    }
}

impl WalletApi for MockWallet {
    fn balance<'a>(
        &'a self,
        wallet_id: &'a str,
        token_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.take_lookup_failure()?;
            let key = (wallet_id.to_string(), token_id.map(str::to_string));
            let mut state = self.state.lock().unwrap();
            let current = state
                .balances
                .get(&key)
                .cloned()
                .unwrap_or_else(|| "0".to_string());

            let (landed, waiting): (Vec<_>, Vec<_>) =
                std::mem::take(&mut state.pending_credits)
                    .into_iter()
                    .partition(|(k, _)| *k == key);
            state.pending_credits = waiting;
            let mut settled = current.clone();
            for (_, credit) in landed {
                settled = amount::add(&settled, &credit)?;
            }
            state.balances.insert(key, settled);

            Ok(current)
        })
    }

    fn find_transaction<'a>(
        &'a self,
        _wallet_id: &'a str,
        tx_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<WalletTransaction>>> {
        Box::pin(async move {
            self.take_lookup_failure()?;
            Ok(self.state.lock().unwrap().transactions.get(tx_id).cloned())
        })
    }

    fn plugin_id<'a>(&'a self, wallet_id: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            Ok(state
                .plugin_ids
                .get(wallet_id)
                .cloned()
                .unwrap_or_else(|| "ethereum".to_string()))
        })
    }

    fn fetch_swap_quote(&self, request: SwapRequest) -> BoxFuture<'_, Result<Box<dyn SwapQuote>>> {
        Box::pin(async move {
            let quote: Box<dyn SwapQuote> = Box::new(MockSwapQuote {
                wallet: self.clone(),
                request,
            });
            Ok(quote)
        })
    }

    fn broadcast_and_save<'a>(
        &'a self,
        _wallet_id: &'a str,
        tx: &'a SignedTransaction,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.record_broadcast(tx);
            Ok(())
        })
    }

    fn borrow_engine<'a>(
        &'a self,
        borrow_plugin_id: &'a str,
        wallet_id: &'a str,
    ) -> BoxFuture<'a, Result<Arc<dyn BorrowEngine>>> {
        Box::pin(async move {
            if !self
                .state
                .lock()
                .unwrap()
                .borrow_plugins
                .contains(borrow_plugin_id)
            {
                return Err(ActionQueueError::BorrowPluginNotFound(
                    borrow_plugin_id.to_string(),
                ));
            }
            let engine: Arc<dyn BorrowEngine> = Arc::new(MockBorrowEngine {
                wallet: self.clone(),
                wallet_id: wallet_id.to_string(),
            });
            Ok(engine)
        })
    }
}

struct MockSwapQuote {
    wallet: MockWallet,
    request: SwapRequest,
}

impl SwapQuote for MockSwapQuote {
    fn network_fee(&self) -> NetworkFee {
        MockWallet::fee()
    }

    fn approve(&self) -> BoxFuture<'_, Result<SwapResult>> {
        Box::pin(async move {
            self.wallet.begin_approve("swap")?;
            let tx = self.wallet.next_tx("swap");
            self.wallet.record_broadcast(&tx);

            let (payout, credit) = {
                let state = self.wallet.state.lock().unwrap();
                (state.swap_payout.clone(), state.credit_swap_payout)
            };
            let to_key = (
                self.request.to_wallet_id.clone(),
                self.request.to_token_id.clone(),
            );

            let mut state = self.wallet.state.lock().unwrap();
            state.approved.push(tx.txid.clone());
            if credit {
                state.pending_credits.push((to_key, payout.clone()));
            }

            Ok(SwapResult {
                transaction: tx,
                payout_native_amount: payout,
                payout_address: format!("addr-{}", self.request.to_wallet_id),
            })
        })
    }
}

struct MockBorrowEngine {
    wallet: MockWallet,
    wallet_id: String,
}

impl MockBorrowEngine {
    fn action(&self, kind: &str, request: LoanRequest) -> Box<dyn ApprovableAction> {
        Box::new(MockApprovableAction {
            wallet: self.wallet.clone(),
            wallet_id: self.wallet_id.clone(),
            label: format!("{kind}-{}-{}", self.wallet_id, request.native_amount),
        })
    }
}

impl BorrowEngine for MockBorrowEngine {
    fn borrow(&self, request: LoanRequest) -> BoxFuture<'_, Result<Box<dyn ApprovableAction>>> {
        Box::pin(async move { Ok(self.action("borrow", request)) })
    }

    fn deposit(&self, request: LoanRequest) -> BoxFuture<'_, Result<Box<dyn ApprovableAction>>> {
        Box::pin(async move { Ok(self.action("deposit", request)) })
    }

    fn repay(&self, request: LoanRequest) -> BoxFuture<'_, Result<Box<dyn ApprovableAction>>> {
        Box::pin(async move { Ok(self.action("repay", request)) })
    }

    fn withdraw(&self, request: LoanRequest) -> BoxFuture<'_, Result<Box<dyn ApprovableAction>>> {
        Box::pin(async move { Ok(self.action("withdraw", request)) })
    }
}

struct MockApprovableAction {
    wallet: MockWallet,
    wallet_id: String,
    label: String,
}

impl ApprovableAction for MockApprovableAction {
    fn dryrun<'a>(&'a self, pending: &'a PendingTxMap) -> BoxFuture<'a, Result<Vec<BroadcastTx>>> {
        Box::pin(async move {
            let pending_count = pending.get(&self.wallet_id).map_or(0, Vec::len);
            self.wallet
                .state
                .lock()
                .unwrap()
                .dryruns
                .push((self.label.clone(), pending_count));

            // The nonce a real engine would pick follows the pending txs.
            let tx = SignedTransaction {
                txid: format!("{}-dry-{pending_count}", self.label),
                signed_tx: format!("{:04x}", pending_count),
            };
            Ok(vec![BroadcastTx {
                wallet_id: self.wallet_id.clone(),
                network_fee: MockWallet::fee(),
                tx,
            }])
        })
    }

    fn approve(&self) -> BoxFuture<'_, Result<Vec<BroadcastTx>>> {
        Box::pin(async move {
            self.wallet.begin_approve(&self.label)?;
            let tx = self.wallet.next_tx(&self.label);
            self.wallet.record_broadcast(&tx);
            self.wallet
                .state
                .lock()
                .unwrap()
                .approved
                .push(tx.txid.clone());
            Ok(vec![BroadcastTx {
                wallet_id: self.wallet_id.clone(),
                network_fee: MockWallet::fee(),
                tx,
            }])
        })
    }
}
