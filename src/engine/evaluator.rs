// src/engine/evaluator.rs

//! Turning a program position into an executable step.
//!
//! [`evaluate`] runs once the current effect has been confirmed effective (or
//! before the first step). It resolves everything that needs the wallet up
//! front, such as loan actions, and returns an [`ExecutableAction`] that can
//! either be simulated with `dryrun` or performed with `execute`.
//!
//! Positions whose work is already complete evaluate to
//! [`ExecutableAction::Done`], which has no side effects. That is how a `Par`
//! whose children finished at different times, or a `Seq` whose last child
//! just took effect, reaches a terminal effect without running a leaf twice.

use std::fmt;

use futures::future::BoxFuture;
use tracing::debug;

use super::{ExecutionContext, ExecutionOutput};
use crate::amount;
use crate::errors::{ActionQueueError, EffectError, Result};
use crate::program::{is_complete_when_effective, ActionEffect, ActionOp, AmountFor};
use crate::wallet::{
    with_pending, ApprovableAction, BroadcastTx, LoanRequest, NetworkFee, PendingTxMap,
    SignedTransaction, SwapRequest,
};

/// Destination chains whose wallet balance equals the payout address balance.
pub const ACCOUNT_BASED_PLUGINS: &[&str] = &[
    "avalanche",
    "binancesmartchain",
    "celo",
    "ethDev",
    "ethereum",
    "ethereumclassic",
    "fantom",
    "goerli",
    "kovan",
    "polygon",
    "rinkeby",
    "ropsten",
    "rsk",
];

/// Required confirmations for transactions broadcast by leaves.
const LEAF_CONFIRMATIONS: u32 = 1;

/// Percentage of a quoted payout we wait for when the quote was for the
/// source amount, since the final payout is not guaranteed.
const FROM_QUOTE_PAYOUT_PERCENT: u32 = 90;

pub enum ExecutableAction {
    /// Nothing left to do at this position.
    Done,
    /// Run `child`, storing its effect at `op_index` after `prev_effects`.
    Seq {
        op_index: usize,
        prev_effects: Vec<Option<ActionEffect>>,
        child: Box<ExecutableAction>,
    },
    Par {
        children: Vec<ExecutableAction>,
    },
    Swap {
        from_wallet_id: String,
        from_token_id: Option<String>,
        to_wallet_id: String,
        to_token_id: Option<String>,
        native_amount: String,
        amount_for: AmountFor,
        expected_payout_native_amount: Option<String>,
    },
    BroadcastTx {
        wallet_id: String,
        tx: SignedTransaction,
    },
    /// A loan action prepared by a borrow engine.
    Approvable(Box<dyn ApprovableAction>),
    /// A combinator child that could not be resolved. Running it fails with
    /// the recorded error at this position.
    Failed(EffectError),
}

impl fmt::Debug for ExecutableAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutableAction::Done => f.write_str("Done"),
            ExecutableAction::Seq {
                op_index, child, ..
            } => f
                .debug_struct("Seq")
                .field("op_index", op_index)
                .field("child", child)
                .finish_non_exhaustive(),
            ExecutableAction::Par { children } => {
                f.debug_struct("Par").field("children", children).finish()
            }
            ExecutableAction::Swap {
                from_wallet_id,
                to_wallet_id,
                native_amount,
                ..
            } => f
                .debug_struct("Swap")
                .field("from_wallet_id", from_wallet_id)
                .field("to_wallet_id", to_wallet_id)
                .field("native_amount", native_amount)
                .finish_non_exhaustive(),
            ExecutableAction::BroadcastTx { wallet_id, tx } => f
                .debug_struct("BroadcastTx")
                .field("wallet_id", wallet_id)
                .field("txid", &tx.txid)
                .finish(),
            ExecutableAction::Approvable(_) => f.write_str("Approvable"),
            ExecutableAction::Failed(error) => f.debug_tuple("Failed").field(error).finish(),
        }
    }
}

/// Resolve the next step for `op`, given the effect of its last step.
///
/// `effect` is `None` for a position that has not started yet.
pub fn evaluate<'a>(
    ctx: &'a ExecutionContext,
    op: &'a ActionOp,
    effect: Option<&'a ActionEffect>,
) -> BoxFuture<'a, Result<ExecutableAction>> {
    Box::pin(async move {
        if let Some(effect) = effect {
            if op.is_leaf() || is_complete_when_effective(op, effect) {
                return Ok(ExecutableAction::Done);
            }
        }

        match op {
            ActionOp::Seq { actions } => evaluate_seq(ctx, actions, effect).await,
            ActionOp::Par { actions } => evaluate_par(ctx, actions, effect).await,
            leaf => evaluate_leaf(ctx, leaf).await,
        }
    })
}

async fn evaluate_seq(
    ctx: &ExecutionContext,
    actions: &[ActionOp],
    effect: Option<&ActionEffect>,
) -> Result<ExecutableAction> {
    let Some(effect) = effect else {
        let first = actions
            .first()
            .ok_or_else(|| ActionQueueError::InvalidOperation("seq has no actions".into()))?;
        return Ok(ExecutableAction::Seq {
            op_index: 0,
            prev_effects: Vec::new(),
            child: Box::new(evaluate_child(ctx, first, None).await),
        });
    };

    let ActionEffect::Seq {
        op_index,
        child_effects,
    } = effect
    else {
        return Err(mismatch("seq", effect));
    };
    let op_index = *op_index;

    let current_op = actions.get(op_index).ok_or_else(|| {
        ActionQueueError::InvalidEffect(format!(
            "seq opIndex {op_index} out of range for {} actions",
            actions.len()
        ))
    })?;
    let current = child_effects
        .get(op_index)
        .and_then(Option::as_ref)
        .ok_or(ActionQueueError::NullEffect("evaluating a seq"))?;

    if !is_complete_when_effective(current_op, current) {
        // An unfinished combinator child keeps its slot.
        return Ok(ExecutableAction::Seq {
            op_index,
            prev_effects: child_effects[..op_index].to_vec(),
            child: Box::new(evaluate_child(ctx, current_op, Some(current)).await),
        });
    }

    match actions.get(op_index + 1) {
        Some(next_op) => {
            debug!(next_index = op_index + 1, "advancing seq");
            Ok(ExecutableAction::Seq {
                op_index: op_index + 1,
                prev_effects: child_effects[..=op_index].to_vec(),
                child: Box::new(evaluate_child(ctx, next_op, None).await),
            })
        }
        None => Ok(ExecutableAction::Seq {
            op_index,
            prev_effects: child_effects[..op_index].to_vec(),
            child: Box::new(ExecutableAction::Done),
        }),
    }
}

/// Evaluate a combinator child, keeping a failure at the child's position.
async fn evaluate_child(
    ctx: &ExecutionContext,
    op: &ActionOp,
    effect: Option<&ActionEffect>,
) -> ExecutableAction {
    match evaluate(ctx, op, effect).await {
        Ok(action) => action,
        Err(err) => {
            debug!(op = op.kind(), error = %err, "child could not be evaluated");
            ExecutableAction::Failed(err.to_effect_error())
        }
    }
}

async fn evaluate_par(
    ctx: &ExecutionContext,
    actions: &[ActionOp],
    effect: Option<&ActionEffect>,
) -> Result<ExecutableAction> {
    let mut children = Vec::with_capacity(actions.len());

    match effect {
        None => {
            for action in actions {
                children.push(evaluate_child(ctx, action, None).await);
            }
        }
        Some(ActionEffect::Par { child_effects }) if child_effects.len() == actions.len() => {
            for (action, child) in actions.iter().zip(child_effects) {
                let child = child
                    .as_ref()
                    .ok_or(ActionQueueError::NullEffect("evaluating a par"))?;
                children.push(evaluate_child(ctx, action, Some(child)).await);
            }
        }
        Some(other) => return Err(mismatch("par", other)),
    }

    Ok(ExecutableAction::Par { children })
}

async fn evaluate_leaf(ctx: &ExecutionContext, op: &ActionOp) -> Result<ExecutableAction> {
    let action = match op {
        ActionOp::Swap {
            from_wallet_id,
            from_token_id,
            to_wallet_id,
            to_token_id,
            native_amount,
            amount_for,
            expected_payout_native_amount,
        } => ExecutableAction::Swap {
            from_wallet_id: from_wallet_id.clone(),
            from_token_id: from_token_id.clone(),
            to_wallet_id: to_wallet_id.clone(),
            to_token_id: to_token_id.clone(),
            native_amount: native_amount.clone(),
            amount_for: *amount_for,
            expected_payout_native_amount: expected_payout_native_amount.clone(),
        },
        ActionOp::BroadcastTx { wallet_id, tx } => ExecutableAction::BroadcastTx {
            wallet_id: wallet_id.clone(),
            tx: tx.clone(),
        },
        ActionOp::LoanBorrow {
            borrow_plugin_id,
            wallet_id,
            token_id,
            native_amount,
        } => {
            let engine = ctx.wallet.borrow_engine(borrow_plugin_id, wallet_id).await?;
            let request = loan_request(native_amount, token_id, None);
            ExecutableAction::Approvable(engine.borrow(request).await?)
        }
        ActionOp::LoanDeposit {
            borrow_plugin_id,
            wallet_id,
            token_id,
            native_amount,
        } => {
            let engine = ctx.wallet.borrow_engine(borrow_plugin_id, wallet_id).await?;
            let request = loan_request(native_amount, token_id, None);
            ExecutableAction::Approvable(engine.deposit(request).await?)
        }
        ActionOp::LoanRepay {
            borrow_plugin_id,
            wallet_id,
            token_id,
            native_amount,
            from_token_id,
        } => {
            let engine = ctx.wallet.borrow_engine(borrow_plugin_id, wallet_id).await?;
            let request = loan_request(native_amount, token_id, from_token_id.as_ref());
            ExecutableAction::Approvable(engine.repay(request).await?)
        }
        ActionOp::LoanWithdraw {
            borrow_plugin_id,
            wallet_id,
            token_id,
            native_amount,
        } => {
            let engine = ctx.wallet.borrow_engine(borrow_plugin_id, wallet_id).await?;
            let request = loan_request(native_amount, token_id, None);
            ExecutableAction::Approvable(engine.withdraw(request).await?)
        }
        ActionOp::Seq { .. } | ActionOp::Par { .. } => {
            return Err(ActionQueueError::InvalidOperation(format!(
                "'{}' is not a leaf",
                op.kind()
            )));
        }
    };
    Ok(action)
}

impl ExecutableAction {
    /// Simulate this step without side effects.
    ///
    /// `Ok(None)` means the step cannot be simulated. Combinators report such
    /// children as `None` entries in their effect instead.
    pub fn dryrun<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        pending: &'a PendingTxMap,
    ) -> BoxFuture<'a, Result<Option<ExecutionOutput>>> {
        Box::pin(async move {
            match self {
                ExecutableAction::Done => Ok(Some(ExecutionOutput::done())),
                ExecutableAction::Seq {
                    op_index,
                    prev_effects,
                    child,
                } => {
                    let output = child.dryrun(ctx, pending).await?;
                    let (child_effect, broadcast_txs) = match output {
                        Some(out) => (Some(out.effect), out.broadcast_txs),
                        None => (None, Vec::new()),
                    };
                    Ok(Some(ExecutionOutput {
                        effect: seq_effect(*op_index, prev_effects, child_effect),
                        broadcast_txs,
                    }))
                }
                ExecutableAction::Par { children } => {
                    // Each child sees the simulated txs of the siblings before it.
                    let mut local = pending.clone();
                    let mut child_effects = Vec::with_capacity(children.len());
                    let mut broadcast_txs = Vec::new();
                    for child in children {
                        match child.dryrun(ctx, &local).await? {
                            Some(out) => {
                                local = with_pending(&local, &out.broadcast_txs);
                                child_effects.push(Some(out.effect));
                                broadcast_txs.extend(out.broadcast_txs);
                            }
                            None => child_effects.push(None),
                        }
                    }
                    Ok(Some(ExecutionOutput {
                        effect: ActionEffect::Par { child_effects },
                        broadcast_txs,
                    }))
                }
                // The payout is only known from a live quote.
                ExecutableAction::Swap { .. } => Ok(None),
                ExecutableAction::BroadcastTx { wallet_id, tx } => {
                    Ok(Some(broadcast_output(wallet_id, tx)))
                }
                ExecutableAction::Approvable(action) => {
                    let txs = action.dryrun(pending).await?;
                    Ok(Some(tx_confs_output(txs)?))
                }
                ExecutableAction::Failed(error) => Err(error.clone().into()),
            }
        })
    }

    /// Perform this step for real.
    ///
    /// `Par` children run one after another in declaration order: loan and
    /// swap actions update wallet nonces and UTXO selection, which is not safe
    /// to do concurrently. The first failure aborts the remaining children,
    /// and a child that could not be resolved stops the step before anything
    /// runs.
    pub fn execute<'a>(&'a self, ctx: &'a ExecutionContext) -> BoxFuture<'a, Result<ExecutionOutput>> {
        Box::pin(async move {
            if let Some(error) = self.unresolved() {
                return Err(error.clone().into());
            }
            match self {
                ExecutableAction::Done => Ok(ExecutionOutput::done()),
                ExecutableAction::Seq {
                    op_index,
                    prev_effects,
                    child,
                } => {
                    let out = child.execute(ctx).await?;
                    Ok(ExecutionOutput {
                        effect: seq_effect(*op_index, prev_effects, Some(out.effect)),
                        broadcast_txs: out.broadcast_txs,
                    })
                }
                ExecutableAction::Par { children } => {
                    let mut child_effects = Vec::with_capacity(children.len());
                    let mut broadcast_txs = Vec::new();
                    for child in children {
                        let out = child.execute(ctx).await?;
                        child_effects.push(Some(out.effect));
                        broadcast_txs.extend(out.broadcast_txs);
                    }
                    Ok(ExecutionOutput {
                        effect: ActionEffect::Par { child_effects },
                        broadcast_txs,
                    })
                }
                ExecutableAction::Swap {
                    from_wallet_id,
                    from_token_id,
                    to_wallet_id,
                    to_token_id,
                    native_amount,
                    amount_for,
                    expected_payout_native_amount,
                } => {
                    execute_swap(
                        ctx,
                        SwapRequest {
                            from_wallet_id: from_wallet_id.clone(),
                            from_token_id: from_token_id.clone(),
                            to_wallet_id: to_wallet_id.clone(),
                            to_token_id: to_token_id.clone(),
                            native_amount: native_amount.clone(),
                            quote_for: *amount_for,
                        },
                        expected_payout_native_amount.clone(),
                    )
                    .await
                }
                ExecutableAction::BroadcastTx { wallet_id, tx } => {
                    ctx.wallet.broadcast_and_save(wallet_id, tx).await?;
                    Ok(broadcast_output(wallet_id, tx))
                }
                ExecutableAction::Approvable(action) => {
                    let txs = action.approve().await?;
                    tx_confs_output(txs)
                }
                ExecutableAction::Failed(error) => Err(error.clone().into()),
            }
        })
    }

    /// The effect to store if running this step fails with `error`.
    ///
    /// The error lands on the position this step runs, so earlier `Seq`
    /// children keep their status. `Par` children run as one step, so every
    /// child with work left is marked.
    pub fn failure_effect(&self, error: &EffectError) -> ActionEffect {
        let effect = self.place_failure(error);
        if effect.errors().is_empty() {
            ActionEffect::failed(error.clone())
        } else {
            effect
        }
    }

    fn unresolved(&self) -> Option<&EffectError> {
        match self {
            ExecutableAction::Failed(error) => Some(error),
            ExecutableAction::Seq { child, .. } => child.unresolved(),
            ExecutableAction::Par { children } => children.iter().find_map(Self::unresolved),
            _ => None,
        }
    }

    fn place_failure(&self, error: &EffectError) -> ActionEffect {
        match self {
            ExecutableAction::Done => ActionEffect::done(),
            ExecutableAction::Seq {
                op_index,
                prev_effects,
                child,
            } => seq_effect(*op_index, prev_effects, Some(child.place_failure(error))),
            ExecutableAction::Par { children } => ActionEffect::Par {
                child_effects: children
                    .iter()
                    .map(|child| Some(child.place_failure(error)))
                    .collect(),
            },
            // A child that failed to resolve keeps its own message.
            ExecutableAction::Failed(own) => ActionEffect::failed(own.clone()),
            _ => ActionEffect::failed(error.clone()),
        }
    }
}

async fn execute_swap(
    ctx: &ExecutionContext,
    request: SwapRequest,
    expected_payout: Option<String>,
) -> Result<ExecutionOutput> {
    // Balance thresholds only hold for account-based destinations; refuse
    // before anything is signed.
    let to_plugin = ctx.wallet.plugin_id(&request.to_wallet_id).await?;
    if !ACCOUNT_BASED_PLUGINS.contains(&to_plugin.as_str()) {
        return Err(ActionQueueError::Unsupported(format!(
            "swap destination plugin '{to_plugin}'; supported: {}",
            ACCOUNT_BASED_PLUGINS.join(", ")
        )));
    }

    let quote = ctx.wallet.fetch_swap_quote(request.clone()).await?;
    let network_fee = quote.network_fee();
    let result = quote.approve().await?;

    let payout = match expected_payout {
        Some(payout) => payout,
        None if request.quote_for == AmountFor::From => {
            amount::scale_percent(&result.payout_native_amount, FROM_QUOTE_PAYOUT_PERCENT)?
        }
        None => result.payout_native_amount.clone(),
    };
    let balance = ctx
        .wallet
        .balance(&request.to_wallet_id, request.to_token_id.as_deref())
        .await?;
    let above_amount = amount::add(&balance, &payout)?;

    debug!(
        txid = %result.transaction.txid,
        %above_amount,
        "swap approved"
    );

    Ok(ExecutionOutput {
        effect: ActionEffect::AddressBalance {
            address: result.payout_address,
            wallet_id: request.to_wallet_id,
            token_id: request.to_token_id,
            above_amount: Some(above_amount),
            below_amount: None,
        },
        broadcast_txs: vec![BroadcastTx {
            wallet_id: request.from_wallet_id,
            network_fee,
            tx: result.transaction,
        }],
    })
}

fn seq_effect(
    op_index: usize,
    prev_effects: &[Option<ActionEffect>],
    child: Option<ActionEffect>,
) -> ActionEffect {
    let mut child_effects = Vec::with_capacity(prev_effects.len() + 1);
    child_effects.extend_from_slice(prev_effects);
    child_effects.push(child);
    ActionEffect::Seq {
        op_index,
        child_effects,
    }
}

/// Output for a pre-signed transaction. Its fee was fixed when it was signed.
fn broadcast_output(wallet_id: &str, tx: &SignedTransaction) -> ExecutionOutput {
    ExecutionOutput {
        effect: ActionEffect::TxConfs {
            tx_id: tx.txid.clone(),
            wallet_id: wallet_id.to_string(),
            confirmations: LEAF_CONFIRMATIONS,
        },
        broadcast_txs: vec![BroadcastTx {
            wallet_id: wallet_id.to_string(),
            network_fee: NetworkFee {
                currency_code: String::new(),
                native_amount: "0".to_string(),
            },
            tx: tx.clone(),
        }],
    }
}

/// Wait on the last of `txs`; earlier ones confirm before it by nonce order.
fn tx_confs_output(txs: Vec<BroadcastTx>) -> Result<ExecutionOutput> {
    let last = txs.last().ok_or_else(|| {
        ActionQueueError::InvalidOperation("approvable action returned no transactions".into())
    })?;
    Ok(ExecutionOutput {
        effect: ActionEffect::TxConfs {
            tx_id: last.tx.txid.clone(),
            wallet_id: last.wallet_id.clone(),
            confirmations: LEAF_CONFIRMATIONS,
        },
        broadcast_txs: txs,
    })
}

fn loan_request(
    native_amount: &str,
    token_id: &Option<String>,
    from_token_id: Option<&String>,
) -> LoanRequest {
    LoanRequest {
        native_amount: native_amount.to_string(),
        token_id: token_id.clone(),
        from_token_id: from_token_id.cloned(),
    }
}

fn mismatch(expected: &str, effect: &ActionEffect) -> ActionQueueError {
    ActionQueueError::InvalidEffect(format!(
        "expected a '{expected}' effect, found '{}'",
        effect.kind()
    ))
}
