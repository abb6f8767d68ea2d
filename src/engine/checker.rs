// src/engine/checker.rs

use futures::future::{try_join_all, BoxFuture};
use tracing::trace;

use super::{CheckResult, ExecutionContext};
use crate::amount;
use crate::errors::{ActionQueueError, Result};
use crate::program::ActionEffect;
use crate::push::check_push_event;
use crate::wallet::Confirmations;

pub const ADDRESS_BALANCE_POLL_MS: i64 = 15_000;
pub const TX_CONFS_POLL_MS: i64 = 6_000;
pub const PUSH_EVENT_POLL_MS: i64 = 15_000;

/// Decide whether `effect` has taken effect.
///
/// Only reads from the collaborators, so `Par` children are polled
/// concurrently. A `Seq` whose current child took effect but which has more
/// chained children (from a push offload) reports the advanced effect through
/// `updated_effect` instead of becoming effective.
pub fn check_effect<'a>(
    ctx: &'a ExecutionContext,
    effect: &'a ActionEffect,
) -> BoxFuture<'a, Result<CheckResult>> {
    Box::pin(async move {
        let result = match effect {
            ActionEffect::Seq {
                op_index,
                child_effects,
            } => {
                let op_index = *op_index;
                let child = child_effects
                    .get(op_index)
                    .ok_or_else(|| {
                        ActionQueueError::InvalidEffect(format!(
                            "seq opIndex {op_index} out of range for {} child effects",
                            child_effects.len()
                        ))
                    })?
                    .as_ref()
                    .ok_or(ActionQueueError::NullEffect("running a check"))?;

                let child_result = check_effect(ctx, child).await?;

                if let Some(updated_child) = child_result.updated_effect {
                    let mut child_effects = child_effects.clone();
                    child_effects[op_index] = Some(updated_child);
                    CheckResult {
                        is_effective: false,
                        delay_ms: child_result.delay_ms,
                        updated_effect: Some(ActionEffect::Seq {
                            op_index,
                            child_effects,
                        }),
                    }
                } else if child_result.is_effective && op_index + 1 < child_effects.len() {
                    trace!(op_index, "chained seq effect advanced");
                    CheckResult {
                        is_effective: false,
                        delay_ms: 0,
                        updated_effect: Some(ActionEffect::Seq {
                            op_index: op_index + 1,
                            child_effects: child_effects.clone(),
                        }),
                    }
                } else {
                    child_result
                }
            }
            ActionEffect::Par { child_effects } => {
                let checks = child_effects.iter().map(|child| async move {
                    let child = child
                        .as_ref()
                        .ok_or(ActionQueueError::NullEffect("running a check"))?;
                    check_effect(ctx, child).await
                });
                let results = try_join_all(checks).await?;

                let delay_ms = results
                    .iter()
                    .filter(|r| !r.is_effective)
                    .map(|r| r.delay_ms)
                    .max()
                    .unwrap_or(0);

                if results.iter().any(|r| r.updated_effect.is_some()) {
                    let child_effects = child_effects
                        .iter()
                        .zip(&results)
                        .map(|(old, r)| r.updated_effect.clone().or_else(|| old.clone()))
                        .collect();
                    CheckResult {
                        is_effective: false,
                        delay_ms,
                        updated_effect: Some(ActionEffect::Par { child_effects }),
                    }
                } else if results.iter().all(|r| r.is_effective) {
                    CheckResult::effective()
                } else {
                    CheckResult::waiting(delay_ms)
                }
            }
            ActionEffect::AddressBalance {
                wallet_id,
                token_id,
                above_amount,
                below_amount,
                ..
            } => {
                let balance = ctx.wallet.balance(wallet_id, token_id.as_deref()).await?;
                let above = match above_amount {
                    Some(threshold) => amount::gte(&balance, threshold)?,
                    None => false,
                };
                let below = match below_amount {
                    Some(threshold) => amount::lte(&balance, threshold)?,
                    None => false,
                };
                CheckResult {
                    is_effective: above || below,
                    delay_ms: ADDRESS_BALANCE_POLL_MS,
                    updated_effect: None,
                }
            }
            ActionEffect::TxConfs {
                tx_id,
                wallet_id,
                confirmations: required,
            } => {
                // Not found yet means the wallet is still syncing.
                let Some(tx) = ctx.wallet.find_transaction(wallet_id, tx_id).await? else {
                    return Ok(CheckResult::waiting(TX_CONFS_POLL_MS));
                };
                let is_effective = match tx.confirmations {
                    Confirmations::Dropped => return Err(ActionQueueError::TransactionDropped),
                    Confirmations::Count(count) => count >= *required,
                    status => {
                        *required == 0 || (*required > 0 && status == Confirmations::Confirmed)
                    }
                };
                CheckResult {
                    is_effective,
                    delay_ms: TX_CONFS_POLL_MS,
                    updated_effect: None,
                }
            }
            ActionEffect::PriceLevel { currency_pair, .. } => {
                return Err(ActionQueueError::Unsupported(format!(
                    "price-level effect check for '{currency_pair}'"
                )));
            }
            ActionEffect::PushEvent { event_id, .. } => CheckResult {
                is_effective: check_push_event(ctx.push.as_ref(), event_id).await?,
                delay_ms: PUSH_EVENT_POLL_MS,
                updated_effect: None,
            },
            ActionEffect::Done { error, .. } => {
                if let Some(error) = error {
                    return Err(ActionQueueError::Effect(error.clone()));
                }
                CheckResult::effective()
            }
        };
        Ok(result)
    })
}
