// src/push/offload.rs

//! Converting dry-run output into push events.
//!
//! Each event's trigger is the effect of the previous dry-run output:
//!
//! ```text
//! outputs [A, B, C], current effect E
//!   -> event(trigger: E,        broadcast: A.txs)
//!      event(trigger: A.effect, broadcast: B.txs)
//!      event(trigger: B.effect, broadcast: C.txs, push message)
//! ```
//!
//! Only the last event carries the push message, so the device is woken once
//! the server has worked through the whole chain.

use futures::future::{try_join_all, BoxFuture};

use super::{NewPushEvent, PushBroadcastTx, PushEventState, PushMessage, PushServer, PushTrigger};
use crate::engine::ExecutionOutput;
use crate::errors::{ActionQueueError, Result};
use crate::program::ActionEffect;
use crate::wallet::WalletApi;

/// A prepared event and the local effect that tracks it.
#[derive(Debug, Clone, PartialEq)]
pub struct PushEventInfo {
    pub new_push_event: NewPushEvent,
    pub push_event_effect: ActionEffect,
}

/// Convert an effect into the trigger the push server would watch.
///
/// `Ok(None)` means the effect cannot be watched remotely (`Done`,
/// `PushEvent`, or a `Par` with such a child).
pub fn effect_to_trigger<'a>(
    wallet: &'a dyn WalletApi,
    effect: &'a ActionEffect,
) -> BoxFuture<'a, Result<Option<PushTrigger>>> {
    Box::pin(async move {
        match effect {
            ActionEffect::Seq {
                op_index,
                child_effects,
            } => {
                let child = child_effects
                    .get(*op_index)
                    .and_then(Option::as_ref)
                    .ok_or(ActionQueueError::NullEffect("converting to a push trigger"))?;
                effect_to_trigger(wallet, child).await
            }
            ActionEffect::Par { child_effects } => {
                let mut triggers = Vec::with_capacity(child_effects.len());
                for child in child_effects {
                    let child = child
                        .as_ref()
                        .ok_or(ActionQueueError::NullEffect("converting to a push trigger"))?;
                    match effect_to_trigger(wallet, child).await? {
                        Some(trigger) => triggers.push(trigger),
                        None => return Ok(None),
                    }
                }
                Ok(Some(PushTrigger::All { triggers }))
            }
            ActionEffect::AddressBalance {
                address,
                wallet_id,
                token_id,
                above_amount,
                below_amount,
            } => Ok(Some(PushTrigger::AddressBalance {
                plugin_id: wallet.plugin_id(wallet_id).await?,
                token_id: token_id.clone(),
                address: address.clone(),
                above_amount: above_amount.clone(),
                below_amount: below_amount.clone(),
            })),
            ActionEffect::TxConfs {
                tx_id,
                wallet_id,
                confirmations,
            } => Ok(Some(PushTrigger::TxConfirm {
                plugin_id: wallet.plugin_id(wallet_id).await?,
                confirmations: *confirmations,
                txid: tx_id.clone(),
            })),
            ActionEffect::PriceLevel {
                currency_pair,
                above_rate,
                below_rate,
            } => Ok(Some(PushTrigger::PriceLevel {
                currency_pair: currency_pair.clone(),
                above_rate: *above_rate,
                below_rate: *below_rate,
            })),
            ActionEffect::PushEvent { .. } | ActionEffect::Done { .. } => Ok(None),
        }
    })
}

pub async fn effect_can_be_a_trigger(wallet: &dyn WalletApi, effect: &ActionEffect) -> Result<bool> {
    Ok(effect_to_trigger(wallet, effect).await?.is_some())
}

/// Build one push event per dry-run output, chained as described in the
/// module docs.
pub async fn prepare_new_push_events(
    wallet: &dyn WalletApi,
    program_id: &str,
    init_effect: &ActionEffect,
    outputs: &[ExecutionOutput],
    message: &PushMessage,
) -> Result<Vec<PushEventInfo>> {
    let last = outputs.len().saturating_sub(1);

    let events = outputs.iter().enumerate().map(|(index, output)| async move {
        let triggering = if index > 0 {
            &outputs[index - 1].effect
        } else {
            init_effect
        };

        let event_id = format!("{program_id}:{}", output.effect.call_stack_id()?);

        let mut broadcast_txs = Vec::with_capacity(output.broadcast_txs.len());
        for broadcast in &output.broadcast_txs {
            broadcast_txs.push(PushBroadcastTx {
                plugin_id: wallet.plugin_id(&broadcast.wallet_id).await?,
                raw_tx: raw_hex(&broadcast.tx.signed_tx),
            });
        }

        let trigger = effect_to_trigger(wallet, triggering).await?.ok_or_else(|| {
            ActionQueueError::Unsupported(format!(
                "effect type '{}' in conversion to a push trigger",
                triggering.kind()
            ))
        })?;

        Ok::<_, ActionQueueError>(PushEventInfo {
            new_push_event: NewPushEvent {
                event_id: event_id.clone(),
                broadcast_txs,
                push_message: (index == last).then(|| message.clone()),
                trigger,
            },
            push_event_effect: ActionEffect::PushEvent {
                event_id,
                effect: Some(Box::new(watched_effect(triggering).clone())),
            },
        })
    });

    try_join_all(events).await
}

/// Whether the push server reports `event_id` as triggered.
///
/// A missing event is transient (the server may not have caught up yet); a
/// failed broadcast is fatal.
pub async fn check_push_event(push: &dyn PushServer, event_id: &str) -> Result<bool> {
    let statuses = push.event_statuses().await?;
    let status = statuses
        .into_iter()
        .find(|status| status.event_id == event_id)
        .ok_or_else(|| ActionQueueError::PushEventNotFound(event_id.to_string()))?;

    if let Some(errors) = &status.broadcast_tx_errors {
        let errors: Vec<String> = errors.iter().flatten().cloned().collect();
        if !errors.is_empty() {
            return Err(ActionQueueError::PushBroadcastFailed {
                event_id: event_id.to_string(),
                errors,
            });
        }
    }

    Ok(status.state == PushEventState::Triggered)
}

/// The effect a trigger was actually built from: a `Seq` is watched through
/// its current child.
fn watched_effect(effect: &ActionEffect) -> &ActionEffect {
    match effect {
        ActionEffect::Seq {
            op_index,
            child_effects,
        } => match child_effects.get(*op_index) {
            Some(Some(child)) => watched_effect(child),
            _ => effect,
        },
        _ => effect,
    }
}

fn raw_hex(signed_tx: &str) -> String {
    signed_tx
        .strip_prefix("0x")
        .unwrap_or(signed_tx)
        .to_ascii_lowercase()
}
