// src/program/effect.rs

//! Effects: conditions that mark a step complete.
//!
//! Effects are never mutated in place; every transition builds a new value.
//! A `Seq` or `Par` effect mirrors the shape of the operation it tracks, and a
//! `None` child is only legal inside a dry-run result.

use serde::{Deserialize, Serialize};

use crate::amount::NativeAmount;
use crate::errors::EffectError;
use crate::program::op::ActionOp;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ActionEffect {
    /// `op_index` is the child being awaited; earlier children are done.
    Seq {
        op_index: usize,
        child_effects: Vec<Option<ActionEffect>>,
    },

    Par {
        child_effects: Vec<Option<ActionEffect>>,
    },

    AddressBalance {
        #[serde(default)]
        address: String,
        wallet_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        above_amount: Option<NativeAmount>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        below_amount: Option<NativeAmount>,
    },

    TxConfs {
        tx_id: String,
        wallet_id: String,
        confirmations: u32,
    },

    PriceLevel {
        currency_pair: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        above_rate: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        below_rate: Option<f64>,
    },

    /// Completion is reported by the push server.
    PushEvent {
        event_id: String,
        /// The effect the server is watching on our behalf.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        effect: Option<Box<ActionEffect>>,
    },

    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<EffectError>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        cancelled: bool,
    },
}

impl ActionEffect {
    pub fn done() -> Self {
        ActionEffect::Done {
            error: None,
            cancelled: false,
        }
    }

    pub fn failed(error: EffectError) -> Self {
        ActionEffect::Done {
            error: Some(error),
            cancelled: false,
        }
    }

    pub fn cancelled() -> Self {
        ActionEffect::Done {
            error: None,
            cancelled: true,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ActionEffect::Seq { .. } => "seq",
            ActionEffect::Par { .. } => "par",
            ActionEffect::AddressBalance { .. } => "address-balance",
            ActionEffect::TxConfs { .. } => "tx-confs",
            ActionEffect::PriceLevel { .. } => "price-level",
            ActionEffect::PushEvent { .. } => "push-event",
            ActionEffect::Done { .. } => "done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, ActionEffect::Done { .. })
    }

    /// `Done` carrying an error or a cancellation.
    pub fn is_aborted(&self) -> bool {
        matches!(self, ActionEffect::Done { error, cancelled } if error.is_some() || *cancelled)
    }

    /// True if any child, at any depth, is `None`.
    pub fn has_null(&self) -> bool {
        match self {
            ActionEffect::Seq { child_effects, .. } | ActionEffect::Par { child_effects } => {
                child_effects
                    .iter()
                    .any(|child| child.as_ref().is_none_or(ActionEffect::has_null))
            }
            _ => false,
        }
    }

    /// Every error carried by a `Done` in this tree, outermost first.
    pub fn errors(&self) -> Vec<EffectError> {
        let mut out = Vec::new();
        self.collect_errors(&mut out);
        out
    }

    fn collect_errors(&self, out: &mut Vec<EffectError>) {
        match self {
            ActionEffect::Done {
                error: Some(err), ..
            } => out.push(err.clone()),
            ActionEffect::Seq { child_effects, .. } | ActionEffect::Par { child_effects } => {
                for child in child_effects.iter().flatten() {
                    child.collect_errors(out);
                }
            }
            _ => {}
        }
    }

    /// This effect with `error` recorded where the program is currently
    /// waiting, so positions before it keep their status.
    ///
    /// A `Seq` fails its current child. A `Par` fails every child that has
    /// not completed, since its children are checked together. When there is
    /// no such position the error becomes the whole effect.
    pub fn with_failure(&self, error: EffectError) -> ActionEffect {
        let placed = self.place_failure(&error);
        if placed.errors().is_empty() {
            ActionEffect::failed(error)
        } else {
            placed
        }
    }

    fn place_failure(&self, error: &EffectError) -> ActionEffect {
        match self {
            ActionEffect::Seq {
                op_index,
                child_effects,
            } => match child_effects.get(*op_index) {
                Some(Some(current)) => {
                    let mut placed = child_effects[..*op_index].to_vec();
                    placed.push(Some(current.place_failure(error)));
                    ActionEffect::Seq {
                        op_index: *op_index,
                        child_effects: placed,
                    }
                }
                _ => ActionEffect::failed(error.clone()),
            },
            ActionEffect::Par { child_effects } => ActionEffect::Par {
                child_effects: child_effects
                    .iter()
                    .map(|child| match child {
                        Some(done @ ActionEffect::Done { error: None, .. }) => Some(done.clone()),
                        Some(child) => Some(child.place_failure(error)),
                        None => Some(ActionEffect::failed(error.clone())),
                    })
                    .collect(),
            },
            _ => ActionEffect::failed(error.clone()),
        }
    }

    /// Distinct push event ids in this tree, in order of first appearance.
    ///
    /// Wrapped effects inside a `PushEvent` are not walked: they describe what
    /// the server watches, not further events.
    pub fn push_event_ids(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        self.collect_push_event_ids(&mut out);
        out
    }

    fn collect_push_event_ids(&self, out: &mut Vec<String>) {
        match self {
            ActionEffect::PushEvent { event_id, .. } => {
                if !out.contains(event_id) {
                    out.push(event_id.clone());
                }
            }
            ActionEffect::Seq { child_effects, .. } | ActionEffect::Par { child_effects } => {
                for child in child_effects.iter().flatten() {
                    child.collect_push_event_ids(out);
                }
            }
            _ => {}
        }
    }

    /// Identifier of the position in the program this effect belongs to.
    ///
    /// Used to build push event ids: `seq_2`, `seq_0_seq_1_done`,
    /// `par_tx-confs_done`, ... A `Seq` only names its current child when that
    /// child is a combinator or `Done`, so successive steps of one chain never
    /// share an id.
    pub fn call_stack_id(&self) -> crate::errors::Result<String> {
        match self {
            ActionEffect::Seq {
                op_index,
                child_effects,
            } => match child_effects.get(*op_index) {
                Some(Some(
                    child @ (ActionEffect::Seq { .. }
                    | ActionEffect::Par { .. }
                    | ActionEffect::Done { .. }),
                )) => Ok(format!("seq_{op_index}_{}", child.call_stack_id()?)),
                _ => Ok(format!("seq_{op_index}")),
            },
            ActionEffect::Par { child_effects } => {
                let mut ids = Vec::with_capacity(child_effects.len());
                for child in child_effects {
                    let child = child.as_ref().ok_or(
                        crate::errors::ActionQueueError::NullEffect("building a call stack id"),
                    )?;
                    ids.push(child.call_stack_id()?);
                }
                Ok(format!("par_{}", ids.join("_")))
            }
            other => Ok(other.kind().to_string()),
        }
    }
}

/// Whether `effect` means the work described by `op` has finished for good.
///
/// A finished `Seq` is one whose last child is terminal; any aborted child
/// (error or cancellation) ends the enclosing combinator immediately.
pub fn is_terminal(op: &ActionOp, effect: &ActionEffect) -> bool {
    match (op, effect) {
        (_, ActionEffect::Done { .. }) => true,
        (
            ActionOp::Seq { actions },
            ActionEffect::Seq {
                op_index,
                child_effects,
            },
        ) => {
            let Some(Some(current)) = child_effects.get(*op_index) else {
                return false;
            };
            if current.is_aborted() || !current.errors().is_empty() {
                return true;
            }
            *op_index + 1 == actions.len() && is_terminal(&actions[*op_index], current)
        }
        (ActionOp::Par { actions }, ActionEffect::Par { child_effects }) => {
            if child_effects
                .iter()
                .flatten()
                .any(|child| child.is_aborted() || !child.errors().is_empty())
            {
                return true;
            }
            child_effects.len() == actions.len()
                && actions
                    .iter()
                    .zip(child_effects)
                    .all(|(op, eff)| eff.as_ref().is_some_and(|e| is_terminal(op, e)))
        }
        _ => false,
    }
}

/// Whether the work for `op` is complete, given that `effect` has already
/// been confirmed effective.
///
/// Leaf effects and push events are complete once effective; `Seq` and `Par`
/// effects only when terminal.
pub fn is_complete_when_effective(op: &ActionOp, effect: &ActionEffect) -> bool {
    match effect {
        ActionEffect::Seq { .. } | ActionEffect::Par { .. } => is_terminal(op, effect),
        _ => true,
    }
}
