// src/engine/dryrun.rs

//! Speculative multi-step simulation and push offload.
//!
//! [`dryrun_program`] walks the program forward from its current effect as if
//! every effect along the way had already taken effect, collecting what each
//! step would broadcast. [`offload_program`] hands the resulting chain to the
//! push server and rewrites the local effect so the scheduler only waits for
//! push events.

use tracing::{debug, info};

use super::evaluator::evaluate;
use super::{ExecutionContext, ExecutionOutput};
use crate::errors::Result;
use crate::program::{is_terminal, ActionEffect, ActionOp, ActionProgram, ProgramState};
use crate::push::{effect_can_be_a_trigger, prepare_new_push_events, PushEventUpdate};
use crate::wallet::{with_pending, PendingTxMap};

/// Upper bound on simulated steps in one dry-run.
pub const MAX_DRYRUN_STEPS: usize = 64;

/// Simulate successive steps of `program`, starting from `state.effect`.
///
/// Stops at the first step that cannot be simulated (a `None` output, or any
/// `None` child in the output), at a terminal effect, or after
/// [`MAX_DRYRUN_STEPS`]. Simulated transactions are folded into a fresh
/// pending map so each step sees the ones before it.
pub async fn dryrun_program(
    ctx: &ExecutionContext,
    program: &ActionProgram,
    state: &ProgramState,
) -> Result<Vec<ExecutionOutput>> {
    let mut pending = PendingTxMap::new();
    let mut outputs: Vec<ExecutionOutput> = Vec::new();
    let mut effect = state.effect.clone();

    for _ in 0..MAX_DRYRUN_STEPS {
        let action = evaluate(ctx, &program.action_op, effect.as_ref()).await?;
        let Some(output) = action.dryrun(ctx, &pending).await? else {
            break;
        };
        if output.effect.has_null() {
            break;
        }

        pending = with_pending(&pending, &output.broadcast_txs);
        effect = Some(output.effect.clone());
        let finished = is_terminal(&program.action_op, &output.effect);
        outputs.push(output);
        if finished {
            break;
        }
    }

    debug!(
        program_id = %program.program_id,
        steps = outputs.len(),
        "dry-run finished"
    );
    Ok(outputs)
}

/// Try to move monitoring of `program` to the push server.
///
/// Returns the effect to store locally, or `None` when nothing was offloaded
/// (the program is not a `Seq`, its current effect cannot be watched
/// remotely, or no step could be simulated).
pub async fn offload_program(
    ctx: &ExecutionContext,
    program: &ActionProgram,
    state: &ProgramState,
) -> Result<Option<ActionEffect>> {
    let Some(
        effect @ ActionEffect::Seq {
            op_index,
            child_effects,
        },
    ) = state.effect.as_ref()
    else {
        return Ok(None);
    };
    if !matches!(program.action_op, ActionOp::Seq { .. }) {
        return Ok(None);
    }
    if !effect_can_be_a_trigger(ctx.wallet.as_ref(), effect).await? {
        return Ok(None);
    }

    let mut outputs = dryrun_program(ctx, program, state).await?;
    outputs.truncate(chain_len(*op_index, &program.action_op, &outputs));
    if outputs.is_empty() {
        return Ok(None);
    }

    let infos = prepare_new_push_events(
        ctx.wallet.as_ref(),
        &program.program_id,
        effect,
        &outputs,
        &ctx.options.push_message,
    )
    .await?;

    ctx.push
        .update_events(PushEventUpdate {
            create_events: infos.iter().map(|i| i.new_push_event.clone()).collect(),
            remove_events: Vec::new(),
        })
        .await?;

    info!(
        program_id = %program.program_id,
        events = infos.len(),
        "offloaded steps to push server"
    );

    // The current child is replaced by the event chain.
    let mut next_children = child_effects[..*op_index].to_vec();
    next_children.extend(infos.into_iter().map(|i| Some(i.push_event_effect)));

    // The server broadcasts the last simulated step; only its confirmation is
    // left to poll locally.
    if let Some(last) = outputs.last() {
        if !is_terminal(&program.action_op, &last.effect) {
            if let ActionEffect::Seq {
                op_index: last_index,
                child_effects: last_children,
            } = &last.effect
            {
                if let Some(Some(child)) = last_children.get(*last_index) {
                    next_children.push(Some(child.clone()));
                }
            }
        }
    }

    Ok(Some(ActionEffect::Seq {
        op_index: *op_index,
        child_effects: next_children,
    }))
}

/// Number of leading outputs that move the root `Seq` forward exactly one
/// slot at a time, so the offloaded chain lines up with the op list.
///
/// A final terminal output that only closes the last slot is included.
fn chain_len(start_index: usize, op: &ActionOp, outputs: &[ExecutionOutput]) -> usize {
    outputs
        .iter()
        .enumerate()
        .take_while(|(i, output)| match &output.effect {
            ActionEffect::Seq { op_index, .. } if *op_index == start_index + i + 1 => true,
            effect @ ActionEffect::Seq { op_index, .. } => {
                *op_index == start_index + i
                    && *i + 1 == outputs.len()
                    && is_terminal(op, effect)
            }
            _ => false,
        })
        .count()
}
