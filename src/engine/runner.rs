// src/engine/runner.rs

use tracing::{debug, info, warn};

use super::checker::check_effect;
use super::dryrun::offload_program;
use super::evaluator::evaluate;
use super::{Clock, ExecutionContext, ExecutionOutput};
use crate::errors::ActionQueueError;
use crate::program::{is_terminal, ActionEffect, ActionProgram, ProgramState, NEVER};

/// Perform one tick's worth of work for one program and return its next
/// state.
///
/// Phases, strictly in order, each of which may end the tick:
/// 1. dry-run and push offload, when enabled and the current effect can be
///    watched remotely; failures here are logged and ignored
/// 2. effect check, when the current effect is not yet effective; transient
///    failures back off, fatal ones end the program
/// 3. execution of the next step; any failure ends the program
///
/// Never fails: every error becomes either a retry delay or a terminal
/// `Done` effect carrying it. The `Done` sits at the step that failed, so
/// earlier steps of a `Seq` still read as done.
pub async fn execute_program(
    ctx: &ExecutionContext,
    clock: &dyn Clock,
    program: &ActionProgram,
    state: ProgramState,
) -> ProgramState {
    let program_id = program.program_id.as_str();

    if ctx.options.enable_dryrun && state.effect.is_some() {
        match offload_program(ctx, program, &state).await {
            Ok(Some(effect)) => {
                // The push events have not fired yet, whatever the old
                // effect's status was.
                let now = clock.now_ms();
                return ProgramState {
                    effect: Some(effect),
                    effective: false,
                    last_execution_time: now,
                    next_execution_time: now,
                    ..state
                };
            }
            Ok(None) => {}
            Err(err) => warn!(program_id, error = %err, "dry-run failed; polling locally"),
        }
    }

    if let (false, Some(effect)) = (state.effective, state.effect.as_ref()) {
        let now = clock.now_ms();
        return match check_effect(ctx, effect).await {
            Ok(result) => match result.updated_effect {
                Some(updated) => {
                    debug!(program_id, "effect partially complete");
                    ProgramState {
                        effect: Some(updated),
                        effective: false,
                        last_execution_time: now,
                        next_execution_time: now,
                        ..state
                    }
                }
                None => {
                    let delay_ms = if result.is_effective { 0 } else { result.delay_ms };
                    debug!(program_id, effective = result.is_effective, delay_ms, "effect checked");
                    ProgramState {
                        effective: result.is_effective,
                        last_execution_time: now,
                        next_execution_time: now + delay_ms,
                        ..state
                    }
                }
            },
            Err(err) if err.is_fatal() => {
                warn!(program_id, error = %err, "effect check failed permanently");
                let failed = effect.with_failure(err.to_effect_error());
                finish_with(state, failed, now)
            }
            Err(err) => {
                let last_delay = state.next_execution_time - state.last_execution_time;
                let delay_ms = ctx.options.backoff.next_delay(last_delay);
                warn!(program_id, error = %err, delay_ms, "effect check failed; retrying");
                ProgramState {
                    effective: false,
                    last_execution_time: now,
                    next_execution_time: now + delay_ms,
                    ..state
                }
            }
        };
    }

    let outcome = execute_next(ctx, program, &state).await;
    let now = clock.now_ms();
    match outcome {
        Ok(output) => {
            let finished = is_terminal(&program.action_op, &output.effect);
            if finished {
                info!(program_id, "program finished");
            } else {
                debug!(
                    program_id,
                    txs = output.broadcast_txs.len(),
                    effect = output.effect.kind(),
                    "step executed"
                );
            }
            ProgramState {
                effect: Some(output.effect),
                effective: finished,
                last_execution_time: now,
                next_execution_time: if finished { NEVER } else { now },
                ..state
            }
        }
        Err(StepFailure { error, effect }) => {
            warn!(program_id, %error, "step execution failed");
            finish_with(state, effect, now)
        }
    }
}

/// A failed step, with the effect recording the error where it happened.
struct StepFailure {
    error: ActionQueueError,
    effect: ActionEffect,
}

impl From<ActionQueueError> for StepFailure {
    fn from(error: ActionQueueError) -> Self {
        let effect = ActionEffect::failed(error.to_effect_error());
        Self { error, effect }
    }
}

async fn execute_next(
    ctx: &ExecutionContext,
    program: &ActionProgram,
    state: &ProgramState,
) -> std::result::Result<ExecutionOutput, StepFailure> {
    let action = evaluate(ctx, &program.action_op, state.effect.as_ref()).await?;
    action.execute(ctx).await.map_err(|error| StepFailure {
        effect: action.failure_effect(&error.to_effect_error()),
        error,
    })
}

/// Terminal state carrying `err` as the root effect.
pub(crate) fn finish_with_error(state: ProgramState, err: &ActionQueueError, now: i64) -> ProgramState {
    finish_with(state, ActionEffect::failed(err.to_effect_error()), now)
}

fn finish_with(state: ProgramState, effect: ActionEffect, now: i64) -> ProgramState {
    ProgramState {
        effect: Some(effect),
        effective: true,
        last_execution_time: now,
        next_execution_time: NEVER,
        ..state
    }
}
