// src/engine/scheduler.rs

//! The periodic driver.
//!
//! The scheduler owns the map of active programs and the set of programs this
//! process is currently running. Each tick it picks every due program, marks
//! it `executing` (persisted, so a crash is detectable), and runs one
//! [`execute_program`] step per program on its own task. Results are
//! committed under the map lock, so a program cancelled while its step was in
//! flight keeps its cancelled state.
//!
//! Writes to the store run on the blocking pool, never under the map locks.
//! They are serialized by an async lock, so what is on disk always follows the
//! order of the in-memory transitions.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::{spawn_blocking, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::runner::{execute_program, finish_with_error};
use super::{Clock, ExecutionContext};
use crate::display::{program_display_info, DisplayInfo};
use crate::errors::{ActionQueueError, Result};
use crate::program::{validate_op, ActionEffect, ActionProgram, ProgramState, NEVER};
use crate::push::PushEventUpdate;
use crate::store::ActionQueueStore;

/// A program the scheduler is responsible for, with its latest state.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveProgram {
    pub program: ActionProgram,
    pub state: ProgramState,
}

#[derive(Debug)]
struct SchedulerInner {
    ctx: ExecutionContext,
    store: ActionQueueStore,
    clock: Arc<dyn Clock>,
    /// Lock order: `active` before `running`.
    active: Mutex<HashMap<String, ActiveProgram>>,
    running: Mutex<HashSet<String>>,
    /// Held from reading a transition until its state is saved.
    persist: AsyncMutex<()>,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(ctx: ExecutionContext, store: ActionQueueStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                ctx,
                store,
                clock,
                active: Mutex::new(HashMap::new()),
                running: Mutex::new(HashSet::new()),
                persist: AsyncMutex::new(()),
            }),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.inner.ctx.client_id
    }

    /// Rebuild the active map from the store.
    ///
    /// Programs of other clients and programs that already finished are left
    /// on disk but not loaded. Returns how many programs were loaded.
    pub fn load(&self) -> Result<usize> {
        let entries = self.inner.store.load_all()?;
        let mut active = lock(&self.inner.active);
        let mut loaded = 0;
        for (program, state) in entries {
            if state.client_id != self.inner.ctx.client_id || state.is_finished() {
                continue;
            }
            active.insert(
                program.program_id.clone(),
                ActiveProgram { program, state },
            );
            loaded += 1;
        }
        info!(loaded, client_id = %self.inner.ctx.client_id, "loaded action programs");
        Ok(loaded)
    }

    /// Validate, persist and activate a new program.
    pub fn schedule(&self, program: ActionProgram) -> Result<ProgramState> {
        validate_op(&program.action_op)?;

        let mut active = lock(&self.inner.active);
        if active.contains_key(&program.program_id) {
            return Err(ActionQueueError::InvalidOperation(format!(
                "program '{}' is already scheduled",
                program.program_id
            )));
        }

        let state = ProgramState::initial(
            &self.inner.ctx.client_id,
            &program.program_id,
            self.inner.clock.now_ms(),
        );
        self.inner.store.create(&program, &state)?;
        info!(program_id = %program.program_id, op = program.action_op.kind(), "program scheduled");

        active.insert(
            program.program_id.clone(),
            ActiveProgram {
                program,
                state: state.clone(),
            },
        );
        Ok(state)
    }

    /// Cancel an active program.
    ///
    /// Every push event the program registered is removed first, each id
    /// exactly once. Then the program is finished with `Done{cancelled}` and
    /// dropped from the active map. A step already in flight still runs to
    /// completion, but its result is discarded.
    pub async fn cancel(&self, program_id: &str) -> Result<ProgramState> {
        let effect = {
            let active = lock(&self.inner.active);
            active
                .get(program_id)
                .ok_or_else(|| ActionQueueError::ProgramNotFound(program_id.to_string()))?
                .state
                .effect
                .clone()
        };

        let removed = effect.map(|e| e.push_event_ids()).unwrap_or_default();
        self.remove_push_events(&removed).await?;

        // An in-flight offload may have registered more events meanwhile.
        let persist = self.inner.persist.lock().await;
        let (cancelled, late_ids) = {
            let active = lock(&self.inner.active);
            let entry = active
                .get(program_id)
                .ok_or_else(|| ActionQueueError::ProgramNotFound(program_id.to_string()))?;

            let late_ids: Vec<String> = entry
                .state
                .effect
                .as_ref()
                .map(ActionEffect::push_event_ids)
                .unwrap_or_default()
                .into_iter()
                .filter(|id| !removed.contains(id))
                .collect();

            let now = self.inner.clock.now_ms();
            let cancelled = ProgramState {
                effect: Some(ActionEffect::cancelled()),
                effective: true,
                executing: false,
                last_execution_time: now,
                next_execution_time: NEVER,
                ..entry.state.clone()
            };
            (cancelled, late_ids)
        };
        self.persist(cancelled.clone()).await?;
        lock(&self.inner.active).remove(program_id);
        drop(persist);

        self.remove_push_events(&late_ids).await?;
        info!(program_id, removed_events = removed.len() + late_ids.len(), "program cancelled");
        Ok(cancelled)
    }

    async fn remove_push_events(&self, event_ids: &[String]) -> Result<()> {
        if event_ids.is_empty() {
            return Ok(());
        }
        self.inner
            .ctx
            .push
            .update_events(PushEventUpdate {
                create_events: Vec::new(),
                remove_events: event_ids.to_vec(),
            })
            .await
    }

    /// Save `state` on the blocking pool.
    async fn persist(&self, state: ProgramState) -> Result<()> {
        let store = self.inner.store.clone();
        spawn_blocking(move || store.save_state(&state))
            .await
            .map_err(|err| ActionQueueError::Other(err.into()))?
    }

    /// Latest state of a program, active or not.
    pub fn program_state(&self, program_id: &str) -> Result<ProgramState> {
        if let Some(entry) = lock(&self.inner.active).get(program_id) {
            return Ok(entry.state.clone());
        }
        self.inner.store.load_state(program_id)
    }

    pub fn active_program_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.inner.active).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_running(&self, program_id: &str) -> bool {
        lock(&self.inner.running).contains(program_id)
    }

    /// Display tree for a program, active or not.
    pub fn display(&self, program_id: &str) -> Result<DisplayInfo> {
        let active = lock(&self.inner.active).get(program_id).cloned();
        let (program, state) = match active {
            Some(entry) => (entry.program, entry.state),
            None => self.inner.store.load(program_id)?,
        };
        Ok(program_display_info(&program, state.effect.as_ref()))
    }

    /// Run one tick and wait for every step it started.
    pub async fn run_once(&self) {
        let mut in_flight = JoinSet::new();
        self.start_due(&mut in_flight).await;
        while let Some(joined) = in_flight.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "program step panicked");
            }
        }
    }

    /// Tick every `tick_interval` until `shutdown` flips to true or its
    /// sender goes away, then wait for in-flight steps.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = interval(self.inner.ctx.options.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight = JoinSet::new();

        info!(
            tick_ms = self.inner.ctx.options.tick_interval.as_millis() as u64,
            "action queue started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    while let Some(joined) = in_flight.try_join_next() {
                        if let Err(err) = joined {
                            error!(error = %err, "program step panicked");
                        }
                    }
                    self.start_due(&mut in_flight).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(in_flight = in_flight.len(), "action queue stopping");
        while in_flight.join_next().await.is_some() {}
        Ok(())
    }

    /// Pick due programs and spawn one step for each.
    ///
    /// A program whose state says `executing` but which this process is not
    /// running was interrupted mid-step by a previous process. Its leaf may
    /// or may not have taken place, so it is finished with an error instead
    /// of being retried.
    async fn start_due(&self, in_flight: &mut JoinSet<()>) -> usize {
        let persist = self.inner.persist.lock().await;
        let now = self.inner.clock.now_ms();
        let mut interrupted = Vec::new();
        let mut due = Vec::new();

        {
            let mut active = lock(&self.inner.active);
            let mut running = lock(&self.inner.running);

            for (id, entry) in active.iter_mut() {
                if running.contains(id) || entry.state.client_id != self.inner.ctx.client_id {
                    continue;
                }

                if entry.state.executing {
                    warn!(program_id = %id, "program was interrupted");
                    let mut state = finish_with_error(
                        entry.state.clone(),
                        &ActionQueueError::Interrupted,
                        now,
                    );
                    state.executing = false;
                    interrupted.push(state);
                    continue;
                }

                let is_due = entry.state.effect.is_none() || entry.state.next_execution_time <= now;
                if !is_due || entry.state.is_finished() {
                    continue;
                }

                entry.state.executing = true;
                running.insert(id.clone());
                due.push(entry.clone());
            }

            for state in &interrupted {
                active.remove(&state.program_id);
            }
        }

        for state in interrupted {
            let program_id = state.program_id.clone();
            if let Err(err) = self.persist(state).await {
                error!(%program_id, error = %err, "failed to persist state");
            }
        }

        let mut batch = Vec::with_capacity(due.len());
        for entry in due {
            match self.persist(entry.state.clone()).await {
                Ok(()) => batch.push(entry),
                Err(err) => {
                    let program_id = &entry.program.program_id;
                    error!(%program_id, error = %err, "failed to mark program executing; skipping");
                    let mut active = lock(&self.inner.active);
                    if let Some(entry) = active.get_mut(program_id) {
                        entry.state.executing = false;
                    }
                    lock(&self.inner.running).remove(program_id);
                }
            }
        }
        drop(persist);

        let started = batch.len();
        if started > 0 {
            debug!(started, "tick");
        }
        for entry in batch {
            let scheduler = self.clone();
            in_flight.spawn(async move { scheduler.run_step(entry).await });
        }
        started
    }

    async fn run_step(&self, entry: ActiveProgram) {
        let program_id = entry.program.program_id.clone();
        // Releases the running slot even if the step panics; the persisted
        // `executing` flag then marks the program as interrupted.
        let _guard = RunningGuard {
            scheduler: self,
            program_id: &program_id,
        };

        let previous = entry.state.effect.clone();
        let next = execute_program(
            &self.inner.ctx,
            self.inner.clock.as_ref(),
            &entry.program,
            entry.state,
        )
        .await;
        self.commit(&program_id, previous.as_ref(), next).await;
    }

    /// Store the result of a step.
    ///
    /// A program that was cancelled meanwhile keeps its cancelled state. Any
    /// push events the step registered after the cancel read the effect are
    /// removed here, since nothing else knows about them.
    async fn commit(&self, program_id: &str, previous: Option<&ActionEffect>, mut next: ProgramState) {
        next.executing = false;
        let persist = self.inner.persist.lock().await;

        let still_active = lock(&self.inner.active).contains_key(program_id);
        if !still_active {
            lock(&self.inner.running).remove(program_id);
            drop(persist);

            let known = previous.map(ActionEffect::push_event_ids).unwrap_or_default();
            let orphaned: Vec<String> = next
                .effect
                .as_ref()
                .map(ActionEffect::push_event_ids)
                .unwrap_or_default()
                .into_iter()
                .filter(|id| !known.contains(id))
                .collect();
            debug!(program_id, orphaned = orphaned.len(), "program no longer active; dropping step result");
            if let Err(err) = self.remove_push_events(&orphaned).await {
                warn!(program_id, error = %err, "failed to remove push events of a cancelled program");
            }
            return;
        }

        if let Err(err) = self.persist(next.clone()).await {
            error!(program_id, error = %err, "failed to persist state");
        }

        let mut active = lock(&self.inner.active);
        lock(&self.inner.running).remove(program_id);
        if next.is_finished() {
            active.remove(program_id);
        } else if let Some(entry) = active.get_mut(program_id) {
            entry.state = next;
        }
    }
}

struct RunningGuard<'a> {
    scheduler: &'a Scheduler,
    program_id: &'a str,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        lock(&self.scheduler.inner.running).remove(self.program_id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
