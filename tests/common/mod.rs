#![allow(dead_code)]

use std::sync::Arc;

pub use action_queue_test_utils::{init_tracing, with_timeout};

use action_queue::engine::{
    Clock, EngineOptions, ExecutionContext, ManualClock, Scheduler,
};
use action_queue::fs::mock::MockFileSystem;
use action_queue::fs::FileSystem;
use action_queue::program::{ActionOp, ActionProgram, ProgramState};
use action_queue::push::mock::MockPushServer;
use action_queue::push::PushServer;
use action_queue::store::ActionQueueStore;
use action_queue::wallet::mock::MockWallet;
use action_queue::wallet::WalletApi;

pub const CLIENT_ID: &str = "test-client";
pub const START_MS: i64 = 1_700_000_000_000;
pub const STORE_ROOT: &str = "/queue";

/// Everything a scheduler test needs, wired to in-memory fakes.
pub struct Harness {
    pub wallet: MockWallet,
    pub push: MockPushServer,
    pub fs: MockFileSystem,
    pub store: ActionQueueStore,
    pub clock: Arc<ManualClock>,
    pub ctx: ExecutionContext,
    pub scheduler: Scheduler,
}

impl Harness {
    /// Dry-run offload is off so every step runs locally.
    pub fn new() -> Self {
        Self::with_options(local_options())
    }

    pub fn with_dryrun() -> Self {
        Self::with_options(EngineOptions::default())
    }

    pub fn with_options(options: EngineOptions) -> Self {
        let wallet = MockWallet::new();
        let api: Arc<dyn WalletApi> = Arc::new(wallet.clone());
        Self::with_wallet_api(wallet, api, options)
    }

    /// Use `api` as the engine's wallet while keeping `wallet` for scripting.
    pub fn with_wallet_api(
        wallet: MockWallet,
        api: Arc<dyn WalletApi>,
        options: EngineOptions,
    ) -> Self {
        let push = MockPushServer::new();
        let fs = MockFileSystem::new();
        let push_api: Arc<dyn PushServer> = Arc::new(push.clone());
        let fs_api: Arc<dyn FileSystem> = Arc::new(fs.clone());
        Self::with_collaborators(wallet, api, push, push_api, fs, fs_api, options)
    }

    /// Like [`Harness::with_wallet_api`], for the push server and the
    /// filesystem as well.
    pub fn with_collaborators(
        wallet: MockWallet,
        api: Arc<dyn WalletApi>,
        push: MockPushServer,
        push_api: Arc<dyn PushServer>,
        fs: MockFileSystem,
        fs_api: Arc<dyn FileSystem>,
        options: EngineOptions,
    ) -> Self {
        let store = ActionQueueStore::new(fs_api, STORE_ROOT);
        let clock = Arc::new(ManualClock::new(START_MS));
        let ctx = ExecutionContext {
            wallet: api,
            push: push_api,
            client_id: CLIENT_ID.to_string(),
            options,
        };
        let scheduler = Scheduler::new(
            ctx.clone(),
            store.clone(),
            clock.clone() as Arc<dyn Clock>,
        );
        Self {
            wallet,
            push,
            fs,
            store,
            clock,
            ctx,
            scheduler,
        }
    }

    pub fn schedule(&self, op: ActionOp) -> ActionProgram {
        let program = ActionProgram::new(op);
        self.scheduler
            .schedule(program.clone())
            .expect("schedule program");
        program
    }

    pub fn state(&self, program_id: &str) -> ProgramState {
        self.scheduler
            .program_state(program_id)
            .expect("program state")
    }

    /// Tick until the program finishes, advancing the clock past any wait.
    pub async fn run_to_completion(&self, program_id: &str, max_ticks: usize) -> ProgramState {
        for _ in 0..max_ticks {
            let state = self.state(program_id);
            if state.is_finished() {
                return state;
            }
            if state.next_execution_time > self.clock.now_ms() {
                self.clock.set(state.next_execution_time);
            }
            self.scheduler.run_once().await;
        }
        panic!("program {program_id} did not finish within {max_ticks} ticks");
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn local_options() -> EngineOptions {
    EngineOptions {
        enable_dryrun: false,
        ..EngineOptions::default()
    }
}

/// A bare execution context over the given fakes.
pub fn context(wallet: &MockWallet, push: &MockPushServer, options: EngineOptions) -> ExecutionContext {
    ExecutionContext {
        wallet: Arc::new(wallet.clone()),
        push: Arc::new(push.clone()),
        client_id: CLIENT_ID.to_string(),
        options,
    }
}
