// src/lib.rs

pub mod amount;
pub mod cli;
pub mod config;
pub mod display;
pub mod engine;
pub mod errors;
pub mod fs;
pub mod logging;
pub mod program;
pub mod push;
pub mod store;
pub mod wallet;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::cli::{CliArgs, Command};
use crate::config::loader::load_or_default;
use crate::display::program_display_info;
use crate::fs::RealFileSystem;
use crate::program::{validate_op, ActionOp, ActionProgram, ProgramState, NEVER};
use crate::store::ActionQueueStore;

/// High-level entry point used by `main.rs`.
///
/// Loads the config, opens the program store next to it and runs one
/// inspection command.
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_or_default(&config_path)?;
    debug!(client_id = %cfg.engine.client_id, store = %cfg.store.root, "config loaded");

    match args.command {
        Command::List => {
            let store = open_store(&config_path, &cfg.store.root);
            let entries = store.load_all()?;
            print!("{}", render_program_list(&entries));
        }
        Command::Show { program_id } => {
            let store = open_store(&config_path, &cfg.store.root);
            let (program, state) = store.load(&program_id)?;
            println!("program {} (client {})", program.program_id, state.client_id);
            print!("{}", program_display_info(&program, state.effect.as_ref()));
        }
        Command::Validate { path } => {
            let contents = std::fs::read_to_string(&path)?;
            let op = parse_and_validate_op(&contents)?;
            println!("{path}: valid {} operation", op.kind());
        }
    }

    Ok(())
}

/// Parse an operation tree from JSON and run the structural checks on it.
pub fn parse_and_validate_op(contents: &str) -> errors::Result<ActionOp> {
    let op: ActionOp = serde_json::from_str(contents)?;
    validate_op(&op)?;
    Ok(op)
}

/// One line per program: id, client, status, next execution.
pub fn render_program_list(entries: &[(ActionProgram, ProgramState)]) -> String {
    if entries.is_empty() {
        return "no programs\n".to_string();
    }

    let mut out = String::new();
    for (program, state) in entries {
        let status = program_display_info(program, state.effect.as_ref()).status;
        let next = if state.next_execution_time == NEVER {
            "never".to_string()
        } else {
            state.next_execution_time.to_string()
        };
        out.push_str(&format!(
            "{}  client={}  status={}  next={}\n",
            program.program_id, state.client_id, status, next
        ));
    }
    out
}

fn open_store(config_path: &Path, root: &str) -> ActionQueueStore {
    let root = config_root_dir(config_path).join(root);
    ActionQueueStore::new(Arc::new(RealFileSystem), root)
}

/// Directory a relative store root is resolved against.
///
/// - If the config path has a non-empty parent (e.g. "configs/ActionQueue.toml"),
///   that directory is used.
/// - For a bare filename the current working directory is used.
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}
