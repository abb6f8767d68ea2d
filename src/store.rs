// src/store.rs

//! Durable program store.
//!
//! Layout, one namespace directory per program:
//!
//! ```text
//! <root>/<programId>/program.json   immutable ActionProgram
//! <root>/<programId>/state.json     ProgramState, rewritten on every transition
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::{ActionQueueError, Result};
use crate::fs::FileSystem;
use crate::program::{validate_effect, ActionProgram, ProgramState};

const PROGRAM_FILE: &str = "program.json";
const STATE_FILE: &str = "state.json";

#[derive(Debug, Clone)]
pub struct ActionQueueStore {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
}

impl ActionQueueStore {
    pub fn new(fs: Arc<dyn FileSystem>, root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn save_program(&self, program: &ActionProgram) -> Result<()> {
        self.write_json(&self.path(&program.program_id, PROGRAM_FILE)?, program)
    }

    pub fn save_state(&self, state: &ProgramState) -> Result<()> {
        self.write_json(&self.path(&state.program_id, STATE_FILE)?, state)
    }

    /// Persist a new program and its initial state.
    pub fn create(&self, program: &ActionProgram, state: &ProgramState) -> Result<()> {
        self.save_program(program)?;
        self.save_state(state)
    }

    pub fn load_program(&self, program_id: &str) -> Result<ActionProgram> {
        let path = self.path(program_id, PROGRAM_FILE)?;
        if !self.fs.exists(&path) {
            return Err(ActionQueueError::ProgramNotFound(program_id.to_string()));
        }
        self.read_json(&path)
    }

    pub fn load_state(&self, program_id: &str) -> Result<ProgramState> {
        let path = self.path(program_id, STATE_FILE)?;
        if !self.fs.exists(&path) {
            return Err(ActionQueueError::ProgramNotFound(program_id.to_string()));
        }
        self.read_json(&path)
    }

    /// Load one namespace, checking that both records agree on the id and
    /// that the stored effect can still be polled.
    pub fn load(&self, program_id: &str) -> Result<(ActionProgram, ProgramState)> {
        let program = self.load_program(program_id)?;
        let state = self.load_state(program_id)?;
        if program.program_id != program_id || state.program_id != program_id {
            return Err(ActionQueueError::InvalidOperation(format!(
                "records in namespace '{program_id}' belong to another program"
            )));
        }
        if let Some(effect) = &state.effect {
            validate_effect(effect)?;
        }
        Ok((program, state))
    }

    /// Names of every namespace directory under the root.
    pub fn list_ids(&self) -> Result<Vec<String>> {
        if !self.fs.is_dir(&self.root) {
            return Ok(Vec::new());
        }
        let mut ids: Vec<String> = self
            .fs
            .read_dir(&self.root)?
            .into_iter()
            .filter(|path| self.fs.is_dir(path))
            .filter_map(|path| path.file_name()?.to_str().map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Load every namespace, skipping (and logging) any that fails to load.
    pub fn load_all(&self) -> Result<Vec<(ActionProgram, ProgramState)>> {
        let mut out = Vec::new();
        for id in self.list_ids()? {
            match self.load(&id) {
                Ok(entry) => out.push(entry),
                Err(err) => warn!(program_id = %id, error = %err, "skipping unreadable program"),
            }
        }
        debug!(count = out.len(), root = ?self.root, "loaded programs");
        Ok(out)
    }

    fn path(&self, program_id: &str, file: &str) -> Result<PathBuf> {
        if program_id.is_empty()
            || program_id == "."
            || program_id == ".."
            || program_id.contains(['/', '\\'])
        {
            return Err(ActionQueueError::InvalidOperation(format!(
                "program id '{program_id}' is not a valid namespace name"
            )));
        }
        Ok(self.root.join(program_id).join(file))
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.fs.write(path, &bytes)?;
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let text = self.fs.read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
