// src/fs/mock.rs

use super::FileSystem;
use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub enum MockEntry {
    File(Vec<u8>),
    Dir(BTreeSet<String>), // child names
}

#[derive(Debug, Default)]
struct MockFsState {
    entries: BTreeMap<PathBuf, MockEntry>,
    writes: Vec<PathBuf>,
    fail_writes: bool,
}

/// In-memory filesystem. Directories are created implicitly by writes.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    state: Arc<Mutex<MockFsState>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref().to_path_buf();
        let mut state = self.state.lock().unwrap();
        Self::link_parent(&mut state.entries, &path);
        state.entries.insert(path, MockEntry::File(content.into()));
    }

    /// Paths written through [`FileSystem::write`], in order.
    pub fn writes(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().writes.clone()
    }

    /// Make every following write fail until turned off again.
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }

    /// Register `path` in its parent directory, creating ancestors as needed.
    fn link_parent(entries: &mut BTreeMap<PathBuf, MockEntry>, path: &Path) {
        let Some(parent) = path.parent() else {
            return;
        };
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };

        if !entries.contains_key(parent) {
            if parent != path {
                Self::link_parent(entries, parent);
            }
            entries.insert(parent.to_path_buf(), MockEntry::Dir(BTreeSet::new()));
        }
        if let Some(MockEntry::Dir(children)) = entries.get_mut(parent) {
            children.insert(name.to_string());
        }
    }
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        let state = self.state.lock().unwrap();
        match state.entries.get(path) {
            Some(MockEntry::File(content)) => {
                String::from_utf8(content.clone()).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
            }
            Some(MockEntry::Dir(_)) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if state.fail_writes {
                return Err(anyhow!("mock write failure: {:?}", path));
            }
            state.writes.push(path.to_path_buf());
        }
        self.add_file(path, contents);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.state.lock().unwrap().entries.contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(
            self.state.lock().unwrap().entries.get(path),
            Some(MockEntry::Dir(_))
        )
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let state = self.state.lock().unwrap();
        match state.entries.get(path) {
            Some(MockEntry::Dir(children)) => {
                Ok(children.iter().map(|name| path.join(name)).collect())
            }
            _ => Err(anyhow!("Not a directory or not found: {:?}", path)),
        }
    }
}
