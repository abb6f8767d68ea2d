// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{ActionQueueError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = ActionQueueError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

/// Check the semantic rules serde cannot express.
pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    validate_engine(cfg)?;
    validate_backoff(cfg)?;
    validate_store(cfg)?;
    Ok(())
}

fn validate_engine(cfg: &RawConfigFile) -> Result<()> {
    if cfg.engine.client_id.trim().is_empty() {
        return Err(ActionQueueError::Config(
            "[engine].client_id must not be empty".to_string(),
        ));
    }
    if cfg.engine.tick_interval_ms == 0 {
        return Err(ActionQueueError::Config(
            "[engine].tick_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_backoff(cfg: &RawConfigFile) -> Result<()> {
    let backoff = &cfg.backoff;
    if backoff.min_ms < 1 {
        return Err(ActionQueueError::Config(format!(
            "[backoff].min_ms must be >= 1 (got {})",
            backoff.min_ms
        )));
    }
    if backoff.min_ms > backoff.max_ms {
        return Err(ActionQueueError::Config(format!(
            "[backoff].min_ms ({}) must not exceed max_ms ({})",
            backoff.min_ms, backoff.max_ms
        )));
    }
    if !(backoff.factor >= 1.0) {
        return Err(ActionQueueError::Config(format!(
            "[backoff].factor must be >= 1.0 (got {})",
            backoff.factor
        )));
    }
    Ok(())
}

fn validate_store(cfg: &RawConfigFile) -> Result<()> {
    if cfg.store.root.trim().is_empty() {
        return Err(ActionQueueError::Config(
            "[store].root must not be empty".to_string(),
        ));
    }
    Ok(())
}
