// src/config/model.rs

use std::time::Duration;

use serde::Deserialize;

use crate::engine::{BackoffPolicy, EngineOptions};
use crate::push::PushMessage;

/// Configuration exactly as read from TOML. Not yet validated.
///
/// ```toml
/// [engine]
/// client_id = "device-a"
/// tick_interval_ms = 1000
/// enable_dryrun = true
///
/// [backoff]
/// min_ms = 2000
/// max_ms = 600000
/// factor = 1.2
///
/// [store]
/// root = ".action-queue"
///
/// [push]
/// notification_title = "Actions complete"
/// notification_body = "Your queued actions have finished."
/// ```
///
/// Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub backoff: BackoffSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub push: PushSection,
}

/// `[engine]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    /// Shard key; only programs created with this id are run here.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Try to offload chains of steps to the push server.
    #[serde(default = "default_enable_dryrun")]
    pub enable_dryrun: bool,
}

fn default_client_id() -> String {
    "default".to_string()
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

fn default_enable_dryrun() -> bool {
    true
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            tick_interval_ms: default_tick_interval_ms(),
            enable_dryrun: default_enable_dryrun(),
        }
    }
}

/// `[backoff]` section: retry delays after a failed effect check.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackoffSection {
    #[serde(default = "default_min_ms")]
    pub min_ms: i64,
    #[serde(default = "default_max_ms")]
    pub max_ms: i64,
    #[serde(default = "default_factor")]
    pub factor: f64,
}

fn default_min_ms() -> i64 {
    2_000
}

fn default_max_ms() -> i64 {
    600_000
}

fn default_factor() -> f64 {
    1.2
}

impl Default for BackoffSection {
    fn default() -> Self {
        Self {
            min_ms: default_min_ms(),
            max_ms: default_max_ms(),
            factor: default_factor(),
        }
    }
}

/// `[store]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSection {
    #[serde(default = "default_store_root")]
    pub root: String,
}

fn default_store_root() -> String {
    ".action-queue".to_string()
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            root: default_store_root(),
        }
    }
}

/// `[push]` section: the notification sent when an offloaded chain finishes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PushSection {
    #[serde(default = "default_notification_title")]
    pub notification_title: String,
    #[serde(default = "default_notification_body")]
    pub notification_body: String,
}

fn default_notification_title() -> String {
    "Actions complete".to_string()
}

fn default_notification_body() -> String {
    "Your queued actions have finished.".to_string()
}

impl Default for PushSection {
    fn default() -> Self {
        Self {
            notification_title: default_notification_title(),
            notification_body: default_notification_body(),
        }
    }
}

/// Validated configuration. Build it with `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub engine: EngineSection,
    pub backoff: BackoffSection,
    pub store: StoreSection,
    pub push: PushSection,
}

impl ConfigFile {
    /// Construct without validation. Only used by `TryFrom`.
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            engine: raw.engine,
            backoff: raw.backoff,
            store: raw.store,
            push: raw.push,
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            tick_interval: Duration::from_millis(self.engine.tick_interval_ms),
            enable_dryrun: self.engine.enable_dryrun,
            backoff: BackoffPolicy {
                min_ms: self.backoff.min_ms,
                max_ms: self.backoff.max_ms,
                factor: self.backoff.factor,
            },
            push_message: PushMessage {
                title: self.push.notification_title.clone(),
                body: self.push.notification_body.clone(),
            },
        }
    }
}
