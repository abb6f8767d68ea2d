// src/push/mod.rs

//! Push-server collaborator boundary.
//!
//! The push server watches triggers on our behalf and broadcasts pre-signed
//! transactions when they fire. The engine only talks to it through the
//! [`PushServer`] trait:
//!
//! - `update_events` uploads new events and removes old ones in one payload.
//! - `event_statuses` reports the state of every event this client owns.
//!
//! [`offload`] turns dry-run output into events; [`mock::MockPushServer`] is
//! the in-memory fake used by tests.

use std::fmt;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::amount::NativeAmount;
use crate::errors::Result;

pub mod mock;
pub mod offload;

pub use offload::{
    check_push_event, effect_can_be_a_trigger, effect_to_trigger, prepare_new_push_events,
    PushEventInfo,
};

/// A transaction the server should broadcast when its event fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushBroadcastTx {
    pub plugin_id: String,
    /// Hex, without a `0x` prefix.
    pub raw_tx: String,
}

/// Notification sent to the device once the event fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
}

/// Condition the server watches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum PushTrigger {
    AddressBalance {
        plugin_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_id: Option<String>,
        address: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        above_amount: Option<NativeAmount>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        below_amount: Option<NativeAmount>,
    },
    PriceLevel {
        currency_pair: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        above_rate: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        below_rate: Option<f64>,
    },
    TxConfirm {
        plugin_id: String,
        confirmations: u32,
        txid: String,
    },
    /// Fires once every inner trigger has fired.
    All { triggers: Vec<PushTrigger> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPushEvent {
    pub event_id: String,
    pub broadcast_txs: Vec<PushBroadcastTx>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_message: Option<PushMessage>,
    pub trigger: PushTrigger,
}

/// One update payload: events to create and event ids to remove.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEventUpdate {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub create_events: Vec<NewPushEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_events: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushEventState {
    Waiting,
    Cancelled,
    Triggered,
    Hidden,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEventStatus {
    pub event_id: String,
    pub state: PushEventState,
    /// One slot per broadcast tx; `Some` holds that broadcast's error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast_tx_errors: Option<Vec<Option<String>>>,
}

pub trait PushServer: Send + Sync {
    fn update_events(&self, update: PushEventUpdate) -> BoxFuture<'_, Result<()>>;

    fn event_statuses(&self) -> BoxFuture<'_, Result<Vec<PushEventStatus>>>;
}

impl fmt::Debug for dyn PushServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PushServer")
    }
}
