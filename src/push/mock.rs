// src/push/mock.rs

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use futures::future::BoxFuture;

use super::{NewPushEvent, PushEventState, PushEventStatus, PushEventUpdate, PushServer};
use crate::errors::Result;

#[derive(Debug, Default)]
struct MockPushState {
    events: BTreeMap<String, (NewPushEvent, PushEventStatus)>,
    updates: Vec<PushEventUpdate>,
    fail_uploads: bool,
}

/// In-memory push server.
///
/// Created events start out `waiting`; tests fire them with
/// [`MockPushServer::set_event_state`] or [`MockPushServer::trigger_all`].
#[derive(Debug, Clone, Default)]
pub struct MockPushServer {
    state: Arc<Mutex<MockPushState>>,
}

impl MockPushServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every update payload received, in order.
    pub fn updates(&self) -> Vec<PushEventUpdate> {
        self.state.lock().unwrap().updates.clone()
    }

    /// Ids from every `remove_events` list, in order.
    pub fn removed_event_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .updates
            .iter()
            .flat_map(|update| update.remove_events.iter().cloned())
            .collect()
    }

    /// Events currently registered.
    pub fn events(&self) -> Vec<NewPushEvent> {
        self.state
            .lock()
            .unwrap()
            .events
            .values()
            .map(|(event, _)| event.clone())
            .collect()
    }

    pub fn set_event_state(&self, event_id: &str, state: PushEventState) {
        if let Some((_, status)) = self.state.lock().unwrap().events.get_mut(event_id) {
            status.state = state;
        }
    }

    pub fn set_broadcast_errors(&self, event_id: &str, errors: Vec<Option<String>>) {
        if let Some((_, status)) = self.state.lock().unwrap().events.get_mut(event_id) {
            status.broadcast_tx_errors = Some(errors);
        }
    }

    pub fn trigger_all(&self) {
        for (_, status) in self.state.lock().unwrap().events.values_mut() {
            status.state = PushEventState::Triggered;
        }
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.state.lock().unwrap().fail_uploads = fail;
    }
}

impl PushServer for MockPushServer {
    fn update_events(&self, update: PushEventUpdate) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if state.fail_uploads && !update.create_events.is_empty() {
                return Err(anyhow!("mock push server rejected upload").into());
            }

            for event in &update.create_events {
                let status = PushEventStatus {
                    event_id: event.event_id.clone(),
                    state: PushEventState::Waiting,
                    broadcast_tx_errors: None,
                };
                state
                    .events
                    .insert(event.event_id.clone(), (event.clone(), status));
            }
            for event_id in &update.remove_events {
                state.events.remove(event_id);
            }
            state.updates.push(update);
            Ok(())
        })
    }

    fn event_statuses(&self) -> BoxFuture<'_, Result<Vec<PushEventStatus>>> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .unwrap()
                .events
                .values()
                .map(|(_, status)| status.clone())
                .collect())
        })
    }
}
