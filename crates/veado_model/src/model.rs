//! Event-sourced projection of the peer's states.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use veado_core::{EventBus, Subscription};
use veado_network::{ModelEvent, Request, RequestSink, StateSummary};

use crate::state::{RemoteState, StateColor, StateImage, decode_thumbnail};

#[derive(Default)]
struct Projection {
    states: BTreeMap<String, RemoteState>,
    active_state: Option<String>,
    connected: bool,
}

impl Projection {
    /// Apply a full state list. Returns the ids whose thumbnails need
    /// fetching.
    fn apply_list(&mut self, list: &[StateSummary]) -> Vec<String> {
        let mut stale_thumbs = Vec::new();
        for summary in list {
            let state = self
                .states
                .entry(summary.id.clone())
                .or_insert_with(|| RemoteState::new(summary.id.clone()));
            state.state_name = Some(summary.name.clone());

            if state.thumb_hash.as_deref() != Some(summary.thumb_hash.as_str()) {
                state.thumbnail = None;
                state.thumb_hash = Some(summary.thumb_hash.clone());
                stale_thumbs.push(summary.id.clone());
            }
        }

        self.states
            .retain(|id, _| list.iter().any(|summary| &summary.id == id));
        if let Some(active) = &self.active_state {
            if !self.states.contains_key(active) {
                self.active_state = None;
            }
        }
        stale_thumbs
    }

    fn apply_active(&mut self, state_id: &str) {
        for state in self.states.values_mut() {
            state.is_active = false;
        }
        self.states
            .entry(state_id.to_string())
            .or_insert_with(|| RemoteState::new(state_id))
            .is_active = true;
        self.active_state = Some(state_id.to_string());
    }

    fn apply_thumbnail(&mut self, state_id: &str, hash: &str, png: &[u8]) {
        let thumbnail = match decode_thumbnail(png) {
            Ok(image) => Some(Arc::new(image)),
            Err(e) => {
                warn!("Couldn't decode thumbnail for {state_id}: {e}");
                None
            }
        };
        let state = self
            .states
            .entry(state_id.to_string())
            .or_insert_with(|| RemoteState::new(state_id));
        state.thumb_hash = Some(hash.to_string());
        state.thumbnail = thumbnail;
    }
}

/// Projection of [`ModelEvent`]s into a map of [`RemoteState`]s.
///
/// Every event handed to [`on`](Self::on) is republished unchanged on the
/// model's own bus once the projection reflects it.
pub struct StateModel {
    requests: Arc<dyn RequestSink>,
    projection: Mutex<Projection>,
    events: EventBus<ModelEvent>,
}

impl StateModel {
    /// Build an empty, disconnected model that sends its fetches through
    /// `requests`.
    pub fn new(requests: Arc<dyn RequestSink>) -> Arc<Self> {
        Arc::new(Self {
            requests,
            projection: Mutex::new(Projection::default()),
            events: EventBus::new("model"),
        })
    }

    /// Feed the model from `bus`. The subscription holds the model weakly.
    ///
    /// If the request sink already has a live socket, the model is marked
    /// connected and bootstraps immediately instead of waiting for the next
    /// `Connected(true)`.
    pub fn attach(self: &Arc<Self>, bus: &EventBus<ModelEvent>) -> Subscription {
        let model: Weak<Self> = Arc::downgrade(self);
        let subscription = bus.subscribe(move |event| {
            if let Some(model) = model.upgrade() {
                model.on(event);
            }
        });
        if self.requests.is_connected() {
            debug!("Attached to a live connection");
            self.on(&ModelEvent::Connected(true));
        }
        subscription
    }

    /// Observe events after the model has applied them.
    pub fn subscribe(&self, handler: impl Fn(&ModelEvent) + Send + Sync + 'static) -> Subscription {
        self.events.subscribe(handler)
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.events.unsubscribe(subscription)
    }

    /// Ask the peer for the full list and the active state.
    pub fn bootstrap(&self) {
        self.requests.send_request(Request::List);
        self.requests.send_request(Request::Peek);
    }

    /// Apply one event, then republish it.
    pub fn on(&self, event: &ModelEvent) {
        match event {
            ModelEvent::AllStates(list) => {
                let stale_thumbs = self.projection.lock().apply_list(list);
                for state_id in stale_thumbs {
                    debug!("Fetching thumbnail for {state_id}");
                    self.requests.send_request(Request::Thumbnail(state_id));
                }
            }
            ModelEvent::ActiveState(state_id) => {
                self.projection.lock().apply_active(state_id);
            }
            ModelEvent::Thumbnail {
                state_id,
                hash,
                png,
            } => {
                self.projection.lock().apply_thumbnail(state_id, hash, png);
            }
            ModelEvent::Connected(connected) => {
                let was_connected =
                    std::mem::replace(&mut self.projection.lock().connected, *connected);
                if *connected && !was_connected {
                    self.bootstrap();
                }
            }
            other => warn!("Ignoring unknown event {other:?}"),
        }

        self.events.publish(event);
    }

    /// Known state ids, sorted.
    pub fn states(&self) -> Vec<String> {
        self.projection.lock().states.keys().cloned().collect()
    }

    /// Snapshot of one state.
    pub fn state(&self, state_id: &str) -> Option<RemoteState> {
        self.projection.lock().states.get(state_id).cloned()
    }

    pub fn state_name(&self, state_id: &str) -> Option<String> {
        self.projection
            .lock()
            .states
            .get(state_id)
            .and_then(|state| state.state_name.clone())
    }

    pub fn active_state(&self) -> Option<String> {
        self.projection.lock().active_state.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.projection.lock().connected
    }

    pub fn color_for(&self, state_id: &str) -> StateColor {
        let projection = self.projection.lock();
        if !projection.connected || !projection.states.contains_key(state_id) {
            StateColor::Error
        } else if projection.active_state.as_deref() == Some(state_id) {
            StateColor::Active
        } else {
            StateColor::Inactive
        }
    }

    pub fn image_for(&self, state_id: &str) -> StateImage {
        let projection = self.projection.lock();
        let thumbnail = projection
            .states
            .get(state_id)
            .and_then(|state| state.thumbnail.clone());
        match thumbnail {
            Some(image) => StateImage::Thumbnail(image),
            None if projection.connected => StateImage::NotFound,
            None => StateImage::Disconnected,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
