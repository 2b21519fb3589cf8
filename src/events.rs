//! Engine-owned publish/subscribe.
//!
//! Three sticky signals (`Change`, `Update`, `Close`) keep their last value and
//! hand it to every new subscriber. Transient [`EngineEvent`]s are only seen by
//! subscribers that exist when they are sent.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::models::PlaybackPhase;

/// A new item started playing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub title: String,
    pub story_ref: Option<String>,
}

/// Periodic progress of the playing item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEvent {
    pub position_ms: u64,
    pub duration_ms: u64,
    /// Portion of the item already buffered, in milliseconds of media
    pub downloaded_ms: u64,
}

/// Playback ended and the sticky state was cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseEvent;

/// Non-sticky notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    BufferingStateChanged(bool),
    PhaseChanged(PlaybackPhase),
    Prepared { title: String },
    Completed { title: String },
    Diagnostic { code: i32, extra: i32 },
}

const TRANSIENT_CAPACITY: usize = 64;

pub struct EventBus {
    change: watch::Sender<Option<ChangeEvent>>,
    update: watch::Sender<Option<UpdateEvent>>,
    close: watch::Sender<Option<CloseEvent>>,
    transient: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (change, _) = watch::channel(None);
        let (update, _) = watch::channel(None);
        let (close, _) = watch::channel(None);
        let (transient, _) = broadcast::channel(TRANSIENT_CAPACITY);
        Self {
            change,
            update,
            close,
            transient,
        }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            change: self.change.subscribe(),
            update: self.update.subscribe(),
            close: self.close.subscribe(),
            events: self.transient.subscribe(),
        }
    }

    /// Replace the retained `Change`; a retained `Close` no longer applies
    pub fn publish_change(&self, event: ChangeEvent) {
        self.close.send_replace(None);
        self.change.send_replace(Some(event));
    }

    pub fn publish_update(&self, event: UpdateEvent) {
        self.update.send_replace(Some(event));
    }

    /// Drop retained `Change`/`Update` and announce `Close`
    pub fn publish_close(&self) {
        self.change.send_replace(None);
        self.update.send_replace(None);
        self.close.send_replace(Some(CloseEvent));
    }

    pub fn emit(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.transient.send(event);
    }

    pub fn latest_change(&self) -> Option<ChangeEvent> {
        self.change.borrow().clone()
    }

    pub fn latest_update(&self) -> Option<UpdateEvent> {
        *self.update.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.close.borrow().is_some()
    }
}

/// Receiving side handed to observers
pub struct Subscription {
    pub change: watch::Receiver<Option<ChangeEvent>>,
    pub update: watch::Receiver<Option<UpdateEvent>>,
    pub close: watch::Receiver<Option<CloseEvent>>,
    pub events: broadcast::Receiver<EngineEvent>,
}

impl Subscription {
    pub fn change(&self) -> Option<ChangeEvent> {
        self.change.borrow().clone()
    }

    pub fn update(&self) -> Option<UpdateEvent> {
        *self.update.borrow()
    }

    pub fn closed(&self) -> bool {
        self.close.borrow().is_some()
    }

    /// Drain transient events received so far
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => out.push(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(title: &str) -> ChangeEvent {
        ChangeEvent {
            title: title.to_string(),
            story_ref: None,
        }
    }

    #[test]
    fn test_late_subscriber_sees_latest_values() {
        let bus = EventBus::new();
        bus.publish_change(change("first"));
        bus.publish_change(change("second"));
        bus.publish_update(UpdateEvent {
            position_ms: 1000,
            duration_ms: 60_000,
            downloaded_ms: 30_000,
        });

        let sub = bus.subscribe();
        assert_eq!(sub.change().unwrap().title, "second");
        assert_eq!(sub.update().unwrap().position_ms, 1000);
        assert!(!sub.closed());
    }

    #[test]
    fn test_close_clears_sticky_state() {
        let bus = EventBus::new();
        bus.publish_change(change("story"));
        bus.publish_update(UpdateEvent {
            position_ms: 1,
            duration_ms: 2,
            downloaded_ms: 0,
        });
        bus.publish_close();

        let sub = bus.subscribe();
        assert!(sub.change().is_none());
        assert!(sub.update().is_none());
        assert!(sub.closed());

        bus.publish_change(change("next"));
        assert!(!bus.is_closed());
        assert_eq!(bus.latest_change().unwrap().title, "next");
    }

    #[tokio::test]
    async fn test_existing_subscriber_is_notified() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        bus.publish_change(change("live"));
        sub.change.changed().await.unwrap();
        assert_eq!(sub.change().unwrap().title, "live");
    }

    #[test]
    fn test_transient_events_only_reach_current_subscribers() {
        let bus = EventBus::new();
        bus.emit(EngineEvent::BufferingStateChanged(true));

        let mut sub = bus.subscribe();
        assert!(sub.drain_events().is_empty());

        bus.emit(EngineEvent::BufferingStateChanged(false));
        assert_eq!(
            sub.drain_events(),
            vec![EngineEvent::BufferingStateChanged(false)]
        );
    }
}
