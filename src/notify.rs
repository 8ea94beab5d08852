use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for applied events, per place and tenant-wide.
///
/// Receivers reload their interval index on every event of the place they
/// show; the mail dispatcher listens to the tenant-wide channel.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
    all: broadcast::Sender<Event>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to events of one place. Creates the channel if needed.
    pub fn subscribe(&self, place_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(place_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.all.subscribe()
    }

    /// Send a notification. Never blocks; no-op if nobody is listening.
    pub fn send(&self, place_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&place_id) {
            let _ = sender.send(event.clone());
        }
        let _ = self.all.send(event.clone());
    }
}
