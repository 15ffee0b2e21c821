//! Observation bus: ordered session events and a latest-value snapshot.
//!
//! Subscribers get every [`SessionEvent`] in publication order over an
//! unbounded channel, so distinct state transitions are never reordered or
//! coalesced. Observers that only care about the current value use
//! [`ObservationBus::watch`], where a newer chunk size simply replaces the
//! previous one.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use segcap_common::error::{ErrorKind, SegcapError};
use segcap_platform_core::{MediaStream, RecordingState, SourceType, StreamId, TrackInfo};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::segment::SegmentId;

/// Description of the bound stream, safe to hand to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub id: StreamId,
    /// Source type the stream was requested as.
    pub source_type: SourceType,
    pub tracks: Vec<TrackInfo>,
}

impl StreamInfo {
    pub fn of(stream: &dyn MediaStream, source_type: SourceType) -> Self {
        Self {
            id: stream.id(),
            source_type,
            tracks: stream.tracks(),
        }
    }
}

/// The four values published to the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub recording_state: RecordingState,
    pub mime_type: String,
    pub most_recent_chunk_size: u64,
    pub stream: Option<StreamInfo>,
}

/// Everything a session publishes, in the order it happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged { state: RecordingState },
    MimeTypeChanged { mime_type: String },
    StreamChanged { stream: Option<StreamInfo> },
    ChunkRecorded { segment: SegmentId, size: u64 },
    SegmentStarted { segment: SegmentId, source_type: SourceType },
    SegmentFinalized { segment: SegmentId, artifact_id: u64, size: u64 },
    Error { kind: ErrorKind, message: String },
}

impl SessionEvent {
    pub fn error(err: &SegcapError) -> Self {
        Self::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Identifier of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Default)]
struct Subscribers {
    next_id: u64,
    senders: Vec<(SubscriptionId, mpsc::UnboundedSender<SessionEvent>)>,
}

/// Fan-out of session events to any number of subscribers.
///
/// Cloning yields another handle to the same bus.
#[derive(Debug, Clone)]
pub struct ObservationBus {
    subscribers: Arc<Mutex<Subscribers>>,
    snapshot: Arc<watch::Sender<SessionSnapshot>>,
}

impl Default for ObservationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservationBus {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        Self {
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
            snapshot: Arc::new(snapshot),
        }
    }

    /// Subscribe to every event published from now on.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.lock();
        let id = SubscriptionId(subscribers.next_id);
        subscribers.next_id += 1;
        subscribers.senders.push((id, tx));
        tracing::debug!(subscription = id.0, "Observer subscribed");

        Subscription {
            id,
            events: rx,
            snapshot: self.snapshot.subscribe(),
            bus: Arc::downgrade(&self.subscribers),
        }
    }

    /// Latest-value view of the published fields.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        remove_subscriber(&self.subscribers, id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().senders.len()
    }

    /// Update the snapshot, then deliver the event to every subscriber.
    ///
    /// Subscribers whose receiving end is gone are pruned.
    pub fn publish(&self, event: SessionEvent) {
        self.snapshot.send_modify(|snapshot| apply(snapshot, &event));

        let mut subscribers = self.lock();
        subscribers
            .senders
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        lock_subscribers(&self.subscribers)
    }
}

fn lock_subscribers(subscribers: &Mutex<Subscribers>) -> MutexGuard<'_, Subscribers> {
    // A panic while holding the lock cannot leave the list half-updated.
    subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn remove_subscriber(subscribers: &Mutex<Subscribers>, id: SubscriptionId) {
    let mut guard = lock_subscribers(subscribers);
    let before = guard.senders.len();
    guard.senders.retain(|(sid, _)| *sid != id);
    if guard.senders.len() != before {
        tracing::debug!(subscription = id.0, "Observer unsubscribed");
    }
}

fn apply(snapshot: &mut SessionSnapshot, event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged { state } => snapshot.recording_state = *state,
        SessionEvent::MimeTypeChanged { mime_type } => snapshot.mime_type = mime_type.clone(),
        SessionEvent::StreamChanged { stream } => snapshot.stream = stream.clone(),
        SessionEvent::ChunkRecorded { size, .. } => snapshot.most_recent_chunk_size = *size,
        SessionEvent::SegmentStarted { .. }
        | SessionEvent::SegmentFinalized { .. }
        | SessionEvent::Error { .. } => {}
    }
}

/// A live subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    snapshot: watch::Receiver<SessionSnapshot>,
    bus: Weak<Mutex<Subscribers>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Next queued event, if any.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.events.try_recv().ok()
    }

    /// Every event queued right now.
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Current snapshot (most-recent-wins).
    pub fn current(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.bus.upgrade() {
            remove_subscriber(&subscribers, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_arrive_in_publication_order() {
        let bus = ObservationBus::new();
        let mut sub = bus.subscribe();

        bus.publish(SessionEvent::StateChanged {
            state: RecordingState::Recording,
        });
        bus.publish(SessionEvent::StateChanged {
            state: RecordingState::Paused,
        });
        bus.publish(SessionEvent::StateChanged {
            state: RecordingState::Recording,
        });

        let states: Vec<_> = sub
            .drain()
            .into_iter()
            .map(|e| match e {
                SessionEvent::StateChanged { state } => state,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(
            states,
            vec![
                RecordingState::Recording,
                RecordingState::Paused,
                RecordingState::Recording
            ]
        );
    }

    #[test]
    fn test_snapshot_keeps_most_recent_chunk_size() {
        let bus = ObservationBus::new();
        let watch = bus.watch();
        for size in [10, 20, 5] {
            bus.publish(SessionEvent::ChunkRecorded {
                segment: SegmentId(0),
                size,
            });
        }
        assert_eq!(watch.borrow().most_recent_chunk_size, 5);
        assert_eq!(bus.snapshot().recording_state, RecordingState::Inactive);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = ObservationBus::new();
        let sub = bus.subscribe();
        let other = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(sub);
        assert_eq!(bus.subscriber_count(), 1);
        other.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_explicit_unsubscribe_stops_delivery() {
        let bus = ObservationBus::new();
        let mut sub = bus.subscribe();
        bus.unsubscribe(sub.id());
        bus.publish(SessionEvent::MimeTypeChanged {
            mime_type: "video/webm".to_string(),
        });
        assert!(sub.try_recv().is_none());
        assert_eq!(sub.current().mime_type, "video/webm");
    }

    #[test]
    fn test_late_subscriber_sees_current_snapshot_only() {
        let bus = ObservationBus::new();
        bus.publish(SessionEvent::StateChanged {
            state: RecordingState::Recording,
        });
        let mut sub = bus.subscribe();
        assert!(sub.try_recv().is_none());
        assert_eq!(sub.current().recording_state, RecordingState::Recording);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = SessionEvent::Error {
            kind: ErrorKind::MediaAccess,
            message: "denied".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["kind"], "media_access");
    }
}
