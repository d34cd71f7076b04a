//! Broadcast + history store for prover notifications.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::value::{Message, Notification};

/// Default history size limit (4 MB).
const HISTORY_BYTES: usize = 4 * 1024 * 1024;

/// Slots in the live channel before slow subscribers start lagging.
const CHANNEL_CAPACITY: usize = 1024;

struct Stored {
    note: Notification,
    bytes: usize,
}

#[derive(Default)]
struct Inner {
    history: VecDeque<Stored>,
    total_bytes: usize,
}

/// Every `<message>` and `<feedback>` the prover emitted, whether or not a
/// call was waiting for it.
///
/// New subscribers receive the retained history and then live updates.
pub struct FeedbackStore {
    inner: RwLock<Inner>,
    limit: usize,
    sender: broadcast::Sender<Notification>,
}

impl Default for FeedbackStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedbackStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(HISTORY_BYTES)
    }

    /// Store retaining roughly `limit` bytes of history.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            limit,
            sender,
        }
    }

    /// Push a notification to both live listeners and history.
    pub fn push(&self, note: Notification) {
        let _ = self.sender.send(note.clone());
        let bytes = note.approx_bytes();

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        while inner.total_bytes.saturating_add(bytes) > self.limit {
            let Some(front) = inner.history.pop_front() else {
                break;
            };
            inner.total_bytes = inner.total_bytes.saturating_sub(front.bytes);
        }
        inner.history.push_back(Stored { note, bytes });
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);
    }

    /// Drop retained history. Live subscribers are unaffected.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.history.clear();
        inner.total_bytes = 0;
    }

    /// Receiver for live updates only.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Snapshot of the retained history.
    #[must_use]
    pub fn history(&self) -> Vec<Notification> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .map(|s| s.note.clone())
            .collect()
    }

    /// Stream that yields history first, then live updates.
    ///
    /// Updates missed by a lagging subscriber are skipped.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, Notification> {
        let (history, rx) = (self.history(), self.subscribe());

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        hist.chain(live).boxed()
    }

    /// Messages only, with feedback-embedded ones unwrapped.
    #[must_use]
    pub fn messages_stream(&self) -> futures::stream::BoxStream<'static, Message> {
        self.history_plus_stream()
            .filter_map(|note| async move { note.message().cloned() })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::value::{MessageLevel, StateId};

    fn message(text: &str) -> Notification {
        Notification::Message(Message {
            level: MessageLevel::Notice,
            text: text.into(),
        })
    }

    #[tokio::test]
    async fn history_then_live() {
        let store = FeedbackStore::new();
        store.push(message("before"));

        let mut stream = store.history_plus_stream();
        store.push(message("after"));

        assert_eq!(stream.next().await, Some(message("before")));
        assert_eq!(stream.next().await, Some(message("after")));
    }

    #[tokio::test]
    async fn messages_stream_unwraps_feedback() {
        let store = FeedbackStore::new();
        store.push(Notification::Feedback {
            state: Some(StateId(2)),
            content: "processed".into(),
            message: None,
        });
        store.push(Notification::Feedback {
            state: Some(StateId(2)),
            content: "message".into(),
            message: Some(Message {
                level: MessageLevel::Info,
                text: "inner".into(),
            }),
        });

        let mut stream = store.messages_stream();
        assert_eq!(stream.next().await.map(|m| m.text), Some("inner".into()));
    }

    #[test]
    fn history_is_bounded() {
        let store = FeedbackStore::with_limit(100);
        for i in 0..10 {
            store.push(message(&format!("{i:>20}")));
        }
        let history = store.history();
        assert!(history.len() < 10);
        assert_eq!(history.last(), Some(&message(&format!("{:>20}", 9))));
    }

    #[test]
    fn clear_drops_history() {
        let store = FeedbackStore::new();
        store.push(message("x"));
        store.clear();
        assert!(store.history().is_empty());
    }
}
