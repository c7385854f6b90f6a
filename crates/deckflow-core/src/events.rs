//! Change notification
//!
//! Explicit subscriber list. Callbacks are always invoked after the internal
//! state lock has been released, so a callback may read back through the
//! orchestrator handle.

use crate::error::RemoteError;
use deckflow_model::{SlideId, StageKind, StepStatus, SuggestionState};
use parking_lot::Mutex;
use std::sync::Arc;
use ulid::Ulid;

/// Something observable changed
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A stage changed status
    StepChanged {
        /// Stage
        stage: StageKind,
        /// New status
        status: StepStatus,
    },
    /// Slide sequence or slide content changed
    SlidesChanged,
    /// Selected slide changed
    SelectionChanged(Option<SlideId>),
    /// Active suggestion appeared, was applied or went away
    SuggestionChanged(Option<SuggestionState>),
    /// Saving a suggestion failed and was rolled back
    SuggestionApplyFailed {
        /// Cause
        error: RemoteError,
    },
    /// A run request was not acknowledged
    RunFailed {
        /// Stage
        stage: StageKind,
        /// Cause
        error: RemoteError,
    },
    /// A remote snapshot was reconciled
    SnapshotApplied {
        /// Sequence number of the applied fetch
        seq: u64,
    },
}

/// Handle returned by `subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Ulid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Ulid::new())
    }
}

/// Subscriber callback
pub type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Ordered list of subscribers
#[derive(Default)]
pub struct Subscribers {
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
}

impl Subscribers {
    /// Empty list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback
    pub fn subscribe(&self, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.listeners.lock().push((id, listener));
        id
    }

    /// Remove a callback; returns whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    /// Number of registered callbacks
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// No callbacks registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver events in order to every subscriber
    pub fn emit_all(&self, events: &[ChangeEvent]) {
        if events.is_empty() {
            return;
        }
        // Snapshot so callbacks may subscribe or unsubscribe
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for event in events {
            tracing::trace!("emit {:?}", event);
            for listener in &listeners {
                listener(event);
            }
        }
    }
}

impl std::fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers")
            .field("count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn subscribe_and_unsubscribe() {
        let subs = Subscribers::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = subs.subscribe(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        subs.emit_all(&[ChangeEvent::SlidesChanged, ChangeEvent::SelectionChanged(None)]);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        assert!(subs.unsubscribe(id));
        assert!(!subs.unsubscribe(id));
        subs.emit_all(&[ChangeEvent::SlidesChanged]);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(subs.is_empty());
    }

    #[test]
    fn callback_may_unsubscribe_itself() {
        let subs = Arc::new(Subscribers::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let (subs2, slot2) = (Arc::clone(&subs), Arc::clone(&slot));
        let id = subs.subscribe(Arc::new(move |_| {
            if let Some(id) = *slot2.lock() {
                subs2.unsubscribe(id);
            }
        }));
        *slot.lock() = Some(id);

        subs.emit_all(&[ChangeEvent::SlidesChanged]);
        assert!(subs.is_empty());
    }
}
