//! Adaptive poller
//!
//! One cancellable background task per presentation, kept in a registry
//! keyed by presentation id.
//!
//! - Polls immediately on start, then waits according to [`Cadence`]
//! - `wake` cuts the current wait short
//! - Holds only a weak reference to its target, so dropping the target
//!   ends the task
//! - Cancellation is checked before every fetch and races the fetch itself

use crate::config::SyncConfig;
use crate::error::RemoteError;
use crate::status::StatusSnapshot;
use async_trait::async_trait;
use dashmap::DashMap;
use deckflow_model::{PresentationId, StageKind};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long to wait before the next tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Something is processing
    Active(Duration),
    /// Work remains but nothing is running
    Settled(Duration),
    /// Parked until woken
    Idle,
}

impl Cadence {
    /// Cadence for the given statuses
    ///
    /// `ignored` names a stage left out of the settled check (the research
    /// stage the presentation does not use).
    #[must_use]
    pub fn for_statuses(
        statuses: &StatusSnapshot,
        ignored: Option<StageKind>,
        config: &SyncConfig,
    ) -> Self {
        if statuses.any_processing() {
            return Cadence::Active(config.short_interval());
        }
        let outstanding = crate::graph::enabled_stages(statuses)
            .into_iter()
            .filter(|stage| Some(*stage) != ignored)
            .any(|stage| !statuses.get(stage).is_terminal());
        if outstanding || !config.stop_when_settled {
            Cadence::Settled(config.long_interval())
        } else {
            Cadence::Idle
        }
    }

    /// Wait before the next tick; `None` parks
    #[inline]
    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Cadence::Active(d) | Cadence::Settled(d) => Some(*d),
            Cadence::Idle => None,
        }
    }
}

/// Why a tick did not fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Previous fetch still outstanding
    InFlight,
    /// A suggestion write is in flight
    Suspended,
    /// Target was shut down
    TornDown,
}

/// Result of one tick
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Snapshot reconciled
    Applied(u64),
    /// No fetch issued
    Skipped(SkipReason),
    /// Fetch returned but was stale
    Discarded(u64),
    /// Fetch failed; state unchanged
    Failed(RemoteError),
}

impl PollOutcome {
    /// Whether a snapshot was applied
    #[inline]
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, PollOutcome::Applied(_))
    }
}

/// Something the poller can tick
#[async_trait]
pub trait PollTarget: Send + Sync {
    /// Fetch and reconcile once
    async fn poll_once(&self) -> PollOutcome;

    /// Wait before the next tick
    fn cadence(&self) -> Cadence;
}

#[derive(Debug)]
struct PollHandle {
    cancel: CancellationToken,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

/// Registry of poll tasks keyed by presentation id
#[derive(Debug, Clone, Default)]
pub struct AdaptivePoller {
    tasks: Arc<DashMap<PresentationId, PollHandle>>,
}

impl AdaptivePoller {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the poll task for `id`
    ///
    /// Returns `false` if a live task is already registered. Must be called
    /// within a tokio runtime.
    pub fn start(&self, id: PresentationId, target: Weak<dyn PollTarget>) -> bool {
        if self.is_active(&id) {
            return false;
        }
        let cancel = CancellationToken::new();
        let wake = Arc::new(Notify::new());
        let task = tokio::spawn(run_loop(
            id.clone(),
            target,
            cancel.clone(),
            Arc::clone(&wake),
        ));
        tracing::info!("polling started for {}", id);
        self.tasks.insert(id, PollHandle { cancel, wake, task });
        true
    }

    /// Tick `id` now; returns whether a task was registered
    pub fn wake(&self, id: &PresentationId) -> bool {
        match self.tasks.get(id) {
            Some(handle) => {
                handle.wake.notify_one();
                true
            }
            None => false,
        }
    }

    /// Stop and unregister the task for `id`
    pub fn cancel(&self, id: &PresentationId) -> bool {
        match self.tasks.remove(id) {
            Some((_, handle)) => {
                handle.cancel.cancel();
                tracing::info!("polling cancelled for {}", id);
                true
            }
            None => false,
        }
    }

    /// Stop every task
    pub fn cancel_all(&self) {
        let ids: Vec<PresentationId> = self.tasks.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.cancel(&id);
        }
    }

    /// Whether a live task is registered for `id`
    #[must_use]
    pub fn is_active(&self, id: &PresentationId) -> bool {
        self.tasks
            .get(id)
            .is_some_and(|h| !h.task.is_finished() && !h.cancel.is_cancelled())
    }

    /// Number of live tasks
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|h| !h.task.is_finished() && !h.cancel.is_cancelled())
            .count()
    }
}

async fn run_loop(
    id: PresentationId,
    target: Weak<dyn PollTarget>,
    cancel: CancellationToken,
    wake: Arc<Notify>,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let Some(strong) = target.upgrade() else {
            break;
        };
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            outcome = strong.poll_once() => outcome,
        };
        let cadence = strong.cadence();
        // Never keep the target alive while waiting
        drop(strong);

        match &outcome {
            PollOutcome::Failed(e) => tracing::warn!("poll failed for {}: {}", id, e),
            other => tracing::debug!("poll tick for {}: {:?}", id, other),
        }

        let wait = async {
            match cadence.interval() {
                Some(interval) => tokio::time::sleep(interval).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = wake.notified() => {}
            () = wait => {}
        }
    }
    tracing::debug!("poll loop exited for {}", id);
}
