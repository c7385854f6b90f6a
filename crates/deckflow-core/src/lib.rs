//! Deckflow Core - pipeline synchronization engine
//!
//! Keeps a local presentation in sync with the generation service:
//! - Gates stage runs on the dependency graph
//! - Flips status optimistically and bounds every remote wait
//! - Polls adaptively, faster while something is processing
//! - Applies scoped suggestions with rollback on a failed save
//! - Notifies subscribers of every observable change
//!
//! # Example
//!
//! ```rust,ignore
//! use deckflow_core::prelude::*;
//!
//! # async fn example(remote: std::sync::Arc<dyn RemoteSync>) -> Result<(), OrchestratorError> {
//! let id = PresentationId::from("p-1");
//! let orch = PipelineOrchestrator::open(remote, &id, AdaptivePoller::new(), SyncConfig::default()).await?;
//! orch.subscribe(|event| println!("{event:?}"));
//! orch.start();
//!
//! orch.request_run(StageKind::Research, RunParameters::new()).await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod applier;
pub mod config;
pub mod error;
pub mod events;
pub mod facade;
pub mod graph;
pub mod poller;
pub mod remote;
pub mod session;
pub mod status;

// Re-exports for convenience
pub use applier::{MergePlan, Rollback};
pub use config::{DeckflowConfig, RemoteConfig, RunTimeouts, SyncConfig};
pub use error::{ConfigError, GatingError, OrchestratorError, RemoteError};
pub use events::{ChangeEvent, Listener, SubscriptionId};
pub use facade::{ApplyOutcome, PipelineOrchestrator};
pub use poller::{AdaptivePoller, Cadence, PollOutcome, PollTarget, SkipReason};
pub use remote::{InterpretRequest, RemoteSync, RunAck, RunParameters, SavePayload, ScopeHint};
pub use session::{SessionState, SyncBookkeeping};
pub use status::{StatusSnapshot, StepStatusModel};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Deckflow Core
    pub use crate::{
        AdaptivePoller, ApplyOutcome, ChangeEvent, DeckflowConfig, OrchestratorError,
        PipelineOrchestrator, RemoteSync, RunParameters, ScopeHint, SessionState, StepStatusModel,
        SyncConfig,
    };
    pub use deckflow_model::{PresentationId, SlideId, StageKind, StepStatus};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
