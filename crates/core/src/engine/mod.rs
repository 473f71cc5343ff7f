//! The instance execution engine.
//!
//! [`WorkflowEngine`] drives instances from start to a terminal state and
//! exposes the public workflow operations. [`DelegationService`] owns the
//! delegation lifecycle. Both are generic over the storage traits in
//! [`store`] and the collaborator traits in [`collaborators`], so the same
//! engine runs against PostgreSQL in production and [`InMemoryStore`] in
//! tests.

mod collaborators;
mod delegations;
mod locks;
mod memory;
mod runtime;
mod store;

use std::time::Duration;

pub use collaborators::{
    ActionExecutor, CollaboratorError, EmptyEntityAccessor, EntityAccessor, NoopActionExecutor,
    NoopNotifier, Notifier, StepContext,
};
pub use delegations::DelegationService;
pub use locks::{InstanceGuard, InstanceLocks};
pub use memory::{InMemoryStore, RecordingActionExecutor, RecordingNotifier, StaticEntityAccessor};
pub use runtime::{ApprovalOutcome, WorkflowEngine};
pub use store::{AuditSink, DelegationStore, EngineStore, StepDraft, WorkflowDraft, WorkflowStore};

use crate::error::CoreError;

/// Errors produced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A STRICT workflow's notification or action step failed.
    #[error("Step '{step}' failed: {message}")]
    SideEffect { step: String, message: String },

    #[error("Storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl EngineError {
    /// Wrap a storage backend error.
    pub fn storage(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Storage(Box::new(err))
    }

    pub fn as_core(&self) -> Option<&CoreError> {
        match self {
            Self::Core(err) => Some(err),
            _ => None,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Default timeout for entity snapshot fetches.
pub const DEFAULT_ENTITY_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of re-aggregation attempts after a version conflict.
pub const DEFAULT_CONFLICT_RETRIES: u32 = 3;

/// Engine tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Upper bound on a single entity snapshot fetch.
    pub entity_fetch_timeout: Duration,
    /// How many times settling an approval step is retried when the
    /// instance was modified by another writer.
    pub conflict_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            entity_fetch_timeout: DEFAULT_ENTITY_FETCH_TIMEOUT,
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }
}
