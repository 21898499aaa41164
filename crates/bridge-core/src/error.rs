//! Per-domain error types. Each layer wraps the one below it with
//! `#[from]` rather than flattening everything into one enum.

use bridge_coordination::LeaseBackendError;

/// An access request's labels were missing a required correlation field,
/// or a present one failed to parse.
#[derive(Debug, thiserror::Error)]
pub enum CorrelationError {
    #[error("access request is missing required correlation label '{label}'")]
    MissingLabel { label: String },

    #[error("workflow_run_id label '{value}' is not a valid integer")]
    InvalidWorkflowRunId { value: String },
}

/// Errors surfaced by the external access-plane collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AccessPlaneError {
    #[error("access plane request failed: {reason}")]
    Request { reason: String },

    #[error("access plane returned malformed data: {reason}")]
    Malformed { reason: String },
}

/// Errors surfaced by the external forge collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    #[error("forge request failed: {reason}")]
    Request { reason: String },
}

/// Errors from the coordinator's lease-and-rate-limit gate. `AlreadyLeased`
/// and `RateLimited` are not failures — see the handling rules in
/// `processor.rs` — they just mean "drop this event, someone else has it".
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("lease already held by another replica")]
    AlreadyLeased,

    #[error("internal rate limit exceeded for this workload")]
    RateLimited,

    #[error(transparent)]
    Backend(#[from] LeaseBackendError),
}

/// Errors from the access-plane watcher's streaming loop.
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("review handoff channel closed")]
    ReviewChannelClosed,

    #[error("access-plane stream closed unexpectedly")]
    StreamClosed,

    #[error(transparent)]
    Stream(#[from] AccessPlaneError),
}

/// Errors from the event processor's ingress and review paths.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("no handler configured for repository '{key}'")]
    UnknownRepo { key: String },

    #[error("access request '{access_request}' is missing required correlation labels")]
    MissingCorrelationLabels { access_request: String },

    #[error("access request '{access_request}' is in a state that cannot be reviewed")]
    UnreviewableState { access_request: String },

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error(transparent)]
    AccessPlane(#[from] AccessPlaneError),

    #[error(transparent)]
    Forge(#[from] ForgeError),
}

/// Errors from a reconciler pass.
#[derive(Debug, thiserror::Error)]
pub enum ReconcilerError {
    #[error(transparent)]
    Processor(#[from] ProcessorError),
}
