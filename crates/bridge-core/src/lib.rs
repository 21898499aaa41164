//! Policy core for the approval bridge.
//!
//! Wires together de-duplication, rate limiting, distributed leasing, the
//! access-plane watcher, the event processor, and the reconciler. Nothing
//! in this crate talks HTTP, YAML, or a concrete forge/access-plane wire
//! protocol — those live in `bridge-server` and its collaborator
//! implementations. This crate only knows the [`access_plane::AccessPlaneClient`]
//! and [`forge::ForgeClient`] traits.

pub mod access_plane;
pub mod coordinator;
pub mod dedup;
pub mod error;
pub mod forge;
pub mod model;
pub mod processor;
pub mod ratelimit;
pub mod reconciler;
pub mod watcher;

pub use access_plane::{AccessPlaneClient, AccessRequestEvent};
pub use coordinator::{CancelToken, Coordinator, LeaseGuard};
pub use dedup::TtlCache;
pub use forge::{ForgeClient, PendingDeployment, ReviewState, WaitingWorkflowRun};
pub use model::{
    AccessRequest, AccessRequestState, DeploymentReviewEvent, NewAccessRequest,
    WorkflowRunCorrelation,
};
pub use processor::{EventProcessor, RepoConfig};
pub use ratelimit::RateLimiter;
pub use reconciler::Reconciler;
pub use watcher::Watcher;
