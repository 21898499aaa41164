//! Access-plane collaborator contract: creating, listing, denying, and
//! streaming access requests. Shared read-only by the watcher, the
//! processor, and the reconciler.

use futures::stream::BoxStream;

use crate::error::AccessPlaneError;
use crate::model::{AccessRequest, NewAccessRequest};

/// An event delivered by [`AccessPlaneClient::watch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessRequestEvent {
    /// Synthetic event recognized on stream open; logged, not delivered to
    /// the review handler.
    WatchStarted,
    Resource(AccessRequest),
}

#[async_trait::async_trait]
pub trait AccessPlaneClient: Send + Sync + 'static {
    async fn create_access_request(
        &self,
        request: NewAccessRequest,
    ) -> Result<AccessRequest, AccessPlaneError>;

    async fn list_access_requests(&self) -> Result<Vec<AccessRequest>, AccessPlaneError>;

    async fn deny_access_request(&self, name: &str, reason: &str) -> Result<(), AccessPlaneError>;

    /// Open a long-lived subscription to `AccessRequest` state transitions,
    /// optionally filtered to requests authored by `requester`.
    async fn watch(
        &self,
        requester: Option<String>,
    ) -> Result<BoxStream<'static, Result<AccessRequestEvent, AccessPlaneError>>, AccessPlaneError>;
}
