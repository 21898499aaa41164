//! Access-Plane Watcher: a long-lived streaming subscription to access-
//! request state transitions, strictly ordered per access-request name by
//! the access plane itself — the core leans on that ordering rather than
//! re-deriving it.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::access_plane::{AccessPlaneClient, AccessRequestEvent};
use crate::coordinator::CancelToken;
use crate::error::WatcherError;
use crate::model::{AccessRequest, AccessRequestState};

/// Subscribes to access-request transitions and hands `approved`/`denied`
/// resources off to the review path; `pending` is ours to have created and
/// is ignored, anything else is logged at warn and ignored.
pub struct Watcher<A> {
    access_plane: Arc<A>,
    requester: Option<String>,
}

impl<A: AccessPlaneClient> Watcher<A> {
    #[must_use]
    pub fn new(access_plane: Arc<A>, requester: Option<String>) -> Self {
        Self {
            access_plane,
            requester,
        }
    }

    /// Runs until the stream terminates or `cancel` fires. Termination
    /// without cancellation is returned as an error — reconnection is a
    /// process-restart responsibility, not this loop's.
    pub async fn run(
        &self,
        review_tx: mpsc::UnboundedSender<AccessRequest>,
        mut cancel: CancelToken,
    ) -> Result<(), WatcherError> {
        let mut stream = self.access_plane.watch(self.requester.clone()).await?;

        loop {
            tokio::select! {
                item = stream.next() => {
                    match item {
                        Some(Ok(AccessRequestEvent::WatchStarted)) => {
                            info!("access-plane watch started");
                        }
                        Some(Ok(AccessRequestEvent::Resource(request))) => {
                            self.dispatch(request, &review_tx)?;
                        }
                        Some(Err(e)) => return Err(WatcherError::Stream(e)),
                        None => return Err(WatcherError::StreamClosed),
                    }
                }
                _ = cancel.changed() => {
                    info!("access-plane watcher stopping");
                    return Ok(());
                }
            }
        }
    }

    fn dispatch(
        &self,
        request: AccessRequest,
        review_tx: &mpsc::UnboundedSender<AccessRequest>,
    ) -> Result<(), WatcherError> {
        match &request.state {
            AccessRequestState::Pending => {
                debug!(access_request = %request.name, "pending access request observed, ignoring");
                Ok(())
            }
            AccessRequestState::Approved | AccessRequestState::Denied => review_tx
                .send(request)
                .map_err(|_| WatcherError::ReviewChannelClosed),
            AccessRequestState::Other(state) => {
                warn!(access_request = %request.name, state = %state, "unrecognized access request state, ignoring");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::AccessPlaneError;
    use crate::model::NewAccessRequest;
    use futures::stream;
    use std::collections::HashMap;
    use tokio::sync::watch;

    struct FakeAccessPlane {
        events: Vec<Result<AccessRequestEvent, AccessPlaneError>>,
        /// When true, `watch` never terminates on its own — used to test
        /// that cancellation (not stream exhaustion) stops the loop.
        never_closes: bool,
    }

    #[async_trait::async_trait]
    impl AccessPlaneClient for FakeAccessPlane {
        async fn create_access_request(
            &self,
            _request: NewAccessRequest,
        ) -> Result<AccessRequest, AccessPlaneError> {
            unimplemented!("not exercised by watcher tests")
        }

        async fn list_access_requests(&self) -> Result<Vec<AccessRequest>, AccessPlaneError> {
            Ok(Vec::new())
        }

        async fn deny_access_request(&self, _name: &str, _reason: &str) -> Result<(), AccessPlaneError> {
            Ok(())
        }

        async fn watch(
            &self,
            _requester: Option<String>,
        ) -> Result<
            futures::stream::BoxStream<'static, Result<AccessRequestEvent, AccessPlaneError>>,
            AccessPlaneError,
        > {
            if self.never_closes {
                Ok(Box::pin(stream::pending()))
            } else {
                Ok(Box::pin(stream::iter(self.events.clone())))
            }
        }
    }

    fn approved_request(name: &str) -> AccessRequest {
        AccessRequest {
            name: name.to_owned(),
            requester: "approval-bridge".to_owned(),
            role: "reviewer".to_owned(),
            state: AccessRequestState::Approved,
            labels: HashMap::new(),
            reason: "test".to_owned(),
        }
    }

    #[tokio::test]
    async fn approved_resource_is_forwarded_to_review_channel() {
        let plane = Arc::new(FakeAccessPlane {
            events: vec![
                Ok(AccessRequestEvent::WatchStarted),
                Ok(AccessRequestEvent::Resource(approved_request("req-1"))),
            ],
            never_closes: false,
        });
        let watcher = Watcher::new(plane, None);
        let (review_tx, mut review_rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let err = watcher.run(review_tx, cancel_rx).await.unwrap_err();
        assert!(matches!(err, WatcherError::StreamClosed));

        let delivered = review_rx.try_recv().unwrap();
        assert_eq!(delivered.name, "req-1");
    }

    #[tokio::test]
    async fn pending_resource_is_not_forwarded() {
        let mut request = approved_request("req-1");
        request.state = AccessRequestState::Pending;
        let plane = Arc::new(FakeAccessPlane {
            events: vec![Ok(AccessRequestEvent::Resource(request))],
            never_closes: false,
        });
        let watcher = Watcher::new(plane, None);
        let (review_tx, mut review_rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let _ = watcher.run(review_tx, cancel_rx).await;
        assert!(review_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop_cleanly() {
        let plane = Arc::new(FakeAccessPlane {
            events: vec![],
            never_closes: true,
        });
        let watcher = Watcher::new(plane, None);
        let (review_tx, _review_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            let _ = cancel_tx.send(true);
        });

        let result = watcher.run(review_tx, cancel_rx).await;
        assert!(result.is_ok());
    }
}
