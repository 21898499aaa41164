//! Coordinator: the lease-and-rate-limit gate every externally-visible
//! action must pass through before acting, so that at most one replica
//! acts on a given workflow run or access request at a time.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{AbortHandle, Abortable};
use tokio::sync::watch;
use tracing::{info, warn};

use bridge_coordination::LeaseBackend;

use crate::error::CoordinatorError;
use crate::ratelimit::RateLimiter;

/// Cooperative cancellation signal threaded through every long-lived task.
pub type CancelToken = watch::Receiver<bool>;

/// Retry interval used while a renewal attempt has failed but the lease
/// has not yet been confirmed lost.
const RENEW_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Acquires and auto-renews named leases on a [`LeaseBackend`], layering a
/// per-workload token bucket on top so a pathological retry loop cannot
/// hammer the coordination surface.
pub struct Coordinator {
    backend: Arc<dyn LeaseBackend>,
    holder_identity: String,
    rate_limiter: RateLimiter,
}

impl Coordinator {
    #[must_use]
    pub fn new(backend: Arc<dyn LeaseBackend>, holder_identity: impl Into<String>) -> Self {
        Self {
            backend,
            holder_identity: holder_identity.into(),
            rate_limiter: RateLimiter::new(),
        }
    }

    /// `leaseWorkflow(ctx, org, repo, runID)`. On `AlreadyLeased` or
    /// `RateLimited` the caller is expected to treat the event as handled
    /// (by another replica, or damped) and return success.
    pub async fn lease_workflow(
        &self,
        cancel: CancelToken,
        org: &str,
        repo: &str,
        run_id: i64,
        duration: Duration,
    ) -> Result<LeaseGuard, CoordinatorError> {
        let rate_key = format!("{org}-{repo}-{run_id}");
        if !self.rate_limiter.try_admit(&rate_key, duration) {
            return Err(CoordinatorError::RateLimited);
        }

        let name = format!("workflow-{org}-{repo}-{run_id}");
        self.acquire(cancel, name, duration).await
    }

    /// `leaseAccessRequest(ctx, id)`.
    pub async fn lease_access_request(
        &self,
        cancel: CancelToken,
        access_request_name: &str,
        duration: Duration,
    ) -> Result<LeaseGuard, CoordinatorError> {
        let name = format!("request-{access_request_name}");
        self.acquire(cancel, name, duration).await
    }

    async fn acquire(
        &self,
        mut cancel: CancelToken,
        name: String,
        duration: Duration,
    ) -> Result<LeaseGuard, CoordinatorError> {
        let acquired = self
            .backend
            .try_acquire(&name, &self.holder_identity, duration)
            .await?;

        if !acquired {
            return Err(CoordinatorError::AlreadyLeased);
        }

        info!(lease = %name, holder = %self.holder_identity, "lease acquired");

        let (abort_handle, abort_registration) = AbortHandle::new_pair();
        let backend = Arc::clone(&self.backend);
        let holder = self.holder_identity.clone();
        let renew_name = name.clone();

        tokio::spawn(Abortable::new(
            async move {
                let mut ticker = tokio::time::interval(duration / 2);
                ticker.tick().await; // first tick fires immediately; renewal starts on the second
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match backend.renew(&renew_name, &holder, duration).await {
                                Ok(true) => {}
                                Ok(false) => {
                                    warn!(lease = %renew_name, "lost lease ownership during renewal");
                                    return;
                                }
                                Err(e) => {
                                    warn!(lease = %renew_name, error = %e, "lease renewal failed, retrying");
                                    tokio::time::sleep(RENEW_RETRY_INTERVAL).await;
                                }
                            }
                        }
                        _ = cancel.changed() => {
                            return;
                        }
                    }
                }
            },
            abort_registration,
        ));

        Ok(LeaseGuard {
            backend: Arc::clone(&self.backend),
            name,
            holder: self.holder_identity.clone(),
            abort_handle,
        })
    }
}

/// RAII handle to an acquired lease. Stops renewal and releases the lease
/// on drop, the way a scoped k8s lease lock does: the release itself runs
/// in a spawned task since `Drop` cannot be async.
pub struct LeaseGuard {
    backend: Arc<dyn LeaseBackend>,
    name: String,
    holder: String,
    abort_handle: AbortHandle,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.abort_handle.abort();
        let backend = Arc::clone(&self.backend);
        let name = self.name.clone();
        let holder = self.holder.clone();
        tokio::spawn(async move {
            if let Err(e) = backend.release(&name, &holder).await {
                warn!(lease = %name, error = %e, "failed to release lease");
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bridge_coordination::InMemoryLeaseBackend;

    fn cancel_token() -> (watch::Sender<bool>, CancelToken) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn lease_workflow_succeeds_when_free() {
        let coordinator = Coordinator::new(Arc::new(InMemoryLeaseBackend::new()), "replica-1");
        let (_tx, cancel) = cancel_token();
        let guard = coordinator
            .lease_workflow(cancel, "gravitational", "teleport", 123_456, Duration::from_secs(60))
            .await;
        assert!(guard.is_ok());
    }

    #[tokio::test]
    async fn second_replica_gets_already_leased() {
        let backend = Arc::new(InMemoryLeaseBackend::new());
        let coordinator_a = Coordinator::new(backend.clone(), "replica-a");
        let coordinator_b = Coordinator::new(backend, "replica-b");
        let (_tx, cancel) = cancel_token();

        let _guard = coordinator_a
            .lease_workflow(cancel.clone(), "gravitational", "teleport", 1, Duration::from_secs(60))
            .await
            .unwrap();

        let second = coordinator_b
            .lease_workflow(cancel, "gravitational", "teleport", 1, Duration::from_secs(60))
            .await;
        assert!(matches!(second, Err(CoordinatorError::AlreadyLeased)));
    }

    #[tokio::test]
    async fn repeated_workflow_lease_within_duration_is_rate_limited() {
        let coordinator = Coordinator::new(Arc::new(InMemoryLeaseBackend::new()), "replica-1");
        let (_tx, cancel) = cancel_token();

        let guard = coordinator
            .lease_workflow(cancel.clone(), "gravitational", "teleport", 1, Duration::from_secs(60))
            .await
            .unwrap();
        drop(guard);

        let second = coordinator
            .lease_workflow(cancel, "gravitational", "teleport", 1, Duration::from_secs(60))
            .await;
        assert!(matches!(second, Err(CoordinatorError::RateLimited)));
    }

    #[tokio::test]
    async fn dropping_guard_releases_the_lease() {
        let backend = Arc::new(InMemoryLeaseBackend::new());
        let coordinator = Coordinator::new(backend.clone(), "replica-1");
        let (_tx, cancel) = cancel_token();

        let guard = coordinator
            .lease_access_request(cancel, "req-1", Duration::from_secs(10))
            .await
            .unwrap();
        drop(guard);

        // Release happens in a spawned task; give it a turn to run.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(backend
            .try_acquire("request-req-1", "replica-2", Duration::from_secs(10))
            .await
            .unwrap());
    }
}
