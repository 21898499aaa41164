//! Event Processor: the policy core. Routes forge events to a per-
//! `(org, repo)` handler that validates against configured allow-lists,
//! finds or creates an access request, and — on review — translates the
//! decision back into a forge callback.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::access_plane::AccessPlaneClient;
use crate::coordinator::{CancelToken, Coordinator};
use crate::error::{CoordinatorError, ProcessorError, ReconcilerError};
use crate::forge::{ForgeClient, ReviewState};
use crate::model::{
    AccessRequest, AccessRequestState, DeploymentReviewEvent, NewAccessRequest,
    WorkflowRunCorrelation,
};

/// Static, per-repo configuration the processor validates incoming events
/// against. Populated once during setup; the handler map built from it is
/// read-only thereafter (see the module-level invariant note below).
#[derive(Debug, Clone)]
pub struct RepoConfig {
    pub organization: String,
    pub repository: String,
    pub environments: Vec<String>,
    pub requester: String,
    pub role: String,
}

impl RepoConfig {
    fn validate(&self, event: &DeploymentReviewEvent) -> bool {
        self.organization == event.organization
            && self.repository == event.repository
            && self.environments.iter().any(|e| e == &event.environment)
    }
}

struct RepoHandler<F> {
    config: RepoConfig,
    forge: Arc<F>,
}

/// Routes forge events and access-request reviews through the lease gate
/// to a per-repo handler.
///
/// The `handlers` map is written only by [`EventProcessor::register_handler`]
/// during setup and is read-only for the lifetime of the process after
/// that.
pub struct EventProcessor<F, A> {
    handlers: HashMap<String, RepoHandler<F>>,
    access_plane: Arc<A>,
    coordinator: Arc<Coordinator>,
    workflow_lease_duration: Duration,
    access_request_lease_duration: Duration,
}

impl<F: ForgeClient, A: AccessPlaneClient> EventProcessor<F, A> {
    #[must_use]
    pub fn new(
        access_plane: Arc<A>,
        coordinator: Arc<Coordinator>,
        workflow_lease_duration: Duration,
        access_request_lease_duration: Duration,
    ) -> Self {
        Self {
            handlers: HashMap::new(),
            access_plane,
            coordinator,
            workflow_lease_duration,
            access_request_lease_duration,
        }
    }

    /// Register a per-repo handler. Must only be called during setup,
    /// before any of the run loops start reading the map.
    pub fn register_handler(&mut self, config: RepoConfig, forge: Arc<F>) {
        let key = handler_key(&config.organization, &config.repository);
        self.handlers.insert(key, RepoHandler { config, forge });
    }

    fn handler_for(&self, org: &str, repo: &str) -> Result<&RepoHandler<F>, ProcessorError> {
        let key = handler_key(org, repo);
        self.handlers
            .get(&key)
            .ok_or(ProcessorError::UnknownRepo { key })
    }

    /// Ingress path: `processDeploymentReview`.
    pub async fn process_deployment_review(
        &self,
        event: DeploymentReviewEvent,
        cancel: CancelToken,
    ) -> Result<(), ProcessorError> {
        let guard = match self
            .coordinator
            .lease_workflow(
                cancel.clone(),
                &event.organization,
                &event.repository,
                event.workflow_run_id,
                self.workflow_lease_duration,
            )
            .await
        {
            Ok(guard) => guard,
            Err(CoordinatorError::AlreadyLeased | CoordinatorError::RateLimited) => {
                debug!(
                    org = %event.organization,
                    repo = %event.repository,
                    run_id = event.workflow_run_id,
                    delivery_id = %event.delivery_id,
                    "workflow lease not acquired, another replica has it or a retry storm is being damped"
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let handler = self.handler_for(&event.organization, &event.repository)?;

        if let Some(existing) = self.find_existing_access_request(&event).await? {
            if existing.state != AccessRequestState::Pending {
                info!(
                    access_request = %existing.name,
                    "deployment review re-delivered for an already-created request, re-running review path"
                );
                drop(guard);
                return self.handle_review(existing, cancel).await;
            }
            debug!(access_request = %existing.name, "access request already pending, nothing to do");
            return Ok(());
        }

        let correlation = WorkflowRunCorrelation {
            organization: event.organization.clone(),
            repository: event.repository.clone(),
            environment: event.environment.clone(),
            workflow_run_id: event.workflow_run_id,
        };

        if !handler.config.validate(&event) {
            warn!(
                org = %event.organization,
                repo = %event.repository,
                environment = %event.environment,
                delivery_id = %event.delivery_id,
                "deployment review failed allow-list validation, creating an immediately-denied access request"
            );

            let reason = format!(
                "Deployment review for {}/{} targets environment \"{}\", which is outside the configured allow-list.",
                event.organization, event.repository, event.environment,
            );
            let new_request = NewAccessRequest {
                name: Uuid::new_v4().to_string(),
                requester: handler.config.requester.clone(),
                role: handler.config.role.clone(),
                reason,
                labels: correlation.into_labels(),
            };

            let created = self.access_plane.create_access_request(new_request).await?;
            self.access_plane
                .deny_access_request(&created.name, "environment not in configured allow-list")
                .await?;
            info!(
                access_request = %created.name,
                org = %event.organization,
                repo = %event.repository,
                environment = %event.environment,
                "access request created and immediately denied, outside allow-list"
            );
            return Ok(());
        }

        let reason = format!(
            "Deployment review requested for {}/{} — workflow \"{}\" (run {}) is awaiting approval for environment \"{}\", requested by {}. Run: {}",
            event.organization,
            event.repository,
            event.workflow_name,
            event.workflow_run_id,
            event.environment,
            event.requester,
            event.run_url,
        );

        let new_request = NewAccessRequest {
            name: Uuid::new_v4().to_string(),
            requester: handler.config.requester.clone(),
            role: handler.config.role.clone(),
            reason,
            labels: correlation.into_labels(),
        };

        let created = self.access_plane.create_access_request(new_request).await?;
        info!(
            access_request = %created.name,
            org = %event.organization,
            repo = %event.repository,
            run_id = event.workflow_run_id,
            delivery_id = %event.delivery_id,
            "access request created"
        );

        Ok(())
    }

    async fn find_existing_access_request(
        &self,
        event: &DeploymentReviewEvent,
    ) -> Result<Option<AccessRequest>, ProcessorError> {
        let requests = self.access_plane.list_access_requests().await?;
        Ok(requests.into_iter().find(|request| {
            WorkflowRunCorrelation::try_from(&request.labels)
                .map(|c| {
                    c.organization == event.organization
                        && c.repository == event.repository
                        && c.environment == event.environment
                        && c.workflow_run_id == event.workflow_run_id
                })
                .unwrap_or(false)
        }))
    }

    /// Review path: `handleReview`.
    pub async fn handle_review(
        &self,
        request: AccessRequest,
        cancel: CancelToken,
    ) -> Result<(), ProcessorError> {
        let guard = match self
            .coordinator
            .lease_access_request(cancel, &request.name, self.access_request_lease_duration)
            .await
        {
            Ok(guard) => guard,
            Err(CoordinatorError::AlreadyLeased | CoordinatorError::RateLimited) => {
                debug!(access_request = %request.name, "access-request lease not acquired, skipping review");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let correlation = WorkflowRunCorrelation::try_from(&request.labels).map_err(|_| {
            ProcessorError::MissingCorrelationLabels {
                access_request: request.name.clone(),
            }
        })?;

        let handler = self.handler_for(&correlation.organization, &correlation.repository)?;

        let state = match request.state {
            AccessRequestState::Approved => ReviewState::Approved,
            AccessRequestState::Denied => ReviewState::Rejected,
            _ => {
                return Err(ProcessorError::UnreviewableState {
                    access_request: request.name.clone(),
                })
            }
        };

        let comment = format!("resolved via access request {}", request.name);
        handler
            .forge
            .review_deployment(
                &correlation.organization,
                &correlation.repository,
                correlation.workflow_run_id,
                state,
                &correlation.environment,
                &comment,
            )
            .await?;

        info!(access_request = %request.name, "forge review callback delivered");
        drop(guard);
        Ok(())
    }

    /// One reconciler pass: list waiting workflow runs per configured repo
    /// plus open access requests, converge mismatches. See [`crate::reconciler::Reconciler`].
    pub async fn reconcile_once(&self, cancel: CancelToken) -> Result<(), ReconcilerError> {
        let open_requests = self.access_plane.list_access_requests().await.map_err(ProcessorError::from)?;

        let mut by_run_id: HashMap<i64, AccessRequest> = HashMap::new();
        for request in open_requests {
            if let Ok(correlation) = WorkflowRunCorrelation::try_from(&request.labels) {
                by_run_id.insert(correlation.workflow_run_id, request);
            }
        }

        for handler in self.handlers.values() {
            let waiting = handler
                .forge
                .list_waiting_workflow_runs(&handler.config.organization, &handler.config.repository)
                .await
                .map_err(ProcessorError::from)?;

            for run in waiting {
                if let Some(existing) = by_run_id.get(&run.workflow_run_id) {
                    if existing.state != AccessRequestState::Pending {
                        self.handle_review(existing.clone(), cancel.clone()).await?;
                    }
                    continue;
                }

                let pending = handler
                    .forge
                    .list_pending_deployments(
                        &handler.config.organization,
                        &handler.config.repository,
                        run.workflow_run_id,
                    )
                    .await
                    .map_err(ProcessorError::from)?;

                for deployment in pending {
                    let event = DeploymentReviewEvent {
                        requester: run.requester.clone(),
                        environment: deployment.environment.clone(),
                        organization: handler.config.organization.clone(),
                        repository: handler.config.repository.clone(),
                        workflow_run_id: run.workflow_run_id,
                        workflow_name: run.workflow_name.clone(),
                        run_url: run.run_url.clone(),
                        delivery_id: format!(
                            "reconciler-{}-{}-{}",
                            run.workflow_run_id, deployment.environment, handler.config.repository
                        ),
                    };
                    self.process_deployment_review(event, cancel.clone()).await?;
                }
            }
        }

        Ok(())
    }
}

fn handler_key(org: &str, repo: &str) -> String {
    format!("{org}/{repo}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::AccessPlaneError;
    use crate::forge::{PendingDeployment, WaitingWorkflowRun};
    use bridge_coordination::InMemoryLeaseBackend;
    use std::sync::Mutex;
    use tokio::sync::watch;

    #[derive(Default)]
    struct FakeAccessPlane {
        requests: Mutex<Vec<AccessRequest>>,
        denied: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl AccessPlaneClient for FakeAccessPlane {
        async fn create_access_request(
            &self,
            request: NewAccessRequest,
        ) -> Result<AccessRequest, AccessPlaneError> {
            let created = AccessRequest {
                name: request.name,
                requester: request.requester,
                role: request.role,
                state: AccessRequestState::Pending,
                labels: request.labels,
                reason: request.reason,
            };
            self.requests.lock().unwrap().push(created.clone());
            Ok(created)
        }

        async fn list_access_requests(&self) -> Result<Vec<AccessRequest>, AccessPlaneError> {
            Ok(self.requests.lock().unwrap().clone())
        }

        async fn deny_access_request(&self, name: &str, _reason: &str) -> Result<(), AccessPlaneError> {
            self.denied.lock().unwrap().push(name.to_owned());
            Ok(())
        }

        async fn watch(
            &self,
            _requester: Option<String>,
        ) -> Result<
            futures::stream::BoxStream<'static, Result<crate::access_plane::AccessRequestEvent, AccessPlaneError>>,
            AccessPlaneError,
        > {
            unimplemented!("not exercised by processor tests")
        }
    }

    #[derive(Default)]
    struct FakeForge {
        reviews: Mutex<Vec<(i64, ReviewState, String)>>,
        waiting: Mutex<Vec<WaitingWorkflowRun>>,
        pending: Mutex<HashMap<i64, Vec<PendingDeployment>>>,
    }

    #[async_trait::async_trait]
    impl ForgeClient for FakeForge {
        async fn review_deployment(
            &self,
            _org: &str,
            _repo: &str,
            run_id: i64,
            state: ReviewState,
            environment: &str,
            _comment: &str,
        ) -> Result<(), crate::error::ForgeError> {
            self.reviews
                .lock()
                .unwrap()
                .push((run_id, state, environment.to_owned()));
            Ok(())
        }

        async fn list_waiting_workflow_runs(
            &self,
            _org: &str,
            _repo: &str,
        ) -> Result<Vec<WaitingWorkflowRun>, crate::error::ForgeError> {
            Ok(self.waiting.lock().unwrap().clone())
        }

        async fn list_pending_deployments(
            &self,
            _org: &str,
            _repo: &str,
            run_id: i64,
        ) -> Result<Vec<PendingDeployment>, crate::error::ForgeError> {
            Ok(self.pending.lock().unwrap().get(&run_id).cloned().unwrap_or_default())
        }
    }

    fn cancel() -> CancelToken {
        watch::channel(false).1
    }

    fn teleport_config() -> RepoConfig {
        RepoConfig {
            organization: "gravitational".to_owned(),
            repository: "teleport".to_owned(),
            environments: vec!["build/prod".to_owned()],
            requester: "approval-bridge".to_owned(),
            role: "reviewer".to_owned(),
        }
    }

    fn happy_path_event() -> DeploymentReviewEvent {
        DeploymentReviewEvent {
            requester: "alice".to_owned(),
            environment: "build/prod".to_owned(),
            organization: "gravitational".to_owned(),
            repository: "teleport".to_owned(),
            workflow_run_id: 123_456,
            workflow_name: "release".to_owned(),
            run_url: "https://example.invalid/runs/123456".to_owned(),
            delivery_id: "delivery-1".to_owned(),
        }
    }

    fn build_processor() -> (EventProcessor<FakeForge, FakeAccessPlane>, Arc<FakeAccessPlane>, Arc<FakeForge>) {
        let access_plane = Arc::new(FakeAccessPlane::default());
        let forge = Arc::new(FakeForge::default());
        let coordinator = Arc::new(Coordinator::new(
            Arc::new(InMemoryLeaseBackend::new()),
            "replica-1",
        ));
        let mut processor = EventProcessor::new(
            access_plane.clone(),
            coordinator,
            Duration::from_secs(60),
            Duration::from_secs(10),
        );
        processor.register_handler(teleport_config(), forge.clone());
        (processor, access_plane, forge)
    }

    #[tokio::test]
    async fn happy_path_creates_exactly_one_access_request() {
        let (processor, access_plane, _forge) = build_processor();
        processor
            .process_deployment_review(happy_path_event(), cancel())
            .await
            .unwrap();

        let requests = access_plane.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].labels.get("workflow_run_id").unwrap(), "123456");
    }

    #[tokio::test]
    async fn redelivery_of_the_same_event_does_not_duplicate_the_request() {
        let (processor, access_plane, _forge) = build_processor();
        processor
            .process_deployment_review(happy_path_event(), cancel())
            .await
            .unwrap();
        processor
            .process_deployment_review(happy_path_event(), cancel())
            .await
            .unwrap();

        assert_eq!(access_plane.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn event_outside_allow_list_is_created_and_immediately_denied() {
        let (processor, access_plane, _forge) = build_processor();
        let mut event = happy_path_event();
        event.environment = "build/dev".to_owned();

        processor.process_deployment_review(event, cancel()).await.unwrap();

        let requests = access_plane.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let denied = access_plane.denied.lock().unwrap();
        assert_eq!(denied.as_slice(), [requests[0].name.clone()]);
    }

    #[tokio::test]
    async fn approved_review_calls_the_forge_with_approved_state() {
        let (processor, access_plane, forge) = build_processor();
        processor
            .process_deployment_review(happy_path_event(), cancel())
            .await
            .unwrap();

        let mut request = access_plane.requests.lock().unwrap()[0].clone();
        request.state = AccessRequestState::Approved;

        processor.handle_review(request, cancel()).await.unwrap();

        let reviews = forge.reviews.lock().unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].0, 123_456);
        assert_eq!(reviews[0].1, ReviewState::Approved);
        assert_eq!(reviews[0].2, "build/prod");
    }

    #[tokio::test]
    async fn review_missing_correlation_labels_is_an_error() {
        let (processor, _access_plane, _forge) = build_processor();
        let request = AccessRequest {
            name: "req-orphan".to_owned(),
            requester: "approval-bridge".to_owned(),
            role: "reviewer".to_owned(),
            state: AccessRequestState::Approved,
            labels: HashMap::new(),
            reason: String::new(),
        };

        let err = processor.handle_review(request, cancel()).await.unwrap_err();
        assert!(matches!(err, ProcessorError::MissingCorrelationLabels { .. }));
    }

    #[tokio::test]
    async fn reconciler_repairs_a_waiting_run_with_no_access_request() {
        let (processor, access_plane, forge) = build_processor();
        forge.waiting.lock().unwrap().push(WaitingWorkflowRun {
            workflow_run_id: 777,
            workflow_name: "release".to_owned(),
            run_url: "https://example.invalid/runs/777".to_owned(),
            requester: "bob".to_owned(),
        });
        forge.pending.lock().unwrap().insert(
            777,
            vec![PendingDeployment {
                environment: "build/prod".to_owned(),
            }],
        );

        processor.reconcile_once(cancel()).await.unwrap();

        let requests = access_plane.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].labels.get("workflow_run_id").unwrap(), "777");
    }
}
