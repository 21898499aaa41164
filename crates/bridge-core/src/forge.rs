//! Forge collaborator contract. One forge family (GitHub) is wired up
//! today, but the boundary is drawn so a second could implement the same
//! trait without touching the processor or reconciler.

/// Outcome of a human review, translated into the forge's own vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewState {
    Approved,
    Rejected,
}

/// A workflow run the forge reports as waiting on a deployment review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitingWorkflowRun {
    pub workflow_run_id: i64,
    pub workflow_name: String,
    pub run_url: String,
    pub requester: String,
}

/// A pending deployment (one per environment) on a waiting workflow run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDeployment {
    pub environment: String,
}

/// Per-repo forge client. One instance per configured `(org, repo)`, each
/// carrying its own app/installation credentials.
#[async_trait::async_trait]
pub trait ForgeClient: Send + Sync + 'static {
    /// Review a paused deployment. `comment` should reference the
    /// access-request name for auditability.
    async fn review_deployment(
        &self,
        org: &str,
        repo: &str,
        run_id: i64,
        state: ReviewState,
        environment: &str,
        comment: &str,
    ) -> Result<(), crate::error::ForgeError>;

    /// List workflow runs currently waiting on a deployment review.
    async fn list_waiting_workflow_runs(
        &self,
        org: &str,
        repo: &str,
    ) -> Result<Vec<WaitingWorkflowRun>, crate::error::ForgeError>;

    /// List the pending-deployment environments for one waiting run.
    async fn list_pending_deployments(
        &self,
        org: &str,
        repo: &str,
        run_id: i64,
    ) -> Result<Vec<PendingDeployment>, crate::error::ForgeError>;
}
