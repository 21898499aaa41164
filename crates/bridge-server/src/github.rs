//! Typed shape for the one GitHub webhook event this bridge understands —
//! `deployment_review`. Everything else arrives as an opaque event type and
//! is logged, not parsed.

use serde::Deserialize;

use bridge_core::DeploymentReviewEvent;

/// Per-source secrets needed to verify and act on deliveries for one
/// configured `(org, repo)`.
#[derive(Clone)]
pub struct GitHubSourceSecrets {
    pub webhook_secret: String,
    pub app_id: String,
    pub installation_id: String,
    pub private_key_path: std::path::PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubOrganization {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRepo {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubSender {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubWorkflowRun {
    pub workflow_id: i64,
    pub workflow_name: Option<String>,
    pub html_url: Option<String>,
}

/// Minimal shape shared by every GitHub webhook payload, used only to
/// route a delivery to its configured source before the full event type is
/// known or the signature verified.
#[derive(Debug, Clone, Deserialize)]
pub struct MinimalWebhookPayload {
    pub organization: GitHubOrganization,
    pub repo: GitHubRepo,
}

/// `deployment_review` webhook payload.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentReviewPayload {
    pub organization: GitHubOrganization,
    pub repo: GitHubRepo,
    pub environment: String,
    pub sender: GitHubSender,
    pub workflow_run: GitHubWorkflowRun,
}

impl DeploymentReviewPayload {
    /// Translate into the core's forge-agnostic event, stamping in the
    /// delivery GUID the caller read off the `X-GitHub-Delivery` header.
    #[must_use]
    pub fn into_review_event(self, delivery_id: String) -> DeploymentReviewEvent {
        DeploymentReviewEvent {
            requester: self.sender.login,
            environment: self.environment,
            organization: self.organization.login,
            repository: self.repo.name,
            workflow_run_id: self.workflow_run.workflow_id,
            workflow_name: self.workflow_run.workflow_name.unwrap_or_default(),
            run_url: self.workflow_run.html_url.unwrap_or_default(),
            delivery_id,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
{
  "organization": { "login": "gravitational" },
  "repo": { "name": "teleport" },
  "environment": "build/prod",
  "sender": { "login": "alice" },
  "workflow_run": { "workflow_id": 123456, "workflow_name": "release", "html_url": "https://example.invalid/runs/123456" }
}
"#;

    #[test]
    fn parses_a_deployment_review_payload() {
        let event: DeploymentReviewPayload = serde_json::from_str(SAMPLE).unwrap();
        let review = event.into_review_event("delivery-1".to_owned());
        assert_eq!(review.organization, "gravitational");
        assert_eq!(review.repository, "teleport");
        assert_eq!(review.workflow_run_id, 123_456);
        assert_eq!(review.requester, "alice");
    }
}
