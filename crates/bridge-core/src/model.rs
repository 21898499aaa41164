//! Data model: the deployment-review event, the access request, and the
//! workflow-run correlation reconstructed from its labels.

use std::collections::HashMap;

use crate::error::CorrelationError;

/// Label keys the core uses as the sole correlation key between a forge
/// workflow run and an access-plane access request. Only these labels are
/// read back; anything else on the access request is opaque to the core.
pub const ORGANIZATION_LABEL: &str = "organization";
pub const REPOSITORY_LABEL: &str = "repository";
pub const ENVIRONMENT_LABEL: &str = "environment";
pub const WORKFLOW_RUN_ID_LABEL: &str = "workflow_run_id";

/// A forge webhook indicating a workflow run is paused awaiting approval
/// for a specific environment. Produced by the webhook ingress; consumed
/// by the event processor; never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentReviewEvent {
    pub requester: String,
    pub environment: String,
    pub organization: String,
    pub repository: String,
    pub workflow_run_id: i64,
    pub workflow_name: String,
    pub run_url: String,
    /// Forge delivery GUID, echoed into every log line touching this event.
    pub delivery_id: String,
}

/// State of an access request as observed from the access plane. Any
/// state other than the three named here is preserved verbatim and
/// ignored by the watcher (logged at warn), never treated as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessRequestState {
    Pending,
    Approved,
    Denied,
    Other(String),
}

impl From<&str> for AccessRequestState {
    fn from(value: &str) -> Self {
        match value {
            "pending" => Self::Pending,
            "approved" => Self::Approved,
            "denied" => Self::Denied,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl std::fmt::Display for AccessRequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Denied => write!(f, "denied"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

/// A reviewable record on the access plane. The core never deletes one and
/// mutates only the fields it owns at creation time — `state` is mutated
/// exclusively by external reviewers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    pub name: String,
    pub requester: String,
    pub role: String,
    pub state: AccessRequestState,
    pub labels: HashMap<String, String>,
    pub reason: String,
}

/// Parameters for creating a new access request. Separate from
/// [`AccessRequest`] because the core never constructs one with a `state`
/// — the access plane assigns `pending` on creation.
#[derive(Debug, Clone)]
pub struct NewAccessRequest {
    pub name: String,
    pub requester: String,
    pub role: String,
    pub reason: String,
    pub labels: HashMap<String, String>,
}

/// `(org, repo, environment, workflow-run-id)` reconstructed from an
/// access request's labels. Absence of any required label on a request
/// whose state has transitioned is a terminal error for that review — the
/// core cannot know what to do on the forge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRunCorrelation {
    pub organization: String,
    pub repository: String,
    pub environment: String,
    pub workflow_run_id: i64,
}

impl TryFrom<&HashMap<String, String>> for WorkflowRunCorrelation {
    type Error = CorrelationError;

    fn try_from(labels: &HashMap<String, String>) -> Result<Self, Self::Error> {
        let label = |key: &str| -> Result<String, CorrelationError> {
            labels
                .get(key)
                .cloned()
                .ok_or_else(|| CorrelationError::MissingLabel {
                    label: key.to_owned(),
                })
        };

        let organization = label(ORGANIZATION_LABEL)?;
        let repository = label(REPOSITORY_LABEL)?;
        let environment = label(ENVIRONMENT_LABEL)?;
        let workflow_run_id_raw = label(WORKFLOW_RUN_ID_LABEL)?;
        let workflow_run_id =
            workflow_run_id_raw
                .parse::<i64>()
                .map_err(|_| CorrelationError::InvalidWorkflowRunId {
                    value: workflow_run_id_raw,
                })?;

        Ok(Self {
            organization,
            repository,
            environment,
            workflow_run_id,
        })
    }
}

impl WorkflowRunCorrelation {
    /// Build the label map the core stashes on a newly created access
    /// request so a later `TryFrom` round-trips it exactly.
    #[must_use]
    pub fn into_labels(self) -> HashMap<String, String> {
        let mut labels = HashMap::with_capacity(4);
        labels.insert(ORGANIZATION_LABEL.to_owned(), self.organization);
        labels.insert(REPOSITORY_LABEL.to_owned(), self.repository);
        labels.insert(ENVIRONMENT_LABEL.to_owned(), self.environment);
        labels.insert(WORKFLOW_RUN_ID_LABEL.to_owned(), self.workflow_run_id.to_string());
        labels
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn correlation_round_trips_through_labels() {
        let correlation = WorkflowRunCorrelation {
            organization: "gravitational".to_owned(),
            repository: "teleport".to_owned(),
            environment: "build/prod".to_owned(),
            workflow_run_id: 123_456,
        };
        let labels = correlation.clone().into_labels();
        let parsed = WorkflowRunCorrelation::try_from(&labels).unwrap();
        assert_eq!(parsed, correlation);
    }

    #[test]
    fn correlation_missing_label_is_an_error() {
        let mut labels = HashMap::new();
        labels.insert(ORGANIZATION_LABEL.to_owned(), "gravitational".to_owned());
        let err = WorkflowRunCorrelation::try_from(&labels).unwrap_err();
        assert!(matches!(err, CorrelationError::MissingLabel { label } if label == REPOSITORY_LABEL));
    }

    #[test]
    fn correlation_invalid_run_id_is_an_error() {
        let mut labels = HashMap::new();
        labels.insert(ORGANIZATION_LABEL.to_owned(), "gravitational".to_owned());
        labels.insert(REPOSITORY_LABEL.to_owned(), "teleport".to_owned());
        labels.insert(ENVIRONMENT_LABEL.to_owned(), "build/prod".to_owned());
        labels.insert(WORKFLOW_RUN_ID_LABEL.to_owned(), "not-a-number".to_owned());
        let err = WorkflowRunCorrelation::try_from(&labels).unwrap_err();
        assert!(matches!(err, CorrelationError::InvalidWorkflowRunId { .. }));
    }

    #[test]
    fn unknown_state_is_preserved() {
        let state = AccessRequestState::from("expired");
        assert_eq!(state, AccessRequestState::Other("expired".to_owned()));
    }
}
