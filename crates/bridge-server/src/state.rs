//! Shared application state for the webhook ingress.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use bridge_core::{DeploymentReviewEvent, TtlCache};

use crate::github::GitHubSourceSecrets;

/// One configured GitHub event source, keyed by `(org, repo)` for webhook
/// routing and signature verification.
pub struct GitHubSource {
    pub org: String,
    pub repo: String,
    pub secrets: GitHubSourceSecrets,
}

/// Build the `"{org}/{repo}"` key used to look up a configured source.
#[must_use]
pub fn source_key(org: &str, repo: &str) -> String {
    format!("{org}/{repo}")
}

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// Configured GitHub sources keyed by [`source_key`].
    pub github_sources: HashMap<String, GitHubSource>,
    /// Hand-off channel to the background event processor.
    pub review_tx: mpsc::UnboundedSender<DeploymentReviewEvent>,
    /// Rejects re-deliveries of the same forge delivery GUID within the
    /// configured window, ahead of the lease/rate-limit gate downstream.
    pub dedup: TtlCache,
}

impl AppState {
    #[must_use]
    pub fn new(
        github_sources: HashMap<String, GitHubSource>,
        review_tx: mpsc::UnboundedSender<DeploymentReviewEvent>,
        dedup: TtlCache,
    ) -> Arc<Self> {
        Arc::new(Self {
            github_sources,
            review_tx,
            dedup,
        })
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
