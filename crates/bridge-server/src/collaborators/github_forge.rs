//! GitHub App REST client implementing [`ForgeClient`]. One instance per
//! configured `(org, repo)`, each dialing with its own app/installation
//! credentials — the specific wire protocol is explicitly out of scope for
//! the core, so this stays a thin, compact adapter.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use bridge_core::error::ForgeError;
use bridge_core::{ForgeClient, PendingDeployment, ReviewState, WaitingWorkflowRun};

const GITHUB_API_BASE: &str = "https://api.github.com";
const JWT_LIFETIME: Duration = Duration::from_secs(9 * 60);
const USER_AGENT: &str = "approval-bridge";

#[derive(Serialize)]
struct AppJwtClaims {
    iat: u64,
    exp: u64,
    iss: String,
}

#[derive(Deserialize)]
struct InstallationToken {
    token: String,
}

struct CachedToken {
    token: String,
    expires_at: std::time::Instant,
}

/// GitHub App credentials for one installation, used to mint short-lived
/// installation tokens on demand.
pub struct GitHubForgeClient {
    http: reqwest::Client,
    app_id: String,
    installation_id: String,
    private_key: EncodingKey,
    cached_token: RwLock<Option<CachedToken>>,
}

impl GitHubForgeClient {
    pub fn new(app_id: String, installation_id: String, private_key_pem: &[u8]) -> Result<Arc<Self>, ForgeError> {
        let private_key = EncodingKey::from_rsa_pem(private_key_pem).map_err(|e| ForgeError::Request {
            reason: format!("invalid GitHub App private key: {e}"),
        })?;

        Ok(Arc::new(Self {
            http: reqwest::Client::new(),
            app_id,
            installation_id,
            private_key,
            cached_token: RwLock::new(None),
        }))
    }

    async fn installation_token(&self) -> Result<String, ForgeError> {
        if let Some(cached) = self.cached_token.read().await.as_ref() {
            if cached.expires_at > std::time::Instant::now() {
                return Ok(cached.token.clone());
            }
        }

        let app_jwt = self.app_jwt()?;
        let url = format!(
            "{GITHUB_API_BASE}/app/installations/{}/access_tokens",
            self.installation_id
        );

        let resp = self
            .http
            .post(url)
            .bearer_auth(app_jwt)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| ForgeError::Request {
                reason: format!("failed to mint installation token: {e}"),
            })?
            .error_for_status()
            .map_err(|e| ForgeError::Request {
                reason: format!("installation token request rejected: {e}"),
            })?;

        let parsed: InstallationToken = resp.json().await.map_err(|e| ForgeError::Request {
            reason: format!("malformed installation token response: {e}"),
        })?;

        *self.cached_token.write().await = Some(CachedToken {
            token: parsed.token.clone(),
            expires_at: std::time::Instant::now() + Duration::from_secs(55 * 60),
        });

        Ok(parsed.token)
    }

    fn app_jwt(&self) -> Result<String, ForgeError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ForgeError::Request {
                reason: format!("system clock error: {e}"),
            })?
            .as_secs();

        let claims = AppJwtClaims {
            iat: now - 60,
            exp: now + JWT_LIFETIME.as_secs(),
            iss: self.app_id.clone(),
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.private_key).map_err(|e| ForgeError::Request {
            reason: format!("failed to sign app JWT: {e}"),
        })
    }

    async fn authed(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, ForgeError> {
        let token = self.installation_token().await?;
        builder
            .bearer_auth(token)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| ForgeError::Request {
                reason: format!("GitHub API request failed: {e}"),
            })?
            .error_for_status()
            .map_err(|e| ForgeError::Request {
                reason: format!("GitHub API request rejected: {e}"),
            })
    }
}

#[async_trait::async_trait]
impl ForgeClient for GitHubForgeClient {
    async fn review_deployment(
        &self,
        org: &str,
        repo: &str,
        run_id: i64,
        state: ReviewState,
        environment: &str,
        comment: &str,
    ) -> Result<(), ForgeError> {
        let url = format!("{GITHUB_API_BASE}/repos/{org}/{repo}/actions/runs/{run_id}/deployment_protection_rule");
        let body = serde_json::json!({
            "environment_name": environment,
            "state": match state {
                ReviewState::Approved => "approved",
                ReviewState::Rejected => "rejected",
            },
            "comment": comment,
        });

        self.authed(self.http.post(url).json(&body)).await?;
        Ok(())
    }

    async fn list_waiting_workflow_runs(
        &self,
        org: &str,
        repo: &str,
    ) -> Result<Vec<WaitingWorkflowRun>, ForgeError> {
        #[derive(Deserialize)]
        struct Run {
            id: i64,
            name: Option<String>,
            html_url: String,
            actor: RunActor,
        }
        #[derive(Deserialize)]
        struct RunActor {
            login: String,
        }
        #[derive(Deserialize)]
        struct RunsPage {
            workflow_runs: Vec<Run>,
        }

        let url = format!("{GITHUB_API_BASE}/repos/{org}/{repo}/actions/runs?status=waiting");
        let resp = self.authed(self.http.get(url)).await?;
        let page: RunsPage = resp.json().await.map_err(|e| ForgeError::Request {
            reason: format!("malformed workflow runs response: {e}"),
        })?;

        Ok(page
            .workflow_runs
            .into_iter()
            .map(|run| WaitingWorkflowRun {
                workflow_run_id: run.id,
                workflow_name: run.name.unwrap_or_default(),
                run_url: run.html_url,
                requester: run.actor.login,
            })
            .collect())
    }

    async fn list_pending_deployments(
        &self,
        org: &str,
        repo: &str,
        run_id: i64,
    ) -> Result<Vec<PendingDeployment>, ForgeError> {
        #[derive(Deserialize)]
        struct PendingDeploymentEntry {
            environment: PendingEnvironment,
        }
        #[derive(Deserialize)]
        struct PendingEnvironment {
            name: String,
        }

        let url = format!("{GITHUB_API_BASE}/repos/{org}/{repo}/actions/runs/{run_id}/pending_deployments");
        let resp = self.authed(self.http.get(url)).await?;
        let entries: Vec<PendingDeploymentEntry> = resp.json().await.map_err(|e| ForgeError::Request {
            reason: format!("malformed pending deployments response: {e}"),
        })?;

        Ok(entries
            .into_iter()
            .map(|entry| PendingDeployment {
                environment: entry.environment.name,
            })
            .collect())
    }
}
