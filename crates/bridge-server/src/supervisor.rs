//! Supervisor: boots every subsystem in dependency order and wires
//! cooperative cancellation through all of them, mirroring
//! `zvault-server::main`'s shutdown-signal/background-worker pattern.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use bridge_core::{
    Coordinator, DeploymentReviewEvent, EventProcessor, RepoConfig, TtlCache, Watcher,
};
use bridge_coordination::LeaseBackend;
#[cfg(feature = "kube-backend")]
use bridge_coordination::KubeLeaseBackend;
use bridge_coordination::InMemoryLeaseBackend;

use crate::collaborators::{GitHubForgeClient, TeleportAccessPlaneClient};
use crate::config::{
    Config, DEFAULT_ACCESS_REQUEST_LEASE_DURATION, DEFAULT_DEDUP_TTL, DEFAULT_RECONCILER_CADENCE,
    DEFAULT_SHUTDOWN_DEADLINE, DEFAULT_WORKFLOW_LEASE_DURATION,
};
use crate::github::GitHubSourceSecrets;
use crate::state::{source_key, AppState, GitHubSource};

type Processor = EventProcessor<GitHubForgeClient, TeleportAccessPlaneClient>;

/// Standalone health endpoint the process always answers on while alive,
/// independent of whether the webhook ingress is healthy.
const HEALTH_ADDR: &str = "0.0.0.0:8000";

/// Construct every subsystem from `config` and run until `ctrl_c`/`SIGTERM`,
/// then unwind in reverse dependency order within [`DEFAULT_SHUTDOWN_DEADLINE`].
pub async fn run(config: Config) -> anyhow::Result<()> {
    let lease_backend = build_lease_backend().await?;
    let holder_identity = std::env::var("HOLDER_IDENTITY")
        .unwrap_or_else(|_| format!("approval-bridge-{}", std::process::id()));
    let coordinator = Arc::new(Coordinator::new(lease_backend, holder_identity));

    let access_plane = Arc::new(build_access_plane(&config)?);

    let mut processor = EventProcessor::new(
        Arc::clone(&access_plane),
        Arc::clone(&coordinator),
        DEFAULT_WORKFLOW_LEASE_DURATION,
        DEFAULT_ACCESS_REQUEST_LEASE_DURATION,
    );

    let mut github_sources = HashMap::new();
    for source in &config.event_sources.github {
        let private_key_pem = std::fs::read(&source.private_key_path).with_context(|| {
            format!(
                "failed to read GitHub App private key at {}",
                source.private_key_path.display()
            )
        })?;
        let forge = GitHubForgeClient::new(
            source.app_id.clone(),
            source.installation_id.clone(),
            &private_key_pem,
        )
        .context("failed to construct GitHub forge client")?;

        processor.register_handler(
            RepoConfig {
                organization: source.org.clone(),
                repository: source.repo.clone(),
                environments: source.environments.clone(),
                requester: config.approval_service.teleport.user.clone(),
                role: config.approval_service.teleport.role_to_request.clone(),
            },
            forge,
        );

        github_sources.insert(
            source_key(&source.org, &source.repo),
            GitHubSource {
                org: source.org.clone(),
                repo: source.repo.clone(),
                secrets: GitHubSourceSecrets {
                    webhook_secret: source.secret.clone(),
                    app_id: source.app_id.clone(),
                    installation_id: source.installation_id.clone(),
                    private_key_path: source.private_key_path.clone(),
                },
            },
        );
    }

    let processor = Arc::new(processor);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (review_tx, review_rx) = mpsc::unbounded_channel();

    let app_state = AppState::new(github_sources, review_tx, TtlCache::new(DEFAULT_DEDUP_TTL));

    let webhook_addr = resolve_webhook_addr(&config);
    let webhook_listener = TcpListener::bind(&webhook_addr)
        .await
        .with_context(|| format!("failed to bind webhook listener on {webhook_addr}"))?;
    info!(addr = %webhook_addr, "webhook ingress listening");

    let health_listener = TcpListener::bind(HEALTH_ADDR)
        .await
        .with_context(|| format!("failed to bind health listener on {HEALTH_ADDR}"))?;
    info!(addr = HEALTH_ADDR, "health endpoint listening");

    let webhook_router = crate::webhook::router(app_state);
    let webhook_shutdown = shutdown_rx.clone();
    let mut webhook_handle = tokio::spawn(async move {
        axum::serve(webhook_listener, webhook_router)
            .with_graceful_shutdown(wait_for_shutdown(webhook_shutdown))
            .await
            .context("webhook server failed")
    });

    let health_router = Router::new().route("/", get(|| async { axum::http::StatusCode::OK }));
    let health_shutdown = shutdown_rx.clone();
    let mut health_handle = tokio::spawn(async move {
        axum::serve(health_listener, health_router)
            .with_graceful_shutdown(wait_for_shutdown(health_shutdown))
            .await
            .context("health server failed")
    });

    let mut review_worker_handle = {
        let processor = Arc::clone(&processor);
        let mut cancel = shutdown_rx.clone();
        let mut review_rx = review_rx;
        tokio::spawn(async move { review_worker(processor, &mut review_rx, &mut cancel).await })
    };

    let mut watcher_handle = {
        let watcher = Watcher::new(
            Arc::clone(&access_plane),
            Some(config.approval_service.teleport.user.clone()),
        );
        let processor = Arc::clone(&processor);
        let cancel = shutdown_rx.clone();
        tokio::spawn(async move { watcher_loop(watcher, processor, cancel).await })
    };

    let mut reconciler_handle = {
        let reconciler = bridge_core::Reconciler::new(Arc::clone(&processor), DEFAULT_RECONCILER_CADENCE);
        let cancel = shutdown_rx.clone();
        tokio::spawn(async move {
            reconciler.run(cancel).await;
            Ok::<(), anyhow::Error>(())
        })
    };

    // Race the shutdown signal against every spawned task: if one of them
    // ends before the signal does, that's a fatal condition (a dead
    // watcher or a crashed server left running forever is worse than
    // exiting), so it cancels the rest of the group and becomes the
    // process's exit reason.
    let early_exit = tokio::select! {
        () = shutdown_signal() => None,
        res = &mut webhook_handle => Some(("webhook server", task_failure(res))),
        res = &mut health_handle => Some(("health server", task_failure(res))),
        res = &mut review_worker_handle => Some(("review worker", task_failure(res))),
        res = &mut watcher_handle => Some(("access-plane watcher", task_failure(res))),
        res = &mut reconciler_handle => Some(("reconciler", task_failure(res))),
    };
    let early_exit_task = early_exit.as_ref().map(|(task, _)| *task);

    match &early_exit {
        Some((task, err)) => warn!(task = %task, error = %err, "task ended before shutdown was requested, stopping the rest of the group"),
        None => info!("shutdown signal received, stopping approval bridge"),
    }
    let _ = shutdown_tx.send(true);

    if early_exit_task != Some("webhook server") {
        let _ = tokio::time::timeout(DEFAULT_SHUTDOWN_DEADLINE, webhook_handle).await;
    }
    if early_exit_task != Some("health server") {
        let _ = tokio::time::timeout(DEFAULT_SHUTDOWN_DEADLINE, health_handle).await;
    }
    if early_exit_task != Some("review worker") {
        let _ = tokio::time::timeout(DEFAULT_SHUTDOWN_DEADLINE, review_worker_handle).await;
    }
    if early_exit_task != Some("access-plane watcher") {
        let _ = tokio::time::timeout(DEFAULT_SHUTDOWN_DEADLINE, watcher_handle).await;
    }
    if early_exit_task != Some("reconciler") {
        let _ = tokio::time::timeout(DEFAULT_SHUTDOWN_DEADLINE, reconciler_handle).await;
    }

    info!("approval bridge stopped");

    match early_exit {
        Some((task, err)) => Err(err.context(format!("{task} task ended before shutdown was requested"))),
        None => Ok(()),
    }
}

/// Collapses a spawned task's outcome to the single error that should
/// cancel the rest of the group, whether it came back as a propagated
/// `anyhow::Error`, a clean-but-premature return, or a panic.
fn task_failure(result: Result<anyhow::Result<()>, tokio::task::JoinError>) -> anyhow::Error {
    match result {
        Ok(Ok(())) => anyhow::anyhow!("task returned before shutdown was requested"),
        Ok(Err(e)) => e,
        Err(join_err) => anyhow::Error::new(join_err).context("task panicked"),
    }
}

/// Multiple GitHub sources may each declare their own `webhook_addr`; one
/// process binds one listener, so the first entry wins and a mismatch is
/// logged rather than treated as fatal.
fn resolve_webhook_addr(config: &Config) -> String {
    let mut addrs = config.event_sources.github.iter().map(|s| s.webhook_addr.as_str());
    let first = addrs.next().unwrap_or("0.0.0.0:8443");
    if addrs.any(|addr| addr != first) {
        warn!("configured GitHub sources declare differing webhook_addr values, binding to the first");
    }
    first.to_owned()
}

async fn build_lease_backend() -> anyhow::Result<Arc<dyn LeaseBackend>> {
    #[cfg(feature = "kube-backend")]
    {
        if let Ok(namespace) = std::env::var("POD_NAMESPACE") {
            let backend = KubeLeaseBackend::new(&namespace)
                .await
                .context("failed to construct Kubernetes lease backend")?;
            return Ok(Arc::new(backend));
        }
        warn!("POD_NAMESPACE not set, falling back to the in-memory lease backend (single replica only)");
    }
    Ok(Arc::new(InMemoryLeaseBackend::new()))
}

fn build_access_plane(config: &Config) -> anyhow::Result<TeleportAccessPlaneClient> {
    let teleport = &config.approval_service.teleport;
    let proxy_addr = teleport
        .proxy_addrs
        .first()
        .context("approval_service.teleport.proxy_addrs is empty")?
        .clone();

    TeleportAccessPlaneClient::new(proxy_addr, teleport.user.clone(), &teleport.identity_file)
        .context("failed to construct Teleport access-plane client")
}

async fn review_worker(
    processor: Arc<Processor>,
    review_rx: &mut mpsc::UnboundedReceiver<DeploymentReviewEvent>,
    cancel: &mut watch::Receiver<bool>,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            event = review_rx.recv() => {
                let Some(event) = event else {
                    anyhow::bail!("review channel closed unexpectedly");
                };
                let delivery_id = event.delivery_id.clone();
                if let Err(e) = processor.process_deployment_review(event, cancel.clone()).await {
                    warn!(delivery_id = %delivery_id, error = %e, "failed to process deployment review event");
                }
            }
            _ = cancel.changed() => {
                info!("review worker stopping");
                return Ok(());
            }
        }
    }
}

async fn watcher_loop(
    watcher: Watcher<TeleportAccessPlaneClient>,
    processor: Arc<Processor>,
    mut cancel: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let (access_request_tx, mut access_request_rx) = mpsc::unbounded_channel();
    let watch_cancel = cancel.clone();

    let watch_task = tokio::spawn(async move { watcher.run(access_request_tx, watch_cancel).await });

    loop {
        tokio::select! {
            request = access_request_rx.recv() => {
                let Some(request) = request else { break; };
                let name = request.name.clone();
                if let Err(e) = processor.handle_review(request, cancel.clone()).await {
                    warn!(access_request = %name, error = %e, "failed to handle access request review");
                }
            }
            _ = cancel.changed() => {
                break;
            }
        }
    }

    match watch_task.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            warn!(error = %e, "access-plane watcher ended");
            Err(anyhow::Error::new(e).context("access-plane watcher ended"))
        }
        Err(join_err) => Err(anyhow::Error::new(join_err).context("access-plane watcher task panicked")),
    }
}

async fn wait_for_shutdown(mut cancel: watch::Receiver<bool>) {
    let _ = cancel.changed().await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn resolve_webhook_addr_picks_the_first_source() {
        let config = Config {
            approval_service: crate::config::ApprovalServiceConfig {
                teleport: crate::config::TeleportConfig {
                    proxy_addrs: vec!["proxy.example.com:443".to_owned()],
                    identity_file: "/tmp/identity".into(),
                    user: "approval-bridge".to_owned(),
                    role_to_request: "reviewer".to_owned(),
                },
            },
            event_sources: crate::config::EventSourcesConfig {
                github: vec![
                    crate::config::GitHubSourceConfig {
                        webhook_addr: "0.0.0.0:8443".to_owned(),
                        org: "gravitational".to_owned(),
                        repo: "teleport".to_owned(),
                        environments: vec!["build/prod".to_owned()],
                        secret: "s".to_owned(),
                        app_id: "1".to_owned(),
                        installation_id: "2".to_owned(),
                        private_key_path: "/tmp/key.pem".into(),
                    },
                ],
            },
        };

        assert_eq!(resolve_webhook_addr(&config), "0.0.0.0:8443");
    }
}
