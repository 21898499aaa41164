//! Webhook ingress: verifies GitHub deliveries and hands parsed deployment
//! review events off to the background event processor over an unbounded
//! channel — the handler itself never blocks on the core's lease gate.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::github::{DeploymentReviewPayload, MinimalWebhookPayload};
use crate::state::{source_key, AppState, GitHubSource};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
const EVENT_HEADER: &str = "X-GitHub-Event";
const DELIVERY_HEADER: &str = "X-GitHub-Delivery";
const SIGNATURE_PREFIX: &str = "sha256=";
const DEPLOYMENT_REVIEW_EVENT_TYPE: &str = "deployment_review";

#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/", get(health))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let delivery_id = header_str(&headers, DELIVERY_HEADER).unwrap_or_default();
    let event_type = header_str(&headers, EVENT_HEADER).unwrap_or_default();

    let minimal: MinimalWebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| AppError::MalformedBody(e.to_string()))?;
    let org = minimal.organization.login;
    let repo = minimal.repo.name;

    let source = state
        .github_sources
        .get(&source_key(&org, &repo))
        .ok_or_else(|| {
            warn!(delivery_id = %delivery_id, %org, %repo, "delivery for an unconfigured source");
            AppError::UnknownSource(format!("{org}/{repo} is not configured"))
        })?;

    let signature = header_str(&headers, SIGNATURE_HEADER).ok_or_else(|| {
        warn!(delivery_id = %delivery_id, %event_type, "webhook delivered with no signature header");
        AppError::BadSignature
    })?;

    verify_signature(source, &body, &signature, &delivery_id)?;

    if event_type != DEPLOYMENT_REVIEW_EVENT_TYPE {
        debug!(delivery_id = %delivery_id, %event_type, "ignoring unrecognized event type");
        return Ok(StatusCode::OK);
    }

    if !state.dedup.try_add(&delivery_id) {
        debug!(delivery_id = %delivery_id, "duplicate delivery within the de-dup window, dropping");
        return Ok(StatusCode::OK);
    }

    let payload: DeploymentReviewPayload =
        serde_json::from_slice(&body).map_err(|e| AppError::MalformedBody(e.to_string()))?;

    let review_event = payload.into_review_event(delivery_id.clone());

    state.review_tx.send(review_event).map_err(|_| {
        AppError::SinkUnavailable("event processor channel closed".to_owned())
    })?;

    info!(delivery_id = %delivery_id, %event_type, %org, %repo, "deployment review delivery accepted");
    Ok(StatusCode::OK)
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name)?.to_str().ok().map(ToOwned::to_owned)
}

fn verify_signature(
    source: &GitHubSource,
    body: &[u8],
    signature_header: &str,
    delivery_id: &str,
) -> Result<(), AppError> {
    if source.secrets.webhook_secret.is_empty() {
        warn!(delivery_id = %delivery_id, "signature present but no secret is configured for this source");
        return Err(AppError::NoSecretConfigured);
    }

    let hex_signature = signature_header
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or(AppError::BadSignature)?;
    let provided = hex::decode(hex_signature).map_err(|_| AppError::BadSignature)?;

    let mut mac = HmacSha256::new_from_slice(source.secrets.webhook_secret.as_bytes())
        .expect("HMAC accepts a key of any length");
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    if computed.as_slice().ct_eq(provided.as_slice()).into() {
        Ok(())
    } else {
        warn!(delivery_id = %delivery_id, "signature did not match configured secret");
        Err(AppError::BadSignature)
    }
}
