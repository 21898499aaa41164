//! HTTP error types for the webhook ingress.
//!
//! Maps failures from the webhook handler into the status codes the review
//! layer uses to decide whether a delivery is worth the forge retrying.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// `X-Hub-Signature-256` did not match the configured secret.
    BadSignature,
    /// A signature header was present but no secret is configured for this
    /// source — a deployment mistake, not a client error.
    NoSecretConfigured,
    /// The request body could not be parsed as the event type it claimed.
    MalformedBody(String),
    /// The delivery could not be handed off to the background processor.
    SinkUnavailable(String),
    /// No configured source matches the delivery's `(org, repo)`.
    UnknownSource(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::BadSignature => (
                StatusCode::BAD_REQUEST,
                "bad_signature",
                "webhook signature did not match".to_owned(),
            ),
            Self::NoSecretConfigured => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "no_secret_configured",
                "signature present but no secret is configured for this source".to_owned(),
            ),
            Self::MalformedBody(msg) => (StatusCode::BAD_REQUEST, "malformed_body", msg),
            Self::SinkUnavailable(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "sink_unavailable", msg),
            Self::UnknownSource(msg) => (StatusCode::NOT_FOUND, "unknown_source", msg),
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}
