//! Access-plane client talking to a Teleport proxy's access request API
//! over mTLS, authenticated with a pre-provisioned identity file. The wire
//! protocol is explicitly out of scope — this is a thin adapter, not a
//! reimplementation of `tsh`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use bridge_core::error::AccessPlaneError;
use bridge_core::model::AccessRequestState;
use bridge_core::{AccessPlaneClient, AccessRequest, AccessRequestEvent, NewAccessRequest};

const WATCH_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct CreateAccessRequestBody<'a> {
    name: &'a str,
    user: &'a str,
    roles: Vec<&'a str>,
    reason: &'a str,
    labels: std::collections::HashMap<String, String>,
}

#[derive(Deserialize)]
struct AccessRequestWire {
    name: String,
    user: String,
    roles: Vec<String>,
    state: String,
    reason: String,
    #[serde(default)]
    labels: std::collections::HashMap<String, String>,
}

impl From<AccessRequestWire> for AccessRequest {
    fn from(wire: AccessRequestWire) -> Self {
        Self {
            name: wire.name,
            requester: wire.user,
            role: wire.roles.into_iter().next().unwrap_or_default(),
            state: AccessRequestState::from(wire.state.as_str()),
            labels: wire.labels,
            reason: wire.reason,
        }
    }
}

/// One proxy endpoint, authenticated as `user` via an identity file issued
/// for `role_to_request`.
pub struct TeleportAccessPlaneClient {
    http: reqwest::Client,
    proxy_addr: String,
    user: String,
}

impl TeleportAccessPlaneClient {
    pub fn new(proxy_addr: String, user: String, identity_path: &Path) -> Result<Self, AccessPlaneError> {
        let identity_pem = std::fs::read(identity_path).map_err(|e| AccessPlaneError::Request {
            reason: format!("failed to read identity file {}: {e}", identity_path.display()),
        })?;
        let identity = reqwest::Identity::from_pem(&identity_pem).map_err(|e| AccessPlaneError::Request {
            reason: format!("identity file {} is not a valid PEM bundle: {e}", identity_path.display()),
        })?;

        let http = reqwest::Client::builder()
            .identity(identity)
            .build()
            .map_err(|e| AccessPlaneError::Request {
                reason: format!("failed to build mTLS client: {e}"),
            })?;

        Ok(Self {
            http,
            proxy_addr,
            user,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("https://{}/v1/webapi{path}", self.proxy_addr)
    }
}

#[async_trait::async_trait]
impl AccessPlaneClient for TeleportAccessPlaneClient {
    async fn create_access_request(
        &self,
        request: NewAccessRequest,
    ) -> Result<AccessRequest, AccessPlaneError> {
        let body = CreateAccessRequestBody {
            name: &request.name,
            user: &request.requester,
            roles: vec![&request.role],
            reason: &request.reason,
            labels: request.labels,
        };

        let resp = self
            .http
            .post(self.url("/access_requests"))
            .json(&body)
            .send()
            .await
            .map_err(|e| AccessPlaneError::Request {
                reason: format!("create access request failed: {e}"),
            })?
            .error_for_status()
            .map_err(|e| AccessPlaneError::Request {
                reason: format!("access plane rejected request: {e}"),
            })?;

        let wire: AccessRequestWire = resp.json().await.map_err(|e| AccessPlaneError::Malformed {
            reason: format!("malformed create-access-request response: {e}"),
        })?;

        Ok(wire.into())
    }

    async fn list_access_requests(&self) -> Result<Vec<AccessRequest>, AccessPlaneError> {
        let resp = self
            .http
            .get(self.url("/access_requests"))
            .query(&[("user", self.user.as_str())])
            .send()
            .await
            .map_err(|e| AccessPlaneError::Request {
                reason: format!("list access requests failed: {e}"),
            })?
            .error_for_status()
            .map_err(|e| AccessPlaneError::Request {
                reason: format!("access plane rejected list request: {e}"),
            })?;

        let wire: Vec<AccessRequestWire> = resp.json().await.map_err(|e| AccessPlaneError::Malformed {
            reason: format!("malformed list-access-requests response: {e}"),
        })?;

        Ok(wire.into_iter().map(Into::into).collect())
    }

    async fn deny_access_request(&self, name: &str, reason: &str) -> Result<(), AccessPlaneError> {
        let body = serde_json::json!({ "state": "denied", "reason": reason });

        self.http
            .put(self.url(&format!("/access_requests/{name}")))
            .json(&body)
            .send()
            .await
            .map_err(|e| AccessPlaneError::Request {
                reason: format!("deny access request failed: {e}"),
            })?
            .error_for_status()
            .map_err(|e| AccessPlaneError::Request {
                reason: format!("access plane rejected deny request: {e}"),
            })?;

        Ok(())
    }

    /// Teleport's webapi exposes a streaming watch endpoint; this adapter
    /// polls `list_access_requests` on an interval instead of holding a
    /// long-lived connection open, since the streaming variant needs a
    /// gRPC client this crate does not carry.
    ///
    /// Every access request currently listable is re-returned on every
    /// poll, not just the ones that changed — an approved or denied
    /// request normally stays listable until it expires or is deleted, so
    /// the poll loop tracks the last state delivered per request name and
    /// only emits a [`AccessRequestEvent::Resource`] when that state
    /// actually changed since the previous tick.
    async fn watch(
        &self,
        requester: Option<String>,
    ) -> Result<BoxStream<'static, Result<AccessRequestEvent, AccessPlaneError>>, AccessPlaneError> {
        let http = self.http.clone();
        let proxy_addr = self.proxy_addr.clone();
        let user = self.user.clone();
        let seen: HashMap<String, AccessRequestState> = HashMap::new();

        let started = stream::once(async { Ok(AccessRequestEvent::WatchStarted) });

        let polled = stream::unfold(
            (http, proxy_addr, user, requester, seen),
            |(http, proxy_addr, user, requester, mut seen)| async move {
                tokio::time::sleep(WATCH_POLL_INTERVAL).await;

                let url = format!("https://{proxy_addr}/v1/webapi/access_requests");
                let result = http
                    .get(url)
                    .query(&[("user", user.as_str())])
                    .send()
                    .await
                    .map_err(|e| AccessPlaneError::Request {
                        reason: format!("watch poll failed: {e}"),
                    })
                    .and_then(|resp| {
                        resp.error_for_status().map_err(|e| AccessPlaneError::Request {
                            reason: format!("watch poll rejected: {e}"),
                        })
                    });

                let next = match result {
                    Ok(resp) => resp
                        .json::<Vec<AccessRequestWire>>()
                        .await
                        .map_err(|e| AccessPlaneError::Malformed {
                            reason: format!("malformed watch poll response: {e}"),
                        })
                        .map(|wire| {
                            let changed: Vec<_> = wire
                                .into_iter()
                                .map(AccessRequest::from)
                                .filter(|req| {
                                    requester.as_deref().is_none_or(|r| r == req.requester)
                                })
                                .filter(|req| seen.get(&req.name) != Some(&req.state))
                                .collect();
                            for req in &changed {
                                seen.insert(req.name.clone(), req.state.clone());
                            }
                            stream::iter(
                                changed
                                    .into_iter()
                                    .map(|req| Ok(AccessRequestEvent::Resource(req))),
                            )
                        }),
                    Err(e) => Err(e),
                };

                match next {
                    Ok(items) => Some((items, (http, proxy_addr, user, requester, seen))),
                    Err(e) => Some((
                        stream::iter(vec![Err(e)]),
                        (http, proxy_addr, user, requester, seen),
                    )),
                }
            },
        )
        .flatten();

        Ok(Box::pin(started.chain(polled)))
    }
}
