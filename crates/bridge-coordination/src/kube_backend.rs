//! Kubernetes `coordination.k8s.io/v1` Lease backend.
//!
//! Mirrors the single-writer `holderIdentity` pattern used for leader
//! election: acquiring reads the current object (to learn whether it's
//! unheld, expired, or already ours) and writes back a conditional update
//! keyed on the `resourceVersion` it just read, so the API server rejects
//! a second concurrent writer with a 409 instead of silently letting both
//! succeed. Requires `POD_NAMESPACE` to resolve the namespace the lease
//! objects live in; each replica must pass a distinct holder identity.

use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease as LeaseObject, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Error as KubeError;
use tracing::debug;

use crate::error::LeaseBackendError;
use crate::LeaseBackend;

const CONFLICT_STATUS_CODE: u16 = 409;

/// Lease backend that stores holder state on a real Kubernetes `Lease`
/// object, shared across all replicas via the API server.
pub struct KubeLeaseBackend {
    api: Api<LeaseObject>,
}

impl KubeLeaseBackend {
    /// Connect using the ambient kubeconfig/in-cluster config and bind to
    /// `namespace` (see `POD_NAMESPACE` in the deployment configuration).
    pub async fn new(namespace: &str) -> Result<Self, LeaseBackendError> {
        let client = kube::Client::try_default()
            .await
            .map_err(|e| LeaseBackendError::Config {
                reason: e.to_string(),
            })?;
        Ok(Self {
            api: Api::namespaced(client, namespace),
        })
    }
}

fn holder_info(lease: &LeaseObject) -> Option<(String, DateTime<Utc>, i64)> {
    let spec = lease.spec.as_ref()?;
    let holder = spec.holder_identity.clone()?;
    let renew = spec.renew_time.as_ref()?.0;
    let duration_secs = i64::from(spec.lease_duration_seconds.unwrap_or(0));
    Some((holder, renew, duration_secs))
}

fn is_expired(renew_time: DateTime<Utc>, duration_secs: i64) -> bool {
    renew_time + chrono::Duration::seconds(duration_secs) <= Utc::now()
}

fn is_conflict(err: &KubeError) -> bool {
    matches!(err, KubeError::Api(e) if e.code == CONFLICT_STATUS_CODE)
}

#[async_trait::async_trait]
impl LeaseBackend for KubeLeaseBackend {
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        duration: Duration,
    ) -> Result<bool, LeaseBackendError> {
        let existing = self.api.get_opt(name).await.map_err(|e| LeaseBackendError::Acquire {
            name: name.to_owned(),
            reason: e.to_string(),
        })?;

        if let Some(lease) = &existing {
            if let Some((existing_holder, renew_time, duration_secs)) = holder_info(lease) {
                if existing_holder != holder && !is_expired(renew_time, duration_secs) {
                    debug!(lease = %name, holder = %existing_holder, "lease held by another replica");
                    return Ok(false);
                }
            }
        }

        let now = Utc::now();
        let spec = LeaseSpec {
            holder_identity: Some(holder.to_owned()),
            acquire_time: Some(MicroTime(now)),
            renew_time: Some(MicroTime(now)),
            lease_duration_seconds: Some(i32::try_from(duration.as_secs()).unwrap_or(i32::MAX)),
            ..LeaseSpec::default()
        };

        let write = match existing {
            Some(mut lease) => {
                lease.spec = Some(spec);
                self.api.replace(name, &PostParams::default(), &lease).await
            }
            None => {
                let lease = LeaseObject {
                    metadata: ObjectMeta {
                        name: Some(name.to_owned()),
                        ..ObjectMeta::default()
                    },
                    spec: Some(spec),
                };
                self.api.create(&PostParams::default(), &lease).await
            }
        };

        match write {
            Ok(_) => Ok(true),
            Err(e) if is_conflict(&e) => {
                debug!(lease = %name, "lost the race to acquire the lease, another replica wrote first");
                Ok(false)
            }
            Err(e) => Err(LeaseBackendError::Acquire {
                name: name.to_owned(),
                reason: e.to_string(),
            }),
        }
    }

    async fn renew(
        &self,
        name: &str,
        holder: &str,
        duration: Duration,
    ) -> Result<bool, LeaseBackendError> {
        let Some(mut lease) = self.api.get_opt(name).await.map_err(|e| LeaseBackendError::Renew {
            name: name.to_owned(),
            reason: e.to_string(),
        })?
        else {
            return Ok(false);
        };

        let mut spec = lease.spec.clone().unwrap_or_default();
        if spec.holder_identity.as_deref() != Some(holder) {
            return Ok(false);
        }

        let now = Utc::now();
        spec.renew_time = Some(MicroTime(now));
        spec.lease_duration_seconds = Some(i32::try_from(duration.as_secs()).unwrap_or(i32::MAX));
        lease.spec = Some(spec);

        match self.api.replace(name, &PostParams::default(), &lease).await {
            Ok(_) => Ok(true),
            Err(e) if is_conflict(&e) => {
                debug!(lease = %name, "lost the race to renew the lease, another replica wrote first");
                Ok(false)
            }
            Err(e) => Err(LeaseBackendError::Renew {
                name: name.to_owned(),
                reason: e.to_string(),
            }),
        }
    }

    async fn release(&self, name: &str, holder: &str) -> Result<(), LeaseBackendError> {
        let Some(mut lease) = self.api.get_opt(name).await.map_err(|e| LeaseBackendError::Release {
            name: name.to_owned(),
            reason: e.to_string(),
        })?
        else {
            return Ok(());
        };

        let Some(mut spec) = lease.spec.clone() else {
            return Ok(());
        };
        if spec.holder_identity.as_deref() != Some(holder) {
            return Ok(());
        }

        spec.holder_identity = None;
        lease.spec = Some(spec);

        match self.api.replace(name, &PostParams::default(), &lease).await {
            Ok(_) => Ok(()),
            // a conflict here means another replica already changed the lease
            // (acquired or released it) since we read it; either way there's
            // nothing further for this replica to do.
            Err(e) if is_conflict(&e) => Ok(()),
            Err(e) => Err(LeaseBackendError::Release {
                name: name.to_owned(),
                reason: e.to_string(),
            }),
        }
    }
}
