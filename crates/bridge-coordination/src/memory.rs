//! In-memory lease backend for testing and single-process deployments.
//!
//! Not shared across processes — use [`crate::KubeLeaseBackend`] for a
//! multi-replica deployment.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::error::LeaseBackendError;
use crate::LeaseBackend;

#[derive(Debug, Clone)]
struct LeaseRecord {
    holder: String,
    expires_at: Instant,
}

/// A lease backend backed by an in-process `HashMap`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLeaseBackend {
    leases: Arc<RwLock<HashMap<String, LeaseRecord>>>,
}

impl InMemoryLeaseBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl LeaseBackend for InMemoryLeaseBackend {
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        duration: Duration,
    ) -> Result<bool, LeaseBackendError> {
        let now = Instant::now();
        let mut leases = self.leases.write().await;

        if let Some(existing) = leases.get(name) {
            if existing.expires_at > now && existing.holder != holder {
                return Ok(false);
            }
        }

        leases.insert(
            name.to_owned(),
            LeaseRecord {
                holder: holder.to_owned(),
                expires_at: now + duration,
            },
        );
        Ok(true)
    }

    async fn renew(
        &self,
        name: &str,
        holder: &str,
        duration: Duration,
    ) -> Result<bool, LeaseBackendError> {
        let now = Instant::now();
        let mut leases = self.leases.write().await;

        match leases.get_mut(name) {
            Some(record) if record.holder == holder => {
                record.expires_at = now + duration;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, name: &str, holder: &str) -> Result<(), LeaseBackendError> {
        let mut leases = self.leases.write().await;
        if leases.get(name).is_some_and(|existing| existing.holder == holder) {
            leases.remove(name);
        }
        Ok(())
    }
}
