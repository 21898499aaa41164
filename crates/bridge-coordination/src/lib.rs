//! Distributed lease backend contract for the approval bridge coordinator.
//!
//! A lease is a named, time-bounded mutual-exclusion token: at most one
//! holder identity owns a lease of a given name at any wall-clock instant.
//! The backend only needs to implement acquire/renew/release on a single
//! name at a time — retry scheduling, renewal cadence, and release-on-cancel
//! live one layer up in `bridge-core`'s coordinator, the same split
//! `StorageBackend` draws between raw key-value operations and the barrier
//! logic built on top of it.

pub mod error;
pub mod memory;

#[cfg(feature = "kube-backend")]
pub mod kube_backend;

use std::time::Duration;

pub use error::LeaseBackendError;
pub use memory::InMemoryLeaseBackend;

#[cfg(feature = "kube-backend")]
pub use kube_backend::KubeLeaseBackend;

/// Contract a coordination surface must satisfy to back the coordinator.
///
/// Implementations need not be linearizable across calls on different
/// names, but must be linearizable *per name*: two concurrent
/// `try_acquire` calls for the same name must not both return `true`.
#[async_trait::async_trait]
pub trait LeaseBackend: Send + Sync + 'static {
    /// Attempt to become the sole holder of `name` for `duration`.
    ///
    /// Returns `Ok(true)` if `holder` is now the sole holder (either the
    /// lease was free, expired, or already held by `holder`). Returns
    /// `Ok(false)` if another holder currently owns it.
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        duration: Duration,
    ) -> Result<bool, LeaseBackendError>;

    /// Extend `holder`'s ownership of `name` by `duration` from now.
    ///
    /// Returns `Ok(false)` if `holder` is no longer the owner (lease lost
    /// to another holder, or it expired and nobody renewed in time).
    async fn renew(
        &self,
        name: &str,
        holder: &str,
        duration: Duration,
    ) -> Result<bool, LeaseBackendError>;

    /// Release `name` if currently held by `holder`. A no-op otherwise.
    async fn release(&self, name: &str, holder: &str) -> Result<(), LeaseBackendError>;
}
