//! Lease backend error types.

/// Errors that can occur while acquiring, renewing, or releasing a lease.
#[derive(Debug, thiserror::Error)]
pub enum LeaseBackendError {
    /// Failed to acquire a lease.
    #[error("failed to acquire lease '{name}': {reason}")]
    Acquire { name: String, reason: String },

    /// Failed to renew a lease this holder believed it owned.
    #[error("failed to renew lease '{name}': {reason}")]
    Renew { name: String, reason: String },

    /// Failed to release a lease.
    #[error("failed to release lease '{name}': {reason}")]
    Release { name: String, reason: String },

    /// The backend could not be constructed or reached at all.
    #[error("lease backend configuration error: {reason}")]
    Config { reason: String },
}
