//! Reconciler: a periodic sweep that repairs drift between the forge and
//! the access plane — missed webhooks, restarts that happened mid-flight,
//! access requests that transitioned while no replica held the watch.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::access_plane::AccessPlaneClient;
use crate::coordinator::CancelToken;
use crate::error::ReconcilerError;
use crate::forge::ForgeClient;
use crate::processor::EventProcessor;

/// Drives [`EventProcessor::reconcile_once`] on a fixed cadence until
/// cancelled. One tick's failure is logged and does not stop the loop —
/// the next tick gets another chance.
pub struct Reconciler<F, A> {
    processor: Arc<EventProcessor<F, A>>,
    cadence: Duration,
}

impl<F: ForgeClient, A: AccessPlaneClient> Reconciler<F, A> {
    #[must_use]
    pub fn new(processor: Arc<EventProcessor<F, A>>, cadence: Duration) -> Self {
        Self { processor, cadence }
    }

    /// Run a single pass, propagating its error rather than swallowing it —
    /// used directly by tests and by [`Self::run`]'s loop body.
    pub async fn tick(&self, cancel: CancelToken) -> Result<(), ReconcilerError> {
        self.processor.reconcile_once(cancel).await
    }

    pub async fn run(&self, mut cancel: CancelToken) {
        let mut interval = tokio::time::interval(self.cadence);
        interval.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(cancel.clone()).await {
                        error!(error = %e, "reconciler pass failed, will retry next tick");
                    } else {
                        info!("reconciler pass completed");
                    }
                }
                _ = cancel.changed() => {
                    info!("reconciler stopping");
                    return;
                }
            }
        }
    }
}
