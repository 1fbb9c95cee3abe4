//! Shared collaborators handed to every action.
//!
//! An explicit process-lifetime context object: the rate limiter, resolver,
//! and repository registry are constructed by the embedding process and
//! passed to pipeline construction — there is no module-level state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::limiter::RateLimiter;
use crate::model::Message;
use crate::repository::RepositoryRegistry;
use crate::resolver::AddressResolver;

/// Sending side of the pipeline intake channel.
///
/// Actions use it for delayed requeue; the reprocessing service uses it to
/// re-enter stored messages. The paired receiver is drained by the spool.
#[derive(Clone)]
pub struct RequeueHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl RequeueHandle {
    /// Create the intake channel. The receiver goes to the spool.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Submit a message for processing.
    pub fn submit(&self, message: Message) {
        if self.tx.send(message).is_err() {
            debug!("Pipeline intake closed; dropping submitted message");
        }
    }

    /// Submit a message after a fixed delay without occupying a worker.
    pub fn submit_after(&self, message: Message, delay: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(message).is_err() {
                debug!("Pipeline intake closed; dropping delayed message");
            }
        });
    }
}

/// The collaborators an [`crate::pipeline::Action`] may call into.
pub struct CoreContext {
    pub limiter: Arc<RateLimiter>,
    pub resolver: Arc<AddressResolver>,
    pub repositories: Arc<RepositoryRegistry>,
    pub requeue: RequeueHandle,
}

impl CoreContext {
    pub fn new(
        limiter: Arc<RateLimiter>,
        resolver: Arc<AddressResolver>,
        repositories: Arc<RepositoryRegistry>,
        requeue: RequeueHandle,
    ) -> Self {
        Self {
            limiter,
            resolver,
            repositories,
            requeue,
        }
    }
}
