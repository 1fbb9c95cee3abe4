//! The spool — process-lifetime pipeline driver, plus reprocessing.
//!
//! Messages enter through the intake channel (also the target of delayed
//! requeue); the dispatcher spawns one task per in-flight message, with no
//! global processing lock and no ordering between messages, and emits a
//! [`ProcessReport`] per completed traversal.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::context::RequeueHandle;
use crate::error::Result;
use crate::model::Message;
use crate::pipeline::{Pipeline, ProcessReport};
use crate::repository::{MailKey, RepositoryAddress, RepositoryRegistry};

/// Drains the pipeline intake and drives messages concurrently.
pub struct Spool {
    intake: RequeueHandle,
    dispatcher: JoinHandle<()>,
}

impl Spool {
    /// Start dispatching. `intake_rx` is the receiver paired with the
    /// context's [`RequeueHandle`]; reports for every processed message
    /// arrive on the returned channel.
    pub fn start(
        pipeline: Arc<Pipeline>,
        intake_rx: mpsc::UnboundedReceiver<Message>,
    ) -> (Self, mpsc::UnboundedReceiver<ProcessReport>) {
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let intake = pipeline.context().requeue.clone();
        let dispatcher = tokio::spawn(dispatch(pipeline, intake_rx, report_tx));
        (Self { intake, dispatcher }, report_rx)
    }

    /// Submit a message for processing.
    pub fn enqueue(&self, message: Message) {
        self.intake.submit(message);
    }

    /// A handle front-ends can hand out for submission.
    pub fn intake(&self) -> RequeueHandle {
        self.intake.clone()
    }
}

impl Drop for Spool {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

async fn dispatch(
    pipeline: Arc<Pipeline>,
    mut intake_rx: mpsc::UnboundedReceiver<Message>,
    report_tx: mpsc::UnboundedSender<ProcessReport>,
) {
    while let Some(message) = intake_rx.recv().await {
        debug!(id = %message.id(), state = %message.state(), "Dispatching message");
        let pipeline = pipeline.clone();
        let report_tx = report_tx.clone();
        tokio::spawn(async move {
            let report = pipeline.process(message).await;
            let _ = report_tx.send(report);
        });
    }
}

/// Re-submits stored messages into the pipeline.
///
/// A message is removed from its store before re-entry; when a concurrent
/// removal got there first, the message stays dead rather than being
/// resurrected.
pub struct ReprocessingService {
    registry: Arc<RepositoryRegistry>,
    requeue: RequeueHandle,
}

impl ReprocessingService {
    pub fn new(registry: Arc<RepositoryRegistry>, requeue: RequeueHandle) -> Self {
        Self { registry, requeue }
    }

    /// Reprocess one stored message. Enters at `target_stage` when given,
    /// otherwise at the stage the message last held. Returns whether the
    /// key was found (and therefore re-entered).
    pub async fn reprocess_one(
        &self,
        address: &RepositoryAddress,
        key: &MailKey,
        target_stage: Option<&str>,
    ) -> Result<bool> {
        let store = self.registry.select(address).await?;
        let Some(mut message) = store.retrieve(key).await? else {
            return Ok(false);
        };
        if !store.remove(key).await? {
            // lost the race against a concurrent removal
            return Ok(false);
        }
        if let Some(stage) = target_stage {
            message.set_state(stage);
        }
        info!(id = %message.id(), %address, stage = %message.state(), "Reprocessing stored message");
        self.requeue.submit(message);
        Ok(true)
    }

    /// Reprocess everything stored at an address; returns how many messages
    /// re-entered the pipeline.
    pub async fn reprocess_all(
        &self,
        address: &RepositoryAddress,
        target_stage: Option<&str>,
    ) -> Result<usize> {
        let store = self.registry.select(address).await?;
        let mut count = 0;
        for key in store.list().await? {
            if self.reprocess_one(address, &key, target_stage).await? {
                count += 1;
            }
        }
        Ok(count)
    }
}
