//! Single consumer of inbound messages.
//!
//! The worker owns the receive loop and processes one message at a time, so
//! per-device ordering is exactly the delivery order. It checks the stop
//! signal once per iteration and finishes the current message before exiting.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use homiebridge_core::config::defaults;

use crate::projector::{HomieProjector, ProcessOutcome};

/// A message handed from the transport to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Per-outcome message counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub applied: u64,
    pub ignored: u64,
    pub rejected: u64,
    pub store_failed: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: &ProcessOutcome) {
        self.processed += 1;
        match outcome {
            ProcessOutcome::Applied => self.applied += 1,
            ProcessOutcome::Ignored => self.ignored += 1,
            ProcessOutcome::Rejected(_) => self.rejected += 1,
            ProcessOutcome::StoreFailed(_) => self.store_failed += 1,
        }
    }
}

enum Step {
    Message(InboundMessage),
    Recheck,
    Stop,
}

/// Consumer task projecting inbound messages.
pub struct ProjectionWorker {
    projector: Arc<HomieProjector>,
    rx: mpsc::Receiver<InboundMessage>,
    stop: watch::Receiver<bool>,
    report_every: u64,
    stats: WorkerStats,
}

impl ProjectionWorker {
    pub fn new(
        projector: Arc<HomieProjector>,
        rx: mpsc::Receiver<InboundMessage>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            projector,
            rx,
            stop,
            report_every: defaults::REPORT_EVERY,
            stats: WorkerStats::default(),
        }
    }

    /// Log a device summary every `n` messages; 0 disables it.
    pub fn with_report_every(mut self, n: u64) -> Self {
        self.report_every = n;
        self
    }

    /// Run on a new tokio task.
    pub fn spawn(self) -> JoinHandle<WorkerStats> {
        tokio::spawn(self.run())
    }

    /// Receive and process until stopped or the channel closes.
    pub async fn run(mut self) -> WorkerStats {
        info!("Projection worker started");

        loop {
            if *self.stop.borrow() {
                break;
            }

            let step = tokio::select! {
                biased;
                changed = self.stop.changed() => {
                    if changed.is_err() { Step::Stop } else { Step::Recheck }
                }
                message = self.rx.recv() => match message {
                    Some(message) => Step::Message(message),
                    None => Step::Stop,
                },
            };

            match step {
                Step::Message(message) => self.handle(message),
                Step::Recheck => continue,
                Step::Stop => break,
            }
        }

        self.report();
        info!(
            processed = self.stats.processed,
            applied = self.stats.applied,
            ignored = self.stats.ignored,
            rejected = self.stats.rejected,
            store_failed = self.stats.store_failed,
            "Projection worker stopped"
        );
        self.stats
    }

    fn handle(&mut self, message: InboundMessage) {
        let outcome = self
            .projector
            .process_message(&message.topic, &message.payload);
        self.stats.record(&outcome);

        if self.report_every > 0 && self.stats.processed % self.report_every == 0 {
            self.report();
        }
    }

    fn report(&self) {
        match self.projector.list_devices() {
            Ok(devices) => {
                info!(
                    "{} devices known after {} messages",
                    devices.len(),
                    self.stats.processed
                );
                for device in devices {
                    info!(
                        device_id = %device.device_id,
                        name = device.device_name.as_deref().unwrap_or("-"),
                        state = device.state.as_deref().unwrap_or("-"),
                        homie = device.protocol_version.as_deref().unwrap_or("-"),
                        nodes = device.node_list.as_deref().unwrap_or("-"),
                        "Device"
                    );
                }
            }
            Err(e) => warn!("Failed to list devices for report: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homiebridge_storage::ProjectionStore;

    fn create_projector() -> (tempfile::TempDir, Arc<HomieProjector>) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectionStore::open(dir.path().join("homie.redb")).unwrap();
        (dir, Arc::new(HomieProjector::new(store)))
    }

    #[tokio::test]
    async fn test_drains_until_channel_closes() {
        let (_dir, projector) = create_projector();
        let (tx, rx) = mpsc::channel(8);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let handle = ProjectionWorker::new(projector.clone(), rx, stop_rx)
            .with_report_every(2)
            .spawn();

        tx.send(InboundMessage::new("homie/dev1/$state", "ready"))
            .await
            .unwrap();
        tx.send(InboundMessage::new("homie/dev1/$stats", "x"))
            .await
            .unwrap();
        tx.send(InboundMessage::new("bogus", "x")).await.unwrap();
        drop(tx);

        let stats = handle.await.unwrap();
        assert_eq!(
            stats,
            WorkerStats {
                processed: 3,
                applied: 1,
                ignored: 1,
                rejected: 1,
                store_failed: 0,
            }
        );
        let device = projector.get_device("dev1").unwrap().unwrap();
        assert_eq!(device.state.as_deref(), Some("ready"));
    }

    #[tokio::test]
    async fn test_stop_signal() {
        let (_dir, projector) = create_projector();
        let (_tx, rx) = mpsc::channel::<InboundMessage>(8);
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = ProjectionWorker::new(projector, rx, stop_rx).spawn();

        stop_tx.send(true).unwrap();
        let stats = handle.await.unwrap();
        assert_eq!(stats.processed, 0);
    }

    #[tokio::test]
    async fn test_already_stopped_worker_processes_nothing() {
        let (_dir, projector) = create_projector();
        let (tx, rx) = mpsc::channel(8);
        let (_stop_tx, stop_rx) = watch::channel(true);
        tx.send(InboundMessage::new("homie/dev1/$state", "ready"))
            .await
            .unwrap();

        let stats = ProjectionWorker::new(projector.clone(), rx, stop_rx)
            .run()
            .await;
        assert_eq!(stats.processed, 0);
        assert!(projector.get_device("dev1").unwrap().is_none());
    }
}
