//! [`Node`] – the single consumer of inbound sensor traffic.
//!
//! Inbound messages are handled strictly one at a time and in arrival order,
//! so the orchestrator never sees a detection batch and a point cloud
//! concurrently. Two entry points exist:
//!
//! - [`Node::run`] – live mode. Consumes an [`InboundReceiver`] until
//!   shutdown or until every sender is gone. Messages already queued when
//!   shutdown is requested are still handled.
//! - [`Node::run_source`] – replay mode. Drains a [`SensorSource`] in its
//!   recorded order without going through a queue.
//!
//! [`pump`] connects a source to the inbound queue for live mode.

use futures_util::StreamExt;
use objloc_middleware::{InboundReceiver, InboundSender, SensorSource};
use objloc_types::{EventPayload, LocError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::orchestrator::LocalizationOrchestrator;

/// Counters accumulated over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub frames: u64,
    pub rejected_frames: u64,
    pub batches: u64,
    pub dropped_detections: u64,
    pub poses: u64,
}

pub struct Node {
    orchestrator: LocalizationOrchestrator,
    stats: NodeStats,
}

impl Node {
    pub fn new(orchestrator: LocalizationOrchestrator) -> Self {
        Self {
            orchestrator,
            stats: NodeStats::default(),
        }
    }

    pub fn orchestrator(&self) -> &LocalizationOrchestrator {
        &self.orchestrator
    }

    pub fn stats(&self) -> NodeStats {
        self.stats
    }

    /// Handle one inbound payload. Outbound payloads are ignored.
    pub fn dispatch(&mut self, payload: EventPayload) {
        match payload {
            EventPayload::PointCloud(frame) => {
                self.stats.frames += 1;
                match self.orchestrator.handle_point_cloud(frame) {
                    Ok(Some(_)) => self.stats.poses += 1,
                    Ok(None) => {}
                    Err(e) => {
                        self.stats.rejected_frames += 1;
                        warn!(error = %e, "point cloud rejected");
                        self.orchestrator.report_fault("point_cloud", &e);
                    }
                }
            }
            EventPayload::Detections(batch) => {
                self.stats.batches += 1;
                let outcome = self.orchestrator.handle_detections(&batch);
                self.stats.dropped_detections += outcome.dropped.len() as u64;
                if outcome.pose.is_some() {
                    self.stats.poses += 1;
                }
            }
            other => debug!(?other, "ignoring non-inbound payload"),
        }
    }

    /// Live loop: handle `inbound` in arrival order until `shutdown` turns
    /// `true` (or its sender is dropped) or every inbound sender is gone.
    pub async fn run(
        mut self,
        mut inbound: InboundReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) -> NodeStats {
        info!("localization node running");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                payload = inbound.recv() => match payload {
                    Some(payload) => self.dispatch(payload),
                    None => {
                        debug!("inbound queue closed");
                        break;
                    }
                },
            }
        }

        self.drain(&mut inbound);
        info!(stats = ?self.stats, "localization node stopped");
        self.stats
    }

    /// Close `inbound` and handle what is still queued, oldest first.
    fn drain(&mut self, inbound: &mut InboundReceiver) {
        inbound.close();
        if !inbound.is_empty() {
            debug!(count = inbound.len(), "draining queued inbound messages");
        }
        while let Some(payload) = inbound.try_recv() {
            self.dispatch(payload);
        }
    }

    /// Replay loop: handle every payload of `source` in order.
    ///
    /// # Errors
    ///
    /// Propagates the source's failure to open.
    pub async fn run_source(&mut self, source: &dyn SensorSource) -> Result<NodeStats, LocError> {
        let mut inbound = source.inbound().await?;
        while let Some(payload) = inbound.next().await {
            self.dispatch(payload);
            // Let output subscribers keep up with a fast replay.
            tokio::task::yield_now().await;
        }
        Ok(self.stats)
    }
}

/// Forward every payload of `source` into the node's inbound queue, waiting
/// whenever the queue is full. Returns how many were forwarded once the
/// source is exhausted or the node stops consuming.
///
/// # Errors
///
/// Propagates the source's failure to open.
pub async fn pump(source: &dyn SensorSource, inbound: &InboundSender) -> Result<u64, LocError> {
    let mut payloads = source.inbound().await?;
    let mut forwarded = 0;
    while let Some(payload) = payloads.next().await {
        match inbound.send(payload).await {
            Ok(()) => forwarded += 1,
            Err(LocError::Channel(e)) => {
                debug!(error = %e, forwarded, "node stopped consuming");
                break;
            }
            Err(e) => warn!(error = %e, "source produced a payload the node cannot take"),
        }
    }
    Ok(forwarded)
}
