//! Bounded, ordered queue carrying sensor input to the localization node.
//!
//! Detection batches and point clouds share one [`tokio::sync::mpsc`]
//! channel, so the consumer sees them in the order they were sent. A full
//! queue makes [`InboundSender::send`] wait instead of discarding input.
//!
//! The queue stands in for the `/darknet_ros/bounding_boxes` and
//! `/zed2/zed_node/point_cloud/cloud_registered` subscriptions.

use objloc_types::{EventPayload, LocError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::trace;

/// Default number of inbound messages buffered ahead of the node.
pub const DEFAULT_INBOUND_CAPACITY: usize = 64;

/// Create a bounded inbound queue holding at most `capacity` messages.
///
/// A `capacity` of zero is raised to one.
pub fn inbound_channel(capacity: usize) -> (InboundSender, InboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (InboundSender { tx }, InboundReceiver { rx })
}

/// Producer half. Clone it to feed the queue from several tasks.
#[derive(Clone, Debug)]
pub struct InboundSender {
    tx: mpsc::Sender<EventPayload>,
}

impl InboundSender {
    /// Queue `payload`, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// * [`LocError::InvalidInput`] for outbound payload kinds.
    /// * [`LocError::Channel`] once the receiver has been dropped.
    pub async fn send(&self, payload: EventPayload) -> Result<(), LocError> {
        if !is_inbound(&payload) {
            return Err(LocError::InvalidInput(
                "only detection batches and point clouds can be queued for the node".to_string(),
            ));
        }
        if self.tx.capacity() == 0 {
            trace!("inbound queue full; waiting for the node");
        }
        self.tx
            .send(payload)
            .await
            .map_err(|_| LocError::Channel("inbound queue closed".to_string()))
    }

    /// Free slots left in the queue.
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

/// Consumer half, owned by the node.
#[derive(Debug)]
pub struct InboundReceiver {
    rx: mpsc::Receiver<EventPayload>,
}

impl InboundReceiver {
    /// Next payload in send order, or `None` once every sender is gone and
    /// the queue is empty.
    pub async fn recv(&mut self) -> Option<EventPayload> {
        self.rx.recv().await
    }

    /// Next already-queued payload without waiting.
    pub fn try_recv(&mut self) -> Option<EventPayload> {
        match self.rx.try_recv() {
            Ok(payload) => Some(payload),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Refuse further sends. Payloads already queued stay receivable.
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Number of payloads waiting in the queue.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

fn is_inbound(payload: &EventPayload) -> bool {
    matches!(
        payload,
        EventPayload::Detections(_) | EventPayload::PointCloud(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use objloc_types::{CloudPoint, DetectionBatch, Header, PointCloudFrame};
    use std::time::Duration;

    fn cloud(seq: u32) -> EventPayload {
        let mut header = Header::now("zed2");
        header.seq = seq;
        EventPayload::PointCloud(PointCloudFrame::unorganized(
            header,
            vec![CloudPoint::new(0.0, 0.0, 1.0)],
        ))
    }

    fn detections(seq: u32) -> EventPayload {
        let mut header = Header::now("zed2");
        header.seq = seq;
        EventPayload::Detections(DetectionBatch {
            header,
            image_header: Header::now("zed2_left"),
            bounding_boxes: Vec::new(),
        })
    }

    fn seq(payload: &EventPayload) -> u32 {
        match payload {
            EventPayload::Detections(b) => b.header.seq,
            EventPayload::PointCloud(f) => f.header.seq,
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn mixed_kinds_keep_send_order() {
        let (tx, mut rx) = inbound_channel(8);
        tx.send(detections(1)).await.unwrap();
        tx.send(cloud(2)).await.unwrap();
        tx.send(detections(3)).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, EventPayload::Detections(_)));
        assert_eq!(seq(&first), 1);
        assert_eq!(rx.try_recv().map(|p| seq(&p)), Some(2));
        assert_eq!(rx.try_recv().map(|p| seq(&p)), Some(3));
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn full_queue_waits_instead_of_dropping() {
        let (tx, mut rx) = inbound_channel(2);
        tx.send(cloud(1)).await.unwrap();
        tx.send(cloud(2)).await.unwrap();
        assert_eq!(tx.capacity(), 0);

        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.send(cloud(3))).await;
        assert!(blocked.is_err(), "send must wait while the queue is full");

        let producer = tokio::spawn({
            let tx = tx.clone();
            async move {
                for n in 3..=10 {
                    tx.send(cloud(n)).await.unwrap();
                }
            }
        });
        let mut seen = Vec::new();
        while seen.len() < 10 {
            seen.push(seq(&rx.recv().await.unwrap()));
        }
        producer.await.unwrap();
        assert_eq!(seen, (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn outbound_payloads_are_refused() {
        let (tx, rx) = inbound_channel(4);
        let fault = EventPayload::Fault {
            component: "test".to_string(),
            message: "boom".to_string(),
        };
        assert!(matches!(tx.send(fault).await, Err(LocError::InvalidInput(_))));
        assert!(rx.is_empty());
    }

    #[tokio::test]
    async fn send_after_receiver_dropped_is_channel_error() {
        let (tx, rx) = inbound_channel(4);
        drop(rx);
        assert!(matches!(tx.send(cloud(1)).await, Err(LocError::Channel(_))));
    }

    #[tokio::test]
    async fn closed_queue_keeps_what_was_sent() {
        let (tx, mut rx) = inbound_channel(4);
        tx.send(cloud(1)).await.unwrap();
        rx.close();
        assert!(matches!(tx.send(cloud(2)).await, Err(LocError::Channel(_))));
        assert_eq!(rx.try_recv().map(|p| seq(&p)), Some(1));
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn receiver_ends_when_senders_are_gone() {
        let (tx, mut rx) = inbound_channel(0);
        tx.send(cloud(1)).await.unwrap();
        drop(tx);
        assert_eq!(rx.len(), 1);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}
