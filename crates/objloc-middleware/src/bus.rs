//! Typed, topic-based publish/subscribe event bus for the node's output.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others. Sensor input does not travel over the bus; it goes through
//! the ordered [`inbound`](crate::inbound) queue.
//!
//! # Topics
//!
//! | Topic | Payload | ROS name |
//! |---|---|---|
//! | [`Topic::SizeEstimates`] | estimate batches | `/object_detection/size_estimates` |
//! | [`Topic::ObjectPose`] | object poses | `/object_detection/object_pose` |
//! | [`Topic::ObjectPoint`] | debug points | `/object_detection/object_point` |
//! | [`Topic::Landmarks`] | fused landmarks | `/object_positions_in` |
//! | [`Topic::SystemAlerts`] | faults | `/object_detection/alerts` |

use objloc_types::{Event, EventPayload, LocError};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 64;

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Size and bearing estimates, one batch per detection batch.
    SizeEstimates,
    /// Object poses derived from plane fits.
    ObjectPose,
    /// Per-label debug points.
    ObjectPoint,
    /// Fused twin-view landmarks.
    Landmarks,
    /// Faults reported by the node.
    SystemAlerts,
}

impl Topic {
    /// Topics produced by the localization node.
    pub const OUTBOUND: [Topic; 5] = [
        Topic::SizeEstimates,
        Topic::ObjectPose,
        Topic::ObjectPoint,
        Topic::Landmarks,
        Topic::SystemAlerts,
    ];

    /// Route a payload to the topic that carries it. Sensor input has no
    /// topic.
    pub fn for_payload(payload: &EventPayload) -> Option<Self> {
        match payload {
            EventPayload::Detections(_) | EventPayload::PointCloud(_) => None,
            EventPayload::Estimates(_) => Some(Topic::SizeEstimates),
            EventPayload::Pose(_) => Some(Topic::ObjectPose),
            EventPayload::Point(_) => Some(Topic::ObjectPoint),
            EventPayload::Landmark(_) => Some(Topic::Landmarks),
            EventPayload::Fault { .. } => Some(Topic::SystemAlerts),
        }
    }

    /// The ROS topic this lane stands in for.
    ///
    /// Pose and point lanes are prefixes; the stream name carried in the
    /// payload is appended as the last path segment.
    pub fn ros_name(self) -> &'static str {
        match self {
            Topic::SizeEstimates => "/object_detection/size_estimates",
            Topic::ObjectPose => "/object_detection/object_pose",
            Topic::ObjectPoint => "/object_detection/object_point",
            Topic::Landmarks => "/object_positions_in",
            Topic::SystemAlerts => "/object_detection/alerts",
        }
    }
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    size_estimates: broadcast::Sender<Event>,
    object_pose: broadcast::Sender<Event>,
    object_point: broadcast::Sender<Event>,
    landmarks: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (size_estimates, _) = broadcast::channel(capacity);
        let (object_pose, _) = broadcast::channel(capacity);
        let (object_point, _) = broadcast::channel(capacity);
        let (landmarks, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        Self {
            size_estimates,
            object_pose,
            object_point,
            landmarks,
            system_alerts,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event, or
    /// [`LocError::Channel`] when nobody is listening on the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, LocError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| LocError::Channel(format!("no subscribers for topic {:?}", topic)))
    }

    /// Publish `event` on the topic implied by its payload.
    ///
    /// Sensor input is refused with [`LocError::Channel`].
    pub fn publish(&self, event: Event) -> Result<usize, LocError> {
        let topic = Topic::for_payload(&event.payload).ok_or_else(|| {
            LocError::Channel("sensor input is not carried on the output bus".to_string())
        })?;
        self.publish_to(topic, event)
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live receivers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::SizeEstimates => &self.size_estimates,
            Topic::ObjectPose => &self.object_pose,
            Topic::ObjectPoint => &self.object_point,
            Topic::Landmarks => &self.landmarks,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking receive, for draining in tests and synchronous callers.
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objloc_types::{Header, Landmark, Position};

    fn landmark_event(label: &str) -> Event {
        Event::new(
            "objloc-middleware::test",
            EventPayload::Landmark(Landmark {
                object_id: label.to_string(),
                position: Position::new(1.0, 2.0, 3.0),
            }),
        )
    }

    #[test]
    fn publish_no_subscribers_returns_error() {
        let bus = EventBus::default();
        let result = bus.publish_to(Topic::Landmarks, landmark_event("gate"));
        assert!(matches!(result, Err(LocError::Channel(_))));
    }

    #[tokio::test]
    async fn publish_routes_by_payload() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut landmarks = bus.subscribe_to(Topic::Landmarks);

        let event = landmark_event("gate");
        assert_eq!(bus.publish(event.clone())?, 1);

        let received = landmarks.recv().await?;
        assert_eq!(received.id, event.id);
        assert_eq!(landmarks.topic(), Topic::Landmarks);
        Ok(())
    }

    #[tokio::test]
    async fn topic_multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut sub1 = bus.subscribe_to(Topic::Landmarks);
        let mut sub2 = bus.subscribe_to(Topic::Landmarks);

        let event = landmark_event("buoy");
        bus.publish_to(Topic::Landmarks, event.clone())?;

        assert_eq!(sub1.recv().await?.id, event.id);
        assert_eq!(sub2.recv().await?.id, event.id);
        Ok(())
    }

    /// A subscriber on `ObjectPose` must not receive events published to
    /// `Landmarks`.
    #[tokio::test]
    async fn topic_subscriber_does_not_receive_other_topic_events() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut pose_sub = bus.subscribe_to(Topic::ObjectPose);
        let _landmark_sub = bus.subscribe_to(Topic::Landmarks);

        bus.publish_to(Topic::Landmarks, landmark_event("gate"))?;

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), pose_sub.recv()).await;
        assert!(result.is_err(), "ObjectPose subscriber must not receive a Landmark event");
        Ok(())
    }

    #[tokio::test]
    async fn topic_channel_lag_on_slow_subscriber() {
        let bus = EventBus::new(8);
        let mut slow_sub = bus.subscribe_to(Topic::Landmarks);

        for _ in 0..100 {
            let _ = bus.publish_to(Topic::Landmarks, landmark_event("flood"));
        }

        let result = slow_sub.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged error, got: {result:?}"
        );
    }

    #[test]
    fn payload_routing_table() {
        let fault = EventPayload::Fault {
            component: "segmenter".into(),
            message: "boom".into(),
        };
        assert_eq!(Topic::for_payload(&fault), Some(Topic::SystemAlerts));

        let cloud = EventPayload::PointCloud(objloc_types::PointCloudFrame::unorganized(
            Header::now("cam"),
            Vec::new(),
        ));
        assert_eq!(Topic::for_payload(&cloud), None);
        assert_eq!(Topic::Landmarks.ros_name(), "/object_positions_in");
    }

    #[test]
    fn sensor_input_is_not_published() {
        let bus = EventBus::default();
        let _alerts = bus.subscribe_to(Topic::SystemAlerts);
        let cloud = EventPayload::PointCloud(objloc_types::PointCloudFrame::unorganized(
            Header::now("cam"),
            vec![objloc_types::CloudPoint::new(0.0, 0.0, 1.0)],
        ));
        let result = bus.publish(Event::new("objloc-middleware::test", cloud));
        assert!(matches!(result, Err(LocError::Channel(_))));
    }

    #[test]
    fn subscriber_count_tracks_receivers() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(Topic::ObjectPose), 0);
        let rx = bus.subscribe_to(Topic::ObjectPose);
        assert_eq!(bus.subscriber_count(Topic::ObjectPose), 1);
        drop(rx);
        assert_eq!(bus.subscriber_count(Topic::ObjectPose), 0);
    }
}
