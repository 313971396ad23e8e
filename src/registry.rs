//! Topic subscription registry
//!
//! Maps the single active device to its wire topics and owns the consumer
//! registered for it. The registry decides which frames go on the wire when a
//! device is subscribed, switched, dropped or re-armed after a reconnect, and
//! filters inbound events so nothing reaches a consumer after it was replaced.

use crate::error::ServiceError;
use crate::model::SensorEvent;
use crate::observability::metrics::metrics;
use crate::protocol::frames::Frame;
use crate::protocol::topics::{validate_segment, TopicScheme};
use crate::transport::Transport;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Consumer channel registered with a subscription
pub type EventSink = mpsc::UnboundedSender<SensorEvent>;

/// Result of [`SubscriptionRegistry::subscribe_device`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// Subscribe frames went out for every topic
    Subscribed { topics: Vec<String> },
    /// Link is down; the next `Connected` transition subscribes
    Pending,
    /// Device was already subscribed; only the consumer changed
    ConsumerReplaced,
}

#[derive(Debug)]
struct Subscription {
    device_id: String,
    topics: Vec<String>,
    consumer: EventSink,
    live: bool,
}

#[derive(Debug)]
pub struct SubscriptionRegistry {
    scheme: TopicScheme,
    active: Option<Subscription>,
    /// Wire topic to device for every subscribe frame sent on the current link
    wire: HashMap<String, String>,
    link_up: bool,
}

impl SubscriptionRegistry {
    pub fn new(scheme: TopicScheme) -> Self {
        Self {
            scheme,
            active: None,
            wire: HashMap::new(),
            link_up: false,
        }
    }

    pub fn scheme(&self) -> &TopicScheme {
        &self.scheme
    }

    pub fn active_device(&self) -> Option<&str> {
        self.active.as_ref().map(|s| s.device_id.as_str())
    }

    /// True when a subscription exists but its frames are not on the wire
    pub fn is_pending(&self) -> bool {
        self.active.as_ref().is_some_and(|s| !s.live)
    }

    pub fn device_for_topic(&self, topic: &str) -> Option<&str> {
        self.wire.get(topic).map(String::as_str)
    }

    pub fn wire_topic_count(&self) -> usize {
        self.wire.len()
    }

    /// Subscribe to `device_id`, replacing any other device first
    pub fn subscribe_device(
        &mut self,
        device_id: &str,
        consumer: EventSink,
        transport: &dyn Transport,
    ) -> Result<SubscribeOutcome, ServiceError> {
        validate_segment(device_id)
            .map_err(|_| ServiceError::InvalidDevice(device_id.to_string()))?;

        if let Some(active) = self.active.as_mut() {
            if active.device_id == device_id {
                debug!(device_id, "Device already subscribed, replacing consumer");
                active.consumer = consumer;
                if active.live || !self.link_up || !transport.is_connected() {
                    return Ok(SubscribeOutcome::ConsumerReplaced);
                }
                // Earlier frames were refused; finish putting the topics on the wire
                return Ok(self.send_pending_frames(device_id, transport));
            }
        }

        if let Some(previous) = self.active_device().map(str::to_string) {
            info!(from = %previous, to = %device_id, "Switching device subscription");
            self.unsubscribe_device(&previous, transport);
        }

        self.active = Some(Subscription {
            device_id: device_id.to_string(),
            topics: self.scheme.device_topics(device_id),
            consumer,
            live: false,
        });

        if !self.link_up || !transport.is_connected() {
            info!(device_id, "Link down, subscription pending");
            return Ok(SubscribeOutcome::Pending);
        }

        Ok(self.send_pending_frames(device_id, transport))
    }

    fn send_pending_frames(
        &mut self,
        device_id: &str,
        transport: &dyn Transport,
    ) -> SubscribeOutcome {
        if self.send_subscribe_frames(transport) {
            let topics = self
                .active
                .as_ref()
                .map(|s| s.topics.clone())
                .unwrap_or_default();
            info!(device_id, topics = topics.len(), "Subscribed device topics");
            SubscribeOutcome::Subscribed { topics }
        } else {
            SubscribeOutcome::Pending
        }
    }

    /// Drop the subscription for `device_id`; anything else is a no-op
    ///
    /// Returns true when a subscription was removed.
    pub fn unsubscribe_device(&mut self, device_id: &str, transport: &dyn Transport) -> bool {
        if self.active_device() != Some(device_id) {
            debug!(device_id, "Unsubscribe for inactive device ignored");
            return false;
        }
        let Some(subscription) = self.active.take() else {
            return false;
        };

        // Every topic that reached the broker, including a partial subscribe
        let on_wire: Vec<&String> = subscription
            .topics
            .iter()
            .filter(|topic| self.wire.get(*topic).is_some_and(|owner| owner == device_id))
            .collect();
        if self.link_up && !on_wire.is_empty() {
            let sent = on_wire
                .iter()
                .filter(|topic| transport.send(&Frame::unsubscribe(topic.as_str())))
                .count();
            metrics().unsubscribe_frames_sent(sent);
            if sent < on_wire.len() {
                debug!(device_id, sent, "Some unsubscribe frames were not sent");
            }
        }

        for topic in &subscription.topics {
            self.wire.remove(topic);
        }
        info!(device_id, "Unsubscribed device");
        true
    }

    /// Link came up: put the active subscription on the wire exactly once
    ///
    /// Returns the number of subscribe frames sent.
    pub fn rearm(&mut self, transport: &dyn Transport) -> usize {
        self.link_up = true;
        let Some(subscription) = self.active.as_ref() else {
            return 0;
        };
        if subscription.live {
            return 0;
        }
        let device_id = subscription.device_id.clone();
        let count = subscription.topics.len();
        if self.send_subscribe_frames(transport) {
            metrics().subscription_rearmed();
            info!(device_id = %device_id, topics = count, "Re-armed subscription");
            count
        } else {
            0
        }
    }

    /// Link went down: forget the wire state, keep the desired subscription
    pub fn on_connection_lost(&mut self) {
        self.link_up = false;
        self.wire.clear();
        if let Some(subscription) = self.active.as_mut() {
            subscription.live = false;
        }
    }

    /// Consumer for `event`, or `None` when it must be dropped
    pub fn route(&self, event: &SensorEvent) -> Option<&EventSink> {
        let subscription = self.active.as_ref()?;
        if subscription.device_id != event.device_id {
            return None;
        }
        if !self
            .scheme
            .belongs_to(&event.source_topic, &subscription.device_id)
        {
            return None;
        }
        Some(&subscription.consumer)
    }

    /// Send one subscribe frame per topic of the active subscription
    fn send_subscribe_frames(&mut self, transport: &dyn Transport) -> bool {
        let Some(subscription) = self.active.as_mut() else {
            return false;
        };

        let mut sent = 0;
        for topic in &subscription.topics {
            if self.wire.contains_key(topic) {
                continue;
            }
            if !transport.send(&Frame::subscribe(topic.as_str())) {
                break;
            }
            self.wire
                .insert(topic.clone(), subscription.device_id.clone());
            sent += 1;
        }
        metrics().subscribe_frames_sent(sent);

        subscription.live = subscription
            .topics
            .iter()
            .all(|topic| self.wire.contains_key(topic));
        if !subscription.live {
            warn!(
                device_id = %subscription.device_id,
                sent,
                "Subscribe frames could not all be sent, waiting for reconnect"
            );
        }
        subscription.live
    }
}
