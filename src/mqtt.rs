/// Outbound message types and topic formatting.
///
/// The actual broker client lives outside this process; the bridge only
/// produces `MqttMessage` values and hands them to a `MessageSink`.
use log::info;

use crate::error::BridgeError;

/// Message payload: either a structured JSON document (aggregated
/// Domoticz updates, discovery announcements) or a single scalar value
/// (per-attribute updates).
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(serde_json::Value),
    Value(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Payload,
}

impl MqttMessage {
    pub fn new(topic: String, payload: Payload) -> Self {
        MqttMessage { topic, payload }
    }

    /// Wire representation of the payload.
    pub fn payload_string(&self) -> String {
        match &self.payload {
            Payload::Json(value) => value.to_string(),
            Payload::Value(value) => value.to_string(),
        }
    }
}

/// Builds topic strings rooted at the worker's topic prefix.
#[derive(Debug, Clone)]
pub struct TopicFormatter {
    prefix: String,
}

impl TopicFormatter {
    pub fn new(prefix: &str) -> Self {
        TopicFormatter {
            prefix: prefix.to_string(),
        }
    }

    /// Join the prefix and the given parts with `/`. No parts yields the
    /// bare prefix (the worker base topic).
    pub fn format_topic(&self, parts: &[&str]) -> String {
        let mut topic = self.prefix.clone();
        for part in parts {
            topic.push('/');
            topic.push_str(part);
        }
        topic
    }
}

/// Delivery seam towards the pub/sub broker.
pub trait MessageSink {
    fn deliver(
        &mut self,
        message: &MqttMessage,
    ) -> impl std::future::Future<Output = Result<(), BridgeError>>;
}

/// Sink that only logs deliveries; stands in for the external broker
/// client during development and in environments without a broker.
pub struct LogSink;

impl MessageSink for LogSink {
    async fn deliver(&mut self, message: &MqttMessage) -> Result<(), BridgeError> {
        info!("publish {} -> {}", message.topic, message.payload_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_topic_joins_parts() {
        let topics = TopicFormatter::new("mijialywsd");
        assert_eq!(topics.format_topic(&[]), "mijialywsd");
        assert_eq!(
            topics.format_topic(&["living", "temperature"]),
            "mijialywsd/living/temperature"
        );
    }

    #[test]
    fn scalar_payload_renders_plain() {
        let message = MqttMessage::new("t".into(), Payload::Value(41.6));
        assert_eq!(message.payload_string(), "41.6");
    }
}
