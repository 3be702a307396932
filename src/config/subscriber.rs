//! `[subscriber]` section: broker connection and subscription settings.
//!
//! These are file-level settings only. They are mapped onto
//! [`SubscriberBuilder`] by [`SubscriberSettings::to_builder`], and the
//! builder remains the authority on what a valid subscriber is; the checks
//! here only catch obvious mistakes early, with file-oriented messages.

use std::time::Duration;

use iotdatatunnel_mqtt::SubscriberBuilder;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// A subscription entry: either a bare topic filter or a table with its own
/// QoS.
///
/// ```toml
/// topics = ["sensors/+/telemetry", { topic = "alarms/#", qos = 2 }]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TopicSettings {
    Name(String),
    WithQos { topic: String, qos: u8 },
}

impl TopicSettings {
    pub fn topic(&self) -> &str {
        match self {
            TopicSettings::Name(topic) => topic,
            TopicSettings::WithQos { topic, .. } => topic,
        }
    }
}

/// Broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_backoff"))]
pub struct SubscriberSettings {
    /// `tcp://`, `mqtt://`, `ssl://`, `mqtts://` or bare `host[:port]`.
    #[validate(length(min = 1, message = "Broker URL must not be empty"))]
    pub broker_url: String,

    /// Client identifier. Generated when absent.
    pub client_id: Option<String>,

    #[validate(length(min = 1, message = "At least one topic must be configured"))]
    pub topics: Vec<TopicSettings>,

    /// Default QoS for topics without their own.
    #[validate(range(max = 2, message = "QoS must be 0, 1 or 2"))]
    pub qos: u8,

    #[validate(range(min = 1, message = "Initial delay must be at least 1 ms"))]
    pub initial_delay_ms: u64,

    pub max_delay_ms: u64,

    /// Keep-alive interval in seconds.
    #[validate(range(min = 5, message = "Keep alive must be at least 5 seconds"))]
    pub keep_alive: u64,
}

fn validate_backoff(settings: &SubscriberSettings) -> Result<(), ValidationError> {
    if settings.initial_delay_ms > settings.max_delay_ms {
        let mut err = ValidationError::new("invalid_backoff");
        err.message = Some(
            format!(
                "initial_delay_ms ({}) must not exceed max_delay_ms ({})",
                settings.initial_delay_ms, settings.max_delay_ms
            )
            .into(),
        );
        return Err(err);
    }
    Ok(())
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        Self {
            broker_url: "tcp://localhost:1883".to_string(),
            client_id: None,
            topics: Vec::new(),
            qos: 1,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            keep_alive: 60,
        }
    }
}

impl SubscriberSettings {
    /// Maps the settings onto a subscriber builder.
    pub fn to_builder(&self) -> SubscriberBuilder {
        let mut builder = SubscriberBuilder::new()
            .broker_url(&self.broker_url)
            .qos(self.qos)
            .initial_delay(Duration::from_millis(self.initial_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .keep_alive(Duration::from_secs(self.keep_alive));

        if let Some(client_id) = &self.client_id {
            builder = builder.client_id(client_id);
        }
        for entry in &self.topics {
            builder = match entry {
                TopicSettings::Name(topic) => builder.topic(topic),
                TopicSettings::WithQos { topic, qos } => builder.topic_with_qos(topic, *qos),
            };
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use iotdatatunnel_mqtt::QoS;

    use super::*;

    fn settings(toml_text: &str) -> SubscriberSettings {
        toml::from_str(toml_text).unwrap()
    }

    #[test]
    fn test_topics_accept_both_forms() {
        let settings = settings(
            r#"
            broker_url = "tcp://broker:1883"
            topics = ["a/+", { topic = "b/#", qos = 2 }]
            "#,
        );
        assert_eq!(
            settings.topics,
            vec![
                TopicSettings::Name("a/+".into()),
                TopicSettings::WithQos {
                    topic: "b/#".into(),
                    qos: 2
                },
            ]
        );
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_to_builder_carries_every_option() {
        let settings = settings(
            r#"
            broker_url = "ssl://broker"
            client_id = "edge-1"
            topics = ["a", { topic = "b", qos = 0 }]
            qos = 2
            initial_delay_ms = 250
            max_delay_ms = 4000
            keep_alive = 30
            "#,
        );

        let config = settings.to_builder().to_config().unwrap();
        assert_eq!(config.broker().port(), 8883);
        assert_eq!(config.client_id(), "edge-1");
        assert_eq!(config.topics()[0].qos, QoS::ExactlyOnce);
        assert_eq!(config.topics()[1].qos, QoS::AtMostOnce);
        assert_eq!(config.initial_delay(), Duration::from_millis(250));
        assert_eq!(config.max_delay(), Duration::from_secs(4));
        assert_eq!(config.keep_alive(), Duration::from_secs(30));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let no_topics = SubscriberSettings::default();
        assert!(no_topics.validate().is_err());

        let mut bad_qos = SubscriberSettings {
            topics: vec![TopicSettings::Name("t".into())],
            ..Default::default()
        };
        bad_qos.qos = 3;
        assert!(bad_qos.validate().is_err());

        let inverted = SubscriberSettings {
            topics: vec![TopicSettings::Name("t".into())],
            initial_delay_ms: 10,
            max_delay_ms: 1,
            ..Default::default()
        };
        let err = inverted.validate().unwrap_err();
        assert!(err.to_string().contains("initial_delay_ms"));

        let zero_delay = SubscriberSettings {
            topics: vec![TopicSettings::Name("t".into())],
            initial_delay_ms: 0,
            ..Default::default()
        };
        assert!(zero_delay.validate().is_err());
    }
}
