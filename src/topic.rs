// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topic Addressing
//!
//! Each broker addresses messages differently: Kafka by topic, RabbitMQ by
//! exchange, queue and routing key. [`TopicOption`] carries exactly one of
//! the two shapes per call.

use crate::errors::QueueError;

/// Represents the RabbitMQ exchange types a topic can be declared with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExchangeKind {
    #[default]
    Fanout,
    Direct,
    Topic,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Direct => "direct",
            ExchangeKind::Topic => "topic",
        }
    }
}

/// RabbitMQ addressing: where to publish and which queue to consume.
///
/// Built with chained setters:
/// ```
/// use school_queue::{ExchangeKind, RabbitTopicOption};
///
/// let opt = RabbitTopicOption::new()
///     .exchange("school")
///     .queue("emails")
///     .routing_key("emails.send")
///     .kind(ExchangeKind::Direct);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RabbitTopicOption {
    pub exchange_name: Option<String>,
    pub queue_name: Option<String>,
    pub routing_key: Option<String>,
    pub kind: Option<ExchangeKind>,
}

impl RabbitTopicOption {
    pub fn new() -> RabbitTopicOption {
        RabbitTopicOption::default()
    }

    pub fn exchange(mut self, name: impl Into<String>) -> Self {
        self.exchange_name = Some(name.into());
        self
    }

    pub fn queue(mut self, name: impl Into<String>) -> Self {
        self.queue_name = Some(name.into());
        self
    }

    pub fn routing_key(mut self, key: impl Into<String>) -> Self {
        self.routing_key = Some(key.into());
        self
    }

    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// Kafka addressing plus the provisioning parameters used by `create_topic`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KafkaTopicOption {
    pub topic_name: String,
    pub num_partitions: i32,
    pub replication_factor: i32,
}

impl KafkaTopicOption {
    pub fn new(topic_name: impl Into<String>) -> KafkaTopicOption {
        KafkaTopicOption {
            topic_name: topic_name.into(),
            num_partitions: 0,
            replication_factor: 0,
        }
    }

    pub fn partitions(mut self, num_partitions: i32) -> Self {
        self.num_partitions = num_partitions;
        self
    }

    pub fn replication_factor(mut self, replication_factor: i32) -> Self {
        self.replication_factor = replication_factor;
        self
    }

    /// Checks the parameters required to create the topic.
    pub(crate) fn validate_for_creation(&self) -> Result<(), QueueError> {
        if self.topic_name.is_empty() {
            return Err(QueueError::TopicNameRequired);
        }
        if self.num_partitions <= 0 {
            return Err(QueueError::InvalidNumPartitions(self.num_partitions));
        }
        if self.replication_factor <= 0 {
            return Err(QueueError::InvalidReplicationFactor(self.replication_factor));
        }
        Ok(())
    }
}

/// Broker specific addressing handed to every [`Queue`](crate::Queue) call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicOption {
    Rabbit(RabbitTopicOption),
    Kafka(KafkaTopicOption),
}

impl TopicOption {
    pub(crate) fn as_kafka(&self) -> Result<&KafkaTopicOption, QueueError> {
        match self {
            TopicOption::Kafka(opt) => Ok(opt),
            TopicOption::Rabbit(_) => Err(QueueError::TopicOptionMismatch("kafka")),
        }
    }

    pub(crate) fn as_rabbit(&self) -> Result<&RabbitTopicOption, QueueError> {
        match self {
            TopicOption::Rabbit(opt) => Ok(opt),
            TopicOption::Kafka(_) => Err(QueueError::TopicOptionMismatch("rabbitmq")),
        }
    }
}

impl From<KafkaTopicOption> for TopicOption {
    fn from(opt: KafkaTopicOption) -> Self {
        TopicOption::Kafka(opt)
    }
}

impl From<RabbitTopicOption> for TopicOption {
    fn from(opt: RabbitTopicOption) -> Self {
        TopicOption::Rabbit(opt)
    }
}

/// Returns the value when present and non-empty.
pub(crate) fn required<'a>(value: &'a Option<String>, err: QueueError) -> Result<&'a str, QueueError> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_validate_kafka_topic_creation_parameters() {
        assert_eq!(
            KafkaTopicOption::new("").partitions(1).replication_factor(1).validate_for_creation(),
            Err(QueueError::TopicNameRequired)
        );
        assert_eq!(
            KafkaTopicOption::new("orders").replication_factor(1).validate_for_creation(),
            Err(QueueError::InvalidNumPartitions(0))
        );
        assert_eq!(
            KafkaTopicOption::new("orders").partitions(3).replication_factor(-1).validate_for_creation(),
            Err(QueueError::InvalidReplicationFactor(-1))
        );
        assert!(KafkaTopicOption::new("orders")
            .partitions(3)
            .replication_factor(1)
            .validate_for_creation()
            .is_ok());
    }

    #[test]
    fn should_reject_the_other_broker_variant() {
        let kafka: TopicOption = KafkaTopicOption::new("orders").into();
        let rabbit: TopicOption = RabbitTopicOption::new().queue("orders").into();

        assert!(kafka.as_kafka().is_ok());
        assert_eq!(kafka.as_rabbit(), Err(QueueError::TopicOptionMismatch("rabbitmq")));
        assert!(rabbit.as_rabbit().is_ok());
        assert_eq!(rabbit.as_kafka(), Err(QueueError::TopicOptionMismatch("kafka")));
    }

    #[test]
    fn should_treat_empty_strings_as_missing() {
        assert_eq!(required(&Some("x".into()), QueueError::QueueNameRequired), Ok("x"));
        assert_eq!(
            required(&Some(String::new()), QueueError::QueueNameRequired),
            Err(QueueError::QueueNameRequired)
        );
        assert_eq!(required(&None, QueueError::RoutingKeyRequired), Err(QueueError::RoutingKeyRequired));
    }

    #[test]
    fn should_default_exchange_kind_to_fanout() {
        assert_eq!(ExchangeKind::default(), ExchangeKind::Fanout);
        assert_eq!(ExchangeKind::Topic.as_str(), "topic");
    }
}
