// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Queue Adapters
//!
//! `QueueError` covers every failure a caller can observe through the
//! [`Queue`](crate::Queue) contract, for both broker backends. Configuration
//! validation has its own [`ConfigError`](crate::config::ConfigError), which
//! converts into `QueueError` when it crosses the adapter boundary.

use crate::config::ConfigError;
use thiserror::Error;

/// Represents errors that can occur while provisioning, publishing to or
/// consuming from a broker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Invalid configuration detected while building an adapter
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Error establishing a connection to the broker
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// Error creating a channel from an established AMQP connection
    #[error("failure to create a channel")]
    ChannelError,

    /// The adapter received the topic option of another broker
    #[error("{0} topic option is required")]
    TopicOptionMismatch(&'static str),

    /// Kafka topic name is empty
    #[error("topic name is required")]
    TopicNameRequired,

    /// Kafka partition count is not positive
    #[error("number of partitions must be greater than zero, got {0}")]
    InvalidNumPartitions(i32),

    /// Kafka replication factor is not positive
    #[error("replication factor must be greater than zero, got {0}")]
    InvalidReplicationFactor(i32),

    /// One or more Kafka topics could not be created
    #[error("failure to create topics {0:?}")]
    TopicCreationFailed(Vec<String>),

    /// RabbitMQ exchange name is missing or empty
    #[error("exchange name is required")]
    ExchangeNameRequired,

    /// RabbitMQ queue name is missing or empty
    #[error("queue name is required")]
    QueueNameRequired,

    /// RabbitMQ routing key is missing or empty
    #[error("routing key is required")]
    RoutingKeyRequired,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// A consumer is already registered for the topic or queue
    #[error("topic `{0}` already consumed")]
    AlreadyConsumed(String),

    /// Error declaring a consumer on the broker
    #[error("failure to declare consumer `{0}`")]
    ConsumerDeclarationError(String),

    /// Error encoding a message key or payload
    #[error("failure to serialize message: {0}")]
    SerializationError(String),

    /// Error publishing a message
    #[error("failure to publish: {0}")]
    PublishingError(String),

    /// Error fetching a message from a reader
    #[error("failure to fetch message: {0}")]
    FetchError(String),

    /// Error committing an offset
    #[error("failure to commit message: {0}")]
    CommitError(String),

    /// Error acknowledging a delivery
    #[error("failure to ack message")]
    AckMessageError,

    /// Error rejecting a delivery
    #[error("failure to reject message")]
    RejectMessageError,

    /// Error republishing a delivery for another attempt
    #[error("failure to requeuing message")]
    RequeuingMessageError,

    /// Error releasing a connection, channel, producer or reader
    #[error("failure to close: {0}")]
    CloseError(String),
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::SerializationError(err.to_string())
    }
}
