// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # School Queue
//!
//! Message-queue core of the school backend: one [`Queue`] contract with
//! Kafka, RabbitMQ and no-op implementations, selected from configuration
//! through [`new_queue`].
//!
//! ```no_run
//! use school_queue::{config::QueueConfig, new_queue, KafkaTopicOption, Message, TopicOption};
//!
//! # async fn run(config: QueueConfig) -> Result<(), Box<dyn std::error::Error>> {
//! let queue = new_queue(config).await?;
//! let topic: TopicOption = KafkaTopicOption::new("emails").partitions(3).replication_factor(1).into();
//!
//! queue.create_topic(&topic).await?;
//! queue
//!     .publish(&opentelemetry::Context::current(), &topic, &Message::new("student-1", "welcome")?)
//!     .await?;
//! queue.close().await?;
//! # Ok(())
//! # }
//! ```

mod otel;

pub mod config;
pub mod errors;
pub mod kafka;
pub mod message;
pub mod noop;
pub mod rabbitmq;
pub mod topic;

pub use config::{QueueConfig, QueueSettings};
pub use errors::QueueError;
pub use kafka::KafkaQueue;
pub use message::{Handler, HandlerError, HandlerOutput, Message, Response};
pub use noop::NoopQueue;
pub use rabbitmq::RabbitMqQueue;
pub use topic::{ExchangeKind, KafkaTopicOption, RabbitTopicOption, TopicOption};

use async_trait::async_trait;
use opentelemetry::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Broker independent queue contract.
///
/// Every call receives the [`TopicOption`] variant of the broker behind the
/// implementation; the other variant is rejected with
/// [`QueueError::TopicOptionMismatch`].
#[async_trait]
pub trait Queue: Send + Sync {
    /// Provisions the topic, or the exchange and queue pair with its
    /// dead-letter queue.
    async fn create_topic(&self, option: &TopicOption) -> Result<(), QueueError>;

    /// Publishes `message`, propagating the trace context of `ctx` in its headers.
    async fn publish(&self, ctx: &Context, option: &TopicOption, message: &Message) -> Result<(), QueueError>;

    /// Registers `handler` for the topic and returns once the background
    /// consumer is running. Cancelling `ctx` stops that consumer.
    async fn consume(
        &self,
        ctx: &CancellationToken,
        option: &TopicOption,
        handler: Arc<dyn Handler>,
    ) -> Result<(), QueueError>;

    /// Stops every consumer and releases broker resources.
    async fn close(&self) -> Result<(), QueueError>;
}

/// Builds the queue selected by `config`.
pub async fn new_queue(config: QueueConfig) -> Result<Arc<dyn Queue>, QueueError> {
    match config {
        QueueConfig::Kafka(cfg) => {
            info!(brokers = cfg.bootstrap_servers(), "using kafka queue");
            let queue: Arc<dyn Queue> = KafkaQueue::new(cfg)?;
            Ok(queue)
        }
        QueueConfig::RabbitMq(cfg) => {
            info!("using rabbitmq queue");
            let queue: Arc<dyn Queue> = RabbitMqQueue::new(cfg).await?;
            Ok(queue)
        }
        QueueConfig::Noop => {
            info!("using noop queue");
            let queue: Arc<dyn Queue> = NoopQueue::new();
            Ok(queue)
        }
    }
}
