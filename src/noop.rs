// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Noop Queue
//!
//! Null adapter bound when no broker is configured. Every operation succeeds
//! without side effects and registered handlers are never called.

use crate::{
    errors::QueueError,
    message::{Handler, Message},
    topic::TopicOption,
    Queue,
};
use async_trait::async_trait;
use opentelemetry::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopQueue;

impl NoopQueue {
    pub fn new() -> Arc<NoopQueue> {
        Arc::new(NoopQueue)
    }
}

#[async_trait]
impl Queue for NoopQueue {
    async fn create_topic(&self, option: &TopicOption) -> Result<(), QueueError> {
        info!(option = ?option, "noop queue create_topic called");
        Ok(())
    }

    async fn publish(&self, _ctx: &Context, _option: &TopicOption, message: &Message) -> Result<(), QueueError> {
        info!(message = ?message, "noop queue publish called");
        Ok(())
    }

    async fn consume(
        &self,
        _ctx: &CancellationToken,
        _option: &TopicOption,
        _handler: Arc<dyn Handler>,
    ) -> Result<(), QueueError> {
        info!("noop queue consume called, handler will never run");
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        info!("noop queue close called");
        Ok(())
    }
}
