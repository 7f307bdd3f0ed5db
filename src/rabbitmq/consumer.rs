// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Consumer
//!
//! Deliveries are handled one at a time with manual acknowledgement. The
//! handler response decides what happens to each delivery:
//!
//! - `Success` is acknowledged.
//! - `Retry` is republished to the same queue with its `retry-count` header
//!   incremented and the original acknowledged, until the counter reaches
//!   the configured maximum. The delivery is then rejected without requeue
//!   and the broker dead-letters it.
//! - anything else is acknowledged.

use super::headers::{self, RETRY_COUNT_HEADER};
use crate::{
    errors::QueueError,
    message::{decode_payload, Handler, Message, Response},
    otel,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{BasicAckOptions, BasicCancelOptions, BasicPublishOptions, BasicRejectOptions},
    protocol::basic::AMQPProperties,
    BasicProperties, Channel, Consumer,
};
use opentelemetry::{
    global,
    trace::{Span, Status},
};
use std::{
    borrow::Cow,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// What to do with a delivery once the handler answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    Ack,
    /// Republish with the given counter, then ack the original
    Republish { retry_count: i64 },
    /// Reject without requeue so the broker dead-letters it
    Reject,
}

pub(crate) fn disposition(response: Response, retry_count: i64, max_try_times: i64) -> Disposition {
    match response {
        Response::Retry if retry_count < max_try_times => Disposition::Republish {
            retry_count: retry_count + 1,
        },
        Response::Retry => Disposition::Reject,
        Response::Success | Response::Failed => Disposition::Ack,
    }
}

/// Builds the handler view of a delivery.
pub(crate) fn to_message(properties: &AMQPProperties, data: &[u8]) -> Message {
    Message {
        id: properties.message_id().as_ref().map(|id| id.as_str().to_owned()),
        key: serde_json::Value::Null,
        data: decode_payload(Some(data)),
        meta: headers::to_meta(properties.headers().as_ref()),
    }
}

/// Broker operations a consumer needs to settle its deliveries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait DeliveryChannel: Send + Sync {
    /// Publishes `data` back to `queue` through the default exchange.
    async fn republish(&self, queue: &str, data: &[u8], properties: BasicProperties) -> Result<(), QueueError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), QueueError>;

    /// Rejects without requeue so the broker dead-letters the delivery.
    async fn reject(&self, delivery_tag: u64) -> Result<(), QueueError>;

    async fn cancel(&self, consumer_tag: &str) -> Result<(), QueueError>;
}

#[async_trait]
impl DeliveryChannel for Channel {
    async fn republish(&self, queue: &str, data: &[u8], properties: BasicProperties) -> Result<(), QueueError> {
        self.basic_publish("", queue, BasicPublishOptions::default(), data, properties)
            .await
            .map_err(|err| {
                error!(error = err.to_string(), queue, header = RETRY_COUNT_HEADER, "error whiling requeuing");
                QueueError::RequeuingMessageError
            })?;
        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), QueueError> {
        self.basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), delivery_tag, "error whiling ack msg");
                QueueError::AckMessageError
            })
    }

    async fn reject(&self, delivery_tag: u64) -> Result<(), QueueError> {
        self.basic_reject(delivery_tag, BasicRejectOptions { requeue: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), delivery_tag, "error whiling reject msg");
                QueueError::RejectMessageError
            })
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), QueueError> {
        self.basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|err| QueueError::CloseError(err.to_string()))
    }
}

pub(crate) struct QueueConsumer {
    pub(crate) channel: Arc<dyn DeliveryChannel>,
    pub(crate) queue: String,
    pub(crate) tag: String,
    pub(crate) max_try_times: i64,
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) cancel: CancellationToken,
}

impl QueueConsumer {
    /// Drives the delivery stream until cancelled or closed by the broker.
    pub(crate) async fn run(self, mut consumer: Consumer) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!(queue = self.queue, "stopping consumer");
                    break;
                }
                next = consumer.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    if let Err(err) = self
                        .consume(delivery.delivery_tag, &delivery.properties, &delivery.data)
                        .await
                    {
                        error!(error = err.to_string(), queue = self.queue, "error consume msg");
                    }
                }
                Some(Err(err)) => error!(error = err.to_string(), queue = self.queue, "errors consume msg"),
                None => {
                    warn!(queue = self.queue, "delivery stream closed");
                    return;
                }
            }
        }

        if let Err(err) = self.channel.cancel(&self.tag).await {
            debug!(error = err.to_string(), queue = self.queue, "failure to cancel consumer");
        }
    }

    pub(crate) async fn consume(
        &self,
        delivery_tag: u64,
        properties: &AMQPProperties,
        data: &[u8],
    ) -> Result<(), QueueError> {
        if self.cancel.is_cancelled() {
            // left unacked, the broker redelivers it once the channel closes
            return Ok(());
        }

        let message = to_message(properties, data);
        let message_id = message.id.clone().unwrap_or_default();
        let (ctx, mut span) = otel::new_span(&message.meta, &global::tracer("amqp consumer"), &self.queue);

        debug!(queue = self.queue, message_id, "received message");

        let (response, err) = self.handler.handle(&ctx, &message).await;
        if let Some(err) = err {
            error!(error = err.to_string(), queue = self.queue, message_id, "error handling message");
            span.record_error(&*err);
        }

        let retry_count = headers::retry_count(properties.headers().as_ref());

        match disposition(response, retry_count, self.max_try_times) {
            Disposition::Ack => {
                span.set_status(Status::Ok);
                self.channel.ack(delivery_tag).await
            }
            Disposition::Republish { retry_count } => {
                warn!(queue = self.queue, message_id, retry_count, "error whiling handling msg, requeuing for latter");
                self.channel
                    .republish(&self.queue, data, republish_properties(properties, retry_count))
                    .await
                    .map_err(|err| {
                        span.set_status(Status::Error {
                            description: Cow::from("error to requeuing msg"),
                        });
                        err
                    })?;
                self.channel.ack(delivery_tag).await
            }
            Disposition::Reject => {
                warn!(queue = self.queue, message_id, retry_count, "too many attempts, sending to dlq");
                span.set_status(Status::Error {
                    description: Cow::from("msg was sent to dlq"),
                });
                self.channel.reject(delivery_tag).await
            }
        }
    }
}

/// Properties of the retry copy: original headers with the new counter,
/// the original content type and a fresh timestamp.
fn republish_properties(received: &AMQPProperties, retry_count: i64) -> BasicProperties {
    let properties = BasicProperties::default()
        .with_headers(headers::with_retry_count(received.headers().as_ref(), retry_count))
        .with_timestamp(unix_now());

    match received.content_type() {
        Some(content_type) => properties.with_content_type(content_type.clone()),
        None => properties,
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Consumer tag registered for `queue`, unique per registration.
pub(crate) fn consumer_tag(queue: &str) -> String {
    format!("{queue}-{}", uuid::Uuid::new_v4())
}
