// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Queue
//!
//! [`RabbitMqQueue`] implements the [`Queue`] contract over one AMQP
//! connection and one shared channel. Every queue it provisions gets a
//! dead-letter queue, and consumers retry by republishing with a
//! `retry-count` header until the broker dead-letters the delivery.

pub mod channel;
mod consumer;
pub mod headers;
pub mod topology;

use self::{
    consumer::{consumer_tag, QueueConsumer},
    topology::QueueTopology,
};
use crate::{
    config::{ConfigError, RabbitMqConfig},
    errors::QueueError,
    message::{Handler, Message},
    otel,
    topic::{required, RabbitTopicOption, TopicOption},
    Queue,
};
use async_trait::async_trait;
use lapin::{
    options::{BasicConsumeOptions, BasicPublishOptions},
    types::{FieldTable, ShortString},
    BasicProperties, Channel, Connection,
};
use opentelemetry::Context;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

const REPLY_SUCCESS: u16 = 200;

pub struct RabbitMqQueue {
    config: RabbitMqConfig,
    conn: Arc<Connection>,
    channel: Arc<Channel>,
    consumers: Mutex<HashMap<String, CancellationToken>>,
    closed: AtomicBool,
}

impl RabbitMqQueue {
    /// Connects to the broker and opens the shared channel.
    pub async fn new(config: RabbitMqConfig) -> Result<Arc<RabbitMqQueue>, QueueError> {
        if config.url.is_empty() {
            return Err(ConfigError::MissingField("rabbitmq.url").into());
        }

        let (conn, channel) = channel::new_amqp_channel(&config).await?;

        Ok(Arc::new(RabbitMqQueue {
            config,
            conn,
            channel,
            consumers: Mutex::new(HashMap::default()),
            closed: AtomicBool::new(false),
        }))
    }

    fn consumers(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.consumers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Validates the option handed to `create_topic`.
pub(crate) fn queue_topology<'a>(dead_letter_exchange: &'a str, opt: &'a RabbitTopicOption) -> Result<QueueTopology<'a>, QueueError> {
    Ok(QueueTopology {
        dead_letter_exchange,
        exchange: required(&opt.exchange_name, QueueError::ExchangeNameRequired)?,
        queue: required(&opt.queue_name, QueueError::QueueNameRequired)?,
        routing_key: required(&opt.routing_key, QueueError::RoutingKeyRequired)?,
        kind: opt.kind.unwrap_or_default(),
    })
}

/// Exchange and routing key a message is published with. An absent exchange
/// publishes through the default exchange.
pub(crate) fn publish_target(opt: &RabbitTopicOption) -> Result<(&str, &str), QueueError> {
    let routing_key = required(&opt.routing_key, QueueError::RoutingKeyRequired)?;
    Ok((opt.exchange_name.as_deref().unwrap_or_default(), routing_key))
}

pub(crate) fn publish_properties(message_id: &str, ctx: &Context, message: &Message) -> BasicProperties {
    let mut meta = message.meta.clone();
    otel::inject(ctx, &mut meta);

    BasicProperties::default()
        .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
        .with_message_id(ShortString::from(message_id))
        .with_headers(headers::to_field_table(&meta))
}

/// Registers a consumer token for `queue`. An entry whose token was already
/// cancelled belongs to a stopped consumer and is replaced.
fn reserve(
    consumers: &mut HashMap<String, CancellationToken>,
    queue: &str,
    ctx: &CancellationToken,
) -> Result<CancellationToken, QueueError> {
    if consumers.get(queue).is_some_and(|token| !token.is_cancelled()) {
        return Err(QueueError::AlreadyConsumed(queue.to_owned()));
    }

    let cancel = ctx.child_token();
    consumers.insert(queue.to_owned(), cancel.clone());
    Ok(cancel)
}

#[async_trait]
impl Queue for RabbitMqQueue {
    async fn create_topic(&self, option: &TopicOption) -> Result<(), QueueError> {
        let opt = option.as_rabbit()?;
        let topology = queue_topology(&self.config.dead_letter_exchange, opt).map_err(|err| {
            error!(error = err.to_string(), "invalid rabbitmq topic option");
            err
        })?;

        topology::install(&self.channel, &topology.declarations()).await?;

        info!(
            exchange = topology.exchange,
            queue = topology.queue,
            routing_key = topology.routing_key,
            kind = topology.kind.as_str(),
            "topic created"
        );
        Ok(())
    }

    async fn publish(&self, ctx: &Context, option: &TopicOption, message: &Message) -> Result<(), QueueError> {
        let opt = option.as_rabbit()?;
        let (exchange, routing_key) = publish_target(opt)?;

        let body = serde_json::to_vec(&message.data).map_err(|err| {
            error!(error = err.to_string(), "failure to serialize message data");
            QueueError::from(err)
        })?;
        let message_id = message.id_or_new();

        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &body,
                publish_properties(&message_id, ctx, message),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), exchange, routing_key, message_id, "error publishing message");
                QueueError::PublishingError(err.to_string())
            })?;

        info!(exchange, routing_key, message_id, "message published");
        Ok(())
    }

    async fn consume(
        &self,
        ctx: &CancellationToken,
        option: &TopicOption,
        handler: Arc<dyn Handler>,
    ) -> Result<(), QueueError> {
        let opt = option.as_rabbit()?;
        let queue = required(&opt.queue_name, QueueError::QueueNameRequired)?.to_owned();

        let cancel = reserve(&mut self.consumers(), &queue, ctx)?;

        let tag = consumer_tag(&queue);
        let consumer = match self
            .channel
            .basic_consume(
                &queue,
                &tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Ok(c) => c,
            Err(err) => {
                error!(error = err.to_string(), queue, "failure to create the consumer");
                self.consumers().remove(&queue);
                return Err(QueueError::ConsumerDeclarationError(queue));
            }
        };

        info!(queue, tag, "starting consumer");
        let queue_consumer = QueueConsumer {
            channel: self.channel.clone(),
            queue,
            tag,
            max_try_times: self.config.max_try_times,
            handler,
            cancel,
        };
        tokio::spawn(queue_consumer.run(consumer));

        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        let tokens: Vec<CancellationToken> = self.consumers().drain().map(|(_, token)| token).collect();
        for token in tokens {
            token.cancel();
        }

        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut first_err = None;

        if let Err(err) = self.channel.close(REPLY_SUCCESS, "closing").await {
            error!(error = err.to_string(), "error closing channel");
            first_err = Some(QueueError::CloseError(err.to_string()));
        }

        if let Err(err) = self.conn.close(REPLY_SUCCESS, "closing").await {
            error!(error = err.to_string(), "error closing connection");
            first_err.get_or_insert(QueueError::CloseError(err.to_string()));
        }

        match first_err {
            Some(err) => Err(err),
            None => {
                info!("rabbitmq connection closed");
                Ok(())
            }
        }
    }
}
