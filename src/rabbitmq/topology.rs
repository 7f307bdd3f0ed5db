// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology
//!
//! `create_topic` provisions a queue together with its dead-letter side:
//!
//! 1. the dead-letter exchange (direct, durable)
//! 2. the `<queue>.dlq` queue, bound to it with routing key `<queue>.dlq`
//! 3. the primary exchange (fanout unless told otherwise, durable)
//! 4. the primary queue, whose dead-letter arguments point at the DLQ
//! 5. the binding of the primary queue to the primary exchange
//!
//! The steps are built as a plain list of [`Declaration`]s and installed in
//! order, so a queue never exists without its DLQ.

use crate::{errors::QueueError, topic::ExchangeKind};
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongString, ShortString},
    Channel,
};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Constant for the header field used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Constant for the header field used to specify a dead letter routing key
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        }
    }
}

/// Name of the dead-letter queue paired with `queue`.
pub fn dlq_name(queue: &str) -> String {
    format!("{queue}.dlq")
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Declaration {
    Exchange {
        name: String,
        kind: ExchangeKind,
    },
    Queue {
        name: String,
        args: BTreeMap<ShortString, AMQPValue>,
    },
    Bind {
        queue: String,
        exchange: String,
        routing_key: String,
    },
}

/// Addressing of one queue to provision.
pub(crate) struct QueueTopology<'a> {
    pub(crate) dead_letter_exchange: &'a str,
    pub(crate) exchange: &'a str,
    pub(crate) kind: ExchangeKind,
    pub(crate) queue: &'a str,
    pub(crate) routing_key: &'a str,
}

impl QueueTopology<'_> {
    pub(crate) fn declarations(&self) -> Vec<Declaration> {
        let dlq = dlq_name(self.queue);

        let mut args = BTreeMap::new();
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            AMQPValue::LongString(LongString::from(self.dead_letter_exchange)),
        );
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            AMQPValue::LongString(LongString::from(dlq.clone())),
        );

        vec![
            Declaration::Exchange {
                name: self.dead_letter_exchange.to_owned(),
                kind: ExchangeKind::Direct,
            },
            Declaration::Queue {
                name: dlq.clone(),
                args: BTreeMap::new(),
            },
            Declaration::Bind {
                queue: dlq.clone(),
                exchange: self.dead_letter_exchange.to_owned(),
                routing_key: dlq,
            },
            Declaration::Exchange {
                name: self.exchange.to_owned(),
                kind: self.kind,
            },
            Declaration::Queue {
                name: self.queue.to_owned(),
                args,
            },
            Declaration::Bind {
                queue: self.queue.to_owned(),
                exchange: self.exchange.to_owned(),
                routing_key: self.routing_key.to_owned(),
            },
        ]
    }
}

/// Installs the declarations in order, stopping at the first failure.
pub(crate) async fn install(channel: &Channel, declarations: &[Declaration]) -> Result<(), QueueError> {
    for declaration in declarations {
        match declaration {
            Declaration::Exchange { name, kind } => {
                debug!("creating exchange: {}", name);
                channel
                    .exchange_declare(
                        name,
                        (*kind).into(),
                        ExchangeDeclareOptions {
                            durable: true,
                            ..ExchangeDeclareOptions::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|err| {
                        error!(error = err.to_string(), name, "error to declare the exchange");
                        QueueError::DeclareExchangeError(name.clone())
                    })?;
            }
            Declaration::Queue { name, args } => {
                debug!("creating queue: {}", name);
                channel
                    .queue_declare(
                        name,
                        QueueDeclareOptions {
                            durable: true,
                            ..QueueDeclareOptions::default()
                        },
                        FieldTable::from(args.clone()),
                    )
                    .await
                    .map_err(|err| {
                        error!(error = err.to_string(), name, "error to declare the queue");
                        QueueError::DeclareQueueError(name.clone())
                    })?;
            }
            Declaration::Bind {
                queue,
                exchange,
                routing_key,
            } => {
                debug!(
                    "binding queue: {} to the exchange: {} with the key: {}",
                    queue, exchange, routing_key
                );
                channel
                    .queue_bind(
                        queue,
                        exchange,
                        routing_key,
                        QueueBindOptions { nowait: false },
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|err| {
                        error!(error = err.to_string(), "error to bind queue to exchange");
                        QueueError::BindingExchangeToQueueError(exchange.clone(), queue.clone())
                    })?;
            }
        }
    }

    Ok(())
}
