// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! Opens the single connection and channel a [`RabbitMqQueue`](super::RabbitMqQueue)
//! uses for every publish, declaration and consumer.

use crate::{config::RabbitMqConfig, errors::QueueError};
use lapin::{options::BasicQosOptions, types::LongString, uri::AMQPUri, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tracing::{debug, error};

/// Heartbeat applied when the URL does not set one, in seconds
pub const DEFAULT_HEARTBEAT: u16 = 10;

const CONNECTION_NAME: &str = "school-queue";

/// Parses the broker URL, filling in the default heartbeat.
pub(crate) fn amqp_uri(url: &str) -> Result<AMQPUri, QueueError> {
    let mut uri: AMQPUri = url.parse().map_err(|err: String| {
        error!(error = err, "invalid amqp url");
        QueueError::ConnectionError(err)
    })?;

    if uri.query.heartbeat.is_none() {
        uri.query.heartbeat = Some(DEFAULT_HEARTBEAT);
    }

    Ok(uri)
}

/// Closes a connection that will not be handed out.
async fn close_connection(conn: &Connection, reason: &str) {
    if let Err(err) = conn.close(0, reason).await {
        error!(error = err.to_string(), "error to close the connection");
    }
}

/// Connects to the broker and creates the shared channel.
///
/// When `prefetch_count` is positive it is applied as the channel QoS, so
/// a consumer never holds more unacknowledged deliveries than that.
pub async fn new_amqp_channel(cfg: &RabbitMqConfig) -> Result<(Arc<Connection>, Arc<Channel>), QueueError> {
    debug!("creating amqp connection...");
    let options = ConnectionProperties::default().with_connection_name(LongString::from(CONNECTION_NAME));
    let uri = amqp_uri(&cfg.url)?;

    let conn = match Connection::connect_uri(uri, options).await {
        Ok(c) => Ok(c),
        Err(err) => {
            error!(error = err.to_string(), "failure to connect");
            Err(QueueError::ConnectionError(err.to_string()))
        }
    }?;
    debug!("amqp connected");

    debug!("creating amqp channel...");
    let channel = match conn.create_channel().await {
        Ok(c) => c,
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            close_connection(&conn, "channel creation failed").await;
            return Err(QueueError::ChannelError);
        }
    };
    debug!("channel created");

    if cfg.prefetch_count > 0 {
        if let Err(err) = channel
            .basic_qos(cfg.prefetch_count, BasicQosOptions { global: false })
            .await
        {
            error!(error = err.to_string(), "failure to configure qos");
            close_connection(&conn, "qos configuration failed").await;
            return Err(QueueError::QoSDeclarationError(err.to_string()));
        }
        debug!(prefetch = cfg.prefetch_count, "qos configured");
    }

    Ok((Arc::new(conn), Arc::new(channel)))
}
