// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Kafka Queue
//!
//! [`KafkaQueue`] implements the [`Queue`] contract over Kafka. Publishing
//! goes through one shared writer. Each consumed topic gets its own reader
//! and consumer task, tracked in a registry owned by the queue instance so
//! independent queues never share consumers.

pub mod client;
mod consumer;
#[cfg(test)]
mod testing;

use self::{
    client::{AdminTopics, OutgoingRecord, ProducerWriter, ReaderFactory, RecordReader, RecordWriter, StreamReaderFactory, TopicAdmin},
    consumer::TopicConsumer,
};
use crate::{
    config::{ConfigError, KafkaConfig},
    errors::QueueError,
    message::{Handler, Message, MESSAGE_ID_HEADER},
    otel,
    topic::TopicOption,
    Queue,
};
use async_trait::async_trait;
use opentelemetry::Context;
use std::{
    collections::HashMap,
    slice,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Default)]
struct Registry {
    readers: HashMap<String, Arc<dyn RecordReader>>,
    cancels: HashMap<String, CancellationToken>,
}

pub struct KafkaQueue {
    config: KafkaConfig,
    writer: Arc<dyn RecordWriter>,
    readers: Arc<dyn ReaderFactory>,
    admin: Arc<dyn TopicAdmin>,
    registry: Mutex<Registry>,
}

impl KafkaQueue {
    /// Connects the producer and admin client described by `config`.
    pub fn new(config: KafkaConfig) -> Result<Arc<KafkaQueue>, QueueError> {
        if config.brokers.is_empty() {
            return Err(ConfigError::MissingField("kafka.brokers").into());
        }

        let writer = Arc::new(ProducerWriter::new(&config)?);
        let admin = Arc::new(AdminTopics::new(&config)?);
        let readers = Arc::new(StreamReaderFactory::new(config.clone()));

        Ok(Arc::new(KafkaQueue::with_clients(config, writer, readers, admin)))
    }

    /// Builds a queue over caller supplied clients.
    pub fn with_clients(
        config: KafkaConfig,
        writer: Arc<dyn RecordWriter>,
        readers: Arc<dyn ReaderFactory>,
        admin: Arc<dyn TopicAdmin>,
    ) -> KafkaQueue {
        KafkaQueue {
            config,
            writer,
            readers,
            admin,
            registry: Mutex::new(Registry::default()),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Topics that currently have a registered consumer.
    pub fn consumed_topics(&self) -> Vec<String> {
        self.registry().readers.keys().cloned().collect()
    }
}

#[async_trait]
impl Queue for KafkaQueue {
    async fn create_topic(&self, option: &TopicOption) -> Result<(), QueueError> {
        let opt = option.as_kafka()?;
        opt.validate_for_creation()?;

        let failed = self
            .admin
            .create_topics(slice::from_ref(opt))
            .await
            .map_err(|err| {
                error!(error = err.to_string(), topic = opt.topic_name, "failure to create topic");
                err
            })?;

        if !failed.is_empty() {
            for (topic, reason) in &failed {
                error!(topic, reason, "failure to create topic");
            }
            return Err(QueueError::TopicCreationFailed(
                failed.into_iter().map(|(topic, _)| topic).collect(),
            ));
        }

        info!(
            topic = opt.topic_name,
            partitions = opt.num_partitions,
            replication_factor = opt.replication_factor,
            "topic created"
        );
        Ok(())
    }

    async fn publish(&self, ctx: &Context, option: &TopicOption, message: &Message) -> Result<(), QueueError> {
        let opt = option.as_kafka()?;
        if opt.topic_name.is_empty() {
            return Err(QueueError::TopicNameRequired);
        }

        let message_id = message.id_or_new();
        let key = serde_json::to_vec(&message.key).map_err(|err| {
            error!(error = err.to_string(), "failure to serialize message key");
            QueueError::from(err)
        })?;
        let value = serde_json::to_vec(&message.data).map_err(|err| {
            error!(error = err.to_string(), "failure to serialize message data");
            QueueError::from(err)
        })?;

        let mut meta = message.meta.clone();
        meta.remove(MESSAGE_ID_HEADER);
        otel::inject(ctx, &mut meta);

        let mut headers: Vec<(String, Vec<u8>)> = meta.into_iter().map(|(k, v)| (k, v.into_bytes())).collect();
        headers.push((MESSAGE_ID_HEADER.to_owned(), message_id.clone().into_bytes()));

        self.writer
            .write(OutgoingRecord {
                topic: opt.topic_name.clone(),
                key: Some(key),
                value: Some(value),
                headers,
            })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), topic = opt.topic_name, message_id, "error publishing message");
                err
            })?;

        info!(topic = opt.topic_name, message_id, "message published");
        Ok(())
    }

    async fn consume(
        &self,
        ctx: &CancellationToken,
        option: &TopicOption,
        handler: Arc<dyn Handler>,
    ) -> Result<(), QueueError> {
        let opt = option.as_kafka()?;
        if opt.topic_name.is_empty() {
            return Err(QueueError::TopicNameRequired);
        }
        let topic = opt.topic_name.clone();

        let consumer = {
            let mut registry = self.registry();
            // a cancelled token means the previous consumer already stopped
            if registry.cancels.get(&topic).is_some_and(|cancel| !cancel.is_cancelled()) {
                return Err(QueueError::AlreadyConsumed(topic));
            }

            let reader = self.readers.reader(&topic)?;
            let cancel = ctx.child_token();
            registry.readers.insert(topic.clone(), reader.clone());
            registry.cancels.insert(topic.clone(), cancel.clone());

            Arc::new(TopicConsumer {
                config: self.config.consumer.clone(),
                writer: self.writer.clone(),
                reader,
                handler,
                cancel,
            })
        };

        info!(topic, batch = self.config.is_batch(), "starting consumer");
        tokio::spawn(consumer.run());

        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        let mut first_err = None;

        if let Err(err) = self.writer.close().await {
            error!(error = err.to_string(), "error closing writer");
            first_err = Some(err);
        }

        let consumers: Vec<(String, Arc<dyn RecordReader>, Option<CancellationToken>)> = {
            let mut registry = self.registry();
            let Registry { readers, cancels } = &mut *registry;
            readers
                .drain()
                .map(|(topic, reader)| {
                    let cancel = cancels.remove(&topic);
                    (topic, reader, cancel)
                })
                .collect()
        };

        for (topic, reader, cancel) in consumers {
            if let Some(cancel) = cancel {
                cancel.cancel();
            }
            if let Err(err) = reader.close().await {
                error!(error = err.to_string(), topic, "error closing reader");
                first_err.get_or_insert(err);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
