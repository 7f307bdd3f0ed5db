// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Kafka Client Seam
//!
//! The adapter talks to Kafka through four small traits: a shared
//! [`RecordWriter`], one [`RecordReader`] per consumed topic (built by a
//! [`ReaderFactory`]) and a [`TopicAdmin`]. The rdkafka backed
//! implementations live here as well.

use crate::{config::KafkaConfig, errors::QueueError, topic::KafkaTopicOption};
use async_trait::async_trait;
use rdkafka::{
    admin::{AdminClient, AdminOptions, NewTopic, TopicReplication},
    client::DefaultClientContext,
    config::ClientConfig,
    consumer::{CommitMode, Consumer, StreamConsumer},
    error::RDKafkaErrorCode,
    message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders},
    producer::{FutureProducer, FutureRecord, Producer},
    Offset, TopicPartitionList,
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{debug, error};

const ADMIN_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// A record fetched from a topic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KafkaRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Vec<(String, Vec<u8>)>,
}

impl KafkaRecord {
    pub(crate) fn header(&self, key: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| String::from_utf8_lossy(v).into_owned())
    }

    /// Headers as the string map handed to handlers; the last value wins on duplicates.
    pub(crate) fn meta(&self) -> HashMap<String, String> {
        self.headers
            .iter()
            .map(|(k, v)| (k.clone(), String::from_utf8_lossy(v).into_owned()))
            .collect()
    }
}

/// A record to be written to a topic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingRecord {
    pub topic: String,
    pub key: Option<Vec<u8>>,
    /// `None` writes a tombstone
    pub value: Option<Vec<u8>>,
    pub headers: Vec<(String, Vec<u8>)>,
}

/// Writer shared by every publish and dead-letter write of a queue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordWriter: Send + Sync {
    /// Enqueues the record; delivery is acknowledged asynchronously.
    async fn write(&self, record: OutgoingRecord) -> Result<(), QueueError>;

    async fn close(&self) -> Result<(), QueueError>;
}

/// Reader dedicated to one topic.
#[async_trait]
pub trait RecordReader: Send + Sync {
    fn topic(&self) -> &str;

    /// Waits for the next record. Dropping the future abandons the fetch.
    async fn fetch(&self) -> Result<KafkaRecord, QueueError>;

    /// Marks the record, and everything before it on its partition, as processed.
    async fn commit(&self, record: &KafkaRecord) -> Result<(), QueueError>;

    async fn close(&self) -> Result<(), QueueError>;
}

pub trait ReaderFactory: Send + Sync {
    fn reader(&self, topic: &str) -> Result<Arc<dyn RecordReader>, QueueError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    /// Creates the topics, returning `(topic, reason)` for each one that failed.
    async fn create_topics(&self, topics: &[KafkaTopicOption]) -> Result<Vec<(String, String)>, QueueError>;
}

/// [`RecordWriter`] over an rdkafka `FutureProducer`.
pub struct ProducerWriter {
    producer: FutureProducer,
}

impl ProducerWriter {
    pub fn new(config: &KafkaConfig) -> Result<ProducerWriter, QueueError> {
        debug!("creating kafka producer...");
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.bootstrap_servers())
            .set("acks", "all")
            .create()
            .map_err(|err| {
                error!(error = err.to_string(), "failure to create kafka producer");
                QueueError::ConnectionError(err.to_string())
            })?;
        debug!("kafka producer created");

        Ok(ProducerWriter { producer })
    }
}

#[async_trait]
impl RecordWriter for ProducerWriter {
    async fn write(&self, record: OutgoingRecord) -> Result<(), QueueError> {
        let mut headers = OwnedHeaders::new_with_capacity(record.headers.len());
        for (key, value) in &record.headers {
            headers = headers.insert(Header {
                key,
                value: Some(value.as_slice()),
            });
        }

        let mut future_record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(&record.topic).headers(headers);
        future_record.key = record.key.as_deref();
        future_record.payload = record.value.as_deref();

        let delivery = match self.producer.send_result(future_record) {
            Ok(delivery) => delivery,
            Err((err, _)) => {
                error!(error = err.to_string(), topic = record.topic, "failure to enqueue record");
                return Err(QueueError::PublishingError(err.to_string()));
            }
        };

        let topic = record.topic.clone();
        tokio::spawn(async move {
            match delivery.await {
                Ok(Ok(_)) => {}
                Ok(Err((err, _))) => {
                    error!(error = err.to_string(), topic, "record delivery failed")
                }
                Err(_) => error!(topic, "record delivery canceled"),
            }
        });

        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(FLUSH_TIMEOUT))
            .await
            .map_err(|err| QueueError::CloseError(err.to_string()))?
            .map_err(|err| QueueError::CloseError(err.to_string()))
    }
}

/// [`RecordReader`] over an rdkafka `StreamConsumer` subscribed to one topic.
pub struct StreamReader {
    topic: String,
    consumer: StreamConsumer,
    periodic_commit: bool,
}

impl StreamReader {
    pub fn new(config: &KafkaConfig, topic: &str) -> Result<StreamReader, QueueError> {
        let group_id = if config.consumer.group_id.is_empty() {
            format!("{topic}-consumer")
        } else {
            config.consumer.group_id.clone()
        };
        let periodic_commit = !config.consumer.commit_interval.is_zero();

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", config.bootstrap_servers())
            .set("group.id", group_id)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.offset.store", "false");

        if periodic_commit {
            client_config.set("enable.auto.commit", "true").set(
                "auto.commit.interval.ms",
                config.consumer.commit_interval.as_millis().to_string(),
            );
        } else {
            client_config.set("enable.auto.commit", "false");
        }

        let consumer: StreamConsumer = client_config.create().map_err(|err| {
            error!(error = err.to_string(), topic, "failure to create kafka consumer");
            QueueError::ConnectionError(err.to_string())
        })?;

        consumer.subscribe(&[topic]).map_err(|err| {
            error!(error = err.to_string(), topic, "failure to subscribe");
            QueueError::ConsumerDeclarationError(topic.to_owned())
        })?;

        Ok(StreamReader {
            topic: topic.to_owned(),
            consumer,
            periodic_commit,
        })
    }
}

fn to_record(msg: &BorrowedMessage<'_>) -> KafkaRecord {
    let headers = msg
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| (h.key.to_owned(), h.value.map(<[u8]>::to_vec).unwrap_or_default()))
                .collect()
        })
        .unwrap_or_default();

    KafkaRecord {
        topic: msg.topic().to_owned(),
        partition: msg.partition(),
        offset: msg.offset(),
        key: msg.key().map(<[u8]>::to_vec),
        value: msg.payload().map(<[u8]>::to_vec),
        headers,
    }
}

#[async_trait]
impl RecordReader for StreamReader {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn fetch(&self) -> Result<KafkaRecord, QueueError> {
        match self.consumer.recv().await {
            Ok(msg) => Ok(to_record(&msg)),
            Err(err) => Err(QueueError::FetchError(err.to_string())),
        }
    }

    async fn commit(&self, record: &KafkaRecord) -> Result<(), QueueError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&record.topic, record.partition, Offset::Offset(record.offset + 1))
            .map_err(|err| QueueError::CommitError(err.to_string()))?;

        let result = if self.periodic_commit {
            self.consumer.store_offsets(&tpl)
        } else {
            self.consumer.commit(&tpl, CommitMode::Sync)
        };

        result.map_err(|err| QueueError::CommitError(err.to_string()))
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.consumer.unsubscribe();
        Ok(())
    }
}

/// Builds a [`StreamReader`] per topic from the queue configuration.
pub struct StreamReaderFactory {
    config: KafkaConfig,
}

impl StreamReaderFactory {
    pub fn new(config: KafkaConfig) -> StreamReaderFactory {
        StreamReaderFactory { config }
    }
}

impl ReaderFactory for StreamReaderFactory {
    fn reader(&self, topic: &str) -> Result<Arc<dyn RecordReader>, QueueError> {
        Ok(Arc::new(StreamReader::new(&self.config, topic)?))
    }
}

/// [`TopicAdmin`] over the rdkafka admin client.
pub struct AdminTopics {
    admin: AdminClient<DefaultClientContext>,
}

impl AdminTopics {
    pub fn new(config: &KafkaConfig) -> Result<AdminTopics, QueueError> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", config.bootstrap_servers())
            .create()
            .map_err(|err| {
                error!(error = err.to_string(), "failure to create kafka admin client");
                QueueError::ConnectionError(err.to_string())
            })?;

        Ok(AdminTopics { admin })
    }
}

#[async_trait]
impl TopicAdmin for AdminTopics {
    async fn create_topics(&self, topics: &[KafkaTopicOption]) -> Result<Vec<(String, String)>, QueueError> {
        let new_topics: Vec<NewTopic<'_>> = topics
            .iter()
            .map(|t| {
                NewTopic::new(
                    &t.topic_name,
                    t.num_partitions,
                    TopicReplication::Fixed(t.replication_factor),
                )
            })
            .collect();
        let opts = AdminOptions::new().operation_timeout(Some(ADMIN_OPERATION_TIMEOUT));

        let results = self
            .admin
            .create_topics(&new_topics, &opts)
            .await
            .map_err(|err| QueueError::TopicCreationFailed(vec![err.to_string()]))?;

        Ok(results
            .into_iter()
            .filter_map(Result::err)
            .filter(|(_, code)| *code != RDKafkaErrorCode::TopicAlreadyExists)
            .map(|(topic, code)| (topic, code.to_string()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_expose_headers_as_meta() {
        let record = KafkaRecord {
            headers: vec![
                ("MessageId".to_owned(), b"id-1".to_vec()),
                ("source".to_owned(), b"mailer".to_vec()),
            ],
            ..KafkaRecord::default()
        };

        assert_eq!(record.header("MessageId").as_deref(), Some("id-1"));
        assert_eq!(record.header("missing"), None);
        let meta = record.meta();
        assert_eq!(meta.len(), 2);
        assert_eq!(meta.get("source").map(String::as_str), Some("mailer"));
    }
}
