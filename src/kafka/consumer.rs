// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Kafka Topic Consumer
//!
//! One [`TopicConsumer`] runs per consumed topic, in its own task. It
//! fetches records either one at a time or in batches, runs the handler
//! with immediate retries and routes exhausted or rejected records to the
//! dead-letter topic before committing them.
//!
//! Single mode keeps strict fetch order. Batch mode runs the handlers of a
//! batch concurrently, so there is no ordering between handler calls of the
//! same batch; dead-letter writes and commits still follow fetch order.

use super::client::{KafkaRecord, OutgoingRecord, RecordReader, RecordWriter};
use crate::{
    config::KafkaConsumerConfig,
    message::{decode_payload, Handler, Message, Response, MESSAGE_ID_HEADER},
    otel,
};
use futures_util::future::join_all;
use opentelemetry::{
    global,
    trace::{Span, Status},
};
use std::{borrow::Cow, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound for a single fetch while a batch is being accumulated
pub(crate) const BATCH_FETCH_TIMEOUT: Duration = Duration::from_millis(1500);

/// What is left to do for a record once its handler is done with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Commit,
    /// Republish to the dead-letter topic, then commit
    DeadLetter,
    /// Cancelled before an answer, left uncommitted for redelivery
    Abandon,
}

pub(crate) struct TopicConsumer {
    pub(crate) config: KafkaConsumerConfig,
    pub(crate) writer: Arc<dyn RecordWriter>,
    pub(crate) reader: Arc<dyn RecordReader>,
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) cancel: CancellationToken,
}

impl TopicConsumer {
    /// Consumes until cancelled, then closes the reader.
    pub(crate) async fn run(self: Arc<Self>) {
        if self.config.max_message > 1 {
            self.consume_batch().await;
        } else {
            self.consume_single().await;
        }

        if let Err(err) = self.reader.close().await {
            error!(error = err.to_string(), topic = self.reader.topic(), "failure to close reader");
        }
    }

    async fn consume_single(&self) {
        loop {
            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!(topic = self.reader.topic(), "stopping consumer");
                    return;
                }
                fetched = self.reader.fetch() => fetched,
            };

            match fetched {
                Ok(record) => self.handle_record(&record).await,
                Err(err) => {
                    error!(error = err.to_string(), topic = self.reader.topic(), "failure to fetch message")
                }
            }
        }
    }

    async fn consume_batch(self: &Arc<Self>) {
        let max_message = self.config.max_message;

        loop {
            let mut records = Vec::with_capacity(max_message);

            while records.len() < max_message {
                let fetched = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        warn!(topic = self.reader.topic(), "stopping consumer");
                        return;
                    }
                    fetched = tokio::time::timeout(BATCH_FETCH_TIMEOUT, self.reader.fetch()) => fetched,
                };

                match fetched {
                    Ok(Ok(record)) => records.push(record),
                    // sparse topic, dispatch what we have
                    Err(_) => break,
                    Ok(Err(err)) => {
                        warn!(error = err.to_string(), topic = self.reader.topic(), "failure to fetch message");
                        break;
                    }
                }
            }

            if records.is_empty() {
                continue;
            }

            info!(topic = self.reader.topic(), size = records.len(), "processing batch");
            self.dispatch_batch(records).await;
        }
    }

    /// Runs one handler task per record and waits for all of them, then
    /// settles the records in fetch order. A task that dies without
    /// finishing counts as a failed record. Settling stops at the first
    /// abandoned record so no later offset is committed past it.
    async fn dispatch_batch(self: &Arc<Self>, records: Vec<KafkaRecord>) {
        let tasks = records.iter().cloned().map(|record| {
            let consumer = Arc::clone(self);
            tokio::spawn(async move { consumer.process(&record).await })
        });
        let results = join_all(tasks).await;

        for (record, result) in records.iter().zip(results) {
            let outcome = result.unwrap_or_else(|err| {
                error!(
                    error = err.to_string(),
                    topic = record.topic,
                    offset = record.offset,
                    "handler task terminated abnormally"
                );
                Outcome::DeadLetter
            });

            if outcome == Outcome::Abandon {
                return;
            }
            self.settle(record, outcome).await;
        }
    }

    pub(crate) async fn handle_record(&self, record: &KafkaRecord) {
        let outcome = self.process(record).await;
        self.settle(record, outcome).await;
    }

    /// Runs the handler with retries and reports what is left to do for the
    /// record. Nothing is written or committed here.
    pub(crate) async fn process(&self, record: &KafkaRecord) -> Outcome {
        let meta = record.meta();
        let message_id = meta.get(MESSAGE_ID_HEADER).cloned().unwrap_or_default();
        let message = Message {
            id: (!message_id.is_empty()).then(|| message_id.clone()),
            key: decode_payload(record.key.as_deref()),
            data: decode_payload(record.value.as_deref()),
            meta,
        };

        let (ctx, mut span) = otel::new_span(&message.meta, &global::tracer("kafka consumer"), &record.topic);

        let max_retry = self.config.max_retry.max(1);
        let mut attempts = 0;

        while attempts < max_retry {
            if self.cancel.is_cancelled() {
                warn!(topic = record.topic, message_id, "consumer cancelled, leaving message uncommitted");
                return Outcome::Abandon;
            }

            let (response, err) = self.handler.handle(&ctx, &message).await;
            if let Some(err) = err {
                error!(error = err.to_string(), topic = record.topic, message_id, "failure to handle message");
                span.record_error(&*err);
            }

            match response {
                Response::Success => {
                    debug!(topic = record.topic, message_id, "message successfully processed");
                    span.set_status(Status::Ok);
                    return Outcome::Commit;
                }
                Response::Retry => {
                    attempts += 1;
                    warn!(attempt = attempts, topic = record.topic, message_id, "retrying message");
                }
                Response::Failed => {
                    warn!(topic = record.topic, message_id, "message rejected, sending to dlq");
                    span.set_status(Status::Error {
                        description: Cow::from("message rejected"),
                    });
                    return Outcome::DeadLetter;
                }
            }
        }

        warn!(topic = record.topic, message_id, "too many attempts, sending to dlq");
        span.set_status(Status::Error {
            description: Cow::from("too many attempts"),
        });
        Outcome::DeadLetter
    }

    async fn settle(&self, record: &KafkaRecord, outcome: Outcome) {
        match outcome {
            Outcome::Commit => self.commit(record).await,
            Outcome::DeadLetter => {
                self.dead_letter(record).await;
                self.commit(record).await;
            }
            Outcome::Abandon => {}
        }
    }

    /// Republishes the raw record, headers included, to the dead-letter
    /// topic. Without one the record is dropped.
    pub(crate) async fn dead_letter(&self, record: &KafkaRecord) {
        let message_id = record.header(MESSAGE_ID_HEADER).unwrap_or_default();

        let Some(dlq) = &self.config.dead_letter_topic else {
            warn!(topic = record.topic, message_id, "dead-letter topic not configured, message lost");
            return;
        };

        let dlq_record = OutgoingRecord {
            topic: dlq.clone(),
            key: record.key.clone(),
            value: record.value.clone(),
            headers: record.headers.clone(),
        };

        match self.writer.write(dlq_record).await {
            Err(err) => error!(error = err.to_string(), topic = record.topic, message_id, "failure to send to dlq"),
            Ok(()) => warn!(dlq, message_id, "message sent to dlq"),
        }
    }

    async fn commit(&self, record: &KafkaRecord) {
        if let Err(err) = self.reader.commit(record).await {
            error!(
                error = err.to_string(),
                topic = record.topic,
                offset = record.offset,
                "failure to commit message"
            );
        }
    }
}
