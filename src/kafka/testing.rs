// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory stand-ins for the Kafka client traits, used by the unit tests.

use super::client::{KafkaRecord, OutgoingRecord, ReaderFactory, RecordReader, RecordWriter};
use crate::{
    errors::QueueError,
    message::{Handler, HandlerOutput, Message, Response},
};
use async_trait::async_trait;
use opentelemetry::Context;
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::sync::Notify;

pub(crate) fn record(topic: &str, offset: i64, value: &[u8]) -> KafkaRecord {
    KafkaRecord {
        topic: topic.to_owned(),
        partition: 0,
        offset,
        key: None,
        value: Some(value.to_vec()),
        headers: vec![("MessageId".to_owned(), format!("m-{offset}").into_bytes())],
    }
}

/// Polls `cond` until it holds, sleeping between attempts.
pub(crate) async fn eventually(cond: impl Fn() -> bool) {
    for _ in 0..2_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

pub(crate) struct FakeReader {
    topic: String,
    pending: Mutex<VecDeque<KafkaRecord>>,
    notify: Notify,
    commits: Mutex<Vec<i64>>,
    closed: AtomicUsize,
}

impl FakeReader {
    pub(crate) fn new(topic: &str) -> FakeReader {
        FakeReader {
            topic: topic.to_owned(),
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            commits: Mutex::new(vec![]),
            closed: AtomicUsize::new(0),
        }
    }

    pub(crate) fn push(&self, record: KafkaRecord) {
        self.pending.lock().unwrap().push_back(record);
        self.notify.notify_one();
    }

    pub(crate) fn committed(&self) -> Vec<i64> {
        self.commits.lock().unwrap().clone()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordReader for FakeReader {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn fetch(&self) -> Result<KafkaRecord, QueueError> {
        loop {
            let next = self.pending.lock().unwrap().pop_front();
            if let Some(record) = next {
                return Ok(record);
            }
            self.notify.notified().await;
        }
    }

    async fn commit(&self, record: &KafkaRecord) -> Result<(), QueueError> {
        self.commits.lock().unwrap().push(record.offset);
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out one shared [`FakeReader`] per topic.
#[derive(Default)]
pub(crate) struct FakeReaders {
    readers: Mutex<HashMap<String, Arc<FakeReader>>>,
}

impl FakeReaders {
    pub(crate) fn get(&self, topic: &str) -> Arc<FakeReader> {
        self.readers
            .lock()
            .unwrap()
            .entry(topic.to_owned())
            .or_insert_with(|| Arc::new(FakeReader::new(topic)))
            .clone()
    }
}

impl ReaderFactory for FakeReaders {
    fn reader(&self, topic: &str) -> Result<Arc<dyn RecordReader>, QueueError> {
        Ok(self.get(topic))
    }
}

#[derive(Default)]
pub(crate) struct RecordingWriter {
    written: Mutex<Vec<OutgoingRecord>>,
    closed: AtomicUsize,
}

impl RecordingWriter {
    pub(crate) fn records(&self) -> Vec<OutgoingRecord> {
        self.written.lock().unwrap().clone()
    }

    pub(crate) fn topics(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.topic).collect()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordWriter for RecordingWriter {
    async fn write(&self, record: OutgoingRecord) -> Result<(), QueueError> {
        self.written.lock().unwrap().push(record);
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Handler answering from a script, with optional delay and panic trigger.
pub(crate) struct ScriptedHandler {
    script: Mutex<VecDeque<Response>>,
    fallback: Response,
    panic_on: Option<serde_json::Value>,
    delay: Option<Duration>,
    slow_on: Option<(serde_json::Value, Duration)>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    seen: Mutex<Vec<Message>>,
}

impl ScriptedHandler {
    pub(crate) fn always(response: Response) -> ScriptedHandler {
        ScriptedHandler::sequence_then(vec![], response)
    }

    /// Plays `responses` in order, then keeps answering with the last one.
    pub(crate) fn sequence(responses: Vec<Response>) -> ScriptedHandler {
        let fallback = *responses.last().unwrap_or(&Response::Success);
        ScriptedHandler::sequence_then(responses, fallback)
    }

    fn sequence_then(responses: Vec<Response>, fallback: Response) -> ScriptedHandler {
        ScriptedHandler {
            script: Mutex::new(responses.into()),
            fallback,
            panic_on: None,
            delay: None,
            slow_on: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            seen: Mutex::new(vec![]),
        }
    }

    pub(crate) fn panic_on(mut self, data: &str) -> Self {
        self.panic_on = Some(serde_json::Value::String(data.to_owned()));
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Delays only the calls whose payload is the string `data`.
    pub(crate) fn slow_on(mut self, data: &str, delay: Duration) -> Self {
        self.slow_on = Some((serde_json::Value::String(data.to_owned()), delay));
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn seen(&self) -> Vec<Message> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Handler for ScriptedHandler {
    async fn handle(&self, _ctx: &Context, message: &Message) -> HandlerOutput {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_on.as_ref() == Some(&message.data) {
            panic!("handler blew up");
        }
        self.seen.lock().unwrap().push(message.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((data, delay)) = &self.slow_on {
            if *data == message.data {
                tokio::time::sleep(*delay).await;
            }
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let next = self.script.lock().unwrap().pop_front();
        (next.unwrap_or(self.fallback), None)
    }
}
