// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Transport-Agnostic Message Envelope
//!
//! [`Message`] is what callers publish and what handlers receive, whichever
//! broker sits underneath. Adapters add their own transport headers to the
//! wire representation and never touch the caller-owned fields.

use async_trait::async_trait;
use opentelemetry::Context;
use serde::Serialize;
use serde_json::Value;
use std::{collections::HashMap, error::Error};
use uuid::Uuid;

/// Header carrying the message id on Kafka records
pub const MESSAGE_ID_HEADER: &str = "MessageId";

/// Outcome reported by a [`Handler`] after processing one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Response {
    Success = 0,
    Failed = 1,
    Retry = 2,
}

/// A message travelling through a [`Queue`](crate::Queue).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    pub id: Option<String>,
    pub key: Value,
    pub data: Value,
    pub meta: HashMap<String, String>,
}

impl Message {
    /// Builds a message from any serializable key and payload.
    pub fn new<K, D>(key: &K, data: &D) -> Result<Message, serde_json::Error>
    where
        K: Serialize + ?Sized,
        D: Serialize + ?Sized,
    {
        Ok(Message {
            id: None,
            key: serde_json::to_value(key)?,
            data: serde_json::to_value(data)?,
            meta: HashMap::default(),
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// The caller supplied id, or a fresh UUID v4 when absent.
    pub(crate) fn id_or_new(&self) -> String {
        match &self.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => Uuid::new_v4().to_string(),
        }
    }
}

/// Decodes a raw payload received from a broker.
///
/// Payloads published through this crate are JSON; anything else is handed
/// to the handler as a JSON string of the lossy UTF-8 bytes.
pub(crate) fn decode_payload(raw: Option<&[u8]>) -> Value {
    match raw {
        None => Value::Null,
        Some(bytes) => serde_json::from_slice(bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned())),
    }
}

pub type HandlerError = Box<dyn Error + Send + Sync>;

/// What a handler returns: the response drives acknowledgement, the error
/// is only logged.
pub type HandlerOutput = (Response, Option<HandlerError>);

/// Caller supplied message processor registered through
/// [`Queue::consume`](crate::Queue::consume).
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &Context, message: &Message) -> HandlerOutput;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn should_build_message_from_serializable_values() {
        #[derive(Serialize)]
        struct Registration<'a> {
            student: &'a str,
            class: u32,
        }

        let msg = Message::new("student-1", &Registration { student: "ana", class: 7 })
            .unwrap()
            .with_meta("source", "registration");

        assert_eq!(msg.key, json!("student-1"));
        assert_eq!(msg.data, json!({"student": "ana", "class": 7}));
        assert_eq!(msg.meta.get("source").map(String::as_str), Some("registration"));
        assert!(msg.id.is_none());
    }

    #[test]
    fn should_keep_caller_id_or_generate_one() {
        let msg = Message::default().with_id("abc");
        assert_eq!(msg.id_or_new(), "abc");

        let generated = Message::default().id_or_new();
        assert!(Uuid::parse_str(&generated).is_ok());

        let empty = Message::default().with_id("");
        assert_ne!(empty.id_or_new(), "");
    }

    #[test]
    fn should_decode_json_and_fall_back_to_text() {
        assert_eq!(decode_payload(Some(br#"{"a":1}"#)), json!({"a": 1}));
        assert_eq!(decode_payload(Some(b"plain text")), json!("plain text"));
        assert_eq!(decode_payload(None), Value::Null);
    }

    #[test]
    fn should_expose_wire_values_of_response() {
        assert_eq!(Response::Success as u8, 0);
        assert_eq!(Response::Failed as u8, 1);
        assert_eq!(Response::Retry as u8, 2);
    }
}
