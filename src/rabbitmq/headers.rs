// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Translation between the message meta map and AMQP header tables.

use lapin::types::{AMQPValue, FieldTable, LongLongInt, LongString, ShortString};
use std::collections::{BTreeMap, HashMap};

/// Header carrying how many times a delivery has been republished for retry
pub const RETRY_COUNT_HEADER: &str = "retry-count";

/// Builds the AMQP header table published for `meta`.
pub(crate) fn to_field_table(meta: &HashMap<String, String>) -> FieldTable {
    let btree: BTreeMap<ShortString, AMQPValue> = meta
        .iter()
        .map(|(k, v)| {
            (
                ShortString::from(k.as_str()),
                AMQPValue::LongString(LongString::from(v.as_str())),
            )
        })
        .collect();

    FieldTable::from(btree)
}

/// Flattens received headers into the string map handed to handlers.
///
/// Scalar values are rendered as text; nested tables and arrays are skipped.
pub(crate) fn to_meta(headers: Option<&FieldTable>) -> HashMap<String, String> {
    let Some(headers) = headers else {
        return HashMap::default();
    };

    headers
        .inner()
        .iter()
        .filter_map(|(k, v)| scalar_to_string(v).map(|v| (k.as_str().to_owned(), v)))
        .collect()
}

fn scalar_to_string(value: &AMQPValue) -> Option<String> {
    match value {
        AMQPValue::LongString(v) => Some(String::from_utf8_lossy(v.as_bytes()).into_owned()),
        AMQPValue::ShortString(v) => Some(v.as_str().to_owned()),
        AMQPValue::Boolean(v) => Some(v.to_string()),
        AMQPValue::Float(v) => Some(v.to_string()),
        AMQPValue::Double(v) => Some(v.to_string()),
        AMQPValue::Timestamp(v) => Some(v.to_string()),
        other => integer(other).map(|v| v.to_string()),
    }
}

fn integer(value: &AMQPValue) -> Option<i64> {
    match *value {
        AMQPValue::ShortShortInt(v) => Some(v.into()),
        AMQPValue::ShortShortUInt(v) => Some(v.into()),
        AMQPValue::ShortInt(v) => Some(v.into()),
        AMQPValue::ShortUInt(v) => Some(v.into()),
        AMQPValue::LongInt(v) => Some(v.into()),
        AMQPValue::LongUInt(v) => Some(v.into()),
        AMQPValue::LongLongInt(v) => Some(v),
        _ => None,
    }
}

/// Reads the retry counter of a delivery. Missing or non-integer values count as zero.
pub(crate) fn retry_count(headers: Option<&FieldTable>) -> i64 {
    headers
        .and_then(|h| h.inner().get(&ShortString::from(RETRY_COUNT_HEADER)))
        .and_then(integer)
        .unwrap_or_default()
}

/// Copies the received headers with the retry counter set to `count`.
pub(crate) fn with_retry_count(headers: Option<&FieldTable>, count: i64) -> FieldTable {
    let mut table = headers.cloned().unwrap_or_default();
    table.insert(
        ShortString::from(RETRY_COUNT_HEADER),
        AMQPValue::LongLongInt(LongLongInt::from(count)),
    );
    table
}
