// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! Trace context travels inside the message meta map, which both adapters
//! translate to and from their native headers. Publishers inject the current
//! context; consumers extract it and open a consumer span per message.

use opentelemetry::{
    global::{BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::{borrow::Cow, collections::HashMap};

/// Injects and extracts trace context through the message meta map.
pub(crate) struct MetaPropagator<'a> {
    meta: &'a mut HashMap<String, String>,
}

impl<'a> MetaPropagator<'a> {
    pub(crate) fn new(meta: &'a mut HashMap<String, String>) -> Self {
        Self { meta }
    }
}

impl Injector for MetaPropagator<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.meta.insert(key.to_lowercase(), value);
    }
}

impl Extractor for MetaPropagator<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.meta.keys().map(String::as_str).collect()
    }
}

/// Writes the trace context of `ctx` into `meta`.
pub(crate) fn inject(ctx: &Context, meta: &mut HashMap<String, String>) {
    opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx, &mut MetaPropagator::new(meta))
    });
}

/// Creates a consumer span for one message.
///
/// Returns the context extracted from the message headers, which is what the
/// handler receives, along with the span started under it.
pub fn new_span(meta: &HashMap<String, String>, tracer: &BoxedTracer, name: &str) -> (Context, BoxedSpan) {
    let mut headers = meta.clone();
    let ctx = opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.extract(&MetaPropagator::new(&mut headers))
    });

    let span = tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx);

    (ctx, span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_lowercase_injected_keys() {
        let mut meta = HashMap::new();
        MetaPropagator::new(&mut meta).set("TraceParent", "00-abc".to_owned());

        assert_eq!(meta.get("traceparent").map(String::as_str), Some("00-abc"));
    }

    #[test]
    fn should_read_back_meta_entries() {
        let mut meta = HashMap::from([("tracestate".to_owned(), "k=v".to_owned())]);
        let propagator = MetaPropagator::new(&mut meta);

        assert_eq!(propagator.get("tracestate"), Some("k=v"));
        assert_eq!(propagator.get("missing"), None);
        assert_eq!(propagator.keys(), vec!["tracestate"]);
    }
}
