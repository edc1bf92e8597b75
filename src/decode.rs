//! The consumer-side decoder: per-session dictionary mirrors and the span
//! reconstructor that reverses every step of the encoder.
//!
//! The decoder never guesses. A batch referencing a session or an id it has
//! not been given fails loudly; the receiver surfaces that as a 5xx so the
//! producer resets and re-ships a full snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::dict::{DictUpdate, UpdateEnvelope};
use crate::encode::PATH_SENTINEL;
use crate::error::Error;
use crate::model::{
    Event, KeyValue, Resource, ResourceSpans, ScopeSpans, Span, TraceData, Value,
};
use crate::wire::{CompactEvent, CompactSpan, EventAttrBlobEntry, TracePayload, WireScopeSpans};

/// One session's view of the seven dictionaries.
#[derive(Debug, Default)]
pub struct DictionaryMirror {
    attr_names: HashMap<String, String>,
    attr_values: HashMap<String, String>,
    event_attrs: HashMap<String, String>,
    event_names: HashMap<String, String>,
    paths: HashMap<String, Vec<String>>,
    orders: HashMap<String, Vec<String>>,
    span_names: HashMap<String, String>,
}

impl DictionaryMirror {
    /// Applies an update. A full snapshot replaces every dictionary; an
    /// incremental batch overwrites entry by entry, in order.
    pub fn apply(&mut self, update: DictUpdate) {
        match update {
            DictUpdate::Full(full) => {
                self.attr_names = full.attr_names;
                self.attr_values = full.attr_values;
                self.event_attrs = full.event_attrs;
                self.event_names = full.event_names;
                self.paths = full.paths;
                self.orders = full.orders;
                self.span_names = full.span_names;
            }
            DictUpdate::Incremental(delta) => {
                for entry in delta.attr_names {
                    self.attr_names.insert(entry.key, entry.value);
                }
                for entry in delta.attr_values {
                    self.attr_values.insert(entry.key, entry.value);
                }
                for entry in delta.event_attrs {
                    self.event_attrs.insert(entry.key, entry.value);
                }
                for entry in delta.event_names {
                    self.event_names.insert(entry.key, entry.value);
                }
                for entry in delta.paths {
                    self.paths.insert(entry.key, entry.values);
                }
                for entry in delta.span_names {
                    self.span_names.insert(entry.key, entry.value);
                }
                for entry in delta.orders {
                    self.orders.insert(entry.key, entry.values);
                }
            }
        }
    }

    fn reconstruct(&self, payload: &TracePayload) -> Result<TraceData, Error> {
        let mut resource_spans = Vec::with_capacity(payload.resource_spans.len());
        for group in &payload.resource_spans {
            let mut attributes = Vec::with_capacity(group.resource.attributes.len());
            for attr in &group.resource.attributes {
                attributes.push(KeyValue {
                    key: attr.key.clone(),
                    value: Value::from_blob(&attr.value)?,
                });
            }
            let mut scope_spans = Vec::with_capacity(group.scope_spans.len());
            for scope_group in &group.scope_spans {
                scope_spans.push(self.reconstruct_scope(scope_group)?);
            }
            resource_spans.push(ResourceSpans {
                resource: Resource {
                    attributes,
                    dropped_attributes_count: group.resource.dropped_attributes_count,
                },
                schema_url: group.schema_url.clone(),
                scope_spans,
            });
        }
        Ok(TraceData { resource_spans })
    }

    fn reconstruct_scope(&self, scope_group: &WireScopeSpans) -> Result<ScopeSpans, Error> {
        let mut spans = Vec::with_capacity(scope_group.spans.len());
        for span in &scope_group.spans {
            spans.push(self.reconstruct_span(span, scope_group.start_base, scope_group.event_base)?);
        }
        Ok(ScopeSpans {
            scope: scope_group.scope.clone(),
            schema_url: scope_group.schema_url.clone(),
            spans,
        })
    }

    fn reconstruct_span(
        &self,
        span: &CompactSpan,
        start_base: u64,
        event_base: u64,
    ) -> Result<Span, Error> {
        let name = self
            .span_names
            .get(&span.name_id)
            .ok_or_else(|| Error::UnknownId {
                dict: "span name",
                id: span.name_id.clone(),
            })?
            .clone();

        let mut attributes = Vec::with_capacity(span.attributes.len());
        for attr in &span.attributes {
            let key = self
                .attr_names
                .get(&attr.key_id)
                .ok_or_else(|| Error::UnknownId {
                    dict: "attribute name",
                    id: attr.key_id.clone(),
                })?;
            attributes.push(KeyValue {
                key: key.clone(),
                value: attr.value.clone(),
            });
        }

        let empty: &[String] = &[];
        let path_array: &[String] = match &span.path_id {
            Some(id) => self.paths.get(id).ok_or_else(|| Error::UnknownId {
                dict: "path",
                id: id.clone(),
            })?,
            None => empty,
        };
        let order = self.orders.get(&name).map(Vec::as_slice).unwrap_or(empty);
        if path_array.len() != order.len() {
            return Err(Error::PathOrderMismatch {
                name,
                path_len: path_array.len(),
                order_len: order.len(),
            });
        }
        for (value_id, name_id) in path_array.iter().zip(order) {
            if value_id == PATH_SENTINEL {
                continue;
            }
            let key = self
                .attr_names
                .get(name_id)
                .ok_or_else(|| Error::UnknownId {
                    dict: "attribute name",
                    id: name_id.clone(),
                })?;
            let blob = self
                .attr_values
                .get(value_id)
                .ok_or_else(|| Error::UnknownId {
                    dict: "attribute value",
                    id: value_id.clone(),
                })?;
            attributes.push(KeyValue {
                key: key.clone(),
                value: Value::from_blob(blob)?,
            });
        }

        let mut events = Vec::with_capacity(span.events.len());
        for event in &span.events {
            events.push(self.reconstruct_event(event, event_base)?);
        }

        Ok(Span {
            trace_id: span.trace_id.clone(),
            span_id: span.span_id.clone(),
            parent_span_id: span.parent_span_id.clone(),
            trace_state: span.trace_state.clone(),
            flags: span.flags,
            name,
            kind: span.kind,
            start_time_unix_nano: span.start_offset + start_base,
            end_time_unix_nano: span.end_offset + start_base,
            attributes,
            dropped_attributes_count: span.dropped_attributes_count,
            events,
            dropped_events_count: span.dropped_events_count,
            links: span.links.clone(),
            dropped_links_count: span.dropped_links_count,
            status: span.status.clone(),
        })
    }

    fn reconstruct_event(&self, event: &CompactEvent, event_base: u64) -> Result<Event, Error> {
        let name = self
            .event_names
            .get(&event.name_id)
            .ok_or_else(|| Error::UnknownId {
                dict: "event name",
                id: event.name_id.clone(),
            })?
            .clone();
        let attributes = match &event.attrs_id {
            Some(id) => {
                let blob = self.event_attrs.get(id).ok_or_else(|| Error::UnknownId {
                    dict: "event attribute",
                    id: id.clone(),
                })?;
                let entries: Vec<EventAttrBlobEntry> = serde_json::from_str(blob)?;
                let mut attributes = Vec::with_capacity(entries.len());
                for entry in entries {
                    attributes.push(KeyValue {
                        key: entry.key,
                        value: Value::from_blob(&entry.value)?,
                    });
                }
                attributes
            }
            None => Vec::new(),
        };
        Ok(Event {
            name,
            time_unix_nano: event.time_offset + event_base,
            attributes,
            dropped_attributes_count: event.dropped_attributes_count,
        })
    }
}

/// Per-session decoder registry. Sessions are created on first sight at the
/// dictionary endpoint; a trace batch for an unknown session is an error.
#[derive(Debug, Default)]
pub struct Decoder {
    sessions: Mutex<HashMap<String, Arc<Mutex<DictionaryMirror>>>>,
}

impl Decoder {
    pub fn new() -> Decoder {
        Decoder::default()
    }

    /// Applies a dictionary update to the session's mirror, creating the
    /// mirror on first sight.
    pub fn apply_update(&self, envelope: UpdateEnvelope) -> Result<(), Error> {
        let mirror = {
            let mut sessions = self
                .sessions
                .lock()
                .map_err(|_| Error::Other("decoder registry lock poisoned".to_string()))?;
            Arc::clone(sessions.entry(envelope.session_id).or_default())
        };
        let mut mirror = mirror
            .lock()
            .map_err(|_| Error::Other("dictionary mirror lock poisoned".to_string()))?;
        mirror.apply(envelope.update);
        Ok(())
    }

    /// Inflates a compact batch against the session's mirror.
    pub fn decode(&self, payload: &TracePayload) -> Result<TraceData, Error> {
        let mirror = {
            let sessions = self
                .sessions
                .lock()
                .map_err(|_| Error::Other("decoder registry lock poisoned".to_string()))?;
            sessions
                .get(&payload.session_id)
                .cloned()
                .ok_or_else(|| Error::UnknownSession(payload.session_id.clone()))?
        };
        let mirror = mirror
            .lock()
            .map_err(|_| Error::Other("dictionary mirror lock poisoned".to_string()))?;
        mirror.reconstruct(payload)
    }
}
