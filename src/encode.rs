//! The producer-side session encoder.
//!
//! A [`Session`] owns everything one producer needs across its lifetime: the
//! sliding window and its statistics, the span-retrieve trie, the seven
//! dictionaries with their delta log, and the per-span-name stable orders.
//! [`Session::encode`] turns a batch of trace data into its compact wire
//! form plus the dictionary update (full or incremental) the peer must apply
//! before decoding it.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::dict::{DictUpdate, DictionarySet};
use crate::error::Error;
use crate::model::{Span, TraceData};
use crate::trie::SpanRetrieveTrie;
use crate::window::{ObservedSpan, SpanWindow};
use crate::wire::{
    CompactEvent, CompactSpan, EventAttrBlobEntry, InlineAttr, TracePayload, WireAttr,
    WireResource, WireResourceSpans, WireScopeSpans,
};
use crate::CodecConfig;

/// Absent stable key marker inside a path array.
pub const PATH_SENTINEL: &str = "#";

const DEFAULT_START_BASE: u64 = 1 << 63;
const DEFAULT_EVENT_BASE: u64 = 1 << 53;

/// The result of encoding one batch.
#[derive(Debug)]
pub struct EncodedBatch {
    pub session_id: String,
    /// Dictionary update to ship before the payload, when one is due.
    pub update: Option<DictUpdate>,
    pub payload: TracePayload,
}

#[derive(Debug)]
pub struct Session {
    session_id: String,
    cfg: CodecConfig,
    window: SpanWindow,
    trie: SpanRetrieveTrie,
    dict: DictionarySet,
    /// span name -> stable keys, in prefix order
    orders: HashMap<String, Vec<String>>,
    /// span name -> stable key membership
    stable: HashMap<String, HashSet<String>>,
}

impl Session {
    pub fn new(cfg: CodecConfig) -> Session {
        Session {
            session_id: Uuid::new_v4().to_string(),
            window: SpanWindow::new(cfg.trie_buffer),
            trie: SpanRetrieveTrie::new(),
            dict: DictionarySet::new(),
            orders: HashMap::new(),
            stable: HashMap::new(),
            cfg,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Arms the full-snapshot flag; the next [`encode`] rebuilds the value
    /// and path dictionaries and ships a complete dump.
    ///
    /// [`encode`]: Session::encode
    pub fn force_full(&mut self) {
        self.dict.set_send_full(true);
    }

    pub fn needs_full(&self) -> bool {
        self.dict.send_full()
    }

    pub fn encode(&mut self, traces: &TraceData) -> Result<EncodedBatch, Error> {
        let (start_base, event_base) = batch_minima(traces);

        self.update_window(traces)?;

        if self.dict.send_full() {
            self.recompute_all();
        }

        let mut resource_spans = Vec::with_capacity(traces.resource_spans.len());
        for group in &traces.resource_spans {
            let resource = if self.cfg.delete_resource {
                WireResource::default()
            } else {
                let mut attributes = Vec::with_capacity(group.resource.attributes.len());
                for attr in &group.resource.attributes {
                    attributes.push(WireAttr {
                        key: attr.key.clone(),
                        value: attr.value.to_blob()?,
                    });
                }
                WireResource {
                    attributes,
                    dropped_attributes_count: group.resource.dropped_attributes_count,
                }
            };

            let mut scope_spans = Vec::with_capacity(group.scope_spans.len());
            for scope_group in &group.scope_spans {
                let mut spans = Vec::with_capacity(scope_group.spans.len());
                for span in &scope_group.spans {
                    spans.push(self.encode_span(span, start_base, event_base)?);
                }
                scope_spans.push(WireScopeSpans {
                    schema_url: scope_group.schema_url.clone(),
                    scope: scope_group.scope.clone(),
                    start_base,
                    event_base,
                    spans,
                });
            }
            resource_spans.push(WireResourceSpans {
                resource,
                schema_url: group.schema_url.clone(),
                scope_spans,
            });
        }

        let update = if self.dict.send_full() {
            let snapshot = self.dict.snapshot();
            self.dict.set_send_full(false);
            self.dict.clear_deltas();
            tracing::debug!(
                session = %self.session_id,
                paths = snapshot.paths.len(),
                span_names = snapshot.span_names.len(),
                "shipping full dictionary snapshot"
            );
            Some(DictUpdate::Full(snapshot))
        } else if self.dict.has_pending_deltas() {
            Some(DictUpdate::Incremental(self.dict.drain_incremental()))
        } else {
            None
        };

        // Too many memoized paths means the window statistics have drifted
        // from the traffic; rebuild from scratch on the next cycle.
        if self.dict.path_count() > self.cfg.threshold_rate {
            self.dict.set_send_full(true);
        }

        Ok(EncodedBatch {
            session_id: self.session_id.clone(),
            update,
            payload: TracePayload {
                session_id: self.session_id.clone(),
                resource_spans,
            },
        })
    }

    /// Feeds every span of the batch through the sliding window, interning
    /// span and attribute names as they appear and re-running order
    /// selection where eviction or a new span name demands it.
    fn update_window(&mut self, traces: &TraceData) -> Result<(), Error> {
        let mut emerged: Vec<String> = Vec::new();
        for group in &traces.resource_spans {
            for scope_group in &group.scope_spans {
                for span in &scope_group.spans {
                    let mut attrs = Vec::with_capacity(span.attributes.len());
                    for attr in &span.attributes {
                        self.dict.intern_attr_name(&attr.key);
                        attrs.push((attr.key.clone(), attr.value.to_blob()?));
                    }
                    let observation = self.window.observe(
                        ObservedSpan {
                            name: span.name.clone(),
                            attrs,
                        },
                        self.cfg.attr_limit,
                    );
                    if observation.new_name {
                        self.dict.intern_span_name(&span.name);
                        emerged.push(span.name.clone());
                    }
                    let mut recomputed: HashSet<String> = HashSet::new();
                    for (name, key) in observation.dropped_below {
                        let already_stable = self
                            .stable
                            .get(&name)
                            .is_some_and(|keys| keys.contains(&key));
                        if !already_stable && recomputed.insert(name.clone()) {
                            self.recompute(&name, true);
                        }
                    }
                }
            }
        }
        if !self.dict.send_full() {
            for name in emerged {
                self.recompute(&name, true);
            }
        }
        Ok(())
    }

    fn encode_span(
        &mut self,
        span: &Span,
        start_base: u64,
        event_base: u64,
    ) -> Result<CompactSpan, Error> {
        let order_keys = self.orders.get(&span.name).cloned().unwrap_or_default();

        // One slot per stable key, in order. A key carried multiple times by
        // the span resolves to its last value; an absent key becomes the
        // sentinel.
        let mut path_array = Vec::with_capacity(order_keys.len());
        for key in &order_keys {
            let last_match = span.attributes.iter().rev().find(|attr| &attr.key == key);
            match last_match {
                Some(attr) => {
                    let blob = attr.value.to_blob()?;
                    path_array.push(self.dict.intern_attr_value(&blob));
                }
                None => path_array.push(PATH_SENTINEL.to_string()),
            }
        }

        let (trie, dict) = (&mut self.trie, &mut self.dict);
        let path_id = trie
            .get_or_assign(&span.name, &path_array, |path| dict.assign_path(path))
            .map(|(id, _)| id);

        let stable = self.stable.get(&span.name);
        let mut attributes = Vec::new();
        for attr in &span.attributes {
            let inline = !stable.is_some_and(|keys| keys.contains(&attr.key));
            if inline {
                attributes.push(InlineAttr {
                    key_id: self.dict.intern_attr_name(&attr.key),
                    value: attr.value.clone(),
                });
            }
        }

        let mut events = Vec::with_capacity(span.events.len());
        for event in &span.events {
            let attrs_id = if event.attributes.is_empty() {
                None
            } else {
                let mut entries = Vec::with_capacity(event.attributes.len());
                for attr in &event.attributes {
                    entries.push(EventAttrBlobEntry {
                        key: attr.key.clone(),
                        value: attr.value.to_blob()?,
                    });
                }
                let blob = serde_json::to_string(&entries)?;
                Some(self.dict.intern_event_attrs(&blob))
            };
            events.push(CompactEvent {
                name_id: self.dict.intern_event_name(&event.name),
                time_offset: event.time_unix_nano.saturating_sub(event_base),
                dropped_attributes_count: event.dropped_attributes_count,
                attrs_id,
            });
        }

        Ok(CompactSpan {
            path_id,
            trace_id: span.trace_id.clone(),
            span_id: span.span_id.clone(),
            parent_span_id: span.parent_span_id.clone(),
            flags: span.flags,
            name_id: self.dict.intern_span_name(&span.name),
            start_offset: span.start_time_unix_nano.saturating_sub(start_base),
            end_offset: span.end_time_unix_nano.saturating_sub(start_base),
            attributes,
            status: span.status.clone(),
            trace_state: span.trace_state.clone(),
            links: span.links.clone(),
            dropped_attributes_count: span.dropped_attributes_count,
            dropped_events_count: span.dropped_events_count,
            dropped_links_count: span.dropped_links_count,
            events,
            kind: span.kind,
        })
    }

    /// Re-selects the stable order for `name`: keys sorted by ascending
    /// distinct-value count, keeping the prefix whose counts stay within the
    /// limit. Resets the name's trie subtree since old paths no longer match
    /// the new schema.
    fn recompute(&mut self, name: &str, emit_delta: bool) {
        self.trie.reset_name(name);

        let mut counts: Vec<(String, usize)> = self
            .window
            .option_counts(name)
            .map(|options| options.iter().map(|(k, c)| (k.clone(), *c)).collect())
            .unwrap_or_default();
        counts.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let mut keys = Vec::new();
        let mut ids = Vec::new();
        let mut membership = HashSet::new();
        for (key, count) in counts {
            if count > self.cfg.attr_limit {
                break;
            }
            ids.push(self.dict.intern_attr_name(&key));
            membership.insert(key.clone());
            keys.push(key);
        }
        tracing::debug!(
            span_name = %name,
            stable_keys = keys.len(),
            "stable attribute order recomputed"
        );
        self.dict.put_order(name, ids, emit_delta);
        self.orders.insert(name.to_string(), keys);
        self.stable.insert(name.to_string(), membership);
    }

    /// The reset path: the value and path dictionaries restart from scratch,
    /// the trie is dropped, and every known span name gets a fresh order. No
    /// order deltas are emitted; the full snapshot that follows carries them
    /// wholesale.
    fn recompute_all(&mut self) {
        self.dict.reset_values_and_paths();
        self.trie.clear();
        self.orders.clear();
        self.stable.clear();
        let names: Vec<String> = self.window.known_names().cloned().collect();
        tracing::debug!(
            session = %self.session_id,
            span_names = names.len(),
            window = self.window.len(),
            "rebuilding stable orders from window statistics"
        );
        for name in names {
            self.recompute(&name, false);
        }
    }
}

fn batch_minima(traces: &TraceData) -> (u64, u64) {
    let mut start_base = DEFAULT_START_BASE;
    let mut event_base = DEFAULT_EVENT_BASE;
    for group in &traces.resource_spans {
        for scope_group in &group.scope_spans {
            for span in &scope_group.spans {
                start_base = start_base.min(span.start_time_unix_nano);
                for event in &span.events {
                    event_base = event_base.min(event.time_unix_nano);
                }
            }
        }
    }
    (start_base, event_base)
}
