//! Codec-level scenarios: a session encoder on one side, a decoder mirror on
//! the other, with every payload pushed through its real JSON wire form.

use tracezip::decode::Decoder;
use tracezip::dict::{DictUpdate, UpdateEnvelope};
use tracezip::encode::Session;
use tracezip::model::{
    Event, KeyValue, Link, Resource, ResourceSpans, ScopeSpans, Span, Status, TraceData, Value,
};
use tracezip::wire::TracePayload;
use tracezip::CodecConfig;

fn batch(spans: Vec<Span>) -> TraceData {
    TraceData {
        resource_spans: vec![ResourceSpans {
            resource: Resource {
                attributes: vec![KeyValue::new("service.name", "checkout")],
                dropped_attributes_count: 0,
            },
            schema_url: "https://opentelemetry.io/schemas/1.21.0".to_string(),
            scope_spans: vec![ScopeSpans {
                spans,
                ..Default::default()
            }],
        }],
    }
}

fn span(name: &str, attrs: &[(&str, &str)]) -> Span {
    Span {
        trace_id: "5b8efff798038103d269b633813fc60c".to_string(),
        span_id: "eee19b7ec3c1b174".to_string(),
        parent_span_id: "eee19b7ec3c1b173".to_string(),
        name: name.to_string(),
        kind: 2,
        start_time_unix_nano: 1_544_712_660_000_000_000,
        end_time_unix_nano: 1_544_712_661_000_000_000,
        attributes: attrs
            .iter()
            .map(|(k, v)| KeyValue::new(*k, *v))
            .collect(),
        ..Default::default()
    }
}

/// Ships one encoded batch to a decoder through the actual wire bytes, the
/// way the transport would.
fn ship(session: &mut Session, decoder: &Decoder, traces: &TraceData) -> TraceData {
    let out = session.encode(traces).unwrap();
    if let Some(update) = out.update {
        let envelope = UpdateEnvelope {
            session_id: out.session_id.clone(),
            update,
        };
        let bytes = serde_json::to_vec(&envelope).unwrap();
        decoder
            .apply_update(UpdateEnvelope::from_slice(&bytes).unwrap())
            .unwrap();
    }
    let bytes = serde_json::to_vec(&out.payload).unwrap();
    let payload: TracePayload = serde_json::from_slice(&bytes).unwrap();
    decoder.decode(&payload).unwrap()
}

/// Round-trip equality holds modulo attribute ordering within a span.
fn normalized(mut data: TraceData) -> TraceData {
    for group in &mut data.resource_spans {
        for scope_group in &mut group.scope_spans {
            for span in &mut scope_group.spans {
                span.attributes
                    .sort_by_key(|a| (a.key.clone(), a.value.to_blob().unwrap_or_default()));
            }
        }
    }
    data
}

#[test]
fn round_trips_a_rich_span() {
    let mut session = Session::new(CodecConfig::default());
    let decoder = Decoder::new();

    let mut rich = span("GET /cart", &[("http.method", "GET"), ("http.route", "/cart")]);
    rich.trace_state = "congo=t61rcWkgMzE".to_string();
    rich.flags = 1;
    rich.dropped_attributes_count = 2;
    rich.dropped_events_count = 1;
    rich.status = Status {
        code: 2,
        message: "boom".to_string(),
    };
    rich.links = vec![Link {
        trace_id: "5b8efff798038103d269b633813fc60c".to_string(),
        span_id: "aaaa9b7ec3c1b174".to_string(),
        attributes: vec![KeyValue::new("peer", "inventory")],
        ..Default::default()
    }];
    rich.events = vec![Event {
        name: "exception".to_string(),
        time_unix_nano: 1_544_712_660_300_000_000,
        attributes: vec![
            KeyValue::new("exception.type", "io"),
            KeyValue::new("exception.escaped", true),
        ],
        dropped_attributes_count: 3,
    }];

    let traces = batch(vec![rich]);
    let decoded = ship(&mut session, &decoder, &traces);
    assert_eq!(normalized(decoded), normalized(traces));
}

#[test]
fn round_trips_every_value_type() {
    let mut session = Session::new(CodecConfig::default());
    let decoder = Decoder::new();

    let mut typed = span("typed", &[]);
    typed.attributes = vec![
        KeyValue::new("string", "text"),
        KeyValue::new("int", 42i64),
        KeyValue::new("bool", true),
        KeyValue::new("double", 0.5f64),
        KeyValue::new(
            "array",
            Value::Array(vec![Value::from(1i64), Value::from(2i64)]),
        ),
        KeyValue::new("kvlist", Value::KeyValues(vec![KeyValue::new("a", "b")])),
        KeyValue::new("bytes", Value::Bytes(vec![1, 2, 3])),
    ];

    let traces = batch(vec![typed]);
    let decoded = ship(&mut session, &decoder, &traces);
    assert_eq!(normalized(decoded), normalized(traces));
}

#[test]
fn quiescent_batches_reuse_path_ids() {
    let mut session = Session::new(CodecConfig::default());
    let decoder = Decoder::new();
    let traces = batch(vec![span(
        "GET /x",
        &[("http.method", "GET"), ("http.route", "/x")],
    )]);

    let first = session.encode(&traces).unwrap();
    assert!(matches!(first.update, Some(DictUpdate::Full(_))));
    let envelope = UpdateEnvelope {
        session_id: first.session_id.clone(),
        update: first.update.unwrap(),
    };
    decoder.apply_update(envelope).unwrap();
    decoder.decode(&first.payload).unwrap();

    let second = session.encode(&traces).unwrap();
    assert!(second.update.is_none(), "nothing new to synchronize");
    assert_eq!(
        second.payload.resource_spans[0].scope_spans[0].spans[0].path_id,
        first.payload.resource_spans[0].scope_spans[0].spans[0].path_id,
    );
    let decoded = decoder.decode(&second.payload).unwrap();
    assert_eq!(normalized(decoded), normalized(traces));
}

#[test]
fn new_value_ships_one_value_and_one_path() {
    let mut session = Session::new(CodecConfig::default());
    let decoder = Decoder::new();

    ship(
        &mut session,
        &decoder,
        &batch(vec![span("GET /x", &[("http.method", "GET"), ("http.route", "/x")])]),
    );

    let traces = batch(vec![span(
        "GET /x",
        &[("http.method", "GET"), ("http.route", "/y")],
    )]);
    let out = session.encode(&traces).unwrap();
    let Some(DictUpdate::Incremental(delta)) = &out.update else {
        panic!("expected an incremental update");
    };
    assert_eq!(delta.attr_values.len(), 1);
    assert_eq!(delta.paths.len(), 1);
    assert!(delta.attr_names.is_empty());
    assert!(delta.event_names.is_empty());
    assert!(delta.span_names.is_empty());
    assert!(delta.orders.is_empty());

    let envelope = UpdateEnvelope {
        session_id: out.session_id.clone(),
        update: out.update.unwrap(),
    };
    decoder.apply_update(envelope).unwrap();
    let decoded = decoder.decode(&out.payload).unwrap();
    assert_eq!(normalized(decoded), normalized(traces));
}

#[test]
fn cardinality_overflow_demotes_a_stable_key() {
    let cfg = CodecConfig {
        trie_buffer: 3,
        attr_limit: 1,
        ..Default::default()
    };
    let mut session = Session::new(cfg);
    let decoder = Decoder::new();

    // "k" starts stable (one distinct value), "h" does not (two).
    ship(
        &mut session,
        &decoder,
        &batch(vec![
            span("op", &[("k", "v1"), ("h", "a1")]),
            span("op", &[("k", "v1"), ("h", "a2")]),
        ]),
    );
    // Push "k" to three distinct values; no reorder trigger fires yet.
    ship(
        &mut session,
        &decoder,
        &batch(vec![span("op", &[("k", "v2")]), span("op", &[("k", "v3")])]),
    );

    // The next span evicts the last "h" occurrence: its distinct-value count
    // drops below the limit, the order is recomputed, and "k", now at three
    // distinct values, falls out of the stable prefix.
    let traces = batch(vec![span("op", &[("k", "v4")])]);
    let out = session.encode(&traces).unwrap();
    let Some(DictUpdate::Incremental(delta)) = &out.update else {
        panic!("expected an incremental update");
    };
    assert_eq!(delta.orders.len(), 1);
    assert_eq!(delta.orders[0].key, "op");
    assert_eq!(delta.orders[0].values, vec!["B".to_string()], "only h stays");
    assert!(delta.attr_values.is_empty(), "inline values are not interned");

    let encoded_span = &out.payload.resource_spans[0].scope_spans[0].spans[0];
    assert_eq!(encoded_span.attributes.len(), 1, "k moved inline");

    let envelope = UpdateEnvelope {
        session_id: out.session_id.clone(),
        update: out.update.unwrap(),
    };
    decoder.apply_update(envelope).unwrap();
    let decoded = decoder.decode(&out.payload).unwrap();
    assert_eq!(normalized(decoded), normalized(traces));
}

#[test]
fn path_count_threshold_resets_the_session() {
    let cfg = CodecConfig {
        threshold_rate: 2,
        ..Default::default()
    };
    let mut session = Session::new(cfg);
    let decoder = Decoder::new();

    for route in ["/a", "/b", "/c"] {
        ship(
            &mut session,
            &decoder,
            &batch(vec![span("op", &[("http.route", route)])]),
        );
    }
    assert!(session.needs_full());

    let traces = batch(vec![span("op", &[("http.route", "/a")])]);
    let out = session.encode(&traces).unwrap();
    let Some(DictUpdate::Full(snapshot)) = &out.update else {
        panic!("threshold crossing must re-ship a full snapshot");
    };
    assert_eq!(snapshot.paths.len(), 1, "path dictionary restarted");
    assert_eq!(snapshot.attr_values.len(), 1, "value dictionary restarted");

    let envelope = UpdateEnvelope {
        session_id: out.session_id.clone(),
        update: out.update.unwrap(),
    };
    decoder.apply_update(envelope).unwrap();
    let decoded = decoder.decode(&out.payload).unwrap();
    assert_eq!(normalized(decoded), normalized(traces));
}

#[test]
fn dictionaries_grow_monotonically_between_resets() {
    let mut session = Session::new(CodecConfig::default());
    let decoder = Decoder::new();

    let mut kinds = Vec::new();
    for route in ["/a", "/b", "/a", "/c", "/b"] {
        let out = session
            .encode(&batch(vec![span("op", &[("http.route", route)])]))
            .unwrap();
        kinds.push(match &out.update {
            Some(DictUpdate::Full(_)) => "full",
            Some(DictUpdate::Incremental(_)) => "incremental",
            None => "none",
        });
        if let Some(update) = out.update {
            decoder
                .apply_update(UpdateEnvelope {
                    session_id: out.session_id.clone(),
                    update,
                })
                .unwrap();
        }
        decoder.decode(&out.payload).unwrap();
    }
    // Repeated values reuse their ids: only genuinely new routes produce
    // synchronization traffic, and nothing after the first snapshot is full.
    assert_eq!(
        kinds,
        vec!["full", "incremental", "none", "incremental", "none"]
    );
}

#[test]
fn separate_sessions_do_not_share_dictionaries() {
    let decoder = Decoder::new();
    let mut one = Session::new(CodecConfig::default());
    let mut two = Session::new(CodecConfig::default());

    let traces_one = batch(vec![span("alpha", &[("a", "1")])]);
    let traces_two = batch(vec![span("beta", &[("b", "2")])]);
    let decoded_one = ship(&mut one, &decoder, &traces_one);
    let decoded_two = ship(&mut two, &decoder, &traces_two);

    assert_eq!(normalized(decoded_one), normalized(traces_one));
    assert_eq!(normalized(decoded_two), normalized(traces_two));
}

#[test]
fn explicit_reset_reships_a_snapshot_covering_the_batch() {
    let mut session = Session::new(CodecConfig::default());
    let decoder = Decoder::new();
    let traces = batch(vec![span("GET /x", &[("http.method", "GET")])]);

    ship(&mut session, &decoder, &traces);
    session.force_full();

    let out = session.encode(&traces).unwrap();
    let Some(DictUpdate::Full(snapshot)) = &out.update else {
        panic!("explicit reset must produce a snapshot");
    };
    let encoded_span = &out.payload.resource_spans[0].scope_spans[0].spans[0];
    // Every id the batch references is present in the snapshot it rides with.
    assert!(snapshot.span_names.contains_key(&encoded_span.name_id));
    if let Some(path_id) = &encoded_span.path_id {
        assert!(snapshot.paths.contains_key(path_id));
    }
}
