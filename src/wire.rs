//! Compact wire forms for the trace endpoint.
//!
//! A compact span is a record keyed by single-character tags; the rename
//! table below is the authoritative tag-to-field mapping and must match the
//! peer exactly. Absent tags decode as defaults.

use serde::{Deserialize, Serialize};

use crate::model::{is_zero_u32, is_zero_u64, Link, Scope, Status, Value};

/// Trace-endpoint payload: the session envelope around the compact batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracePayload {
    #[serde(rename = "_")]
    pub session_id: String,
    #[serde(rename = "a", default, skip_serializing_if = "Vec::is_empty")]
    pub resource_spans: Vec<WireResourceSpans>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireResourceSpans {
    #[serde(default)]
    pub resource: WireResource,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub schema_url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope_spans: Vec<WireScopeSpans>,
}

/// Resource attributes are not dictionary-compressed; they ride along once
/// per group with the value in its serialized blob form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireResource {
    pub attributes: Vec<WireAttr>,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub dropped_attributes_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireAttr {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireScopeSpans {
    #[serde(rename = "schemaUrl", default, skip_serializing_if = "String::is_empty")]
    pub schema_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    /// Batch-wide minimum span start time; span times are offsets from it.
    #[serde(rename = "to")]
    pub start_base: u64,
    /// Batch-wide minimum event time.
    #[serde(rename = "eo", default, skip_serializing_if = "is_zero_u64")]
    pub event_base: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<CompactSpan>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompactSpan {
    /// Path id into the path dictionary; absent when the span's name has no
    /// stable keys.
    #[serde(rename = "_", default, skip_serializing_if = "Option::is_none")]
    pub path_id: Option<String>,
    #[serde(rename = "0", default, skip_serializing_if = "String::is_empty")]
    pub trace_id: String,
    #[serde(rename = "1", default, skip_serializing_if = "String::is_empty")]
    pub span_id: String,
    #[serde(rename = "2", default, skip_serializing_if = "String::is_empty")]
    pub parent_span_id: String,
    #[serde(rename = "3", default, skip_serializing_if = "is_zero_u32")]
    pub flags: u32,
    #[serde(rename = "4")]
    pub name_id: String,
    #[serde(rename = "5", default)]
    pub start_offset: u64,
    #[serde(rename = "6", default)]
    pub end_offset: u64,
    /// Attributes outside the stable order, inline.
    #[serde(rename = "7", default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<InlineAttr>,
    #[serde(rename = "8", default, skip_serializing_if = "Status::is_unset")]
    pub status: Status,
    #[serde(rename = "9", default, skip_serializing_if = "String::is_empty")]
    pub trace_state: String,
    #[serde(rename = "a", default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
    #[serde(rename = "b", default, skip_serializing_if = "is_zero_u32")]
    pub dropped_attributes_count: u32,
    #[serde(rename = "c", default, skip_serializing_if = "is_zero_u32")]
    pub dropped_events_count: u32,
    #[serde(rename = "d", default, skip_serializing_if = "is_zero_u32")]
    pub dropped_links_count: u32,
    #[serde(rename = "e", default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<CompactEvent>,
    #[serde(rename = "f", default)]
    pub kind: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineAttr {
    #[serde(rename = "k")]
    pub key_id: String,
    #[serde(rename = "v")]
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompactEvent {
    #[serde(rename = "n")]
    pub name_id: String,
    #[serde(rename = "t", default, skip_serializing_if = "is_zero_u64")]
    pub time_offset: u64,
    #[serde(rename = "d", default, skip_serializing_if = "is_zero_u32")]
    pub dropped_attributes_count: u32,
    #[serde(rename = "a", default, skip_serializing_if = "Option::is_none")]
    pub attrs_id: Option<String>,
}

/// One entry of the canonical event-attribute blob: the value is itself in
/// serialized blob form. The blob is the JSON serialization of a list of
/// these, deduplicated by exact byte equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventAttrBlobEntry {
    pub key: String,
    pub value: String,
}
