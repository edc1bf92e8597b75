//! The seven-way dictionary store, its delta log, and the dictionary-update
//! wire forms.
//!
//! The update payload is a JSON object `{"_": session, "t": "a"|"i", "n":
//! [..7 slots..]}`. Slot order differs between the full (`"a"`) and
//! incremental (`"i"`) forms: full carries the stable orders in slot 5 and
//! the span names in slot 6, incremental the other way around. The swap is a
//! wire-compatibility requirement; both sides of this crate and any foreign
//! peer must agree on it byte for byte.

use std::collections::HashMap;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::error::Error;
use crate::symbol::{encode_id, SymbolTable};

/// One `{k, v}` addition to a string-valued dictionary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictEntry {
    #[serde(rename = "k")]
    pub key: String,
    #[serde(rename = "v")]
    pub value: String,
}

/// One addition whose value is an id array, carried on the wire as a
/// JSON-serialized string under `v`. Used for the path and order slots.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayEntry {
    pub key: String,
    pub values: Vec<String>,
}

impl Serialize for ArrayEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = serde_json::to_string(&self.values).map_err(serde::ser::Error::custom)?;
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("k", &self.key)?;
        map.serialize_entry("v", &encoded)?;
        map.end()
    }
}

/// The additions accumulated since the last successful sync, one list per
/// dictionary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaBatch {
    pub attr_names: Vec<DictEntry>,
    pub attr_values: Vec<DictEntry>,
    pub event_attrs: Vec<DictEntry>,
    pub event_names: Vec<DictEntry>,
    pub paths: Vec<ArrayEntry>,
    pub span_names: Vec<DictEntry>,
    pub orders: Vec<ArrayEntry>,
}

impl DeltaBatch {
    pub fn is_empty(&self) -> bool {
        self.attr_names.is_empty()
            && self.attr_values.is_empty()
            && self.event_attrs.is_empty()
            && self.event_names.is_empty()
            && self.paths.is_empty()
            && self.span_names.is_empty()
            && self.orders.is_empty()
    }
}

/// A complete dump of all seven dictionaries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FullSnapshot {
    pub attr_names: HashMap<String, String>,
    pub attr_values: HashMap<String, String>,
    pub event_attrs: HashMap<String, String>,
    pub event_names: HashMap<String, String>,
    pub paths: HashMap<String, Vec<String>>,
    pub orders: HashMap<String, Vec<String>>,
    pub span_names: HashMap<String, String>,
}

/// The two wire forms of a dictionary update.
#[derive(Debug, Clone, PartialEq)]
pub enum DictUpdate {
    Full(FullSnapshot),
    Incremental(DeltaBatch),
}

impl DictUpdate {
    fn kind(&self) -> &'static str {
        match self {
            DictUpdate::Full(_) => "a",
            DictUpdate::Incremental(_) => "i",
        }
    }
}

impl Serialize for DictUpdate {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(7))?;
        match self {
            DictUpdate::Full(full) => {
                seq.serialize_element(&full.attr_names)?;
                seq.serialize_element(&full.attr_values)?;
                seq.serialize_element(&full.event_attrs)?;
                seq.serialize_element(&full.event_names)?;
                seq.serialize_element(&full.paths)?;
                seq.serialize_element(&full.orders)?;
                seq.serialize_element(&full.span_names)?;
            }
            DictUpdate::Incremental(delta) => {
                seq.serialize_element(&delta.attr_names)?;
                seq.serialize_element(&delta.attr_values)?;
                seq.serialize_element(&delta.event_attrs)?;
                seq.serialize_element(&delta.event_names)?;
                seq.serialize_element(&delta.paths)?;
                seq.serialize_element(&delta.span_names)?;
                seq.serialize_element(&delta.orders)?;
            }
        }
        seq.end()
    }
}

/// The dictionary-endpoint payload: session id, update kind, seven slots.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEnvelope {
    pub session_id: String,
    pub update: DictUpdate,
}

impl Serialize for UpdateEnvelope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("_", &self.session_id)?;
        map.serialize_entry("t", self.update.kind())?;
        map.serialize_entry("n", &self.update)?;
        map.end()
    }
}

impl UpdateEnvelope {
    /// Parses a dictionary-endpoint body. The slot layout is heterogeneous,
    /// so this is a hand-written reader over the generic JSON tree rather
    /// than a derived deserializer.
    pub fn from_slice(bytes: &[u8]) -> Result<UpdateEnvelope, Error> {
        let body: JsonValue =
            serde_json::from_slice(bytes).map_err(|e| Error::MalformedUpdate(e.to_string()))?;
        let session_id = body
            .get("_")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| Error::MalformedUpdate("missing session id".to_string()))?
            .to_string();
        let kind = body
            .get("t")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| Error::MalformedUpdate("missing update kind".to_string()))?;
        let slots = body
            .get("n")
            .and_then(JsonValue::as_array)
            .filter(|slots| slots.len() == 7)
            .ok_or_else(|| Error::MalformedUpdate("expected 7 dictionary slots".to_string()))?;

        let update = match kind {
            "a" => DictUpdate::Full(parse_full(slots)?),
            "i" => DictUpdate::Incremental(parse_incremental(slots)?),
            other => {
                return Err(Error::MalformedUpdate(format!(
                    "unknown update kind {other:?}"
                )))
            }
        };
        Ok(UpdateEnvelope { session_id, update })
    }
}

fn parse_string_map(slot: &JsonValue, name: &str) -> Result<HashMap<String, String>, Error> {
    serde_json::from_value(slot.clone())
        .map_err(|e| Error::MalformedUpdate(format!("{name} slot: {e}")))
}

fn parse_array_map(slot: &JsonValue, name: &str) -> Result<HashMap<String, Vec<String>>, Error> {
    serde_json::from_value(slot.clone())
        .map_err(|e| Error::MalformedUpdate(format!("{name} slot: {e}")))
}

fn parse_entries(slot: &JsonValue, name: &str) -> Result<Vec<DictEntry>, Error> {
    serde_json::from_value(slot.clone())
        .map_err(|e| Error::MalformedUpdate(format!("{name} slot: {e}")))
}

fn parse_array_entries(slot: &JsonValue, name: &str) -> Result<Vec<ArrayEntry>, Error> {
    let raw = parse_entries(slot, name)?;
    raw.into_iter()
        .map(|entry| {
            let values = serde_json::from_str(&entry.value)
                .map_err(|e| Error::MalformedUpdate(format!("{name} slot value: {e}")))?;
            Ok(ArrayEntry {
                key: entry.key,
                values,
            })
        })
        .collect()
}

fn parse_full(slots: &[JsonValue]) -> Result<FullSnapshot, Error> {
    Ok(FullSnapshot {
        attr_names: parse_string_map(&slots[0], "attribute name")?,
        attr_values: parse_string_map(&slots[1], "attribute value")?,
        event_attrs: parse_string_map(&slots[2], "event attribute")?,
        event_names: parse_string_map(&slots[3], "event name")?,
        paths: parse_array_map(&slots[4], "path")?,
        orders: parse_array_map(&slots[5], "order")?,
        span_names: parse_string_map(&slots[6], "span name")?,
    })
}

fn parse_incremental(slots: &[JsonValue]) -> Result<DeltaBatch, Error> {
    Ok(DeltaBatch {
        attr_names: parse_entries(&slots[0], "attribute name")?,
        attr_values: parse_entries(&slots[1], "attribute value")?,
        event_attrs: parse_entries(&slots[2], "event attribute")?,
        event_names: parse_entries(&slots[3], "event name")?,
        paths: parse_array_entries(&slots[4], "path")?,
        span_names: parse_entries(&slots[5], "span name")?,
        orders: parse_array_entries(&slots[6], "order")?,
    })
}

/// Producer-side store: the seven dictionaries, their inverse maps, the
/// delta log, and the full-snapshot flag.
#[derive(Debug)]
pub(crate) struct DictionarySet {
    attr_names: SymbolTable,
    attr_values: SymbolTable,
    event_attrs: SymbolTable,
    event_names: SymbolTable,
    span_names: SymbolTable,
    paths: HashMap<String, Vec<String>>,
    path_count: usize,
    orders: HashMap<String, Vec<String>>,
    deltas: DeltaBatch,
    send_full: bool,
}

impl DictionarySet {
    pub(crate) fn new() -> DictionarySet {
        DictionarySet {
            attr_names: SymbolTable::new(),
            attr_values: SymbolTable::new(),
            event_attrs: SymbolTable::new(),
            event_names: SymbolTable::new(),
            span_names: SymbolTable::new(),
            paths: HashMap::new(),
            path_count: 0,
            orders: HashMap::new(),
            deltas: DeltaBatch::default(),
            send_full: true,
        }
    }

    pub(crate) fn intern_attr_name(&mut self, key: &str) -> String {
        let (id, fresh) = self.attr_names.intern(key);
        if fresh {
            self.deltas.attr_names.push(DictEntry {
                key: id.clone(),
                value: key.to_string(),
            });
        }
        id
    }

    pub(crate) fn intern_attr_value(&mut self, blob: &str) -> String {
        let (id, fresh) = self.attr_values.intern(blob);
        if fresh {
            self.deltas.attr_values.push(DictEntry {
                key: id.clone(),
                value: blob.to_string(),
            });
        }
        id
    }

    pub(crate) fn intern_event_name(&mut self, name: &str) -> String {
        let (id, fresh) = self.event_names.intern(name);
        if fresh {
            self.deltas.event_names.push(DictEntry {
                key: id.clone(),
                value: name.to_string(),
            });
        }
        id
    }

    pub(crate) fn intern_event_attrs(&mut self, blob: &str) -> String {
        let (id, fresh) = self.event_attrs.intern(blob);
        if fresh {
            self.deltas.event_attrs.push(DictEntry {
                key: id.clone(),
                value: blob.to_string(),
            });
        }
        id
    }

    pub(crate) fn intern_span_name(&mut self, name: &str) -> String {
        let (id, fresh) = self.span_names.intern(name);
        if fresh {
            self.deltas.span_names.push(DictEntry {
                key: id.clone(),
                value: name.to_string(),
            });
        }
        id
    }

    /// Allocates the next path id and records `path` under it.
    pub(crate) fn assign_path(&mut self, path: &[String]) -> String {
        let id = encode_id(self.path_count);
        self.path_count += 1;
        self.paths.insert(id.clone(), path.to_vec());
        self.deltas.paths.push(ArrayEntry {
            key: id.clone(),
            values: path.to_vec(),
        });
        id
    }

    /// Replaces the stable order of `name`. Incremental syncs announce the
    /// change through a delta entry; the reset path skips the entry because
    /// the following full snapshot carries every order wholesale.
    pub(crate) fn put_order(&mut self, name: &str, ids: Vec<String>, emit_delta: bool) {
        if emit_delta {
            self.deltas.orders.push(ArrayEntry {
                key: name.to_string(),
                values: ids.clone(),
            });
        }
        self.orders.insert(name.to_string(), ids);
    }

    pub(crate) fn path_count(&self) -> usize {
        self.path_count
    }

    pub(crate) fn send_full(&self) -> bool {
        self.send_full
    }

    pub(crate) fn set_send_full(&mut self, send_full: bool) {
        self.send_full = send_full;
    }

    pub(crate) fn has_pending_deltas(&self) -> bool {
        !self.deltas.is_empty()
    }

    /// Atomically returns and clears the delta log.
    pub(crate) fn drain_incremental(&mut self) -> DeltaBatch {
        std::mem::take(&mut self.deltas)
    }

    pub(crate) fn clear_deltas(&mut self) {
        self.deltas = DeltaBatch::default();
    }

    pub(crate) fn snapshot(&self) -> FullSnapshot {
        fn collect(table: &SymbolTable) -> HashMap<String, String> {
            let mut map = HashMap::with_capacity(table.len());
            map.extend(table.iter().map(|(id, v)| (id, v.to_string())));
            map
        }
        FullSnapshot {
            attr_names: collect(&self.attr_names),
            attr_values: collect(&self.attr_values),
            event_attrs: collect(&self.event_attrs),
            event_names: collect(&self.event_names),
            paths: self.paths.clone(),
            orders: self.orders.clone(),
            span_names: collect(&self.span_names),
        }
    }

    /// The reset path: value and path dictionaries restart from scratch.
    /// Name-valued dictionaries survive so previously shipped batches keep
    /// decoding on the consumer.
    pub(crate) fn reset_values_and_paths(&mut self) {
        self.attr_values.clear();
        self.paths.clear();
        self.path_count = 0;
        self.orders.clear();
    }

    #[cfg(test)]
    pub(crate) fn attr_name_count(&self) -> usize {
        self.attr_names.len()
    }
}
