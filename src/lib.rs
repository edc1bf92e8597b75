//! An adaptive prefix-compressed span codec.
//!
//! `tracezip` shrinks streams of tracing telemetry between a producer and a
//! consumer by replacing high-entropy, highly redundant span fields with
//! short base-62 symbols from a shared dictionary, and by folding each
//! span's *stable attribute prefix* (the keys whose values barely vary for
//! a given span name) into a single trie path id. The dictionary is
//! synchronized incrementally: the first batch of a session carries a full
//! snapshot, later batches piggyback only the additions, and quiescent
//! traffic ships nothing but the compact spans themselves.
//!
//! Two peers cooperate:
//!
//! * [`TraceZipExporter`] encodes each batch under a per-session lock,
//!   POSTs the dictionary update to the receiver's dictionary endpoint, and
//!   only then POSTs the compact batch to the trace endpoint.
//! * [`TraceZipReceiver`] mirrors the dictionaries per session id and
//!   inflates every batch back into plain trace data before handing it to a
//!   [`TraceConsumer`].
//!
//! Recovery is deliberately coarse: any transport failure, decoder
//! invariant violation, or path-dictionary overflow forces the next cycle
//! to re-ship a full snapshot, which is cheap next to the data it
//! compresses.
//!
//! ## Quickstart
//!
//! ```no_run
//! use tracezip::{TraceConsumer, TraceZipExporter, TraceZipReceiver};
//! # use tracezip::{model::TraceData, Error};
//!
//! # #[derive(Debug)]
//! # struct Printer;
//! # #[async_trait::async_trait]
//! # impl TraceConsumer for Printer {
//! #     async fn consume(&self, _traces: TraceData) -> Result<(), Error> { Ok(()) }
//! # }
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! // Consumer side: decode batches and hand them to `Printer`.
//! let receiver = std::sync::Arc::new(TraceZipReceiver::new(Printer));
//! tokio::spawn(receiver.serve("127.0.0.1:4318".parse()?));
//!
//! // Producer side: one exporter per dictionary session.
//! let exporter = TraceZipExporter::builder()
//!     .with_endpoint("http://127.0.0.1:4318")
//!     .with_attr_limit(8)
//!     .build()?;
//! # let batch = TraceData::default();
//! exporter.export(&batch).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
mod compression;
pub mod decode;
pub mod dict;
pub mod encode;
mod error;
pub mod exporter;
pub mod model;
pub mod receiver;
pub mod symbol;
mod trie;
mod window;
pub mod wire;

pub use client::HttpClient;
pub use decode::{Decoder, DictionaryMirror};
pub use encode::{EncodedBatch, Session};
pub use error::{BoxError, Error};
pub use exporter::{ExportOutcome, PartialSuccess, TraceZipExporter, TraceZipExporterBuilder};
pub use receiver::{HttpForwarder, TraceConsumer, TraceZipReceiver};

/// Trace-endpoint path, shared by the exporter and the receiver router.
pub const TRACES_PATH: &str = "/v1/traces";

/// Dictionary-endpoint path.
pub const DICTIONARY_PATH: &str = "/v1/traces/dict";

/// Tuning knobs for one codec session.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Sliding-window capacity, in spans. The window feeds the per-name
    /// attribute statistics.
    pub trie_buffer: usize,
    /// A key is stable while its distinct-value count in the window stays at
    /// or below this limit.
    pub attr_limit: usize,
    /// Once the path dictionary grows past this many entries, the session
    /// resets and re-ships a full snapshot.
    pub threshold_rate: usize,
    /// Drop resource attributes from the wire.
    pub delete_resource: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        CodecConfig {
            trie_buffer: 512,
            attr_limit: 8,
            threshold_rate: 4096,
            delete_resource: false,
        }
    }
}
