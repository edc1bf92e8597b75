//! The producer-side transport adapter: encodes batches under the session
//! lock and ships the dictionary update and the compact batch as two
//! ordered POSTs.
//!
//! The dictionary POST always precedes the batch POST, and the session lock
//! is held across the pair so no other encode can slip a delta between an
//! update and the batch that references it. Any transport failure arms the
//! full-snapshot flag before the error is surfaced; the next cycle restores
//! convergence with a fresh snapshot.

use std::sync::Arc;
use std::time::Duration;

use http::header::{CONTENT_ENCODING, CONTENT_TYPE, RETRY_AFTER, USER_AGENT};
use http::{Method, Request, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::client::HttpClient;
use crate::compression::gzip_encode;
use crate::dict::UpdateEnvelope;
use crate::encode::Session;
use crate::error::Error;
use crate::model::TraceData;
use crate::{CodecConfig, DICTIONARY_PATH, TRACES_PATH};

const USER_AGENT_VALUE: &str = concat!("tracezip/", env!("CARGO_PKG_VERSION"));

/// Default receiver endpoint.
const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:4318";

/// Partial-success report from the consumer, surfaced verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialSuccess {
    #[serde(default)]
    pub rejected_spans: u64,
    #[serde(default)]
    pub error_message: String,
}

impl PartialSuccess {
    fn is_empty(&self) -> bool {
        self.rejected_spans == 0 && self.error_message.is_empty()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportTraceResponse {
    #[serde(default)]
    partial_success: Option<PartialSuccess>,
}

/// What a successful export reported back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportOutcome {
    pub partial_success: Option<PartialSuccess>,
}

/// Builder for [`TraceZipExporter`].
#[derive(Debug)]
pub struct TraceZipExporterBuilder {
    endpoint: String,
    client: Option<Arc<dyn HttpClient>>,
    gzip: bool,
    config: CodecConfig,
}

impl Default for TraceZipExporterBuilder {
    fn default() -> Self {
        TraceZipExporterBuilder {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            #[cfg(feature = "reqwest-client")]
            client: Some(Arc::new(reqwest::Client::new())),
            #[cfg(not(feature = "reqwest-client"))]
            client: None,
            gzip: true,
            config: CodecConfig::default(),
        }
    }
}

impl TraceZipExporterBuilder {
    /// Assign the receiver base endpoint; the trace and dictionary paths are
    /// appended to it.
    pub fn with_endpoint<T: Into<String>>(mut self, endpoint: T) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Choose the http client used for both POSTs.
    pub fn with_http_client<T: HttpClient + 'static>(mut self, client: T) -> Self {
        self.client = Some(Arc::new(client));
        self
    }

    /// Toggle gzip of request bodies.
    pub fn with_gzip(mut self, gzip: bool) -> Self {
        self.gzip = gzip;
        self
    }

    /// Sliding-window capacity driving the attribute statistics.
    pub fn with_trie_buffer(mut self, trie_buffer: usize) -> Self {
        self.config.trie_buffer = trie_buffer;
        self
    }

    /// Distinct-value cap below which an attribute key counts as stable.
    pub fn with_attr_limit(mut self, attr_limit: usize) -> Self {
        self.config.attr_limit = attr_limit;
        self
    }

    /// Path-dictionary size that, once exceeded, forces a reset.
    pub fn with_threshold_rate(mut self, threshold_rate: usize) -> Self {
        self.config.threshold_rate = threshold_rate;
        self
    }

    /// Drop resource attributes from the wire.
    pub fn with_delete_resource(mut self, delete_resource: bool) -> Self {
        self.config.delete_resource = delete_resource;
        self
    }

    pub fn build(self) -> Result<TraceZipExporter, Error> {
        let client = self.client.ok_or(Error::NoHttpClient)?;
        Ok(TraceZipExporter {
            traces_url: build_endpoint_uri(&self.endpoint, TRACES_PATH)?,
            dict_url: build_endpoint_uri(&self.endpoint, DICTIONARY_PATH)?,
            client,
            gzip: self.gzip,
            session: Mutex::new(Session::new(self.config)),
        })
    }
}

/// Compressing span exporter. One exporter owns one dictionary session.
#[derive(Debug)]
pub struct TraceZipExporter {
    client: Arc<dyn HttpClient>,
    traces_url: Uri,
    dict_url: Uri,
    gzip: bool,
    session: Mutex<Session>,
}

impl TraceZipExporter {
    pub fn builder() -> TraceZipExporterBuilder {
        TraceZipExporterBuilder::default()
    }

    /// Force the next export to re-ship a full dictionary snapshot.
    pub async fn force_reset(&self) {
        self.session.lock().await.force_full();
    }

    /// Encodes and ships one batch. The dictionary update, when one is due,
    /// is delivered and acknowledged before the batch itself goes out.
    pub async fn export(&self, traces: &TraceData) -> Result<ExportOutcome, Error> {
        let mut session = self.session.lock().await;
        let batch = session.encode(traces)?;

        if let Some(update) = batch.update {
            let envelope = UpdateEnvelope {
                session_id: batch.session_id,
                update,
            };
            let body = serde_json::to_vec(&envelope)?;
            if let Err(err) = self.post(&self.dict_url, body, "dictionary").await {
                tracing::warn!(error = %err, "dictionary synchronization failed");
                session.force_full();
                return Err(err);
            }
        }

        let body = serde_json::to_vec(&batch.payload)?;
        match self.post(&self.traces_url, body, "traces").await {
            Ok(response) => Ok(ExportOutcome {
                partial_success: parse_partial_success(&response),
            }),
            Err(err) => {
                session.force_full();
                Err(err)
            }
        }
    }

    async fn post(
        &self,
        url: &Uri,
        body: Vec<u8>,
        endpoint: &'static str,
    ) -> Result<Vec<u8>, Error> {
        let body = if self.gzip { gzip_encode(&body)? } else { body };
        let mut request = Request::builder()
            .method(Method::POST)
            .uri(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, USER_AGENT_VALUE);
        if self.gzip {
            request = request.header(CONTENT_ENCODING, "gzip");
        }
        let request = request.body(body)?;

        let response = self.client.send(request).await.map_err(Error::Client)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.into_body());
        }

        let retry_after = if is_throttle_status(status) {
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
        } else {
            None
        };
        Err(Error::Status {
            endpoint,
            status: status.as_u16(),
            retryable: is_retryable_status(status),
            retry_after,
        })
    }
}

fn parse_partial_success(body: &[u8]) -> Option<PartialSuccess> {
    if body.is_empty() {
        return None;
    }
    let response: ExportTraceResponse = serde_json::from_slice(body).ok()?;
    let partial = response.partial_success?;
    if partial.is_empty() {
        return None;
    }
    tracing::warn!(
        message = %partial.error_message,
        dropped_spans = partial.rejected_spans,
        "partial success response"
    );
    Some(partial)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 502 | 503 | 504)
}

fn is_throttle_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 503)
}

fn build_endpoint_uri(endpoint: &str, path: &str) -> Result<Uri, Error> {
    let path = if endpoint.ends_with('/') && path.starts_with('/') {
        path.strip_prefix('/').unwrap_or(path)
    } else {
        path
    };
    Ok(format!("{endpoint}{path}").parse()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::DictUpdate;
    use crate::model::{KeyValue, ResourceSpans, ScopeSpans, Span};
    use async_trait::async_trait;
    use http::Response;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Replays a scripted list of status codes and records every request.
    #[derive(Debug, Default)]
    struct ScriptedClient {
        statuses: StdMutex<VecDeque<u16>>,
        requests: StdMutex<Vec<(String, Vec<u8>)>>,
    }

    impl ScriptedClient {
        fn new(statuses: &[u16]) -> Self {
            ScriptedClient {
                statuses: StdMutex::new(statuses.iter().copied().collect()),
                requests: StdMutex::new(Vec::new()),
            }
        }

        fn bodies(&self) -> Vec<(String, Vec<u8>)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedClient {
        async fn send(
            &self,
            request: Request<Vec<u8>>,
        ) -> Result<Response<Vec<u8>>, crate::error::BoxError> {
            let uri = request.uri().path().to_string();
            self.requests
                .lock()
                .unwrap()
                .push((uri, request.into_body()));
            let status = self.statuses.lock().unwrap().pop_front().unwrap_or(200);
            Ok(Response::builder().status(status).body(Vec::new()).unwrap())
        }
    }

    fn traces() -> TraceData {
        TraceData {
            resource_spans: vec![ResourceSpans {
                scope_spans: vec![ScopeSpans {
                    spans: vec![Span {
                        name: "GET /x".to_string(),
                        attributes: vec![KeyValue::new("http.method", "GET")],
                        start_time_unix_nano: 100,
                        end_time_unix_nano: 200,
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }
    }

    fn exporter(client: Arc<ScriptedClient>) -> TraceZipExporter {
        TraceZipExporter::builder()
            .with_endpoint("http://localhost:4318")
            .with_http_client(client)
            .with_gzip(false)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_dictionary_post_precedes_batch_post() {
        let client = Arc::new(ScriptedClient::new(&[200, 200]));
        let exporter = exporter(client.clone());
        exporter.export(&traces()).await.unwrap();

        let bodies = client.bodies();
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[0].0, DICTIONARY_PATH);
        assert_eq!(bodies[1].0, TRACES_PATH);
        let envelope = UpdateEnvelope::from_slice(&bodies[0].1).unwrap();
        assert!(matches!(envelope.update, DictUpdate::Full(_)));
    }

    #[tokio::test]
    async fn test_quiescent_batch_skips_dictionary_post() {
        let client = Arc::new(ScriptedClient::new(&[]));
        let exporter = exporter(client.clone());
        exporter.export(&traces()).await.unwrap();
        exporter.export(&traces()).await.unwrap();

        let paths: Vec<String> = client.bodies().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec![DICTIONARY_PATH, TRACES_PATH, TRACES_PATH]);
    }

    #[tokio::test]
    async fn test_dictionary_failure_reships_full_snapshot() {
        let client = Arc::new(ScriptedClient::new(&[500]));
        let exporter = exporter(client.clone());
        let err = exporter.export(&traces()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Status {
                endpoint: "dictionary",
                status: 500,
                ..
            }
        ));

        // Recovery cycle: a fresh full snapshot goes out first.
        exporter.export(&traces()).await.unwrap();
        let bodies = client.bodies();
        let envelope = UpdateEnvelope::from_slice(&bodies[1].1).unwrap();
        assert!(matches!(envelope.update, DictUpdate::Full(_)));
    }

    #[tokio::test]
    async fn test_trace_failure_arms_full_snapshot() {
        let client = Arc::new(ScriptedClient::new(&[200, 503]));
        let exporter = exporter(client.clone());
        let err = exporter.export(&traces()).await.unwrap_err();
        assert!(err.is_retryable());

        exporter.export(&traces()).await.unwrap();
        let bodies = client.bodies();
        // dict, traces(503), dict(full again), traces
        assert_eq!(bodies.len(), 4);
        let envelope = UpdateEnvelope::from_slice(&bodies[2].1).unwrap();
        assert!(matches!(envelope.update, DictUpdate::Full(_)));
    }

    #[test]
    fn test_build_endpoint_uri() {
        let uri = build_endpoint_uri("http://example.com", "/v1/traces").unwrap();
        assert_eq!(uri, "http://example.com/v1/traces");
        let uri = build_endpoint_uri("http://example.com/", "/v1/traces").unwrap();
        assert_eq!(uri, "http://example.com/v1/traces");
    }

    #[test]
    fn test_retryable_status_classification() {
        for status in [429u16, 502, 503, 504] {
            assert!(is_retryable_status(StatusCode::from_u16(status).unwrap()));
        }
        for status in [400u16, 401, 404, 500] {
            assert!(!is_retryable_status(StatusCode::from_u16(status).unwrap()));
        }
    }
}
