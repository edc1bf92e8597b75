//! The consumer-side HTTP receiver: one endpoint applies dictionary
//! updates, the other decodes compact batches and hands the reconstructed
//! trace data to a [`TraceConsumer`].
//!
//! Decoder invariant violations (unknown session, unknown id, path/order
//! mismatch) answer 5xx on purpose: the producer observes a transport error,
//! arms its full-snapshot flag, and the next cycle restores convergence.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};

use crate::client::HttpClient;
use crate::compression::gzip_decode;
use crate::decode::Decoder;
use crate::dict::UpdateEnvelope;
use crate::error::Error;
use crate::model::TraceData;
use crate::wire::TracePayload;
use crate::{DICTIONARY_PATH, TRACES_PATH};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Receives each reconstructed batch. Implementations hand the data to the
/// host collector pipeline, forward it over HTTP, or buffer it for tests.
#[async_trait]
pub trait TraceConsumer: std::fmt::Debug + Send + Sync {
    async fn consume(&self, traces: TraceData) -> Result<(), Error>;
}

/// Posts every reconstructed batch to a downstream collector as plain JSON.
#[derive(Debug)]
pub struct HttpForwarder {
    client: Arc<dyn HttpClient>,
    url: http::Uri,
}

impl HttpForwarder {
    pub fn new<T: HttpClient + 'static>(client: T, url: &str) -> Result<HttpForwarder, Error> {
        Ok(HttpForwarder {
            client: Arc::new(client),
            url: url.parse()?,
        })
    }
}

#[async_trait]
impl TraceConsumer for HttpForwarder {
    async fn consume(&self, traces: TraceData) -> Result<(), Error> {
        let body = serde_json::to_vec(&traces)?;
        let request = http::Request::builder()
            .method(http::Method::POST)
            .uri(self.url.clone())
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(body)?;
        let response = self.client.send(request).await.map_err(Error::Client)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Status {
                endpoint: "downstream",
                status: response.status().as_u16(),
                retryable: false,
                retry_after: None,
            })
        }
    }
}

/// HTTP receiver for compact span batches and their dictionary updates.
#[derive(Debug)]
pub struct TraceZipReceiver {
    decoder: Decoder,
    consumer: Arc<dyn TraceConsumer>,
}

impl TraceZipReceiver {
    pub fn new<T: TraceConsumer + 'static>(consumer: T) -> TraceZipReceiver {
        TraceZipReceiver {
            decoder: Decoder::new(),
            consumer: Arc::new(consumer),
        }
    }

    /// Routes one request. Infallible by construction; failures become
    /// status codes.
    pub async fn handle(&self, request: Request<Body>) -> Response<Body> {
        match (request.method(), request.uri().path()) {
            (&Method::POST, TRACES_PATH) => self.handle_traces(request).await,
            (&Method::POST, DICTIONARY_PATH) => self.handle_dictionary(request).await,
            (_, TRACES_PATH) | (_, DICTIONARY_PATH) => error_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "method not allowed, supported: [POST]",
            ),
            _ => error_response(StatusCode::NOT_FOUND, "unknown path"),
        }
    }

    async fn handle_dictionary(&self, request: Request<Body>) -> Response<Body> {
        let body = match read_json_body(request).await {
            Ok(body) => body,
            Err(response) => return *response,
        };
        let envelope = match UpdateEnvelope::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(error = %err, "rejecting dictionary update");
                return error_response(StatusCode::BAD_REQUEST, &err.to_string());
            }
        };
        match self.decoder.apply_update(envelope) {
            Ok(()) => text_response(StatusCode::OK, "dictionary accepted"),
            Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
        }
    }

    async fn handle_traces(&self, request: Request<Body>) -> Response<Body> {
        let body = match read_json_body(request).await {
            Ok(body) => body,
            Err(response) => return *response,
        };
        let payload: TracePayload = match serde_json::from_slice(&body) {
            Ok(payload) => payload,
            Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
        };
        let traces = match self.decoder.decode(&payload) {
            Ok(traces) => traces,
            Err(err) => {
                // Dictionary desynchronization: fail the batch so the
                // producer re-ships a snapshot. Guessing here would corrupt
                // the reconstructed stream.
                tracing::warn!(session = %payload.session_id, error = %err, "failed to decode batch");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
            }
        };
        match self.consumer.consume(traces).await {
            Ok(()) => json_response(StatusCode::OK, r#"{"partialSuccess":{}}"#),
            Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
        }
    }

    /// Binds `addr` and serves until the process is torn down.
    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> Result<(), Error> {
        let make_svc = make_service_fn(move |_conn| {
            let receiver = Arc::clone(&self);
            async move {
                Ok::<_, Infallible>(service_fn(move |request| {
                    let receiver = Arc::clone(&receiver);
                    async move { Ok::<_, Infallible>(receiver.handle(request).await) }
                }))
            }
        });
        tracing::debug!(%addr, "tracezip receiver listening");
        Server::bind(&addr)
            .serve(make_svc)
            .await
            .map_err(|e| Error::Other(e.to_string()))
    }
}

/// Reads the request body, enforcing the JSON content type and inflating
/// gzip bodies. Errors come back as ready-made responses.
async fn read_json_body(request: Request<Body>) -> Result<Vec<u8>, Box<Response<Body>>> {
    let (parts, body) = request.into_parts();

    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or("").trim().to_string())
        .unwrap_or_default();
    if content_type != JSON_CONTENT_TYPE {
        return Err(Box::new(error_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            &format!("unsupported media type, supported: [{JSON_CONTENT_TYPE}]"),
        )));
    }

    let gzipped = parts
        .headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"));

    let bytes = match hyper::body::to_bytes(body).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return Err(Box::new(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("failed to read request body: {err}"),
            )))
        }
    };

    if gzipped {
        gzip_decode(&bytes).map_err(|err| {
            Box::new(error_response(
                StatusCode::BAD_REQUEST,
                &format!("failed to read gzip body: {err}"),
            ))
        })
    } else {
        Ok(bytes.to_vec())
    }
}

fn text_response(status: StatusCode, message: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain")
        .body(Body::from(message.to_string()))
        .unwrap_or_default()
}

fn json_response(status: StatusCode, body: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
        .body(Body::from(body.to_string()))
        .unwrap_or_default()
}

fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    let code = if status == StatusCode::BAD_REQUEST { 3 } else { 13 };
    let body = serde_json::json!({ "code": code, "message": message }).to_string();
    json_response(status, &body)
}
