//! Push dispatch through the ordinary handler pipeline.
//!
//! # Data Flow
//! ```text
//! push(handle, "/style.css")
//!     → SyntheticRequest (GET, no headers, loopback origin, InternalRequest)
//!     → PushHandle::open_push_stream (promise goes out before the page response)
//!     → spawned task: pipeline.oneshot(request)
//!     → PushResponse::forward (body chunks written into the push stream)
//! ```
//!
//! # Design Decisions
//! - Fire-and-forget: the page response never waits on a push
//! - Failures abort the promised stream, get logged, and are not retried
//! - An unfinished `PushResponse` aborts its stream when dropped

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::body::{Body, HttpBody};
use axum::extract::ConnectInfo;
use axum::http::{header, HeaderMap, HeaderValue, Request, Response, Uri};
use axum::BoxError;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tower::{Service, ServiceExt};

use crate::observability::metrics;
use crate::push::classifier::{content_type, FALLBACK_CONTENT_TYPE};
use crate::push::transport::{PushError, PushHandle, PushStream};

/// Extension carried by every request the dispatcher generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalRequest;

/// Peer address reported for synthetic requests.
pub const LOOPBACK_ORIGIN: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);

/// Request descriptor for a pushed resource.
#[derive(Debug, Clone)]
pub struct SyntheticRequest {
    target: Uri,
}

impl SyntheticRequest {
    /// A GET for an origin-form target such as `/style.css`.
    pub fn get(target: &str) -> Result<Self, PushError> {
        let uri: Uri = target
            .parse()
            .map_err(|_| PushError::InvalidTarget(target.to_string()))?;
        if uri.scheme().is_some() || uri.authority().is_some() || !target.starts_with('/') {
            return Err(PushError::InvalidTarget(target.to_string()));
        }
        Ok(Self { target: uri })
    }

    pub fn target(&self) -> &Uri {
        &self.target
    }

    /// Build the request handed to the pipeline.
    pub fn into_request(self) -> Request<Body> {
        let mut request = Request::new(Body::empty());
        *request.uri_mut() = self.target;
        request.extensions_mut().insert(InternalRequest);
        request.extensions_mut().insert(ConnectInfo(LOOPBACK_ORIGIN));
        request
    }
}

/// Response sink whose writes land in a push stream instead of the connection.
pub struct PushResponse {
    target: String,
    stream: Box<dyn PushStream>,
    finished: bool,
}

impl PushResponse {
    pub fn new(target: impl Into<String>, stream: Box<dyn PushStream>) -> Self {
        Self {
            target: target.into(),
            stream,
            finished: false,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub async fn write(&mut self, data: Bytes) -> Result<(), PushError> {
        self.stream.write(data).await
    }

    pub async fn end(&mut self, data: Option<Bytes>) -> Result<(), PushError> {
        self.finished = true;
        self.stream.end(data).await
    }

    pub fn abort(&mut self) {
        if !self.finished {
            self.finished = true;
            self.stream.abort();
        }
    }

    /// Drain a pipeline response into the push stream. Returns bytes written.
    pub async fn forward<B>(mut self, response: Response<B>) -> Result<u64, PushError>
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let status = response.status();
        if !status.is_success() {
            self.abort();
            return Err(PushError::Status(status));
        }

        let mut body = Body::new(response.into_body()).into_data_stream();
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.abort();
                    return Err(PushError::Body(e.to_string()));
                }
            };
            written += chunk.len() as u64;
            if let Err(e) = self.write(chunk).await {
                self.abort();
                return Err(e);
            }
        }

        self.end(None).await?;
        Ok(written)
    }
}

impl Drop for PushResponse {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Re-enters the handler pipeline to produce pushed bodies.
#[derive(Clone)]
pub struct PushDispatcher<S> {
    pipeline: S,
}

impl<S> PushDispatcher<S> {
    pub fn new(pipeline: S) -> Self {
        Self { pipeline }
    }
}

impl<S, B> PushDispatcher<S>
where
    S: Service<Request<Body>, Response = Response<B>> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    /// Promise `target` on `handle` and generate its body in the background.
    ///
    /// Only opening the stream can fail synchronously; everything after that
    /// is logged by the spawned task and never reaches the caller.
    pub fn push(&self, handle: &PushHandle, target: &str) -> Result<JoinHandle<()>, PushError> {
        let request = SyntheticRequest::get(target)?;

        let content_type = content_type(target).unwrap_or(FALLBACK_CONTENT_TYPE);
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));

        let stream = match handle.open_push_stream(target, headers) {
            Ok(stream) => stream,
            Err(e) => {
                metrics::record_push_stream("refused");
                return Err(e);
            }
        };
        metrics::record_push_stream("opened");
        tracing::debug!(resource = %target, content_type, "Server push");

        let response = PushResponse::new(target, stream);
        let pipeline = self.pipeline.clone();

        Ok(tokio::spawn(async move {
            let target = response.target().to_string();
            // Converted before the next await; the pipeline error need not be Send.
            let reply = pipeline
                .oneshot(request.into_request())
                .await
                .map_err(|e| PushError::Pipeline(e.into().to_string()));
            let result = match reply {
                Ok(reply) => response.forward(reply).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(bytes) => {
                    tracing::debug!(resource = %target, bytes, "Push completed");
                    metrics::record_push_completed("ok");
                }
                Err(e) => {
                    tracing::warn!(resource = %target, error = %e, "Error when pushing resource");
                    metrics::record_push_completed("failed");
                }
            }
        }))
    }
}
