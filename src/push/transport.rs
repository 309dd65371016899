//! Push capability exposed by the connection a request arrived on.
//!
//! A transport that can push inserts a [`PushHandle`] into each request's
//! extensions. Requests without one (HTTP/1.1, or HTTP/2 with push disabled)
//! are never considered for pushing.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;

/// Errors raised while opening or feeding a push stream.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("push refused by transport: {0}")]
    Refused(String),

    #[error("push stream failed: {0}")]
    Stream(String),

    #[error("invalid push target {0:?}")]
    InvalidTarget(String),

    #[error("handler pipeline failed: {0}")]
    Pipeline(String),

    #[error("handler pipeline answered {0}")]
    Status(StatusCode),

    #[error("response body failed: {0}")]
    Body(String),
}

/// Opens server-push streams on the connection a request arrived on.
pub trait PushTransport: Send + Sync {
    /// Promise `path` to the client and return the stream its body is written to.
    ///
    /// `headers` must carry `content-type`.
    fn open_push_stream(
        &self,
        path: &str,
        headers: HeaderMap,
    ) -> Result<Box<dyn PushStream>, PushError>;
}

/// Writable side of a promised resource.
#[async_trait]
pub trait PushStream: Send {
    async fn write(&mut self, data: Bytes) -> Result<(), PushError>;

    /// Finish the stream, optionally with a last chunk.
    async fn end(&mut self, data: Option<Bytes>) -> Result<(), PushError>;

    /// Cancel the promised stream without completing it.
    fn abort(&mut self);
}

/// Request extension marking a push-capable connection.
#[derive(Clone)]
pub struct PushHandle(Arc<dyn PushTransport>);

impl PushHandle {
    pub fn new(transport: impl PushTransport + 'static) -> Self {
        Self(Arc::new(transport))
    }

    pub fn from_arc(transport: Arc<dyn PushTransport>) -> Self {
        Self(transport)
    }

    pub fn open_push_stream(
        &self,
        path: &str,
        headers: HeaderMap,
    ) -> Result<Box<dyn PushStream>, PushError> {
        self.0.open_push_stream(path, headers)
    }
}

impl fmt::Debug for PushHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushHandle").finish_non_exhaustive()
    }
}
