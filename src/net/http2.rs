//! HTTP/2 connections with server push.
//!
//! # Responsibilities
//! - Drive an HTTP/2 server connection and bridge its streams into a tower service
//! - Give every request a `PushHandle` bound to its stream
//! - Send promised resources with flow control
//!
//! # Design Decisions
//! - PUSH_PROMISE goes out when the stream is opened, so it always precedes
//!   the parent response
//! - Pushed response headers are sent on the first write, which lets a failed
//!   push be cancelled with RST_STREAM instead of a bogus 200
//! - A client that disabled push gets `PushError::Refused` for every promise

use std::convert::Infallible;
use std::future::poll_fn;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, HttpBody};
use axum::extract::ConnectInfo;
use axum::http::uri::{Authority, Scheme};
use axum::http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use bytes::Bytes;
use futures_util::StreamExt;
use h2::server::{SendPushedResponse, SendResponse};
use h2::{Reason, RecvStream, SendStream};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tower::{Service, ServiceExt};

use crate::push::transport::{PushError, PushHandle, PushStream, PushTransport};

/// Client connection preface for HTTP/2 with prior knowledge.
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Peek at a fresh connection to see whether it opens with the HTTP/2 preface.
///
/// Fails with `TimedOut` if the client has not sent enough to decide within `wait`.
pub async fn is_prior_knowledge(stream: &TcpStream, wait: Duration) -> std::io::Result<bool> {
    tokio::time::timeout(wait, peek_preface(stream))
        .await
        .map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "connection preface not received in time",
            )
        })?
}

async fn peek_preface(stream: &TcpStream) -> std::io::Result<bool> {
    let mut buf = [0u8; PREFACE.len()];
    loop {
        let n = stream.peek(&mut buf).await?;
        if n == 0 || buf[..n] != PREFACE[..n] {
            return Ok(false);
        }
        if n == PREFACE.len() {
            return Ok(true);
        }
        // Partial preface; peek returns immediately until more bytes arrive.
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Serve one HTTP/2 connection until the peer goes away.
pub async fn serve_connection<T, S>(io: T, peer: SocketAddr, service: S) -> Result<(), h2::Error>
where
    T: AsyncRead + AsyncWrite + Unpin,
    S: Service<Request<Body>, Response = Response<Body>, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    let mut connection = h2::server::handshake(io).await?;
    tracing::debug!(peer = %peer, "HTTP/2 connection established");

    while let Some(accepted) = connection.accept().await {
        let (request, respond) = accepted?;
        let service = service.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_stream(request, respond, peer, service).await {
                tracing::debug!(peer = %peer, error = %e, "HTTP/2 stream failed");
            }
        });
    }

    tracing::debug!(peer = %peer, "HTTP/2 connection closed");
    Ok(())
}

async fn serve_stream<S>(
    request: Request<RecvStream>,
    respond: SendResponse<Bytes>,
    peer: SocketAddr,
    service: S,
) -> Result<(), h2::Error>
where
    S: Service<Request<Body>, Response = Response<Body>, Error = Infallible> + Send + 'static,
    S::Future: Send + 'static,
{
    let (parts, recv) = request.into_parts();
    let respond = Arc::new(Mutex::new(respond));
    let transport = H2PushTransport {
        respond: Arc::clone(&respond),
        scheme: parts.uri.scheme().cloned(),
        authority: parts.uri.authority().cloned(),
    };

    let mut request = Request::from_parts(parts, request_body(recv));
    request.extensions_mut().insert(PushHandle::new(transport));
    request.extensions_mut().insert(ConnectInfo(peer));

    let response = match service.oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    let (parts, body) = response.into_parts();
    let end_of_stream = body.is_end_stream();
    let mut send = {
        let mut respond = lock(&respond);
        respond.send_response(Response::from_parts(parts, ()), end_of_stream)?
    };
    if end_of_stream {
        return Ok(());
    }

    let mut data = body.into_data_stream();
    while let Some(chunk) = data.next().await {
        match chunk {
            Ok(chunk) => send_chunk(&mut send, chunk).await?,
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "Response body failed");
                send.send_reset(Reason::INTERNAL_ERROR);
                return Ok(());
            }
        }
    }
    send.send_data(Bytes::new(), true)
}

fn request_body(recv: RecvStream) -> Body {
    Body::from_stream(futures_util::stream::unfold(recv, |mut recv| async move {
        let chunk = recv.data().await?;
        if let Ok(bytes) = &chunk {
            let _ = recv.flow_control().release_capacity(bytes.len());
        }
        Some((chunk, recv))
    }))
}

/// Send `data` as the peer's flow-control window allows.
async fn send_chunk(stream: &mut SendStream<Bytes>, mut data: Bytes) -> Result<(), h2::Error> {
    while !data.is_empty() {
        stream.reserve_capacity(data.len());
        match poll_fn(|cx| stream.poll_capacity(cx)).await {
            Some(Ok(0)) => continue,
            Some(Ok(capacity)) => {
                let chunk = data.split_to(capacity.min(data.len()));
                stream.send_data(chunk, false)?;
            }
            Some(Err(e)) => return Err(e),
            None => return Err(Reason::CANCEL.into()),
        }
    }
    Ok(())
}

fn lock(respond: &Mutex<SendResponse<Bytes>>) -> MutexGuard<'_, SendResponse<Bytes>> {
    respond.lock().expect("send response mutex poisoned")
}

/// Push capability of a single HTTP/2 request stream.
struct H2PushTransport {
    respond: Arc<Mutex<SendResponse<Bytes>>>,
    scheme: Option<Scheme>,
    authority: Option<Authority>,
}

impl H2PushTransport {
    fn promised_uri(&self, path: &str) -> Result<Uri, PushError> {
        let uri = match (&self.scheme, &self.authority) {
            (Some(scheme), Some(authority)) => Uri::builder()
                .scheme(scheme.clone())
                .authority(authority.clone())
                .path_and_query(path)
                .build()
                .ok(),
            _ => Uri::try_from(path).ok(),
        };
        uri.ok_or_else(|| PushError::InvalidTarget(path.to_string()))
    }
}

impl PushTransport for H2PushTransport {
    fn open_push_stream(
        &self,
        path: &str,
        headers: HeaderMap,
    ) -> Result<Box<dyn PushStream>, PushError> {
        let mut promise = Request::new(());
        *promise.method_mut() = Method::GET;
        *promise.uri_mut() = self.promised_uri(path)?;

        let pushed = lock(&self.respond)
            .push_request(promise)
            .map_err(|e| PushError::Refused(e.to_string()))?;

        Ok(Box::new(H2PushStream {
            state: PushState::Promised { pushed, headers },
        }))
    }
}

enum PushState {
    /// Promise sent, response headers not yet.
    Promised {
        pushed: SendPushedResponse<Bytes>,
        headers: HeaderMap,
    },
    Streaming(SendStream<Bytes>),
    Done,
}

struct H2PushStream {
    state: PushState,
}

impl H2PushStream {
    /// Send the pushed response headers if they have not gone out yet.
    fn begin(&mut self, end_of_stream: bool) -> Result<(), PushError> {
        match std::mem::replace(&mut self.state, PushState::Done) {
            PushState::Promised {
                mut pushed,
                headers,
            } => {
                let mut head = Response::new(());
                *head.status_mut() = StatusCode::OK;
                *head.headers_mut() = headers;
                let stream = pushed
                    .send_response(head, end_of_stream)
                    .map_err(stream_error)?;
                if !end_of_stream {
                    self.state = PushState::Streaming(stream);
                }
                Ok(())
            }
            other => {
                self.state = other;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl PushStream for H2PushStream {
    async fn write(&mut self, data: Bytes) -> Result<(), PushError> {
        self.begin(false)?;
        match &mut self.state {
            PushState::Streaming(stream) => send_chunk(stream, data).await.map_err(stream_error),
            _ => Err(PushError::Stream("push stream already finished".into())),
        }
    }

    async fn end(&mut self, data: Option<Bytes>) -> Result<(), PushError> {
        let data = data.filter(|d| !d.is_empty());
        if data.is_none() && matches!(self.state, PushState::Promised { .. }) {
            return self.begin(true);
        }

        if let Some(data) = data {
            self.write(data).await?;
        } else {
            self.begin(false)?;
        }

        match std::mem::replace(&mut self.state, PushState::Done) {
            PushState::Streaming(mut stream) => {
                stream.send_data(Bytes::new(), true).map_err(stream_error)
            }
            _ => Ok(()),
        }
    }

    fn abort(&mut self) {
        match std::mem::replace(&mut self.state, PushState::Done) {
            PushState::Promised { mut pushed, .. } => pushed.send_reset(Reason::CANCEL),
            PushState::Streaming(mut stream) => stream.send_reset(Reason::CANCEL),
            PushState::Done => {}
        }
    }
}

fn stream_error(e: h2::Error) -> PushError {
    PushError::Stream(e.to_string())
}
