//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router serving the static root
//! - Wire up middleware (push, timeout, tracing)
//! - Accept connections and pick HTTP/2 (push) or HTTP/1.1 per connection
//! - Stop accepting on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, extract::ConnectInfo, http::Request, Router};
use hyper::body::Incoming;
use hyper_util::{rt::TokioIo, service::TowerToHyperService};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tower::ServiceExt;
use tower_http::{services::ServeDir, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ServerConfig;
use crate::net::http2;
use crate::net::listener::{Listener, ListenerError};
use crate::push::{AssociationRegistry, PushLayer};

/// Static file server with referrer-based push.
pub struct PushServer {
    router: Router,
    config: ServerConfig,
    push: PushLayer,
}

impl PushServer {
    /// Create a new server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let push = PushLayer::new(&config.push);
        Self::with_push_layer(config, push)
    }

    /// Create a server whose push layer uses an existing registry.
    pub fn with_registry(config: ServerConfig, registry: Arc<AssociationRegistry>) -> Self {
        let push = PushLayer::with_registry(&config.push, registry);
        Self::with_push_layer(config, push)
    }

    fn with_push_layer(config: ServerConfig, push: PushLayer) -> Self {
        let router = Self::build_router(&config, push.clone());
        Self {
            router,
            config,
            push,
        }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// The push layer is outermost, so pushed bodies travel through the same
    /// tracing, timeout and file serving as ordinary requests.
    #[allow(deprecated)]
    fn build_router(config: &ServerConfig, push: PushLayer) -> Router {
        Router::new()
            .fallback_service(ServeDir::new(&config.static_files.root))
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(push)
    }

    /// The router, for embedding in another server or driving in tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn registry(&self) -> Arc<AssociationRegistry> {
        self.push.registry()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            root = %self.config.static_files.root,
            push_enabled = self.config.push.enabled,
            "Push server starting"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(ListenerError::Closed) => break,
                        Err(e) => {
                            tracing::warn!(error = %e, "Accept failed");
                            continue;
                        }
                    };
                    let router = self.router.clone();
                    let preface_wait = Duration::from_secs(self.config.timeouts.request_secs);
                    tokio::spawn(async move {
                        let _permit = permit;
                        serve_tcp(stream, peer, router, preface_wait).await;
                    });
                }
            }
        }

        tracing::info!("Push server stopped");
        Ok(())
    }
}

/// A client that sends nothing decisive within `preface_wait` is dropped.
async fn serve_tcp(stream: TcpStream, peer: SocketAddr, router: Router, preface_wait: Duration) {
    match http2::is_prior_knowledge(&stream, preface_wait).await {
        Ok(true) => {
            if let Err(e) = http2::serve_connection(stream, peer, router).await {
                tracing::debug!(peer = %peer, error = %e, "HTTP/2 connection error");
            }
        }
        Ok(false) => serve_http1(stream, peer, router).await,
        Err(e) => tracing::debug!(peer = %peer, error = %e, "Failed to read connection preface"),
    }
}

async fn serve_http1(stream: TcpStream, peer: SocketAddr, router: Router) {
    let service = router.map_request(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(peer));
        request.map(Body::new)
    });

    if let Err(e) = hyper::server::conn::http1::Builder::new()
        .serve_connection(TokioIo::new(stream), TowerToHyperService::new(service))
        .await
    {
        tracing::debug!(peer = %peer, error = %e, "HTTP/1.1 connection error");
    }
}
