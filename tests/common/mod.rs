//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use bytes::Bytes;
use referrer_push::config::ServerConfig;
use referrer_push::net::Listener;
use referrer_push::push::{AssociationRegistry, PushError, PushHandle, PushStream, PushTransport};
use referrer_push::{PushServer, Shutdown};

/// Directory holding the fixture site.
pub fn site_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("site")
}

pub fn fixture(name: &str) -> Vec<u8> {
    std::fs::read(site_root().join(name.trim_start_matches('/'))).unwrap()
}

/// Default configuration serving the fixture site on an ephemeral port.
pub fn site_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.static_files.root = site_root().display().to_string();
    config
}

/// A running server and what the test needs to talk to and stop it.
pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<AssociationRegistry>,
    pub shutdown: Shutdown,
}

pub async fn start_server(config: ServerConfig) -> TestServer {
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = PushServer::new(config);
    let registry = server.registry();
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    TestServer {
        addr,
        registry,
        shutdown,
    }
}

#[derive(Debug, Clone, Default)]
pub struct Pushed {
    pub path: String,
    pub content_type: String,
    pub body: Vec<u8>,
    pub ended: bool,
    pub aborted: bool,
}

impl Pushed {
    pub fn finished(&self) -> bool {
        self.ended || self.aborted
    }
}

/// Push transport that keeps everything pushed in memory.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    pushes: Arc<Mutex<Vec<Pushed>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> PushHandle {
        PushHandle::new(self.clone())
    }

    pub fn pushes(&self) -> Vec<Pushed> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.pushes().into_iter().map(|p| p.path).collect()
    }

    /// Wait until `count` pushes have ended or been aborted.
    pub async fn wait_for(&self, count: usize) -> Vec<Pushed> {
        for _ in 0..400 {
            let pushes = self.pushes();
            if pushes.iter().filter(|p| p.finished()).count() >= count {
                return pushes;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} finished pushes, got {:?}", self.pushes());
    }
}

impl PushTransport for RecordingTransport {
    fn open_push_stream(
        &self,
        path: &str,
        headers: HeaderMap,
    ) -> Result<Box<dyn PushStream>, PushError> {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let mut pushes = self.pushes.lock().unwrap();
        pushes.push(Pushed {
            path: path.to_string(),
            content_type,
            ..Pushed::default()
        });
        Ok(Box::new(RecordingStream {
            pushes: Arc::clone(&self.pushes),
            index: pushes.len() - 1,
        }))
    }
}

struct RecordingStream {
    pushes: Arc<Mutex<Vec<Pushed>>>,
    index: usize,
}

#[async_trait]
impl PushStream for RecordingStream {
    async fn write(&mut self, data: Bytes) -> Result<(), PushError> {
        self.pushes.lock().unwrap()[self.index]
            .body
            .extend_from_slice(&data);
        Ok(())
    }

    async fn end(&mut self, data: Option<Bytes>) -> Result<(), PushError> {
        let mut pushes = self.pushes.lock().unwrap();
        if let Some(data) = data {
            pushes[self.index].body.extend_from_slice(&data);
        }
        pushes[self.index].ended = true;
        Ok(())
    }

    fn abort(&mut self) {
        self.pushes.lock().unwrap()[self.index].aborted = true;
    }
}
