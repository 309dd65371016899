//! In-memory push transport for unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use bytes::Bytes;

use crate::push::transport::{PushError, PushHandle, PushStream, PushTransport};

#[derive(Debug, Clone, Default)]
pub(crate) struct Pushed {
    pub path: String,
    pub content_type: String,
    pub body: Vec<u8>,
    pub ended: bool,
    pub aborted: bool,
}

#[derive(Clone, Default)]
pub(crate) struct RecordingTransport {
    pushes: Arc<Mutex<Vec<Pushed>>>,
    refuse: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
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
}

impl PushTransport for RecordingTransport {
    fn open_push_stream(
        &self,
        path: &str,
        headers: HeaderMap,
    ) -> Result<Box<dyn PushStream>, PushError> {
        if self.refuse {
            return Err(PushError::Refused("push disabled by peer".into()));
        }
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
        let pushed = &mut pushes[self.index];
        if let Some(data) = data {
            pushed.body.extend_from_slice(&data);
        }
        pushed.ended = true;
        Ok(())
    }

    fn abort(&mut self) {
        self.pushes.lock().unwrap()[self.index].aborted = true;
    }
}
