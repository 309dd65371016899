//! Tower middleware wiring the interceptor into a service stack.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, HttpBody};
use axum::http::{Request, Response};
use axum::BoxError;
use bytes::Bytes;
use tower::{Layer, Service};

use crate::config::PushConfig;
use crate::push::dispatcher::PushDispatcher;
use crate::push::interceptor::ReferrerPush;
use crate::push::registry::AssociationRegistry;

/// Layer that learns referer associations and pushes them.
///
/// The wrapped service doubles as the pipeline pushed bodies are generated
/// with, so whatever serves a resource normally also serves it when pushed.
#[derive(Debug, Clone)]
pub struct PushLayer {
    interceptor: Arc<ReferrerPush>,
}

impl PushLayer {
    pub fn new(config: &PushConfig) -> Self {
        Self {
            interceptor: Arc::new(ReferrerPush::new(config)),
        }
    }

    /// Share a registry between layers, or keep a handle to inspect it.
    pub fn with_registry(config: &PushConfig, registry: Arc<AssociationRegistry>) -> Self {
        Self {
            interceptor: Arc::new(ReferrerPush::with_registry(config, registry)),
        }
    }

    pub fn registry(&self) -> Arc<AssociationRegistry> {
        Arc::clone(self.interceptor.registry())
    }
}

impl<S: Clone> Layer<S> for PushLayer {
    type Service = PushService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PushService {
            dispatcher: PushDispatcher::new(inner.clone()),
            inner,
            interceptor: Arc::clone(&self.interceptor),
        }
    }
}

#[derive(Clone)]
pub struct PushService<S> {
    inner: S,
    interceptor: Arc<ReferrerPush>,
    dispatcher: PushDispatcher<S>,
}

impl<S, B> Service<Request<Body>> for PushService<S>
where
    S: Service<Request<Body>, Response = Response<B>> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        if let Some(plan) = self.interceptor.plan(&request) {
            for target in &plan.targets {
                if let Err(e) = self.dispatcher.push(&plan.handle, target) {
                    tracing::debug!(resource = %target, error = %e, "Push not started");
                }
            }
        }

        // The original request always continues, unmodified.
        self.inner.call(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::test_support::RecordingTransport;
    use axum::http::header;
    use std::convert::Infallible;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn assets(request: Request<Body>) -> Result<Response<Body>, Infallible> {
        Ok(Response::new(Body::from(format!("asset {}", request.uri().path()))))
    }

    fn request(uri: &str, referer: Option<&str>, transport: &RecordingTransport) -> Request<Body> {
        let mut builder = Request::get(uri).header(header::HOST, "example.com");
        if let Some(referer) = referer {
            builder = builder.header(header::REFERER, referer);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        request.extensions_mut().insert(transport.handle());
        request
    }

    async fn wait_for_pushes(transport: &RecordingTransport, count: usize) {
        for _ in 0..100 {
            let done = transport
                .pushes()
                .iter()
                .filter(|p| p.ended || p.aborted)
                .count();
            if done >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("pushes did not complete: {:?}", transport.pushes());
    }

    #[tokio::test]
    async fn second_page_load_pushes_learned_stylesheet() {
        let transport = RecordingTransport::new();
        let service = PushLayer::new(&PushConfig::default()).layer(tower::service_fn(assets));

        let response = service.clone().oneshot(request("/", None, &transport)).await.unwrap();
        assert_eq!(response.status(), 200);
        assert!(transport.pushes().is_empty());

        service
            .clone()
            .oneshot(request("/style.css", Some("http://example.com/"), &transport))
            .await
            .unwrap();
        assert!(transport.pushes().is_empty());

        service.clone().oneshot(request("/", None, &transport)).await.unwrap();
        wait_for_pushes(&transport, 1).await;

        let pushes = transport.pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].path, "/style.css");
        assert_eq!(pushes[0].content_type, "text/css");
        assert_eq!(pushes[0].body, b"asset /style.css");
    }

    #[tokio::test]
    async fn original_response_is_untouched_when_push_is_refused() {
        let transport = RecordingTransport::refusing();
        let layer = PushLayer::new(&PushConfig::default());
        let service = layer.clone().layer(tower::service_fn(assets));

        service
            .clone()
            .oneshot(request("/app.js", Some("http://example.com/"), &transport))
            .await
            .unwrap();
        assert_eq!(layer.registry().get_or_create("/").snapshot(), vec!["/app.js"]);

        let response = service.oneshot(request("/", None, &transport)).await.unwrap();
        assert_eq!(response.status(), 200);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"asset /");
    }

    #[tokio::test]
    async fn layers_can_share_a_registry() {
        let registry = Arc::new(AssociationRegistry::new(&PushConfig::default()));
        let transport = RecordingTransport::new();
        let learner = PushLayer::with_registry(&PushConfig::default(), Arc::clone(&registry))
            .layer(tower::service_fn(assets));
        let pusher = PushLayer::with_registry(&PushConfig::default(), Arc::clone(&registry))
            .layer(tower::service_fn(assets));

        learner
            .oneshot(request("/a.css", Some("http://example.com/"), &transport))
            .await
            .unwrap();
        pusher.oneshot(request("/", None, &transport)).await.unwrap();
        wait_for_pushes(&transport, 1).await;

        assert_eq!(transport.paths(), vec!["/a.css"]);
    }

    #[tokio::test]
    async fn separate_layers_learn_independently() {
        let transport = RecordingTransport::new();
        let first = PushLayer::new(&PushConfig::default()).layer(tower::service_fn(assets));
        let second = PushLayer::new(&PushConfig::default()).layer(tower::service_fn(assets));

        first
            .oneshot(request("/a.css", Some("http://example.com/"), &transport))
            .await
            .unwrap();
        second.oneshot(request("/", None, &transport)).await.unwrap();
        tokio::task::yield_now().await;

        assert!(transport.pushes().is_empty());
    }
}
