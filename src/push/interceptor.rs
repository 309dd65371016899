//! Learn/exploit decision for each inbound request.
//!
//! # Data Flow
//! ```text
//! request
//!     → gate::should_handle (skip silently if ineligible)
//!     → classifier::classify
//!         Main      → registry[url].snapshot()            → push all
//!         Secondary → referer missing/malformed            → nothing
//!                     url not yet under registry[referer]  → try_associate (learn)
//!                     url already under registry[referer]  → push registry[url].snapshot()
//! ```
//!
//! The second secondary case lets a stylesheet that was itself learned as a
//! main key (fonts it references) have its own resources pushed.

use std::sync::Arc;

use axum::http::{header, Request, Uri};
use url::Url;

use crate::config::PushConfig;
use crate::push::classifier::{classify, ResourceKind};
use crate::push::gate;
use crate::push::registry::AssociationRegistry;
use crate::push::transport::PushHandle;

/// What to push for one request, in push order.
#[derive(Debug, Clone)]
pub struct PushPlan {
    pub handle: PushHandle,
    pub targets: Vec<String>,
}

/// Owns the association registry and decides per request.
#[derive(Debug)]
pub struct ReferrerPush {
    registry: Arc<AssociationRegistry>,
    enabled: bool,
}

impl ReferrerPush {
    /// Create an interceptor with a fresh registry.
    pub fn new(config: &PushConfig) -> Self {
        Self::with_registry(config, Arc::new(AssociationRegistry::new(config)))
    }

    /// Create an interceptor around an existing registry.
    ///
    /// Limits come from the registry; only `enabled` is read from `config`.
    pub fn with_registry(config: &PushConfig, registry: Arc<AssociationRegistry>) -> Self {
        Self {
            registry,
            enabled: config.enabled,
        }
    }

    pub fn registry(&self) -> &Arc<AssociationRegistry> {
        &self.registry
    }

    /// Run the learn/exploit step. `None` means the request is ineligible.
    pub fn plan<B>(&self, request: &Request<B>) -> Option<PushPlan> {
        if !self.enabled || !gate::should_handle(request) {
            return None;
        }
        let handle = request.extensions().get::<PushHandle>()?.clone();
        let url = request_target(request.uri());

        let targets = match classify(url) {
            ResourceKind::Main => {
                let record = self.registry.get_or_create(url);
                let targets = record.snapshot();
                tracing::debug!(url = %url, pushes = ?targets, "Main resource");
                targets
            }
            ResourceKind::Secondary => self.on_secondary(request, url),
        };

        Some(PushPlan { handle, targets })
    }

    fn on_secondary<B>(&self, request: &Request<B>, url: &str) -> Vec<String> {
        let Some((raw_referer, referer)) = referer_of(request) else {
            tracing::trace!(url = %url, "Secondary resource without usable referer");
            return Vec::new();
        };

        let main_key = url_target(&referer);
        let main = self.registry.get_or_create(&main_key);

        if !main.contains(url) {
            tracing::debug!(url = %url, main = %main_key, "Secondary resource not yet associated");
            let host = request_host(request);
            // Rejections are logged by the registry and never reach the client.
            let _ = self
                .registry
                .try_associate(&main, url, host.as_deref(), raw_referer);
            return Vec::new();
        }

        let targets = self.registry.get_or_create(url).snapshot();
        tracing::debug!(
            url = %url,
            main = %main_key,
            pushes = ?targets,
            "Secondary resource already associated, pushing its own resources"
        );
        targets
    }
}

/// Path plus query of a request target; this is the registry key.
pub fn request_target(uri: &Uri) -> &str {
    uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
}

/// Host the client addressed: `Host` header, else the URI authority.
pub fn request_host<B>(request: &Request<B>) -> Option<String> {
    request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.as_str().to_string()))
}

/// `Referer` as sent and parsed, or `None` when absent or not an absolute URL.
pub fn referer_of<B>(request: &Request<B>) -> Option<(&str, Url)> {
    let value = request.headers().get(header::REFERER)?.to_str().ok()?;
    let url = Url::parse(value).ok()?;
    Some((value, url))
}

fn url_target(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}
