//! Referrer-based server push.
//!
//! # Data Flow
//! ```text
//! Request (on a push-capable connection)
//!     → layer.rs (PushService::call)
//!     → interceptor.rs (gate, classify, learn or look up)
//!     → registry.rs (associations per main resource)
//!     → dispatcher.rs (synthetic GET through the same pipeline, body into push stream)
//!     → inner service handles the original request unchanged
//! ```
//!
//! # Design Decisions
//! - Learning is driven by the `Referer` of asset requests; nothing is configured by hand
//! - Push capability is a request extension set by the transport (see `net::http2`)
//! - Every failure degrades to "no push happened"

pub mod classifier;
pub mod dispatcher;
pub mod gate;
pub mod interceptor;
pub mod layer;
pub mod registry;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use classifier::{classify, content_type, ResourceKind};
pub use dispatcher::{InternalRequest, PushDispatcher, PushResponse, SyntheticRequest};
pub use interceptor::{PushPlan, ReferrerPush};
pub use layer::{PushLayer, PushService};
pub use registry::{AssociationRegistry, MainResourceRecord, Rejection};
pub use transport::{PushError, PushHandle, PushStream, PushTransport};
