//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → http2::is_prior_knowledge (peek at the preface)
//!         HTTP/2   → http2.rs (h2 server, push-capable requests)
//!         HTTP/1.1 → hyper http1 (requests carry no push capability)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - HTTP/2 is served with the `h2` crate directly because hyper does not
//!   expose server push

pub mod http2;
pub mod listener;

pub use listener::{ConnectionPermit, Listener, ListenerError};
