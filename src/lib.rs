//! Referrer-based HTTP/2 server push.
//!
//! Learns which stylesheets, scripts, images and fonts a page pulls in by
//! watching the `Referer` of asset requests, then pushes them the next time
//! the page is requested.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod push;

pub use config::schema::ServerConfig;
pub use http::PushServer;
pub use lifecycle::Shutdown;
pub use push::PushLayer;
