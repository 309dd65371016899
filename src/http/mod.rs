//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (protocol detection, Axum router)
//!     → PushLayer (learn / push)
//!     → TimeoutLayer, TraceLayer
//!     → ServeDir (static files)
//!     → Send to client
//! ```

pub mod server;

pub use server::PushServer;
