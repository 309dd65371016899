//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! push engine, server, listener produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (association and push counters)
//!
//! Consumers:
//!     → stdout (fmt subscriber)
//!     → Metrics endpoint (Prometheus scrape)
//! ```

pub mod logging;
pub mod metrics;
