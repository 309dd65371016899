//! Learned associations between pages and their secondary resources.
//!
//! # Responsibilities
//! - Map a main-resource key to the ordered list of resources it pulls in
//! - Enforce the same-host rule, the per-record capacity and the learning window
//!
//! # Design Decisions
//! - One registry per push layer, injected rather than process-global
//! - `DashMap` entry API makes lookup-or-insert atomic per key
//! - Each record has its own mutex covering the whole check-then-append
//!   sequence and snapshots, so concurrent requests never interleave inside it
//! - Records are never evicted; only the per-record list is bounded

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use axum::http::Uri;
use tokio::time::Instant;

use crate::config::PushConfig;
use crate::observability::metrics;

/// Why an association attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("referer host does not match request host")]
    CrossOrigin,

    #[error("max associated resources ({0}) reached")]
    CapacityReached(usize),

    #[error("delay {delay_ms}ms longer than association window ({window_ms}ms)")]
    WindowElapsed { delay_ms: u128, window_ms: u128 },
}

impl Rejection {
    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Rejection::CrossOrigin => "cross_origin",
            Rejection::CapacityReached(_) => "capacity",
            Rejection::WindowElapsed { .. } => "window",
        }
    }
}

#[derive(Debug, Default)]
struct RecordState {
    /// Set by the first association attempt, successful or not.
    first_observed_at: Option<Instant>,
    /// Push order.
    resources: Vec<String>,
}

/// Everything learned about one main resource.
#[derive(Debug)]
pub struct MainResourceRecord {
    key: String,
    state: Mutex<RecordState>,
}

impl MainResourceRecord {
    fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: Mutex::new(RecordState::default()),
        }
    }

    /// The main-resource key (path plus query) this record belongs to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Copy of the associated resources in insertion order.
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().resources.clone()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.lock().resources.iter().any(|r| r == url)
    }

    pub fn len(&self) -> usize {
        self.lock().resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// When the learning window for this record opened, if it has.
    pub fn first_observed_at(&self) -> Option<Instant> {
        self.lock().first_observed_at
    }

    fn lock(&self) -> MutexGuard<'_, RecordState> {
        self.state.lock().expect("main resource record mutex poisoned")
    }
}

/// Store of main-resource records.
#[derive(Debug)]
pub struct AssociationRegistry {
    records: DashMap<String, Arc<MainResourceRecord>>,
    max_associated_resources: usize,
    association_window: Duration,
}

impl AssociationRegistry {
    /// Create an empty registry with the configured limits.
    pub fn new(config: &PushConfig) -> Self {
        Self::with_limits(
            config.max_associated_resources,
            Duration::from_millis(config.association_window_ms),
        )
    }

    pub fn with_limits(max_associated_resources: usize, association_window: Duration) -> Self {
        Self {
            records: DashMap::new(),
            max_associated_resources,
            association_window,
        }
    }

    pub fn max_associated_resources(&self) -> usize {
        self.max_associated_resources
    }

    pub fn association_window(&self) -> Duration {
        self.association_window
    }

    /// Number of main resources tracked.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Look up the record for `key`, creating an empty one if needed.
    ///
    /// Concurrent callers with the same key always receive the same record.
    pub fn get_or_create(&self, key: &str) -> Arc<MainResourceRecord> {
        if let Some(existing) = self.records.get(key) {
            return Arc::clone(existing.value());
        }

        let record = {
            let entry = self
                .records
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(MainResourceRecord::new(key)));
            Arc::clone(entry.value())
        };
        // Shard guard must be released before len() takes every shard lock.
        metrics::record_registry_size(self.records.len());
        record
    }

    /// Try to learn `secondary_url` as a resource of `record`.
    ///
    /// Checks run in a fixed order: the window is anchored first (even if the
    /// attempt is then refused), then host, capacity and elapsed time.
    pub fn try_associate(
        &self,
        record: &MainResourceRecord,
        secondary_url: &str,
        request_host: Option<&str>,
        referer: &str,
    ) -> Result<(), Rejection> {
        let mut state = record.lock();

        let now = Instant::now();
        let first_observed_at = *state.first_observed_at.get_or_insert(now);
        let delay = now.saturating_duration_since(first_observed_at);

        let result = if request_host.is_none() || authority_of(referer).as_deref() != request_host {
            Err(Rejection::CrossOrigin)
        } else if state.resources.len() >= self.max_associated_resources {
            Err(Rejection::CapacityReached(self.max_associated_resources))
        } else if delay > self.association_window {
            Err(Rejection::WindowElapsed {
                delay_ms: delay.as_millis(),
                window_ms: self.association_window.as_millis(),
            })
        } else {
            state.resources.push(secondary_url.to_owned());
            Ok(())
        };

        match &result {
            Ok(()) => {
                tracing::debug!(
                    main = %record.key,
                    resource = %secondary_url,
                    delay_ms = delay.as_millis() as u64,
                    associated = state.resources.len(),
                    "Association learned"
                );
                metrics::record_association("added");
            }
            Err(rejection) => {
                tracing::debug!(
                    main = %record.key,
                    resource = %secondary_url,
                    host = ?request_host,
                    referer = %referer,
                    reason = %rejection,
                    "Skipped association"
                );
                metrics::record_association(rejection.label());
            }
        }

        result
    }
}

/// Authority of an absolute URL as written, minus any userinfo.
///
/// Default ports are kept when spelled out, so `http://example.com:80/`
/// only matches a `Host` of `example.com:80`.
pub fn authority_of(url: &str) -> Option<String> {
    let uri: Uri = url.parse().ok()?;
    let authority = uri.authority()?.as_str();
    let host_port = authority.rsplit('@').next().unwrap_or(authority);
    Some(host_port.to_string()).filter(|a| !a.is_empty())
}
