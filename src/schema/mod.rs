//! # Schema Store
//!
//! Holds the latest `SchemaSnapshot` behind `RwLock<Arc<_>>`. Readers clone
//! the `Arc` and never wait on discovery; a refresh builds a complete new
//! snapshot and publishes it with one pointer swap.
//!
//! Concurrent `refresh()` calls share a single discovery pass: callers that
//! arrive while a pass is running wait for it and return its outcome.
//! A failed pass leaves the published snapshot untouched.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SchemaConfig;
use crate::limits::OutboundLimiter;
use crate::model::*;
use crate::storage::GraphDriver;
use crate::{Error, Result};

/// Bookkeeping about refresh attempts, separate from the snapshot itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshStatus {
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    /// Public message of the most recent failure, cleared on success.
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

pub struct SchemaStore<D: GraphDriver> {
    driver: Arc<D>,
    limiter: OutboundLimiter,
    config: SchemaConfig,
    call_timeout: Duration,
    current: RwLock<Arc<SchemaSnapshot>>,
    status: RwLock<RefreshStatus>,
    /// Serializes discovery passes.
    pass_lock: Mutex<()>,
    /// Completed passes, successful or not.
    passes: AtomicU64,
    /// Generation stamped on the next successful snapshot.
    next_generation: AtomicU64,
}

impl<D: GraphDriver> SchemaStore<D> {
    pub fn new(driver: Arc<D>, limiter: OutboundLimiter, config: SchemaConfig, call_timeout: Duration) -> Self {
        Self {
            driver,
            limiter,
            config,
            call_timeout,
            current: RwLock::new(Arc::new(SchemaSnapshot::empty())),
            status: RwLock::new(RefreshStatus::default()),
            pass_lock: Mutex::new(()),
            passes: AtomicU64::new(0),
            next_generation: AtomicU64::new(1),
        }
    }

    /// The published snapshot. Never blocks on a refresh.
    pub fn current(&self) -> Arc<SchemaSnapshot> {
        self.current.read().clone()
    }

    pub fn status(&self) -> RefreshStatus {
        self.status.read().clone()
    }

    /// Discovery passes completed so far.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// True when the last pass succeeded and its snapshot is younger than
    /// `stale_after`.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let snapshot = self.current();
        let status = self.status.read();
        let stale_after = chrono::Duration::from_std(self.config.stale_after).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        snapshot.generation > 0 && status.last_error.is_none() && snapshot.age(now) < stale_after
    }

    /// Whether a request holding an empty snapshot should run a pass itself.
    /// Only until the first attempt, then at most once per refresh interval,
    /// so an empty or unreachable database is not rescanned on every request.
    pub fn inline_refresh_due(&self, now: DateTime<Utc>) -> bool {
        if !self.current().is_empty() {
            return false;
        }
        let interval = chrono::Duration::from_std(self.config.refresh_interval).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        match self.status.read().last_attempt {
            None => true,
            Some(at) => now.signed_duration_since(at) >= interval,
        }
    }

    /// Run a discovery pass, or join the one already running.
    pub async fn refresh(&self) -> Result<Arc<SchemaSnapshot>> {
        let seen = self.passes.load(Ordering::SeqCst);
        let _guard = self.pass_lock.lock().await;
        if self.passes.load(Ordering::SeqCst) != seen {
            // A pass finished while we waited for the lock; share its outcome.
            return match &self.status.read().last_error {
                None => Ok(self.current()),
                Some(msg) => Err(Error::SchemaUnavailable(msg.clone())),
            };
        }

        let started = std::time::Instant::now();
        let generation = self.next_generation.load(Ordering::SeqCst);
        let outcome = self.discover(generation).await;
        let now = Utc::now();
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let result = {
            let mut status = self.status.write();
            status.last_attempt = Some(now);
            match outcome {
                Ok(snapshot) => {
                    let snapshot = Arc::new(snapshot);
                    *self.current.write() = snapshot.clone();
                    self.next_generation.fetch_add(1, Ordering::SeqCst);
                    status.last_success = Some(now);
                    status.last_error = None;
                    status.consecutive_failures = 0;
                    info!(
                        stage = "schema",
                        generation,
                        labels = snapshot.labels.len(),
                        relationship_types = snapshot.relationship_types.len(),
                        elapsed_ms,
                        "schema refreshed"
                    );
                    Ok(snapshot)
                }
                Err(err) => {
                    status.consecutive_failures += 1;
                    status.last_error = Some(err.public_message());
                    warn!(
                        stage = "schema",
                        code = err.code(),
                        error = %err,
                        failures = status.consecutive_failures,
                        elapsed_ms,
                        "schema refresh failed, keeping previous snapshot"
                    );
                    Err(Error::SchemaUnavailable(err.public_message()))
                }
            }
        };
        self.passes.fetch_add(1, Ordering::SeqCst);
        result
    }

    /// One outbound driver call under the shared limiter.
    async fn call<T>(&self, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        let ms = self.call_timeout.as_millis() as u64;
        self.limiter.call(self.call_timeout, || Error::RequestTimeout(ms), fut).await
    }

    async fn discover(&self, generation: u64) -> Result<SchemaSnapshot> {
        let labels = self.call(self.driver.labels()).await?;
        let rel_types = self.call(self.driver.relationship_types()).await?;
        let sample = self.config.sample_size;

        let mut builder = SchemaSnapshot::builder(generation);
        for label in &labels {
            let count = self.call(self.driver.count_nodes(label)).await?;
            builder.label(label.as_str(), count);
            for node in self.call(self.driver.sample_node_properties(label, sample)).await? {
                for (key, value) in &node.properties {
                    builder.label_property(label, key, sample_text(value));
                }
            }
        }
        for rel_type in &rel_types {
            let count = self.call(self.driver.count_relationships(rel_type)).await?;
            builder.relationship_type(rel_type.as_str(), count);
            for s in self.call(self.driver.sample_relationship_properties(rel_type, sample)).await? {
                for key in s.relationship.properties.keys() {
                    builder.relationship_property(rel_type, key);
                }
                if let (Some(from), Some(to)) = (&s.from_label, &s.to_label) {
                    builder.connection(from, rel_type, to);
                }
            }
        }
        debug!(stage = "schema", generation, "discovery pass complete");
        Ok(builder.build(Utc::now()))
    }
}

/// Scalars become prompt samples; containers and graph values do not.
fn sample_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.chars().take(80).collect()),
        Value::Int(_) | Value::Float(_) | Value::Bool(_) => Some(value.render()),
        _ => None,
    }
}

// ============================================================================
// Background refresher
// ============================================================================

/// Periodic `refresh()` on its own task. Failures are logged and the loop
/// keeps going.
pub struct SchemaRefresher;

impl SchemaRefresher {
    /// Start refreshing every `interval`, beginning immediately.
    pub fn spawn<D: GraphDriver>(store: Arc<SchemaStore<D>>, interval: Duration) -> RefresherHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        // Errors are already logged by refresh().
                        let _ = store.refresh().await;
                    }
                }
            }
            debug!(stage = "schema", "refresher stopped");
        });
        RefresherHandle { stop: Some(stop_tx), task }
    }
}

/// Owner of a running refresher. Dropping it without `shutdown` aborts the
/// task.
pub struct RefresherHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RefresherHandle {
    /// Stop the loop and wait for an in-progress refresh to finish.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.task).await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for RefresherHandle {
    fn drop(&mut self) {
        if self.stop.is_some() {
            self.task.abort();
        }
    }
}
