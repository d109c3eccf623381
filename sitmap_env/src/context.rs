//! Core environment context trait for Sitmap engines.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;

/// The central interface for Environment Interaction.
///
/// This trait abstracts the "real world" so that the Sitmap engine can run
/// against the system clock in production and against a virtual clock in
/// tests and replay simulations.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and `Utc::now`
/// - **Simulation**: `ManualContext` - a virtual clock advanced explicitly
///
/// # Determinism
///
/// Eviction, lookback pruning and staleness all depend on "now". Routing
/// every read of the clock through the context keeps those decisions
/// reproducible under a virtual clock.
#[async_trait]
pub trait SitmapContext: Send + Sync + 'static {
    /// Returns the current wall-clock instant in UTC.
    ///
    /// Used for lookback cutoffs and `last_updated` stamps.
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock, then yields
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    ///
    /// The name is attached to the task's tracing span.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
