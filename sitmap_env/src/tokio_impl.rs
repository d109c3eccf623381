//! Production implementation of SitmapContext using Tokio.

use crate::SitmapContext;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Production context backed by Tokio and the system clock.
///
/// This is the "real" implementation used in production deployments.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioContext;

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl SitmapContext for TokioContext {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let span = tracing::info_span!("task", name = %name);
        tokio::spawn(future.instrument(span));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_tokio_context_sleep_elapses() {
        let ctx = TokioContext::new();
        let start = tokio::time::Instant::now();
        ctx.sleep(Duration::from_secs(10)).await;

        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[test]
    fn test_tokio_context_now_is_wall_clock() {
        let ctx = TokioContext::new();
        let before = Utc::now();
        let now = ctx.now();
        let after = Utc::now();

        assert!(before <= now && now <= after);
    }

    #[tokio::test]
    async fn test_tokio_context_spawn_runs_future() {
        let ctx = TokioContext::new();
        let flag = Arc::new(AtomicBool::new(false));
        let (tx, rx) = tokio::sync::oneshot::channel();

        let task_flag = Arc::clone(&flag);
        ctx.spawn("flag-setter", async move {
            task_flag.store(true, Ordering::SeqCst);
            let _ = tx.send(());
        });

        rx.await.unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }
}
