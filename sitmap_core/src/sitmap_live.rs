//! The "LIVE" Scheduler - at most one periodic render job per channel
//!
//! Jobs are spawned through the `SitmapContext` and stopped through a
//! `CancellationToken`. Cancelling never interrupts a tick that is already
//! running; it only prevents future ones.

use crate::sitmap_render::RenderModel;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sitmap_env::{ChannelId, SitmapContext};
use std::collections::HashMap;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Receives the models produced by live ticks.
///
/// Delivery (drawing, sending) is the sink's concern and must be
/// time-bounded there.
#[async_trait]
pub trait LiveUpdateSink: Send + Sync + 'static {
    async fn deliver(&self, channel: ChannelId, model: RenderModel);
}

/// Handle to one running live job.
#[derive(Debug, Clone)]
pub struct LiveJobHandle {
    channel: ChannelId,
    interval: Duration,
    started_at: DateTime<Utc>,
    token: CancellationToken,
}

impl LiveJobHandle {
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Prevent any further ticks.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// True once stopped, or once the job ended on its own.
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Registry of live jobs, one per channel.
pub struct LiveUpdateScheduler<Ctx: SitmapContext> {
    ctx: Arc<Ctx>,
    jobs: Mutex<HashMap<ChannelId, LiveJobHandle>>,
}

impl<Ctx: SitmapContext> LiveUpdateScheduler<Ctx> {
    pub fn new(ctx: Arc<Ctx>) -> Self {
        Self {
            ctx,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Start a job unless one is already active for the channel.
    ///
    /// `tick` runs immediately and then once per `interval`; returning
    /// `ControlFlow::Break` ends the job.
    pub fn start<F, Fut>(&self, channel: ChannelId, interval: Duration, tick: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        if jobs.get(&channel).is_some_and(|job| !job.is_stopped()) {
            debug!(channel = %channel, "Live job already active");
            return false;
        }

        let handle = self.spawn_job(channel, interval, tick);
        jobs.insert(channel, handle);
        info!(channel = %channel, interval_secs = interval.as_secs(), "Live job started");
        true
    }

    /// Stop any current job and start a new one in the same critical section.
    pub fn restart<F, Fut>(&self, channel: ChannelId, interval: Duration, tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = jobs.remove(&channel) {
            previous.stop();
        }

        let handle = self.spawn_job(channel, interval, tick);
        jobs.insert(channel, handle);
        info!(channel = %channel, interval_secs = interval.as_secs(), "Live job restarted");
    }

    /// Cancel and remove the channel's job. Returns whether one was active.
    pub fn stop(&self, channel: ChannelId) -> bool {
        let removed = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&channel);

        match removed {
            Some(handle) => {
                let was_active = !handle.is_stopped();
                handle.stop();
                info!(channel = %channel, "Live job stopped");
                was_active
            }
            None => false,
        }
    }

    /// Cancel every job.
    pub fn stop_all(&self) -> usize {
        let drained: Vec<LiveJobHandle> = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, handle)| handle)
            .collect();

        for handle in &drained {
            handle.stop();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "All live jobs stopped");
        }
        drained.len()
    }

    pub fn is_active(&self, channel: ChannelId) -> bool {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel)
            .is_some_and(|job| !job.is_stopped())
    }

    pub fn handle(&self, channel: ChannelId) -> Option<LiveJobHandle> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel)
            .cloned()
    }

    /// Channels with an active job, ascending.
    pub fn active_channels(&self) -> Vec<ChannelId> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let mut channels: Vec<ChannelId> = jobs
            .iter()
            .filter(|(_, job)| !job.is_stopped())
            .map(|(channel, _)| *channel)
            .collect();
        channels.sort_unstable();
        channels
    }

    fn spawn_job<F, Fut>(&self, channel: ChannelId, interval: Duration, mut tick: F) -> LiveJobHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let token = CancellationToken::new();
        let job_token = token.clone();
        let ctx = Arc::clone(&self.ctx);

        self.ctx.spawn(&format!("live-{}", channel), async move {
            loop {
                if job_token.is_cancelled() {
                    break;
                }
                if tick().await.is_break() {
                    debug!(channel = %channel, "Live job ended by its tick");
                    break;
                }
                tokio::select! {
                    _ = job_token.cancelled() => break,
                    _ = ctx.sleep(interval) => {}
                }
            }
            job_token.cancel();
        });

        LiveJobHandle {
            channel,
            interval,
            started_at: self.ctx.now(),
            token,
        }
    }
}

impl<Ctx: SitmapContext> Drop for LiveUpdateScheduler<Ctx> {
    fn drop(&mut self) {
        let jobs = self.jobs.get_mut().unwrap_or_else(PoisonError::into_inner);
        for handle in jobs.values() {
            handle.stop();
        }
    }
}
