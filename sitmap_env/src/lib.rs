//! Sitmap Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seam that lets the Sitmap engine run
//! against the **Production** clock (tokio) or a **Simulation** clock.
//!
//! # Core Concept
//!
//! The aggregation engine never reads the system clock or spawns tasks
//! directly. It goes through a [`SitmapContext`]:
//! - Time (`now()`, `sleep()`)
//! - Background work (`spawn()`)
//!
//! With [`ManualContext`] every eviction, lookback cutoff and live-update
//! tick becomes reproducible.
//!
//! # Example
//!
//! ```ignore
//! use sitmap_env::{SitmapContext, TokioContext};
//!
//! async fn ticker<Ctx: SitmapContext>(ctx: &Ctx) {
//!     loop {
//!         render(ctx.now());
//!         ctx.sleep(Duration::from_secs(300)).await;
//!     }
//! }
//! ```

mod context;
mod manual;
mod tokio_impl;
mod types;

pub use context::SitmapContext;
pub use manual::ManualContext;
pub use tokio_impl::TokioContext;
pub use types::ChannelId;
