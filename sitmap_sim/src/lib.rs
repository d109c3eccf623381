//! Sitmap Deterministic Scenario Harness
//!
//! This crate drives the Sitmap engine through scripted field situations
//! where every source of non-determinism is controlled:
//! - **Time**: a `ManualContext` virtual clock, advanced explicitly
//! - **Reports**: generated by an Oracle from known ground truth
//! - **Randomness**: all jitter derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                         │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ ManualContext (Virtual Clock)                        │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                                                     │
//! │  ┌────▼──────────┐   reports    ┌───────────────────────┐   │
//! │  │    Oracle     │─────────────►│     SitmapEngine      │   │
//! │  │ (Ground Truth)│              │ store/merge/diff/...  │   │
//! │  └───────────────┘              └───────────┬───────────┘   │
//! │                                             │ renders       │
//! │                                    ┌────────▼────────┐      │
//! │                                    │    SimExport    │      │
//! │                                    └─────────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use sitmap_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::ConvergingObservers);
//! assert!(result.passed);
//! ```

mod exporter;
mod oracle;
mod runner;
pub mod scenarios;

pub use exporter::{ClusterFrame, DiffCounts, SimExport, SimFrame};
pub use oracle::{offset_coordinate, source_id, GroundTruthEvent, Oracle};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner, SIM_CHANNEL};
