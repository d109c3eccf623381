//! JSON exporter for offline inspection of scenario runs.
//!
//! Every render a scenario performs becomes one frame: the clusters as a
//! renderer would draw them, the diff counts and the caption.

use serde::{Deserialize, Serialize};
use sitmap_core::{build_caption, RenderModel};
use std::fs::File;
use std::io::Write;

/// A single render captured during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Virtual seconds since the scenario started
    pub time_sec: f64,

    pub observation_count: usize,
    pub clusters: Vec<ClusterFrame>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<DiffCounts>,

    pub caption: String,
}

/// One drawn cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterFrame {
    pub lat: f64,
    pub lon: f64,
    pub members: usize,
    pub priority: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
    pub callout: String,
}

/// Diff summary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DiffCounts {
    pub new: usize,
    pub moved: usize,
    pub stale: usize,
}

impl SimFrame {
    /// Captures a render model.
    pub fn from_model(time_sec: f64, model: &RenderModel, max_callouts: usize) -> Self {
        let clusters = model
            .clusters
            .iter()
            .zip(model.callouts.iter())
            .map(|(cluster, callout)| {
                let centroid = cluster.centroid();
                ClusterFrame {
                    lat: centroid.lat,
                    lon: centroid.lon,
                    members: cluster.len(),
                    priority: cluster.primary().priority,
                    accuracy_m: cluster.aggregated_accuracy(),
                    callout: callout.clone(),
                }
            })
            .collect();

        Self {
            time_sec,
            observation_count: model.observation_count,
            clusters,
            diff: model.diff.as_ref().map(|d| DiffCounts {
                new: d.new_ids.len(),
                moved: d.moved.len(),
                stale: d.stale.len(),
            }),
            caption: build_caption(model, max_callouts),
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in virtual seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
