//! Render model handed to external renderers, plus its text summary.
//!
//! The model carries clusters and the diff, never pixels. Callouts and the
//! caption are plain strings suitable for a chat message.

use crate::sitmap_cluster::Cluster;
use crate::sitmap_diff::DiffResult;
use crate::sitmap_store::Observation;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sitmap_env::ChannelId;

/// Origin format of observations whose position came from coordinates.
pub const LATLON_ORIGIN: &str = "latlon";

/// Options for a single render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    /// Compute new / moved / stale against the channel baseline
    pub diff: bool,

    /// Overrides the channel's focus terms when set
    pub focus_terms: Option<Vec<String>>,

    /// Overrides the configured lookback window when set
    pub lookback_minutes: Option<u32>,

    /// Replace the baseline with this render's observations
    pub update_baseline: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            diff: false,
            focus_terms: None,
            lookback_minutes: None,
            update_baseline: true,
        }
    }
}

impl RenderOptions {
    /// The options used by live update ticks.
    pub fn live() -> Self {
        Self {
            diff: true,
            ..Default::default()
        }
    }

    pub fn with_diff(mut self, diff: bool) -> Self {
        self.diff = diff;
        self
    }

    pub fn with_focus<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.focus_terms = Some(terms.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_lookback(mut self, minutes: u32) -> Self {
        self.lookback_minutes = Some(minutes);
        self
    }

    pub fn with_update_baseline(mut self, update: bool) -> Self {
        self.update_baseline = update;
        self
    }
}

/// Everything a renderer needs to draw one channel.
#[derive(Debug, Clone, Serialize)]
pub struct RenderModel {
    pub channel: ChannelId,
    pub generated_at: DateTime<Utc>,

    /// Focus terms actually applied
    pub focus_terms: Vec<String>,

    pub clusters: Vec<Cluster>,
    pub diff: Option<DiffResult>,

    pub observation_count: usize,
    pub cluster_count: usize,
    pub stale_count: usize,

    /// One line per cluster, in cluster order
    pub callouts: Vec<String>,
}

/// Collapse whitespace and truncate to `limit` characters with "…".
pub fn sanitize_text(text: &str, limit: usize) -> String {
    let clean = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if clean.chars().count() <= limit {
        return clean;
    }
    let mut out: String = clean.chars().take(limit.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// "3×" for whole amounts, "2.5×" otherwise.
pub fn format_amount(amount: f64) -> String {
    let rounded = amount.round();
    if (amount - rounded).abs() < 1e-9 {
        format!("{}×", rounded as i64)
    } else {
        format!("{:.1}×", amount)
    }
}

/// The token a report was located by, or "lat,lon".
pub fn format_location(obs: &Observation) -> String {
    if !obs.origin_format.is_empty() && obs.origin_format != LATLON_ORIGIN {
        obs.origin_format.clone()
    } else {
        obs.position.to_string()
    }
}

/// `"#<n> [<amount>×] <description> @ <location>"` for a 1-based index.
pub fn build_callout(index: usize, cluster: &Cluster, text_limit: usize) -> String {
    let primary = cluster.primary();

    let source = primary
        .what
        .as_deref()
        .filter(|w| !w.trim().is_empty())
        .or_else(|| Some(primary.text.as_str()).filter(|t| !t.trim().is_empty()))
        .unwrap_or("Observation");
    let description = sanitize_text(source, text_limit);

    let mut parts = vec![format!("#{}", index)];
    if let Some(amount) = cluster.total_amount().or(primary.amount) {
        parts.push(format_amount(amount));
    }
    parts.push(description);

    format!("{} @ {}", parts.join(" "), format_location(primary))
}

/// Header line, a blank line, then up to `max_callouts` callouts.
pub fn build_caption(model: &RenderModel, max_callouts: usize) -> String {
    let mut header = vec![format!("Observations: {}", model.observation_count)];
    if !model.focus_terms.is_empty() {
        header.push(format!("Focus: {}", model.focus_terms.join(" ")));
    }
    if let Some(diff) = &model.diff {
        header.push(format!(
            "Δ new {} | moved {} | stale {}",
            diff.new_ids.len(),
            diff.moved.len(),
            diff.stale.len()
        ));
    }
    let header = header.join(" | ");

    if model.callouts.is_empty() {
        return header;
    }

    let mut lines = vec![header, String::new()];
    lines.extend(model.callouts.iter().take(max_callouts).cloned());
    let remaining = model.callouts.len().saturating_sub(max_callouts);
    if remaining > 0 {
        lines.push(format!("… +{} more", remaining));
    }
    lines.join("\n")
}
