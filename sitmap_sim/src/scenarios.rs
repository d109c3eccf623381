//! Aggregation scenarios for the simulator.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SIM-001: Same reports delivered several times
    Redelivery,

    /// SIM-002: Independent observers of the same events
    ConvergingObservers,

    /// SIM-003: More events than the channel can hold
    CapacityFlood,

    /// SIM-004: First diff render of a fresh channel
    FirstDiff,

    /// SIM-005: One event drifts, one drops out of focus
    DriftAndStale,

    /// SIM-006: Focus terms and priority selectors
    FocusFilter,

    /// SIM-007: Observations age out of the render window
    WindowExpiry,

    /// SIM-008: Locations embedded in text, unresolvable tokens
    TextLocated,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Redelivery,
            ScenarioId::ConvergingObservers,
            ScenarioId::CapacityFlood,
            ScenarioId::FirstDiff,
            ScenarioId::DriftAndStale,
            ScenarioId::FocusFilter,
            ScenarioId::WindowExpiry,
            ScenarioId::TextLocated,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Redelivery => "redelivery",
            ScenarioId::ConvergingObservers => "converging_observers",
            ScenarioId::CapacityFlood => "capacity_flood",
            ScenarioId::FirstDiff => "first_diff",
            ScenarioId::DriftAndStale => "drift_and_stale",
            ScenarioId::FocusFilter => "focus_filter",
            ScenarioId::WindowExpiry => "window_expiry",
            ScenarioId::TextLocated => "text_located",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Redelivery => "5 events, each report re-delivered 2-5 times, expect 5 observations",
            ScenarioId::ConvergingObservers => "4 events seen by 3 observers each, expect 4 fused observations",
            ScenarioId::CapacityFlood => "80 events into a 50-slot channel, expect the oldest 30 evicted",
            ScenarioId::FirstDiff => "3 events, first diff render reports exactly 3 new",
            ScenarioId::DriftAndStale => "re-delivered drift is moved, out-of-focus event is stale",
            ScenarioId::FocusFilter => "p2 / p3 selectors and keyword focus narrow the render",
            ScenarioId::WindowExpiry => "3 hours later the default window is empty, store is not",
            ScenarioId::TextLocated => "decimal degrees in text resolve, bare grid tokens are rejected",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "redelivery" | "sim-001" => Ok(ScenarioId::Redelivery),
            "converging_observers" | "converging" | "sim-002" => Ok(ScenarioId::ConvergingObservers),
            "capacity_flood" | "capacity" | "sim-003" => Ok(ScenarioId::CapacityFlood),
            "first_diff" | "firstdiff" | "sim-004" => Ok(ScenarioId::FirstDiff),
            "drift_and_stale" | "drift" | "sim-005" => Ok(ScenarioId::DriftAndStale),
            "focus_filter" | "focus" | "sim-006" => Ok(ScenarioId::FocusFilter),
            "window_expiry" | "window" | "sim-007" => Ok(ScenarioId::WindowExpiry),
            "text_located" | "text" | "sim-008" => Ok(ScenarioId::TextLocated),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
