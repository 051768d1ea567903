//! Emergence engine configuration
//!
//! All tunable parameters in one place. Loaded from TOML at startup,
//! falls back to defaults if no config file exists. `validate()` is the
//! fail-fast gate every constructor runs through.

use agentcraft_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Number of axes in the phase space.
pub const PHASE_DIMENSIONS: usize = 16;

/// Linear rescale bounds for one raw feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseDimension {
    pub name: String,
    pub min: f64,
    pub max: f64,
}

impl PhaseDimension {
    pub fn new(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }

    /// Rescale a raw value into [0, 1]. Non-finite input maps to the minimum.
    pub fn normalize(&self, raw: f64) -> f64 {
        if !raw.is_finite() {
            return 0.0;
        }
        ((raw - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }

    fn validate(&self) -> Result<()> {
        if !(self.min.is_finite() && self.max.is_finite()) || self.max <= self.min {
            return Err(Error::degenerate_dimension(&self.name, self.min, self.max));
        }
        Ok(())
    }
}

/// The fixed, ordered dimension catalogue with default bounds.
pub fn default_dimensions() -> Vec<PhaseDimension> {
    [
        ("combat_frequency", 0.0, 1.0),
        ("gathering_frequency", 0.0, 1.0),
        ("crafting_frequency", 0.0, 1.0),
        ("tool_failure_rate", 0.0, 1.0),
        ("tool_diversity", 0.0, 12.0),
        ("throughput", 0.0, 30.0),
        ("repeated_failures", 0.0, 8.0),
        ("exploration_radius", 0.0, 96.0),
        ("inventory_diversity", 0.0, 36.0),
        ("resource_surplus", 0.0, 1024.0),
        ("health_stability", 0.0, 1.0),
        ("death_frequency", 0.0, 3.0),
        ("human_demand_rate", 0.0, 4.0),
        ("human_demand_complexity", 0.0, 1.0),
        ("active_agents", 0.0, 8.0),
        ("coordination_rate", 0.0, 10.0),
    ]
    .into_iter()
    .map(|(name, min, max)| PhaseDimension::new(name, min, max))
    .collect()
}

/// Top-level emergence configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergenceConfig {
    /// Telemetry window and dimension catalogue.
    pub observer: ObserverConfig,
    /// Classification radii, dwell promotion, tick cadence.
    pub landscape: LandscapeConfig,
    /// Directive rendering and persistence.
    pub directive: DirectiveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Trailing window every feature is computed over, in seconds.
    pub window_secs: u64,
    /// Hard cap on samples retained per ingestion stream.
    pub max_history: usize,
    /// Ordered dimension catalogue. Must have exactly 16 entries.
    pub dimensions: Vec<PhaseDimension>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LandscapeConfig {
    /// Membership radius: a point this close to a centroid belongs to it.
    pub attractor_radius: f64,
    /// Escape radius: a point farther than this from every centroid is unclassified.
    pub escape_radius: f64,
    /// Dwell points required before a new attractor is discovered.
    pub min_samples: usize,
    /// Max mean pairwise distance inside the dwell buffer for promotion.
    pub dwell_tightness: f64,
    /// Delay between the end of one tick and the start of the next, in milliseconds.
    pub tick_interval_ms: u64,
    /// Recent points kept per attractor.
    pub trajectory_len: usize,
    /// Axes reported per basin transition.
    pub dominant_dimensions: usize,
    /// Optional JSON snapshot of the landscape, restored at startup.
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectiveConfig {
    /// Max priority lines rendered per directive.
    pub max_priorities: usize,
    /// In-memory history entries kept (the on-disk log is unbounded).
    pub max_history: usize,
    /// Directory for `active-directive.txt` and `directive-history.jsonl`.
    pub state_dir: Option<PathBuf>,
}

// ============================================================
// Defaults
// ============================================================

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            window_secs: 300,
            max_history: 4096,
            dimensions: default_dimensions(),
        }
    }
}

impl Default for LandscapeConfig {
    fn default() -> Self {
        Self {
            attractor_radius: 0.15,
            escape_radius: 0.25,
            min_samples: 5,
            dwell_tightness: 0.10,
            tick_interval_ms: 5_000,
            trajectory_len: 32,
            dominant_dimensions: 3,
            snapshot_path: None,
        }
    }
}

impl Default for DirectiveConfig {
    fn default() -> Self {
        Self {
            max_priorities: 3,
            max_history: 256,
            state_dir: None,
        }
    }
}

// ============================================================
// Validation
// ============================================================

impl ObserverConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs as i64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_secs == 0 {
            return Err(Error::invalid_config("observer.window_secs must be positive"));
        }
        if self.max_history == 0 {
            return Err(Error::invalid_config("observer.max_history must be positive"));
        }
        if self.dimensions.len() != PHASE_DIMENSIONS {
            return Err(Error::invalid_config(format!(
                "observer.dimensions must have {} entries, got {}",
                PHASE_DIMENSIONS,
                self.dimensions.len()
            )));
        }
        self.dimensions.iter().try_for_each(PhaseDimension::validate)
    }
}

impl LandscapeConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.attractor_radius > 0.0) {
            return Err(Error::invalid_config("landscape.attractor_radius must be positive"));
        }
        if !(self.escape_radius >= self.attractor_radius) {
            return Err(Error::invalid_config(
                "landscape.escape_radius must be >= attractor_radius",
            ));
        }
        if self.min_samples == 0 {
            return Err(Error::invalid_config("landscape.min_samples must be positive"));
        }
        if !(self.dwell_tightness > 0.0) {
            return Err(Error::invalid_config("landscape.dwell_tightness must be positive"));
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::invalid_config("landscape.tick_interval_ms must be positive"));
        }
        Ok(())
    }
}

impl EmergenceConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {} — using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {} — using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        self.observer.validate()?;
        self.landscape.validate()
    }
}
