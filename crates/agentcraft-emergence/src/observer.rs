//! Phase space observer — telemetry in, one normalized point out
//!
//! Ingestion calls timestamp and append to bounded per-stream histories.
//! `observe()` recomputes every raw feature over the trailing window,
//! rescales through the dimension catalogue and clamps to [0, 1].
//! Missing telemetry always yields a neutral value, never an error.

use crate::config::{ObserverConfig, PhaseDimension, PHASE_DIMENSIONS};
use agentcraft_core::{Position, Result, ToolCategory, ToolLogSource, ToolRecord};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Complexity assumed for an instruction recorded without one.
pub const DEFAULT_INSTRUCTION_COMPLEXITY: f64 = 0.5;

/// Raw, un-normalized features for one observation, in catalogue order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseSpaceInput {
    pub combat_frequency: f64,
    pub gathering_frequency: f64,
    pub crafting_frequency: f64,
    pub tool_failure_rate: f64,
    pub tool_diversity: f64,
    pub throughput: f64,
    pub repeated_failures: f64,
    pub exploration_radius: f64,
    pub inventory_diversity: f64,
    pub resource_surplus: f64,
    pub health_stability: f64,
    pub death_frequency: f64,
    pub human_demand_rate: f64,
    pub human_demand_complexity: f64,
    pub active_agents: f64,
    pub coordination_rate: f64,
}

impl PhaseSpaceInput {
    pub fn values(&self) -> [f64; PHASE_DIMENSIONS] {
        [
            self.combat_frequency,
            self.gathering_frequency,
            self.crafting_frequency,
            self.tool_failure_rate,
            self.tool_diversity,
            self.throughput,
            self.repeated_failures,
            self.exploration_radius,
            self.inventory_diversity,
            self.resource_surplus,
            self.health_stability,
            self.death_frequency,
            self.human_demand_rate,
            self.human_demand_complexity,
            self.active_agents,
            self.coordination_rate,
        ]
    }
}

/// One normalized sample of the trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhasePoint {
    pub coordinates: Vec<f64>,
    pub timestamp: DateTime<Utc>,
    pub raw: PhaseSpaceInput,
}

impl PhasePoint {
    /// A point with known coordinates and no raw backing (restores, tests, replays).
    pub fn from_coordinates(coordinates: Vec<f64>, timestamp: DateTime<Utc>) -> Self {
        Self {
            coordinates,
            timestamp,
            raw: PhaseSpaceInput::default(),
        }
    }

    pub fn distance_to(&self, other: &[f64]) -> f64 {
        euclidean(&self.coordinates, other)
    }
}

/// Euclidean distance over the shared prefix of two coordinate vectors.
pub fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

#[derive(Debug, Clone, Copy)]
struct Sample<T> {
    at: DateTime<Utc>,
    value: T,
}

#[derive(Default)]
struct Telemetry {
    positions: VecDeque<Sample<Position>>,
    health: VecDeque<Sample<f64>>,
    deaths: VecDeque<Sample<()>>,
    instructions: VecDeque<Sample<f64>>,
    board: VecDeque<Sample<()>>,
    agent_count: usize,
    tool_log: Option<Arc<dyn ToolLogSource>>,
}

impl Telemetry {
    fn prune(&mut self, horizon: DateTime<Utc>) {
        prune_before(&mut self.positions, horizon);
        prune_before(&mut self.health, horizon);
        prune_before(&mut self.deaths, horizon);
        prune_before(&mut self.instructions, horizon);
        prune_before(&mut self.board, horizon);
    }
}

fn prune_before<T>(buf: &mut VecDeque<Sample<T>>, horizon: DateTime<Utc>) {
    while buf.front().is_some_and(|s| s.at < horizon) {
        buf.pop_front();
    }
}

fn push_bounded<T>(buf: &mut VecDeque<Sample<T>>, sample: Sample<T>, cap: usize) {
    buf.push_back(sample);
    while buf.len() > cap {
        buf.pop_front();
    }
}

fn in_window<T: Copy>(buf: &VecDeque<Sample<T>>, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<T> {
    buf.iter()
        .filter(|s| s.at >= from && s.at <= to)
        .map(|s| s.value)
        .collect()
}

/// Reduces heterogeneous telemetry into phase-space points.
pub struct PhaseSpaceObserver {
    config: ObserverConfig,
    telemetry: Mutex<Telemetry>,
}

impl PhaseSpaceObserver {
    pub fn new(config: ObserverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            telemetry: Mutex::new(Telemetry::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Telemetry> {
        match self.telemetry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Samples older than twice the window are dropped.
    fn horizon(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.config.window() * 2
    }

    pub fn dimensions(&self) -> &[PhaseDimension] {
        &self.config.dimensions
    }

    pub fn window(&self) -> Duration {
        self.config.window()
    }

    // ------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------

    pub fn record_position(&self, position: Position) {
        self.record_position_at(position, Utc::now());
    }

    pub fn record_position_at(&self, position: Position, at: DateTime<Utc>) {
        if !position.is_finite() {
            debug!("Dropping non-finite position sample");
            return;
        }
        let horizon = self.horizon(at);
        let mut t = self.lock();
        push_bounded(&mut t.positions, Sample { at, value: position }, self.config.max_history);
        t.prune(horizon);
    }

    pub fn record_health(&self, hp: f64) {
        self.record_health_at(hp, Utc::now());
    }

    pub fn record_health_at(&self, hp: f64, at: DateTime<Utc>) {
        if !hp.is_finite() {
            debug!("Dropping non-finite health sample");
            return;
        }
        let horizon = self.horizon(at);
        let mut t = self.lock();
        push_bounded(&mut t.health, Sample { at, value: hp }, self.config.max_history);
        t.prune(horizon);
    }

    pub fn record_death(&self) {
        self.record_death_at(Utc::now());
    }

    pub fn record_death_at(&self, at: DateTime<Utc>) {
        let horizon = self.horizon(at);
        let mut t = self.lock();
        push_bounded(&mut t.deaths, Sample { at, value: () }, self.config.max_history);
        t.prune(horizon);
    }

    /// Record a human instruction. `None` uses [`DEFAULT_INSTRUCTION_COMPLEXITY`].
    pub fn record_instruction(&self, complexity: Option<f64>) {
        self.record_instruction_at(complexity, Utc::now());
    }

    pub fn record_instruction_at(&self, complexity: Option<f64>, at: DateTime<Utc>) {
        let value = complexity
            .filter(|c| c.is_finite())
            .unwrap_or(DEFAULT_INSTRUCTION_COMPLEXITY)
            .clamp(0.0, 1.0);
        let horizon = self.horizon(at);
        let mut t = self.lock();
        push_bounded(&mut t.instructions, Sample { at, value }, self.config.max_history);
        t.prune(horizon);
    }

    pub fn set_agent_count(&self, count: usize) {
        self.lock().agent_count = count;
    }

    pub fn record_board_message(&self) {
        self.record_board_message_at(Utc::now());
    }

    pub fn record_board_message_at(&self, at: DateTime<Utc>) {
        let horizon = self.horizon(at);
        let mut t = self.lock();
        push_bounded(&mut t.board, Sample { at, value: () }, self.config.max_history);
        t.prune(horizon);
    }

    /// Install a read-only handle to the externally-owned tool log.
    pub fn set_tool_log_source(&self, source: Arc<dyn ToolLogSource>) {
        self.lock().tool_log = Some(source);
    }

    // ------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------

    pub fn observe(&self) -> PhasePoint {
        self.observe_at(Utc::now())
    }

    pub fn observe_at(&self, now: DateTime<Utc>) -> PhasePoint {
        let raw = self.raw_features(now);
        let coordinates = self
            .config
            .dimensions
            .iter()
            .zip(raw.values())
            .map(|(dim, value)| dim.normalize(value))
            .collect();
        PhasePoint {
            coordinates,
            timestamp: now,
            raw,
        }
    }

    fn raw_features(&self, now: DateTime<Utc>) -> PhaseSpaceInput {
        let window = self.config.window();
        let from = now - window;
        let minutes = window.num_milliseconds() as f64 / 60_000.0;

        let mut t = self.lock();
        t.prune(self.horizon(now));

        let tools: Vec<ToolRecord> = t
            .tool_log
            .as_ref()
            .map(|log| log.records_since(from))
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.timestamp <= now)
            .collect();

        let mut positions = in_window(&t.positions, from, now);
        positions.extend(tools.iter().filter_map(|r| r.position).filter(Position::is_finite));

        let health = in_window(&t.health, from, now);
        let deaths = in_window(&t.deaths, from, now).len();
        let instructions = in_window(&t.instructions, from, now);
        let board = in_window(&t.board, from, now).len();
        let agents = t.agent_count;
        drop(t);

        let tool_stats = ToolStats::from_records(&tools);
        let (inventory_diversity, resource_surplus) = inventory_features(&tools);

        PhaseSpaceInput {
            combat_frequency: tool_stats.ratio(tool_stats.combat),
            gathering_frequency: tool_stats.ratio(tool_stats.gathering),
            crafting_frequency: tool_stats.ratio(tool_stats.crafting),
            tool_failure_rate: tool_stats.ratio(tool_stats.failures),
            tool_diversity: tool_stats.distinct as f64,
            throughput: tool_stats.total as f64 / minutes,
            repeated_failures: tool_stats.repeated_failures as f64,
            exploration_radius: exploration_radius(&positions),
            inventory_diversity,
            resource_surplus,
            health_stability: health_stability(&health),
            death_frequency: deaths as f64,
            human_demand_rate: instructions.len() as f64 / minutes,
            human_demand_complexity: mean(&instructions).unwrap_or(0.0),
            active_agents: agents as f64,
            coordination_rate: board as f64 / minutes,
        }
    }
}

#[derive(Debug, Default)]
struct ToolStats {
    total: usize,
    combat: usize,
    gathering: usize,
    crafting: usize,
    failures: usize,
    distinct: usize,
    repeated_failures: usize,
}

impl ToolStats {
    fn from_records(records: &[ToolRecord]) -> Self {
        let mut stats = ToolStats {
            total: records.len(),
            ..Default::default()
        };
        let mut names = HashSet::new();
        let mut last_failed: Option<&str> = None;
        let mut streak = 0usize;

        for record in records {
            names.insert(record.tool.as_str());
            match record.category() {
                Some(ToolCategory::Combat) => stats.combat += 1,
                Some(ToolCategory::Gathering) => stats.gathering += 1,
                Some(ToolCategory::Crafting) => stats.crafting += 1,
                None => {}
            }
            if record.result.is_failure() {
                stats.failures += 1;
                streak = if last_failed == Some(record.tool.as_str()) {
                    streak + 1
                } else {
                    1
                };
                last_failed = Some(record.tool.as_str());
                // A lone failure is not a repeat.
                if streak > 1 {
                    stats.repeated_failures = stats.repeated_failures.max(streak);
                }
            } else {
                last_failed = None;
                streak = 0;
            }
        }
        stats.distinct = names.len();
        stats
    }

    fn ratio(&self, count: usize) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            count as f64 / self.total as f64
        }
    }
}

/// Distinct item kinds and total item count from the latest inventory snapshot.
fn inventory_features(tools: &[ToolRecord]) -> (f64, f64) {
    let Some(inventory) = tools.iter().rev().find_map(|r| r.inventory.as_ref()) else {
        return (0.0, 0.0);
    };
    let kinds: HashSet<&str> = inventory
        .iter()
        .filter(|i| i.count > 0)
        .map(|i| i.name.as_str())
        .collect();
    let total: u64 = inventory.iter().map(|i| i.count as u64).sum();
    (kinds.len() as f64, total as f64)
}

/// Mean horizontal distance of positions from their own centroid.
fn exploration_radius(positions: &[Position]) -> f64 {
    if positions.is_empty() {
        return 0.0;
    }
    let n = positions.len() as f64;
    let cx = positions.iter().map(|p| p.x).sum::<f64>() / n;
    let cz = positions.iter().map(|p| p.z).sum::<f64>() / n;
    positions
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.z - cz).powi(2)).sqrt())
        .sum::<f64>()
        / n
}

/// `max(0, 1 - stddev(hp) / 10)`; no samples reads as fully stable.
fn health_stability(hp: &[f64]) -> f64 {
    let Some(mu) = mean(hp) else {
        return 1.0;
    };
    let variance = hp.iter().map(|h| (h - mu).powi(2)).sum::<f64>() / hp.len() as f64;
    (1.0 - variance.sqrt() / 10.0).max(0.0)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
