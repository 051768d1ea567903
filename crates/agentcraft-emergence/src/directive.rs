//! Directive manager — attractor geometry in, behavioral guidance out
//!
//! Generation is a pure function of the attractor's centroid, the caller's
//! dominant-dimension ranking and the reason. Exactly one directive is
//! active; every generation replaces it and appends a history record.
//! With a state directory configured, the active text is written to
//! `active-directive.txt` and history is appended to
//! `directive-history.jsonl`. Storage failures are logged, never raised.

use crate::config::{DirectiveConfig, PhaseDimension};
use crate::landscape::{state_label, Attractor, AttractorId, DimensionDelta};
use agentcraft_core::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

/// First line of every rendered phase directive.
pub const PHASE_DIRECTIVE_HEADER: &str = "## Emergent Phase Directive";

const ACTIVE_FILE: &str = "active-directive.txt";
const HISTORY_FILE: &str = "directive-history.jsonl";

const FALLBACK_LINE: &str =
    "Insufficient signal: maintain current behavior until a stable regime emerges.";
const BALANCED_LINE: &str =
    "Balanced priority: no dominant pressure; continue the current plan and keep reserves topped up.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    High,
    Low,
}

/// (dimension, direction, threshold, phrase)
type PriorityRule = (&'static str, Direction, f64, &'static str);

/// Dimension → canned phrase. Swappable policy, not an algorithm.
///
/// Triggered rules are ordered by the raw coordinate for both directions, so
/// a `Low` rule sits below any strong `High` pressure and a lower value ranks
/// it lower still. Health alone never displaces a dominant activity line.
const PRIORITY_TABLE: &[PriorityRule] = &[
    ("combat_frequency", Direction::High, 0.5,
        "Combat priority: keep weapons and armor equipped and clear hostiles before resuming other work."),
    ("health_stability", Direction::Low, 0.4,
        "Survival priority: retreat, eat and recover health before taking new risks."),
    ("death_frequency", Direction::High, 0.34,
        "Survival priority: deaths are recurring; avoid what caused them and secure a respawn point."),
    ("resource_surplus", Direction::High, 0.5,
        "Consolidation priority: store surplus in chests and stop gathering what is already stocked."),
    ("gathering_frequency", Direction::High, 0.5,
        "Gathering priority: keep tools repaired and route mining toward scarce materials."),
    ("crafting_frequency", Direction::High, 0.5,
        "Crafting priority: batch recipes and keep the crafting table and furnace next to storage."),
    ("tool_failure_rate", Direction::High, 0.4,
        "Reliability priority: failures are frequent; verify preconditions before retrying a tool."),
    ("repeated_failures", Direction::High, 0.25,
        "Reliability priority: stop repeating the same failing tool; change approach or ask for help."),
    ("exploration_radius", Direction::High, 0.6,
        "Exploration priority: mark landmarks and return to base before nightfall."),
    ("human_demand_rate", Direction::High, 0.5,
        "Responsiveness priority: human requests are frequent; acknowledge and service them first."),
    ("human_demand_complexity", Direction::High, 0.6,
        "Planning priority: human requests are complex; break them into confirmed steps."),
    ("coordination_rate", Direction::High, 0.5,
        "Coordination priority: read the shared board before acting and announce claimed tasks."),
    ("active_agents", Direction::High, 0.5,
        "Coordination priority: several agents are active; split work areas to avoid collisions."),
    ("throughput", Direction::High, 0.7,
        "Pacing priority: action rate is high; check inventory and health between batches."),
    ("inventory_diversity", Direction::High, 0.7,
        "Organization priority: inventory is fragmented; sort it and discard low-value items."),
];

/// The single active directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    pub text: String,
    pub source_attractor_id: Option<AttractorId>,
    pub generated_at: DateTime<Utc>,
    pub reason: String,
}

/// One line of `directive-history.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectiveRecord {
    pub timestamp: DateTime<Utc>,
    pub from_state: String,
    pub to_state: String,
    pub prompt: String,
    pub reason: String,
}

struct DirectiveState {
    current: Directive,
    history: VecDeque<DirectiveRecord>,
}

pub struct DirectiveManager {
    names: Vec<String>,
    config: DirectiveConfig,
    state: Mutex<DirectiveState>,
}

impl DirectiveManager {
    /// Build a manager, restoring the last active directive and history
    /// from the state directory when present.
    pub fn new(dimensions: &[PhaseDimension], config: DirectiveConfig) -> Self {
        let names: Vec<String> = dimensions.iter().map(|d| d.name.clone()).collect();
        let mut manager = Self {
            names,
            config,
            state: Mutex::new(DirectiveState {
                current: Directive {
                    text: String::new(),
                    source_attractor_id: None,
                    generated_at: Utc::now(),
                    reason: "startup".into(),
                },
                history: VecDeque::new(),
            }),
        };

        let initial = manager.generate_from_attractor(None, &[], "startup");
        let restored = manager.config.state_dir.as_deref().and_then(restore_active);
        let history = manager
            .config
            .state_dir
            .as_deref()
            .map(|dir| restore_history(dir, manager.config.max_history))
            .unwrap_or_default();

        let state = manager.state.get_mut().unwrap_or_else(|p| p.into_inner());
        match restored {
            Some(text) => {
                let last = history.back();
                state.current.source_attractor_id =
                    last.and_then(|r| r.to_state.parse::<AttractorId>().ok());
                if let Some(record) = last {
                    state.current.generated_at = record.timestamp;
                }
                info!(
                    "Restored active directive ({} chars, source {})",
                    text.len(),
                    state_label(state.current.source_attractor_id)
                );
                state.current.text = text;
                state.current.reason = "restored".into();
            }
            None => state.current.text = initial,
        }
        state.history = history;
        manager
    }

    fn lock(&self) -> MutexGuard<'_, DirectiveState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn coordinate(&self, attractor: &Attractor, name: &str) -> Option<f64> {
        let idx = self.names.iter().position(|n| n == name)?;
        attractor.centroid.get(idx).copied()
    }

    /// Render guidance for an attractor. Deterministic in its inputs.
    pub fn generate_from_attractor(
        &self,
        attractor: Option<&Attractor>,
        dimensions: &[DimensionDelta],
        reason: &str,
    ) -> String {
        let Some(attractor) = attractor else {
            return format!(
                "Regime: in transit (no attractor)\nTrigger: {}\n{}",
                reason, FALLBACK_LINE
            );
        };

        let mut out = String::new();
        let _ = writeln!(
            out,
            "Regime: {} ({} samples)",
            attractor.id, attractor.sample_count
        );
        let _ = writeln!(out, "Trigger: {}", reason);
        out.push_str("Priorities:\n");
        for (i, phrase) in self.priorities(attractor, dimensions).iter().enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, phrase);
        }

        let risk = self.coordinate(attractor, "health_stability").unwrap_or(0.5);
        let automation = 1.0 - self.coordinate(attractor, "human_demand_rate").unwrap_or(0.5);
        let _ = writeln!(out, "Risk tolerance: {:.2}", risk);
        let _ = writeln!(out, "Automation level: {:.2}", automation);

        let drivers = if dimensions.is_empty() {
            "none".to_string()
        } else {
            dimensions
                .iter()
                .map(|d| format!("{} ({:+.2})", d.name, d.delta))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let _ = write!(out, "Shift drivers: {}", drivers);
        out
    }

    /// Triggered rules ranked by centroid magnitude, then caller ranking, then table order.
    fn priorities(&self, attractor: &Attractor, dimensions: &[DimensionDelta]) -> Vec<&'static str> {
        let caller_rank = |name: &str| {
            dimensions
                .iter()
                .position(|d| d.name == name)
                .unwrap_or(usize::MAX)
        };

        let mut triggered: Vec<(usize, f64, &PriorityRule)> = PRIORITY_TABLE
            .iter()
            .enumerate()
            .filter_map(|(order, rule)| {
                let (dimension, direction, threshold, _) = *rule;
                let value = self.coordinate(attractor, dimension)?;
                let fires = match direction {
                    Direction::High => value >= threshold,
                    Direction::Low => value <= threshold,
                };
                fires.then_some((order, value, rule))
            })
            .collect();

        triggered.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| caller_rank(a.2 .0).cmp(&caller_rank(b.2 .0)))
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut phrases: Vec<&'static str> = triggered
            .into_iter()
            .map(|(_, _, rule)| rule.3)
            .take(self.config.max_priorities.max(1))
            .collect();
        if phrases.is_empty() {
            phrases.push(BALANCED_LINE);
        }
        phrases
    }

    /// Generate for an attractor and make it the active directive.
    pub fn regenerate(
        &self,
        attractor: Option<&Attractor>,
        dimensions: &[DimensionDelta],
        reason: &str,
    ) -> Directive {
        let text = self.generate_from_attractor(attractor, dimensions, reason);
        self.activate(text, attractor.map(|a| a.id), reason)
    }

    /// Replace the active directive and append a history record.
    pub fn activate(&self, text: String, source: Option<AttractorId>, reason: &str) -> Directive {
        let directive = Directive {
            text,
            source_attractor_id: source,
            generated_at: Utc::now(),
            reason: reason.to_string(),
        };

        let record = {
            let mut state = self.lock();
            let record = DirectiveRecord {
                timestamp: directive.generated_at,
                from_state: state_label(state.current.source_attractor_id),
                to_state: state_label(source),
                prompt: directive.text.clone(),
                reason: directive.reason.clone(),
            };
            state.current = directive.clone();
            state.history.push_back(record.clone());
            while state.history.len() > self.config.max_history.max(1) {
                state.history.pop_front();
            }
            record
        };

        info!(
            "Directive regenerated: {} -> {} ({})",
            record.from_state, record.to_state, record.reason
        );

        if let Some(dir) = self.config.state_dir.as_deref() {
            if let Err(e) = persist(dir, &record) {
                warn!("Failed to persist directive to {}: {}", dir.display(), e);
            }
        }
        directive
    }

    pub fn current(&self) -> Directive {
        self.lock().current.clone()
    }

    pub fn current_prompt(&self) -> String {
        self.lock().current.text.clone()
    }

    pub fn phase_directive(&self) -> String {
        format!("{}\n\n{}", PHASE_DIRECTIVE_HEADER, self.current_prompt())
    }

    /// History oldest-first; `limit` keeps only the most recent entries.
    pub fn history(&self, limit: Option<usize>) -> Vec<DirectiveRecord> {
        let state = self.lock();
        let skip = limit.map_or(0, |n| state.history.len().saturating_sub(n));
        state.history.iter().skip(skip).cloned().collect()
    }

    pub fn active_path(&self) -> Option<PathBuf> {
        self.config.state_dir.as_ref().map(|d| d.join(ACTIVE_FILE))
    }

    pub fn history_path(&self) -> Option<PathBuf> {
        self.config.state_dir.as_ref().map(|d| d.join(HISTORY_FILE))
    }
}

fn persist(dir: &Path, record: &DirectiveRecord) -> Result<()> {
    fs::create_dir_all(dir)?;

    let active = dir.join(ACTIVE_FILE);
    let tmp = active.with_extension("txt.tmp");
    fs::write(&tmp, &record.prompt)?;
    fs::rename(&tmp, &active)?;

    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(HISTORY_FILE))?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

fn restore_active(dir: &Path) -> Option<String> {
    let path = dir.join(ACTIVE_FILE);
    match fs::read_to_string(&path) {
        Ok(text) if !text.trim().is_empty() => Some(text),
        Ok(_) => None,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            None
        }
    }
}

/// Last `keep` parseable records of the history log.
fn restore_history(dir: &Path, keep: usize) -> VecDeque<DirectiveRecord> {
    let Ok(content) = fs::read_to_string(dir.join(HISTORY_FILE)) else {
        return VecDeque::new();
    };
    let mut history: VecDeque<DirectiveRecord> = content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect();
    while history.len() > keep.max(1) {
        history.pop_front();
    }
    history
}
