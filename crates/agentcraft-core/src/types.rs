//! Core types for Agentcraft telemetry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Outcome of one tool execution by a game agent.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolOutcome {
    Success,
    Failure,
    Timeout,
}

impl ToolOutcome {
    /// Timeouts count as failures for every failure-derived feature.
    pub fn is_failure(self) -> bool {
        !matches!(self, ToolOutcome::Success)
    }
}

/// World position of an agent.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// One stack in an inventory snapshot.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InventoryItem {
    pub name: String,
    pub count: u32,
}

impl InventoryItem {
    pub fn new(name: impl Into<String>, count: u32) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

/// A tool-execution record as appended to the shared tool log.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolRecord {
    pub tool: String,
    pub timestamp: DateTime<Utc>,
    pub result: ToolOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<Vec<InventoryItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl ToolRecord {
    pub fn new(tool: impl Into<String>, timestamp: DateTime<Utc>, result: ToolOutcome) -> Self {
        Self {
            tool: tool.into(),
            timestamp,
            result,
            inventory: None,
            position: None,
        }
    }

    pub fn with_inventory(mut self, inventory: Vec<InventoryItem>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn category(&self) -> Option<ToolCategory> {
        ToolCategory::classify(&self.tool)
    }
}

/// Coarse action category derived from a tool name.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Combat,
    Gathering,
    Crafting,
}

/// Keyword table: first matching row wins.
const CATEGORY_KEYWORDS: &[(ToolCategory, &[&str])] = &[
    (
        ToolCategory::Combat,
        &["attack", "fight", "kill", "combat", "defend", "shoot", "hunt"],
    ),
    (
        ToolCategory::Gathering,
        &["mine", "dig", "collect", "gather", "chop", "harvest", "fish"],
    ),
    (
        ToolCategory::Crafting,
        &["craft", "smelt", "build", "place", "cook", "enchant"],
    ),
];

impl ToolCategory {
    pub fn classify(tool: &str) -> Option<Self> {
        let lower = tool.to_ascii_lowercase();
        CATEGORY_KEYWORDS
            .iter()
            .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
            .map(|(category, _)| *category)
    }
}

/// Read-only view over an externally-owned, append-only tool log.
///
/// Implementations must never mutate the log. Records are assumed to be
/// appended in timestamp order.
pub trait ToolLogSource: Send + Sync {
    /// All records with `timestamp >= since`, oldest first.
    fn records_since(&self, since: DateTime<Utc>) -> Vec<ToolRecord>;
}

/// The canonical shared tool log: writers append, observers read.
pub type SharedToolLog = Arc<RwLock<Vec<ToolRecord>>>;

pub fn shared_tool_log() -> SharedToolLog {
    Arc::new(RwLock::new(Vec::new()))
}

impl ToolLogSource for RwLock<Vec<ToolRecord>> {
    fn records_since(&self, since: DateTime<Utc>) -> Vec<ToolRecord> {
        let log = match self.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tail_since(&log, since)
    }
}

impl ToolLogSource for Vec<ToolRecord> {
    fn records_since(&self, since: DateTime<Utc>) -> Vec<ToolRecord> {
        tail_since(self, since)
    }
}

fn tail_since(log: &[ToolRecord], since: DateTime<Utc>) -> Vec<ToolRecord> {
    let start = log
        .iter()
        .rposition(|r| r.timestamp < since)
        .map(|i| i + 1)
        .unwrap_or(0);
    log[start..].to_vec()
}
