//! Telemetry tailer for NDJSON telemetry files
//!
//! Polls the file size and reads only the appended bytes. Each complete line
//! is one tagged `TelemetryLine`: tool records go to the shared tool log,
//! everything else is forwarded to the observer. A partial trailing line is
//! held as bytes until its newline arrives.

use crate::engine::EmergenceEngine;
use crate::observer::PhaseSpaceObserver;
use agentcraft_core::{Position, SharedToolLog, ToolRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// One line of the telemetry file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TelemetryLine {
    Tool(ToolRecord),
    Position {
        x: f64,
        y: f64,
        z: f64,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    Health {
        hp: f64,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    Death {
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    Instruction {
        #[serde(default)]
        complexity: Option<f64>,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    Agents {
        count: usize,
    },
    Board {
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
}

impl TelemetryLine {
    /// Route this line to its sink.
    pub fn apply(self, observer: &PhaseSpaceObserver, tool_log: &SharedToolLog) {
        let at = |ts: Option<DateTime<Utc>>| ts.unwrap_or_else(Utc::now);
        match self {
            TelemetryLine::Tool(record) => {
                let mut log = tool_log.write().unwrap_or_else(|p| p.into_inner());
                log.push(record);
            }
            TelemetryLine::Position { x, y, z, timestamp } => {
                observer.record_position_at(Position::new(x, y, z), at(timestamp))
            }
            TelemetryLine::Health { hp, timestamp } => observer.record_health_at(hp, at(timestamp)),
            TelemetryLine::Death { timestamp } => observer.record_death_at(at(timestamp)),
            TelemetryLine::Instruction {
                complexity,
                timestamp,
            } => observer.record_instruction_at(complexity, at(timestamp)),
            TelemetryLine::Agents { count } => observer.set_agent_count(count),
            TelemetryLine::Board { timestamp } => observer.record_board_message_at(at(timestamp)),
        }
    }
}

/// Follows one telemetry file by byte offset.
pub struct TelemetryTailer {
    path: PathBuf,
    offset: u64,
    pending: Vec<u8>,
    tool_log: SharedToolLog,
    poll_interval: Duration,
}

impl TelemetryTailer {
    /// Tail `path` from its beginning, appending tool records to `tool_log`.
    pub fn new(path: PathBuf, tool_log: SharedToolLog, poll_interval: Duration) -> Self {
        Self {
            path,
            offset: 0,
            pending: Vec::new(),
            tool_log,
            poll_interval,
        }
    }

    /// Read whatever was appended since the last poll. Returns lines applied.
    pub fn poll_once(&mut self, observer: &PhaseSpaceObserver) -> usize {
        let current_size = match std::fs::metadata(&self.path) {
            Ok(m) => m.len(),
            Err(_) => return 0,
        };

        if current_size < self.offset {
            info!("{} shrank, re-reading from start", self.path.display());
            self.offset = 0;
            self.pending.clear();
        }
        if current_size == self.offset {
            return 0;
        }

        let delta = match read_delta(&self.path, self.offset, current_size) {
            Ok(d) => d,
            Err(e) => {
                debug!("Failed to read delta from {}: {}", self.path.display(), e);
                return 0;
            }
        };
        self.offset = current_size;
        self.pending.extend_from_slice(&delta);

        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return 0;
        };
        let bytes: Vec<u8> = self.pending.drain(..=last_newline).collect();
        let complete = String::from_utf8_lossy(&bytes);

        let mut applied = 0;
        for line in complete.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match serde_json::from_str::<TelemetryLine>(line) {
                Ok(parsed) => {
                    parsed.apply(observer, &self.tool_log);
                    applied += 1;
                }
                Err(e) => debug!("Skipping malformed telemetry line: {}", e),
            }
        }
        applied
    }

    /// Run the poll loop until the task is aborted.
    pub async fn run(mut self, engine: Arc<EmergenceEngine>) {
        info!("TelemetryTailer started on {}", self.path.display());
        loop {
            let applied = self.poll_once(engine.observer());
            if applied > 0 {
                debug!("Applied {} telemetry lines", applied);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Read the raw bytes between two offsets.
fn read_delta(path: &Path, from: u64, to: u64) -> std::io::Result<Vec<u8>> {
    use std::io::{Read, Seek, SeekFrom};
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(from))?;
    let mut buf = vec![0u8; (to - from) as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}
