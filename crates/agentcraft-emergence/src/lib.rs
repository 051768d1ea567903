//! Agentcraft Emergence — unsupervised regime detection for game agents
//!
//! Pipeline:
//! - Observer: telemetry over a sliding window → one normalized point per tick
//! - Landscape: points → attractors discovered online, basin transitions recorded
//! - Directives: discovery/transition events → one active guidance text
//! - Engine: wires the three; the tailer feeds it from an NDJSON file
//!
//! Never decides a game action, never calls a model, never does game I/O.

pub mod config;
pub mod directive;
pub mod engine;
pub mod landscape;
pub mod observer;
pub mod watcher;

pub use config::{EmergenceConfig, PhaseDimension};
pub use directive::{Directive, DirectiveManager, DirectiveRecord, PHASE_DIRECTIVE_HEADER};
pub use engine::EmergenceEngine;
pub use landscape::{
    Attractor, AttractorId, AttractorLandscape, BasinTransition, Classification, DimensionDelta,
    EmergentLandscape,
};
pub use observer::{PhasePoint, PhaseSpaceInput, PhaseSpaceObserver};
