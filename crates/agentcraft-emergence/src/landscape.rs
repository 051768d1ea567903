//! Attractor landscape — unsupervised regime detection over the point stream
//!
//! Every tick pulls one point from the observer and classifies it against
//! the attractors discovered so far:
//!
//! - within `attractor_radius` of the nearest centroid: member, centroid
//!   moves as a running mean
//! - beyond `escape_radius` of every centroid: unclassified, pushed onto the
//!   dwell buffer; a full, tight buffer becomes a new attractor
//! - in between: in transit, nothing changes
//!
//! Attractors are never deleted. Events are collected under the state lock
//! and delivered after it is released, in order.

use crate::config::{LandscapeConfig, ObserverConfig};
use crate::observer::{euclidean, PhasePoint, PhaseSpaceObserver};
use agentcraft_core::{Error, Result, ToolLogSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Stable, monotonic attractor identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttractorId(pub u64);

impl fmt::Display for AttractorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attractor-{}", self.0)
    }
}

impl FromStr for AttractorId {
    type Err = Error;

    /// Parses the display form, `attractor-N`.
    fn from_str(s: &str) -> Result<Self> {
        s.strip_prefix("attractor-")
            .and_then(|n| n.parse::<u64>().ok())
            .map(AttractorId)
            .ok_or_else(|| Error::InvalidAttractorId(s.to_string()))
    }
}

/// Display form of an optional attractor: `attractor-N` or `unknown`.
pub fn state_label(id: Option<AttractorId>) -> String {
    id.map(|id| id.to_string()).unwrap_or_else(|| "unknown".into())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionDelta {
    pub name: String,
    pub delta: f64,
}

/// A discovered region of phase space where the trajectory persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attractor {
    pub id: AttractorId,
    pub centroid: Vec<f64>,
    pub sample_count: u64,
    /// Largest member distance from the centroid seen so far.
    pub radius: f64,
    pub first_seen: DateTime<Utc>,
    pub last_visited: DateTime<Utc>,
    pub trajectory: VecDeque<Vec<f64>>,
}

impl Attractor {
    fn absorb(&mut self, point: &PhasePoint, trajectory_len: usize) {
        self.sample_count += 1;
        let n = self.sample_count as f64;
        for (c, p) in self.centroid.iter_mut().zip(&point.coordinates) {
            *c += (p - *c) / n;
        }
        self.radius = self.radius.max(point.distance_to(&self.centroid));
        self.last_visited = point.timestamp;
        push_trajectory(&mut self.trajectory, point.coordinates.clone(), trajectory_len);
    }

    /// Axes ranked by centroid magnitude, descending, ties in catalogue order.
    pub fn dominant_axes(&self, names: &[String], k: usize) -> Vec<DimensionDelta> {
        rank_axes(&self.centroid, names, k)
    }
}

fn push_trajectory(trajectory: &mut VecDeque<Vec<f64>>, coords: Vec<f64>, cap: usize) {
    trajectory.push_back(coords);
    while trajectory.len() > cap {
        trajectory.pop_front();
    }
}

/// A recorded change of classification between consecutive points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasinTransition {
    pub from: Option<AttractorId>,
    pub to: Option<AttractorId>,
    pub timestamp: DateTime<Utc>,
    pub dominant_dimensions: Vec<DimensionDelta>,
}

/// Read-only snapshot of the landscape. Also the on-disk snapshot format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmergentLandscape {
    pub attractors: Vec<Attractor>,
    pub transitions: Vec<BasinTransition>,
    pub current_attractor_id: Option<AttractorId>,
}

/// What a single point did to the landscape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Inside an existing attractor's membership radius.
    Member(AttractorId),
    /// Completed a dwell and became a new attractor.
    Discovered(AttractorId),
    /// Between the two radii; no commitment.
    InTransit,
    /// Beyond every escape radius; dwell buffer now holds `dwell` points.
    Unclassified { dwell: usize },
}

pub type DiscoveryHandler = Box<dyn Fn(&Attractor) + Send + Sync>;
/// Receives the transition and, when the trajectory landed in one, the attractor.
pub type TransitionHandler = Box<dyn Fn(&BasinTransition, Option<&Attractor>) + Send + Sync>;

enum LandscapeEvent {
    Discovered(Attractor),
    Transition(BasinTransition, Option<Attractor>),
}

#[derive(Default)]
struct LandscapeState {
    attractors: Vec<Attractor>,
    transitions: Vec<BasinTransition>,
    current: Option<AttractorId>,
    dwell: VecDeque<PhasePoint>,
    last_point: Option<Vec<f64>>,
    next_id: u64,
}

impl LandscapeState {
    fn restore(snapshot: EmergentLandscape, dims: usize) -> Self {
        let attractors: Vec<Attractor> = snapshot
            .attractors
            .into_iter()
            .filter(|a| a.centroid.len() == dims)
            .collect();
        let next_id = attractors.iter().map(|a| a.id.0 + 1).max().unwrap_or(0);
        let current = snapshot
            .current_attractor_id
            .filter(|id| attractors.iter().any(|a| a.id == *id));
        Self {
            attractors,
            transitions: snapshot.transitions,
            current,
            next_id,
            ..Default::default()
        }
    }

    fn snapshot(&self) -> EmergentLandscape {
        EmergentLandscape {
            attractors: self.attractors.clone(),
            transitions: self.transitions.clone(),
            current_attractor_id: self.current,
        }
    }

    fn classify(
        &mut self,
        point: PhasePoint,
        config: &LandscapeConfig,
        names: &[String],
        events: &mut Vec<LandscapeEvent>,
    ) -> Classification {
        let previous = self.last_point.replace(point.coordinates.clone());
        let delta: Vec<f64> = match &previous {
            Some(prev) => point.coordinates.iter().zip(prev).map(|(p, q)| p - q).collect(),
            None => vec![0.0; point.coordinates.len()],
        };
        let dominant = rank_axes(&delta, names, config.dominant_dimensions);

        let nearest = self
            .attractors
            .iter()
            .enumerate()
            .map(|(i, a)| (i, point.distance_to(&a.centroid)))
            .min_by(|a, b| a.1.total_cmp(&b.1));

        match nearest {
            Some((idx, distance)) if distance <= config.attractor_radius => {
                self.dwell.clear();
                self.attractors[idx].absorb(&point, config.trajectory_len);
                let id = self.attractors[idx].id;
                if self.current != Some(id) {
                    let transition = BasinTransition {
                        from: self.current,
                        to: Some(id),
                        timestamp: point.timestamp,
                        dominant_dimensions: dominant,
                    };
                    info!(
                        "Basin transition {} -> {} (distance {:.3})",
                        state_label(self.current),
                        id,
                        distance
                    );
                    self.current = Some(id);
                    self.transitions.push(transition.clone());
                    events.push(LandscapeEvent::Transition(
                        transition,
                        Some(self.attractors[idx].clone()),
                    ));
                }
                Classification::Member(id)
            }
            Some((idx, distance)) if distance <= config.escape_radius => {
                debug!(
                    "In transit: {:.3} from {} (held by {})",
                    distance,
                    self.attractors[idx].id,
                    state_label(self.current)
                );
                Classification::InTransit
            }
            _ => self.dwell_step(point, config, dominant, events),
        }
    }

    fn dwell_step(
        &mut self,
        point: PhasePoint,
        config: &LandscapeConfig,
        dominant: Vec<DimensionDelta>,
        events: &mut Vec<LandscapeEvent>,
    ) -> Classification {
        let prior = self.current.take();
        let timestamp = point.timestamp;
        self.dwell.push_back(point);
        while self.dwell.len() > config.min_samples {
            self.dwell.pop_front();
        }

        let spread = mean_pairwise_distance(&self.dwell);
        if self.dwell.len() < config.min_samples || spread >= config.dwell_tightness {
            if self.dwell.len() < config.min_samples {
                debug!("Unclassified, dwell {}/{}", self.dwell.len(), config.min_samples);
            } else {
                debug!(
                    "Dwell full but loose (spread {:.3} >= {:.3})",
                    spread, config.dwell_tightness
                );
            }
            if let Some(prev) = prior {
                self.escape(prev, timestamp, dominant, events);
            }
            return Classification::Unclassified {
                dwell: self.dwell.len(),
            };
        }

        // Escape and discovery in one step is a single change: prior -> new.
        let attractor = self.promote_dwell(timestamp, config.trajectory_len);
        let id = attractor.id;
        info!(
            "Discovered {} from {} dwell points (spread {:.3}), leaving {}",
            id,
            attractor.sample_count,
            spread,
            state_label(prior)
        );
        self.transitions.push(BasinTransition {
            from: prior,
            to: Some(id),
            timestamp,
            dominant_dimensions: dominant,
        });
        self.current = Some(id);
        events.push(LandscapeEvent::Discovered(attractor));
        Classification::Discovered(id)
    }

    fn escape(
        &mut self,
        prev: AttractorId,
        timestamp: DateTime<Utc>,
        dominant: Vec<DimensionDelta>,
        events: &mut Vec<LandscapeEvent>,
    ) {
        let transition = BasinTransition {
            from: Some(prev),
            to: None,
            timestamp,
            dominant_dimensions: dominant,
        };
        info!("Basin transition {} -> unknown (escaped)", prev);
        self.transitions.push(transition.clone());
        events.push(LandscapeEvent::Transition(transition, None));
    }

    fn promote_dwell(&mut self, now: DateTime<Utc>, trajectory_len: usize) -> Attractor {
        let members: Vec<PhasePoint> = self.dwell.drain(..).collect();
        let centroid = centroid_of(&members);
        let radius = members
            .iter()
            .map(|p| p.distance_to(&centroid))
            .fold(0.0, f64::max);
        let mut trajectory = VecDeque::new();
        for p in &members {
            push_trajectory(&mut trajectory, p.coordinates.clone(), trajectory_len);
        }
        let attractor = Attractor {
            id: AttractorId(self.next_id),
            centroid,
            sample_count: members.len() as u64,
            radius,
            first_seen: members.first().map(|p| p.timestamp).unwrap_or(now),
            last_visited: now,
            trajectory,
        };
        self.next_id += 1;
        self.attractors.push(attractor.clone());
        attractor
    }
}

fn centroid_of(points: &[PhasePoint]) -> Vec<f64> {
    let dims = points.first().map(|p| p.coordinates.len()).unwrap_or(0);
    let n = points.len().max(1) as f64;
    (0..dims)
        .map(|d| points.iter().map(|p| p.coordinates[d]).sum::<f64>() / n)
        .collect()
}

/// Mean distance over all unordered pairs; a single point has zero spread.
fn mean_pairwise_distance(points: &VecDeque<PhasePoint>) -> f64 {
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..points.len() {
        for j in (i + 1)..points.len() {
            total += euclidean(&points[i].coordinates, &points[j].coordinates);
            pairs += 1;
        }
    }
    if pairs == 0 {
        0.0
    } else {
        total / pairs as f64
    }
}

/// Top-`k` axes by |value|, descending, ties in catalogue order.
fn rank_axes(values: &[f64], names: &[String], k: usize) -> Vec<DimensionDelta> {
    let mut order: Vec<usize> = (0..values.len().min(names.len())).collect();
    order.sort_by(|&a, &b| values[b].abs().total_cmp(&values[a].abs()));
    order
        .into_iter()
        .take(k)
        .map(|i| DimensionDelta {
            name: names[i].clone(),
            delta: values[i],
        })
        .collect()
}

fn read_snapshot(path: &Path) -> Option<EmergentLandscape> {
    if !path.exists() {
        return None;
    }
    match std::fs::read_to_string(path) {
        Ok(json) => match serde_json::from_str::<EmergentLandscape>(&json) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Failed to parse {}: {}, starting empty", path.display(), e);
                None
            }
        },
        Err(e) => {
            warn!("Failed to read {}: {}, starting empty", path.display(), e);
            None
        }
    }
}

fn write_snapshot(path: &Path, snapshot: &EmergentLandscape) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(snapshot)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Owns the observer and the attractor set; the only writer of either.
pub struct AttractorLandscape {
    observer: PhaseSpaceObserver,
    config: LandscapeConfig,
    names: Vec<String>,
    state: Mutex<LandscapeState>,
    on_discovery: RwLock<Vec<DiscoveryHandler>>,
    on_transition: RwLock<Vec<TransitionHandler>>,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AttractorLandscape {
    pub fn new(observer_config: ObserverConfig, config: LandscapeConfig) -> Result<Self> {
        config.validate()?;
        let observer = PhaseSpaceObserver::new(observer_config)?;
        let names: Vec<String> = observer.dimensions().iter().map(|d| d.name.clone()).collect();

        let state = match config.snapshot_path.as_deref().and_then(read_snapshot) {
            Some(snapshot) => {
                let state = LandscapeState::restore(snapshot, names.len());
                info!(
                    "Restored landscape: {} attractors, {} transitions, current {}",
                    state.attractors.len(),
                    state.transitions.len(),
                    state_label(state.current)
                );
                state
            }
            None => LandscapeState::default(),
        };

        Ok(Self {
            observer,
            config,
            names,
            state: Mutex::new(state),
            on_discovery: RwLock::new(Vec::new()),
            on_transition: RwLock::new(Vec::new()),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LandscapeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn observer(&self) -> &PhaseSpaceObserver {
        &self.observer
    }

    pub fn config(&self) -> &LandscapeConfig {
        &self.config
    }

    pub fn dimension_names(&self) -> &[String] {
        &self.names
    }

    pub fn set_tool_log_source(&self, source: Arc<dyn ToolLogSource>) {
        self.observer.set_tool_log_source(source);
    }

    pub fn subscribe_discovery(&self, handler: impl Fn(&Attractor) + Send + Sync + 'static) {
        write_handlers(&self.on_discovery).push(Box::new(handler));
    }

    pub fn subscribe_transition(
        &self,
        handler: impl Fn(&BasinTransition, Option<&Attractor>) + Send + Sync + 'static,
    ) {
        write_handlers(&self.on_transition).push(Box::new(handler));
    }

    // ------------------------------------------------------------
    // Read accessors
    // ------------------------------------------------------------

    pub fn landscape(&self) -> EmergentLandscape {
        self.lock().snapshot()
    }

    pub fn current_attractor_id(&self) -> Option<AttractorId> {
        self.lock().current
    }

    pub fn attractor(&self, id: AttractorId) -> Option<Attractor> {
        self.lock().attractors.iter().find(|a| a.id == id).cloned()
    }

    pub fn dwell_len(&self) -> usize {
        self.lock().dwell.len()
    }

    // ------------------------------------------------------------
    // Classification
    // ------------------------------------------------------------

    /// One tick: observe, classify, deliver events.
    pub fn tick(&self) -> Classification {
        let point = self.observer.observe();
        self.process_point(point)
    }

    /// Classify one point. Points whose dimensionality does not match the
    /// catalogue are ignored and read as in transit.
    pub fn process_point(&self, point: PhasePoint) -> Classification {
        if point.coordinates.len() != self.names.len() {
            warn!(
                "Ignoring point with {} coordinates (expected {})",
                point.coordinates.len(),
                self.names.len()
            );
            return Classification::InTransit;
        }

        let mut events = Vec::new();
        let (outcome, snapshot) = {
            let mut state = self.lock();
            let outcome = state.classify(point, &self.config, &self.names, &mut events);
            let snapshot = (!events.is_empty() && self.config.snapshot_path.is_some())
                .then(|| state.snapshot());
            (outcome, snapshot)
        };

        if let (Some(snapshot), Some(path)) = (snapshot, self.config.snapshot_path.as_deref()) {
            if let Err(e) = write_snapshot(path, &snapshot) {
                warn!("Failed to persist landscape to {}: {}", path.display(), e);
            }
        }

        self.dispatch(events);
        outcome
    }

    fn dispatch(&self, events: Vec<LandscapeEvent>) {
        for event in events {
            match event {
                LandscapeEvent::Discovered(attractor) => {
                    for handler in read_handlers(&self.on_discovery).iter() {
                        handler(&attractor);
                    }
                }
                LandscapeEvent::Transition(transition, attractor) => {
                    for handler in read_handlers(&self.on_transition).iter() {
                        handler(&transition, attractor.as_ref());
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------
    // Tick loop
    // ------------------------------------------------------------

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start ticking on the current tokio runtime. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime available, landscape not started");
            self.running.store(false, Ordering::SeqCst);
            return;
        };

        let this = Arc::clone(self);
        let interval = self.config.tick_interval();
        let handle = runtime.spawn(async move {
            info!("Landscape tick loop started ({:?} interval)", interval);
            // Re-armed after each tick completes, never on a fixed cadence.
            while this.running.load(Ordering::SeqCst) {
                this.tick();
                tokio::time::sleep(interval).await;
            }
            info!("Landscape tick loop stopped");
        });

        let mut task = self.task.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(old) = task.replace(handle) {
            old.abort();
        }
    }

    /// Prevent future ticks. Idempotent; an in-flight tick runs to completion.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        // The loop only yields at its sleep, so aborting never cuts a tick short.
        if let Some(handle) = self.task.lock().unwrap_or_else(|p| p.into_inner()).take() {
            handle.abort();
        }
    }
}

fn read_handlers<T>(lock: &RwLock<Vec<T>>) -> std::sync::RwLockReadGuard<'_, Vec<T>> {
    lock.read().unwrap_or_else(|p| p.into_inner())
}

fn write_handlers<T>(lock: &RwLock<Vec<T>>) -> std::sync::RwLockWriteGuard<'_, Vec<T>> {
    lock.write().unwrap_or_else(|p| p.into_inner())
}
