//! EmergenceEngine — composition root
//!
//! Observer → landscape → directive manager, wired through the two landscape
//! events. Holds no logic of its own beyond the wiring.

use crate::config::EmergenceConfig;
use crate::directive::DirectiveManager;
use crate::landscape::{state_label, AttractorLandscape, Classification};
use crate::observer::PhaseSpaceObserver;
use agentcraft_core::{Result, ToolLogSource};
use std::sync::Arc;

pub struct EmergenceEngine {
    landscape: Arc<AttractorLandscape>,
    directives: Arc<DirectiveManager>,
}

impl EmergenceEngine {
    pub fn new(config: EmergenceConfig) -> Result<Self> {
        config.validate()?;
        let landscape = Arc::new(AttractorLandscape::new(
            config.observer.clone(),
            config.landscape.clone(),
        )?);
        let directives = Arc::new(DirectiveManager::new(
            &config.observer.dimensions,
            config.directive.clone(),
        ));

        let names = landscape.dimension_names().to_vec();
        let k = config.landscape.dominant_dimensions;
        let on_discovery = Arc::clone(&directives);
        landscape.subscribe_discovery(move |attractor| {
            let ranking = attractor.dominant_axes(&names, k);
            on_discovery.regenerate(Some(attractor), &ranking, "attractor discovered");
        });

        let on_transition = Arc::clone(&directives);
        landscape.subscribe_transition(move |transition, attractor| {
            let reason = format!(
                "basin transition {} -> {}",
                state_label(transition.from),
                state_label(transition.to)
            );
            on_transition.regenerate(attractor, &transition.dominant_dimensions, &reason);
        });

        Ok(Self {
            landscape,
            directives,
        })
    }

    /// Attach the externally-owned tool log. Never mutated.
    pub fn connect_tool_logs(&self, source: Arc<dyn ToolLogSource>) {
        self.landscape.set_tool_log_source(source);
    }

    pub fn start(&self) {
        self.landscape.start();
    }

    pub fn stop(&self) {
        self.landscape.stop();
    }

    /// Run a single tick synchronously, outside the loop.
    pub fn tick(&self) -> Classification {
        self.landscape.tick()
    }

    pub fn observer(&self) -> &PhaseSpaceObserver {
        self.landscape.observer()
    }

    pub fn landscape(&self) -> &Arc<AttractorLandscape> {
        &self.landscape
    }

    pub fn directives(&self) -> &Arc<DirectiveManager> {
        &self.directives
    }
}

impl Drop for EmergenceEngine {
    /// The tick task holds its own handle on the landscape; stop it here or
    /// it outlives the engine.
    fn drop(&mut self) {
        self.landscape.stop();
    }
}
