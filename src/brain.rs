// ByteMind - Самообучающаяся байтовая графовая система с циклической саморегуляцией.
// Copyright (C) 2024-2025 Chernov Denys

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Brain - the episode pipeline.
//!
//! One `Brain` owns the byte graph, the pattern registry, the emergent
//! state, and the I/O buffers. An episode is: clear output, inject
//! input, K propagation+emit steps, then (supervised only) pattern
//! detection, feedback, and metabolic pruning. The graph is owned by
//! exactly one episode at a time; hosts that serve requests wrap the
//! brain in [`SharedBrain`] and serialize calls.

use crate::config::CoreConfig;
use crate::detector;
use crate::emergent::{EmergentSnapshot, EmergentState};
use crate::feedback;
use crate::graph::ByteGraph;
use crate::pattern::PatternId;
use crate::registry::{PatternRegistry, RegistryError};
use crate::selector;
use crate::serializer;
use crate::wave::WavePropagator;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Host-side wrapper: one graph per request mutex.
pub type SharedBrain = Arc<RwLock<Brain>>;

/// Episode-level errors. Everything else (missing edges, empty
/// outputs, zero patterns) is a normal operating condition.
#[derive(Debug, Error)]
pub enum EpisodeError {
    #[error("input length {len} exceeds sanity cap {cap}")]
    MalformedInput { len: usize, cap: usize },

    #[error("capacity growth failed")]
    CapacityExhausted,
}

impl From<RegistryError> for EpisodeError {
    fn from(_: RegistryError) -> Self {
        // The only registry error reachable from an episode is failed
        // capacity growth; hierarchy edits are validated internally.
        EpisodeError::CapacityExhausted
    }
}

/// Inspection view of one pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternInfo {
    pub id: PatternId,
    /// The slot sequence, `_` for blanks, `\xNN` for escaped bytes.
    pub sequence: String,
    pub strength: f32,
    pub prediction_attempts: u64,
    pub prediction_successes: u64,
    pub chain_depth: u32,
    pub parent: Option<PatternId>,
    pub accumulated_meaning: f32,
    pub dynamic_importance: f32,
}

/// The core learner.
#[derive(Debug)]
pub struct Brain {
    pub(crate) config: CoreConfig,
    pub(crate) graph: ByteGraph,
    pub(crate) registry: PatternRegistry,
    pub(crate) emergent: EmergentState,
    wave: WavePropagator,
    input: Vec<u8>,
    output: Vec<u8>,
}

impl Brain {
    pub fn new() -> Self {
        Self::with_config(CoreConfig::default())
    }

    pub fn with_config(config: CoreConfig) -> Self {
        Self {
            config,
            graph: ByteGraph::new(),
            registry: PatternRegistry::new(),
            emergent: EmergentState::new(),
            wave: WavePropagator::new(),
            input: Vec::new(),
            output: Vec::new(),
        }
    }

    /// Wrap for shared host access.
    pub fn into_shared(self) -> SharedBrain {
        Arc::new(RwLock::new(self))
    }

    // ==================== EPISODE ====================

    /// Run one episode. With a target the episode is supervised
    /// (detection, feedback, pruning run after emission); without one
    /// it is pure inference.
    pub fn run_episode(&mut self, input: &[u8], target: Option<&[u8]>) -> Result<(), EpisodeError> {
        let cap = self.config.input_sanity_cap;
        if input.len() > cap {
            return Err(EpisodeError::MalformedInput { len: input.len(), cap });
        }
        if let Some(t) = target {
            if t.len() > cap {
                return Err(EpisodeError::MalformedInput { len: t.len(), cap });
            }
        }

        let timer = crate::metrics::EPISODE_DURATION.start_timer();

        // Transient state belongs to one episode only.
        self.output.clear();
        self.graph.clear_transient();
        self.registry.reset_transient();
        self.input.clear();
        self.input
            .try_reserve(input.len())
            .map_err(|_| EpisodeError::CapacityExhausted)?;
        self.input.extend_from_slice(input);

        self.graph.inject(&self.input, &self.config);

        let steps = self.config.steps_for(self.input.len());
        let bound = self.config.output_bound(self.input.len());
        let mut emitting = true;

        for _ in 0..steps {
            self.wave.step(
                &mut self.graph,
                &mut self.registry,
                &self.input,
                &self.output,
                &self.emergent,
                &self.config,
            );

            if emitting && self.output.len() < bound {
                match selector::select(
                    &self.graph,
                    &self.registry,
                    &self.emergent,
                    &self.input,
                    &self.output,
                    &self.config,
                ) {
                    Some(byte) => {
                        self.output
                            .try_reserve(1)
                            .map_err(|_| EpisodeError::CapacityExhausted)?;
                        self.output.push(byte);
                        if self.terminator_fired() {
                            emitting = false;
                        }
                    }
                    None => emitting = false,
                }
            } else if self.output.len() >= bound {
                emitting = false;
            }

            self.recompute_emergent();
        }

        if let Some(target) = target {
            detector::detect(
                &mut self.registry,
                &self.input,
                &self.output,
                target,
                &self.emergent,
            )?;
            let report = feedback::apply(
                &mut self.graph,
                &mut self.registry,
                &self.emergent,
                &self.input,
                &self.output,
                target,
            );
            self.emergent.record_mismatch(report.mismatch);
            self.registry.refresh_strengths();
            self.recompute_emergent();

            // Metabolic pruning: each edge list and the registry gate
            // themselves on their own densities.
            self.graph.prune_all();
            self.registry.prune();
            self.recompute_emergent();
        } else {
            self.recompute_emergent();
        }

        self.emergent.advance_step();

        crate::metrics::EPISODES_TOTAL.inc();
        crate::metrics::record_episode(&self.emergent.snapshot());
        timer.observe_duration();

        debug!(
            input_len = self.input.len(),
            output_len = self.output.len(),
            supervised = target.is_some(),
            error_rate = self.emergent.error_rate,
            patterns = self.registry.pattern_count(),
            "episode complete"
        );
        Ok(())
    }

    /// A pattern matching the output tail with nothing left to
    /// predict is the inferred end-of-message signal.
    fn terminator_fired(&self) -> bool {
        self.registry
            .live()
            .any(|p| p.predictions.is_empty() && p.matches_tail(&self.output))
    }

    fn recompute_emergent(&mut self) {
        let graph_census = self.graph.census();
        let pattern_census = self.registry.census();
        self.emergent.recompute(
            &graph_census,
            &pattern_census,
            &self.output,
            self.config.recent_window,
        );
    }

    // ==================== OUTPUT & INSPECTION ====================

    /// The most recent output buffer. Valid until the next episode.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Read access to the byte layer.
    pub fn graph(&self) -> &ByteGraph {
        &self.graph
    }

    /// Read access to the pattern registry.
    pub fn registry(&self) -> &PatternRegistry {
        &self.registry
    }

    pub fn pattern_count(&self) -> usize {
        self.registry.pattern_count()
    }

    pub fn error_rate(&self) -> f32 {
        self.emergent.error_rate
    }

    pub fn node_activation(&self, id: u8) -> f32 {
        self.graph.node(id).activation
    }

    pub fn edge_weight(&self, src: u8, dst: u8) -> f32 {
        self.graph.edge_weight(src, dst)
    }

    pub fn edge_use_count(&self, src: u8, dst: u8) -> u64 {
        self.graph.edge_use_count(src, dst)
    }

    pub fn edge_success_count(&self, src: u8, dst: u8) -> u64 {
        self.graph.edge_success_count(src, dst)
    }

    pub fn pattern_info(&self, id: PatternId) -> Option<PatternInfo> {
        self.registry.get(id).map(|p| PatternInfo {
            id: p.id,
            sequence: serializer::format_slots(&p.slots),
            strength: p.strength,
            prediction_attempts: p.prediction_attempts,
            prediction_successes: p.prediction_successes,
            chain_depth: p.chain_depth,
            parent: p.parent,
            accumulated_meaning: p.accumulated_meaning,
            dynamic_importance: p.dynamic_importance,
        })
    }

    pub fn pattern_predictions(&self, id: PatternId) -> Option<Vec<(u8, f32)>> {
        self.registry
            .get(id)
            .map(|p| p.predictions.iter().map(|e| (e.node, e.weight)).collect())
    }

    /// All live pattern ids, ascending.
    pub fn pattern_ids(&self) -> Vec<PatternId> {
        self.registry.live_ids()
    }

    pub fn emergent_snapshot(&self) -> EmergentSnapshot {
        self.emergent.snapshot()
    }

    /// The status object embedding servers expose on `/api/status`.
    pub fn status_json(&self) -> serde_json::Value {
        serde_json::json!({
            "status": "ok",
            "error_rate": self.emergent.error_rate,
        })
    }

    // ==================== PERSISTENCE ====================

    /// Write the brain to a `.m` file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), serializer::BrainFileError> {
        serializer::save_brain(self, path)
    }

    /// Restore a brain from a `.m` file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, serializer::BrainFileError> {
        serializer::load_brain(path)
    }

    /// Like [`Brain::load`], but commits everything parsed before the
    /// first bad line instead of failing.
    pub fn load_partial<P: AsRef<Path>>(path: P) -> Result<Self, serializer::BrainFileError> {
        let result = serializer::load_brain_partial(path)?;
        info!(
            skipped = result.skipped_lines,
            "partial brain load committed"
        );
        Ok(result.brain)
    }
}

impl Default for Brain {
    fn default() -> Self {
        Self::new()
    }
}
