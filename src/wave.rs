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

//! Wave propagation - multi-step activation diffusion.
//!
//! Each step runs three passes in order:
//!
//! - **Pass A**: patterns match against the I/O buffers, ignite above
//!   their adaptive threshold, and push activation into their
//!   predicted nodes (with meaning/hierarchy/path boosts) and into
//!   chained patterns (where accumulated meaning flows monotonically).
//! - **Pass B**: active nodes push activation along their outgoing
//!   edges, weighted by a four-factor multiplicative path quality
//!   (information, learning, coherence, predictive), normalized per
//!   source and capped per transfer and per node.
//! - **Pass C**: decay. Nodes carrying pattern support decay slower
//!   than ambient noise; idle nodes recover energy; thresholds adapt
//!   toward the running averages.
//!
//! Every factor has a strictly positive neutral default, so an
//! undefined input (an unused edge, an empty buffer) can never zero a
//! whole path.

use crate::config::{CoreConfig, EPSILON, NODE_COUNT};
use crate::emergent::EmergentState;
use crate::graph::ByteGraph;
use crate::pattern::PatternId;
use crate::registry::PatternRegistry;
use std::collections::HashSet;
use tracing::trace;

/// Per-step accounting, mostly for tests and logs.
#[derive(Debug, Clone, Default)]
pub struct StepReport {
    pub fired_patterns: usize,
    pub node_transfers: usize,
    pub transferred: f32,
}

/// The propagation engine. Holds scratch state reused across steps.
#[derive(Debug)]
pub struct WavePropagator {
    /// Pattern prediction support per node, rebuilt in pass A and
    /// consumed by pass B scoring and pass C coherent decay.
    support: [f32; NODE_COUNT],
    /// Support restricted to patterns matching the output tail
    /// (context prediction).
    tail_support: [f32; NODE_COUNT],
    /// Highest dynamic importance among the patterns backing a node
    /// (path importance in pass B).
    importance: [f32; NODE_COUNT],
}

impl WavePropagator {
    pub fn new() -> Self {
        Self {
            support: [0.0; NODE_COUNT],
            tail_support: [0.0; NODE_COUNT],
            importance: [0.0; NODE_COUNT],
        }
    }

    /// One full propagation step: pass A, pass B, pass C.
    pub fn step(
        &mut self,
        graph: &mut ByteGraph,
        registry: &mut PatternRegistry,
        input: &[u8],
        output: &[u8],
        emergent: &EmergentState,
        config: &CoreConfig,
    ) -> StepReport {
        let mut report = StepReport::default();
        self.pass_a(graph, registry, input, output, config, &mut report);
        self.pass_b(graph, input, output, config, &mut report);
        self.pass_c(graph, registry, emergent, config);
        trace!(
            fired = report.fired_patterns,
            transfers = report.node_transfers,
            total = report.transferred,
            "propagation step"
        );
        report
    }

    // ==================== PASS A: PATTERNS ====================

    fn pass_a(
        &mut self,
        graph: &mut ByteGraph,
        registry: &mut PatternRegistry,
        input: &[u8],
        output: &[u8],
        config: &CoreConfig,
        report: &mut StepReport,
    ) {
        self.support = [0.0; NODE_COUNT];
        self.tail_support = [0.0; NODE_COUNT];
        self.importance = [0.0; NODE_COUNT];

        let ids = registry.live_ids();
        let mut chain_transfers: Vec<(PatternId, f32, f32)> = Vec::new();

        for id in ids {
            let mut node_pushes: Vec<(u8, f32)> = Vec::new();
            {
                let p = match registry.get_mut(id) {
                    Some(p) => p,
                    None => continue,
                };

                // Ignition: best match over both buffers, gated by the
                // adaptive threshold. A pattern that already fired
                // this step is skipped (no self-re-ignition).
                if !p.has_fired {
                    let best = [input, output]
                        .iter()
                        .filter_map(|buf| p.best_match(buf).map(|(_, s)| s))
                        .fold(None::<f32>, |acc, s| {
                            Some(acc.map_or(s, |a: f32| a.max(s)))
                        });
                    if let Some(score) = best {
                        if score > p.threshold {
                            p.activation =
                                (p.activation + score * p.strength).min(config.activation_ceiling);
                            p.has_fired = true;
                            report.fired_patterns += 1;
                        }
                    }
                }

                if p.activation <= EPSILON {
                    continue;
                }

                let meaning = p.meaning_boost(config.meaning_boost_cap);
                let hierarchy = p.hierarchy_boost();
                let matches_tail = p.matches_tail(output) || (output.is_empty() && p.matches_tail(input));

                for pred in &p.predictions {
                    let amount = p.activation
                        * pred.weight
                        * p.strength
                        * meaning
                        * hierarchy
                        * config.path_boost;
                    node_pushes.push((pred.node, amount));
                    self.support[pred.node as usize] += pred.weight * p.strength;
                    let idx = pred.node as usize;
                    if p.dynamic_importance > self.importance[idx] {
                        self.importance[idx] = p.dynamic_importance;
                    }
                    if matches_tail {
                        self.tail_support[idx] += pred.weight * p.strength;
                    }
                }

                for edge in p.outgoing.iter_active() {
                    let amount = p.activation * edge.weight * meaning;
                    let meaning_candidate = p.accumulated_meaning * edge.weight * p.strength;
                    chain_transfers.push((edge.to as PatternId, amount, meaning_candidate));
                }
            }

            for (node, amount) in node_pushes {
                graph.node_mut(node).receive(amount, config.activation_ceiling);
            }
        }

        for (target, amount, meaning_candidate) in chain_transfers {
            if let Some(q) = registry.get_mut(target) {
                q.activation = (q.activation + amount).min(config.activation_ceiling);
                q.absorb_meaning(meaning_candidate);
            }
        }
    }

    // ==================== PASS B: EDGE FLOW ====================

    fn pass_b(
        &mut self,
        graph: &mut ByteGraph,
        input: &[u8],
        output: &[u8],
        config: &CoreConfig,
        report: &mut StepReport,
    ) {
        let mut input_member = [false; NODE_COUNT];
        for &b in input {
            input_member[b as usize] = true;
        }
        let input_bigrams: HashSet<u16> = input
            .windows(2)
            .map(|w| (w[0] as u16) << 8 | w[1] as u16)
            .collect();

        let tail_start = output.len().saturating_sub(config.recent_window);
        let mut recent_member = [false; NODE_COUNT];
        for &b in &output[tail_start..] {
            recent_member[b as usize] = true;
        }
        let last_output = output.last().copied();

        let mut transfers: Vec<(u8, f32)> = Vec::new();
        let mut drains: Vec<(u8, f32)> = Vec::new();

        for s in 0..NODE_COUNT {
            let src = s as u8;
            let node = graph.node(src);
            if node.activation <= EPSILON {
                continue;
            }
            let list = graph.outgoing(src);
            if list.active_len() == 0 {
                continue;
            }

            let mut qualities: Vec<(u8, f32)> = Vec::with_capacity(list.active_len());
            for edge in list.iter_active() {
                let t = edge.to as usize;
                let tb = edge.to as u8;

                // Information: how tied this hop is to the current
                // episode. Neutral defaults keep the product alive.
                let input_connection = if input_member[t] {
                    1.0
                } else if input_member[s] {
                    0.8
                } else {
                    0.5
                };
                let context_match = if last_output == Some(src) { 1.0 } else { 0.6 };
                let history_coherence = if recent_member[s] { 0.9 } else { 0.6 };
                let information = input_connection * context_match * history_coherence;

                // Learning: what the edge itself has earned.
                let learning = edge.weight
                    * (1.0 + (1.0 + edge.use_count as f32).ln() / 10.0)
                    * (0.5 + edge.success_rate());

                // Coherence: agreement with pattern structure and the
                // sequential shape of the input.
                let pattern_alignment = if self.support[t] > EPSILON { 1.2 } else { 0.6 };
                let sequential_flow =
                    if input_bigrams.contains(&((src as u16) << 8 | tb as u16)) {
                        1.0
                    } else {
                        0.6
                    };
                let context_fit = if input_member[t] || recent_member[t] { 0.9 } else { 0.6 };
                let coherence = pattern_alignment * sequential_flow * context_fit;

                // Predictive: how strongly the pattern layer expects
                // the target next.
                let pattern_prediction = 0.5 + self.support[t].min(1.0);
                let historical_accuracy = edge.success_rate();
                let context_prediction = 0.5 + self.tail_support[t].min(0.5);
                let predictive =
                    pattern_prediction * (0.5 + historical_accuracy) * context_prediction;

                let mut quality = information * learning * coherence * predictive;
                // Path importance: hops into nodes backed by proven
                // patterns carry extra quality.
                quality *= 1.0 + 0.1 * self.importance[t].min(5.0);
                // Pattern-connection boost: edges into pattern-backed
                // nodes outrank ambient hops.
                if self.support[t] > EPSILON {
                    quality *= 1.0 + self.support[t].min(1.0);
                }
                qualities.push((tb, quality));
            }

            let sum: f32 = qualities.iter().map(|(_, q)| q).sum();
            if sum < EPSILON {
                continue;
            }
            let denominator = sum.max(EPSILON);

            let activation = node.activation;
            let energy = node.energy_factor();
            let mut total_out = 0.0;
            for (target, quality) in qualities {
                let amount = (activation * (quality / denominator) * energy)
                    .min(config.transfer_cap);
                if amount > EPSILON {
                    transfers.push((target, amount));
                    total_out += amount;
                    report.node_transfers += 1;
                }
            }
            if total_out > 0.0 {
                // Firing drains the energy budget proportionally to
                // how much of the ceiling moved.
                drains.push((src, 0.05 * (total_out / config.activation_ceiling).min(1.0)));
                report.transferred += total_out;
            }
        }

        for (target, amount) in transfers {
            graph.node_mut(target).receive(amount, config.activation_ceiling);
        }
        for (src, fraction) in drains {
            graph.node_mut(src).drain(fraction);
        }
    }

    // ==================== PASS C: DECAY ====================

    fn pass_c(
        &mut self,
        graph: &mut ByteGraph,
        registry: &mut PatternRegistry,
        emergent: &EmergentState,
        config: &CoreConfig,
    ) {
        let avg_activation = emergent.avg_activation;
        for (i, node) in graph.nodes_mut().iter_mut().enumerate() {
            if node.is_active() {
                // Coherent paths survive longer than ambient noise.
                let retention = if self.support[i] > EPSILON {
                    config.coherent_decay
                } else {
                    config.node_decay
                };
                node.decay(retention);
            } else if node.exists {
                node.recover();
            }
            if node.exists {
                node.adapt_threshold(avg_activation);
            }
        }

        let avg_pattern_activation = registry.census().avg_activation();
        for p in registry.live_mut() {
            p.decay(config.pattern_decay);
            p.has_fired = false;
            p.adapt_threshold(avg_pattern_activation);
        }
    }

    /// Pattern prediction support for a node, as built by the most
    /// recent pass A.
    pub fn support_for(&self, node: u8) -> f32 {
        self.support[node as usize]
    }
}

impl Default for WavePropagator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::slots_from_bytes;

    fn setup() -> (ByteGraph, PatternRegistry, EmergentState, CoreConfig, WavePropagator) {
        (
            ByteGraph::new(),
            PatternRegistry::new(),
            EmergentState::new(),
            CoreConfig::default(),
            WavePropagator::new(),
        )
    }

    #[test]
    fn test_pattern_prediction_injects_into_node() {
        let (mut graph, mut registry, emergent, config, mut wave) = setup();
        let id = registry.mint(slots_from_bytes(b"ca"), 0.8).unwrap();
        registry.get_mut(id).unwrap().add_prediction(b't', 1.0);

        graph.inject(b"ca", &config);
        wave.step(&mut graph, &mut registry, b"ca", b"", &emergent, &config);

        assert!(graph.node(b't').activation > 0.0);
        assert!(wave.support_for(b't') > 0.0);
        assert_eq!(wave.support_for(b'z'), 0.0);
    }

    #[test]
    fn test_pattern_fires_once_per_step() {
        let (mut graph, mut registry, emergent, config, mut wave) = setup();
        let id = registry.mint(slots_from_bytes(b"ab"), 0.8).unwrap();

        graph.inject(b"ab", &config);
        let report = wave.step(&mut graph, &mut registry, b"ab", b"", &emergent, &config);
        assert_eq!(report.fired_patterns, 1);

        // Flag is cleared by pass C, so the next step may ignite again.
        assert!(!registry.get(id).unwrap().has_fired);
    }

    #[test]
    fn test_edge_flow_reaches_target() {
        let (mut graph, mut registry, emergent, config, mut wave) = setup();
        graph.edge_between(b'c', b'a').unwrap();
        graph.inject(b"c", &config);

        wave.step(&mut graph, &mut registry, b"c", b"", &emergent, &config);
        assert!(graph.node(b'a').activation > 0.0);
    }

    #[test]
    fn test_unused_edge_still_carries_flow() {
        // Neutral defaults: a freshly created edge (use_count 0) must
        // not zero out the multiplicative path quality.
        let (mut graph, mut registry, emergent, config, mut wave) = setup();
        graph.edge_between(b'q', b'z').unwrap();
        graph.inject(b"q", &config);

        let report = wave.step(&mut graph, &mut registry, b"q", b"", &emergent, &config);
        assert!(report.node_transfers > 0);
        assert!(graph.node(b'z').activation > 0.0);
    }

    #[test]
    fn test_stronger_edge_gets_larger_share() {
        let (mut graph, mut registry, emergent, config, mut wave) = setup();
        graph.edge_between(b'a', b'b').unwrap();
        graph.edge_between(b'a', b'c').unwrap();
        for _ in 0..20 {
            graph.strengthen(b'a', b'b', 0.5, true).unwrap();
        }

        graph.inject(b"a", &config);
        wave.step(&mut graph, &mut registry, b"a", b"", &emergent, &config);

        assert!(graph.node(b'b').activation > graph.node(b'c').activation);
    }

    #[test]
    fn test_transfer_cap_and_ceiling_hold() {
        let (mut graph, mut registry, emergent, config, mut wave) = setup();
        graph.edge_between(b'a', b'b').unwrap();
        graph.node_mut(b'a').receive(config.activation_ceiling, config.activation_ceiling);

        for _ in 0..50 {
            wave.step(&mut graph, &mut registry, b"a", b"", &emergent, &config);
        }
        for node in graph.nodes() {
            assert!(node.activation >= 0.0);
            assert!(node.activation <= config.activation_ceiling);
        }
    }

    #[test]
    fn test_decay_and_energy_recovery() {
        let (mut graph, mut registry, emergent, config, mut wave) = setup();
        graph.inject(b"a", &config);
        let initial = graph.node(b'a').activation;

        // No outgoing edges: activation only decays.
        wave.step(&mut graph, &mut registry, b"a", b"", &emergent, &config);
        let after = graph.node(b'a').activation;
        assert!(after < initial);
        assert!((after - initial * config.node_decay).abs() < 1e-4);

        graph.node_mut(b'a').drain(0.9);
        graph.node_mut(b'a').decay(0.0); // force idle
        for _ in 0..30 {
            wave.step(&mut graph, &mut registry, b"a", b"", &emergent, &config);
        }
        assert!(graph.node(b'a').energy > 0.9);
    }

    #[test]
    fn test_chain_transfer_and_monotone_meaning() {
        let (mut graph, mut registry, emergent, config, mut wave) = setup();
        let a = registry.mint(slots_from_bytes(b"ca"), 0.9).unwrap();
        let b = registry.mint(slots_from_bytes(b"at"), 0.9).unwrap();

        {
            let p = registry.get_mut(a).unwrap();
            p.accumulated_meaning = 4.0;
            p.outgoing.get_or_create(a, b).unwrap();
        }

        graph.inject(b"ca", &config);
        wave.step(&mut graph, &mut registry, b"ca", b"", &emergent, &config);

        let downstream = registry.get(b).unwrap();
        assert!(downstream.activation > 0.0);
        let gained = downstream.accumulated_meaning;
        assert!(gained > 0.0);

        // Meaning never shrinks, even when the upstream source fades.
        registry.get_mut(a).unwrap().accumulated_meaning = 0.0;
        wave.step(&mut graph, &mut registry, b"ca", b"", &emergent, &config);
        assert!(registry.get(b).unwrap().accumulated_meaning >= gained);
    }

    #[test]
    fn test_coherent_paths_decay_slower() {
        let (mut graph, mut registry, emergent, config, mut wave) = setup();
        let id = registry.mint(slots_from_bytes(b"qq"), 0.9).unwrap();
        registry.get_mut(id).unwrap().add_prediction(b'p', 1.0);

        graph.node_mut(b'p').receive(10.0, config.activation_ceiling);
        graph.node_mut(b'u').receive(10.0, config.activation_ceiling);

        // 'p' is pattern-supported (prediction target), 'u' is ambient.
        graph.inject(b"qq", &config);
        wave.step(&mut graph, &mut registry, b"qq", b"", &emergent, &config);

        assert!(graph.node(b'p').activation > graph.node(b'u').activation);
    }
}
