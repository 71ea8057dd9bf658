// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024-2025 Chernov Denys

//! Output selection - one byte per propagation step.
//!
//! Candidates are scored by *logical relevance* (pattern support,
//! context fit, sequence coherence, blank-hypothesis generalization),
//! weighted by current activation, then suppressed for loops and
//! recent repetition. If nothing clears the emergent emission
//! threshold the step emits nothing, which may end the output early —
//! a normal condition, not an error.

use crate::config::{CoreConfig, EPSILON, NODE_COUNT};
use crate::emergent::EmergentState;
use crate::graph::ByteGraph;
use crate::registry::PatternRegistry;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Weights of the logical-relevance blend.
const W_PATTERN_SUPPORT: f32 = 0.50;
const W_CONTEXT_FIT: f32 = 0.25;
const W_SEQUENCE_COHERENCE: f32 = 0.15;
const W_GENERALIZATION: f32 = 0.10;

/// Pick the next output byte, or `None` when no candidate clears the
/// emergent threshold.
pub fn select(
    graph: &ByteGraph,
    registry: &PatternRegistry,
    emergent: &EmergentState,
    input: &[u8],
    output: &[u8],
    config: &CoreConfig,
) -> Option<u8> {
    let mut input_member = [false; NODE_COUNT];
    for &b in input {
        input_member[b as usize] = true;
    }
    let last_output = output.last().copied();

    // Pattern support from currently active patterns.
    let mut support = [0.0f32; NODE_COUNT];
    for p in registry.live().filter(|p| p.activation > EPSILON) {
        for pred in &p.predictions {
            support[pred.node as usize] += pred.weight * p.strength;
        }
    }

    // Blank-hypothesis testing: wherever an active generalized
    // pattern matches the context with all its blanks filled by one
    // and the same byte, that byte earns the pattern's strength as a
    // completion hypothesis.
    let mut generalization = [0.0f32; NODE_COUNT];
    for p in registry
        .live()
        .filter(|p| p.is_generalized() && p.activation > EPSILON)
    {
        let mut credited = [false; NODE_COUNT];
        for window in [input, output] {
            for pos in p.match_positions(window) {
                let mut fill: Option<u8> = None;
                let mut consistent = true;
                for (k, slot) in p.slots.iter().enumerate() {
                    if slot.is_blank() {
                        let b = window[pos + k];
                        match fill {
                            None => fill = Some(b),
                            Some(f) if f == b => {}
                            Some(_) => {
                                consistent = false;
                                break;
                            }
                        }
                    }
                }
                if let (true, Some(b)) = (consistent, fill) {
                    if !credited[b as usize] {
                        credited[b as usize] = true;
                        generalization[b as usize] += p.strength;
                    }
                }
            }
        }
    }

    let tail_start = output.len().saturating_sub(config.recent_window);
    let tail = &output[tail_start..];
    let loop_bytes = repeating_tail_bytes(tail);
    let suppress_loops = emergent.loop_pressure > 0.5;

    let mut best: Option<(u8, f32)> = None;
    let mut runner_up: Option<(u8, f32)> = None;

    for n in 0..NODE_COUNT {
        let byte = n as u8;
        let node = graph.node(byte);
        if !node.exists || node.activation <= EPSILON {
            continue;
        }

        let context_fit = {
            let mut fit = 0.0;
            if input_member[n] {
                fit += 0.6;
            }
            if let Some(last) = last_output {
                if graph.has_edge(last, byte) {
                    fit += 0.4;
                }
            }
            fit
        };

        let sequence_coherence = last_output
            .and_then(|last| graph.edge(last, byte))
            .map_or(0.0, |e| e.success_rate());

        let logical = W_PATTERN_SUPPORT * support[n]
            + W_CONTEXT_FIT * context_fit
            + W_SEQUENCE_COHERENCE * sequence_coherence
            + W_GENERALIZATION * generalization[n];

        let mut score = logical * node.activation;

        if suppress_loops && loop_bytes[n] {
            score *= 0.1;
        }

        // Repetition penalty grows quadratically: an already-emitted
        // byte must earn its way back in against fresh continuations
        // that still carry their full input spark.
        let repeats = tail.iter().filter(|&&b| b == byte).count();
        if repeats > 0 {
            let penalty = 1.0 + repeats as f32;
            score /= penalty * penalty;
        }

        if score > best.map_or(0.0, |(_, s)| s) {
            runner_up = best;
            best = Some((byte, score));
        } else if score > runner_up.map_or(0.0, |(_, s)| s) {
            runner_up = Some((byte, score));
        }
    }

    let threshold = emission_threshold(emergent);
    let (winner, winner_score) = best.filter(|&(_, s)| s > threshold)?;

    // Under high exploration pressure a near-tie is resolved by coin
    // flip (seeded from the step counter, so an episode replays
    // identically).
    if emergent.exploration_pressure > 0.5 {
        if let Some((other, other_score)) = runner_up {
            if other_score > threshold && other_score > winner_score * 0.95 {
                let mut rng = SmallRng::seed_from_u64(emergent.step);
                if rng.gen_bool(0.5) {
                    return Some(other);
                }
            }
        }
    }

    Some(winner)
}

/// The emission threshold is emergent: proportional to the current
/// average activation, never a stored constant.
fn emission_threshold(emergent: &EmergentState) -> f32 {
    emergent.avg_activation * 0.01 + EPSILON
}

/// Bytes belonging to a repeating suffix block (period 2..=4).
fn repeating_tail_bytes(tail: &[u8]) -> [bool; NODE_COUNT] {
    let mut member = [false; NODE_COUNT];
    let n = tail.len();
    for period in 2..=4usize {
        if n < 2 * period {
            continue;
        }
        let block = &tail[n - period..];
        if &tail[n - 2 * period..n - period] == block {
            for &b in block {
                member[b as usize] = true;
            }
        }
    }
    member
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{slots_from_bytes, Slot};
    use smallvec::smallvec;

    fn setup() -> (ByteGraph, PatternRegistry, EmergentState, CoreConfig) {
        (
            ByteGraph::new(),
            PatternRegistry::new(),
            EmergentState::new(),
            CoreConfig::default(),
        )
    }

    #[test]
    fn test_empty_graph_emits_nothing() {
        let (graph, registry, emergent, config) = setup();
        assert_eq!(select(&graph, &registry, &emergent, b"abc", b"", &config), None);
    }

    #[test]
    fn test_pattern_supported_node_wins() {
        let (mut graph, mut registry, emergent, config) = setup();
        let id = registry.mint(slots_from_bytes(b"ca"), 0.9).unwrap();
        {
            let p = registry.get_mut(id).unwrap();
            p.add_prediction(b't', 1.0);
            p.activation = 5.0;
        }

        graph.node_mut(b't').receive(10.0, 100.0);
        graph.node_mut(b'x').receive(10.0, 100.0);

        assert_eq!(
            select(&graph, &registry, &emergent, b"ca", b"", &config),
            Some(b't')
        );
    }

    #[test]
    fn test_loop_suppression_escapes_xyxyxy() {
        let (mut graph, mut registry, mut emergent, config) = setup();

        // Three equally excited candidates; X and Y are caught in a
        // period-2 loop, Z is clean.
        for &b in &[b'x', b'y', b'z'] {
            graph.node_mut(b).receive(10.0, 100.0);
        }
        let id = registry.mint(slots_from_bytes(b"qq"), 0.9).unwrap();
        {
            let p = registry.get_mut(id).unwrap();
            p.activation = 5.0;
            p.add_prediction(b'x', 1.0);
            p.add_prediction(b'y', 1.0);
            p.add_prediction(b'z', 1.0);
        }

        let output = b"xyxyxy";
        emergent.loop_pressure = crate::emergent::loop_pressure(output);
        assert!(emergent.loop_pressure > 0.5);

        let chosen = select(&graph, &registry, &emergent, b"q", output, &config).unwrap();
        assert_ne!(chosen, b'x');
        assert_ne!(chosen, b'y');
    }

    #[test]
    fn test_history_penalty_discourages_repeats() {
        let (mut graph, mut registry, emergent, config) = setup();
        for &b in &[b'a', b'b'] {
            graph.node_mut(b).receive(10.0, 100.0);
        }
        let id = registry.mint(slots_from_bytes(b"qq"), 0.9).unwrap();
        {
            let p = registry.get_mut(id).unwrap();
            p.activation = 5.0;
            p.add_prediction(b'a', 1.0);
            p.add_prediction(b'b', 1.0);
        }

        // 'a' has been emitted repeatedly; 'b' is fresh.
        let chosen = select(&graph, &registry, &emergent, b"q", b"aaaaa", &config).unwrap();
        assert_eq!(chosen, b'b');
    }

    #[test]
    fn test_generalization_score_backs_blank_fill() {
        let (mut graph, mut registry, emergent, config) = setup();
        let id = registry
            .mint(smallvec![Slot::Blank, Slot::Byte(b'a'), Slot::Byte(b't')], 0.9)
            .unwrap();
        registry.get_mut(id).unwrap().activation = 5.0;

        // Filling the blank with 'b' reproduces the input "bat".
        graph.node_mut(b'b').receive(10.0, 100.0);
        graph.node_mut(b'q').receive(10.0, 100.0);

        let chosen = select(&graph, &registry, &emergent, b"bat", b"", &config).unwrap();
        assert_eq!(chosen, b'b');
    }

    #[test]
    fn test_edge_successor_gets_context_fit() {
        let (mut graph, registry, emergent, config) = setup();
        graph.edge_between(b't', b's').unwrap();
        for _ in 0..10 {
            graph.strengthen(b't', b's', 0.5, true).unwrap();
        }
        graph.node_mut(b's').receive(10.0, 100.0);
        graph.node_mut(b'u').receive(10.0, 100.0);

        // Last emitted byte was 't'; 's' follows it via a proven edge.
        let chosen = select(&graph, &registry, &emergent, b"", b"cat", &config).unwrap();
        assert_eq!(chosen, b's');
    }
}
