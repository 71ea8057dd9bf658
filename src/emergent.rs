// ByteMind OS - Emergent State v0.6.0
//
// Process-wide averages and pressures, recomputed from the census at
// every propagation step and episode boundary. Nothing in here is a
// tunable: every quantity is a ratio over current system state, and
// the pressures constrain each other into equilibrium.

use crate::graph::GraphCensus;
use crate::registry::PatternCensus;
use serde::{Deserialize, Serialize};

/// Emergent quantities derived from the census.
#[derive(Debug, Clone)]
pub struct EmergentState {
    pub avg_activation: f32,
    pub avg_edge_weight: f32,
    pub avg_pattern_strength: f32,

    /// Exponential moving average of per-episode mismatch.
    pub error_rate: f32,

    /// `total_edges / (256 * 10)`.
    pub edge_density: f32,
    /// `pattern_count / 100`.
    pub pattern_density: f32,

    /// Average pattern utility.
    pub pattern_confidence: f32,

    pub output_variance: f32,
    pub loop_pressure: f32,
    pub exploration_pressure: f32,

    /// Monotonically increasing episode/step counter.
    pub step: u64,
}

impl EmergentState {
    pub fn new() -> Self {
        Self {
            avg_activation: 0.0,
            avg_edge_weight: 0.0,
            avg_pattern_strength: 0.0,
            // A fresh brain knows nothing; the error EMA starts from
            // the worst case and learning pressure follows.
            error_rate: 1.0,
            edge_density: 0.0,
            pattern_density: 0.0,
            pattern_confidence: 0.0,
            output_variance: 0.0,
            loop_pressure: 0.0,
            exploration_pressure: 0.0,
            step: 0,
        }
    }

    // ==================== DERIVED PRESSURES ====================

    /// `0.01 + 0.2 * error_rate`.
    pub fn learning_rate(&self) -> f32 {
        0.01 + 0.2 * self.error_rate
    }

    /// `error_rate^2`.
    pub fn learning_pressure(&self) -> f32 {
        self.error_rate * self.error_rate
    }

    /// Composite density of edges and patterns; drives pruning.
    pub fn metabolic_pressure(&self) -> f32 {
        (self.edge_density + self.pattern_density) / 2.0
    }

    // ==================== RECOMPUTE ====================

    /// Rederive all averages and pressures from the census and the
    /// recent output tail.
    pub fn recompute(
        &mut self,
        graph: &GraphCensus,
        patterns: &PatternCensus,
        output: &[u8],
        window: usize,
    ) {
        self.avg_activation = graph.avg_activation();
        self.avg_edge_weight = graph.avg_edge_weight();
        self.avg_pattern_strength = patterns.avg_strength();
        self.pattern_confidence = patterns.avg_utility();

        self.edge_density = graph.active_edges as f32 / (256.0 * 10.0);
        self.pattern_density = patterns.live as f32 / 100.0;

        let tail_start = output.len().saturating_sub(window);
        let tail = &output[tail_start..];
        self.output_variance = output_variance(tail);
        self.loop_pressure = loop_pressure(tail);
        self.exploration_pressure = self.output_variance * self.error_rate;
    }

    /// Fold one episode's mismatch into the error EMA.
    pub fn record_mismatch(&mut self, mismatch: f32) {
        self.error_rate = 0.9 * self.error_rate + 0.1 * mismatch.clamp(0.0, 1.0);
    }

    pub fn advance_step(&mut self) {
        self.step += 1;
    }

    pub fn snapshot(&self) -> EmergentSnapshot {
        EmergentSnapshot {
            avg_activation: self.avg_activation,
            avg_edge_weight: self.avg_edge_weight,
            avg_pattern_strength: self.avg_pattern_strength,
            error_rate: self.error_rate,
            learning_rate: self.learning_rate(),
            learning_pressure: self.learning_pressure(),
            edge_density: self.edge_density,
            pattern_density: self.pattern_density,
            metabolic_pressure: self.metabolic_pressure(),
            pattern_confidence: self.pattern_confidence,
            output_variance: self.output_variance,
            loop_pressure: self.loop_pressure,
            exploration_pressure: self.exploration_pressure,
            step: self.step,
        }
    }
}

impl Default for EmergentState {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable copy of the emergent state for hosts and tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergentSnapshot {
    pub avg_activation: f32,
    pub avg_edge_weight: f32,
    pub avg_pattern_strength: f32,
    pub error_rate: f32,
    pub learning_rate: f32,
    pub learning_pressure: f32,
    pub edge_density: f32,
    pub pattern_density: f32,
    pub metabolic_pressure: f32,
    pub pattern_confidence: f32,
    pub output_variance: f32,
    pub loop_pressure: f32,
    pub exploration_pressure: f32,
    pub step: u64,
}

/// Distinct-byte ratio over the recent output tail.
pub fn output_variance(tail: &[u8]) -> f32 {
    if tail.is_empty() {
        return 0.0;
    }
    let mut seen = [false; 256];
    let mut unique = 0usize;
    for &b in tail {
        if !seen[b as usize] {
            seen[b as usize] = true;
            unique += 1;
        }
    }
    unique as f32 / tail.len() as f32
}

/// Detect repeating suffixes of period 2..=4. The pressure is the
/// fraction of the tail covered by repetitions beyond the first
/// occurrence of the repeating block.
pub fn loop_pressure(tail: &[u8]) -> f32 {
    let n = tail.len();
    let mut pressure: f32 = 0.0;
    for period in 2..=4usize {
        if n < 2 * period {
            continue;
        }
        let block = &tail[n - period..];
        let mut repeats = 1usize;
        let mut pos = n - period;
        while pos >= period && &tail[pos - period..pos] == block {
            repeats += 1;
            pos -= period;
        }
        if repeats > 1 {
            let covered = (repeats - 1) * period;
            pressure = pressure.max(covered as f32 / n as f32);
        }
    }
    pressure.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state_has_full_error() {
        let state = EmergentState::new();
        assert_eq!(state.error_rate, 1.0);
        assert!((state.learning_rate() - 0.21).abs() < 1e-6);
        assert_eq!(state.learning_pressure(), 1.0);
    }

    #[test]
    fn test_error_ema_converges() {
        let mut state = EmergentState::new();
        for _ in 0..100 {
            state.record_mismatch(0.0);
        }
        assert!(state.error_rate < 0.01);
        assert!(state.learning_rate() < 0.015);
    }

    #[test]
    fn test_loop_pressure_detects_period_two() {
        let tail = [b'x', b'y', b'x', b'y', b'x', b'y'];
        assert!(loop_pressure(&tail) > 0.5);
    }

    #[test]
    fn test_loop_pressure_detects_period_three() {
        let tail = b"abcabcabc";
        assert!(loop_pressure(tail) > 0.5);
    }

    #[test]
    fn test_no_loop_pressure_on_varied_output() {
        assert_eq!(loop_pressure(b"abcdefgh"), 0.0);
        assert_eq!(loop_pressure(b""), 0.0);
        assert_eq!(loop_pressure(b"ab"), 0.0);
    }

    #[test]
    fn test_output_variance() {
        assert_eq!(output_variance(b""), 0.0);
        assert_eq!(output_variance(b"aaaa"), 0.25);
        assert_eq!(output_variance(b"abcd"), 1.0);
    }

    #[test]
    fn test_metabolic_pressure_from_densities() {
        let mut state = EmergentState::new();
        state.edge_density = 0.4;
        state.pattern_density = 0.8;
        assert!((state.metabolic_pressure() - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_recompute_uses_tail_window() {
        let mut state = EmergentState::new();
        let graph = GraphCensus::default();
        let patterns = PatternCensus::default();

        // Loop lives only in the last six bytes.
        let mut output = b"abcdefgh".to_vec();
        output.extend_from_slice(b"xyxyxy");
        state.recompute(&graph, &patterns, &output, 6);
        assert!(state.loop_pressure > 0.5);

        state.recompute(&graph, &patterns, b"abcdefgh", 20);
        assert_eq!(state.loop_pressure, 0.0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let state = EmergentState::new();
        let json = serde_json::to_string(&state.snapshot()).unwrap();
        assert!(json.contains("error_rate"));
        assert!(json.contains("metabolic_pressure"));
    }
}
