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

//! Prometheus mirror of the emergent state.
//!
//! The core has no tunables worth exporting; what an operator watches
//! is the self-regulation itself. [`record_episode`] publishes the
//! latest [`EmergentSnapshot`] — the error EMA, the derived learning
//! rate, and every pressure and density — as one gauge per field,
//! refreshed at each episode boundary. Lifetime counters (minting,
//! pruning, persistence) accumulate from the module performing the
//! work, and the two latency histograms time the only operations a
//! host ever blocks on.
//!
//! An embedding server serves [`export_metrics`] on its `/metrics`
//! endpoint without touching core types.
//!
//! # Usage
//!
//! ```rust
//! use bytemind_core::{metrics, EmergentState};
//!
//! metrics::record_episode(&EmergentState::new().snapshot());
//! let text = metrics::export_metrics().unwrap();
//! assert!(text.contains("bytemind_error_rate"));
//! ```

use crate::emergent::EmergentSnapshot;
use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_gauge, Gauge,
    Histogram, IntCounter, IntGauge, TextEncoder,
};

lazy_static! {
    // Lifetime counters, incremented at the site of the event.

    /// Episodes run, supervised and inference alike.
    pub static ref EPISODES_TOTAL: IntCounter = register_int_counter!(
        "bytemind_episodes_total",
        "Total number of episodes run"
    )
    .unwrap();

    /// Patterns minted by the detector (including generalizations).
    pub static ref PATTERNS_MINTED: IntCounter = register_int_counter!(
        "bytemind_patterns_minted_total",
        "Total number of patterns minted"
    )
    .unwrap();

    /// Patterns dropped by emergent pruning.
    pub static ref PATTERNS_PRUNED: IntCounter = register_int_counter!(
        "bytemind_patterns_pruned_total",
        "Total number of patterns pruned"
    )
    .unwrap();

    /// Byte edges created (feedback correctives included).
    pub static ref EDGES_CREATED: IntCounter = register_int_counter!(
        "bytemind_edges_created_total",
        "Total number of byte edges created"
    )
    .unwrap();

    /// Byte edges soft-deleted by metabolic pruning.
    pub static ref EDGES_PRUNED: IntCounter = register_int_counter!(
        "bytemind_edges_pruned_total",
        "Total number of byte edges pruned"
    )
    .unwrap();

    /// Brain snapshots written.
    pub static ref BRAIN_SAVES: IntCounter = register_int_counter!(
        "bytemind_brain_saves_total",
        "Total number of brain snapshots saved"
    )
    .unwrap();

    /// Brain snapshots loaded.
    pub static ref BRAIN_LOADS: IntCounter = register_int_counter!(
        "bytemind_brain_loads_total",
        "Total number of brain snapshots loaded"
    )
    .unwrap();

    /// Full episode latency. Episodes are the only long-running call
    /// a host makes; brain saves are the only blocking file I/O.
    pub static ref EPISODE_DURATION: Histogram = register_histogram!(
        "bytemind_episode_duration_seconds",
        "Time taken to run one episode",
        vec![0.0001, 0.001, 0.01, 0.1, 1.0, 10.0]
    )
    .unwrap();

    pub static ref BRAIN_SAVE_DURATION: Histogram = register_histogram!(
        "bytemind_brain_save_duration_seconds",
        "Time taken to save a brain snapshot",
        vec![0.0001, 0.001, 0.01, 0.1, 1.0]
    )
    .unwrap();

    static ref EMERGENT: EmergentGauges = EmergentGauges::register();
}

/// One gauge per [`EmergentSnapshot`] field. Registered once, written
/// as a unit so a scrape never mixes two episodes.
struct EmergentGauges {
    error_rate: Gauge,
    learning_rate: Gauge,
    learning_pressure: Gauge,
    metabolic_pressure: Gauge,
    edge_density: Gauge,
    pattern_density: Gauge,
    pattern_confidence: Gauge,
    output_variance: Gauge,
    loop_pressure: Gauge,
    exploration_pressure: Gauge,
    avg_activation: Gauge,
    avg_edge_weight: Gauge,
    avg_pattern_strength: Gauge,
    step: IntGauge,
}

impl EmergentGauges {
    fn register() -> Self {
        Self {
            error_rate: register_gauge!(
                "bytemind_error_rate",
                "Exponential moving average of per-episode mismatch"
            )
            .unwrap(),
            learning_rate: register_gauge!(
                "bytemind_learning_rate",
                "Derived learning rate (0.01 + 0.2 * error_rate)"
            )
            .unwrap(),
            learning_pressure: register_gauge!(
                "bytemind_learning_pressure",
                "Squared error rate"
            )
            .unwrap(),
            metabolic_pressure: register_gauge!(
                "bytemind_metabolic_pressure",
                "Composite edge/pattern density driving pruning"
            )
            .unwrap(),
            edge_density: register_gauge!(
                "bytemind_edge_density",
                "Active byte edges over the 10-per-node norm"
            )
            .unwrap(),
            pattern_density: register_gauge!(
                "bytemind_pattern_density",
                "Live patterns over the 100-pattern norm"
            )
            .unwrap(),
            pattern_confidence: register_gauge!(
                "bytemind_pattern_confidence",
                "Average pattern utility"
            )
            .unwrap(),
            output_variance: register_gauge!(
                "bytemind_output_variance",
                "Distinct-byte ratio over the recent output tail"
            )
            .unwrap(),
            loop_pressure: register_gauge!(
                "bytemind_loop_pressure",
                "Repeating-suffix coverage of the recent output tail"
            )
            .unwrap(),
            exploration_pressure: register_gauge!(
                "bytemind_exploration_pressure",
                "Output variance weighted by the error rate"
            )
            .unwrap(),
            avg_activation: register_gauge!(
                "bytemind_avg_activation",
                "Mean activation over existing nodes"
            )
            .unwrap(),
            avg_edge_weight: register_gauge!(
                "bytemind_avg_edge_weight",
                "Mean weight over active byte edges"
            )
            .unwrap(),
            avg_pattern_strength: register_gauge!(
                "bytemind_avg_pattern_strength",
                "Mean strength over live patterns"
            )
            .unwrap(),
            step: register_int_gauge!(
                "bytemind_step",
                "Monotonic episode/step counter"
            )
            .unwrap(),
        }
    }

    fn publish(&self, s: &EmergentSnapshot) {
        self.error_rate.set(s.error_rate as f64);
        self.learning_rate.set(s.learning_rate as f64);
        self.learning_pressure.set(s.learning_pressure as f64);
        self.metabolic_pressure.set(s.metabolic_pressure as f64);
        self.edge_density.set(s.edge_density as f64);
        self.pattern_density.set(s.pattern_density as f64);
        self.pattern_confidence.set(s.pattern_confidence as f64);
        self.output_variance.set(s.output_variance as f64);
        self.loop_pressure.set(s.loop_pressure as f64);
        self.exploration_pressure.set(s.exploration_pressure as f64);
        self.avg_activation.set(s.avg_activation as f64);
        self.avg_edge_weight.set(s.avg_edge_weight as f64);
        self.avg_pattern_strength.set(s.avg_pattern_strength as f64);
        self.step.set(s.step as i64);
    }
}

/// Publish the episode-boundary snapshot to the emergent gauges.
pub fn record_episode(snapshot: &EmergentSnapshot) {
    EMERGENT.publish(snapshot);
}

/// Render everything registered so far in Prometheus text format.
pub fn export_metrics() -> Result<String, String> {
    TextEncoder::new()
        .encode_to_string(&prometheus::gather())
        .map_err(|e| format!("metrics encoding failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emergent::EmergentState;

    fn snapshot_with_error(error_rate: f32) -> EmergentSnapshot {
        let mut state = EmergentState::new();
        state.error_rate = error_rate;
        state.edge_density = 0.3;
        state.pattern_density = 0.5;
        state.step = 12;
        state.snapshot()
    }

    #[test]
    fn test_record_episode_mirrors_every_field() {
        record_episode(&snapshot_with_error(0.5));

        assert!((EMERGENT.error_rate.get() - 0.5).abs() < 1e-6);
        // Derived quantities come through the snapshot, not recomputed
        // here: 0.01 + 0.2 * 0.5 and (0.3 + 0.5) / 2.
        assert!((EMERGENT.learning_rate.get() - 0.11).abs() < 1e-6);
        assert!((EMERGENT.metabolic_pressure.get() - 0.4).abs() < 1e-6);
        assert_eq!(EMERGENT.step.get(), 12);
    }

    #[test]
    fn test_record_episode_overwrites_stale_values() {
        record_episode(&snapshot_with_error(0.9));
        record_episode(&snapshot_with_error(0.1));
        assert!((EMERGENT.error_rate.get() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_lifetime_counters_accumulate() {
        let before = PATTERNS_MINTED.get();
        PATTERNS_MINTED.inc();
        PATTERNS_MINTED.inc();
        assert_eq!(PATTERNS_MINTED.get(), before + 2);
    }

    #[test]
    fn test_export_carries_emergent_and_counter_families() {
        record_episode(&snapshot_with_error(0.25));
        EPISODES_TOTAL.inc();

        let text = export_metrics().unwrap();
        assert!(text.contains("bytemind_error_rate"));
        assert!(text.contains("bytemind_loop_pressure"));
        assert!(text.contains("bytemind_episodes_total"));
        assert!(text.contains("bytemind_episode_duration_seconds"));
    }
}
