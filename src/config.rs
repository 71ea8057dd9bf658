// ByteMind OS - Core Configuration v0.5.0
// Copyright (C) 2024-2025 Chernov Denys
//
// The two structural constants of the system (input spark, intelligent
// path boost) plus the decay multipliers and hard caps, parameterized
// once. Everything else the system needs — learning rates, pruning
// limits, emission thresholds — is recomputed each step from the
// census and never lives here.

/// Number of byte nodes. The backing array is permanent; nodes are
/// switched on at first touch and never destroyed.
pub const NODE_COUNT: usize = 256;

/// Floor for normalization denominators and activation comparisons.
pub const EPSILON: f32 = 1e-6;

/// Core configuration.
///
/// # Example
///
/// ```rust
/// use bytemind_core::CoreConfig;
///
/// let config = CoreConfig::default();
/// assert!((config.spark_level() - 20.0).abs() < 1e-6);
/// ```
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Hard per-node activation ceiling. Exists solely to prevent
    /// numeric blowup; regulation happens through decay and
    /// normalization, not through this cap.
    pub activation_ceiling: f32,

    /// Input spark as a fraction of the ceiling. Input is a trigger,
    /// not the answer.
    pub spark_fraction: f32,

    /// Structural advantage of pattern predictions over raw edge flow.
    pub path_boost: f32,

    /// Per-step node activation retention (pass C).
    pub node_decay: f32,

    /// Retention for nodes carrying pattern support.
    pub coherent_decay: f32,

    /// Per-step pattern activation retention (pass C).
    pub pattern_decay: f32,

    /// Cap on a single edge transfer (pass B).
    pub transfer_cap: f32,

    /// Propagation steps per input byte.
    pub steps_per_byte: usize,

    /// Upper bound on propagation steps per episode.
    pub max_steps: usize,

    /// Sanity cap on input/target length in bytes.
    pub input_sanity_cap: usize,

    /// Cap on the meaning boost factor (1 + 0.5 * accumulated_meaning).
    pub meaning_boost_cap: f32,

    /// Recent-output window used for variance, loop pressure, and
    /// history penalties.
    pub recent_window: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            activation_ceiling: 100.0,
            spark_fraction: 0.2,
            path_boost: 3.0,
            node_decay: 0.90,
            coherent_decay: 0.95,
            pattern_decay: 0.70,
            transfer_cap: 10.0,
            steps_per_byte: 3,
            max_steps: 200,
            input_sanity_cap: 1 << 20,
            meaning_boost_cap: 30.0,
            recent_window: 20,
        }
    }
}

impl CoreConfig {
    /// Absolute spark level injected per input byte.
    pub fn spark_level(&self) -> f32 {
        self.activation_ceiling * self.spark_fraction
    }

    /// Propagation step budget for an episode.
    pub fn steps_for(&self, input_len: usize) -> usize {
        (self.steps_per_byte * input_len).clamp(1, self.max_steps)
    }

    /// Soft bound on output length. Grows with the input; there is no
    /// fixed cap.
    pub fn output_bound(&self, input_len: usize) -> usize {
        input_len * 2 + 8
    }
}
