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

//! Patterns - recurring byte subsequences with prediction state.
//!
//! A pattern is an ordered sequence of slots, each a concrete byte or
//! a blank wildcard. A pattern with at least one blank is
//! *generalized*. Strength is driven directly by prediction utility
//! (successes / attempts) once the pattern has enough attempts to make
//! utility informative; before that a neutral prior holds.
//!
//! Patterns carry their own pattern→pattern `EdgeList` (chains), a
//! predicted-node distribution, and hierarchy links (parent, chain
//! depth, accumulated meaning).

use crate::config::EPSILON;
use crate::edge::EdgeList;
use smallvec::SmallVec;

/// Pattern identifier: dense index into the registry backing array.
pub type PatternId = u32;

/// Attempts below which utility is uninformative and a neutral prior
/// drives strength instead.
pub const UTILITY_MIN_ATTEMPTS: u64 = 10;

/// One position of a pattern sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Slot {
    Byte(u8),
    /// Wildcard: matches any byte.
    Blank,
}

impl Slot {
    pub fn matches(&self, byte: u8) -> bool {
        match self {
            Slot::Byte(b) => *b == byte,
            Slot::Blank => true,
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Slot::Blank)
    }

    pub fn byte(&self) -> Option<u8> {
        match self {
            Slot::Byte(b) => Some(*b),
            Slot::Blank => None,
        }
    }
}

/// One entry of a pattern's predicted-node distribution.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub node: u8,
    /// Proportion within the pattern's prediction list.
    pub weight: f32,
}

/// A stored subsequence with prediction and hierarchy state.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub id: PatternId,
    pub slots: SmallVec<[Slot; 8]>,

    /// Utility-driven strength; 0 marks a dead pattern.
    pub strength: f32,

    // Transient per step.
    pub activation: f32,
    pub threshold: f32,
    pub has_fired: bool,

    // Lifetime counters.
    pub prediction_attempts: u64,
    pub prediction_successes: u64,

    /// Which byte to emit after the pattern matches.
    pub predictions: Vec<Prediction>,

    /// Pattern chains: edges into other patterns.
    pub outgoing: EdgeList,

    // Hierarchy.
    pub parent: Option<PatternId>,
    pub chain_depth: u32,
    /// Monotone-nondecreasing semantic weight; only grows.
    pub accumulated_meaning: f32,

    /// Derived from usage, success, depth, and co-occurrence.
    pub dynamic_importance: f32,

    pub alive: bool,
}

impl Pattern {
    pub fn new(id: PatternId, slots: SmallVec<[Slot; 8]>, strength: f32) -> Self {
        debug_assert!(slots.len() >= 2, "patterns are at least two slots long");
        Self {
            id,
            slots,
            strength,
            activation: 0.0,
            threshold: 0.0,
            has_fired: false,
            prediction_attempts: 0,
            prediction_successes: 0,
            predictions: Vec::new(),
            outgoing: EdgeList::new(),
            parent: None,
            chain_depth: 0,
            accumulated_meaning: 0.0,
            dynamic_importance: 1.0,
            alive: true,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn blank_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_blank()).count()
    }

    pub fn is_generalized(&self) -> bool {
        self.blank_count() > 0
    }

    // ==================== MATCHING ====================

    /// Exact match test at one buffer position: every concrete slot
    /// must equal the buffer byte; blanks match anything.
    pub fn matches_at(&self, buf: &[u8], pos: usize) -> bool {
        if pos + self.len() > buf.len() {
            return false;
        }
        self.slots
            .iter()
            .zip(&buf[pos..pos + self.len()])
            .all(|(slot, &b)| slot.matches(b))
    }

    /// Match score at a position: 1.0 for a fully concrete match,
    /// discounted slightly per blank so generalized matches never
    /// outrank the concrete pattern they came from.
    pub fn match_score(&self, buf: &[u8], pos: usize) -> Option<f32> {
        if !self.matches_at(buf, pos) {
            return None;
        }
        Some(1.0 - 0.1 * self.blank_count() as f32 / self.len() as f32)
    }

    /// Best match score over a whole buffer.
    pub fn best_match(&self, buf: &[u8]) -> Option<(usize, f32)> {
        if buf.len() < self.len() {
            return None;
        }
        (0..=buf.len() - self.len())
            .find_map(|pos| self.match_score(buf, pos).map(|s| (pos, s)))
    }

    /// All positions where the pattern matches.
    pub fn match_positions(&self, buf: &[u8]) -> Vec<usize> {
        if buf.len() < self.len() {
            return Vec::new();
        }
        (0..=buf.len() - self.len())
            .filter(|&pos| self.matches_at(buf, pos))
            .collect()
    }

    /// Whether the pattern matches ending exactly at the end of `buf`.
    pub fn matches_tail(&self, buf: &[u8]) -> bool {
        buf.len() >= self.len() && self.matches_at(buf, buf.len() - self.len())
    }

    /// The concrete byte sequence with every blank filled by `b`.
    /// Returns `None` for a fully concrete pattern (nothing to fill).
    pub fn filled_with(&self, b: u8) -> Option<SmallVec<[u8; 8]>> {
        if !self.is_generalized() {
            return None;
        }
        Some(
            self.slots
                .iter()
                .map(|slot| slot.byte().unwrap_or(b))
                .collect(),
        )
    }

    /// Concrete byte sequence of a non-generalized pattern.
    pub fn concrete_bytes(&self) -> Option<SmallVec<[u8; 8]>> {
        self.slots.iter().map(|s| s.byte()).collect()
    }

    // ==================== UTILITY ====================

    pub fn success_rate(&self) -> f32 {
        if self.prediction_attempts == 0 {
            0.0
        } else {
            self.prediction_successes as f32 / self.prediction_attempts as f32
        }
    }

    pub fn record_attempt(&mut self, success: bool) {
        self.prediction_attempts += 1;
        if success {
            self.prediction_successes += 1;
        }
        debug_assert!(self.prediction_successes <= self.prediction_attempts);
    }

    /// Utility with the neutral prior for young patterns.
    pub fn utility(&self) -> f32 {
        if self.prediction_attempts > UTILITY_MIN_ATTEMPTS {
            self.success_rate()
        } else {
            0.5
        }
    }

    /// The utility law: once attempts make utility informative,
    /// strength tracks it directly, halved below 0.4. Young patterns
    /// with at least one attempt sit at the neutral prior; untested
    /// patterns keep their minted strength.
    pub fn refresh_strength(&mut self) {
        if !self.alive {
            return;
        }
        if self.prediction_attempts > UTILITY_MIN_ATTEMPTS {
            let utility = self.success_rate();
            self.strength = utility;
            if utility < 0.4 {
                self.strength *= 0.5;
            }
        } else if self.prediction_attempts > 0 {
            self.strength = 0.5;
        }
    }

    // ==================== PREDICTIONS ====================

    pub fn prediction_weight(&self, node: u8) -> f32 {
        self.predictions
            .iter()
            .find(|p| p.node == node)
            .map_or(0.0, |p| p.weight)
    }

    pub fn predicts(&self, node: u8) -> bool {
        self.predictions.iter().any(|p| p.node == node)
    }

    /// Add weight to a predicted node (creating the entry if needed)
    /// and renormalize the distribution.
    pub fn add_prediction(&mut self, node: u8, weight: f32) {
        match self.predictions.iter_mut().find(|p| p.node == node) {
            Some(p) => p.weight += weight,
            None => self.predictions.push(Prediction { node, weight }),
        }
        self.renormalize_predictions();
    }

    /// Multiply a prediction's weight, flooring so recovery remains
    /// possible, and renormalize.
    pub fn scale_prediction(&mut self, node: u8, factor: f32) {
        if let Some(p) = self.predictions.iter_mut().find(|p| p.node == node) {
            p.weight = (p.weight * factor).max(1e-3);
            self.renormalize_predictions();
        }
    }

    fn renormalize_predictions(&mut self) {
        let sum: f32 = self.predictions.iter().map(|p| p.weight).sum();
        if sum < EPSILON {
            return;
        }
        for p in &mut self.predictions {
            p.weight /= sum;
        }
        debug_assert!(
            (self.predictions.iter().map(|p| p.weight).sum::<f32>() - 1.0).abs() < 1e-4
        );
    }

    // ==================== HIERARCHY ====================

    /// Boost from accumulated meaning, capped.
    pub fn meaning_boost(&self, cap: f32) -> f32 {
        (1.0 + self.accumulated_meaning * 0.5).min(cap)
    }

    /// Shallow patterns get the larger boost; depth dilutes it.
    pub fn hierarchy_boost(&self) -> f32 {
        1.0 + 1.0 / (1.0 + self.chain_depth as f32 * 0.2)
    }

    /// Meaning only grows.
    pub fn absorb_meaning(&mut self, candidate: f32) {
        if candidate > self.accumulated_meaning {
            self.accumulated_meaning = candidate;
        }
    }

    /// Importance from usage, success, depth, and co-occurrence
    /// (active pattern chains).
    pub fn recompute_importance(&mut self) {
        let usage = 1.0 + (1.0 + self.prediction_attempts as f32).ln() / 10.0;
        let success = 0.3 + self.success_rate();
        let chains = 1.0 + 0.1 * self.outgoing.active_len() as f32;
        self.dynamic_importance = usage * success * self.hierarchy_boost() * chains;
    }

    // ==================== LIFECYCLE ====================

    pub fn mark_dead(&mut self) {
        self.alive = false;
        self.strength = 0.0;
        self.activation = 0.0;
        self.has_fired = false;
    }

    pub fn decay(&mut self, retention: f32) {
        self.activation *= retention;
        if self.activation < EPSILON {
            self.activation = 0.0;
        }
    }

    pub fn reset_transient(&mut self) {
        self.activation = 0.0;
        self.has_fired = false;
    }

    /// Pull the firing threshold toward the running average pattern
    /// activation.
    pub fn adapt_threshold(&mut self, avg_activation: f32) {
        self.threshold = 0.9 * self.threshold + 0.1 * avg_activation * 0.5;
    }
}

/// Build a slot sequence from concrete bytes.
pub fn slots_from_bytes(bytes: &[u8]) -> SmallVec<[Slot; 8]> {
    bytes.iter().map(|&b| Slot::Byte(b)).collect()
}
