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

//! Weighted directed edges with proportion semantics.
//!
//! An `EdgeList` is owned either by a byte node (byte→byte edges) or by
//! a pattern (pattern→pattern edges). Weights within one list are
//! proportions: after every mutation the list is renormalized so the
//! active weights sum to 1. Deletion is soft (`active = false`,
//! weight zeroed) so use/success history survives until the owner is
//! walked for a census.
//!
//! # Invariants
//!
//! - `|sum(active weights) - 1| < 1e-4` after any mutation (checked by
//!   debug assertion).
//! - `success_count <= use_count` on every edge.
//! - No edge targets its own owner (self-loops refused at creation).

use crate::config::EPSILON;
use smallvec::SmallVec;
use thiserror::Error;

/// Target identifier: a byte value (node lists) or a pattern id
/// (pattern lists). The owner decides which space it indexes.
pub type TargetId = u32;

/// Edge creation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EdgeError {
    #[error("self-loop refused: {0} -> {0}")]
    SelfLoop(TargetId),
}

/// One directed edge.
#[derive(Debug, Clone)]
pub struct Edge {
    pub to: TargetId,
    /// Proportion of the owner's outgoing weight, in [0, 1].
    pub weight: f32,
    pub use_count: u64,
    pub success_count: u64,
    /// Soft-delete flag; pruned edges stay in the list with zero
    /// weight and are skipped everywhere.
    pub active: bool,
}

impl Edge {
    fn new(to: TargetId, weight: f32) -> Self {
        Self {
            to,
            weight,
            use_count: 0,
            success_count: 0,
            active: true,
        }
    }

    /// Fraction of uses that were successful. Neutral 0.5 when the
    /// edge has never been used, so multiplicative scoring never sees
    /// a zero.
    pub fn success_rate(&self) -> f32 {
        if self.use_count == 0 {
            0.5
        } else {
            self.success_count as f32 / self.use_count as f32
        }
    }

    /// Metabolic cost of keeping this edge: unused edges carry full
    /// cost, heavily exercised edges are cheap.
    pub fn metabolic_cost(&self) -> f32 {
        1.0 / (1.0 + (1.0 + self.use_count as f32).ln())
    }
}

/// Ordered set of outgoing edges from one owner.
#[derive(Debug, Clone, Default)]
pub struct EdgeList {
    edges: SmallVec<[Edge; 8]>,
    /// Cached sum of active weights.
    total_weight: f32,
    /// density^2, where density is active edges over the 10-per-owner
    /// norm. Drives metabolic pruning.
    metabolic_load: f32,
}

impl EdgeList {
    pub fn new() -> Self {
        Self {
            edges: SmallVec::new(),
            total_weight: 0.0,
            metabolic_load: 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Number of live edges.
    pub fn active_len(&self) -> usize {
        self.edges.iter().filter(|e| e.active).count()
    }

    pub fn total_weight(&self) -> f32 {
        self.total_weight
    }

    pub fn metabolic_load(&self) -> f32 {
        self.metabolic_load
    }

    pub fn iter(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn iter_active(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(|e| e.active)
    }

    pub fn get(&self, to: TargetId) -> Option<&Edge> {
        self.edges.iter().find(|e| e.to == to && e.active)
    }

    pub fn get_mut(&mut self, to: TargetId) -> Option<&mut Edge> {
        self.edges.iter_mut().find(|e| e.to == to && e.active)
    }

    /// Weight of the edge to `to`, or 0 if absent.
    pub fn weight_of(&self, to: TargetId) -> f32 {
        self.get(to).map_or(0.0, |e| e.weight)
    }

    /// Obtain or create the edge to `to`. A new edge enters at
    /// `1 / (active_count + 1)` and the list is renormalized, so the
    /// newcomer takes a proportional share rather than diluting to
    /// nothing or dominating.
    pub fn get_or_create(&mut self, owner: TargetId, to: TargetId) -> Result<usize, EdgeError> {
        if owner == to {
            return Err(EdgeError::SelfLoop(owner));
        }
        if let Some(idx) = self.edges.iter().position(|e| e.to == to && e.active) {
            return Ok(idx);
        }
        let share = 1.0 / (self.active_len() as f32 + 1.0);
        // The newcomer takes its proportional share; incumbents split
        // the remainder in their existing ratios.
        for edge in self.edges.iter_mut().filter(|e| e.active) {
            edge.weight *= 1.0 - share;
        }
        // Revive a soft-deleted edge to the same target instead of
        // appending a duplicate.
        let idx = if let Some(idx) = self.edges.iter().position(|e| e.to == to) {
            let edge = &mut self.edges[idx];
            edge.active = true;
            edge.weight = share;
            idx
        } else {
            self.edges.push(Edge::new(to, share));
            self.edges.len() - 1
        };
        self.renormalize();
        Ok(idx)
    }

    /// Multiply the weight of the edge to `to` and record an
    /// (un)successful use. The whole list is renormalized afterwards.
    pub fn reinforce(&mut self, to: TargetId, factor: f32, success: bool) {
        if let Some(edge) = self.get_mut(to) {
            // Floor keeps recovery possible even after repeated
            // punishment.
            edge.weight = (edge.weight * factor).max(1e-3);
            edge.use_count += 1;
            if success {
                edge.success_count += 1;
            }
            self.renormalize();
        }
    }

    /// Set an explicit weight before renormalization (used when
    /// minting corrective edges with pressure-scaled weight).
    pub fn set_weight(&mut self, to: TargetId, weight: f32) {
        if let Some(edge) = self.get_mut(to) {
            edge.weight = weight.max(1e-3);
            self.renormalize();
        }
    }

    /// Renormalize active weights to a proportion distribution and
    /// refresh the cached total and metabolic load.
    pub fn renormalize(&mut self) {
        let active: usize = self.active_len();
        if active == 0 {
            self.total_weight = 0.0;
            self.metabolic_load = 0.0;
            return;
        }
        let sum: f32 = self.edges.iter().filter(|e| e.active).map(|e| e.weight).sum();
        if sum < EPSILON {
            // Degenerate list: fall back to the uniform distribution.
            let share = 1.0 / active as f32;
            for edge in self.edges.iter_mut().filter(|e| e.active) {
                edge.weight = share;
            }
        } else {
            for edge in self.edges.iter_mut().filter(|e| e.active) {
                edge.weight /= sum;
            }
        }
        self.total_weight = 1.0;
        let density = active as f32 / 10.0;
        self.metabolic_load = density * density;

        debug_assert!(
            (self
                .edges
                .iter()
                .filter(|e| e.active)
                .map(|e| e.weight)
                .sum::<f32>()
                - 1.0)
                .abs()
                < 1e-4,
            "edge list weights must sum to 1 after mutation"
        );
    }

    /// Metabolic pruning: only engages when the list is dense
    /// (load > 0.5). An edge survives while its value ratio
    /// `weight / (metabolic_cost + eps)` stays above `load * 0.1`.
    /// Returns the number of edges deactivated.
    pub fn prune_metabolic(&mut self) -> usize {
        if self.metabolic_load <= 0.5 {
            return 0;
        }
        let threshold = self.metabolic_load * 0.1;
        let mut pruned = 0;
        for edge in self.edges.iter_mut().filter(|e| e.active) {
            let value = edge.weight / (edge.metabolic_cost() + EPSILON);
            if value < threshold {
                edge.active = false;
                edge.weight = 0.0;
                pruned += 1;
            }
        }
        if pruned > 0 {
            self.renormalize();
        }
        pruned
    }

    /// Drop soft-deleted edges entirely (used on load, where history
    /// for dead edges was not persisted anyway).
    pub fn compact(&mut self) {
        self.edges.retain(|e| e.active);
        self.renormalize();
    }

    /// Install an edge exactly as persisted, without renormalizing.
    /// Saved weights were normalized at save time; re-scaling them
    /// here would defeat byte-identical round trips.
    pub(crate) fn push_raw(&mut self, edge: Edge) {
        self.edges.push(edge);
        self.total_weight = self
            .edges
            .iter()
            .filter(|e| e.active)
            .map(|e| e.weight)
            .sum();
        let density = self.active_len() as f32 / 10.0;
        self.metabolic_load = density * density;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights_sum(list: &EdgeList) -> f32 {
        list.iter_active().map(|e| e.weight).sum()
    }

    #[test]
    fn test_self_loop_refused() {
        let mut list = EdgeList::new();
        assert_eq!(list.get_or_create(7, 7), Err(EdgeError::SelfLoop(7)));
        assert!(list.is_empty());
    }

    #[test]
    fn test_new_edge_takes_proportional_share() {
        let mut list = EdgeList::new();
        list.get_or_create(0, 1).unwrap();
        assert!((list.weight_of(1) - 1.0).abs() < 1e-6);

        list.get_or_create(0, 2).unwrap();
        // Two edges share the distribution.
        assert!((weights_sum(&list) - 1.0).abs() < 1e-4);
        assert!(list.weight_of(1) > 0.0);
        assert!(list.weight_of(2) > 0.0);
    }

    #[test]
    fn test_reinforce_shifts_proportions() {
        let mut list = EdgeList::new();
        list.get_or_create(0, 1).unwrap();
        list.get_or_create(0, 2).unwrap();
        list.get_or_create(0, 3).unwrap();

        for _ in 0..10 {
            list.reinforce(1, 1.5, true);
        }

        assert!(list.weight_of(1) > list.weight_of(2));
        assert!(list.weight_of(1) > list.weight_of(3));
        assert!((weights_sum(&list) - 1.0).abs() < 1e-4);

        let edge = list.get(1).unwrap();
        assert_eq!(edge.use_count, 10);
        assert_eq!(edge.success_count, 10);
    }

    #[test]
    fn test_success_never_exceeds_use() {
        let mut list = EdgeList::new();
        list.get_or_create(0, 1).unwrap();
        list.reinforce(1, 1.2, true);
        list.reinforce(1, 0.8, false);
        list.reinforce(1, 1.2, true);

        let edge = list.get(1).unwrap();
        assert!(edge.success_count <= edge.use_count);
        assert_eq!(edge.use_count, 3);
        assert_eq!(edge.success_count, 2);
    }

    #[test]
    fn test_weaken_keeps_floor() {
        let mut list = EdgeList::new();
        list.get_or_create(0, 1).unwrap();
        list.get_or_create(0, 2).unwrap();

        for _ in 0..100 {
            list.reinforce(1, 0.1, false);
        }
        // The punished edge keeps a recoverable share.
        assert!(list.weight_of(1) > 0.0);
        assert!((weights_sum(&list) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_neutral_success_rate_when_unused() {
        let mut list = EdgeList::new();
        list.get_or_create(0, 1).unwrap();
        assert!((list.get(1).unwrap().success_rate() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_metabolic_prune_requires_density() {
        let mut list = EdgeList::new();
        for to in 1..=3 {
            list.get_or_create(0, to).unwrap();
        }
        // Sparse list: load = 0.09, pruning must not engage.
        assert_eq!(list.prune_metabolic(), 0);
        assert_eq!(list.active_len(), 3);
    }

    #[test]
    fn test_metabolic_prune_drops_weak_unused_edges() {
        let mut list = EdgeList::new();
        for to in 1..=12 {
            list.get_or_create(0, to).unwrap();
        }
        // Make two edges carry nearly all the weight.
        for _ in 0..30 {
            list.reinforce(1, 2.0, true);
            list.reinforce(2, 2.0, true);
        }
        assert!(list.metabolic_load() > 0.5);

        let pruned = list.prune_metabolic();
        assert!(pruned > 0);
        assert!(list.get(1).is_some());
        assert!(list.get(2).is_some());
        assert!((weights_sum(&list) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_revive_soft_deleted_edge() {
        let mut list = EdgeList::new();
        for to in 1..=12 {
            list.get_or_create(0, to).unwrap();
        }
        for _ in 0..30 {
            list.reinforce(1, 2.0, true);
        }
        list.prune_metabolic();
        let dead = (2..=12).find(|&to| list.get(to).is_none()).unwrap();

        list.get_or_create(0, dead).unwrap();
        assert!(list.get(dead).is_some());
        assert!((weights_sum(&list) - 1.0).abs() < 1e-4);
        // No duplicate entries for the revived target.
        assert_eq!(list.iter().filter(|e| e.to == dead).count(), 1);
    }

    #[test]
    fn test_compact_drops_dead_edges() {
        let mut list = EdgeList::new();
        for to in 1..=12 {
            list.get_or_create(0, to).unwrap();
        }
        for _ in 0..30 {
            list.reinforce(1, 2.0, true);
        }
        list.prune_metabolic();
        let before = list.len();
        list.compact();
        assert!(list.len() < before);
        assert_eq!(list.len(), list.active_len());
    }
}
