// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024-2025 Chernov Denys

//! Pattern registry - the dynamic pattern population.
//!
//! Backing storage is a dense array indexed by `PatternId`. Dead
//! patterns stay in place (ids are stable, the serializer and
//! hierarchy links depend on that) and their slots are recycled by the
//! next mint before the array grows. Growth doubles capacity through
//! `try_reserve`, so allocation failure surfaces as
//! `CapacityExhausted` instead of aborting.

use crate::pattern::{Pattern, PatternId, Slot};
use smallvec::{smallvec, SmallVec};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("pattern capacity growth failed")]
    CapacityExhausted,

    #[error("hierarchy edit would close a cycle: child {child}, parent {parent}")]
    HierarchyCycle { child: PatternId, parent: PatternId },

    #[error("unknown pattern id {0}")]
    UnknownPattern(PatternId),
}

/// Pattern-side census for the emergent-state recompute.
#[derive(Debug, Clone, Default)]
pub struct PatternCensus {
    pub live: usize,
    pub strength_sum: f32,
    pub utility_sum: f32,
    pub activation_sum: f32,
}

impl PatternCensus {
    pub fn avg_strength(&self) -> f32 {
        if self.live == 0 {
            0.0
        } else {
            self.strength_sum / self.live as f32
        }
    }

    pub fn avg_utility(&self) -> f32 {
        if self.live == 0 {
            0.0
        } else {
            self.utility_sum / self.live as f32
        }
    }

    pub fn avg_activation(&self) -> f32 {
        if self.live == 0 {
            0.0
        } else {
            self.activation_sum / self.live as f32
        }
    }
}

#[derive(Debug)]
pub struct PatternRegistry {
    patterns: Vec<Pattern>,
    /// Recyclable (dead) slots.
    free: Vec<usize>,
    live_count: usize,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
            free: Vec::new(),
            live_count: 0,
        }
    }

    /// Number of live patterns.
    pub fn pattern_count(&self) -> usize {
        self.live_count
    }

    /// Size of the backing array (live + recyclable).
    pub fn backing_len(&self) -> usize {
        self.patterns.len()
    }

    pub fn get(&self, id: PatternId) -> Option<&Pattern> {
        self.patterns.get(id as usize).filter(|p| p.alive)
    }

    pub fn get_mut(&mut self, id: PatternId) -> Option<&mut Pattern> {
        self.patterns.get_mut(id as usize).filter(|p| p.alive)
    }

    pub fn live(&self) -> impl Iterator<Item = &Pattern> {
        self.patterns.iter().filter(|p| p.alive)
    }

    pub fn live_mut(&mut self) -> impl Iterator<Item = &mut Pattern> {
        self.patterns.iter_mut().filter(|p| p.alive)
    }

    pub fn live_ids(&self) -> Vec<PatternId> {
        self.patterns
            .iter()
            .filter(|p| p.alive)
            .map(|p| p.id)
            .collect()
    }

    /// Find a live pattern with exactly this slot sequence.
    pub fn find_by_slots(&self, slots: &[Slot]) -> Option<PatternId> {
        self.live()
            .find(|p| p.slots.as_slice() == slots)
            .map(|p| p.id)
    }

    // ==================== MINTING ====================

    /// Mint a new pattern, recycling a dead slot when one is free.
    /// Capacity doubles when the backing array is full.
    pub fn mint(
        &mut self,
        slots: SmallVec<[Slot; 8]>,
        strength: f32,
    ) -> Result<PatternId, RegistryError> {
        debug_assert!(slots.len() >= 2);
        if let Some(idx) = self.free.pop() {
            let id = idx as PatternId;
            self.patterns[idx] = Pattern::new(id, slots, strength);
            self.live_count += 1;
            crate::metrics::PATTERNS_MINTED.inc();
            trace!(id, "pattern recycled into free slot");
            return Ok(id);
        }

        if self.patterns.len() == self.patterns.capacity() {
            let grow = self.patterns.capacity().max(4);
            self.patterns
                .try_reserve(grow)
                .map_err(|_| RegistryError::CapacityExhausted)?;
        }
        let id = self.patterns.len() as PatternId;
        self.patterns.push(Pattern::new(id, slots, strength));
        self.live_count += 1;
        crate::metrics::PATTERNS_MINTED.inc();
        trace!(id, "pattern minted");
        Ok(id)
    }

    /// Install a pattern at a fixed id (brain-file load). Intervening
    /// ids become recyclable placeholders.
    pub fn insert_at(&mut self, id: PatternId, pattern: Pattern) -> Result<(), RegistryError> {
        let idx = id as usize;
        while self.patterns.len() <= idx {
            if self.patterns.len() == self.patterns.capacity() {
                let grow = self.patterns.capacity().max(4);
                self.patterns
                    .try_reserve(grow)
                    .map_err(|_| RegistryError::CapacityExhausted)?;
            }
            let placeholder_id = self.patterns.len() as PatternId;
            let mut placeholder =
                Pattern::new(placeholder_id, smallvec![Slot::Blank, Slot::Blank], 0.0);
            placeholder.mark_dead();
            self.free.push(placeholder_id as usize);
            self.patterns.push(placeholder);
        }
        let was_alive = self.patterns[idx].alive;
        self.free.retain(|&f| f != idx);
        self.patterns[idx] = pattern;
        self.patterns[idx].id = id;
        if !was_alive && self.patterns[idx].alive {
            self.live_count += 1;
        }
        Ok(())
    }

    // ==================== SELF-TUNING ====================

    /// Apply the utility law to every live pattern.
    pub fn refresh_strengths(&mut self) {
        for p in self.live_mut() {
            p.refresh_strength();
            p.recompute_importance();
        }
    }

    /// Emergent pruning: the strength floor shrinks as the population
    /// grows (`0.01 / pattern_count`), and only patterns whose utility
    /// has been thoroughly tested and found wanting are dropped.
    pub fn prune(&mut self) -> usize {
        let count = self.live_count.max(1);
        let floor = 0.01 / count as f32;
        let mut pruned = 0;
        for p in self.patterns.iter_mut().filter(|p| p.alive) {
            if p.strength < floor && p.prediction_attempts > 50 && p.success_rate() < 0.2 {
                p.mark_dead();
                pruned += 1;
            }
        }
        if pruned > 0 {
            self.reparent_orphans();
            for idx in 0..self.patterns.len() {
                if !self.patterns[idx].alive && !self.free.contains(&idx) {
                    self.free.push(idx);
                }
            }
            self.live_count -= pruned;
            crate::metrics::PATTERNS_PRUNED.inc_by(pruned as u64);
            debug!(pruned, remaining = self.live_count, "pattern pruning");
        }
        pruned
    }

    /// After a pruning pass, children of dead patterns climb to their
    /// nearest live ancestor (or become roots). A dead slot may be
    /// recycled by an unrelated mint, so no live pattern may keep
    /// pointing at it.
    fn reparent_orphans(&mut self) {
        for idx in 0..self.patterns.len() {
            if !self.patterns[idx].alive {
                continue;
            }
            let mut ancestor = self.patterns[idx].parent;
            while let Some(id) = ancestor {
                match self.patterns.get(id as usize) {
                    Some(p) if p.alive => break,
                    Some(p) => ancestor = p.parent,
                    // Dangling reference (e.g. a hand-edited brain
                    // file): treat as rootless.
                    None => ancestor = None,
                }
            }
            match ancestor {
                Some(id) => {
                    self.patterns[idx].parent = Some(id);
                }
                None => {
                    self.patterns[idx].parent = None;
                    self.patterns[idx].chain_depth = 0;
                }
            }
        }

        // Depths settle top-down; the tree is shallow, so a few
        // passes suffice.
        loop {
            let mut changed = false;
            for idx in 0..self.patterns.len() {
                if !self.patterns[idx].alive {
                    continue;
                }
                let want = match self.patterns[idx].parent {
                    Some(parent) => self
                        .patterns
                        .get(parent as usize)
                        .map_or(0, |p| p.chain_depth + 1),
                    None => 0,
                };
                if self.patterns[idx].chain_depth != want {
                    self.patterns[idx].chain_depth = want;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    // ==================== HIERARCHY ====================

    /// Link `child` under `parent`. Walks the parent chain first and
    /// refuses edits that would close a cycle. Sets the child's chain
    /// depth from the parent's.
    pub fn assign_parent(
        &mut self,
        child: PatternId,
        parent: PatternId,
    ) -> Result<(), RegistryError> {
        if self.get(child).is_none() {
            return Err(RegistryError::UnknownPattern(child));
        }
        if self.get(parent).is_none() {
            return Err(RegistryError::UnknownPattern(parent));
        }
        // Walk up from the prospective parent; finding the child there
        // means the edit closes a cycle.
        let mut cursor = Some(parent);
        let mut hops = 0usize;
        while let Some(id) = cursor {
            if id == child {
                return Err(RegistryError::HierarchyCycle { child, parent });
            }
            cursor = self.get(id).and_then(|p| p.parent);
            hops += 1;
            if hops > self.patterns.len() {
                // Malformed chain; refuse rather than loop.
                return Err(RegistryError::HierarchyCycle { child, parent });
            }
        }
        let parent_depth = self.get(parent).map(|p| p.chain_depth).unwrap_or(0);
        let p = self.get_mut(child).expect("checked above");
        p.parent = Some(parent);
        p.chain_depth = parent_depth + 1;
        Ok(())
    }

    // ==================== CENSUS ====================

    pub fn census(&self) -> PatternCensus {
        let mut census = PatternCensus::default();
        for p in self.live() {
            census.live += 1;
            census.strength_sum += p.strength;
            census.utility_sum += p.utility();
            census.activation_sum += p.activation;
        }
        census
    }

    /// Reset per-episode transient state.
    pub fn reset_transient(&mut self) {
        for p in self.live_mut() {
            p.reset_transient();
        }
    }
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::new()
    }
}
