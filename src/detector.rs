// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024-2025 Chernov Denys

//! Pattern detection - runs after every supervised episode.
//!
//! Four phases, in order:
//!
//! 1. **Mint** recurring subsequences (length 2..=L_max, count >= 2)
//!    across the input/output/target windows, with initial strength
//!    proportional to compression benefit.
//! 2. **Detect generalizations**: equal-length concrete patterns
//!    differing in exactly one position spawn a blank-wildcard parent.
//! 3. **Active generalization**: strong patterns speculatively blank a
//!    position; the variant is kept only when the context shows the
//!    blank actually varies.
//! 4. **Learn sequences**: pattern A immediately followed by pattern B
//!    creates or strengthens the chain edge A -> B.
//!
//! The scan windows are kept separate (no physical concatenation) so
//! no phantom subsequence can straddle a buffer boundary.

use crate::emergent::EmergentState;
use crate::pattern::{PatternId, Slot};
use crate::registry::{PatternRegistry, RegistryError};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;
use std::collections::HashMap;
use tracing::debug;

/// What one detection pass did.
#[derive(Debug, Clone, Default)]
pub struct DetectReport {
    pub minted: usize,
    pub generalized: usize,
    pub speculative: usize,
    pub sequence_links: usize,
}

/// Run the full detection pass over the episode's buffers.
pub fn detect(
    registry: &mut PatternRegistry,
    input: &[u8],
    output: &[u8],
    target: &[u8],
    emergent: &EmergentState,
) -> Result<DetectReport, RegistryError> {
    let windows: [&[u8]; 3] = [input, output, target];
    let total_len: usize = windows.iter().map(|w| w.len()).sum();
    if total_len < 2 {
        return Ok(DetectReport::default());
    }

    let mut report = DetectReport::default();
    report.minted = mint_recurring(registry, &windows, total_len)?;
    report.generalized = detect_generalizations(registry)?;
    report.speculative = active_generalization(registry, &windows, emergent)?;
    report.sequence_links = learn_sequences(registry, &windows, emergent);

    if report.minted + report.generalized + report.speculative + report.sequence_links > 0 {
        debug!(
            minted = report.minted,
            generalized = report.generalized,
            speculative = report.speculative,
            sequence_links = report.sequence_links,
            "pattern detection"
        );
    }
    Ok(report)
}

/// Maximum subsequence length grows with the observed data.
fn max_len(total_len: usize) -> usize {
    (2 + total_len / 8).clamp(2, 8)
}

// ==================== PHASE 1: MINTING ====================

fn mint_recurring(
    registry: &mut PatternRegistry,
    windows: &[&[u8]; 3],
    total_len: usize,
) -> Result<usize, RegistryError> {
    let l_max = max_len(total_len);
    let mut minted = 0;

    for len in 2..=l_max {
        let mut counts: HashMap<&[u8], usize> = HashMap::new();
        for window in windows {
            for seq in window.windows(len) {
                *counts.entry(seq).or_insert(0) += 1;
            }
        }

        // Deterministic mint order regardless of hash iteration.
        let mut recurring: Vec<(&[u8], usize)> =
            counts.into_iter().filter(|&(_, count)| count >= 2).collect();
        recurring.sort_unstable();

        for (seq, count) in recurring {
            let slots: SmallVec<[Slot; 8]> = seq.iter().map(|&b| Slot::Byte(b)).collect();
            if registry.find_by_slots(&slots).is_some() {
                continue;
            }
            // Compression benefit: bytes saved by factoring the
            // repetition out, relative to everything observed. The
            // overhead is one bookkeeping slot per pattern.
            let benefit = (count * len) as f32 - 1.0;
            let strength = (benefit / total_len as f32).clamp(0.05, 1.0);
            registry.mint(slots, strength)?;
            minted += 1;
        }
    }
    Ok(minted)
}

// ==================== PHASE 2: GENERALIZATION ====================

/// For each set of equal-length concrete patterns differing in
/// exactly one position, mint the blank-wildcard parent and hang the
/// members under it.
///
/// Buckets concrete patterns by their sequence with one position
/// masked out: two patterns share a bucket iff they differ at exactly
/// that position (sequences are deduplicated at mint, so identical
/// members cannot occur).
fn detect_generalizations(registry: &mut PatternRegistry) -> Result<usize, RegistryError> {
    let concrete: Vec<(PatternId, SmallVec<[Slot; 8]>, f32, f32)> = registry
        .live()
        .filter(|p| !p.is_generalized())
        .map(|p| (p.id, p.slots.clone(), p.strength, p.accumulated_meaning))
        .collect();

    let mut buckets: HashMap<SmallVec<[Slot; 8]>, Vec<usize>> = HashMap::new();
    for (idx, (_, slots, _, _)) in concrete.iter().enumerate() {
        for pos in 0..slots.len() {
            let mut mask = slots.clone();
            mask[pos] = Slot::Blank;
            buckets.entry(mask).or_default().push(idx);
        }
    }

    // Deterministic mint order regardless of hash iteration.
    let mut candidates: Vec<(SmallVec<[Slot; 8]>, Vec<usize>)> = buckets
        .into_iter()
        .filter(|(_, members)| members.len() >= 2)
        .collect();
    candidates.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));

    let mut created = 0;
    for (general, members) in candidates {
        if registry.find_by_slots(&general).is_some() {
            continue;
        }

        let strength = members
            .iter()
            .map(|&idx| concrete[idx].2)
            .sum::<f32>()
            / members.len() as f32;
        let meaning = members
            .iter()
            .map(|&idx| concrete[idx].3)
            .fold(0.0f32, f32::max)
            * 1.2;

        let parent = registry.mint(general, strength)?;
        // Meaning enters the hierarchy amplified at the moment of
        // creation; afterwards it only flows through chains.
        if let Some(p) = registry.get_mut(parent) {
            p.absorb_meaning(meaning);
        }
        for &idx in &members {
            adopt(registry, concrete[idx].0, parent);
        }
        created += 1;
    }
    Ok(created)
}

/// Hang `child` under `parent` unless the child already has a parent
/// or the link would close a cycle.
fn adopt(registry: &mut PatternRegistry, child: PatternId, parent: PatternId) {
    let has_parent = registry.get(child).map_or(true, |p| p.parent.is_some());
    if has_parent {
        return;
    }
    let _ = registry.assign_parent(child, parent);
}

// ==================== PHASE 3: ACTIVE GENERALIZATION ====================

/// Speculatively blank one or two positions of strong patterns. The
/// variant is retained only when some context match fills the blank
/// with a byte different from the original (evidence that the position
/// actually varies); otherwise it is discarded unminted.
fn active_generalization(
    registry: &mut PatternRegistry,
    windows: &[&[u8]; 3],
    emergent: &EmergentState,
) -> Result<usize, RegistryError> {
    let avg_strength = emergent.avg_pattern_strength;
    let strong: Vec<(PatternId, SmallVec<[Slot; 8]>, f32, f32)> = registry
        .live()
        .filter(|p| !p.is_generalized() && p.len() >= 3 && p.strength > avg_strength)
        .map(|p| (p.id, p.slots.clone(), p.strength, p.accumulated_meaning))
        .collect();
    if strong.is_empty() {
        return Ok(0);
    }

    let mut rng = SmallRng::seed_from_u64(emergent.step);
    let mut retained = 0;

    for (id, slots, strength, meaning) in strong {
        let variants = if slots.len() >= 5 { 2 } else { 1 };
        for _ in 0..variants {
            let pos = rng.gen_range(0..slots.len());
            let original = match slots[pos] {
                Slot::Byte(b) => b,
                Slot::Blank => continue,
            };
            let mut general = slots.clone();
            general[pos] = Slot::Blank;
            if registry.find_by_slots(&general).is_some() {
                continue;
            }

            // Evidence check: the blanked variant must match context
            // somewhere with a different byte in the blank.
            let probe = crate::pattern::Pattern::new(0, general.clone(), 0.0);
            let varies = windows.iter().any(|window| {
                probe
                    .match_positions(window)
                    .into_iter()
                    .any(|at| window[at + pos] != original)
            });
            if !varies {
                continue;
            }

            let parent = registry.mint(general, strength * 0.8)?;
            if let Some(p) = registry.get_mut(parent) {
                p.absorb_meaning(meaning * 1.2);
            }
            adopt(registry, id, parent);
            retained += 1;
        }
    }
    Ok(retained)
}

// ==================== PHASE 4: SEQUENCES ====================

/// Wherever pattern A is immediately followed by pattern B in a
/// window, create or strengthen the chain edge A -> B and renormalize
/// A's outgoing list.
fn learn_sequences(
    registry: &mut PatternRegistry,
    windows: &[&[u8]; 3],
    emergent: &EmergentState,
) -> usize {
    let learning_rate = emergent.learning_rate();
    let mut links = 0;

    for window in windows {
        let matches: Vec<(PatternId, usize, Vec<usize>)> = registry
            .live()
            .map(|p| (p.id, p.len(), p.match_positions(window)))
            .filter(|(_, _, positions)| !positions.is_empty())
            .collect();

        for (a_id, a_len, a_positions) in &matches {
            for (b_id, _, b_positions) in &matches {
                if a_id == b_id {
                    continue;
                }
                let adjacent = a_positions
                    .iter()
                    .any(|&at| b_positions.contains(&(at + a_len)));
                if !adjacent {
                    continue;
                }
                if let Some(a) = registry.get_mut(*a_id) {
                    if a.outgoing.get_or_create(*a_id, *b_id).is_ok() {
                        a.outgoing.reinforce(*b_id, 1.0 + learning_rate, true);
                        links += 1;
                    }
                }
            }
        }
    }
    links
}
