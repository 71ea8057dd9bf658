// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024-2025 Chernov Denys

//! Integration tests for the episode pipeline: pluralization learning,
//! blank generalization, and brain round-trip.

use bytemind_core::pattern::Slot;
use bytemind_core::Brain;
use tempfile::tempdir;

// ============================================================================
// Test Setup
// ============================================================================

fn train(brain: &mut Brain, pairs: &[(&[u8], &[u8])], episodes: usize) {
    for _ in 0..episodes {
        for (input, target) in pairs {
            brain.run_episode(input, Some(target)).unwrap();
        }
    }
}

// ============================================================================
// Test 1: Pluralization learning (cat -> cats)
// ============================================================================

#[test]
fn test_pluralization_learns_t_to_s_edge() {
    let mut brain = Brain::new();
    train(&mut brain, &[(b"cat", b"cats")], 30);

    let ts = brain.edge_weight(b't', b's');
    assert!(ts > 0.0, "edge t->s must exist after training");

    for other in 0u8..=255 {
        if other == b's' {
            continue;
        }
        assert!(
            ts > brain.edge_weight(b't', other),
            "t->s ({}) must outweigh t->{} ({})",
            ts,
            other as char,
            brain.edge_weight(b't', other)
        );
    }
}

#[test]
fn test_pluralization_inference_ends_in_s() {
    let mut brain = Brain::new();
    train(&mut brain, &[(b"cat", b"cats")], 30);

    brain.run_episode(b"cat", None).unwrap();
    let output = brain.output();
    assert!(!output.is_empty(), "trained brain must emit something");
    assert_eq!(
        *output.last().unwrap(),
        b's',
        "output {:?} must end in 's'",
        String::from_utf8_lossy(output)
    );
}

#[test]
fn test_error_rate_falls_with_training() {
    let mut brain = Brain::new();
    let initial = brain.error_rate();
    train(&mut brain, &[(b"cat", b"cats")], 30);
    assert!(
        brain.error_rate() < initial,
        "error rate must fall: {} -> {}",
        initial,
        brain.error_rate()
    );
}

// ============================================================================
// Test 2: Generalization via BLANK
// ============================================================================

#[test]
fn test_blank_generalization_emerges() {
    let mut brain = Brain::new();
    train(&mut brain, &[(b"cat", b"cats")], 20);
    train(&mut brain, &[(b"dog", b"dogs")], 20);
    train(&mut brain, &[(b"pen", b"pens")], 20);

    let generalized: Vec<_> = brain
        .pattern_ids()
        .into_iter()
        .filter_map(|id| brain.pattern_info(id))
        .filter(|info| info.sequence.contains('_'))
        .collect();
    assert!(
        !generalized.is_empty(),
        "training three plural pairs must mint a generalized pattern"
    );
    assert!(
        generalized.iter().any(|info| info.strength > 0.1),
        "a generalized pattern must carry strength > 0.1: {:?}",
        generalized
            .iter()
            .map(|i| (i.sequence.clone(), i.strength))
            .collect::<Vec<_>>()
    );
}

#[test]
fn test_blank_children_have_consistent_depth() {
    let mut brain = Brain::new();
    train(&mut brain, &[(b"cat", b"cats")], 20);
    train(&mut brain, &[(b"dog", b"dogs")], 20);
    train(&mut brain, &[(b"pen", b"pens")], 20);

    for id in brain.pattern_ids() {
        let info = brain.pattern_info(id).unwrap();
        match info.parent {
            Some(parent) => {
                let parent_info = brain
                    .pattern_info(parent)
                    .expect("parent of a live pattern must be live");
                assert_eq!(
                    info.chain_depth,
                    parent_info.chain_depth + 1,
                    "child depth must be parent depth + 1"
                );
            }
            None => assert_eq!(info.chain_depth, 0),
        }
    }
}

#[test]
fn test_novel_stem_gets_pluralized() {
    let mut brain = Brain::new();
    train(&mut brain, &[(b"cat", b"cats")], 20);
    train(&mut brain, &[(b"dog", b"dogs")], 20);
    train(&mut brain, &[(b"pen", b"pens")], 20);

    // "bat" was never seen; the learned structure must still append
    // the plural marker.
    brain.run_episode(b"bat", None).unwrap();
    let output = brain.output();
    assert!(!output.is_empty());
    assert_eq!(
        *output.last().unwrap(),
        b's',
        "output {:?} must end in 's'",
        String::from_utf8_lossy(output)
    );
}

// ============================================================================
// Test 3: Brain round-trip
// ============================================================================

#[test]
fn test_brain_round_trip_preserves_behavior() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("brain.m");

    let mut brain = Brain::new();
    train(&mut brain, &[(b"cat", b"cats")], 30);

    brain.run_episode(b"cat", None).unwrap();
    let last_before = *brain.output().last().unwrap();
    let patterns_before = brain.pattern_count();

    brain.save(&path).unwrap();
    drop(brain);

    let mut restored = Brain::load(&path).unwrap();
    assert_eq!(restored.pattern_count(), patterns_before);

    restored.run_episode(b"cat", None).unwrap();
    assert_eq!(
        *restored.output().last().unwrap(),
        last_before,
        "restored brain must reproduce the pre-save output"
    );
}

#[test]
fn test_round_trip_is_fixed_point() {
    let dir = tempdir().unwrap();
    let first_path = dir.path().join("first.m");
    let second_path = dir.path().join("second.m");

    let mut brain = Brain::new();
    train(&mut brain, &[(b"cat", b"cats")], 10);

    brain.save(&first_path).unwrap();
    let restored = Brain::load(&first_path).unwrap();
    restored.save(&second_path).unwrap();

    let first = std::fs::read_to_string(&first_path).unwrap();
    let second = std::fs::read_to_string(&second_path).unwrap();
    assert_eq!(first, second, "save(load(save(x))) must equal save(x)");
}

#[test]
fn test_training_resumes_after_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("brain.m");

    let mut brain = Brain::new();
    train(&mut brain, &[(b"cat", b"cats")], 10);
    let step = brain.emergent_snapshot().step;
    brain.save(&path).unwrap();

    let mut restored = Brain::load(&path).unwrap();
    assert_eq!(restored.emergent_snapshot().step, step);
    restored.run_episode(b"cat", Some(b"cats")).unwrap();
    assert_eq!(restored.emergent_snapshot().step, step + 1);
}

// ============================================================================
// Invariant sweeps
// ============================================================================

#[test]
fn test_invariants_after_mixed_training() {
    let mut brain = Brain::new();
    train(
        &mut brain,
        &[
            (b"cat".as_slice(), b"cats".as_slice()),
            (b"dog", b"dogs"),
            (b"hello", b"world"),
        ],
        15,
    );

    // Edge weights are proportions in [0, 1]; lists sum to 1.
    for src in 0u8..=255 {
        let list = brain.graph().outgoing(src);
        if list.active_len() == 0 {
            continue;
        }
        let sum: f32 = list.iter_active().map(|e| e.weight).sum();
        assert!(
            (sum - 1.0).abs() < 1e-4,
            "outgoing weights of {} sum to {}",
            src,
            sum
        );
        for edge in list.iter_active() {
            assert!(edge.weight >= 0.0 && edge.weight <= 1.0);
            assert!(edge.success_count <= edge.use_count);
            assert_ne!(edge.to, src as u32, "self-loops must never exist");
        }
    }

    // Node activations stay within the ceiling.
    for id in 0u8..=255 {
        let activation = brain.node_activation(id);
        assert!(activation >= 0.0);
        assert!(activation <= 100.0);
    }

    // Pattern counters and strength track utility.
    for id in brain.pattern_ids() {
        let info = brain.pattern_info(id).unwrap();
        assert!(info.prediction_successes <= info.prediction_attempts);
        if info.prediction_attempts > 10 {
            let utility = info.prediction_successes as f32 / info.prediction_attempts as f32;
            // Strength is utility, halved below 0.4: the deviation is
            // bounded by half the utility.
            assert!(
                (info.strength - utility).abs() <= 0.5 * utility + 1e-6,
                "strength {} must track utility {}",
                info.strength,
                utility
            );
        }
    }
}

#[test]
fn test_blank_slot_never_leaks_into_byte_space() {
    let mut brain = Brain::new();
    train(&mut brain, &[(b"cat", b"cats")], 20);
    train(&mut brain, &[(b"bat", b"bats")], 20);

    // Generalized patterns exist, but matching code branches on the
    // slot tag: a blank matches every byte, including 0 and 255.
    let blank = Slot::Blank;
    assert!(blank.matches(0));
    assert!(blank.matches(255));
    assert!(blank.byte().is_none());
}
