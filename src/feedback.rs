// ByteMind OS - Feedback v0.7.0
//
// Supervised update step. Compares the emitted output to the target
// byte-by-byte, reinforces the carriers of correct bytes, punishes the
// carriers of wrong ones, mints corrective edges toward the target,
// and teaches matched patterns the target sequence.

use crate::emergent::EmergentState;
use crate::graph::ByteGraph;
use crate::pattern::PatternId;
use crate::registry::PatternRegistry;
use tracing::debug;

/// What one feedback pass did.
#[derive(Debug, Clone, Default)]
pub struct FeedbackReport {
    pub compared: usize,
    pub correct: usize,
    pub wrong: usize,
    pub minted_predictions: usize,
    /// `1 - exact-match rate` over the shorter of output/target.
    pub mismatch: f32,
}

/// Apply supervised feedback for one episode.
pub fn apply(
    graph: &mut ByteGraph,
    registry: &mut PatternRegistry,
    emergent: &EmergentState,
    input: &[u8],
    output: &[u8],
    target: &[u8],
) -> FeedbackReport {
    let learning_rate = emergent.learning_rate();
    let learning_pressure = emergent.learning_pressure();

    // Patterns that saw this input; they carry the prediction credit.
    let matched_input: Vec<PatternId> = registry
        .live()
        .filter(|p| p.best_match(input).is_some())
        .map(|p| p.id)
        .collect();

    let mut report = FeedbackReport::default();
    report.compared = output.len().min(target.len());

    for i in 0..report.compared {
        let emitted = output[i];
        let expected = target[i];
        // The node that carried activation into this position. The
        // first position has no carrier; its credit flows through
        // pattern predictions only.
        let prev = if i > 0 { Some(output[i - 1]) } else { None };

        if emitted == expected {
            report.correct += 1;
            if let Some(prev) = prev {
                if prev != emitted {
                    let _ = graph.strengthen(prev, emitted, learning_rate, true);
                }
            }
            for &pid in &matched_input {
                if let Some(p) = registry.get_mut(pid) {
                    if p.predicts(emitted) {
                        p.record_attempt(true);
                        p.scale_prediction(emitted, 1.0 + learning_rate);
                    }
                }
            }
        } else {
            report.wrong += 1;
            if let Some(prev) = prev {
                if prev != emitted {
                    graph.weaken(prev, emitted, 1.0 - learning_rate * 0.5);
                }
                // Corrective edge toward what the teacher wanted,
                // seeded proportionally to learning pressure.
                if prev != expected {
                    let existed = graph.has_edge(prev, expected);
                    if graph.edge_between(prev, expected).is_ok() {
                        if existed {
                            let _ =
                                graph.strengthen(prev, expected, learning_pressure, true);
                        } else {
                            graph
                                .outgoing_mut(prev)
                                .set_weight(expected as u32, learning_pressure.max(0.05));
                        }
                    }
                }
            }
            for &pid in &matched_input {
                if let Some(p) = registry.get_mut(pid) {
                    if p.predicts(emitted) {
                        p.record_attempt(false);
                        p.scale_prediction(emitted, 1.0 - learning_rate * 0.5);
                    }
                }
            }
        }
    }

    // Teach matched patterns the target sequence. Only genuinely new
    // predictions are minted at full weight; established ones keep the
    // proportions feedback has carved out.
    for &pid in &matched_input {
        if let Some(p) = registry.get_mut(pid) {
            for &b in target {
                if !p.predicts(b) {
                    p.add_prediction(b, 1.0);
                    report.minted_predictions += 1;
                }
            }
        }
    }

    report.mismatch = if report.compared == 0 {
        if output.len() == target.len() {
            0.0
        } else {
            1.0
        }
    } else {
        1.0 - report.correct as f32 / report.compared as f32
    };

    debug!(
        compared = report.compared,
        correct = report.correct,
        wrong = report.wrong,
        minted = report.minted_predictions,
        mismatch = report.mismatch,
        "feedback applied"
    );
    report
}
