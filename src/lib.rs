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

/// ByteMind Core - Rust Implementation
///
/// An online, byte-level graph learner with circular self-regulation:
/// no hard-coded pruning limits, learning rates, or activation
/// thresholds — every such quantity is recomputed each step as a ratio
/// over current system state.
///
/// # Architecture
///
/// - ByteGraph: 256 permanent byte nodes with proportion-weighted
///   edge lists
/// - PatternRegistry: dynamic patterns (byte sequences with blank
///   wildcards), utility-driven strength, pattern chains, hierarchy
/// - WavePropagator: pattern firing, four-factor path-quality edge
///   flow, decay
/// - OutputSelector: logical relevance with loop/history suppression
/// - PatternDetector + FeedbackApplier: supervised learning step
/// - EmergentState: every pressure derived from the live census
/// - BrainSerializer: textual `.m` snapshot with exact round-trip
///
/// # Example
///
/// ```rust
/// use bytemind_core::Brain;
///
/// let mut brain = Brain::new();
/// for _ in 0..5 {
///     brain.run_episode(b"cat", Some(b"cats")).unwrap();
/// }
/// brain.run_episode(b"cat", None).unwrap();
/// let _output = brain.output();
/// ```
pub mod brain;
pub mod config;
pub mod detector;
pub mod edge;
pub mod emergent;
pub mod feedback;
pub mod graph;
pub mod logging_utils;
pub mod metrics;
pub mod node;
pub mod pattern;
pub mod registry;
pub mod selector;
pub mod serializer;
pub mod wave;

pub use brain::{Brain, EpisodeError, PatternInfo, SharedBrain};

pub use config::{CoreConfig, EPSILON, NODE_COUNT};

pub use edge::{Edge, EdgeError, EdgeList, TargetId};

pub use emergent::{EmergentSnapshot, EmergentState};

pub use graph::{ByteGraph, GraphCensus};

pub use node::Node;

pub use pattern::{Pattern, PatternId, Prediction, Slot};

pub use registry::{PatternCensus, PatternRegistry, RegistryError};

pub use detector::DetectReport;

pub use feedback::FeedbackReport;

pub use serializer::{load_brain, load_brain_partial, save_brain, BrainFileError, PartialLoad};

pub use wave::{StepReport, WavePropagator};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const VERSION_MAJOR: u8 = 0;
pub const VERSION_MINOR: u8 = 9;
pub const VERSION_PATCH: u8 = 3;
