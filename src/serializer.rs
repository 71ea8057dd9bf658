// ByteMind OS - Brain Serializer v0.8.0
// Copyright (C) 2024-2025 Chernov Denys
//
// Textual `.m` snapshot of the whole core state.
//
// # File Format
//
// Line-oriented UTF-8. Record heads:
//
// ```text
// brain version:1
// node <id> exists:<bool> energy:<f> threshold:<f>
// edge <src> -> <dst> weight:<f> use:<u64> success:<u64>
// pattern <id> seq:"<chars>" strength:<f> attempts:<u64> successes:<u64> depth:<u32> parent:<id|-> meaning:<f>
// pred <pid> -> <node> weight:<f>
// pedge <pid> -> <pid2> weight:<f> use:<u64> success:<u64>
// state error:<f> step:<u64>
// ```
//
// Inside the quoted sequence, `_` is the blank wildcard; bytes outside
// printable ASCII (and the escape-significant bytes `"` `\` `_` and
// whitespace/controls) are written `\xNN`. Floats are rounded to six
// decimals. Records are emitted in a fixed order (nodes ascending,
// edges per source in list order, patterns by id, then preds, then
// pedges, then the single state record), which makes load-then-save a
// fixed point.
//
// Unknown record heads are skipped with a warning: newer versions may
// append record types and old readers must survive them.

use crate::brain::Brain;
use crate::edge::Edge;
use crate::pattern::{Pattern, Slot};
use smallvec::SmallVec;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Brain-file errors.
#[derive(Debug, Error)]
pub enum BrainFileError {
    #[error("brain file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("brain file format error at line {line}: {reason}")]
    Format { line: usize, reason: String },
}

/// Result of a lenient load.
pub struct PartialLoad {
    pub brain: Brain,
    /// Lines abandoned after the first bad record.
    pub skipped_lines: usize,
}

// ==================== SAVE ====================

/// Save the brain to `path`.
pub fn save_brain<P: AsRef<Path>>(brain: &Brain, path: P) -> Result<(), BrainFileError> {
    let timer = crate::metrics::BRAIN_SAVE_DURATION.start_timer();
    let text = write_string(brain);
    fs::write(path.as_ref(), text)?;
    crate::metrics::BRAIN_SAVES.inc();
    timer.observe_duration();
    info!(path = %path.as_ref().display(), "brain saved");
    Ok(())
}

/// Load a brain from `path`, failing on the first bad recognized
/// record.
pub fn load_brain<P: AsRef<Path>>(path: P) -> Result<Brain, BrainFileError> {
    let text = fs::read_to_string(path.as_ref())?;
    let brain = parse_string(&text, false).map(|r| r.brain)?;
    crate::metrics::BRAIN_LOADS.inc();
    info!(path = %path.as_ref().display(), "brain loaded");
    Ok(brain)
}

/// Lenient load: commit everything before the first bad line.
pub fn load_brain_partial<P: AsRef<Path>>(path: P) -> Result<PartialLoad, BrainFileError> {
    let text = fs::read_to_string(path.as_ref())?;
    let result = parse_string(&text, true)?;
    crate::metrics::BRAIN_LOADS.inc();
    Ok(result)
}

/// Render the whole brain as `.m` text.
pub fn write_string(brain: &Brain) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "brain version:1");

    for id in 0..=255u8 {
        let node = brain.graph.node(id);
        if !node.exists {
            continue;
        }
        let _ = writeln!(
            out,
            "node {} exists:true energy:{:.6} threshold:{:.6}",
            id, node.energy, node.threshold
        );
    }

    for src in 0..=255u8 {
        for edge in brain.graph.outgoing(src).iter_active() {
            let _ = writeln!(
                out,
                "edge {} -> {} weight:{:.6} use:{} success:{}",
                src, edge.to, edge.weight, edge.use_count, edge.success_count
            );
        }
    }

    let mut live: Vec<&Pattern> = brain.registry.live().collect();
    live.sort_by_key(|p| p.id);

    for p in &live {
        let parent = p
            .parent
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "pattern {} seq:\"{}\" strength:{:.6} attempts:{} successes:{} depth:{} parent:{} meaning:{:.6}",
            p.id,
            format_slots(&p.slots),
            p.strength,
            p.prediction_attempts,
            p.prediction_successes,
            p.chain_depth,
            parent,
            p.accumulated_meaning
        );
    }
    for p in &live {
        for pred in &p.predictions {
            let _ = writeln!(
                out,
                "pred {} -> {} weight:{:.6}",
                p.id, pred.node, pred.weight
            );
        }
    }
    for p in &live {
        for edge in p.outgoing.iter_active() {
            let _ = writeln!(
                out,
                "pedge {} -> {} weight:{:.6} use:{} success:{}",
                p.id, edge.to, edge.weight, edge.use_count, edge.success_count
            );
        }
    }

    let _ = writeln!(
        out,
        "state error:{:.6} step:{}",
        brain.emergent.error_rate, brain.emergent.step
    );
    out
}

// ==================== LOAD ====================

/// Parse `.m` text into a fresh brain.
pub fn parse_string(text: &str, partial: bool) -> Result<PartialLoad, BrainFileError> {
    let mut brain = Brain::new();
    let mut skipped = 0usize;
    let mut state_seen = false;

    let lines: Vec<&str> = text.lines().collect();
    for (idx, raw) in lines.iter().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_end();
        if line.is_empty() {
            continue;
        }

        let result = parse_line(&mut brain, line, &mut state_seen);
        if let Err(reason) = result {
            if partial {
                warn!(line = line_no, reason = %reason, "bad record; committing partial load");
                skipped = lines.len() - idx;
                break;
            }
            return Err(BrainFileError::Format {
                line: line_no,
                reason,
            });
        }
    }

    debug!(
        nodes = brain.graph.existing_count(),
        edges = brain.graph.total_edges(),
        patterns = brain.registry.pattern_count(),
        "brain parsed"
    );
    Ok(PartialLoad {
        brain,
        skipped_lines: skipped,
    })
}

fn parse_line(brain: &mut Brain, line: &str, state_seen: &mut bool) -> Result<(), String> {
    let head = line.split_whitespace().next().unwrap_or("");
    match head {
        "brain" => Ok(()), // header; any version:N tail is fine
        "node" => parse_node(brain, line),
        "edge" => parse_edge(brain, line),
        "pattern" => parse_pattern(brain, line),
        "pred" => parse_pred(brain, line),
        "pedge" => parse_pedge(brain, line),
        "state" => {
            if *state_seen {
                return Err("duplicate state record".to_string());
            }
            *state_seen = true;
            parse_state(brain, line)
        }
        other => {
            // Forward compatibility: newer writers may add records.
            warn!(head = other, "unknown brain record skipped");
            Ok(())
        }
    }
}

fn parse_node(brain: &mut Brain, line: &str) -> Result<(), String> {
    let mut tokens = line.split_whitespace().skip(1);
    let id: u8 = next_parsed(&mut tokens, "node id")?;
    let exists: bool = field_parsed(&mut tokens, "exists")?;
    let energy: f32 = field_parsed(&mut tokens, "energy")?;
    let threshold: f32 = field_parsed(&mut tokens, "threshold")?;

    let node = brain.graph.node_mut(id);
    node.exists = exists;
    node.energy = energy;
    node.threshold = threshold;
    Ok(())
}

fn parse_edge(brain: &mut Brain, line: &str) -> Result<(), String> {
    let mut tokens = line.split_whitespace().skip(1);
    let src: u8 = next_parsed(&mut tokens, "edge source")?;
    expect_arrow(&mut tokens)?;
    let dst: u8 = next_parsed(&mut tokens, "edge target")?;
    if src == dst {
        return Err(format!("self-loop {} -> {}", src, dst));
    }
    let weight: f32 = field_parsed(&mut tokens, "weight")?;
    let use_count: u64 = field_parsed(&mut tokens, "use")?;
    let success_count: u64 = field_parsed(&mut tokens, "success")?;
    if success_count > use_count {
        return Err(format!(
            "success {} exceeds use {} on edge {} -> {}",
            success_count, use_count, src, dst
        ));
    }

    brain.graph.restore_edge(
        src,
        dst,
        Edge {
            to: dst as u32,
            weight,
            use_count,
            success_count,
            active: true,
        },
    );
    Ok(())
}

fn parse_pattern(brain: &mut Brain, line: &str) -> Result<(), String> {
    let mut tokens = line.split_whitespace().skip(1);
    let id: u32 = next_parsed(&mut tokens, "pattern id")?;

    let seq_start = line
        .find("seq:\"")
        .ok_or_else(|| "missing seq field".to_string())?
        + 5;
    let seq_end = line[seq_start..]
        .find('"')
        .ok_or_else(|| "unterminated seq string".to_string())?
        + seq_start;
    let slots = parse_slots(&line[seq_start..seq_end])?;
    if slots.len() < 2 {
        return Err("pattern shorter than two slots".to_string());
    }

    let tail = &line[seq_end + 1..];
    let mut tokens = tail.split_whitespace();
    let strength: f32 = field_parsed(&mut tokens, "strength")?;
    let attempts: u64 = field_parsed(&mut tokens, "attempts")?;
    let successes: u64 = field_parsed(&mut tokens, "successes")?;
    if successes > attempts {
        return Err(format!(
            "successes {} exceed attempts {} on pattern {}",
            successes, attempts, id
        ));
    }
    let depth: u32 = field_parsed(&mut tokens, "depth")?;
    let parent_raw = field_raw(&mut tokens, "parent")?;
    let parent = if parent_raw == "-" {
        None
    } else {
        Some(
            parent_raw
                .parse::<u32>()
                .map_err(|e| format!("bad parent id: {}", e))?,
        )
    };
    let meaning: f32 = field_parsed(&mut tokens, "meaning")?;

    let mut pattern = Pattern::new(id, slots, strength);
    pattern.prediction_attempts = attempts;
    pattern.prediction_successes = successes;
    pattern.chain_depth = depth;
    pattern.parent = parent;
    pattern.accumulated_meaning = meaning;
    pattern.recompute_importance();

    brain
        .registry
        .insert_at(id, pattern)
        .map_err(|e| e.to_string())
}

fn parse_pred(brain: &mut Brain, line: &str) -> Result<(), String> {
    let mut tokens = line.split_whitespace().skip(1);
    let pid: u32 = next_parsed(&mut tokens, "pred pattern id")?;
    expect_arrow(&mut tokens)?;
    let node: u8 = next_parsed(&mut tokens, "pred node")?;
    let weight: f32 = field_parsed(&mut tokens, "weight")?;

    let pattern = brain
        .registry
        .get_mut(pid)
        .ok_or_else(|| format!("pred references unknown pattern {}", pid))?;
    pattern
        .predictions
        .push(crate::pattern::Prediction { node, weight });
    Ok(())
}

fn parse_pedge(brain: &mut Brain, line: &str) -> Result<(), String> {
    let mut tokens = line.split_whitespace().skip(1);
    let pid: u32 = next_parsed(&mut tokens, "pedge source id")?;
    expect_arrow(&mut tokens)?;
    let to: u32 = next_parsed(&mut tokens, "pedge target id")?;
    if pid == to {
        return Err(format!("self-loop pedge {} -> {}", pid, to));
    }
    let weight: f32 = field_parsed(&mut tokens, "weight")?;
    let use_count: u64 = field_parsed(&mut tokens, "use")?;
    let success_count: u64 = field_parsed(&mut tokens, "success")?;

    let pattern = brain
        .registry
        .get_mut(pid)
        .ok_or_else(|| format!("pedge references unknown pattern {}", pid))?;
    pattern.outgoing.push_raw(Edge {
        to,
        weight,
        use_count,
        success_count,
        active: true,
    });
    Ok(())
}

fn parse_state(brain: &mut Brain, line: &str) -> Result<(), String> {
    let mut tokens = line.split_whitespace().skip(1);
    let error: f32 = field_parsed(&mut tokens, "error")?;
    let step: u64 = field_parsed(&mut tokens, "step")?;
    brain.emergent.error_rate = error;
    brain.emergent.step = step;
    Ok(())
}

// ==================== TOKEN HELPERS ====================

fn next_parsed<'a, T: std::str::FromStr>(
    tokens: &mut impl Iterator<Item = &'a str>,
    what: &str,
) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    let token = tokens
        .next()
        .ok_or_else(|| format!("missing {}", what))?;
    token
        .parse::<T>()
        .map_err(|e| format!("bad {}: {}", what, e))
}

fn field_raw<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    key: &str,
) -> Result<&'a str, String> {
    let token = tokens
        .next()
        .ok_or_else(|| format!("missing field {}", key))?;
    token
        .strip_prefix(key)
        .and_then(|rest| rest.strip_prefix(':'))
        .ok_or_else(|| format!("expected field {}, found {}", key, token))
}

fn field_parsed<'a, T: std::str::FromStr>(
    tokens: &mut impl Iterator<Item = &'a str>,
    key: &str,
) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    let raw = field_raw(tokens, key)?;
    raw.parse::<T>()
        .map_err(|e| format!("bad field {}: {}", key, e))
}

fn expect_arrow<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> Result<(), String> {
    match tokens.next() {
        Some("->") => Ok(()),
        other => Err(format!("expected '->', found {:?}", other)),
    }
}

// ==================== SEQUENCE ESCAPING ====================

/// Render a slot sequence: `_` for blanks, printable ASCII as-is, and
/// everything escape-significant as `\xNN`.
pub(crate) fn format_slots(slots: &[Slot]) -> String {
    let mut out = String::new();
    for slot in slots {
        match slot {
            Slot::Blank => out.push('_'),
            Slot::Byte(b) => {
                if needs_escape(*b) {
                    let _ = write!(out, "\\x{:02x}", b);
                } else {
                    out.push(*b as char);
                }
            }
        }
    }
    out
}

/// Bytes that cannot appear raw inside the quoted sequence: anything
/// non-printable or >= 0x7f, plus the characters the format itself
/// uses (`"`, `\`, `_`, and whitespace, which would break the
/// line tokenizer).
fn needs_escape(b: u8) -> bool {
    b <= 0x20 || b >= 0x7f || b == b'"' || b == b'\\' || b == b'_'
}

/// Parse a quoted sequence body back into slots.
pub(crate) fn parse_slots(s: &str) -> Result<SmallVec<[Slot; 8]>, String> {
    let mut slots = SmallVec::new();
    let bytes = s.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                slots.push(Slot::Blank);
                i += 1;
            }
            b'\\' => {
                if i + 3 >= bytes.len() || bytes[i + 1] != b'x' {
                    return Err("bad escape in sequence".to_string());
                }
                let hex = std::str::from_utf8(&bytes[i + 2..i + 4])
                    .map_err(|_| "bad escape in sequence".to_string())?;
                let value = u8::from_str_radix(hex, 16)
                    .map_err(|_| format!("bad hex escape \\x{}", hex))?;
                slots.push(Slot::Byte(value));
                i += 4;
            }
            b => {
                if !b.is_ascii() {
                    return Err("raw non-ASCII byte in sequence".to_string());
                }
                slots.push(Slot::Byte(b));
                i += 1;
            }
        }
    }
    Ok(slots)
}
