//! Change detection between rendered fragments and edited text.
//!
//! Edited text is segmented into candidates, candidates are aligned to the
//! original fragments in document order, and every aligned pair whose text
//! differs becomes one or more [`ChangeRecord`]s. Alignment only pairs a
//! fragment with a candidate whose word overlap reaches the configured
//! minimum; anything that cannot be placed is reported as a
//! [`MatchWarning`] instead of being guessed.

use crate::render::{Fragment, FragmentKind, TextSpan, group_text_nodes};
use crate::tree::NodePath;
use crate::tree::extract::TextNodeRef;
use crate::tree::patch::ChangeRecord;
use serde::{Deserialize, Serialize};

pub mod segment;

pub use segment::{Candidate, segment};

use segment::unescape;

/// Similarity in basis points: 10000 means identical word sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Score(pub u32);

impl Score {
    pub const ZERO: Score = Score(0);
    pub const IDENTICAL: Score = Score(10000);

    /// Converts a ratio in `0.0..=1.0` to basis points.
    pub fn from_ratio(ratio: f64) -> Self {
        Score((ratio.clamp(0.0, 1.0) * 10000.0).round() as u32)
    }

    pub fn as_ratio(self) -> f64 {
        f64::from(self.0) / 10000.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchConfig {
    pub min_overlap: Score,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            min_overlap: Score(3000),
        }
    }
}

/// Case-folded, deduplicated word hashes of a text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordSet {
    tokens: Vec<u64>,
}

impl WordSet {
    pub fn from_text(text: &str) -> Self {
        let mut tokens: Vec<u64> = text
            .split_whitespace()
            .map(|word| stable_hash_string(&word.to_lowercase()))
            .collect();
        tokens.sort_unstable();
        tokens.dedup();
        Self { tokens }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }
}

/// `|A ∩ B| / |A ∪ B|` over word sets. Empty input scores zero.
pub fn similarity(a: &WordSet, b: &WordSet) -> Score {
    if a.tokens.is_empty() || b.tokens.is_empty() {
        return Score::ZERO;
    }
    let mut i = 0usize;
    let mut j = 0usize;
    let mut intersection = 0u64;
    let mut union = 0u64;
    while i < a.tokens.len() && j < b.tokens.len() {
        match a.tokens[i].cmp(&b.tokens[j]) {
            std::cmp::Ordering::Equal => {
                intersection += 1;
                union += 1;
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Less => {
                union += 1;
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                union += 1;
                j += 1;
            }
        }
    }
    union += (a.tokens.len() - i + b.tokens.len() - j) as u64;
    Score(((intersection * 10000) / union) as u32)
}

pub fn word_overlap(a: &str, b: &str) -> Score {
    similarity(&WordSet::from_text(a), &WordSet::from_text(b))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchWarning {
    /// No edited text aligned with this fragment; its nodes were left alone.
    AmbiguousMatch {
        paths: Vec<NodePath>,
        text: String,
        best_score: Score,
    },
    /// Edited text with no original fragment to land in.
    UnplacedText { text: String },
    /// The edit crosses node boundaries in a way that would empty a node.
    SpansMultipleNodes {
        paths: Vec<NodePath>,
        old_text: String,
        new_text: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub changes: Vec<ChangeRecord>,
    pub warnings: Vec<MatchWarning>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Detects changes against bare text nodes, grouping siblings into lines.
pub fn detect_text_node_changes(
    original: &[TextNodeRef],
    edited: &str,
    config: &MatchConfig,
) -> ChangeSet {
    detect_changes(&group_text_nodes(original), edited, config)
}

pub fn detect_changes(fragments: &[Fragment], edited: &str, config: &MatchConfig) -> ChangeSet {
    let candidates = segment(edited);
    let scores = score_matrix(fragments, &candidates);
    let pairs = align(fragments, &scores, candidates.len(), config.min_overlap);

    let mut result = ChangeSet::default();
    let mut used = vec![false; candidates.len()];
    let mut paired: Vec<Option<usize>> = vec![None; fragments.len()];
    for &(fragment_idx, start) in &pairs {
        paired[fragment_idx] = Some(start);
        let end = start + fragments[fragment_idx].line_count();
        for flag in &mut used[start..end] {
            *flag = true;
        }
    }

    for (fragment_idx, fragment) in fragments.iter().enumerate() {
        let new_text = paired[fragment_idx].and_then(|start| edited_text(fragment, &candidates, start));
        let Some(new_text) = new_text else {
            // Blank fragments have no words and can never be matched.
            if fragment.text.trim().is_empty() {
                continue;
            }
            let best_score = scores[fragment_idx]
                .iter()
                .map(|pairing| pairing.map_or(Score::ZERO, |p| p.score))
                .max()
                .unwrap_or(Score::ZERO);
            tracing::debug!(text = %fragment.text, best = best_score.0, "fragment left unmatched");
            result.warnings.push(MatchWarning::AmbiguousMatch {
                paths: fragment.paths().cloned().collect(),
                text: fragment.text.clone(),
                best_score,
            });
            continue;
        };

        if new_text == fragment.text || new_text.trim() == fragment.text.trim() {
            continue;
        }
        match distribute(fragment, &new_text) {
            Some(mut records) => result.changes.append(&mut records),
            None => result.warnings.push(MatchWarning::SpansMultipleNodes {
                paths: fragment.paths().cloned().collect(),
                old_text: fragment.text.clone(),
                new_text,
            }),
        }
    }

    for (candidate, used) in candidates.iter().zip(&used) {
        if !used && !candidate.text.trim().is_empty() {
            result.warnings.push(MatchWarning::UnplacedText {
                text: candidate.text.clone(),
            });
        }
    }

    result
}

#[derive(Debug, Clone, Copy)]
struct Pairing {
    score: Score,
    exact: bool,
}

/// Scores every fragment against every run of candidates it could take,
/// indexed by the first candidate of the run.
fn score_matrix(fragments: &[Fragment], candidates: &[Candidate]) -> Vec<Vec<Option<Pairing>>> {
    fragments
        .iter()
        .map(|fragment| {
            let words = WordSet::from_text(&fragment.text);
            (0..candidates.len())
                .map(|start| {
                    let text = edited_text(fragment, candidates, start)?;
                    Some(Pairing {
                        score: similarity(&words, &WordSet::from_text(&text)),
                        exact: text == fragment.text,
                    })
                })
                .collect()
        })
        .collect()
}

/// Order-preserving alignment maximizing the summed score of pairs.
///
/// A weighted longest common subsequence in which a fragment rendered over
/// several lines consumes that many consecutive candidates. Pairs below
/// `min_overlap` are not allowed, so a fragment without a viable partner
/// stays unmatched. Exact matches win ties; the backtrack then prefers
/// pairing, then dropping the fragment. Returns `(fragment, first candidate)`.
fn align(
    fragments: &[Fragment],
    scores: &[Vec<Option<Pairing>>],
    m: usize,
    min_overlap: Score,
) -> Vec<(usize, usize)> {
    let n = fragments.len();
    let width = m + 1;
    let mut table = vec![0u64; (n + 1) * width];
    let allowed = |i: usize, j: usize| -> Option<(usize, u64)> {
        let start = j.checked_sub(fragments[i].line_count())?;
        let pairing = scores[i][start]?;
        (pairing.score >= min_overlap && pairing.score > Score::ZERO)
            .then_some((start, u64::from(pairing.score.0) * 2 + u64::from(pairing.exact)))
    };

    for i in 1..=n {
        for j in 1..=m {
            let mut best = table[(i - 1) * width + j].max(table[i * width + j - 1]);
            if let Some((start, weight)) = allowed(i - 1, j) {
                best = best.max(table[(i - 1) * width + start] + weight);
            }
            table[i * width + j] = best;
        }
    }

    let mut pairs = Vec::new();
    let (mut i, mut j) = (n, m);
    while i > 0 && j > 0 {
        let here = table[i * width + j];
        if let Some((start, weight)) = allowed(i - 1, j) {
            if here == table[(i - 1) * width + start] + weight {
                pairs.push((i - 1, start));
                i -= 1;
                j = start;
                continue;
            }
        }
        if here == table[(i - 1) * width + j] {
            i -= 1;
        } else {
            j -= 1;
        }
    }
    pairs.reverse();
    pairs
}

/// The text `fragment` would take if paired with the candidates starting at
/// `start`, or `None` when those candidates cannot stand for it.
fn edited_text(fragment: &Fragment, candidates: &[Candidate], start: usize) -> Option<String> {
    let group = candidates.get(start..start + fragment.line_count())?;
    if group.iter().any(|candidate| candidate.kind != fragment.kind) {
        return None;
    }
    if group.windows(2).any(|pair| pair[1].line != pair[0].line + 1) {
        return None;
    }

    // Carriage returns the original never had are editor noise.
    let keep_cr = fragment.text.contains('\r');
    let clean = |piece: &str| -> String {
        if keep_cr {
            piece.to_string()
        } else {
            piece.strip_suffix('\r').unwrap_or(piece).to_string()
        }
    };

    let pieces: Vec<String> = match fragment.kind {
        FragmentKind::Code => group[0].raw.split('\n').map(clean).collect(),
        FragmentKind::Line => group
            .iter()
            .enumerate()
            .map(|(index, candidate)| {
                let lead = if index == 0 {
                    fragment.prefix.as_deref()
                } else {
                    fragment.continuation.as_deref()
                };
                let piece = lead
                    .and_then(|lead| candidate.raw.strip_prefix(lead))
                    .map(unescape)
                    .unwrap_or(candidate.text.as_str());
                clean(piece)
            })
            .collect(),
    };
    Some(pieces.join("\n"))
}

/// Maps a fragment-level edit back onto the text nodes it spans.
///
/// Returns `None` when the edit would leave one of the nodes empty, or
/// reaches into text standing in for a non-text inline node.
fn distribute(fragment: &Fragment, new_text: &str) -> Option<Vec<ChangeRecord>> {
    let old_text = fragment.text.as_str();

    if let [span] = fragment.spans.as_slice() {
        if span.start == 0 && span.end == old_text.len() {
            return Some(vec![ChangeRecord {
                path: span.path.clone(),
                old_text: old_text.to_string(),
                new_text: new_text.to_string(),
            }]);
        }
    }

    let (prefix_len, suffix_len) = common_affixes(old_text, new_text);
    let start = prefix_len;
    let end = old_text.len() - suffix_len;
    let replacement = &new_text[prefix_len..new_text.len() - suffix_len];
    if touches_inline_literal(fragment, start, end) {
        return None;
    }

    let affected: Vec<&TextSpan> = if start == end {
        fragment
            .spans
            .iter()
            .find(|span| span.start <= start && start <= span.end)
            .into_iter()
            .collect()
    } else {
        fragment
            .spans
            .iter()
            .filter(|span| span.start < end && span.end > start)
            .collect()
    };

    let (first, last) = match (affected.first(), affected.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return None,
    };

    let mut records = Vec::new();
    for &span in &affected {
        let current = span_text(old_text, span);
        let mut updated = String::new();
        if std::ptr::eq(span, first) {
            updated.push_str(&current[..start - span.start]);
            updated.push_str(replacement);
        }
        if std::ptr::eq(span, last) {
            updated.push_str(&current[end.max(span.start) - span.start..]);
        }
        if updated.is_empty() {
            return None;
        }
        if updated != current {
            records.push(ChangeRecord {
                path: span.path.clone(),
                old_text: current.to_string(),
                new_text: updated,
            });
        }
    }
    Some(records)
}

/// Whether `start..end` of the fragment text overlaps a gap between spans.
/// An empty range only counts when it falls strictly inside a gap.
fn touches_inline_literal(fragment: &Fragment, start: usize, end: usize) -> bool {
    let mut covered = 0;
    let mut gaps = Vec::new();
    for span in &fragment.spans {
        if span.start > covered {
            gaps.push((covered, span.start));
        }
        covered = span.end;
    }
    if covered < fragment.text.len() {
        gaps.push((covered, fragment.text.len()));
    }
    gaps.iter().any(|&(gap_start, gap_end)| {
        if start == end {
            gap_start < start && start < gap_end
        } else {
            start < gap_end && end > gap_start
        }
    })
}

fn span_text<'a>(text: &'a str, span: &TextSpan) -> &'a str {
    &text[span.start..span.end]
}

/// Byte lengths of the longest common prefix and suffix, on char boundaries
/// and never overlapping in the shorter string.
fn common_affixes(a: &str, b: &str) -> (usize, usize) {
    let prefix: usize = a
        .chars()
        .zip(b.chars())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x.len_utf8())
        .sum();

    let limit = a.len().min(b.len()) - prefix;
    let mut suffix = 0;
    for (x, y) in a.chars().rev().zip(b.chars().rev()) {
        if x != y || suffix + x.len_utf8() > limit {
            break;
        }
        suffix += x.len_utf8();
    }
    (prefix, suffix)
}

fn stable_hash_string(value: &str) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x00000100000001b3;
    let mut hash = FNV_OFFSET;
    for byte in value.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
