//! Splits edited text back into candidate fragments.

use crate::render::{ESCAPE, FENCE, FragmentKind, PLACEHOLDER_OPEN, RULE_LINE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub kind: FragmentKind,
    /// Zero-based line of the edited text the candidate starts on.
    pub line: usize,
    /// The line as written, or the joined body of a fenced block.
    pub raw: String,
    /// `raw` with block markers and escapes removed; what similarity is
    /// measured on.
    pub text: String,
}

/// Splits on `\n` only, so carriage returns stay part of the line.
pub fn segment(edited: &str) -> Vec<Candidate> {
    let lines: Vec<&str> = edited.split('\n').collect();
    let mut out = Vec::new();
    let mut index = 0;

    while index < lines.len() {
        let number = index;
        let line = lines[index];
        index += 1;
        if line.trim().is_empty() {
            continue;
        }

        let (lead, body) = split_container_prefix(line);
        let closing = fence_open(body).and_then(|width| {
            lines[index..]
                .iter()
                .position(|current| fence_run(current).is_some_and(|run| run >= width))
        });
        if let Some(closing) = closing {
            let code = lines[index..index + closing]
                .iter()
                .map(|current| current.strip_prefix(lead).unwrap_or(current))
                .collect::<Vec<_>>()
                .join("\n");
            index += closing + 1;
            if !code.trim().is_empty() {
                out.push(Candidate {
                    kind: FragmentKind::Code,
                    line: number,
                    text: code.clone(),
                    raw: code,
                });
            }
            continue;
        }

        let stripped = strip_markers(line);
        if stripped.starts_with(PLACEHOLDER_OPEN) || stripped == RULE_LINE {
            continue;
        }
        out.push(Candidate {
            kind: FragmentKind::Line,
            line: number,
            raw: line.to_string(),
            text: unescape(&stripped).to_string(),
        });
    }
    out
}

/// Whether the segmenter would read `line` as something other than text:
/// a blank line, an opening fence, a macro placeholder or a rule.
pub(crate) fn reads_as_markup(line: &str) -> bool {
    if line.trim().is_empty() || fence_open(split_container_prefix(line).1).is_some() {
        return true;
    }
    let stripped = strip_markers(line);
    stripped.starts_with(PLACEHOLDER_OPEN) || stripped == RULE_LINE
}

/// Length of a line made only of backticks, if it could close a fence.
pub(crate) fn fence_run(line: &str) -> Option<usize> {
    let body = split_container_prefix(line).1.trim();
    (body.len() >= FENCE.len() && body.bytes().all(|byte| byte == b'`')).then_some(body.len())
}

pub(crate) fn unescape(text: &str) -> &str {
    text.strip_prefix(ESCAPE).unwrap_or(text)
}

fn fence_open(body: &str) -> Option<usize> {
    let width = body.len() - body.trim_start_matches('`').len();
    (width >= FENCE.len()).then_some(width)
}

/// Splits off indentation, quote markers and table cell markers.
fn split_container_prefix(line: &str) -> (&str, &str) {
    let mut rest = line;
    loop {
        let trimmed = rest.trim_start();
        if let Some(after) = trimmed.strip_prefix('>') {
            rest = after;
        } else if let Some(after) = trimmed.strip_prefix('|') {
            rest = after;
        } else {
            rest = trimmed;
            break;
        }
    }
    let lead_len = line.len() - rest.len();
    (&line[..lead_len], rest)
}

/// Removes quote, table, heading and list markers from a rendered line.
pub fn strip_markers(line: &str) -> String {
    let (_, body) = split_container_prefix(line);
    let mut text = body.trim();

    let hashes = text.len() - text.trim_start_matches('#').len();
    if (1..=6).contains(&hashes) {
        if let Some(after) = text[hashes..].strip_prefix(' ') {
            text = after.trim_start();
        }
    }

    for marker in ["- ", "* ", "+ "] {
        if let Some(after) = text.strip_prefix(marker) {
            text = after.trim_start();
            break;
        }
    }

    let digits = text.len() - text.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 {
        if let Some(after) = text[digits..].strip_prefix(". ") {
            text = after.trim_start();
        }
    }

    text.trim_end().to_string()
}
