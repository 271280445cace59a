//! Text edit application
//!
//! Converts line/character ranges to byte offsets and applies edit lists to
//! a document. Edits are applied from the highest offset down so earlier
//! offsets stay valid regardless of declaration order. Overlapping ranges
//! are rejected before anything is mutated.

use crate::{Error, Result};
use bridge_protocol::{Position, TextEdit};

/// Byte offset of a position. Characters count Unicode scalar values;
/// positions past the end of a line clamp to the line end, and lines past
/// the end of the document clamp to the document end.
pub fn position_to_offset(text: &str, position: Position) -> usize {
    let mut offset = 0usize;
    let mut line = 0u32;

    for segment in text.split_inclusive('\n') {
        if line == position.line {
            let content = segment.strip_suffix('\n').unwrap_or(segment);
            let in_line: usize = content
                .chars()
                .take(position.character as usize)
                .map(char::len_utf8)
                .sum();
            return offset + in_line;
        }
        offset += segment.len();
        line += 1;
    }

    // Position on the line just past the final newline (or an empty doc).
    if line == position.line {
        return offset;
    }
    text.len()
}

/// Apply a list of ranged edits to `text` and return the resulting string.
///
/// Insensitive to edit declaration order: edits are sorted by start offset
/// and applied highest-first. Ranges that overlap each other are rejected,
/// since a stale offset into an already-replaced region has no consistent
/// meaning.
pub fn apply_edits(text: &str, edits: &[TextEdit]) -> Result<String> {
    let mut resolved: Vec<(usize, usize, &str)> = Vec::with_capacity(edits.len());

    for edit in edits {
        let start = position_to_offset(text, edit.range.start);
        let end = position_to_offset(text, edit.range.end);
        if start > end {
            return Err(Error::InvalidParams(format!(
                "edit range is inverted: {}:{} > {}:{}",
                edit.range.start.line,
                edit.range.start.character,
                edit.range.end.line,
                edit.range.end.character
            )));
        }
        resolved.push((start, end, edit.new_text.as_str()));
    }

    // Stable so equal ranges keep declaration order.
    resolved.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    for pair in resolved.windows(2) {
        if pair[0].1 > pair[1].0 {
            return Err(Error::InvalidParams(format!(
                "edit ranges overlap at byte offset {}",
                pair[1].0
            )));
        }
    }

    // Highest offset first, so lower offsets are unaffected by the splices.
    let mut result = text.to_string();
    for (start, end, new_text) in resolved.iter().rev() {
        result.replace_range(*start..*end, new_text);
    }

    Ok(result)
}
