//! Text-edit application
//!
//! Applies a server's `TextEdit` list to document content in memory.
//! Columns are UTF-16 code units, matching the position encoding LSP
//! servers speak by default.

use lsp_types::{Position, TextEdit};

/// Apply edits to content and return the assembled result.
///
/// Edits are applied in descending start order (line, then character),
/// stably for equal starts, so earlier offsets stay valid while later
/// regions are spliced. Non-overlapping edit sets therefore produce the
/// same output regardless of input order.
pub fn apply_text_edits_to_content(content: &str, edits: &[TextEdit]) -> String {
    if edits.is_empty() {
        return content.to_string();
    }

    let mut ordered: Vec<&TextEdit> = edits.iter().collect();
    ordered.sort_by(|a, b| {
        (b.range.start.line, b.range.start.character)
            .cmp(&(a.range.start.line, a.range.start.character))
    });

    let mut result = content.to_string();
    for edit in ordered {
        let start = position_to_byte_offset(&result, edit.range.start);
        let end = position_to_byte_offset(&result, edit.range.end).max(start);
        result.replace_range(start..end, &edit.new_text);
    }
    result
}

/// Byte offset of a zero-based LSP position, clamping past-the-end lines
/// and columns to the nearest valid offset.
fn position_to_byte_offset(content: &str, position: Position) -> usize {
    let mut offset = 0usize;
    for (index, line) in content.split('\n').enumerate() {
        if index as u32 == position.line {
            return offset + utf16_col_to_byte(line, position.character);
        }
        offset += line.len() + 1;
    }
    content.len()
}

/// Byte index within a line of a UTF-16 code-unit column.
fn utf16_col_to_byte(line: &str, column: u32) -> usize {
    let mut units = 0u32;
    for (byte_idx, c) in line.char_indices() {
        if units >= column {
            return byte_idx;
        }
        units += c.len_utf16() as u32;
    }
    line.len()
}
