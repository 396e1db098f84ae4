//! Deterministic application of workspace edits to files on disk.
//!
//! A [`WorkspaceEdit`] arrives as line/character ranges against the current
//! file contents. Edits are applied per document in descending position
//! order: working from the bottom of the document upward means applying one
//! edit never shifts the coordinates of the edits still to come, so no
//! offset bookkeeping is needed.
//!
//! In preview mode nothing is written; a `-old`/`+new` report of changed
//! lines goes to the supplied writer instead.

use std::io::Write;

use anyhow::{Context, Result};
use tracing::warn;
use url::Url;

use crate::protocol::{TextEdit, WorkspaceEdit};

/// Apply every per-document batch of a workspace edit.
///
/// Documents are processed independently: a missing or unreadable document
/// aborts its own batch, and documents already written are not rolled back.
/// With `preview` set, the diff report for each document is written to
/// `out` and no file is touched.
pub fn apply_workspace_edit<W: Write>(
    edit: &WorkspaceEdit,
    preview: bool,
    out: &mut W,
) -> Result<()> {
    for (uri, edits) in edit.normalized() {
        apply_text_edits(&uri, &edits, preview, out)
            .with_context(|| format!("failed to apply changes to {}", uri))?;
    }
    Ok(())
}

/// Apply one document's edits, writing back or previewing.
fn apply_text_edits<W: Write>(
    uri: &str,
    edits: &[TextEdit],
    preview: bool,
    out: &mut W,
) -> Result<()> {
    let file_path = uri_to_file_path(uri);

    let content = std::fs::read_to_string(&file_path)
        .with_context(|| format!("failed to read file {}", file_path))?;

    let modified = apply_edits_to_content(&content, edits);

    if preview {
        write_preview(out, &file_path, &content, &modified)
            .context("failed to write preview")?;
    } else {
        std::fs::write(&file_path, &modified)
            .with_context(|| format!("failed to write file {}", file_path))?;
    }

    Ok(())
}

/// Apply a batch of edits to document content.
///
/// Edits are sorted in descending (start line, start character) order and
/// applied in that order, bottom of the document first, so earlier
/// positions stay valid throughout. An empty batch returns the content
/// unchanged.
pub fn apply_edits_to_content(content: &str, edits: &[TextEdit]) -> String {
    if edits.is_empty() {
        return content.to_string();
    }

    let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();

    let mut sorted: Vec<&TextEdit> = edits.iter().collect();
    sorted.sort_by(|a, b| {
        (b.range.start.line, b.range.start.character)
            .cmp(&(a.range.start.line, a.range.start.character))
    });

    for edit in sorted {
        lines = apply_edit_to_lines(lines, edit);
    }

    lines.join("\n")
}

/// Apply a single text edit to a line sequence.
///
/// Single-line edits replace the substring between the start and end
/// characters. An edit whose offsets fall outside the target line, or land
/// inside a multibyte character, is skipped rather than partially applied;
/// the skip is logged since a dropped edit may desynchronize the caller's
/// expectations.
///
/// Multi-line edits splice `prefix + new_text + suffix` as one line in
/// place of the whole inclusive line range.
fn apply_edit_to_lines(mut lines: Vec<String>, edit: &TextEdit) -> Vec<String> {
    let start_line = edit.range.start.line as usize;
    let start_char = edit.range.start.character as usize;
    let end_line = edit.range.end.line as usize;
    let end_char = edit.range.end.character as usize;

    // Single line edit
    if start_line == end_line {
        if start_line < lines.len() {
            let line = &lines[start_line];
            // is_char_boundary is false past the end of the line too, so
            // this covers both out-of-bounds and mid-character offsets.
            if line.is_char_boundary(start_char) && line.is_char_boundary(end_char) {
                let mut new_line = String::with_capacity(line.len() + edit.new_text.len());
                new_line.push_str(&line[..start_char]);
                new_line.push_str(&edit.new_text);
                new_line.push_str(&line[end_char..]);
                lines[start_line] = new_line;
            } else {
                warn!(
                    "Skipping edit with invalid offsets at line {} ({}..{} on {}-byte line)",
                    start_line,
                    start_char,
                    end_char,
                    line.len()
                );
            }
        }
        return lines;
    }

    // Multi-line edit
    if start_line < lines.len() && end_line < lines.len() {
        let first = &lines[start_line];
        let last = &lines[end_line];

        if (start_char < first.len() && !first.is_char_boundary(start_char))
            || (end_char < last.len() && !last.is_char_boundary(end_char))
        {
            warn!(
                "Skipping multi-line edit with offsets inside a character (lines {}..{})",
                start_line, end_line
            );
            return lines;
        }

        let prefix = if start_char < first.len() {
            &first[..start_char]
        } else {
            ""
        };

        let suffix = if end_char < last.len() {
            &last[end_char..]
        } else {
            ""
        };

        let new_content = format!("{}{}{}", prefix, edit.new_text, suffix);

        let mut result = Vec::with_capacity(lines.len() - (end_line - start_line));
        result.extend_from_slice(&lines[..start_line]);
        result.push(new_content);
        result.extend_from_slice(&lines[end_line + 1..]);
        return result;
    }

    warn!(
        "Skipping multi-line edit out of bounds (lines {}..{} of {})",
        start_line,
        end_line,
        lines.len()
    );
    lines
}

/// Emit a unified-diff-like report of the change, without touching disk.
fn write_preview<W: Write>(
    out: &mut W,
    file_path: &str,
    original: &str,
    modified: &str,
) -> std::io::Result<()> {
    writeln!(out, "--- {}", file_path)?;
    writeln!(out, "+++ {}", file_path)?;

    let original_lines: Vec<&str> = original.split('\n').collect();
    let modified_lines: Vec<&str> = modified.split('\n').collect();

    for (i, line) in original_lines.iter().enumerate() {
        if i < modified_lines.len() {
            if *line != modified_lines[i] {
                writeln!(out, "-{}", line)?;
                writeln!(out, "+{}", modified_lines[i])?;
            }
        } else {
            writeln!(out, "-{}", line)?;
        }
    }

    // Lines appended past the end of the original
    for line in modified_lines.iter().skip(original_lines.len()) {
        writeln!(out, "+{}", line)?;
    }

    writeln!(out)
}

/// Convert a file URI to a file path.
///
/// Proper URI parsing handles percent-encoded characters (a workspace path
/// with a space arrives as `%20`); bare paths and unparseable inputs fall
/// back to stripping the `file://` scheme.
pub fn uri_to_file_path(uri: &str) -> String {
    if let Ok(url) = Url::parse(uri) {
        if let Ok(path) = url.to_file_path() {
            return path.to_string_lossy().into_owned();
        }
    }
    match uri.strip_prefix("file://") {
        Some(path) => path.to_string(),
        None => uri.to_string(),
    }
}
