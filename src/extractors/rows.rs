// src/extractors/rows.rs

// --- Imports ---
use crate::tables::{Row, Table};
use once_cell::sync::Lazy;
use regex::Regex;

// --- Constants ---
/// Extra spaces after the widest cell of a column.
const COLUMN_GUTTER: usize = 2;
/// Prefix for reflowed bullet paragraphs.
const BULLET_INDENT: &str = "   ";
/// Glyphs that start a bullet line once the line is stripped.
const BULLET_MARKERS: [&str; 6] = ["●", "•", "■", "○", "◆", "-"];

// "1." through "9." at the start of a stripped cell or sub-item
static DIGIT_MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([1-9])\.\s*").expect("Failed to compile DIGIT_MARKER_RE")
});

/// Flattens the tables returned by the table-extraction service into one
/// reading-order text stream.
///
/// Rows become single lines with cells padded to their column width, so the
/// tabular alignment survives the flattening. Rows that open a known section get
/// a paragraph break in front of them, and bullet lines are reflowed afterwards.
pub struct RowFormatter<'a> {
    break_keywords: &'a [String],
}

impl<'a> RowFormatter<'a> {
    pub fn new(break_keywords: &'a [String]) -> Self {
        Self { break_keywords }
    }

    /// Formats all tables in document order. Empty tables produce no output.
    pub fn format_tables(&self, tables: &[Table]) -> String {
        let mut formatted = String::new();

        for (idx, table) in tables.iter().enumerate() {
            if table.is_empty() {
                tracing::trace!("Skipping empty table #{}", idx);
                continue;
            }

            let widths = column_widths(table);
            for row in table {
                let line = flatten_row(row, &widths);

                // Restore the paragraph break the table layout swallowed
                if self.starts_section(&line) {
                    formatted.push_str("\n\n");
                }

                formatted.push_str(&line);
                formatted.push('\n');
            }

            // Separate tables
            formatted.push_str("\n\n");
        }

        reflow_bullets(&formatted)
    }

    fn starts_section(&self, line: &str) -> bool {
        let line = line.trim();
        self.break_keywords.iter().any(|keyword| {
            line == keyword
                || line
                    .strip_prefix(keyword.as_str())
                    .is_some_and(|rest| rest.starts_with(':'))
        })
    }
}

fn is_nested_list(cell: &str) -> bool {
    cell.contains('\n') || DIGIT_MARKER_RE.is_match(cell)
}

fn rendered_width(cell: &str) -> usize {
    let cell = cell.trim();
    if is_nested_list(cell) {
        cell.lines().map(|l| l.chars().count()).max().unwrap_or(0)
    } else {
        cell.chars().count()
    }
}

/// Widest rendered cell per column, never narrower than the column's header (its index).
fn column_widths(table: &[Row]) -> Vec<usize> {
    let columns = table.iter().map(|row| row.len()).max().unwrap_or(0);
    (0..columns)
        .map(|col| {
            table
                .iter()
                .filter_map(|row| row.get(col))
                .map(|cell| rendered_width(cell))
                .fold(col.to_string().len(), usize::max)
        })
        .collect()
}

fn pad(text: &str, width: usize) -> String {
    format!("{:<w$}", text, w = width + COLUMN_GUTTER)
}

fn flatten_row(row: &[String], widths: &[usize]) -> String {
    let mut line = String::new();

    for (col, cell) in row.iter().enumerate() {
        let content = cell.trim();
        let width = widths.get(col).copied().unwrap_or(0);

        if is_nested_list(content) {
            for sub_item in content.split('\n') {
                let stripped = sub_item.trim();
                if DIGIT_MARKER_RE.is_match(stripped) {
                    line.push_str(&DIGIT_MARKER_RE.replace(stripped, "$1. "));
                } else {
                    line.push_str(&pad(sub_item, width));
                }
            }
        } else {
            line.push_str(&pad(content, width));
        }
    }

    line.trim_end().to_string()
}

/// Joins consecutive lines that share a bullet glyph into one indented paragraph.
/// A different glyph or a non-bullet line closes the open paragraph.
pub fn reflow_bullets(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut open: Option<(&str, Vec<String>)> = None;

    for line in text.split('\n') {
        let stripped = line.trim();
        match BULLET_MARKERS.iter().find(|marker| stripped.starts_with(**marker)) {
            Some(marker) => {
                let body = stripped[marker.len()..]
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ");
                match open.as_mut() {
                    Some((current, parts)) if current == marker => {
                        if !body.is_empty() {
                            parts.push(body);
                        }
                    }
                    _ => {
                        close_bullet(&mut lines, open.take());
                        let parts = if body.is_empty() { Vec::new() } else { vec![body] };
                        open = Some((marker, parts));
                    }
                }
            }
            None => {
                close_bullet(&mut lines, open.take());
                lines.push(line.to_string());
            }
        }
    }
    close_bullet(&mut lines, open.take());

    lines.join("\n")
}

fn close_bullet(lines: &mut Vec<String>, open: Option<(&str, Vec<String>)>) {
    if let Some((marker, parts)) = open {
        lines.push(format!("{}{} {}", BULLET_INDENT, marker, parts.join(" ")));
    }
}
