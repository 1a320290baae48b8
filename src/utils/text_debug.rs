// src/utils/text_debug.rs
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::extractors::section::TitleMark;
use crate::utils::error::StorageError;

/// Marks every recognized title line of the reconstructed text, so segmentation
/// can be checked by eye.
pub fn annotate_sections(text: &str, marks: &[TitleMark]) -> String {
    let mut annotated = String::with_capacity(text.len() + marks.len() * 48);

    for (idx, line) in text.lines().enumerate() {
        match marks.iter().find(|m| m.line == idx) {
            Some(mark) => {
                let kind = if mark.special { "split" } else { "section" };
                annotated.push_str(&format!(">>>>> [{}: {}] line {}\n", kind, mark.title, idx));
                annotated.push_str(&format!(">>>>> {}\n", line));
            }
            None => {
                annotated.push_str(line);
                annotated.push('\n');
            }
        }
    }

    annotated
}

/// Writes the annotated copy of the text to `filename`.
pub fn save_debug_text(text: &str, marks: &[TitleMark], filename: &Path) -> Result<(), StorageError> {
    let mut file = File::create(filename)?;
    file.write_all(annotate_sections(text, marks).as_bytes())?;

    tracing::info!("Saved section debug text to {}", filename.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_lines_are_flagged() {
        let marks = vec![
            TitleMark { line: 1, title: "Project Description / Purpose".to_string(), special: true },
            TitleMark { line: 3, title: "Timeline".to_string(), special: false },
        ];
        let annotated = annotate_sections("head\nProject Description / Purpose\ndesc\nTimeline:\nMarch", &marks);
        let lines: Vec<&str> = annotated.lines().collect();
        assert_eq!(lines[0], "head");
        assert_eq!(lines[1], ">>>>> [split: Project Description / Purpose] line 1");
        assert_eq!(lines[4], ">>>>> [section: Timeline] line 3");
        assert_eq!(lines[5], ">>>>> Timeline:");
        assert_eq!(lines[6], "March");
    }
}
