// src/extractors/section.rs

// --- Imports ---
use crate::config::DisambiguationConfig;

// --- Data Structures ---
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedSection {
    pub name: String,    // Rubric section name or disambiguation name
    pub content: String, // Trimmed text between this title and the next one
    start_line: usize,   // First content line, for document ordering
}

/// Sections of one document, in document order. Names are unique.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectionMap {
    sections: Vec<ExtractedSection>,
}

impl SectionMap {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.content.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtractedSection> {
        self.sections.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn retain(&mut self, keep: impl FnMut(&ExtractedSection) -> bool) {
        self.sections.retain(keep);
    }

    /// Adds a span; a repeated name gets the new text appended to its existing span.
    fn insert(&mut self, name: &str, content: String, start_line: usize) {
        if content.is_empty() {
            tracing::debug!("Section '{}' is empty, not recorded", name);
            return;
        }
        match self.sections.iter_mut().find(|s| s.name == name) {
            Some(existing) => {
                tracing::debug!("Section '{}' repeated, appending its content", name);
                existing.content.push('\n');
                existing.content.push_str(&content);
            }
            None => self.sections.push(ExtractedSection {
                name: name.to_string(),
                content,
                start_line,
            }),
        }
    }

    fn sort_by_position(&mut self) {
        self.sections.sort_by_key(|s| s.start_line);
    }
}

/// A full-line title found in the text.
#[derive(Debug, Clone, PartialEq)]
pub struct TitleMark {
    pub line: usize,
    pub title: String,
    /// The repeated title that is split into the two disambiguation sections.
    pub special: bool,
}

/// Collapses space/tab runs, drops a trailing colon and ignores case.
fn normalize_title(line: &str) -> String {
    let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .strip_suffix(':')
        .unwrap_or(&collapsed)
        .trim_end()
        .to_lowercase()
}

/// Splits reconstructed text into named sections on full-line title matches.
pub struct SectionSegmenter<'a> {
    titles: Vec<(String, &'a str)>, // (normalized, configured)
    special: String,
    disambiguation: &'a DisambiguationConfig,
}

impl<'a> SectionSegmenter<'a> {
    pub fn new(titles: &'a [String], disambiguation: &'a DisambiguationConfig) -> Self {
        let special = normalize_title(&disambiguation.title);
        let titles = titles
            .iter()
            .map(|t| (normalize_title(t), t.as_str()))
            .filter(|(normalized, _)| !normalized.is_empty() && *normalized != special)
            .collect();
        Self {
            titles,
            special,
            disambiguation,
        }
    }

    /// All title lines in document order.
    pub fn find_titles(&self, text: &str) -> Vec<TitleMark> {
        text.lines()
            .enumerate()
            .filter_map(|(line, raw)| {
                let candidate = normalize_title(raw);
                if candidate.is_empty() {
                    return None;
                }
                if candidate == self.special {
                    return Some(TitleMark {
                        line,
                        title: self.disambiguation.title.clone(),
                        special: true,
                    });
                }
                self.titles
                    .iter()
                    .find(|(normalized, _)| *normalized == candidate)
                    .map(|(_, title)| TitleMark {
                        line,
                        title: title.to_string(),
                        special: false,
                    })
            })
            .collect()
    }

    /// Segments the text. An empty map means no title was recognized and the
    /// document cannot be evaluated.
    pub fn segment(&self, text: &str) -> SectionMap {
        let lines: Vec<&str> = text.lines().collect();
        let marks = self.find_titles(text);
        let mut map = SectionMap::default();

        if marks.is_empty() {
            tracing::warn!("No section titles recognized in {} lines of text", lines.len());
            return map;
        }

        // Lines after `pos` up to the next title of any kind
        let span_after = |pos: usize| -> (usize, usize) {
            let end = marks
                .iter()
                .map(|m| m.line)
                .find(|&l| l > pos)
                .unwrap_or(lines.len());
            (pos + 1, end)
        };
        let text_of = |(start, end): (usize, usize)| -> String {
            if start >= end {
                return String::new();
            }
            lines[start..end].join("\n").trim().to_string()
        };

        let first_name = self.disambiguation.first_name.as_str();
        let second_name = self.disambiguation.second_name.as_str();
        let specials: Vec<usize> = marks.iter().filter(|m| m.special).map(|m| m.line).collect();

        match specials.as_slice() {
            [] => {
                // Both names get the lead-in up to the first recognized title
                let span = (0, marks[0].line);
                tracing::debug!("'{}' not found, using lines {:?} for both {} and {}", self.disambiguation.title, span, first_name, second_name);
                map.insert(first_name, text_of(span), 0);
                map.insert(second_name, text_of(span), 0);
            }
            [only] => {
                let start = marks
                    .iter()
                    .map(|m| m.line)
                    .filter(|&l| l < *only)
                    .last()
                    .map_or(0, |l| l + 1);
                map.insert(first_name, text_of((start, *only)), start);
                let after = span_after(*only);
                map.insert(second_name, text_of(after), after.0);
            }
            [first, second, rest @ ..] => {
                if !rest.is_empty() {
                    tracing::warn!("'{}' occurs {} times, using the first two", self.disambiguation.title, specials.len());
                }
                let between = span_after(*first);
                map.insert(first_name, text_of(between), between.0);
                let after = span_after(*second);
                map.insert(second_name, text_of(after), after.0);
            }
        }

        for mark in marks.iter().filter(|m| !m.special) {
            let span = span_after(mark.line);
            map.insert(&mark.title, text_of(span), span.0);
        }

        map.sort_by_position();
        tracing::debug!("Segmented text into sections: {:?}", map.names());
        map
    }
}
