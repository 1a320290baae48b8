// src/evaluation/aggregate.rs
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::rubric::model::{coerce_score, Criterion, Rubric};

/// Score and explanation for one criterion. `score: None` means unscored,
/// which is distinct from a real zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CriterionResult {
    pub score: Option<i64>,
    pub explanation: String,
}

impl CriterionResult {
    pub fn unscored() -> Self {
        Self::default()
    }

    pub fn is_scored(&self) -> bool {
        self.score.is_some()
    }
}

fn normalize_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Pulls one criterion out of a parsed reply. Missing or malformed fields give
/// empty values instead of failing the section; scores outside the grade range
/// are dropped.
pub fn extract_criterion(entries: &Map<String, Value>, criterion: &Criterion, section: &str) -> CriterionResult {
    let entry = entries.get(&criterion.name).or_else(|| {
        let wanted = normalize_name(&criterion.name);
        entries
            .iter()
            .find(|(k, _)| normalize_name(k) == wanted)
            .map(|(_, v)| v)
    });

    let Some(entry) = entry else {
        tracing::warn!("Reply for '{}' has no entry for '{}'", section, criterion.name);
        return CriterionResult::unscored();
    };

    let score = match entry {
        Value::Object(fields) => fields.get("score").and_then(coerce_score),
        scalar => coerce_score(scalar),
    };
    let score = match score {
        Some(s) if !criterion.grade_range.contains(s) => {
            tracing::warn!(
                "Score {} for '{}'/'{}' is outside {}, leaving it unscored",
                s,
                section,
                criterion.name,
                criterion.grade_range.describe()
            );
            None
        }
        other => other,
    };

    let explanation = match entry.get("explanation") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    CriterionResult { score, explanation }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectionResult {
    pub name: String,
    pub criteria: Vec<(String, CriterionResult)>,
}

impl SectionResult {
    pub fn get(&self, criterion: &str) -> Option<&CriterionResult> {
        self.criteria.iter().find(|(n, _)| n == criterion).map(|(_, r)| r)
    }
}

/// An attempted criterion that produced no result, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnavailableEntry {
    pub section: String,
    pub criterion: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScoreTotal {
    pub obtained: i64,
    /// Highest obtainable over the criteria that were scored.
    pub possible: i64,
}

/// Outcome of one document: section -> criterion -> result, in evaluation order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentResult {
    pub document: String,
    #[serde(serialize_with = "serialize_sections")]
    pub sections: Vec<SectionResult>,
    pub unavailable: Vec<UnavailableEntry>,
    pub total: ScoreTotal,
    /// Brief description of the overall grading, when the service gave one.
    pub overall: Option<String>,
}

impl DocumentResult {
    /// Scored criteria as `(section, criterion, result)`, in result order.
    pub fn scored(&self) -> impl Iterator<Item = (&str, &str, &CriterionResult)> {
        self.sections.iter().flat_map(|section| {
            section
                .criteria
                .iter()
                .filter(|(_, result)| result.is_scored())
                .map(move |(name, result)| (section.name.as_str(), name.as_str(), result))
        })
    }

    /// Records why no overall description could be obtained.
    pub fn mark_overall_unavailable(&mut self, section: &str, field: &str, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!("{}: '{}' unavailable: {}", self.document, section, reason);
        self.overall = None;
        self.unavailable.push(UnavailableEntry {
            section: section.to_string(),
            criterion: field.to_string(),
            reason,
        });
    }

    #[cfg(test)]
    pub fn section(&self, name: &str) -> Option<&SectionResult> {
        self.sections.iter().find(|s| s.name == name)
    }

    #[cfg(test)]
    pub fn get(&self, section: &str, criterion: &str) -> Option<&CriterionResult> {
        self.section(section).and_then(|s| s.get(criterion))
    }
}

struct CriteriaMap<'a>(&'a [(String, CriterionResult)]);

impl Serialize for CriteriaMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(name, result)| (name, result)))
    }
}

fn serialize_sections<S: Serializer>(sections: &[SectionResult], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_map(sections.iter().map(|s| (&s.name, CriteriaMap(&s.criteria))))
}

/// Collects per-criterion outcomes for one document. Nothing is visible until
/// `finish`, so an abandoned document leaves no partial result behind.
pub struct ResultAggregator {
    document: String,
    sections: Vec<SectionResult>,
    unavailable: Vec<UnavailableEntry>,
}

impl ResultAggregator {
    pub fn new(document: &str) -> Self {
        Self {
            document: document.to_string(),
            sections: Vec::new(),
            unavailable: Vec::new(),
        }
    }

    pub fn record(&mut self, section: &str, criterion: &str, result: CriterionResult) {
        let idx = match self.sections.iter().position(|s| s.name == section) {
            Some(idx) => idx,
            None => {
                self.sections.push(SectionResult {
                    name: section.to_string(),
                    criteria: Vec::new(),
                });
                self.sections.len() - 1
            }
        };
        let entry = &mut self.sections[idx];
        match entry.criteria.iter_mut().find(|(n, _)| n == criterion) {
            Some((_, existing)) => *existing = result,
            None => entry.criteria.push((criterion.to_string(), result)),
        }
    }

    pub fn mark_unavailable(&mut self, section: &str, criterion: &str, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!("'{}'/'{}' unavailable: {}", section, criterion, reason);
        self.unavailable.push(UnavailableEntry {
            section: section.to_string(),
            criterion: criterion.to_string(),
            reason,
        });
    }

    /// Builds the document result. With `require_all_sections`, every rubric
    /// section and criterion is present, unscored where nothing was obtained.
    pub fn finish(self, rubric: &Rubric, require_all_sections: bool) -> DocumentResult {
        let mut sections = self.sections;

        if require_all_sections {
            let mut filled = Vec::with_capacity(rubric.sections().len());
            for rubric_section in rubric.sections() {
                let mut section = match sections.iter().position(|s| s.name == rubric_section.name) {
                    Some(idx) => sections.remove(idx),
                    None => SectionResult {
                        name: rubric_section.name.clone(),
                        criteria: Vec::new(),
                    },
                };
                for criterion in &rubric_section.criteria {
                    if section.get(&criterion.name).is_none() {
                        section.criteria.push((criterion.name.clone(), CriterionResult::unscored()));
                    }
                }
                filled.push(section);
            }
            filled.append(&mut sections);
            sections = filled;
        }

        let mut total = ScoreTotal::default();
        for section in &sections {
            for (name, result) in &section.criteria {
                let Some(score) = result.score else { continue };
                total.obtained += score;
                total.possible += rubric
                    .section(&section.name)
                    .and_then(|s| s.criterion(name))
                    .map_or(score, |c| c.grade_range.max());
            }
        }

        DocumentResult {
            document: self.document,
            sections,
            unavailable: self.unavailable,
            total,
            overall: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rubric() -> Rubric {
        Rubric::from_value(&json!({
            "Project Overview": {"criteria": [
                {"name": "Q1", "grade_range": [0, 1]},
                {"name": "Q2", "grade_range": {"min": 0, "max": 3}}
            ]},
            "Timeline": {"criteria": [{"name": "Dates", "grade_range": [0, 1]}]}
        }))
        .unwrap()
    }

    fn entries(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn extracts_scores_defensively() {
        let rubric = rubric();
        let section = rubric.section("Project Overview").unwrap();
        let entries = entries(json!({
            "q1": {"score": "1", "explanation": " clear "},
            "Q2": {"score": 7, "explanation": "too generous"}
        }));

        let q1 = extract_criterion(&entries, &section.criteria[0], "Project Overview");
        assert_eq!(q1, CriterionResult { score: Some(1), explanation: "clear".to_string() });

        let q2 = extract_criterion(&entries, &section.criteria[1], "Project Overview");
        assert_eq!(q2.score, None, "out-of-range score must not be kept");
        assert_eq!(q2.explanation, "too generous");
    }

    #[test]
    fn missing_fields_become_empty_values() {
        let rubric = rubric();
        let section = rubric.section("Project Overview").unwrap();
        let entries = entries(json!({"Q1": {"explanation": 5}}));

        let q1 = extract_criterion(&entries, &section.criteria[0], "Project Overview");
        assert_eq!(q1, CriterionResult { score: None, explanation: "5".to_string() });
        let q2 = extract_criterion(&entries, &section.criteria[1], "Project Overview");
        assert_eq!(q2, CriterionResult::unscored());
    }

    #[test]
    fn zero_is_distinct_from_unscored() {
        let rubric = rubric();
        let criterion = &rubric.section("Timeline").unwrap().criteria[0];
        let zero = extract_criterion(&entries(json!({"Dates": {"score": 0}})), criterion, "Timeline");
        assert_eq!(zero.score, Some(0));
        assert!(zero.is_scored());
        assert!(!CriterionResult::unscored().is_scored());
    }

    #[test]
    fn sections_without_results_are_omitted() {
        let rubric = rubric();
        let mut aggregator = ResultAggregator::new("report-a");
        aggregator.record("Project Overview", "Q1", CriterionResult { score: Some(1), explanation: "ok".into() });
        aggregator.mark_unavailable("Timeline", "Dates", "no data for section");

        let result = aggregator.finish(&rubric, false);
        assert_eq!(result.sections.len(), 1);
        assert!(result.section("Timeline").is_none());
        assert_eq!(result.unavailable.len(), 1);
        assert_eq!(result.total, ScoreTotal { obtained: 1, possible: 1 });
    }

    #[test]
    fn required_sections_are_filled_unscored() {
        let rubric = rubric();
        let mut aggregator = ResultAggregator::new("report-b");
        aggregator.record("Project Overview", "Q2", CriterionResult { score: Some(2), explanation: "partly".into() });

        let result = aggregator.finish(&rubric, true);
        let names: Vec<&str> = result.sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Project Overview", "Timeline"]);
        assert_eq!(result.get("Timeline", "Dates"), Some(&CriterionResult::unscored()));
        assert_eq!(result.get("Project Overview", "Q1"), Some(&CriterionResult::unscored()));
        assert_eq!(result.get("Project Overview", "Q2").unwrap().score, Some(2));
        assert_eq!(result.total, ScoreTotal { obtained: 2, possible: 3 });
    }

    #[test]
    fn serializes_as_nested_mapping_in_order() {
        let rubric = rubric();
        let mut aggregator = ResultAggregator::new("report-c");
        aggregator.record("Timeline", "Dates", CriterionResult { score: Some(0), explanation: "none".into() });
        aggregator.record("Project Overview", "Q1", CriterionResult { score: None, explanation: String::new() });

        let value = serde_json::to_value(aggregator.finish(&rubric, false)).unwrap();
        assert_eq!(value["sections"]["Timeline"]["Dates"]["score"], 0);
        assert!(value["sections"]["Project Overview"]["Q1"]["score"].is_null());
        let keys: Vec<&String> = value["sections"].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["Timeline", "Project Overview"]);
        assert!(value["overall"].is_null());
    }

    #[test]
    fn scored_skips_unscored_criteria() {
        let rubric = rubric();
        let mut aggregator = ResultAggregator::new("report-d");
        aggregator.record("Project Overview", "Q1", CriterionResult { score: Some(1), explanation: "ok".into() });
        aggregator.record("Project Overview", "Q2", CriterionResult::unscored());
        aggregator.record("Timeline", "Dates", CriterionResult { score: Some(0), explanation: "none".into() });

        let mut result = aggregator.finish(&rubric, false);
        let scored: Vec<(&str, &str)> = result.scored().map(|(s, c, _)| (s, c)).collect();
        assert_eq!(scored, vec![("Project Overview", "Q1"), ("Timeline", "Dates")]);

        result.mark_overall_unavailable("Overall Description", "description", "service failure: timed out");
        assert_eq!(result.overall, None);
        assert_eq!(result.unavailable[0].section, "Overall Description");
    }
}
