// src/rubric/model.rs
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

use crate::utils::error::RubricError;

/// Scores a criterion accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeRange {
    /// An explicit set, e.g. `[0, 1]`.
    Discrete(Vec<i64>),
    /// Every integer in `min..=max`.
    Bounded { min: i64, max: i64 },
}

impl GradeRange {
    pub fn contains(&self, score: i64) -> bool {
        match self {
            GradeRange::Discrete(values) => values.contains(&score),
            GradeRange::Bounded { min, max } => (*min..=*max).contains(&score),
        }
    }

    pub fn max(&self) -> i64 {
        match self {
            GradeRange::Discrete(values) => values.iter().copied().max().unwrap_or(0),
            GradeRange::Bounded { max, .. } => *max,
        }
    }

    /// Human-readable form used in prompts.
    pub fn describe(&self) -> String {
        match self {
            GradeRange::Discrete(values) => {
                let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                format!("one of {}", values.join(", "))
            }
            GradeRange::Bounded { min, max } => format!("an integer from {} to {}", min, max),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkedExample {
    pub input: String,
    pub score: i64,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Criterion {
    pub name: String,
    pub grade_range: GradeRange,
    pub examples: Vec<WorkedExample>,
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RubricSection {
    pub name: String,
    pub criteria: Vec<Criterion>,
}

impl RubricSection {
    pub fn criterion(&self, name: &str) -> Option<&Criterion> {
        self.criteria.iter().find(|c| c.name == name)
    }
}

/// Validated rubric: sections in definition order, each with its criteria.
/// Built once per run and shared read-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rubric {
    sections: Vec<RubricSection>,
}

/// Reads a score from loosely typed data: integers, integral floats and numeric strings.
pub fn coerce_score(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }
}

impl Rubric {
    /// Loads a rubric file; `.yaml`/`.yml` are read as YAML, everything else as JSON.
    pub fn from_path(path: &Path) -> Result<Self, RubricError> {
        let raw = std::fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

        let rubric = if is_yaml {
            Self::from_yaml_str(&raw)?
        } else {
            Self::from_json_str(&raw)?
        };
        tracing::info!(
            "Loaded rubric {} with {} sections and {} criteria",
            path.display(),
            rubric.sections.len(),
            rubric.criterion_count()
        );
        Ok(rubric)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, RubricError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| RubricError::Parse(e.to_string()))?;
        Self::from_value(&value)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, RubricError> {
        let value: Value =
            serde_yaml::from_str(raw).map_err(|e| RubricError::Parse(e.to_string()))?;
        Self::from_value(&value)
    }

    /// Validates the loosely typed definition: section name -> `{ "criteria": [...] }`.
    pub fn from_value(value: &Value) -> Result<Self, RubricError> {
        let root = value.as_object().ok_or_else(|| {
            RubricError::Structure("top level must be a mapping of section name to section".to_string())
        })?;
        if root.is_empty() {
            return Err(RubricError::Structure("rubric defines no sections".to_string()));
        }

        let sections = root
            .iter()
            .map(|(name, section)| parse_section(name, section))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { sections })
    }

    pub fn sections(&self) -> &[RubricSection] {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Option<&RubricSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn criterion_count(&self) -> usize {
        self.sections.iter().map(|s| s.criteria.len()).sum()
    }
}

// --- Raw definition ---
// Deserialized as written, then validated into the types above.

#[derive(Debug, Deserialize)]
struct RawSection {
    criteria: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawCriterion {
    name: String,
    grade_range: Option<RawGradeRange>,
    examples: Option<Vec<RawExample>>,
    instructions: Option<RawInstructions>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawGradeRange {
    Values(Vec<Value>),
    Bounds { min: Value, max: Value },
}

#[derive(Debug, Deserialize)]
struct RawExample {
    input: String,
    score: Value,
    #[serde(default)]
    explanation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawInstructions {
    Text(String),
    Lines(Vec<String>),
}

fn section_error(section: &str, reason: impl Into<String>) -> RubricError {
    RubricError::Section {
        section: section.to_string(),
        reason: reason.into(),
    }
}

fn parse_section(name: &str, value: &Value) -> Result<RubricSection, RubricError> {
    if name.trim().is_empty() {
        return Err(section_error(name, "section name is empty"));
    }
    let raw = RawSection::deserialize(value).map_err(|e| section_error(name, e.to_string()))?;
    if raw.criteria.is_empty() {
        return Err(section_error(name, "'criteria' is empty"));
    }

    let mut seen = HashSet::new();
    let mut parsed = Vec::with_capacity(raw.criteria.len());
    for (index, criterion) in raw.criteria.iter().enumerate() {
        let criterion = parse_criterion(name, index, criterion)?;
        if !seen.insert(criterion.name.clone()) {
            return Err(RubricError::Criterion {
                section: name.to_string(),
                index,
                reason: format!("duplicate criterion name '{}'", criterion.name),
            });
        }
        parsed.push(criterion);
    }

    Ok(RubricSection {
        name: name.to_string(),
        criteria: parsed,
    })
}

fn parse_criterion(section: &str, index: usize, value: &Value) -> Result<Criterion, RubricError> {
    let fail = |reason: String| RubricError::Criterion {
        section: section.to_string(),
        index,
        reason,
    };

    let raw = RawCriterion::deserialize(value).map_err(|e| fail(e.to_string()))?;
    let name = raw.name.trim().to_string();
    if name.is_empty() {
        return Err(fail("criterion name is empty".to_string()));
    }

    let grade_range = raw
        .grade_range
        .ok_or_else(|| fail(format!("criterion '{}' is missing 'grade_range'", name)))
        .and_then(|r| validate_grade_range(r).map_err(|reason| fail(format!("criterion '{}': {}", name, reason))))?;

    let examples = raw
        .examples
        .unwrap_or_default()
        .into_iter()
        .map(|example| validate_example(example, &grade_range))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|reason| fail(format!("criterion '{}': {}", name, reason)))?;

    let instructions = match raw.instructions {
        None => None,
        Some(RawInstructions::Text(text)) => Some(text.trim().to_string()),
        Some(RawInstructions::Lines(lines)) => Some(lines.join("\n")),
    }
    .filter(|s| !s.is_empty());

    Ok(Criterion {
        name,
        grade_range,
        examples,
        instructions,
    })
}

fn validate_grade_range(raw: RawGradeRange) -> Result<GradeRange, String> {
    match raw {
        RawGradeRange::Values(items) => {
            let mut values = items
                .iter()
                .map(|v| coerce_score(v).ok_or_else(|| format!("grade value {} is not an integer", v)))
                .collect::<Result<Vec<_>, _>>()?;
            values.sort_unstable();
            values.dedup();
            if values.is_empty() {
                return Err("'grade_range' has no values".to_string());
            }
            Ok(GradeRange::Discrete(values))
        }
        RawGradeRange::Bounds { min, max } => {
            let bound = |key: &str, value: &Value| {
                coerce_score(value).ok_or_else(|| format!("'grade_range.{}' must be an integer", key))
            };
            let min = bound("min", &min)?;
            let max = bound("max", &max)?;
            if min > max {
                return Err(format!("'grade_range' min {} exceeds max {}", min, max));
            }
            Ok(GradeRange::Bounded { min, max })
        }
    }
}

fn validate_example(raw: RawExample, range: &GradeRange) -> Result<WorkedExample, String> {
    let score = coerce_score(&raw.score).ok_or("example is missing an integer 'score'")?;
    if !range.contains(score) {
        return Err(format!("example score {} is outside the grade range", score));
    }
    Ok(WorkedExample {
        input: raw.input,
        score,
        explanation: raw.explanation.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "Project Overview": {
                "criteria": [
                    {
                        "name": "Problem statement",
                        "grade_range": [1, 0],
                        "examples": [
                            {"input": "Scrap is 12% on line 4.", "score": 1, "explanation": "Quantified problem."},
                            {"input": "Things are bad.", "score": "0", "explanation": "Vague."}
                        ],
                        "instructions": ["Look for numbers.", "Ignore formatting."]
                    },
                    {"name": "Benefits", "grade_range": {"min": 0, "max": 3}}
                ]
            },
            "Timeline": {
                "criteria": [{"name": "Dates", "grade_range": [0, 1]}]
            }
        })
    }

    #[test]
    fn loads_sections_in_definition_order() {
        let rubric = Rubric::from_value(&sample()).unwrap();
        let names: Vec<&str> = rubric.sections().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Project Overview", "Timeline"]);
        assert_eq!(rubric.criterion_count(), 3);

        let overview = rubric.section("Project Overview").unwrap();
        let problem = overview.criterion("Problem statement").unwrap();
        assert_eq!(problem.grade_range, GradeRange::Discrete(vec![0, 1]));
        assert_eq!(problem.examples.len(), 2);
        assert_eq!(problem.examples[1].score, 0);
        assert_eq!(problem.instructions.as_deref(), Some("Look for numbers.\nIgnore formatting."));

        let benefits = overview.criterion("Benefits").unwrap();
        assert_eq!(benefits.grade_range, GradeRange::Bounded { min: 0, max: 3 });
        assert!(benefits.grade_range.contains(2));
        assert!(!benefits.grade_range.contains(4));
        assert_eq!(benefits.grade_range.describe(), "an integer from 0 to 3");
    }

    #[test]
    fn missing_grade_range_fails_load() {
        let value = json!({"Timeline": {"criteria": [{"name": "Dates"}]}});
        let err = Rubric::from_value(&value).unwrap_err();
        assert!(matches!(err, RubricError::Criterion { index: 0, .. }), "{:?}", err);
        assert!(err.to_string().contains("grade_range"));
    }

    #[test]
    fn missing_name_fails_load() {
        let value = json!({"Timeline": {"criteria": [{"grade_range": [0, 1]}]}});
        let err = Rubric::from_value(&value).unwrap_err();
        assert!(matches!(err, RubricError::Criterion { index: 0, .. }), "{:?}", err);
        assert!(err.to_string().contains("name"), "{}", err);
    }

    #[test]
    fn structural_violations_fail_load() {
        assert!(matches!(
            Rubric::from_value(&json!(["not", "a", "mapping"])),
            Err(RubricError::Structure(_))
        ));
        assert!(matches!(
            Rubric::from_value(&json!({"Timeline": {"items": []}})),
            Err(RubricError::Section { .. })
        ));
        assert!(Rubric::from_value(&json!({
            "Timeline": {"criteria": [
                {"name": "Dates", "grade_range": [0, 1]},
                {"name": "Dates", "grade_range": [0, 1]}
            ]}
        }))
        .is_err());
        assert!(Rubric::from_value(&json!({
            "Timeline": {"criteria": [{"name": "Dates", "grade_range": {"min": 3, "max": 1}}]}
        }))
        .is_err());
        assert!(Rubric::from_value(&json!({
            "Timeline": {"criteria": [{"name": "Dates", "grade_range": [0, 1],
                "examples": [{"input": "x", "score": 5}]}]}
        }))
        .is_err());
    }

    #[test]
    fn wrongly_typed_fields_name_their_criterion() {
        let value = json!({
            "Timeline": {"criteria": [
                {"name": "Dates", "grade_range": [0, 1]},
                {"name": "Owner", "grade_range": [0, 1], "instructions": 5}
            ]}
        });
        let err = Rubric::from_value(&value).unwrap_err();
        match err {
            RubricError::Criterion { section, index, .. } => {
                assert_eq!(section, "Timeline");
                assert_eq!(index, 1);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let err = Rubric::from_value(&json!({"Timeline": {"criteria": ["Dates"]}})).unwrap_err();
        assert!(matches!(err, RubricError::Criterion { index: 0, .. }), "{:?}", err);
    }

    #[test]
    fn yaml_rubric_keeps_order() {
        let raw = "Project Team:\n  criteria:\n    - name: Roles filled\n      grade_range: [0, 1]\nProject Scope:\n  criteria:\n    - name: In and out of scope\n      grade_range: {min: 0, max: 2}\n      instructions: Both lists must be present.\n";
        let rubric = Rubric::from_yaml_str(raw).unwrap();
        let names: Vec<&str> = rubric.sections().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Project Team", "Project Scope"]);
        assert_eq!(
            rubric.section("Project Scope").unwrap().criteria[0].instructions.as_deref(),
            Some("Both lists must be present.")
        );
    }

    #[test]
    fn coerces_loose_scores() {
        assert_eq!(coerce_score(&json!(1)), Some(1));
        assert_eq!(coerce_score(&json!(2.0)), Some(2));
        assert_eq!(coerce_score(&json!(" 3 ")), Some(3));
        assert_eq!(coerce_score(&json!(0.5)), None);
        assert_eq!(coerce_score(&json!("N/A")), None);
        assert_eq!(coerce_score(&json!(null)), None);
    }
}
