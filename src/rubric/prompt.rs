// src/rubric/prompt.rs
use serde_json::{json, Map, Value};

use crate::config::PipelineConfig;
use crate::evaluation::aggregate::DocumentResult;
use crate::extractors::section::SectionMap;
use crate::rubric::model::{Criterion, Rubric, RubricSection};
use crate::utils::error::PromptError;

const INTRO: &str = "You are an evaluator. You grade one section of a project report against the rubric criteria below.";

const OVERALL_INTRO: &str = "You are an evaluator. Below are the graded results for every section of one project report.";

/// Reply key and field of the overall description request.
pub const OVERALL_SECTION: &str = "Overall Description";
pub const OVERALL_FIELD: &str = "description";

/// One call to the text-generation service.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRequest {
    pub section: String,
    /// Criteria this request scores, in rubric order.
    pub criteria: Vec<String>,
    pub prompt: String,
    pub source_text: String,
}

/// Renders evaluation prompts from the rubric and a document's sections.
pub struct PromptBuilder<'a> {
    rubric: &'a Rubric,
    config: &'a PipelineConfig,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(rubric: &'a Rubric, config: &'a PipelineConfig) -> Self {
        Self { rubric, config }
    }

    /// Text a section is judged on. The scope section is read together with the
    /// project description that precedes it.
    pub fn source_text(&self, section: &str, sections: &SectionMap) -> Result<String, PromptError> {
        let own = sections
            .get(section)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PromptError::NoDataForSection(section.to_string()))?;

        if section == self.config.scope_section {
            let context_name = &self.config.disambiguation.second_name;
            if let Some(description) = sections.get(context_name).map(str::trim).filter(|t| !t.is_empty()) {
                return Ok(format!("{}\n\n{}", description, own));
            }
            tracing::debug!("No '{}' text to prefix '{}' with", context_name, section);
        }

        Ok(own.to_string())
    }

    fn rubric_section(&self, section: &str) -> Result<&'a RubricSection, PromptError> {
        self.rubric
            .section(section)
            .ok_or_else(|| PromptError::UnknownSection(section.to_string()))
    }

    pub fn build_for_criterion(
        &self,
        section: &str,
        criterion: &str,
        sections: &SectionMap,
    ) -> Result<EvaluationRequest, PromptError> {
        let rubric_section = self.rubric_section(section)?;
        let criterion = rubric_section
            .criterion(criterion)
            .ok_or_else(|| PromptError::UnknownCriterion {
                section: section.to_string(),
                criterion: criterion.to_string(),
            })?;
        self.build(section, &[criterion], sections)
    }

    pub fn build_for_section(
        &self,
        section: &str,
        sections: &SectionMap,
    ) -> Result<EvaluationRequest, PromptError> {
        let rubric_section = self.rubric_section(section)?;
        let criteria: Vec<&Criterion> = rubric_section.criteria.iter().collect();
        self.build(section, &criteria, sections)
    }

    fn build(
        &self,
        section: &str,
        criteria: &[&Criterion],
        sections: &SectionMap,
    ) -> Result<EvaluationRequest, PromptError> {
        let source_text = self.source_text(section, sections)?;
        let prompt = self.render(section, criteria, &source_text);
        Ok(EvaluationRequest {
            section: section.to_string(),
            criteria: criteria.iter().map(|c| c.name.clone()).collect(),
            prompt,
            source_text,
        })
    }

    /// Request for a brief description of the overall grading, built from the
    /// scored criteria. `None` when nothing was scored.
    pub fn build_overall(&self, result: &DocumentResult) -> Option<EvaluationRequest> {
        let mut lines = Vec::new();
        for (section, criterion, scored) in result.scored() {
            let max = self
                .rubric
                .section(section)
                .and_then(|s| s.criterion(criterion))
                .map(|c| c.grade_range.max());
            let score = scored.score.unwrap_or_default();
            let mut line = match max {
                Some(max) => format!("- {} / {}: {} of {}", section, criterion, score, max),
                None => format!("- {} / {}: {}", section, criterion, score),
            };
            if !scored.explanation.is_empty() {
                line.push_str(&format!(". {}", scored.explanation));
            }
            lines.push(line);
        }
        if lines.is_empty() {
            return None;
        }
        lines.push(format!("Total: {} of {}", result.total.obtained, result.total.possible));
        let source_text = lines.join("\n");

        let mut schema = Map::new();
        schema.insert(
            OVERALL_SECTION.to_string(),
            json!({ OVERALL_FIELD: "<brief description of the overall grading>" }),
        );
        let schema = serde_json::to_string_pretty(&Value::Object(schema)).unwrap_or_default();

        let prompt = format!(
            "{}\n\nInstructions:\n- Provide a brief description of the overall grading.\n\
             - Mention what the report does well and what is missing, based only on the results below.\n\
             \nResults:\n\"\"\"\n{}\n\"\"\"\n\
             \nOutput format:\nReturn a single JSON object and nothing else: no text before or after it, no comments. \
             The only top-level key is \"{}\":\n{}\n",
            OVERALL_INTRO, source_text, OVERALL_SECTION, schema
        );

        Some(EvaluationRequest {
            section: OVERALL_SECTION.to_string(),
            criteria: vec![OVERALL_FIELD.to_string()],
            prompt,
            source_text,
        })
    }

    fn render(&self, section: &str, criteria: &[&Criterion], text: &str) -> String {
        let mut prompt = String::new();
        prompt.push_str(INTRO);
        prompt.push_str("\n\nInstructions:\n");
        for line in &self.config.general_instructions {
            prompt.push_str(&format!("- {}\n", line));
        }
        for criterion in criteria {
            if let Some(extra) = &criterion.instructions {
                prompt.push_str(&format!("- For \"{}\": {}\n", criterion.name, extra));
            }
        }

        prompt.push_str("\nCriteria:\n");
        for criterion in criteria {
            prompt.push_str(&format!(
                "\nCriterion: {}\nScoring range: {}\n",
                criterion.name,
                criterion.grade_range.describe()
            ));
            for (i, example) in criterion.examples.iter().enumerate() {
                prompt.push_str(&format!(
                    "Example {}:\n  Input: {}\n  Score: {}\n  Explanation: {}\n",
                    i + 1,
                    example.input,
                    example.score,
                    example.explanation
                ));
            }
        }

        prompt.push_str(&format!("\nSection \"{}\":\n\"\"\"\n{}\n\"\"\"\n", section, text));

        prompt.push_str(&format!(
            "\nOutput format:\nReturn a single JSON object and nothing else: no text before or after it, no comments. \
             The only top-level key is \"{}\", and it holds one entry per criterion with a \"score\" and an \"explanation\":\n{}\n",
            section,
            output_schema(section, criteria)
        ));

        prompt
    }
}

/// Example of the only reply shape the parser accepts, shown to the service.
pub fn output_schema(section: &str, criteria: &[&Criterion]) -> String {
    let mut entries = Map::new();
    for criterion in criteria {
        entries.insert(
            criterion.name.clone(),
            json!({
                "score": format!("<{}>", criterion.grade_range.describe()),
                "explanation": "<brief explanation>",
            }),
        );
    }
    let mut root = Map::new();
    root.insert(section.to_string(), Value::Object(entries));
    serde_json::to_string_pretty(&Value::Object(root)).unwrap_or_default()
}
