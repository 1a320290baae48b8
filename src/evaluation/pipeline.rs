// src/evaluation/pipeline.rs
use crate::config::{PipelineConfig, PromptMode};
use crate::evaluation::aggregate::{extract_criterion, DocumentResult, ResultAggregator};
use crate::evaluation::repair::{ParsedReply, ResponseRepairer};
use crate::extractors::rows::RowFormatter;
use crate::extractors::section::{SectionMap, SectionSegmenter};
use crate::llm::{generate_within, TextGenerator};
use crate::rubric::model::{Criterion, Rubric};
use crate::rubric::prompt::{EvaluationRequest, PromptBuilder, OVERALL_FIELD, OVERALL_SECTION};
use crate::tables::Table;
use crate::utils::error::ExtractError;

/// Everything produced for one document.
#[derive(Debug)]
pub struct EvaluatedDocument {
    pub text: String,
    pub sections: SectionMap,
    pub result: DocumentResult,
}

/// Runs one document through formatting, segmentation, prompting, repair and
/// aggregation. Holds no per-document state, so one evaluator can serve many
/// documents.
pub struct DocumentEvaluator<'a, G> {
    rubric: &'a Rubric,
    config: &'a PipelineConfig,
    generator: &'a G,
}

impl<'a, G: TextGenerator> DocumentEvaluator<'a, G> {
    pub fn new(rubric: &'a Rubric, config: &'a PipelineConfig, generator: &'a G) -> Self {
        Self {
            rubric,
            config,
            generator,
        }
    }

    /// Rebuilds the reading-order text from the document's tables.
    pub fn reconstruct(&self, document: &str, tables: &[Table]) -> Result<String, ExtractError> {
        if tables.is_empty() {
            return Err(ExtractError::NoTables(document.to_string()));
        }
        let text = RowFormatter::new(&self.config.section_titles).format_tables(tables);
        if text.trim().is_empty() {
            return Err(ExtractError::EmptyContent(document.to_string()));
        }
        tracing::debug!("Reconstructed {} bytes of text for {}", text.len(), document);
        Ok(text)
    }

    /// Segments the text and keeps the sections the rubric grades, plus the two
    /// disambiguation sections. Other titles only end the span before them.
    pub fn segment(&self, document: &str, text: &str) -> Result<SectionMap, ExtractError> {
        let disambiguation = &self.config.disambiguation;
        let mut sections = SectionSegmenter::new(&self.config.section_titles, disambiguation).segment(text);
        sections.retain(|s| {
            let keep = self.rubric.section(&s.name).is_some()
                || s.name == disambiguation.first_name
                || s.name == disambiguation.second_name;
            if !keep {
                tracing::debug!("{}: '{}' is not graded, dropping it", document, s.name);
            }
            keep
        });
        if sections.is_empty() {
            return Err(ExtractError::NoSections(document.to_string()));
        }

        tracing::info!("{}: found sections {:?}", document, sections.names());
        for rubric_section in self.rubric.sections() {
            if !sections.contains(&rubric_section.name) {
                tracing::warn!("{}: no text for rubric section '{}'", document, rubric_section.name);
            }
        }
        Ok(sections)
    }

    pub async fn evaluate(&self, document: &str, tables: &[Table]) -> Result<EvaluatedDocument, ExtractError> {
        let text = self.reconstruct(document, tables)?;
        let sections = self.segment(document, &text)?;
        let result = self.evaluate_sections(document, &sections).await;
        Ok(EvaluatedDocument {
            text,
            sections,
            result,
        })
    }

    /// Scores every rubric criterion against the document's sections. Failures are
    /// recorded per criterion and never abort the document.
    pub async fn evaluate_sections(&self, document: &str, sections: &SectionMap) -> DocumentResult {
        let builder = PromptBuilder::new(self.rubric, self.config);
        let repairer = ResponseRepairer::new(self.generator, self.config.service_timeout());
        let mut aggregator = ResultAggregator::new(document);

        for rubric_section in self.rubric.sections() {
            let section = rubric_section.name.as_str();
            match self.config.prompt_mode {
                PromptMode::PerCriterion => {
                    for criterion in &rubric_section.criteria {
                        match builder.build_for_criterion(section, &criterion.name, sections) {
                            Ok(request) => {
                                self.run_request(&request, &[criterion], &repairer, &mut aggregator).await
                            }
                            Err(e) => aggregator.mark_unavailable(section, &criterion.name, e.to_string()),
                        }
                    }
                }
                PromptMode::PerSection => {
                    let criteria: Vec<&Criterion> = rubric_section.criteria.iter().collect();
                    match builder.build_for_section(section, sections) {
                        Ok(request) => self.run_request(&request, &criteria, &repairer, &mut aggregator).await,
                        Err(e) => {
                            for criterion in &criteria {
                                aggregator.mark_unavailable(section, &criterion.name, e.to_string());
                            }
                        }
                    }
                }
            }
        }

        let mut result = aggregator.finish(self.rubric, self.config.require_all_sections);
        self.describe_overall(&builder, &repairer, &mut result).await;
        tracing::info!(
            "{}: {} sections scored, {} criteria unavailable, total {}/{}",
            document,
            result.sections.len(),
            result.unavailable.len(),
            result.total.obtained,
            result.total.possible
        );
        result
    }

    /// One generation call plus repair. The error is the reason recorded for
    /// whatever the request covered.
    async fn request_reply(
        &self,
        request: &EvaluationRequest,
        repairer: &ResponseRepairer<'_, G>,
    ) -> Result<ParsedReply, String> {
        let reply = generate_within(
            self.generator,
            &request.prompt,
            &request.source_text,
            self.config.service_timeout(),
        )
        .await
        .map_err(|e| format!("service failure: {}", e))?;

        repairer
            .parse(&reply, &request.section, &request.criteria)
            .await
            .map_err(|e| format!("unparseable reply: {}", e))
    }

    async fn run_request(
        &self,
        request: &EvaluationRequest,
        criteria: &[&Criterion],
        repairer: &ResponseRepairer<'_, G>,
        aggregator: &mut ResultAggregator,
    ) {
        let section = request.section.as_str();
        tracing::debug!("Evaluating '{}' for {:?}", section, request.criteria);

        match self.request_reply(request, repairer).await {
            Ok(parsed) => {
                for criterion in criteria {
                    let result = extract_criterion(&parsed.entries, criterion, section);
                    aggregator.record(section, &criterion.name, result);
                }
            }
            Err(reason) => {
                for criterion in criteria {
                    aggregator.mark_unavailable(section, &criterion.name, reason.clone());
                }
            }
        }
    }

    /// Asks for a brief description of the overall grading. Left empty, with the
    /// reason recorded, when the service fails or its reply has no description.
    async fn describe_overall(
        &self,
        builder: &PromptBuilder<'_>,
        repairer: &ResponseRepairer<'_, G>,
        result: &mut DocumentResult,
    ) {
        let Some(request) = builder.build_overall(result) else {
            tracing::debug!("{}: nothing scored, no overall description requested", result.document);
            return;
        };

        let description = self.request_reply(&request, repairer).await.and_then(|parsed| {
            parsed
                .entries
                .iter()
                .find(|(key, _)| key.trim().eq_ignore_ascii_case(OVERALL_FIELD))
                .and_then(|(_, value)| value.as_str())
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string)
                .ok_or_else(|| "reply has no description".to_string())
        });

        match description {
            Ok(text) => result.overall = Some(text),
            Err(reason) => result.mark_overall_unavailable(OVERALL_SECTION, OVERALL_FIELD, reason),
        }
    }
}
