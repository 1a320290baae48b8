// src/config.rs
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::utils::AppError;

/// Title that can appear twice in a report with two different meanings, and the
/// two section names its surrounding text is split into.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DisambiguationConfig {
    pub title: String,
    pub first_name: String,
    pub second_name: String,
}

impl Default for DisambiguationConfig {
    fn default() -> Self {
        Self {
            title: "Project Description / Purpose".to_string(),
            first_name: "Process Milestone".to_string(),
            second_name: "Project Description".to_string(),
        }
    }
}

/// Whether one request is sent per criterion or one per section covering all its criteria.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    #[default]
    PerCriterion,
    PerSection,
}

/// Everything the per-document pipeline needs besides the rubric and the generator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Section titles recognized in the reconstructed text, also used as
    /// paragraph-break keywords when rows are flattened. Titles the rubric does
    /// not grade (e.g. "Signatures") only end the section before them.
    pub section_titles: Vec<String>,
    pub disambiguation: DisambiguationConfig,
    /// Section whose prompt is prefixed with the project description text.
    pub scope_section: String,
    pub prompt_mode: PromptMode,
    pub general_instructions: Vec<String>,
    pub service_timeout_secs: u64,
    /// Fill every rubric section into the result, using empty entries when nothing was scored.
    pub require_all_sections: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            section_titles: [
                "Project Description / Purpose",
                "Project Overview",
                "Timeline",
                "Project Scope",
                "Project Team",
                "Signatures",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            disambiguation: DisambiguationConfig::default(),
            scope_section: "Project Scope".to_string(),
            prompt_mode: PromptMode::PerCriterion,
            general_instructions: vec![
                "Evaluate only the section text given below; do not assume content that is not present.".to_string(),
                "Assign a score strictly within the scoring range.".to_string(),
                "Keep the explanation brief and refer to the text when the criterion is not met.".to_string(),
            ],
            service_timeout_secs: 300,
            require_all_sections: false,
        }
    }
}

impl PipelineConfig {
    /// Loads a JSON config file; missing fields keep their defaults.
    pub fn from_path(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&raw)
            .map_err(|e| AppError::Config(format!("Invalid config {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.section_titles.iter().all(|t| t.trim().is_empty()) {
            return Err(AppError::Config("section_titles must not be empty".to_string()));
        }
        if self.disambiguation.first_name == self.disambiguation.second_name {
            return Err(AppError::Config(
                "disambiguation names must differ".to_string(),
            ));
        }
        if self.service_timeout_secs == 0 {
            return Err(AppError::Config("service_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn service_timeout(&self) -> Duration {
        Duration::from_secs(self.service_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"prompt_mode": "per_section", "service_timeout_secs": 30}"#).unwrap();
        assert_eq!(config.prompt_mode, PromptMode::PerSection);
        assert_eq!(config.service_timeout(), Duration::from_secs(30));
        assert_eq!(config.scope_section, "Project Scope");
        assert_eq!(config.disambiguation, DisambiguationConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn identical_disambiguation_names_rejected() {
        let mut config = PipelineConfig::default();
        config.disambiguation.second_name = config.disambiguation.first_name.clone();
        assert!(config.validate().is_err());
    }
}
