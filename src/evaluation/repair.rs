// src/evaluation/repair.rs

// --- Imports ---
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::llm::{generate_within, TextGenerator};
use crate::utils::error::ReplyError;

// --- Regex Patterns (Lazy Static) ---
// "}{" left behind when two objects were emitted back to back
static ADJACENT_OBJECTS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\}\s*\{").expect("Failed to compile ADJACENT_OBJECTS_RE")
});

static TRAILING_COMMA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r",\s*([}\]])").expect("Failed to compile TRAILING_COMMA_RE")
});

static LINE_BREAK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\r\n]+").expect("Failed to compile LINE_BREAK_RE")
});

/// Where a reply stands in the recovery pipeline. Stages are tried in order and
/// `ServiceRepaired` is entered at most once per reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStage {
    Raw,
    BraceBalanced,
    HeuristicallyRepaired,
    ServiceRepaired,
    Failed,
}

impl RepairStage {
    fn next(self) -> Self {
        match self {
            RepairStage::Raw => RepairStage::BraceBalanced,
            RepairStage::BraceBalanced => RepairStage::HeuristicallyRepaired,
            RepairStage::HeuristicallyRepaired => RepairStage::ServiceRepaired,
            RepairStage::ServiceRepaired | RepairStage::Failed => RepairStage::Failed,
        }
    }
}

/// The object a reply holds under the expected section key.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub stage: RepairStage,
    pub entries: Map<String, Value>,
}

// --- Layers ---

/// Text from the first `{` to the last `}`.
fn outer_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Like `outer_object`, but keeps a side whose matching brace is missing.
fn brace_candidate(text: &str) -> Option<&str> {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => Some(&text[start..=end]),
        (Some(start), _) => Some(text[start..].trim_end()),
        (None, Some(end)) => Some(text[..=end].trim_start()),
        (None, None) => None,
    }
}

/// Counts braces outside string literals.
fn count_braces(text: &str) -> (usize, usize) {
    let (mut open, mut close) = (0, 0);
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => open += 1,
            '}' => close += 1,
            _ => {}
        }
    }
    (open, close)
}

fn balance_braces(text: &str) -> String {
    let (open, close) = count_braces(text);
    if open > close {
        format!("{}{}", text, "}".repeat(open - close))
    } else {
        format!("{}{}", "{".repeat(close - open), text)
    }
}

fn parse_json(text: &str) -> Result<Value, ReplyError> {
    serde_json::from_str(text).map_err(|e| ReplyError::Invalid(e.to_string()))
}

/// Layer 1: the outermost braces parsed as they are.
fn parse_direct(reply: &str) -> Result<Value, ReplyError> {
    parse_json(outer_object(reply).ok_or(ReplyError::NoObject)?)
}

/// Layer 2: missing closing (or opening) braces added until the counts match.
fn parse_balanced(reply: &str) -> Result<Value, ReplyError> {
    let candidate = brace_candidate(reply).ok_or(ReplyError::NoObject)?;
    let (open, close) = count_braces(candidate);
    if open == close {
        return Err(ReplyError::Invalid("braces already balanced".to_string()));
    }
    let balanced = balance_braces(candidate);
    tracing::debug!("Balanced braces ({} open, {} close)", open, close);
    parse_json(&balanced)
}

/// Layer 3: string-level fixes for the usual ways generated JSON breaks.
fn repair_heuristically(reply: &str) -> String {
    let candidate = brace_candidate(reply).unwrap_or(reply);
    let mut text = LINE_BREAK_RE.replace_all(candidate, " ").trim().to_string();
    if !text.starts_with('{') {
        text.insert(0, '{');
    }
    if !text.ends_with('}') {
        text.push('}');
    }
    let text = ADJACENT_OBJECTS_RE.replace_all(&text, ",");
    let text = TRAILING_COMMA_RE.replace_all(&text, "$1");
    balance_braces(&text)
}

fn parse_heuristic(reply: &str) -> Result<Value, ReplyError> {
    parse_json(&repair_heuristically(reply))
}

fn normalize_key(key: &str) -> String {
    key.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// The object stored under `section`, matched exactly first and then ignoring
/// case and spacing.
fn section_entries(value: Value, section: &str) -> Result<Map<String, Value>, ReplyError> {
    let missing = || ReplyError::MissingSection(section.to_string());
    let Value::Object(mut root) = value else {
        return Err(missing());
    };

    let key = if root.contains_key(section) {
        section.to_string()
    } else {
        let wanted = normalize_key(section);
        root.keys()
            .find(|k| normalize_key(k) == wanted)
            .cloned()
            .ok_or_else(missing)?
    };

    match root.remove(&key) {
        Some(Value::Object(entries)) => Ok(entries),
        _ => Err(missing()),
    }
}

fn attempt_layer(stage: RepairStage, reply: &str, section: &str) -> Result<Map<String, Value>, ReplyError> {
    let value = match stage {
        RepairStage::Raw => parse_direct(reply)?,
        RepairStage::BraceBalanced => parse_balanced(reply)?,
        RepairStage::HeuristicallyRepaired => parse_heuristic(reply)?,
        RepairStage::ServiceRepaired | RepairStage::Failed => return Err(ReplyError::NoObject),
    };
    section_entries(value, section)
}

/// Runs the local layers (direct, brace-balanced, heuristic) in order.
pub fn repair_locally(reply: &str, section: &str) -> Result<ParsedReply, ReplyError> {
    let mut stage = RepairStage::Raw;
    let mut last_error = ReplyError::NoObject;

    while stage != RepairStage::ServiceRepaired {
        match attempt_layer(stage, reply, section) {
            Ok(entries) => return Ok(ParsedReply { stage, entries }),
            Err(e) => {
                tracing::debug!("Reply for '{}' failed at {:?}: {}", section, stage, e);
                last_error = e;
            }
        }
        stage = stage.next();
    }

    Err(last_error)
}

/// Prompt for the single corrective request.
pub fn corrective_prompt(broken: &str, section: &str, criteria: &[String]) -> String {
    format!(
        "The text below was meant to be a single JSON object but it could not be parsed.\n\
         Return only the corrected JSON object, with no text before or after it and no comments. \
         Keep the same keys and values and only fix the syntax. \
         The only top-level key must be \"{}\" and it must hold one entry per criterion ({}), \
         each with a \"score\" and an \"explanation\".\n\nText:\n{}\n",
        section,
        criteria.join(", "),
        broken.trim()
    )
}

/// Recovers structured data from generation replies, asking the service to fix
/// its own output at most once per reply.
pub struct ResponseRepairer<'a, G> {
    generator: &'a G,
    timeout: Duration,
}

impl<'a, G: TextGenerator> ResponseRepairer<'a, G> {
    pub fn new(generator: &'a G, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    pub async fn parse(
        &self,
        reply: &str,
        section: &str,
        criteria: &[String],
    ) -> Result<ParsedReply, ReplyError> {
        let local_error = match repair_locally(reply, section) {
            Ok(parsed) => {
                if parsed.stage != RepairStage::Raw {
                    tracing::info!("Recovered reply for '{}' at stage {:?}", section, parsed.stage);
                }
                return Ok(parsed);
            }
            Err(e) => e,
        };

        tracing::warn!(
            "Reply for '{}' ({}) not parseable locally ({}), requesting a corrected object",
            section,
            criteria.join(", "),
            local_error
        );

        let stage = RepairStage::ServiceRepaired;
        let prompt = corrective_prompt(reply, section, criteria);
        let corrected = match generate_within(self.generator, &prompt, reply, self.timeout).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Reply for '{}' reached {:?}: {}", section, RepairStage::Failed, e);
                return Err(e.into());
            }
        };

        // Corrected replies get the direct parse only
        match parse_direct(&corrected).and_then(|value| section_entries(value, section)) {
            Ok(entries) => {
                tracing::info!("Recovered reply for '{}' at stage {:?}", section, stage);
                Ok(ParsedReply { stage, entries })
            }
            Err(e) => {
                tracing::warn!("Reply for '{}' reached {:?}: {}", section, stage.next(), e);
                Err(e)
            }
        }
    }
}

// --- Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::GenerationError;
    use std::sync::Mutex;

    /// Hands out scripted replies and records every prompt it was sent.
    struct ScriptedGenerator {
        replies: Mutex<Vec<Result<String, GenerationError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn new(replies: Vec<Result<String, GenerationError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, prompt: &str, _context: &str) -> Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(GenerationError::Parse("script exhausted".to_string())))
        }
    }

    fn criteria() -> Vec<String> {
        vec!["Q1".to_string()]
    }

    #[test]
    fn well_formed_reply_parses_raw() {
        let reply = "Sure! Here is the result:\n```json\n{\"Timeline\": {\"Dates\": {\"score\": 1, \"explanation\": \"All steps dated.\"}}}\n```";
        let parsed = repair_locally(reply, "Timeline").unwrap();
        assert_eq!(parsed.stage, RepairStage::Raw);
        assert_eq!(parsed.entries["Dates"]["score"], 1);
    }

    #[test]
    fn one_missing_brace_is_balanced() {
        let reply = r#"{"Project Overview": {"Q1": {"score": "1", "explanation": "ok"}}"#;
        let parsed = repair_locally(reply, "Project Overview").unwrap();
        assert_eq!(parsed.stage, RepairStage::BraceBalanced);
        assert_eq!(parsed.entries["Q1"]["explanation"], "ok");
    }

    #[test]
    fn truncated_reply_without_closing_brace_is_balanced() {
        let reply = "Result: {\"Timeline\": {\"Dates\": {\"score\": 0, \"explanation\": \"no dates\"";
        let parsed = repair_locally(reply, "Timeline").unwrap();
        assert_eq!(parsed.stage, RepairStage::BraceBalanced);
        assert_eq!(parsed.entries["Dates"]["score"], 0);
    }

    #[test]
    fn braces_inside_strings_are_not_counted() {
        assert_eq!(count_braces(r#"{"a": "x } y", "b": "\"{"}"#), (1, 1));
    }

    #[test]
    fn concatenated_objects_and_trailing_commas_are_repaired() {
        let reply = "{\"Project Team\": {\"Lead\": {\"score\": 1, \"explanation\": \"named\",}}}\n{\"Other\": {\"x\": 1}}";
        let parsed = repair_locally(reply, "Project Team").unwrap();
        assert_eq!(parsed.stage, RepairStage::HeuristicallyRepaired);
        assert_eq!(parsed.entries["Lead"]["explanation"], "named");
    }

    #[test]
    fn raw_line_breaks_in_strings_are_removed() {
        let reply = "{\"Timeline\": {\"Dates\": {\"score\": 1, \"explanation\": \"first line\nsecond line\"}}}";
        let parsed = repair_locally(reply, "Timeline").unwrap();
        assert_eq!(parsed.stage, RepairStage::HeuristicallyRepaired);
        assert_eq!(parsed.entries["Dates"]["explanation"], "first line second line");
    }

    #[test]
    fn section_key_matches_loosely_but_must_exist() {
        let parsed = repair_locally(r#"{"project  overview": {"Q1": {"score": 1}}}"#, "Project Overview").unwrap();
        assert!(parsed.entries.contains_key("Q1"));

        let err = repair_locally(r#"{"Timeline": {"Q1": {"score": 1}}}"#, "Project Overview").unwrap_err();
        assert!(matches!(err, ReplyError::MissingSection(_)), "{:?}", err);
    }

    #[test]
    fn service_correction_is_tried_once() {
        let generator = ScriptedGenerator::new(vec![
            Ok("I could not produce JSON, sorry.".to_string()),
            Ok(r#"{"Project Overview": {"Q1": {"score": 1, "explanation": "late"}}}"#.to_string()),
        ]);
        let repairer = ResponseRepairer::new(&generator, Duration::from_secs(5));

        let result = tokio_test::block_on(repairer.parse("no braces here at all", "Project Overview", &criteria()));
        assert!(result.is_err());
        assert_eq!(generator.calls(), 1, "only one corrective request per reply");
        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("no braces here at all"));
        assert!(prompts[0].contains("\"Project Overview\""));
    }

    #[test]
    fn service_correction_recovers_broken_reply() {
        let generator = ScriptedGenerator::new(vec![Ok(
            "Here you go: {\"Project Overview\": {\"Q1\": {\"score\": 1, \"explanation\": \"clear\"}}}".to_string(),
        )]);
        let repairer = ResponseRepairer::new(&generator, Duration::from_secs(5));

        let parsed = tokio_test::block_on(repairer.parse("score: 1 (clear)", "Project Overview", &criteria())).unwrap();
        assert_eq!(parsed.stage, RepairStage::ServiceRepaired);
        assert_eq!(parsed.entries["Q1"]["score"], 1);
    }

    #[test]
    fn correction_missing_section_key_is_unavailable() {
        let generator = ScriptedGenerator::new(vec![Ok(r#"{"Q1": {"score": 1}}"#.to_string())]);
        let repairer = ResponseRepairer::new(&generator, Duration::from_secs(5));
        let err = tokio_test::block_on(repairer.parse("garbage", "Project Overview", &criteria())).unwrap_err();
        assert!(matches!(err, ReplyError::MissingSection(_)));
    }

    #[test]
    fn correction_transport_failure_is_unavailable() {
        let generator = ScriptedGenerator::new(vec![Err(GenerationError::Parse("boom".to_string()))]);
        let repairer = ResponseRepairer::new(&generator, Duration::from_secs(5));
        let err = tokio_test::block_on(repairer.parse("garbage", "Timeline", &criteria())).unwrap_err();
        assert!(matches!(err, ReplyError::Correction(_)));
    }

    #[test]
    fn stages_advance_to_failed() {
        assert_eq!(RepairStage::Raw.next(), RepairStage::BraceBalanced);
        assert_eq!(RepairStage::HeuristicallyRepaired.next(), RepairStage::ServiceRepaired);
        assert_eq!(RepairStage::ServiceRepaired.next(), RepairStage::Failed);
        assert_eq!(RepairStage::Failed.next(), RepairStage::Failed);
    }
}
