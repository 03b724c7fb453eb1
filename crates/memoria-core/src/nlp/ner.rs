//! Named-entity extraction.
//!
//! Level 1 is lexical: date/time patterns, quoted phrases, and
//! capitalized spans, typed heuristically. Level 2 asks the LM for a JSON
//! array of `{text, type}`. Both levels deduplicate by
//! `(lowercase text, kind)` via [`super::dedup_entities`].
//!
//! This is the single NER interface in the crate; everything that needs
//! entities (graph retrieval, intent slots, ingest) goes through
//! [`EntityExtractor::extract`].

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::{CascadeConfig, LmConfig};
use crate::error::{CoreError, Result};
use crate::inference::{
    CascadeEngine, FallbackStrategy, InferenceContext, InferenceLevel, InferenceLevelTag,
    InferenceResult,
};
use crate::llm::{LmOptions, LmTransport, Message, call_with_policy, extract_json_array};
use crate::nlp::dedup_entities;

// ============================================================================
// TYPES
// ============================================================================

/// Entity kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Person name
    Person,
    /// Place
    Location,
    /// Organization
    Organization,
    /// Calendar date or relative day
    Date,
    /// Clock time
    Time,
    /// Subject-matter term
    #[default]
    Topic,
    /// Anything else
    Other,
}

impl EntityKind {
    /// Stable string form
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Person => "person",
            EntityKind::Location => "location",
            EntityKind::Organization => "organization",
            EntityKind::Date => "date",
            EntityKind::Time => "time",
            EntityKind::Topic => "topic",
            EntityKind::Other => "other",
        }
    }

    /// Parse leniently from LM output
    pub fn parse_name(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "person" | "people" | "name" => EntityKind::Person,
            "location" | "place" | "gpe" => EntityKind::Location,
            "organization" | "org" | "company" => EntityKind::Organization,
            "date" => EntityKind::Date,
            "time" => EntityKind::Time,
            "topic" | "concept" | "subject" => EntityKind::Topic,
            _ => EntityKind::Other,
        }
    }
}

/// A typed entity mention
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Surface text
    pub text: String,
    /// Entity kind
    pub kind: EntityKind,
}

impl Entity {
    /// Create an entity
    pub fn new(text: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }
}

fn entities_to_value(entities: &[Entity]) -> Value {
    Value::Array(
        entities
            .iter()
            .map(|e| json!({ "text": e.text, "type": e.kind.as_str() }))
            .collect(),
    )
}

fn entities_from_value(value: &Value) -> Vec<Entity> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let text = item.get("text")?.as_str()?.trim();
                    if text.is_empty() {
                        return None;
                    }
                    let kind = item
                        .get("type")
                        .and_then(Value::as_str)
                        .map(EntityKind::parse_name)
                        .unwrap_or_default();
                    Some(Entity::new(text, kind))
                })
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// RULE LEVEL
// ============================================================================

/// Lexical entity level: date/time regexes, quoted phrases, capitalized
/// spans.
pub struct RuleNerLevel {
    date_pattern: Regex,
    time_pattern: Regex,
    relative_day_pattern: Regex,
    quoted_pattern: Regex,
    capitalized_pattern: Regex,
    min_length: usize,
}

impl Default for RuleNerLevel {
    fn default() -> Self {
        Self {
            date_pattern: Regex::new(r"\b\d{4}[-/]\d{1,2}[-/]\d{1,2}\b").unwrap(),
            time_pattern: Regex::new(r"\b\d{1,2}:\d{2}(:\d{2})?\b").unwrap(),
            relative_day_pattern: Regex::new(
                r"今天|昨天|明天|上周|上个月|\b(today|yesterday|tomorrow|last week|last month)\b",
            )
            .unwrap(),
            quoted_pattern: Regex::new(r#""([^"]{2,60})"|「([^」]{1,30})」"#).unwrap(),
            // Runs of capitalized words, e.g. "New York", "Rust Belt Conference".
            capitalized_pattern: Regex::new(r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)\b").unwrap(),
            min_length: 2,
        }
    }
}

impl RuleNerLevel {
    fn extract(&self, text: &str) -> Vec<Entity> {
        let mut entities = Vec::new();

        for m in self.date_pattern.find_iter(text) {
            entities.push(Entity::new(m.as_str(), EntityKind::Date));
        }
        for m in self.relative_day_pattern.find_iter(text) {
            entities.push(Entity::new(m.as_str(), EntityKind::Date));
        }
        for m in self.time_pattern.find_iter(text) {
            entities.push(Entity::new(m.as_str(), EntityKind::Time));
        }
        for caps in self.quoted_pattern.captures_iter(text) {
            let quoted = caps.get(1).or_else(|| caps.get(2));
            if let Some(m) = quoted {
                entities.push(Entity::new(m.as_str(), EntityKind::Topic));
            }
        }

        // Capitalized spans, minus sentence-initial single words, which are
        // usually just sentence case.
        for caps in self.capitalized_pattern.captures_iter(text) {
            if let Some(m) = caps.get(1) {
                let span = m.as_str();
                let word_count = span.split_whitespace().count();
                let sentence_initial = m.start() == 0
                    || text[..m.start()]
                        .trim_end()
                        .ends_with(['.', '!', '?', '\n']);
                if span.chars().count() < self.min_length {
                    continue;
                }
                if word_count == 1 && sentence_initial {
                    continue;
                }
                entities.push(Entity::new(span, EntityKind::Topic));
            }
        }

        dedup_entities(entities)
    }
}

#[async_trait]
impl InferenceLevel for RuleNerLevel {
    fn tag(&self) -> InferenceLevelTag {
        InferenceLevelTag::Rule
    }

    async fn infer(&self, input: &str, _context: &InferenceContext) -> Result<InferenceResult> {
        let entities = self.extract(input);
        let confidence = if entities.is_empty() { 0.5 } else { 0.8 };
        Ok(
            InferenceResult::new(entities_to_value(&entities), confidence, InferenceLevelTag::Rule)
                .with_meta("method", json!("lexical")),
        )
    }
}

// ============================================================================
// LM LEVEL
// ============================================================================

/// LM entity level returning a JSON array of `{text, type}`
pub struct LmNerLevel {
    transport: Arc<dyn LmTransport>,
    lm_config: LmConfig,
}

impl LmNerLevel {
    /// Create an LM level over the given transport
    pub fn new(transport: Arc<dyn LmTransport>, lm_config: LmConfig) -> Self {
        Self {
            transport,
            lm_config,
        }
    }
}

#[async_trait]
impl InferenceLevel for LmNerLevel {
    fn tag(&self) -> InferenceLevelTag {
        InferenceLevelTag::Llm
    }

    async fn infer(&self, input: &str, _context: &InferenceContext) -> Result<InferenceResult> {
        if !self.transport.is_configured() {
            return Err(CoreError::Configuration(
                "LM transport not configured".to_string(),
            ));
        }

        let prompt = format!(
            "Extract named entities from the text.\n\
             Text: {input}\n\n\
             Reply with a JSON array only, e.g. \
             [{{\"text\": \"...\", \"type\": \"person|location|organization|date|time|topic|other\"}}]"
        );
        let messages = [Message::user(prompt)];
        let options = LmOptions::deterministic(300);

        let response = call_with_policy(&self.lm_config, || {
            self.transport.generate(&messages, &options)
        })
        .await?;

        let value = extract_json_array(&response.content)?;
        let entities = dedup_entities(entities_from_value(&value));

        Ok(
            InferenceResult::new(entities_to_value(&entities), 0.95, InferenceLevelTag::Llm)
                .with_meta("method", json!("llm")),
        )
    }
}

// ============================================================================
// EXTRACTOR
// ============================================================================

/// Cascaded entity extractor
pub struct EntityExtractor {
    engine: CascadeEngine,
}

impl EntityExtractor {
    /// Rule-only extractor
    pub fn rule_only(config: CascadeConfig) -> Self {
        let mut engine = CascadeEngine::new(config, FallbackStrategy::BestOf);
        engine.add_level(Arc::new(RuleNerLevel::default()));
        Self { engine }
    }

    /// Rule + LM extractor
    pub fn with_llm(
        config: CascadeConfig,
        transport: Arc<dyn LmTransport>,
        lm_config: LmConfig,
    ) -> Self {
        let mut engine = CascadeEngine::new(config, FallbackStrategy::BestOf);
        engine.add_level(Arc::new(RuleNerLevel::default()));
        engine.add_level(Arc::new(LmNerLevel::new(transport, lm_config)));
        Self { engine }
    }

    /// Extract entities from a text
    pub async fn extract(&self, text: &str) -> Result<Vec<Entity>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let raw = self.engine.infer(text, &InferenceContext::new()).await?;
        Ok(dedup_entities(entities_from_value(&raw.value)))
    }
}

// ============================================================================
// TESTS
// ============================================================================
