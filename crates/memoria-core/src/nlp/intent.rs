//! Intent recognition.
//!
//! A closed intent set over user queries. Level 1 scans per-intent
//! keyword patterns (first match wins at confidence 0.7); level 2 asks
//! the LM for `{intent, confidence, reason}`. On top of the chosen
//! intent the recognizer fills slots: the search query text, recall time
//! ranges, memorize content, analyze sub-type.

use std::collections::BTreeMap;
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
use crate::llm::{LmOptions, LmTransport, Message, call_with_policy, extract_json};
use crate::nlp::ner::{Entity, EntityKind, EntityExtractor};

// ============================================================================
// TYPES
// ============================================================================

/// Closed intent enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserIntent {
    /// Search for knowledge or information
    Search,
    /// Small talk, greetings, everyday conversation
    Chat,
    /// Store or record information
    Memorize,
    /// Recall or review past information
    Recall,
    /// Analyze, summarize, or aggregate
    Analyze,
    /// Could not be determined
    #[default]
    Unknown,
}

impl UserIntent {
    /// Stable string form
    pub fn as_str(&self) -> &'static str {
        match self {
            UserIntent::Search => "search",
            UserIntent::Chat => "chat",
            UserIntent::Memorize => "memorize",
            UserIntent::Recall => "recall",
            UserIntent::Analyze => "analyze",
            UserIntent::Unknown => "unknown",
        }
    }

    /// Parse from the wire string form
    pub fn parse_name(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "search" => UserIntent::Search,
            "chat" => UserIntent::Chat,
            "memorize" => UserIntent::Memorize,
            "recall" => UserIntent::Recall,
            "analyze" => UserIntent::Analyze,
            _ => UserIntent::Unknown,
        }
    }
}

impl std::fmt::Display for UserIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recognized intent with entities and filled slots
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentResult {
    /// Detected intent
    pub intent: UserIntent,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Producing level
    pub level: InferenceLevelTag,
    /// Entities detected in the query
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<Entity>,
    /// Intent-specific slots
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub slots: BTreeMap<String, Value>,
    /// Recognizer annotations
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

// ============================================================================
// RULE LEVEL
// ============================================================================

/// Keyword-pattern intent level.
///
/// Patterns are checked in a fixed intent order and within each intent in
/// list order; the first hit wins with confidence 0.7.
pub struct RuleIntentLevel {
    rules: Vec<(UserIntent, Regex)>,
}

/// Rule-hit confidence
pub const RULE_INTENT_CONFIDENCE: f64 = 0.7;

impl Default for RuleIntentLevel {
    fn default() -> Self {
        let patterns: [(UserIntent, &str); 4] = [
            (
                UserIntent::Search,
                r"(?i)搜索|查找|检索|有没有|什么是|search|find|query|lookup",
            ),
            (
                UserIntent::Memorize,
                r"(?i)记住|保存|存储|记录|记下|记忆|remember|save|store",
            ),
            (
                UserIntent::Recall,
                r"(?i)回忆|想起|记得|之前|以前|recall|回顾",
            ),
            (
                UserIntent::Analyze,
                r"(?i)分析|总结|归纳|统计|报告|analyze|analyse|summary|report",
            ),
        ];
        Self {
            rules: patterns
                .into_iter()
                .map(|(intent, pattern)| (intent, Regex::new(pattern).unwrap()))
                .collect(),
        }
    }
}

impl RuleIntentLevel {
    fn matched_intent(&self, text: &str) -> Option<(UserIntent, String)> {
        for (intent, pattern) in &self.rules {
            if let Some(m) = pattern.find(text) {
                return Some((*intent, m.as_str().to_string()));
            }
        }
        None
    }
}

#[async_trait]
impl InferenceLevel for RuleIntentLevel {
    fn tag(&self) -> InferenceLevelTag {
        InferenceLevelTag::Rule
    }

    async fn infer(&self, input: &str, _context: &InferenceContext) -> Result<InferenceResult> {
        match self.matched_intent(input) {
            Some((intent, keyword)) => Ok(InferenceResult::new(
                json!({ "intent": intent.as_str() }),
                RULE_INTENT_CONFIDENCE,
                InferenceLevelTag::Rule,
            )
            .with_meta("method", json!("rule"))
            .with_meta("keyword", json!(keyword))),
            None => Ok(InferenceResult::new(
                json!({ "intent": UserIntent::Unknown.as_str() }),
                0.0,
                InferenceLevelTag::Rule,
            )
            .with_meta("method", json!("rule"))),
        }
    }
}

// ============================================================================
// LM LEVEL
// ============================================================================

/// LM intent level returning `{intent, confidence, reason}`
pub struct LmIntentLevel {
    transport: Arc<dyn LmTransport>,
    lm_config: LmConfig,
}

impl LmIntentLevel {
    /// Create an LM level over the given transport
    pub fn new(transport: Arc<dyn LmTransport>, lm_config: LmConfig) -> Self {
        Self {
            transport,
            lm_config,
        }
    }
}

#[async_trait]
impl InferenceLevel for LmIntentLevel {
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
            "Classify the user's intent. Choose exactly one:\n\
             - search: looking for knowledge or information\n\
             - chat: small talk, greetings, everyday conversation\n\
             - memorize: wants something stored or recorded\n\
             - recall: wants to review past information\n\
             - analyze: wants a summary, analysis, or statistics\n\
             - unknown: cannot be determined\n\n\
             User input: {input}\n\n\
             Reply with JSON only: {{\"intent\": \"...\", \"confidence\": 0.0-1.0, \"reason\": \"...\"}}"
        );
        let messages = [Message::user(prompt)];
        let options = LmOptions::deterministic(120);

        let response = call_with_policy(&self.lm_config, || {
            self.transport.generate(&messages, &options)
        })
        .await?;

        let value = extract_json(&response.content)?;
        let intent = value
            .get("intent")
            .and_then(Value::as_str)
            .map(UserIntent::parse_name)
            .ok_or_else(|| CoreError::Parse("intent response missing 'intent'".to_string()))?;
        let confidence = value
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);

        let mut result = InferenceResult::new(
            json!({ "intent": intent.as_str() }),
            confidence,
            InferenceLevelTag::Llm,
        )
        .with_meta("method", json!("llm"));
        if let Some(reason) = value.get("reason").and_then(Value::as_str) {
            result = result.with_meta("reason", json!(reason));
        }
        Ok(result)
    }
}

// ============================================================================
// RECOGNIZER
// ============================================================================

/// Cascaded intent recognizer with slot filling
pub struct IntentRecognizer {
    engine: CascadeEngine,
    ner: Option<Arc<EntityExtractor>>,
    time_ranges: Vec<(&'static str, Regex)>,
}

impl IntentRecognizer {
    /// Rule-only recognizer
    pub fn rule_only(config: CascadeConfig, ner: Option<Arc<EntityExtractor>>) -> Self {
        let mut engine = CascadeEngine::new(config, FallbackStrategy::BestOf);
        engine.add_level(Arc::new(RuleIntentLevel::default()));
        Self::assemble(engine, ner)
    }

    /// Rule + LM recognizer
    pub fn with_llm(
        config: CascadeConfig,
        transport: Arc<dyn LmTransport>,
        lm_config: LmConfig,
        ner: Option<Arc<EntityExtractor>>,
    ) -> Self {
        let mut engine = CascadeEngine::new(config, FallbackStrategy::BestOf);
        engine.add_level(Arc::new(RuleIntentLevel::default()));
        engine.add_level(Arc::new(LmIntentLevel::new(transport, lm_config)));
        Self::assemble(engine, ner)
    }

    fn assemble(engine: CascadeEngine, ner: Option<Arc<EntityExtractor>>) -> Self {
        let time_ranges = vec![
            ("today", Regex::new(r"(?i)今天|\btoday\b").unwrap()),
            ("yesterday", Regex::new(r"(?i)昨天|\byesterday\b").unwrap()),
            (
                "last_week",
                Regex::new(r"(?i)上周|上星期|\blast week\b").unwrap(),
            ),
            (
                "last_month",
                Regex::new(r"(?i)上个月|上月|\blast month\b").unwrap(),
            ),
        ];
        Self {
            engine,
            ner,
            time_ranges,
        }
    }

    /// Recognize the intent of a query and fill its slots
    pub async fn recognize(
        &self,
        text: &str,
        context: &InferenceContext,
    ) -> Result<IntentResult> {
        if text.trim().is_empty() {
            return Ok(IntentResult {
                intent: UserIntent::Unknown,
                confidence: 0.0,
                level: InferenceLevelTag::Rule,
                entities: Vec::new(),
                slots: BTreeMap::new(),
                metadata: serde_json::Map::new(),
            });
        }

        let raw = self.engine.infer(text, context).await?;
        let intent = raw
            .value
            .get("intent")
            .and_then(Value::as_str)
            .map(UserIntent::parse_name)
            .unwrap_or_default();

        let entities = match &self.ner {
            Some(ner) => ner.extract(text).await.unwrap_or_default(),
            None => Vec::new(),
        };

        let slots = self.fill_slots(text, intent, &entities);

        Ok(IntentResult {
            intent,
            confidence: raw.confidence,
            level: raw.level,
            entities,
            slots,
            metadata: raw.metadata,
        })
    }

    fn fill_slots(
        &self,
        text: &str,
        intent: UserIntent,
        entities: &[Entity],
    ) -> BTreeMap<String, Value> {
        let mut slots = BTreeMap::new();

        match intent {
            UserIntent::Search => {
                slots.insert("query".to_string(), json!(text));
                if let Some(topic) = entities.iter().find(|e| e.kind == EntityKind::Topic) {
                    slots.insert("topic".to_string(), json!(topic.text));
                }
            }
            UserIntent::Recall => {
                for (token, pattern) in &self.time_ranges {
                    if pattern.is_match(text) {
                        slots.insert("time_range".to_string(), json!(token));
                        break;
                    }
                }
            }
            UserIntent::Memorize => {
                slots.insert("content".to_string(), json!(text));
            }
            UserIntent::Analyze => {
                let lower = text.to_lowercase();
                if lower.contains("总结") || lower.contains("summary") {
                    slots.insert("analyze_type".to_string(), json!("summary"));
                } else if lower.contains("统计") || lower.contains("statistics") {
                    slots.insert("analyze_type".to_string(), json!("statistics"));
                }
            }
            UserIntent::Chat | UserIntent::Unknown => {}
        }

        slots
    }
}

// ============================================================================
// TESTS
// ============================================================================
