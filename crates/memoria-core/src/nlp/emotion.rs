//! Emotion detection.
//!
//! Level 1 counts positive/negative lexicon hits; level 2 asks the LM for
//! a structured `{type, intensity, reason}` judgement. The rule layer's
//! confidence schedule:
//!
//! | matches    | 0   | 1   | 2    | >=3              |
//! |------------|-----|-----|------|------------------|
//! | base       | 0.4 | 0.6 | 0.75 | min(0.9, 0.6+n/10) |
//!
//! plus 0.1 for short text (< 20 chars) with at least one match, and an
//! override to 0.5 when the verdict is neutral on long text (> 50 chars),
//! where the LM is worth consulting.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::{CascadeConfig, LmConfig};
use crate::error::{CoreError, Result};
use crate::inference::{
    CascadeEngine, FallbackStrategy, InferenceContext, InferenceLevel, InferenceLevelTag,
    InferenceResult,
};
use crate::llm::{LmOptions, LmTransport, Message, call_with_policy, extract_json};

// ============================================================================
// TYPES
// ============================================================================

/// Emotion classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmotionKind {
    /// Positive affect
    Positive,
    /// Negative affect
    Negative,
    /// No clear affect
    #[default]
    Neutral,
}

impl EmotionKind {
    /// Stable string form
    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionKind::Positive => "positive",
            EmotionKind::Negative => "negative",
            EmotionKind::Neutral => "neutral",
        }
    }

    /// Parse leniently from LM output
    pub fn parse_name(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "positive" | "happy" | "joy" => EmotionKind::Positive,
            "negative" | "sad" | "angry" | "anxious" => EmotionKind::Negative,
            _ => EmotionKind::Neutral,
        }
    }
}

/// Normalized emotion detection output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmotionResult {
    /// Detected emotion
    pub kind: EmotionKind,
    /// Intensity in [0, 1]
    pub intensity: f64,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Producing level
    pub level: InferenceLevelTag,
    /// Detector annotations
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

// ============================================================================
// LEXICONS
// ============================================================================

fn default_positive_lexicon() -> HashSet<&'static str> {
    [
        // Chinese
        "开心", "快乐", "高兴", "喜欢", "爱", "棒", "赞", "哈哈", "兴奋", "激动", "满意",
        "幸福", "愉快", "欢乐", "舒服", "美好", "太好了", "不错", "很棒", "完美", "优秀",
        "精彩",
        // English
        "happy", "joy", "love", "like", "good", "great", "awesome", "excellent", "wonderful",
        "fantastic", "perfect", "amazing", "excited", "glad", "pleased", "delighted",
        "satisfied",
    ]
    .into_iter()
    .collect()
}

fn default_negative_lexicon() -> HashSet<&'static str> {
    [
        // Chinese
        "难过", "伤心", "痛苦", "讨厌", "恨", "烂", "糟", "唉", "失望", "沮丧", "郁闷",
        "焦虑", "害怕", "担心", "烦", "累", "不好", "不行", "失败", "错误", "糟糕", "可怕",
        // English
        "sad", "unhappy", "bad", "terrible", "awful", "horrible", "disappointed",
        "frustrated", "angry", "hate", "dislike", "worried", "anxious", "afraid", "scared",
        "upset", "depressed",
    ]
    .into_iter()
    .collect()
}

// ============================================================================
// RULE LEVEL
// ============================================================================

/// Lexicon-count emotion level
pub struct RuleEmotionLevel {
    positive: HashSet<&'static str>,
    negative: HashSet<&'static str>,
}

impl Default for RuleEmotionLevel {
    fn default() -> Self {
        Self {
            positive: default_positive_lexicon(),
            negative: default_negative_lexicon(),
        }
    }
}

impl RuleEmotionLevel {
    fn classify(&self, text: &str) -> InferenceResult {
        let lower = text.to_lowercase();
        let text_length = text.chars().count();

        let positive_count = self.positive.iter().filter(|w| lower.contains(**w)).count();
        let negative_count = self.negative.iter().filter(|w| lower.contains(**w)).count();
        let total = positive_count + negative_count;

        let (kind, dominant) = if positive_count > negative_count {
            (EmotionKind::Positive, positive_count)
        } else if negative_count > positive_count {
            (EmotionKind::Negative, negative_count)
        } else {
            (EmotionKind::Neutral, 0)
        };

        let intensity = if dominant == 0 {
            0.5
        } else {
            (0.6 + 0.1 * dominant as f64).min(0.9)
        };

        let mut confidence = match total {
            0 => 0.4,
            1 => 0.6,
            2 => 0.75,
            n => (0.6 + 0.1 * n as f64).min(0.9),
        };
        if text_length < 20 && total > 0 {
            confidence = (confidence + 0.1).min(1.0);
        }
        if kind == EmotionKind::Neutral && text_length > 50 {
            confidence = 0.5;
        }

        InferenceResult::new(
            json!({ "type": kind.as_str(), "intensity": intensity }),
            confidence,
            InferenceLevelTag::Rule,
        )
        .with_meta("method", json!("rule"))
        .with_meta("positiveCount", json!(positive_count))
        .with_meta("negativeCount", json!(negative_count))
        .with_meta("textLength", json!(text_length))
    }
}

#[async_trait]
impl InferenceLevel for RuleEmotionLevel {
    fn tag(&self) -> InferenceLevelTag {
        InferenceLevelTag::Rule
    }

    async fn infer(&self, input: &str, _context: &InferenceContext) -> Result<InferenceResult> {
        Ok(self.classify(input))
    }
}

// ============================================================================
// LM LEVEL
// ============================================================================

/// Structured-prompt emotion level
pub struct LmEmotionLevel {
    transport: Arc<dyn LmTransport>,
    lm_config: LmConfig,
}

impl LmEmotionLevel {
    /// Create an LM level over the given transport
    pub fn new(transport: Arc<dyn LmTransport>, lm_config: LmConfig) -> Self {
        Self {
            transport,
            lm_config,
        }
    }
}

#[async_trait]
impl InferenceLevel for LmEmotionLevel {
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
            "Classify the emotion of the following text.\n\
             Text: {input}\n\n\
             Reply with JSON only: {{\"type\": \"positive|negative|neutral\", \
             \"intensity\": 0.0-1.0, \"reason\": \"...\"}}"
        );
        let messages = [Message::user(prompt)];
        let options = LmOptions::deterministic(120);

        let response = call_with_policy(&self.lm_config, || {
            self.transport.generate(&messages, &options)
        })
        .await?;

        let value = extract_json(&response.content)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .map(EmotionKind::parse_name)
            .ok_or_else(|| CoreError::Parse("emotion response missing 'type'".to_string()))?;
        let intensity = value
            .get("intensity")
            .and_then(Value::as_f64)
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);

        let mut result = InferenceResult::new(
            json!({ "type": kind.as_str(), "intensity": intensity }),
            0.9,
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
// DETECTOR
// ============================================================================

/// Cascaded emotion detector
pub struct EmotionDetector {
    engine: CascadeEngine,
}

impl EmotionDetector {
    /// Rule-only detector
    pub fn rule_only(config: CascadeConfig) -> Self {
        let mut engine = CascadeEngine::new(config, FallbackStrategy::BestOf);
        engine.add_level(Arc::new(RuleEmotionLevel::default()));
        Self { engine }
    }

    /// Rule + LM detector
    pub fn with_llm(
        config: CascadeConfig,
        transport: Arc<dyn LmTransport>,
        lm_config: LmConfig,
    ) -> Self {
        let mut engine = CascadeEngine::new(config, FallbackStrategy::BestOf);
        engine.add_level(Arc::new(RuleEmotionLevel::default()));
        engine.add_level(Arc::new(LmEmotionLevel::new(transport, lm_config)));
        Self { engine }
    }

    /// Detect the emotion of a text
    pub async fn detect(&self, text: &str) -> Result<EmotionResult> {
        if text.trim().is_empty() {
            return Ok(EmotionResult {
                kind: EmotionKind::Neutral,
                intensity: 0.5,
                confidence: 0.5,
                level: InferenceLevelTag::Rule,
                metadata: serde_json::Map::new(),
            });
        }

        let raw = self.engine.infer(text, &InferenceContext::new()).await?;
        Ok(Self::normalize(raw))
    }

    fn normalize(raw: InferenceResult) -> EmotionResult {
        let kind = raw
            .value
            .get("type")
            .and_then(Value::as_str)
            .map(EmotionKind::parse_name)
            .unwrap_or_default();
        let intensity = raw
            .value
            .get("intensity")
            .and_then(Value::as_f64)
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);

        EmotionResult {
            kind,
            intensity,
            confidence: raw.confidence,
            level: raw.level,
            metadata: raw.metadata,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
