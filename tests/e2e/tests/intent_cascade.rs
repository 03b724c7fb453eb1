//! Cascade behavior of the NLP detectors: rule-layer early exit, LM
//! escalation, and result caching.

use std::sync::Arc;

use memoria_core::{
    CascadeConfig, EmotionDetector, EmotionKind, EntityExtractor, EntityKind, InferenceContext,
    InferenceLevelTag, IntentRecognizer, LmConfig, UserIntent,
};
use memoria_e2e_tests::mocks::ScriptedTransport;

fn recognizer_with(transport: Arc<ScriptedTransport>) -> IntentRecognizer {
    IntentRecognizer::with_llm(
        CascadeConfig::default(),
        transport,
        LmConfig::default(),
        None,
    )
}

#[tokio::test]
async fn rule_sufficient_intent_never_calls_the_lm() {
    let transport = Arc::new(ScriptedTransport::empty());
    let recognizer = recognizer_with(transport.clone());

    let result = recognizer
        .recognize("搜索关于量子计算的资料", &InferenceContext::new())
        .await
        .unwrap();

    assert_eq!(result.intent, UserIntent::Search);
    assert_eq!(result.confidence, 0.7);
    assert_eq!(result.level, InferenceLevelTag::Rule);
    assert_eq!(
        result.slots["query"].as_str().unwrap(),
        "搜索关于量子计算的资料"
    );
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn uncertain_input_escalates_to_the_lm() {
    let transport = Arc::new(ScriptedTransport::with_responses([
        r#"{"intent": "chat", "confidence": 0.85, "reason": "open-ended request for ideas"}"#,
    ]));
    let recognizer = recognizer_with(transport.clone());

    let result = recognizer
        .recognize("帮我想想下一步怎么办", &InferenceContext::new())
        .await
        .unwrap();

    assert_eq!(result.intent, UserIntent::Chat);
    assert_eq!(result.level, InferenceLevelTag::Llm);
    assert!((result.confidence - 0.85).abs() < 1e-9);
    assert_eq!(transport.call_count(), 1);

    // Both level attempts are on record.
    let attempts = result.metadata.get("attempts").unwrap().as_array().unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0]["level"], "rule");
    assert_eq!(attempts[1]["level"], "llm");
}

#[tokio::test]
async fn accepted_results_are_cached() {
    let transport = Arc::new(ScriptedTransport::with_responses([
        r#"{"intent": "chat", "confidence": 0.9, "reason": "small talk"}"#,
    ]));
    let recognizer = recognizer_with(transport.clone());
    let ctx = InferenceContext::new();

    let first = recognizer.recognize("帮我想想下一步怎么办", &ctx).await.unwrap();
    let second = recognizer.recognize("帮我想想下一步怎么办", &ctx).await.unwrap();

    assert_eq!(first.intent, second.intent);
    assert_eq!(first.confidence, second.confidence);
    // Second call answered from the cascade cache.
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn malformed_lm_output_degrades_to_rule_result() {
    let transport = Arc::new(ScriptedTransport::with_responses([
        "I am not sure what you mean by that.",
    ]));
    let recognizer = recognizer_with(transport.clone());

    let result = recognizer
        .recognize("帮我想想下一步怎么办", &InferenceContext::new())
        .await
        .unwrap();

    // Parse failure marks the LM level failed; best-of falls back to the
    // rule layer's unknown verdict. The call is never retried.
    assert_eq!(result.intent, UserIntent::Unknown);
    assert_eq!(result.level, InferenceLevelTag::Rule);
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn emotion_detector_escalates_on_long_neutral_text() {
    let transport = Arc::new(ScriptedTransport::with_responses([
        r#"{"type": "negative", "intensity": 0.7, "reason": "frustration under the surface"}"#,
    ]));
    let detector = EmotionDetector::with_llm(
        CascadeConfig::default(),
        transport.clone(),
        LmConfig::default(),
    );

    // No lexicon hit, > 50 chars: the rule layer caps at 0.5 confidence.
    let text = "The deployment pipeline finished in about forty minutes \
                and nobody said anything about it afterwards.";
    let result = detector.detect(text).await.unwrap();

    assert_eq!(result.kind, EmotionKind::Negative);
    assert_eq!(result.level, InferenceLevelTag::Llm);
    assert!((result.confidence - 0.9).abs() < 1e-9);
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn ner_escalates_when_rules_find_nothing() {
    let transport = Arc::new(ScriptedTransport::with_responses([
        r#"[{"text": "东京", "type": "location"}, {"text": "小王", "type": "person"}]"#,
    ]));
    let extractor = EntityExtractor::with_llm(
        CascadeConfig::default(),
        transport.clone(),
        LmConfig::default(),
    );

    let entities = extractor.extract("下周和小王一起去东京出差").await.unwrap();

    assert_eq!(transport.call_count(), 1);
    assert!(entities
        .iter()
        .any(|e| e.text == "东京" && e.kind == EntityKind::Location));
    assert!(entities
        .iter()
        .any(|e| e.text == "小王" && e.kind == EntityKind::Person));
}
