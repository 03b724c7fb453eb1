//! NLP detectors.
//!
//! Emotion, entity, and intent detection, each an instantiation of the
//! cascade pattern: a rule level that answers the common case in
//! microseconds, and an optional LM level for the uncertain remainder.

pub mod emotion;
pub mod intent;
pub mod ner;

pub use emotion::{EmotionDetector, EmotionKind, EmotionResult};
pub use intent::{IntentRecognizer, IntentResult, UserIntent};
pub use ner::{Entity, EntityExtractor, EntityKind};

/// Deduplicate entities by `(lowercase text, kind)`, preserving first
/// occurrence order.
pub fn dedup_entities(entities: Vec<Entity>) -> Vec<Entity> {
    let mut seen = std::collections::HashSet::new();
    entities
        .into_iter()
        .filter(|e| seen.insert((e.text.to_lowercase(), e.kind)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_entities() {
        let entities = vec![
            Entity::new("Tokyo", EntityKind::Location),
            Entity::new("tokyo", EntityKind::Location),
            Entity::new("Tokyo", EntityKind::Topic),
        ];
        let deduped = dedup_entities(entities);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].text, "Tokyo");
        assert_eq!(deduped[0].kind, EntityKind::Location);
    }
}
