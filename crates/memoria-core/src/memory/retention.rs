//! Retention classification.
//!
//! Decides how long a candidate memory should live: `permanent`,
//! `temporary`, or `casual_chat`. Resolution order: an explicit hint in
//! the context, then keyword lexicons, then a length heuristic, then
//! (for long text, when wired) an LM decision. TTL values come from
//! [`RetentionConfig`] and nowhere else - the LM prompt renders the same
//! numbers the sweeper enforces.

use std::sync::Arc;

use serde_json::Value;

use crate::config::{LmConfig, RetentionConfig};
use crate::error::{CoreError, Result};
use crate::inference::InferenceContext;
use crate::llm::{LmOptions, LmTransport, Message, call_with_policy};
use crate::model::RetentionType;

/// Context key carrying an explicit retention hint
pub const RETENTION_HINT_KEY: &str = "retention_type";

const PERMANENT_KEYWORDS: &[&str] = &[
    "学习", "笔记", "总结", "重要", "记录", "保存", "经验", "教训", "思考", "反思", "项目",
    "计划", "决定", "决策", "会议", "讨论", "方案", "设计",
    "learned", "notes", "important", "decision", "project", "plan", "design", "meeting",
];

const CASUAL_KEYWORDS: &[&str] = &[
    "你好", "再见", "谢谢", "好的", "ok", "收到", "天气", "晚安", "早上好", "嗯", "哦", "啊",
    "hello", "hi", "bye", "thanks", "test", "测试",
];

const TEMPORARY_KEYWORDS: &[&str] = &[
    "今天", "明天", "待办", "提醒", "临时", "一会", "稍后", "马上", "现在",
    "today", "tomorrow", "todo", "remind", "later",
];

/// Casual keywords only decide for short messages
const CASUAL_LENGTH_LIMIT: usize = 20;
/// Below this the message is casual regardless of keywords
const SHORT_MESSAGE_LIMIT: usize = 10;
/// Below this (and above short) the message defaults to temporary
const MEDIUM_MESSAGE_LIMIT: usize = 50;

/// Cascading retention classifier
pub struct RetentionClassifier {
    retention: RetentionConfig,
    transport: Option<Arc<dyn LmTransport>>,
    lm_config: LmConfig,
}

impl RetentionClassifier {
    /// Rule-only classifier
    pub fn new(retention: RetentionConfig) -> Self {
        Self {
            retention,
            transport: None,
            lm_config: LmConfig::default(),
        }
    }

    /// Classifier with an LM for the long-message case
    pub fn with_llm(
        retention: RetentionConfig,
        transport: Arc<dyn LmTransport>,
        lm_config: LmConfig,
    ) -> Self {
        Self {
            retention,
            transport: Some(transport),
            lm_config,
        }
    }

    /// The retention TTL configuration
    pub fn config(&self) -> &RetentionConfig {
        &self.retention
    }

    /// TTL in days for a retention type (None = permanent)
    pub fn ttl_days(&self, retention: RetentionType) -> Option<i64> {
        match retention {
            RetentionType::Permanent => None,
            RetentionType::Temporary => Some(self.retention.temporary_ttl_days),
            RetentionType::CasualChat => Some(self.retention.casual_ttl_days),
        }
    }

    /// Classify a candidate message
    pub async fn classify(
        &self,
        message: &str,
        context: &InferenceContext,
    ) -> Result<RetentionType> {
        // 1. Explicit hint wins.
        if let Some(hint) = context.get(RETENTION_HINT_KEY).and_then(Value::as_str) {
            return RetentionType::parse_name(hint).ok_or_else(|| {
                CoreError::Validation(format!("unknown retention hint: {hint}"))
            });
        }

        let trimmed = message.trim();
        let lower = trimmed.to_lowercase();
        let length = trimmed.chars().count();

        // 2. Keyword lexicons.
        if PERMANENT_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            return Ok(RetentionType::Permanent);
        }
        if CASUAL_KEYWORDS.iter().any(|kw| lower.contains(kw)) && length < CASUAL_LENGTH_LIMIT {
            return Ok(RetentionType::CasualChat);
        }
        if TEMPORARY_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            return Ok(RetentionType::Temporary);
        }

        // 3. Length heuristic.
        if length < SHORT_MESSAGE_LIMIT {
            return Ok(RetentionType::CasualChat);
        }
        if length < MEDIUM_MESSAGE_LIMIT {
            return Ok(RetentionType::Temporary);
        }

        // 4. Long message: ask the LM when available, else temporary.
        match self.transport.as_ref().filter(|t| t.is_configured()) {
            Some(transport) => match self.llm_classify(transport, trimmed).await {
                Ok(retention) => Ok(retention),
                Err(CoreError::Cancelled) => Err(CoreError::Cancelled),
                Err(e) => {
                    tracing::debug!("retention LM classification failed, using temporary: {e}");
                    Ok(RetentionType::Temporary)
                }
            },
            None => Ok(RetentionType::Temporary),
        }
    }

    async fn llm_classify(
        &self,
        transport: &Arc<dyn LmTransport>,
        message: &str,
    ) -> Result<RetentionType> {
        let prompt = format!(
            "Classify how long this message should be retained:\n\
             - permanent: knowledge worth keeping indefinitely (notes, \
             lessons, decisions, project discussions)\n\
             - temporary: short-lived information, removable after {} days \
             (todos, reminders, passing thoughts)\n\
             - casual_chat: small talk not worth storing, removable after {} day(s)\n\n\
             Message: {message}\n\n\
             Reply with exactly one word: permanent, temporary, or casual_chat.",
            self.retention.temporary_ttl_days, self.retention.casual_ttl_days
        );
        let messages = [Message::user(prompt)];
        let options = LmOptions::deterministic(10);

        let response = call_with_policy(&self.lm_config, || {
            transport.generate(&messages, &options)
        })
        .await?;

        let answer = response.content.trim().to_lowercase();
        if answer.contains("permanent") {
            Ok(RetentionType::Permanent)
        } else if answer.contains("casual") {
            Ok(RetentionType::CasualChat)
        } else {
            Ok(RetentionType::Temporary)
        }
    }
}
