use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Accepts the `user_id` metadata key as either a JSON string or an
/// int-like number (string, int, int64, float64). Never branches on
/// runtime type beyond this one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Text(String),
    Number(i64),
}

impl UserId {
    pub fn as_key(&self) -> String {
        match self {
            UserId::Text(s) => s.clone(),
            UserId::Number(n) => n.to_string(),
        }
    }

    /// Best-effort conversion from an arbitrary JSON value, matching the
    /// acceptance rule string | int | int64 | float64.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(UserId::Text(s.clone())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(UserId::Number(i))
                } else {
                    n.as_f64().map(|f| UserId::Number(f as i64))
                }
            }
            _ => None,
        }
    }
}

/// Open-typed message metadata, modelled as a tagged union over the fixed
/// set of recognised keys plus an overflow map for everything else.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subagent_result: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subagent_label: Option<String>,
    #[serde(flatten)]
    pub overflow: HashMap<String, Value>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_id(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_tokens(mut self, input: u32, output: u32) -> Self {
        self.input_tokens = Some(input);
        self.output_tokens = Some(output);
        self
    }

    pub fn subagent(label: impl Into<String>) -> Self {
        Self {
            subagent_result: Some(true),
            subagent_label: Some(label.into()),
            ..Default::default()
        }
    }

    /// Get an overflow key, looking only in the unrecognised-key bag.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.overflow.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.overflow.insert(key.into(), value);
    }
}

/// An immutable chat message, the unit of conversation exchanged between a
/// channel, the coordinator, and the model provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    pub channel: String,
    pub from: String,
    pub is_bot: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Message {
    pub fn user(channel: impl Into<String>, from: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            channel: channel.into(),
            from: from.into(),
            is_bot: false,
            timestamp: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    pub fn bot(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            channel: channel.into(),
            from: "assistant".to_string(),
            is_bot: true,
            timestamp: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Rough token-cost estimate used by the compactor: chars/4 plus a
    /// small fixed per-message overhead.
    pub fn estimated_tokens(&self) -> usize {
        const PER_MESSAGE_OVERHEAD: usize = 4;
        self.text.chars().count() / 4 + PER_MESSAGE_OVERHEAD
    }

    /// Resolve the `user_id` the message should be keyed on:
    /// metadata.user_id first (accepting string/int-like), else `from`,
    /// else `"unknown"`.
    pub fn resolve_user_id(&self) -> String {
        if let Some(ref uid) = self.metadata.user_id {
            return uid.as_key();
        }
        if !self.from.is_empty() {
            return self.from.clone();
        }
        "unknown".to_string()
    }
}

/// `<channel>:<user_id>` session key, parsed by a single split on the
/// first `:`.
pub fn session_key(channel: &str, user_id: &str) -> String {
    format!("{}:{}", channel, user_id)
}

pub fn parse_session_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(':')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_from_value_accepts_string_int_float() {
        assert_eq!(
            UserId::from_value(&Value::String("42".into())),
            Some(UserId::Text("42".into()))
        );
        assert_eq!(
            UserId::from_value(&serde_json::json!(42)),
            Some(UserId::Number(42))
        );
        assert_eq!(
            UserId::from_value(&serde_json::json!(42.0)),
            Some(UserId::Number(42))
        );
    }

    #[test]
    fn resolve_user_id_falls_back_to_from_then_unknown() {
        let mut m = Message::user("telegram", "alice", "hi");
        assert_eq!(m.resolve_user_id(), "alice");
        m.from = String::new();
        assert_eq!(m.resolve_user_id(), "unknown");
        m.metadata.user_id = Some(UserId::Text("bob".into()));
        assert_eq!(m.resolve_user_id(), "bob");
    }

    #[test]
    fn session_key_roundtrip() {
        let key = session_key("telegram", "42");
        assert_eq!(key, "telegram:42");
        assert_eq!(parse_session_key(&key), Some(("telegram", "42")));
    }

    #[test]
    fn session_key_splits_on_first_colon_only() {
        assert_eq!(parse_session_key("api:user:1"), Some(("api", "user:1")));
    }

    #[test]
    fn estimated_tokens_scales_with_text_length() {
        let short = Message::user("api", "u", "hi");
        let long = Message::user("api", "u", &"x".repeat(400));
        assert!(long.estimated_tokens() > short.estimated_tokens());
    }
}
