use crate::message::{Message, Metadata};
use crate::providers::{ChatMessage, ChatRequest, LLMProvider};
use std::sync::Arc;
use tracing::warn;

const CHARS_PER_TOKEN_ESTIMATE: usize = 4;
const PER_MESSAGE_OVERHEAD_TOKENS: usize = 4;

const COMPACTION_PROMPT: &str = "Summarise the following conversation prefix concisely, \
preserving any facts, decisions, or commitments a later assistant turn might need. \
Respond with the summary only, no preamble.\n\n{transcript}";

fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN_ESTIMATE + PER_MESSAGE_OVERHEAD_TOKENS
}

fn estimate_total(messages: &[Message]) -> usize {
    messages.iter().map(|m| estimate_tokens(&m.text)).sum()
}

fn format_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", if m.is_bot { "assistant" } else { "user" }, m.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Stateless transform of a message list, replacing an old prefix with a
/// one-message summary once a token budget is exceeded.
/// Pure with respect to its input: it never mutates a list in place.
pub struct MessageCompactor {
    provider: Arc<dyn LLMProvider>,
    max_context_tokens: usize,
    keep_last_n: usize,
}

impl MessageCompactor {
    pub fn new(provider: Arc<dyn LLMProvider>, max_context_tokens: usize, keep_last_n: usize) -> Self {
        Self { provider, max_context_tokens, keep_last_n }
    }

    pub fn needs_compaction(&self, messages: &[Message]) -> bool {
        estimate_total(messages) > self.max_context_tokens
    }

    /// Summarises everything but the last `keep_last_n` messages into one
    /// synthetic bot/system message. Never loses messages: on any
    /// summarisation failure, or when the prefix is too short to bother
    /// summarising, returns the input unchanged.
    pub async fn compact(&self, messages: &[Message]) -> Vec<Message> {
        if messages.len() < self.keep_last_n + 1 {
            return messages.to_vec();
        }

        let split_at = messages.len() - self.keep_last_n;
        let (prefix, tail) = messages.split_at(split_at);

        let transcript = format_transcript(prefix);
        let prompt = COMPACTION_PROMPT.replace("{transcript}", &transcript);
        let request = ChatRequest::new(vec![ChatMessage::user(prompt)], "You are a precise summariser.");

        match self.provider.chat(request).await {
            Ok(response) if !response.text.trim().is_empty() => {
                let channel = prefix.first().map(|m| m.channel.clone()).unwrap_or_default();
                let summary = Message::bot(channel, response.text).with_metadata(Metadata::new());
                let mut compacted = Vec::with_capacity(1 + tail.len());
                compacted.push(summary);
                compacted.extend_from_slice(tail);
                compacted
            }
            Ok(_) => {
                warn!("compaction summariser returned an empty response, keeping history unchanged");
                messages.to_vec()
            }
            Err(e) => {
                warn!(error = %e, "compaction summariser call failed, keeping history unchanged");
                messages.to_vec()
            }
        }
    }
}
