//! Summarizer collaborators
//!
//! A [`Summarizer`] turns the model-safe prefix of a conversation into a
//! synthetic user/assistant pair that stands in for it.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{Result, TurnstileError};
use crate::llm::{LLMProvider, LLMRequest};
use crate::message::Message;

/// Shadow prompt used when no summarizer is configured
pub const FALLBACK_SHADOW_PROMPT: &str = "Summarize the conversation we had so far.";

/// Summary text used when no summarizer is configured
pub const FALLBACK_SUMMARY: &str = "Summary unavailable.";

const SUMMARY_SYSTEM_PROMPT: &str = "You condense conversations. Preserve facts, decisions, open questions and anything needed to continue the conversation.";

/// Replacement for a summarized prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryPair {
    /// Synthetic user prompt
    pub user_shadow: String,
    /// Assistant-authored summary
    pub assistant_summary: String,
}

impl SummaryPair {
    pub fn new(user_shadow: impl Into<String>, assistant_summary: impl Into<String>) -> Self {
        Self {
            user_shadow: user_shadow.into(),
            assistant_summary: assistant_summary.into(),
        }
    }

    /// The deterministic pair used without a summarizer
    pub fn fallback() -> Self {
        Self::new(FALLBACK_SHADOW_PROMPT, FALLBACK_SUMMARY)
    }
}

/// External summarization collaborator.
///
/// Implementations may take arbitrarily long; the session never holds its
/// lock while awaiting them. Any error means the summary is not applied.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `messages` (the prefix being compacted, in order)
    async fn summarize(&self, messages: &[Message]) -> Result<SummaryPair>;

    /// Get the summarizer name
    fn name(&self) -> &'static str {
        "custom"
    }
}

/// Returns [`SummaryPair::fallback`] for every prefix
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackSummarizer;

#[async_trait]
impl Summarizer for FallbackSummarizer {
    async fn summarize(&self, _messages: &[Message]) -> Result<SummaryPair> {
        Ok(SummaryPair::fallback())
    }

    fn name(&self) -> &'static str {
        "fallback"
    }
}

/// Summarizer backed by an [`LLMProvider`]
pub struct LlmSummarizer {
    llm: Arc<dyn LLMProvider>,
    shadow_prompt: String,
    max_tokens: usize,
}

impl LlmSummarizer {
    /// Create a summarizer using the default shadow prompt
    pub fn new(llm: Arc<dyn LLMProvider>) -> Self {
        Self {
            llm,
            shadow_prompt: FALLBACK_SHADOW_PROMPT.to_string(),
            max_tokens: 400,
        }
    }

    /// Override the synthetic user prompt placed before the summary
    pub fn with_shadow_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.shadow_prompt = prompt.into();
        self
    }

    /// Cap the summary length
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_request(&self, messages: &[Message]) -> LLMRequest {
        let transcript = render_transcript(messages);
        let prompt = format!(
            r#"Summarize the following conversation concisely, preserving key information, decisions, and context that would be important for continuing the conversation:

{}

Provide a brief summary:"#,
            transcript
        );

        LLMRequest::with_system_prompt(SUMMARY_SYSTEM_PROMPT, prompt)
            .with_temperature(0.3)
            .with_max_tokens(self.max_tokens)
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, messages: &[Message]) -> Result<SummaryPair> {
        let request = self.build_request(messages);
        let response = self.llm.generate_request(&request).await?;

        let summary = response.content.trim();
        if summary.is_empty() {
            return Err(TurnstileError::Summarizer(
                "LLM returned an empty summary".to_string(),
            ));
        }

        Ok(SummaryPair::new(self.shadow_prompt.clone(), summary))
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}

/// `Role: content` lines, one message per paragraph
fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| match &m.name {
            Some(name) => format!("{} ({}): {}", m.role, name, m.content),
            None => format!("{}: {}", m.role, m.content),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
