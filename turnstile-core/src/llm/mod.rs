//! LLM collaborator interface
//!
//! The engine never talks to a model directly. Callers that want model-written
//! summaries implement [`LLMProvider`] for their client and hand it to
//! [`crate::conversation::LlmSummarizer`].

use async_trait::async_trait;

use crate::error::Result;
use crate::message::Message;

/// Request to an LLM provider
#[derive(Debug, Clone)]
pub struct LLMRequest {
    /// Messages in the conversation
    pub messages: Vec<Message>,

    /// Temperature for generation (0.0-2.0)
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    pub max_tokens: Option<usize>,
}

impl LLMRequest {
    /// Create a request with system prompt
    pub fn with_system_prompt(
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Self {
        Self {
            messages: vec![Message::system(system_prompt), Message::user(user_prompt)],
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    pub fn with_max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = Some(tokens);
        self
    }
}

/// Response from an LLM provider
#[derive(Debug, Clone)]
pub struct LLMResponse {
    /// Generated content
    pub content: String,
}

/// Trait for LLM provider implementations.
///
/// Implementors handle the actual model call (OpenAI, Claude, a local model)
/// including their own transport timeouts.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate a response for a structured request
    async fn generate_request(&self, request: &LLMRequest) -> Result<LLMResponse>;
}
