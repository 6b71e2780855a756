//! # Turnstile - Turn-aware conversation compaction
//!
//! Turnstile keeps a conversation's message history bounded by real user
//! turns. When a conversation grows past its turn limit, the oldest turns are
//! replaced by a synthetic user/assistant summary pair while the most recent
//! turns stay verbatim.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use turnstile_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let session = Arc::new(CompactingSession::new(2, 4)?);
//!
//!     let item = serde_json::json!({"role": "user", "content": "Hello"});
//!     if let serde_json::Value::Object(raw) = item {
//!         session.add_items(vec![raw]).await;
//!     }
//!
//!     // Only role/content/name ever reach the model
//!     let messages = session.get_items(None).await;
//!     assert_eq!(messages.len(), 1);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Records**: raw items are split into a model-safe [`message::Message`]
//!   and structured metadata
//! - **Turn boundaries**: real user messages start turns; synthetic summary
//!   records never do
//! - **Summarizers**: pluggable collaborators, called without holding the
//!   session lock
//! - **Re-validation**: a summary is only applied if the store was not
//!   cleared, popped or compacted in the meantime

pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod message;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::CompactionConfig;
    pub use crate::conversation::{
        CompactingSession, CompactionOutcome, CompactionStats, FallbackSummarizer, LlmSummarizer,
        RawItem, Record, RecordKind, RecordMetadata, SessionSnapshot, Summarizer, SummaryPair,
    };
    pub use crate::error::{Result, TurnstileError};
    pub use crate::llm::{LLMProvider, LLMRequest, LLMResponse};
    pub use crate::message::{Message, MessageRole};
}
