//! Conversation Compaction
//!
//! Turn-aware conversation storage that collapses old turns into a summary.
//!
//! # Features
//!
//! - Ingestion of loosely-typed items into message + metadata records
//! - Turn boundary detection that ignores synthetic records
//! - Summarization outside the session lock with re-validation before apply
//! - Separate model-safe and full-metadata views
//!
//! # Example
//!
//! ```rust,ignore
//! use turnstile_core::conversation::CompactingSession;
//!
//! let session = CompactingSession::new(2, 4)?;
//! session.add_items(items).await;
//!
//! let messages = session.get_items(None).await;
//! ```

mod record;
mod session;
mod summarizer;
mod turns;

pub use record::{RawItem, Record, RecordKind, RecordMetadata, SUMMARY_KIND, SUMMARY_PROMPT_KIND};
pub use session::{CompactingSession, CompactionOutcome, CompactionStats, SessionSnapshot};
pub use summarizer::{
    FALLBACK_SHADOW_PROMPT, FALLBACK_SUMMARY, FallbackSummarizer, LlmSummarizer, Summarizer,
    SummaryPair,
};
pub use turns::{Decision, decide, turn_starts};
