//! Compacting Conversation Session

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::CompactionConfig;
use crate::error::{Result, TurnstileError};
use crate::message::Message;

use super::record::{RawItem, Record};
use super::summarizer::{Summarizer, SummaryPair};
use super::turns::{self, Decision};

/// What a compaction pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// Real turns within `context_limit`
    NotNeeded,
    /// The prefix before `boundary` was replaced by a summary pair
    Applied {
        boundary: usize,
        records_replaced: usize,
    },
    /// The store changed while the summary was in flight; nothing applied
    Aborted,
    /// The summarizer failed or timed out; nothing applied
    Failed,
}

impl CompactionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CompactionOutcome::Applied { .. })
    }
}

/// Counters for compaction attempts on a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionStats {
    /// Passes that decided compaction was needed
    pub attempts: u64,
    /// Swaps applied
    pub applied: u64,
    /// Attempts discarded by re-validation
    pub aborted: u64,
    /// Attempts whose summarizer call failed
    pub failed: u64,
    /// Records removed by applied swaps
    pub records_compacted: u64,
}

/// Serializable session state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub keep_last_n_turns: usize,
    pub context_limit: usize,
    pub records: Vec<Record>,
}

impl SessionSnapshot {
    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Everything guarded by the session lock
#[derive(Debug)]
struct Store {
    records: VecDeque<Record>,
    keep_last_n_turns: usize,
    context_limit: usize,
    /// Bumped by every destructive mutation; appends leave it alone
    epoch: u64,
    stats: CompactionStats,
}

impl Store {
    fn decide(&self) -> Decision {
        turns::decide(&self.records, self.keep_last_n_turns, self.context_limit)
    }

    fn real_turns(&self) -> usize {
        turns::turn_starts(&self.records).len()
    }
}

/// Captured under the lock before the summarizer call
struct PendingCompaction {
    prefix: Vec<Message>,
    boundary: usize,
    epoch: u64,
}

/// A turn-aware conversation store that compacts its oldest turns.
///
/// Once the number of real user turns exceeds `context_limit`, everything
/// before the last `keep_last_n_turns` turns is replaced by a synthetic
/// user/assistant summary pair. All operations take `&self`; share the
/// session between tasks with an `Arc`.
///
/// # Example
///
/// ```rust,ignore
/// let session = CompactingSession::new(2, 4)?.with_summarizer(Arc::new(my_summarizer));
/// session.add_items(vec![user_item, assistant_item]).await;
/// let for_model = session.get_items(None).await;
/// ```
pub struct CompactingSession {
    id: String,
    summarizer: Option<Arc<dyn Summarizer>>,
    summarizer_timeout: Option<Duration>,
    store: Mutex<Store>,
}

impl std::fmt::Debug for CompactingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactingSession")
            .field("id", &self.id)
            .field("summarizer", &self.summarizer.as_ref().map(|s| s.name()))
            .field("summarizer_timeout", &self.summarizer_timeout)
            .finish_non_exhaustive()
    }
}

impl CompactingSession {
    /// Create a session with a generated id and no summarizer.
    ///
    /// # Errors
    ///
    /// Fails when `keep_last_n_turns > context_limit` or `context_limit == 0`.
    pub fn new(keep_last_n_turns: usize, context_limit: usize) -> Result<Self> {
        let config = CompactionConfig::new()
            .with_keep_last_n_turns(keep_last_n_turns)
            .with_context_limit(context_limit);
        Self::from_config(&config)
    }

    /// Create a session from configuration
    pub fn from_config(config: &CompactionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            summarizer: None,
            summarizer_timeout: config.summarizer_timeout,
            store: Mutex::new(Store {
                records: VecDeque::new(),
                keep_last_n_turns: config.keep_last_n_turns,
                context_limit: config.context_limit,
                epoch: 0,
                stats: CompactionStats::default(),
            }),
        })
    }

    /// Rebuild a session from a snapshot
    pub fn restore(snapshot: SessionSnapshot) -> Result<Self> {
        let config = CompactionConfig::new()
            .with_keep_last_n_turns(snapshot.keep_last_n_turns)
            .with_context_limit(snapshot.context_limit);
        let mut session = Self::from_config(&config)?.with_session_id(snapshot.session_id);
        session.store.get_mut().records = snapshot.records.into();
        Ok(session)
    }

    /// Use `summarizer` for compaction instead of the fallback pair
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Replace the generated session id
    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Bound each summarizer call
    pub fn with_summarizer_timeout(mut self, timeout: Duration) -> Self {
        self.summarizer_timeout = Some(timeout);
        self
    }

    /// Get the session ID
    pub fn session_id(&self) -> &str {
        &self.id
    }

    /// Append raw items, then compact if the turn limit is exceeded.
    ///
    /// Compaction failures are absorbed: the returned outcome and
    /// [`stats`](Self::stats) report them, the items are always stored.
    pub async fn add_items<I>(&self, items: I) -> CompactionOutcome
    where
        I: IntoIterator<Item = RawItem>,
    {
        let records: Vec<Record> = items.into_iter().map(Record::from_raw).collect();

        let pending = {
            let mut store = self.store.lock().await;
            store.records.extend(records);
            self.begin_compaction(&mut store)
        };

        match pending {
            Some(pending) => self.finish_compaction(pending).await,
            None => CompactionOutcome::NotNeeded,
        }
    }

    /// Run a compaction pass without adding items
    pub async fn compact(&self) -> CompactionOutcome {
        let pending = {
            let mut store = self.store.lock().await;
            self.begin_compaction(&mut store)
        };

        match pending {
            Some(pending) => self.finish_compaction(pending).await,
            None => CompactionOutcome::NotNeeded,
        }
    }

    /// Model-safe view, optionally only the last `limit` entries
    pub async fn get_items(&self, limit: Option<usize>) -> Vec<Message> {
        let store = self.store.lock().await;
        let skip = limit.map_or(0, |n| store.records.len().saturating_sub(n));
        store
            .records
            .iter()
            .skip(skip)
            .map(Record::to_message)
            .collect()
    }

    /// Full records for debugging and analytics. Never send these to a model.
    pub async fn get_full_history(&self, limit: Option<usize>) -> Vec<Record> {
        let store = self.store.lock().await;
        let skip = limit.map_or(0, |n| store.records.len().saturating_sub(n));
        store.records.iter().skip(skip).cloned().collect()
    }

    /// Remove and return the newest message
    pub async fn pop_item(&self) -> Option<Message> {
        let mut store = self.store.lock().await;
        let record = store.records.pop_back()?;
        store.epoch += 1;
        Some(record.message)
    }

    /// Remove every record
    pub async fn clear_session(&self) {
        let mut store = self.store.lock().await;
        store.records.clear();
        store.epoch += 1;
        tracing::debug!(session_id = %self.id, "session cleared");
    }

    /// Change `context_limit`, lowering `keep_last_n_turns` if it would exceed it.
    ///
    /// Takes effect on the next compaction pass.
    pub async fn set_max_turns(&self, context_limit: usize) -> Result<()> {
        let mut store = self.store.lock().await;
        if context_limit == 0 {
            return Err(TurnstileError::InvalidTurnLimits {
                keep_last_n_turns: store.keep_last_n_turns,
                context_limit,
            });
        }

        store.context_limit = context_limit;
        if store.keep_last_n_turns > context_limit {
            tracing::debug!(
                session_id = %self.id,
                from = store.keep_last_n_turns,
                to = context_limit,
                "clamping keep_last_n_turns"
            );
            store.keep_last_n_turns = context_limit;
        }
        Ok(())
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.store.lock().await.records.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.store.lock().await.records.is_empty()
    }

    /// Number of real user turns currently stored
    pub async fn real_turn_count(&self) -> usize {
        self.store.lock().await.real_turns()
    }

    pub async fn keep_last_n_turns(&self) -> usize {
        self.store.lock().await.keep_last_n_turns
    }

    pub async fn context_limit(&self) -> usize {
        self.store.lock().await.context_limit
    }

    /// Compaction counters
    pub async fn stats(&self) -> CompactionStats {
        self.store.lock().await.stats
    }

    /// Capture the session state for persistence
    pub async fn snapshot(&self) -> SessionSnapshot {
        let store = self.store.lock().await;
        SessionSnapshot {
            session_id: self.id.clone(),
            keep_last_n_turns: store.keep_last_n_turns,
            context_limit: store.context_limit,
            records: store.records.iter().cloned().collect(),
        }
    }

    /// Serialize a snapshot to JSON
    pub async fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.snapshot().await)?)
    }

    /// Decide under the lock and capture what the summarizer needs
    fn begin_compaction(&self, store: &mut Store) -> Option<PendingCompaction> {
        let boundary = store.decide().boundary()?;
        store.stats.attempts += 1;

        tracing::debug!(
            session_id = %self.id,
            boundary,
            real_turns = store.real_turns(),
            context_limit = store.context_limit,
            "compaction needed"
        );

        Some(PendingCompaction {
            prefix: store.records.range(..boundary).map(Record::to_message).collect(),
            boundary,
            epoch: store.epoch,
        })
    }

    /// Summarize without the lock, then re-validate and swap
    async fn finish_compaction(&self, pending: PendingCompaction) -> CompactionOutcome {
        let pair = match self.request_summary(&pending.prefix).await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(
                    session_id = %self.id,
                    error = %e,
                    prefix_len = pending.prefix.len(),
                    "summarizer failed, history left uncompacted"
                );
                self.store.lock().await.stats.failed += 1;
                return CompactionOutcome::Failed;
            }
        };

        let mut store = self.store.lock().await;

        if store.epoch != pending.epoch {
            tracing::debug!(
                session_id = %self.id,
                snapshot_epoch = pending.epoch,
                current_epoch = store.epoch,
                "store changed during summarization, discarding summary"
            );
            store.stats.aborted += 1;
            return CompactionOutcome::Aborted;
        }

        let Some(boundary) = store.decide().boundary() else {
            tracing::debug!(session_id = %self.id, "compaction no longer needed");
            store.stats.aborted += 1;
            return CompactionOutcome::Aborted;
        };

        if boundary != pending.boundary {
            tracing::debug!(
                session_id = %self.id,
                snapshot_boundary = pending.boundary,
                boundary,
                "boundary moved during summarization"
            );
        }

        let marker = format!("<all before idx {}>", boundary);
        let suffix = store.records.split_off(boundary);
        let records_replaced = store.records.len();

        let mut records = VecDeque::with_capacity(suffix.len() + 2);
        records.push_back(Record::summary_prompt(pair.user_shadow, marker.clone()));
        records.push_back(Record::summary(pair.assistant_summary, marker));
        records.extend(suffix);

        store.records = records;
        store.epoch += 1;
        store.stats.applied += 1;
        store.stats.records_compacted += records_replaced as u64;

        tracing::info!(
            session_id = %self.id,
            boundary,
            records_replaced,
            remaining = store.records.len(),
            "history compacted"
        );

        CompactionOutcome::Applied {
            boundary,
            records_replaced,
        }
    }

    async fn request_summary(&self, prefix: &[Message]) -> Result<SummaryPair> {
        let Some(summarizer) = &self.summarizer else {
            return Ok(SummaryPair::fallback());
        };

        let call = summarizer.summarize(prefix);
        match self.summarizer_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| TurnstileError::SummarizerTimeout(limit))?,
            None => call.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::record::{RecordKind, SUMMARY_KIND, SUMMARY_PROMPT_KIND};
    use crate::conversation::summarizer::FallbackSummarizer;
    use crate::message::MessageRole;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::{Semaphore, mpsc};

    fn item(value: Value) -> RawItem {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn user(content: &str) -> RawItem {
        item(json!({"role": "user", "content": content}))
    }

    fn assistant(content: &str) -> RawItem {
        item(json!({"role": "assistant", "content": content}))
    }

    fn turns(range: std::ops::Range<usize>) -> Vec<RawItem> {
        range
            .flat_map(|i| [user(&format!("Message {}", i)), assistant(&format!("Response {}", i))])
            .collect()
    }

    /// Reports how many messages it saw
    struct CountingSummarizer;

    #[async_trait]
    impl Summarizer for CountingSummarizer {
        async fn summarize(&self, messages: &[Message]) -> Result<SummaryPair> {
            Ok(SummaryPair::new(
                "What happened so far?",
                format!("summarized {} messages", messages.len()),
            ))
        }
    }

    /// Fails until `healthy` is set
    struct FlakySummarizer {
        healthy: AtomicBool,
    }

    #[async_trait]
    impl Summarizer for FlakySummarizer {
        async fn summarize(&self, _messages: &[Message]) -> Result<SummaryPair> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(SummaryPair::new("shadow", "summary"))
            } else {
                Err(TurnstileError::Summarizer("model overloaded".to_string()))
            }
        }
    }

    /// Announces each call and waits for a permit before answering
    struct GatedSummarizer {
        entered: mpsc::UnboundedSender<usize>,
        release: Semaphore,
        calls: AtomicUsize,
    }

    impl GatedSummarizer {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<usize>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let summarizer = Arc::new(Self {
                entered: tx,
                release: Semaphore::new(0),
                calls: AtomicUsize::new(0),
            });
            (summarizer, rx)
        }
    }

    #[async_trait]
    impl Summarizer for GatedSummarizer {
        async fn summarize(&self, messages: &[Message]) -> Result<SummaryPair> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.send(call).unwrap();
            self.release.acquire().await.unwrap().forget();
            Ok(SummaryPair::new(
                "shadow",
                format!("summarized {} messages", messages.len()),
            ))
        }
    }

    struct SlowSummarizer;

    #[async_trait]
    impl Summarizer for SlowSummarizer {
        async fn summarize(&self, _messages: &[Message]) -> Result<SummaryPair> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(SummaryPair::fallback())
        }
    }

    #[test]
    fn test_construction_rejects_keep_above_limit() {
        let result = CompactingSession::new(5, 4);
        assert!(matches!(
            result,
            Err(TurnstileError::InvalidTurnLimits {
                keep_last_n_turns: 5,
                context_limit: 4
            })
        ));
        assert!(CompactingSession::new(0, 0).is_err());
        assert!(CompactingSession::new(4, 4).is_ok());
    }

    #[test]
    fn test_session_ids() {
        let a = CompactingSession::new(1, 2).unwrap();
        let b = CompactingSession::new(1, 2).unwrap();
        assert_ne!(a.session_id(), b.session_id());

        let named = CompactingSession::new(1, 2).unwrap().with_session_id("chat-1");
        assert_eq!(named.session_id(), "chat-1");
    }

    #[tokio::test]
    async fn test_within_limit_no_compaction() {
        let session = CompactingSession::new(2, 4).unwrap();
        let outcome = session.add_items(turns(0..4)).await;

        assert_eq!(outcome, CompactionOutcome::NotNeeded);
        assert_eq!(session.len().await, 8);
        assert_eq!(session.real_turn_count().await, 4);
        assert_eq!(session.stats().await, CompactionStats::default());
    }

    #[tokio::test]
    async fn test_single_batch_compaction() {
        let session = CompactingSession::new(2, 4).unwrap();
        let outcome = session.add_items(turns(0..8)).await;

        assert_eq!(
            outcome,
            CompactionOutcome::Applied {
                boundary: 12,
                records_replaced: 12
            }
        );

        let items = session.get_items(None).await;
        assert_eq!(items.len(), 2 + 4);
        assert_eq!(items[0].content, "Summarize the conversation we had so far.");
        assert_eq!(items[1].content, "Summary unavailable.");
        assert_eq!(items[2].content, "Message 6");
        assert_eq!(items[5].content, "Response 7");

        let history = session.get_full_history(None).await;
        assert_eq!(history[0].metadata_map()["kind"], SUMMARY_PROMPT_KIND);
        assert_eq!(history[1].metadata_map()["kind"], SUMMARY_KIND);
        assert_eq!(
            history[0].metadata.kind.summary_for_turns(),
            Some("<all before idx 12>")
        );
    }

    #[tokio::test]
    async fn test_incremental_compaction_keeps_last_turns() {
        let session = CompactingSession::new(2, 4).unwrap();
        for i in 0..8 {
            session.add_items(vec![user(&format!("Message {}", i))]).await;
            session.add_items(vec![assistant(&format!("Response {}", i))]).await;
        }

        let history = session.get_full_history(None).await;
        assert_eq!(history.len(), 6);
        assert!(history[0].is_synthetic() && history[1].is_synthetic());
        assert_eq!(history[0].message.role, MessageRole::User);
        assert_eq!(history[1].message.role, MessageRole::Assistant);
        let contents: Vec<_> = history[2..].iter().map(|r| r.message.content.as_str()).collect();
        assert_eq!(contents, ["Message 6", "Response 6", "Message 7", "Response 7"]);

        let stats = session.stats().await;
        assert_eq!(stats.applied, 2);
        assert_eq!(stats.attempts, 2);
    }

    #[tokio::test]
    async fn test_zero_retention() {
        let session = CompactingSession::new(0, 1).unwrap();
        session.add_items(turns(0..2)).await;

        let history = session.get_full_history(None).await;
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(Record::is_synthetic));
        assert_eq!(session.real_turn_count().await, 0);
    }

    #[tokio::test]
    async fn test_summarizer_receives_sanitized_prefix() {
        let session = CompactingSession::new(1, 1)
            .unwrap()
            .with_summarizer(Arc::new(CountingSummarizer));

        session
            .add_items(vec![
                item(json!({"role": "user", "content": "q1", "trace": "abc"})),
                assistant("a1"),
                user("q2"),
            ])
            .await;

        let items = session.get_items(None).await;
        assert_eq!(items[0].content, "What happened so far?");
        assert_eq!(items[1].content, "summarized 2 messages");
        assert_eq!(items[2], Message::user("q2"));
    }

    #[tokio::test]
    async fn test_get_items_never_leaks_metadata() {
        let session = CompactingSession::new(1, 2).unwrap();
        session
            .add_items(vec![
                item(json!({"role": "user", "content": "q", "metadata": {"user_id": 7}})),
                item(json!({"role": "tool", "content": "r", "name": "search", "latency_ms": 12})),
            ])
            .await;
        session.add_items(turns(0..3)).await;

        for message in session.get_items(None).await {
            let value = serde_json::to_value(&message).unwrap();
            for key in value.as_object().unwrap().keys() {
                assert!(["role", "content", "name"].contains(&key.as_str()), "leaked {key}");
            }
        }
    }

    #[tokio::test]
    async fn test_reads_are_idempotent() {
        let session = CompactingSession::new(2, 3).unwrap();
        session.add_items(turns(0..5)).await;

        assert_eq!(session.get_items(None).await, session.get_items(None).await);
        assert_eq!(
            session.get_full_history(None).await,
            session.get_full_history(None).await
        );
    }

    #[tokio::test]
    async fn test_limit_returns_tail() {
        let session = CompactingSession::new(2, 10).unwrap();
        session.add_items(turns(0..3)).await;

        let items = session.get_items(Some(2)).await;
        assert_eq!(items, vec![Message::user("Message 2"), Message::assistant("Response 2")]);
        assert_eq!(session.get_full_history(Some(100)).await.len(), 6);
        assert!(session.get_items(Some(0)).await.is_empty());
    }

    #[tokio::test]
    async fn test_pop_and_clear() {
        let session = CompactingSession::new(1, 5).unwrap();
        assert_eq!(session.pop_item().await, None);

        session.add_items(turns(0..2)).await;
        assert_eq!(session.pop_item().await, Some(Message::assistant("Response 1")));
        assert_eq!(session.len().await, 3);

        session.clear_session().await;
        assert!(session.is_empty().await);
        assert!(session.get_items(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_set_max_turns_clamps_keep() {
        let session = CompactingSession::new(3, 5).unwrap();

        session.set_max_turns(2).await.unwrap();
        assert_eq!(session.context_limit().await, 2);
        assert_eq!(session.keep_last_n_turns().await, 2);

        session.set_max_turns(8).await.unwrap();
        assert_eq!(session.context_limit().await, 8);
        assert_eq!(session.keep_last_n_turns().await, 2);

        assert!(session.set_max_turns(0).await.is_err());
        assert_eq!(session.context_limit().await, 8);
    }

    #[tokio::test]
    async fn test_set_max_turns_applies_on_next_pass() {
        let session = CompactingSession::new(1, 10).unwrap();
        session.add_items(turns(0..4)).await;

        session.set_max_turns(2).await.unwrap();
        assert_eq!(session.len().await, 8);

        assert!(session.compact().await.is_applied());
        assert_eq!(session.len().await, 4);
    }

    #[tokio::test]
    async fn test_summarizer_failure_leaves_store_unchanged() {
        let flaky = Arc::new(FlakySummarizer {
            healthy: AtomicBool::new(false),
        });
        let session = CompactingSession::new(1, 2)
            .unwrap()
            .with_summarizer(flaky.clone());

        let outcome = session.add_items(turns(0..3)).await;
        assert_eq!(outcome, CompactionOutcome::Failed);
        assert_eq!(session.len().await, 6);
        assert!(session.get_full_history(None).await.iter().all(|r| !r.is_synthetic()));
        assert_eq!(session.stats().await.failed, 1);

        flaky.healthy.store(true, Ordering::SeqCst);
        let outcome = session.add_items(vec![user("Message 3")]).await;
        assert!(outcome.is_applied());
        assert_eq!(session.real_turn_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_summarizer_timeout_counts_as_failure() {
        let session = CompactingSession::new(1, 1)
            .unwrap()
            .with_summarizer(Arc::new(SlowSummarizer))
            .with_summarizer_timeout(Duration::from_millis(50));

        let outcome = session.add_items(turns(0..2)).await;
        assert_eq!(outcome, CompactionOutcome::Failed);
        assert_eq!(session.len().await, 4);
    }

    #[tokio::test]
    async fn test_clear_during_summary_aborts() {
        let (gate, mut entered) = GatedSummarizer::new();
        let session = Arc::new(
            CompactingSession::new(1, 2)
                .unwrap()
                .with_summarizer(gate.clone()),
        );
        session.add_items(turns(0..2)).await;

        let task = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.add_items(vec![user("Message 2")]).await }
        });

        entered.recv().await.unwrap();
        session.clear_session().await;
        session.add_items(vec![user("after clear")]).await;
        gate.release.add_permits(1);

        assert_eq!(task.await.unwrap(), CompactionOutcome::Aborted);
        assert_eq!(session.get_items(None).await, vec![Message::user("after clear")]);
        assert_eq!(session.stats().await.aborted, 1);
    }

    #[tokio::test]
    async fn test_pop_during_summary_aborts_until_next_pass() {
        let (gate, mut entered) = GatedSummarizer::new();
        let session = Arc::new(
            CompactingSession::new(1, 2)
                .unwrap()
                .with_summarizer(gate.clone()),
        );
        session.add_items(turns(0..2)).await;

        let task = tokio::spawn({
            let session = Arc::clone(&session);
            async move {
                session
                    .add_items(vec![
                        user("Message 2"),
                        assistant("Response 2"),
                        assistant("Follow-up 2"),
                    ])
                    .await
            }
        });
        entered.recv().await.unwrap();

        // Tail pop leaves three real turns, so compaction is still due
        assert_eq!(
            session.pop_item().await,
            Some(Message::assistant("Follow-up 2"))
        );
        gate.release.add_permits(1);

        assert_eq!(task.await.unwrap(), CompactionOutcome::Aborted);
        assert_eq!(session.len().await, 6);
        assert_eq!(session.real_turn_count().await, 3);

        gate.release.add_permits(1);
        assert_eq!(
            session.compact().await,
            CompactionOutcome::Applied {
                boundary: 4,
                records_replaced: 4
            }
        );
        assert_eq!(
            session.get_items(None).await,
            vec![
                Message::user("shadow"),
                Message::assistant("summarized 4 messages"),
                Message::user("Message 2"),
                Message::assistant("Response 2"),
            ]
        );
    }

    #[tokio::test]
    async fn test_appends_during_summary_use_current_boundary() {
        let (gate, mut entered) = GatedSummarizer::new();
        let session = Arc::new(
            CompactingSession::new(1, 2)
                .unwrap()
                .with_summarizer(gate.clone()),
        );
        session.add_items(turns(0..2)).await;

        let first = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.add_items(vec![user("Message 2")]).await }
        });
        entered.recv().await.unwrap();

        let second = tokio::spawn({
            let session = Arc::clone(&session);
            async move {
                session
                    .add_items(vec![assistant("Response 2"), user("Message 3")])
                    .await
            }
        });
        entered.recv().await.unwrap();

        gate.release.add_permits(1);
        assert_eq!(
            first.await.unwrap(),
            CompactionOutcome::Applied {
                boundary: 6,
                records_replaced: 6
            }
        );

        gate.release.add_permits(1);
        assert_eq!(second.await.unwrap(), CompactionOutcome::Aborted);

        let items = session.get_items(None).await;
        assert_eq!(
            items,
            vec![
                Message::user("shadow"),
                Message::assistant("summarized 4 messages"),
                Message::user("Message 3"),
            ]
        );

        let stats = session.stats().await;
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.applied, 1);
        assert_eq!(stats.aborted, 1);
    }

    #[tokio::test]
    async fn test_fallback_summarizer_matches_default() {
        let with = CompactingSession::new(1, 1)
            .unwrap()
            .with_summarizer(Arc::new(FallbackSummarizer));
        let without = CompactingSession::new(1, 1).unwrap();

        with.add_items(turns(0..3)).await;
        without.add_items(turns(0..3)).await;
        assert_eq!(with.get_items(None).await, without.get_items(None).await);
    }

    #[tokio::test]
    async fn test_snapshot_restore() {
        let session = CompactingSession::new(1, 2).unwrap().with_session_id("s-1");
        session.add_items(turns(0..3)).await;

        let json = session.to_json().await.unwrap();
        let restored = CompactingSession::restore(SessionSnapshot::from_json(&json).unwrap())
            .unwrap();

        assert_eq!(restored.session_id(), "s-1");
        assert_eq!(restored.context_limit().await, 2);
        assert_eq!(
            restored.get_full_history(None).await,
            session.get_full_history(None).await
        );
        assert!(matches!(
            restored.get_full_history(None).await[0].metadata.kind,
            RecordKind::SummaryPrompt { .. }
        ));
    }

    #[test]
    fn test_restore_validates_limits() {
        let snapshot = SessionSnapshot {
            session_id: "bad".to_string(),
            keep_last_n_turns: 4,
            context_limit: 2,
            records: Vec::new(),
        };
        assert!(CompactingSession::restore(snapshot).is_err());
    }
}
