//! Thread & Context Manager: durable, in-memory conversation state (§4.6).
//!
//! Each thread's message list lives behind its own `tokio::sync::RwLock` so
//! concurrent readers (e.g. a UI streaming the transcript) don't block a
//! writer mid-turn, while the registry mapping thread ids to that state is
//! guarded by a plain `std::sync::Mutex` since lookups are quick and never
//! held across an `.await`. This is the teacher SDK's `context.rs` token
//! utilities evolved into a stateful store, shaped after the thread registry
//! in a production agent loop's conversation manager.

use crate::types::{CompactionRecord, Message, MessageRole, Usage};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct ThreadState {
    messages: Vec<Message>,
    usage: Usage,
    compaction_log: Vec<CompactionRecord>,
}

/// A handle to one thread's state. Cheap to clone; clones share the same
/// underlying lock.
#[derive(Clone)]
pub struct Thread {
    pub id: String,
    state: Arc<RwLock<ThreadState>>,
}

impl Thread {
    fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Arc::new(RwLock::new(ThreadState::default())),
        }
    }

    /// A consistent point-in-time copy of the message history.
    pub async fn snapshot(&self) -> Vec<Message> {
        self.state.read().await.messages.clone()
    }

    pub async fn usage(&self) -> Usage {
        self.state.read().await.usage
    }

    pub async fn compaction_log(&self) -> Vec<CompactionRecord> {
        self.state.read().await.compaction_log.clone()
    }

    /// Appends messages in order and folds in the turn's usage delta.
    pub async fn append(&self, messages: Vec<Message>, usage_delta: Usage) {
        let mut state = self.state.write().await;
        state.messages.extend(messages);
        state.usage.add(&usage_delta);
    }

    /// Atomically replaces the first `keep_from` messages with a single
    /// synthetic summary message, recording the compaction (§4.7). Messages
    /// from `keep_from` onward are preserved verbatim.
    ///
    /// Returns `None` if `keep_from` is out of range for the current
    /// history (the caller should treat this as a no-op compaction).
    pub async fn replace_prefix(
        &self,
        keep_from: usize,
        summary: Message,
        tokens_before: u64,
        tokens_after: u64,
    ) -> Option<CompactionRecord> {
        let mut state = self.state.write().await;
        if keep_from > state.messages.len() {
            return None;
        }

        let messages_compacted = keep_from;
        let tail = state.messages.split_off(keep_from);
        state.messages = std::iter::once(summary).chain(tail).collect();

        let record = CompactionRecord {
            timestamp_millis: 0,
            tokens_before,
            tokens_after,
            messages_compacted,
        };
        state.compaction_log.push(record.clone());
        Some(record)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// The system message, if the thread's first message carries one.
    pub async fn system_prompt(&self) -> Option<String> {
        let state = self.state.read().await;
        state
            .messages
            .first()
            .filter(|m| m.role == MessageRole::System)
            .and_then(|m| m.content.first())
            .and_then(|b| b.as_text())
            .map(str::to_string)
    }
}

/// Registry of threads keyed by id. Owned by the embedding application and
/// shared across engine calls.
#[derive(Clone, Default)]
pub struct ThreadStore {
    threads: Arc<Mutex<HashMap<String, Thread>>>,
}

impl ThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the thread for `id`, creating an empty one if it doesn't
    /// exist yet.
    pub fn get_or_create(&self, id: impl Into<String>) -> Thread {
        let id = id.into();
        let mut threads = self.threads.lock().expect("thread registry lock poisoned");
        threads
            .entry(id.clone())
            .or_insert_with(|| Thread::new(id))
            .clone()
    }

    pub fn get(&self, id: &str) -> Option<Thread> {
        self.threads
            .lock()
            .expect("thread registry lock poisoned")
            .get(id)
            .cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Thread> {
        self.threads
            .lock()
            .expect("thread registry lock poisoned")
            .remove(id)
    }
}
