//! TTL-bounded ephemeral state store.
//!
//! Holds the accumulated answers of active flows, keyed by
//! (workflow, author, session). Everything here is a capacity
//! optimization for data too large to fit in a token: any entry can
//! vanish at TTL expiry, and every reader must treat `None` as
//! "possibly expired", not as a fault.

use crate::page::ElementId;
use crate::token::{Position, Token};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Composite key of one workflow instance's session state.
///
/// The session component is a correlation id minted at `start`, distinct
/// from the step index, so that moving back and forth within one session
/// still resolves the same accumulated answers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// The workflow id
    pub workflow: String,
    /// The originating author id
    pub author: String,
    /// The session correlation id
    pub session: String,
}

impl SessionKey {
    /// Creates a session key.
    pub fn new(
        workflow: impl Into<String>,
        author: impl Into<String>,
        session: impl Into<String>,
    ) -> Self {
        Self {
            workflow: workflow.into(),
            author: author.into(),
            session: session.into(),
        }
    }

    /// Builds the key for a token, or `None` if the token carries no
    /// session correlation id yet.
    pub fn for_token(token: &Token) -> Option<Self> {
        token
            .session()
            .map(|session| Self::new(token.workflow(), token.author(), session))
    }
}

/// Key of one recorded answer: which element, on which page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnswerKey {
    /// Page the element lives on
    pub page: usize,
    /// The element's page-local id
    pub element: ElementId,
}

/// Accumulated answers for one workflow instance.
///
/// Element ids are only unique within their page, so answers are keyed
/// by the (page, element) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Answers {
    entries: HashMap<AnswerKey, Vec<String>>,
}

impl Answers {
    /// Creates an empty answer set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the submitted values for an element, replacing any
    /// earlier submission.
    pub fn record(&mut self, page: usize, element: ElementId, values: Vec<String>) {
        self.entries.insert(AnswerKey { page, element }, values);
    }

    /// Returns the values submitted for an element, if any.
    pub fn values(&self, page: usize, element: &str) -> Option<&[String]> {
        self.entries
            .get(&AnswerKey {
                page,
                element: ElementId::new(element),
            })
            .map(Vec::as_slice)
    }

    /// Returns the first submitted value for an element, if any.
    pub fn first(&self, page: usize, element: &str) -> Option<&str> {
        self.values(page, element)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Removes and returns the values recorded for an element.
    pub fn remove(&mut self, page: usize, element: &str) -> Option<Vec<String>> {
        self.entries.remove(&AnswerKey {
            page,
            element: ElementId::new(element),
        })
    }

    /// Returns the number of recorded answers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all recorded answers.
    pub fn iter(&self) -> impl Iterator<Item = (&AnswerKey, &[String])> {
        self.entries.iter().map(|(key, values)| (key, values.as_slice()))
    }
}

/// The orchestrator's position record for one instance.
///
/// `generation` increments on every committed transition; a worker that
/// finishes producing a page render compares the stored generation with
/// the one it observed at invocation start and discards stale output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    /// Current position of the instance
    pub position: Position,
    /// Monotonic transition counter
    pub generation: u64,
}

impl Cursor {
    /// The cursor of a freshly started instance.
    pub fn initial() -> Self {
        Self {
            position: Position::Page(0),
            generation: 0,
        }
    }
}

/// Everything stored for one active workflow instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// The orchestrator's position record
    pub cursor: Cursor,
    /// Accumulated answers
    pub answers: Answers,
}

impl SessionRecord {
    /// The record of a freshly started instance.
    pub fn initial() -> Self {
        Self {
            cursor: Cursor::initial(),
            answers: Answers::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    record: SessionRecord,
    deadline: Instant,
}

/// In-memory TTL store for session records.
///
/// Every write refreshes the TTL; there is no separate touch operation.
/// Expired entries are dropped lazily on read, with [`purge_expired`]
/// available as a housekeeping sweep.
///
/// Uses `tokio::time::Instant`, so tests can drive expiry with a paused
/// clock (`tokio::time::pause` + `advance`).
///
/// [`purge_expired`]: SessionStore::purge_expired
#[derive(Debug)]
pub struct SessionStore {
    entries: Mutex<HashMap<SessionKey, Entry>>,
    ttl: Duration,
}

impl SessionStore {
    /// Creates a store whose writes live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns the default TTL applied by [`put`](SessionStore::put).
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the record for `key`, or `None` if absent or expired.
    pub async fn get(&self, key: &SessionKey) -> Option<SessionRecord> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get(key)?;
        if entry.deadline <= Instant::now() {
            entries.remove(key);
            return None;
        }
        Some(entry.record.clone())
    }

    /// Writes the record for `key` with the store's default TTL.
    pub async fn put(&self, key: SessionKey, record: SessionRecord) {
        self.put_with_ttl(key, record, self.ttl).await;
    }

    /// Writes the record for `key`, setting its deadline `ttl` from now.
    pub async fn put_with_ttl(&self, key: SessionKey, record: SessionRecord, ttl: Duration) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key,
            Entry {
                record,
                deadline: Instant::now() + ttl,
            },
        );
    }

    /// Deletes the record for `key`, if present.
    pub async fn delete(&self, key: &SessionKey) {
        self.entries.lock().await.remove(key);
    }

    /// Drops every expired entry and returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.deadline > now);
        before - entries.len()
    }

    /// Returns the number of entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Returns `true` if the store holds no entries at all.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
