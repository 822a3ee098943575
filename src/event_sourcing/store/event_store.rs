use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::event_sourcing::core::{EventEnvelope, Result, UsageError};

// ============================================================================
// Event Repository - Append-only, per-stream versioned log
// ============================================================================
//
// Contract every backend satisfies:
// 1. Append/link under optimistic concurrency (compare-and-swap on the
//    stream's last version), all-or-nothing per call
// 2. Streams are gapless: versions 1, 2, 3, ... (0 = empty/absent stream)
// 3. Point lookups by event id
// 4. Filtered range reads scoped to one stream, built with `read()`
//
// Reads hand back envelopes carrying a `RawEvent` (name + serialized
// payload). Resolving the concrete type is the repository's job.
//
// ============================================================================

#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Append `events` to `stream_id`.
    ///
    /// With `expected_version = Some(v)` the stream's last version must be
    /// exactly `v` at commit time (`Some(0)` = stream must be empty), else
    /// `ConcurrencyViolation`. Returns the events stamped with their new
    /// event ids and stream versions.
    async fn append(
        &self,
        stream_id: &str,
        events: Vec<EventEnvelope>,
        expected_version: Option<i64>,
    ) -> Result<Vec<EventEnvelope>>;

    /// Add already stored events to `stream_id`. Same version rule as
    /// `append`. Returns the stream's new last version.
    async fn link(
        &self,
        stream_id: &str,
        event_ids: &[Uuid],
        expected_version: Option<i64>,
    ) -> Result<i64>;

    /// Remove every membership record of the stream. Event bodies stay.
    async fn delete_stream(&self, stream_id: &str) -> Result<()>;

    async fn has_event(&self, event_id: Uuid) -> Result<bool>;

    /// The stream the event was first written to (still holding it).
    async fn get_stream_id_of(&self, event_id: Uuid) -> Result<Option<String>>;

    async fn get_version_in_stream(&self, stream_id: &str, event_id: Uuid)
        -> Result<Option<i64>>;

    async fn is_event_in_stream(&self, stream_id: &str, event_id: Uuid) -> Result<bool>;

    /// Last version of the stream, 0 when it has no events.
    async fn last_version(&self, stream_id: &str) -> Result<i64>;

    /// Execute a validated read.
    async fn query(&self, spec: &ReadSpec) -> Result<Vec<EventEnvelope>>;

    /// Number of envelopes `query` would return.
    async fn count(&self, spec: &ReadSpec) -> Result<usize>;

    /// Start a read query against this repository.
    fn read(&self) -> ReadQuery<'_>;
}

pub(crate) fn ensure_stream_id(stream_id: &str) -> Result<()> {
    if stream_id.is_empty() {
        return Err(UsageError::EmptyStreamId.into());
    }
    Ok(())
}

// ============================================================================
// Read Spec
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadDirection {
    #[default]
    Forward,
    Backward,
}

/// Validated, immutable read filter over one stream.
///
/// Time bounds apply to the event's `created_at`. Id bounds apply to the
/// membership position, which is store-wide and grows with every append or
/// link, so ids stay comparable across streams. Both ranges are inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadSpec {
    stream_id: String,
    from_time: Option<DateTime<Utc>>,
    to_time: Option<DateTime<Utc>>,
    from_id: Option<i64>,
    to_id: Option<i64>,
    direction: ReadDirection,
    limit: Option<usize>,
    event_ids: Option<Vec<Uuid>>,
}

impl ReadSpec {
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn from_time(&self) -> Option<DateTime<Utc>> {
        self.from_time
    }

    pub fn to_time(&self) -> Option<DateTime<Utc>> {
        self.to_time
    }

    pub fn from_id(&self) -> Option<i64> {
        self.from_id
    }

    pub fn to_id(&self) -> Option<i64> {
        self.to_id
    }

    pub fn direction(&self) -> ReadDirection {
        self.direction
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Restrict to these event ids, if set.
    pub fn event_ids(&self) -> Option<&[Uuid]> {
        self.event_ids.as_deref()
    }

    /// In-process filter, shared by backends that evaluate specs themselves.
    pub fn matches(&self, position: i64, created_at: DateTime<Utc>, event_id: Uuid) -> bool {
        if let Some(from) = self.from_time {
            if created_at < from {
                return false;
            }
        }
        if let Some(to) = self.to_time {
            if created_at > to {
                return false;
            }
        }
        if let Some(from) = self.from_id {
            if position < from {
                return false;
            }
        }
        if let Some(to) = self.to_id {
            if position > to {
                return false;
            }
        }
        match &self.event_ids {
            Some(ids) => ids.contains(&event_id),
            None => true,
        }
    }
}

// ============================================================================
// Read Query Builder
// ============================================================================

/// Chainable read builder returned by [`EventRepository::read`].
///
/// Builder calls only record the filter; terminal operations validate it and
/// only then reach the backend.
#[derive(Clone)]
pub struct ReadQuery<'a> {
    store: &'a dyn EventRepository,
    stream_id: Option<String>,
    from_time: Option<DateTime<Utc>>,
    to_time: Option<DateTime<Utc>>,
    from_id: Option<i64>,
    to_id: Option<i64>,
    direction: ReadDirection,
    limit: Option<usize>,
}

impl<'a> ReadQuery<'a> {
    pub fn new(store: &'a dyn EventRepository) -> Self {
        Self {
            store,
            stream_id: None,
            from_time: None,
            to_time: None,
            from_id: None,
            to_id: None,
            direction: ReadDirection::Forward,
            limit: None,
        }
    }

    pub fn stream(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = Some(stream_id.into());
        self
    }

    pub fn from_time(mut self, from: DateTime<Utc>) -> Self {
        self.from_time = Some(from);
        self
    }

    pub fn to_time(mut self, to: DateTime<Utc>) -> Self {
        self.to_time = Some(to);
        self
    }

    pub fn from_id(mut self, from: i64) -> Self {
        self.from_id = Some(from);
        self
    }

    pub fn to_id(mut self, to: i64) -> Self {
        self.to_id = Some(to);
        self
    }

    pub fn forward(mut self) -> Self {
        self.direction = ReadDirection::Forward;
        self
    }

    pub fn backward(mut self) -> Self {
        self.direction = ReadDirection::Backward;
        self
    }

    pub fn limit(mut self, count: usize) -> Self {
        self.limit = Some(count);
        self
    }

    /// Validate and freeze the filter.
    pub fn build(&self) -> Result<ReadSpec> {
        if self.to_time.is_some() && self.from_time.is_none() {
            return Err(UsageError::ToTimeWithoutFromTime.into());
        }
        if self.to_id.is_some() && self.from_id.is_none() {
            return Err(UsageError::ToIdWithoutFromId.into());
        }
        let stream_id = self.stream_id.clone().ok_or(UsageError::MissingStream)?;
        ensure_stream_id(&stream_id)?;

        Ok(ReadSpec {
            stream_id,
            from_time: self.from_time,
            to_time: self.to_time,
            from_id: self.from_id,
            to_id: self.to_id,
            direction: self.direction,
            limit: self.limit,
            event_ids: None,
        })
    }

    /// The envelope for `event_id` within the stream, if it matches.
    pub async fn event(self, event_id: Uuid) -> Result<Option<EventEnvelope>> {
        let mut spec = self.build()?;
        spec.event_ids = Some(vec![event_id]);
        spec.limit = Some(1);
        Ok(self.store.query(&spec).await?.into_iter().next())
    }

    /// The envelopes for `event_ids` within the stream, in read order.
    pub async fn events(self, event_ids: &[Uuid]) -> Result<Vec<EventEnvelope>> {
        let mut spec = self.build()?;
        spec.event_ids = Some(event_ids.to_vec());
        self.store.query(&spec).await
    }

    pub async fn count(self) -> Result<usize> {
        let spec = self.build()?;
        self.store.count(&spec).await
    }

    pub async fn to_list(self) -> Result<Vec<EventEnvelope>> {
        let spec = self.build()?;
        tracing::debug!(
            stream_id = %spec.stream_id(),
            direction = ?spec.direction(),
            limit = ?spec.limit(),
            "Reading stream"
        );
        self.store.query(&spec).await
    }

    /// Shorthand for `stream(id).backward().limit(1)`, keeping any other
    /// filters already set.
    pub async fn last(self, stream_id: &str) -> Result<Option<EventEnvelope>> {
        let query = self.stream(stream_id).backward().limit(1);
        Ok(query.to_list().await?.into_iter().next())
    }
}

impl std::fmt::Debug for ReadQuery<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadQuery")
            .field("stream_id", &self.stream_id)
            .field("from_time", &self.from_time)
            .field("to_time", &self.to_time)
            .field("from_id", &self.from_id)
            .field("to_id", &self.to_id)
            .field("direction", &self.direction)
            .field("limit", &self.limit)
            .finish()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
