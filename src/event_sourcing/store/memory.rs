use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::event_sourcing::core::{
    EsError, EventEnvelope, RawEvent, Result, CORRELATION_ID_HEADER, TIMESTAMP_HEADER,
};

use super::event_store::{ensure_stream_id, EventRepository, ReadDirection, ReadQuery, ReadSpec};

// ============================================================================
// In-memory Event Repository
// ============================================================================
//
// Process-local backend for tests, demos and single-process deployments.
// The version check and the commit happen under one write lock with no
// await in between, so an append is atomic even if its future is dropped.
//
// ============================================================================

#[derive(Debug, Clone)]
struct StoredEvent {
    event_name: String,
    payload: String,
    metadata: HashMap<String, String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct Membership {
    position: i64,
    version: i64,
    event_id: Uuid,
}

#[derive(Default)]
struct Inner {
    events: HashMap<Uuid, StoredEvent>,
    streams: HashMap<String, Vec<Membership>>,
    last_position: i64,
}

impl Inner {
    fn last_version(&self, stream_id: &str) -> i64 {
        self.streams
            .get(stream_id)
            .and_then(|s| s.last())
            .map_or(0, |m| m.version)
    }

    fn check_expected(&self, stream_id: &str, expected_version: Option<i64>) -> Result<i64> {
        let actual = self.last_version(stream_id);
        match expected_version {
            Some(expected) if expected != actual => Err(EsError::ConcurrencyViolation {
                stream_id: stream_id.to_string(),
                expected: expected_version,
                actual,
            }),
            _ => Ok(actual),
        }
    }

    /// Add membership records for `event_ids` after `current`. Positions
    /// start at 1.
    fn push_members(&mut self, stream_id: &str, current: i64, event_ids: &[Uuid]) -> Vec<Membership> {
        let mut members = Vec::with_capacity(event_ids.len());
        for (offset, event_id) in event_ids.iter().enumerate() {
            self.last_position += 1;
            members.push(Membership {
                position: self.last_position,
                version: current + offset as i64 + 1,
                event_id: *event_id,
            });
        }
        self.streams
            .entry(stream_id.to_string())
            .or_default()
            .extend_from_slice(&members);
        members
    }

    fn envelope(&self, member: &Membership) -> Option<EventEnvelope> {
        self.events.get(&member.event_id).map(|stored| {
            EventEnvelope::persisted(
                member.event_id,
                member.version,
                member.position,
                stored.metadata.clone(),
                Box::new(RawEvent::new(&stored.event_name, &stored.payload)),
            )
        })
    }

    fn matching<'a>(&'a self, spec: &'a ReadSpec) -> impl Iterator<Item = &'a Membership> + 'a {
        let members = self
            .streams
            .get(spec.stream_id())
            .map(Vec::as_slice)
            .unwrap_or_default();

        let ordered: Box<dyn Iterator<Item = &'a Membership> + 'a> = match spec.direction() {
            ReadDirection::Forward => Box::new(members.iter()),
            ReadDirection::Backward => Box::new(members.iter().rev()),
        };

        ordered
            .filter(move |m| {
                self.events
                    .get(&m.event_id)
                    .is_some_and(|e| spec.matches(m.position, e.created_at, m.event_id))
            })
            .take(spec.limit().unwrap_or(usize::MAX))
    }
}

/// Thread-safe in-memory [`EventRepository`]. Clones share the same data.
#[derive(Clone, Default)]
pub struct InMemoryEventRepository {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_inner(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_inner(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    #[tracing::instrument(skip(self, events), fields(event_count = events.len()))]
    async fn append(
        &self,
        stream_id: &str,
        events: Vec<EventEnvelope>,
        expected_version: Option<i64>,
    ) -> Result<Vec<EventEnvelope>> {
        ensure_stream_id(stream_id)?;

        // Serialize everything before taking the lock
        let now = Utc::now();
        let mut staged = Vec::with_capacity(events.len());
        for mut envelope in events {
            let payload = envelope.event().marshal()?;
            if envelope.header(CORRELATION_ID_HEADER).is_none() {
                envelope.set_header(CORRELATION_ID_HEADER, Uuid::new_v4().to_string());
            }
            envelope.set_header(TIMESTAMP_HEADER, now.to_rfc3339());
            staged.push((Uuid::new_v4(), payload, envelope));
        }

        let mut inner = self.write_inner();
        let current = inner.check_expected(stream_id, expected_version)?;

        let ids: Vec<Uuid> = staged.iter().map(|(id, _, _)| *id).collect();
        for (event_id, payload, envelope) in &staged {
            inner.events.insert(
                *event_id,
                StoredEvent {
                    event_name: envelope.event_name().to_string(),
                    payload: payload.clone(),
                    metadata: envelope.headers().clone(),
                    created_at: now,
                },
            );
        }
        let members = inner.push_members(stream_id, current, &ids);
        drop(inner);

        let new_version = members.last().map_or(current, |m| m.version);
        tracing::debug!(stream_id, new_version, "Appended events in memory");

        Ok(staged
            .into_iter()
            .zip(members)
            .map(|((event_id, _, envelope), member)| {
                envelope.into_persisted(event_id, member.version, member.position)
            })
            .collect())
    }

    async fn link(
        &self,
        stream_id: &str,
        event_ids: &[Uuid],
        expected_version: Option<i64>,
    ) -> Result<i64> {
        ensure_stream_id(stream_id)?;

        let mut inner = self.write_inner();
        if let Some(missing) = event_ids.iter().find(|id| !inner.events.contains_key(*id)) {
            return Err(EsError::UnknownEvent(*missing));
        }
        let current = inner.check_expected(stream_id, expected_version)?;
        let members = inner.push_members(stream_id, current, event_ids);
        Ok(members.last().map_or(current, |m| m.version))
    }

    async fn delete_stream(&self, stream_id: &str) -> Result<()> {
        ensure_stream_id(stream_id)?;
        self.write_inner().streams.remove(stream_id);
        Ok(())
    }

    async fn has_event(&self, event_id: Uuid) -> Result<bool> {
        Ok(self.read_inner().events.contains_key(&event_id))
    }

    async fn get_stream_id_of(&self, event_id: Uuid) -> Result<Option<String>> {
        let inner = self.read_inner();
        let origin = inner
            .streams
            .iter()
            .flat_map(|(stream_id, members)| {
                members
                    .iter()
                    .filter(|m| m.event_id == event_id)
                    .map(move |m| (m.position, stream_id))
            })
            .min_by_key(|(position, _)| *position)
            .map(|(_, stream_id)| stream_id.clone());
        Ok(origin)
    }

    async fn get_version_in_stream(
        &self,
        stream_id: &str,
        event_id: Uuid,
    ) -> Result<Option<i64>> {
        let inner = self.read_inner();
        Ok(inner.streams.get(stream_id).and_then(|members| {
            members
                .iter()
                .rev()
                .find(|m| m.event_id == event_id)
                .map(|m| m.version)
        }))
    }

    async fn is_event_in_stream(&self, stream_id: &str, event_id: Uuid) -> Result<bool> {
        Ok(self
            .get_version_in_stream(stream_id, event_id)
            .await?
            .is_some())
    }

    async fn last_version(&self, stream_id: &str) -> Result<i64> {
        Ok(self.read_inner().last_version(stream_id))
    }

    async fn query(&self, spec: &ReadSpec) -> Result<Vec<EventEnvelope>> {
        let inner = self.read_inner();
        Ok(inner
            .matching(spec)
            .filter_map(|m| inner.envelope(m))
            .collect())
    }

    async fn count(&self, spec: &ReadSpec) -> Result<usize> {
        Ok(self.read_inner().matching(spec).count())
    }

    fn read(&self) -> ReadQuery<'_> {
        ReadQuery::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::{DomainEvent, UsageError};
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Clone, Debug, Default)]
    struct Noted {
        n: i32,
    }

    impl DomainEvent for Noted {
        const NAME: &'static str = "Noted";
    }

    fn batch(n: i32) -> Vec<EventEnvelope> {
        (1..=n)
            .map(|i| EventEnvelope::new("agg", Noted { n: i }))
            .collect()
    }

    #[tokio::test]
    async fn test_append_stamps_ids_and_versions() {
        let repo = InMemoryEventRepository::new();

        let persisted = repo.append("s", batch(2), Some(0)).await.unwrap();

        assert_eq!(persisted[0].version(), Some(1));
        assert_eq!(persisted[1].version(), Some(2));
        assert!(persisted.iter().all(|e| e.event_id().is_some()));
        assert!(persisted.iter().all(|e| e.header(CORRELATION_ID_HEADER).is_some()));
        assert!(persisted[0].data::<Noted>().is_some());
    }

    #[tokio::test]
    async fn test_append_to_empty_stream_id_is_usage_error() {
        let repo = InMemoryEventRepository::new();

        let err = repo.append("", batch(1), None).await.unwrap_err();

        assert!(matches!(err, EsError::Usage(UsageError::EmptyStreamId)));
    }

    #[tokio::test]
    async fn test_failed_append_leaves_store_untouched() {
        let repo = InMemoryEventRepository::new();
        repo.append("s", batch(1), None).await.unwrap();

        let err = repo.append("s", batch(3), Some(0)).await.unwrap_err();

        assert!(err.is_concurrency_violation());
        assert_eq!(repo.last_version("s").await.unwrap(), 1);
        assert_eq!(repo.read_inner().events.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_then_append_restarts_versions() {
        let repo = InMemoryEventRepository::new();
        repo.append("s", batch(2), None).await.unwrap();
        repo.delete_stream("s").await.unwrap();

        let persisted = repo.append("s", batch(1), Some(0)).await.unwrap();

        assert_eq!(persisted[0].version(), Some(1));
    }

    #[tokio::test]
    async fn test_stored_payload_is_raw() {
        let repo = InMemoryEventRepository::new();
        repo.append("s", batch(1), None).await.unwrap();

        let list = repo.read().stream("s").to_list().await.unwrap();

        assert_eq!(list[0].event_name(), "Noted");
        assert_eq!(
            list[0].event().data().downcast_ref::<String>().map(String::as_str),
            Some(r#"{"n":1}"#)
        );
    }

    #[tokio::test]
    async fn test_id_range_is_store_wide_position() {
        let repo = InMemoryEventRepository::new();
        repo.append("a", batch(2), None).await.unwrap();
        let persisted = repo.append("b", batch(2), None).await.unwrap();
        let more = repo.append("a", batch(1), None).await.unwrap();

        assert_eq!(persisted[0].position(), Some(3));
        assert_eq!(more[0].position(), Some(5));

        let window = repo.read().stream("a").from_id(2).to_id(5).to_list().await.unwrap();
        let versions: Vec<_> = window.iter().filter_map(EventEnvelope::version).collect();
        assert_eq!(versions, vec![2, 3]);
        assert_eq!(window[1].position(), Some(5));
    }
}
