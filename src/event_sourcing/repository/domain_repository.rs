use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::event_sourcing::bus::EventBus;
use crate::event_sourcing::core::{
    AggregateRoot, EsError, EventEnvelope, EventFactory, Result, StreamNamer, AGGREGATE_ID_HEADER,
};
use crate::event_sourcing::store::EventRepository;
use crate::metrics::Metrics;
use crate::utils::retry::{retry_on_transient, RetryConfig};

// ============================================================================
// Domain Repository - Load / Save orchestration
// ============================================================================
//
// Load:  StreamNamer -> EventRepository::read -> EventFactory -> rebuild
// Save:  pending changes -> append(expected_version) -> clear -> publish
//
// The repository holds no locks and never retries on its own. The version
// check inside the backend's append is the only concurrency control.
// `execute` is the explicit opt-in reload/retry loop.
//
// ============================================================================

#[derive(Clone)]
pub struct DomainRepository {
    store: Arc<dyn EventRepository>,
    event_bus: Arc<EventBus>,
    stream_namer: Arc<StreamNamer>,
    event_factory: Arc<EventFactory>,
    metrics: Option<Arc<Metrics>>,
    operation_timeout: Option<Duration>,
}

impl DomainRepository {
    pub fn new(
        store: Arc<dyn EventRepository>,
        event_bus: Arc<EventBus>,
        stream_namer: Arc<StreamNamer>,
        event_factory: Arc<EventFactory>,
    ) -> Self {
        Self {
            store,
            event_bus,
            stream_namer,
            event_factory,
            metrics: None,
            operation_timeout: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Fail backend calls that take longer than `timeout` with `Cancelled`.
    ///
    /// A timeout can fire after the backend committed, so `Cancelled` from
    /// `save` does not mean nothing was written. Reload before retrying
    /// instead of saving again with `None`.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    pub fn store(&self) -> &Arc<dyn EventRepository> {
        &self.store
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Rebuild aggregate `id` of type `A` from its full stream.
    #[tracing::instrument(skip(self), fields(aggregate_type = A::AGGREGATE_TYPE))]
    pub async fn load<A: AggregateRoot>(&self, id: &str) -> Result<A> {
        let stream_id = self.stream_namer.get_stream_name(A::AGGREGATE_TYPE, id)?;

        let stored = self
            .bounded(self.store.read().stream(stream_id.as_str()).forward().to_list())
            .await?;

        if stored.is_empty() {
            return Err(EsError::AggregateNotFound {
                aggregate_type: A::AGGREGATE_TYPE.to_string(),
                aggregate_id: id.to_string(),
            });
        }

        let mut history = Vec::with_capacity(stored.len());
        for envelope in stored {
            let payload = envelope.event().marshal()?;
            let event = self.event_factory.decode(envelope.event_name(), &payload)?;
            history.push(envelope.with_event(event).with_aggregate_id(id));
        }

        let event_count = history.len();
        let mut aggregate = A::new(id);
        aggregate.rebuild_from_events(history)?;

        if let Some(metrics) = &self.metrics {
            metrics.record_load(A::AGGREGATE_TYPE);
        }
        tracing::info!(
            stream_id = %stream_id,
            event_count,
            version = aggregate.current_version(),
            "Loaded aggregate"
        );

        Ok(aggregate)
    }

    /// Like [`load`](Self::load), but a missing stream yields a fresh
    /// aggregate at version 0.
    pub async fn load_or_new<A: AggregateRoot>(&self, id: &str) -> Result<A> {
        match self.load::<A>(id).await {
            Err(EsError::AggregateNotFound { .. }) => Ok(A::new(id)),
            other => other,
        }
    }

    /// Persist the aggregate's pending changes, then publish them.
    ///
    /// `expected_version` is normally the aggregate's `original_version`.
    /// On failure the error comes back unchanged and the pending changes are
    /// kept. No changes means nothing is written or published.
    #[tracing::instrument(
        skip(self, aggregate),
        fields(aggregate_type = A::AGGREGATE_TYPE, aggregate_id = %aggregate.id())
    )]
    pub async fn save<A: AggregateRoot>(
        &self,
        aggregate: &mut A,
        expected_version: Option<i64>,
    ) -> Result<()> {
        let stream_id = self
            .stream_namer
            .get_stream_name(A::AGGREGATE_TYPE, aggregate.id())?;

        if aggregate.changes().is_empty() {
            tracing::debug!(stream_id = %stream_id, "No pending changes to save");
            return Ok(());
        }

        let changes: Vec<EventEnvelope> = aggregate
            .changes()
            .iter()
            .cloned()
            .map(|envelope| envelope.with_header(AGGREGATE_ID_HEADER, aggregate.id()))
            .collect();
        let event_count = changes.len();

        let started = Instant::now();
        let persisted = match self
            .bounded(self.store.append(&stream_id, changes, expected_version))
            .await
        {
            Ok(persisted) => persisted,
            Err(err) => {
                if err.is_concurrency_violation() {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_conflict(A::AGGREGATE_TYPE);
                    }
                    tracing::warn!(stream_id = %stream_id, error = %err, "Concurrency conflict on save");
                }
                return Err(err);
            }
        };

        // The baseline only covers events this aggregate applied. Anything an
        // unconditional save skipped over must still fail the next check.
        let new_version = aggregate.current_version();
        let stream_version = persisted
            .last()
            .and_then(EventEnvelope::version)
            .unwrap_or(new_version);
        if stream_version != new_version {
            tracing::warn!(
                stream_id = %stream_id,
                new_version,
                stream_version,
                "Stream moved past the aggregate during an unconditional save"
            );
        }
        aggregate.base_mut().mark_saved(new_version);

        if let Some(metrics) = &self.metrics {
            metrics.record_append(
                A::AGGREGATE_TYPE,
                event_count,
                started.elapsed().as_secs_f64(),
            );
        }
        tracing::info!(stream_id = %stream_id, event_count, new_version, "Saved aggregate");

        for envelope in &persisted {
            self.event_bus.publish_event(envelope);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_published(persisted.len());
        }

        Ok(())
    }

    /// Load (or start) aggregate `id`, run `command` on it and save against
    /// the loaded version. Conflicts and unavailability are retried from a
    /// fresh load per `retry`; any other error, including a rejected
    /// command, returns at once.
    pub async fn execute<A, F>(&self, id: &str, retry: RetryConfig, command: F) -> Result<A>
    where
        A: AggregateRoot,
        F: Fn(&mut A) -> Result<()> + Send + Sync,
    {
        let command = &command;
        retry_on_transient(retry, move |attempt| async move {
            let mut aggregate = self.load_or_new::<A>(id).await?;
            command(&mut aggregate)?;
            let expected = aggregate.original_version();
            tracing::debug!(attempt, expected, "Executing command");
            self.save(&mut aggregate, Some(expected)).await?;
            Ok::<A, EsError>(aggregate)
        })
        .await
        .into_result()
    }

    async fn bounded<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        match self.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, operation)
                .await
                .map_err(|_| EsError::Cancelled)?,
            None => operation.await,
        }
    }
}

impl std::fmt::Debug for DomainRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainRepository")
            .field("event_bus", &self.event_bus)
            .field("stream_namer", &self.stream_namer)
            .field("event_factory", &self.event_factory)
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::{type_hash_id, AggregateBase, DomainEvent, Event, Transitions};
    use crate::event_sourcing::store::{InMemoryEventRepository, ReadQuery, ReadSpec};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::{LazyLock, Mutex};
    use uuid::Uuid;

    #[derive(Serialize, Deserialize, Clone, Debug, Default)]
    struct Incremented {
        by: i64,
    }

    impl DomainEvent for Incremented {
        const NAME: &'static str = "Incremented";
    }

    #[derive(Debug)]
    struct Counter {
        base: AggregateBase,
        total: i64,
    }

    static COUNTER_TRANSITIONS: LazyLock<Transitions<Counter>> = LazyLock::new(|| {
        Transitions::<Counter>::new("Counter").on::<Incremented>(|c, e| c.total += e.by)
    });

    impl Counter {
        fn increment(&mut self, by: i64) -> Result<()> {
            if by <= 0 {
                return Err(EsError::Validation("increment must be positive".to_string()));
            }
            self.raise(Incremented { by })
        }
    }

    impl AggregateRoot for Counter {
        const AGGREGATE_TYPE: &'static str = "Counter";

        fn new(id: &str) -> Self {
            Self {
                base: AggregateBase::new(id),
                total: 0,
            }
        }

        fn base(&self) -> &AggregateBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut AggregateBase {
            &mut self.base
        }

        fn when(&mut self, event: &dyn Event) -> Result<()> {
            COUNTER_TRANSITIONS.apply(self, event)
        }
    }

    fn repository(store: Arc<dyn EventRepository>) -> DomainRepository {
        let mut namer = StreamNamer::new();
        namer
            .register_delegate(type_hash_id, &[Counter::AGGREGATE_TYPE])
            .unwrap();
        let mut factory = EventFactory::new();
        factory.register::<Incremented>().unwrap();

        DomainRepository::new(
            store,
            Arc::new(EventBus::new()),
            Arc::new(namer),
            Arc::new(factory),
        )
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let repo = repository(Arc::new(InMemoryEventRepository::new()));

        let mut counter = Counter::new("c1");
        counter.increment(2).unwrap();
        counter.increment(5).unwrap();
        repo.save(&mut counter, Some(0)).await.unwrap();

        assert!(counter.changes().is_empty());
        assert_eq!(counter.original_version(), 2);

        let loaded: Counter = repo.load("c1").await.unwrap();
        assert_eq!(loaded.total, 7);
        assert_eq!(loaded.original_version(), 2);
        assert_eq!(loaded.current_version(), 2);
    }

    #[tokio::test]
    async fn test_save_without_changes_is_noop() {
        let store = Arc::new(InMemoryEventRepository::new());
        let repo = repository(store.clone());

        let mut counter = Counter::new("c1");
        repo.save(&mut counter, Some(0)).await.unwrap();

        assert_eq!(store.last_version("counter#c1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_save_stamps_aggregate_id_header() {
        let store = Arc::new(InMemoryEventRepository::new());
        let repo = repository(store.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        repo.event_bus().add_handler(
            Arc::new(move |e: &EventEnvelope| {
                sink.lock()
                    .unwrap()
                    .push((e.header(AGGREGATE_ID_HEADER).map(str::to_string), e.version()));
            }),
            &[Incremented::NAME],
        );

        let mut counter = Counter::new("c9");
        counter.increment(1).unwrap();
        repo.save(&mut counter, None).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(Some("c9".to_string()), Some(1))]
        );
    }

    /// Backend whose every call hangs.
    struct StalledRepository;

    #[async_trait]
    impl EventRepository for StalledRepository {
        async fn append(&self, _: &str, _: Vec<EventEnvelope>, _: Option<i64>) -> Result<Vec<EventEnvelope>> {
            std::future::pending().await
        }

        async fn link(&self, _: &str, _: &[Uuid], _: Option<i64>) -> Result<i64> {
            std::future::pending().await
        }

        async fn delete_stream(&self, _: &str) -> Result<()> {
            std::future::pending().await
        }

        async fn has_event(&self, _: Uuid) -> Result<bool> {
            std::future::pending().await
        }

        async fn get_stream_id_of(&self, _: Uuid) -> Result<Option<String>> {
            std::future::pending().await
        }

        async fn get_version_in_stream(&self, _: &str, _: Uuid) -> Result<Option<i64>> {
            std::future::pending().await
        }

        async fn is_event_in_stream(&self, _: &str, _: Uuid) -> Result<bool> {
            std::future::pending().await
        }

        async fn last_version(&self, _: &str) -> Result<i64> {
            std::future::pending().await
        }

        async fn query(&self, _: &ReadSpec) -> Result<Vec<EventEnvelope>> {
            std::future::pending().await
        }

        async fn count(&self, _: &ReadSpec) -> Result<usize> {
            std::future::pending().await
        }

        fn read(&self) -> ReadQuery<'_> {
            ReadQuery::new(self)
        }
    }

    #[tokio::test]
    async fn test_operation_timeout_cancels() {
        let repo = repository(Arc::new(StalledRepository))
            .with_operation_timeout(Duration::from_millis(20));

        let mut counter = Counter::new("c1");
        counter.increment(1).unwrap();
        let err = repo.save(&mut counter, Some(0)).await.unwrap_err();

        assert!(matches!(err, EsError::Cancelled));
        assert_eq!(counter.changes().len(), 1);

        let err = repo.load::<Counter>("c1").await.unwrap_err();
        assert!(matches!(err, EsError::Cancelled));
    }

    /// Commits through an in-memory store, then never acknowledges.
    struct LateAckRepository {
        inner: InMemoryEventRepository,
    }

    #[async_trait]
    impl EventRepository for LateAckRepository {
        async fn append(
            &self,
            stream_id: &str,
            events: Vec<EventEnvelope>,
            expected: Option<i64>,
        ) -> Result<Vec<EventEnvelope>> {
            self.inner.append(stream_id, events, expected).await?;
            std::future::pending().await
        }

        async fn link(&self, stream_id: &str, ids: &[Uuid], expected: Option<i64>) -> Result<i64> {
            self.inner.link(stream_id, ids, expected).await
        }

        async fn delete_stream(&self, stream_id: &str) -> Result<()> {
            self.inner.delete_stream(stream_id).await
        }

        async fn has_event(&self, event_id: Uuid) -> Result<bool> {
            self.inner.has_event(event_id).await
        }

        async fn get_stream_id_of(&self, event_id: Uuid) -> Result<Option<String>> {
            self.inner.get_stream_id_of(event_id).await
        }

        async fn get_version_in_stream(&self, stream_id: &str, event_id: Uuid) -> Result<Option<i64>> {
            self.inner.get_version_in_stream(stream_id, event_id).await
        }

        async fn is_event_in_stream(&self, stream_id: &str, event_id: Uuid) -> Result<bool> {
            self.inner.is_event_in_stream(stream_id, event_id).await
        }

        async fn last_version(&self, stream_id: &str) -> Result<i64> {
            self.inner.last_version(stream_id).await
        }

        async fn query(&self, spec: &ReadSpec) -> Result<Vec<EventEnvelope>> {
            self.inner.query(spec).await
        }

        async fn count(&self, spec: &ReadSpec) -> Result<usize> {
            self.inner.count(spec).await
        }

        fn read(&self) -> ReadQuery<'_> {
            ReadQuery::new(self)
        }
    }

    #[tokio::test]
    async fn test_cancelled_save_may_have_committed() {
        let store = Arc::new(LateAckRepository {
            inner: InMemoryEventRepository::new(),
        });
        let repo = repository(store.clone()).with_operation_timeout(Duration::from_millis(20));

        let mut counter = Counter::new("c1");
        counter.increment(3).unwrap();
        let err = repo.save(&mut counter, Some(0)).await.unwrap_err();

        assert!(matches!(err, EsError::Cancelled));
        assert_eq!(store.last_version("counter#c1").await.unwrap(), 1);

        // Resaving against the old baseline is rejected, not duplicated
        let expected = counter.original_version();
        let err = repo.save(&mut counter, Some(expected)).await.unwrap_err();
        assert!(err.is_concurrency_violation());

        let reloaded: Counter = repo.load("c1").await.unwrap();
        assert_eq!(reloaded.total, 3);
        assert_eq!(reloaded.current_version(), 1);
    }
}
