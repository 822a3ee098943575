use std::collections::HashMap;

use super::error::{EsError, Result};
use super::event::{DomainEvent, Event, EventEnvelope};

// ============================================================================
// Aggregate Root Pattern - Event Sourcing Core
// ============================================================================
//
// Key Principles:
// 1. State is derived from events (not stored directly)
// 2. Behaviour methods validate before raising events
// 3. A rejected command leaves state and pending changes untouched
// 4. All state changes flow through `apply`
//
// `AggregateBase` carries the bookkeeping every aggregate shares (id,
// versions, pending changes). The state transitions themselves live in a
// per-aggregate `Transitions` table keyed by event name.
//
// ============================================================================

/// Version tracking and the pending-change buffer.
#[derive(Debug, Clone)]
pub struct AggregateBase {
    id: String,
    original_version: i64,
    current_version: i64,
    changes: Vec<EventEnvelope>,
}

impl AggregateBase {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            original_version: 0,
            current_version: 0,
            changes: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn original_version(&self) -> i64 {
        self.original_version
    }

    pub fn current_version(&self) -> i64 {
        self.current_version
    }

    pub fn changes(&self) -> &[EventEnvelope] {
        &self.changes
    }

    fn track_change(&mut self, envelope: EventEnvelope) {
        self.changes.push(envelope);
        self.current_version += 1;
    }

    /// Historical events move both versions: they are already persisted.
    fn increment_version(&mut self) {
        self.current_version += 1;
        self.original_version = self.current_version;
    }

    fn clear_changes(&mut self) {
        self.changes.clear();
    }

    /// Pending changes are persisted: drop them and move the baseline to
    /// `version`, the version the aggregate has applied up to.
    pub(crate) fn mark_saved(&mut self, version: i64) {
        self.changes.clear();
        self.original_version = version;
        self.current_version = version;
    }
}

/// Generic aggregate contract.
///
/// Implementors provide access to their [`AggregateBase`] and a `when`
/// dispatcher (normally a [`Transitions`] lookup); everything else is
/// provided.
pub trait AggregateRoot: Sized + Send + Sync + 'static {
    /// Aggregate type discriminator, used to resolve the stream name.
    const AGGREGATE_TYPE: &'static str;

    /// Zero aggregate: version 0, no pending changes.
    fn new(id: &str) -> Self;

    fn base(&self) -> &AggregateBase;

    fn base_mut(&mut self) -> &mut AggregateBase;

    /// State transition for one event, dispatched on the event name.
    fn when(&mut self, event: &dyn Event) -> Result<()>;

    fn id(&self) -> &str {
        self.base().id()
    }

    fn original_version(&self) -> i64 {
        self.base().original_version()
    }

    fn current_version(&self) -> i64 {
        self.base().current_version()
    }

    fn changes(&self) -> &[EventEnvelope] {
        self.base().changes()
    }

    fn clear_changes(&mut self) {
        self.base_mut().clear_changes();
    }

    /// Apply an envelope; new ones are also buffered as pending changes.
    fn apply(&mut self, envelope: EventEnvelope, is_new: bool) -> Result<()> {
        self.when(envelope.event())?;
        if is_new {
            self.base_mut().track_change(envelope);
        }
        Ok(())
    }

    /// Replay history. Used by the repository on load.
    fn rebuild_from_events(&mut self, envelopes: Vec<EventEnvelope>) -> Result<()> {
        for envelope in envelopes {
            self.apply(envelope, false)?;
            self.base_mut().increment_version();
        }
        Ok(())
    }

    /// Wrap a freshly decided event and apply it as new.
    fn raise<E: DomainEvent>(&mut self, event: E) -> Result<()> {
        let envelope = EventEnvelope::new(self.id().to_string(), event);
        self.apply(envelope, true)
    }
}

// ============================================================================
// Transition Table
// ============================================================================

type Transition<S> = Box<dyn Fn(&mut S, &dyn Event) -> Result<()> + Send + Sync>;

/// Event name -> state transition for one aggregate type.
///
/// Built once per aggregate type (typically in a `LazyLock`). An event name
/// without an entry is an error rather than a silent no-op.
pub struct Transitions<S> {
    aggregate_type: &'static str,
    handlers: HashMap<&'static str, Transition<S>>,
}

impl<S: 'static> Transitions<S> {
    pub fn new(aggregate_type: &'static str) -> Self {
        Self {
            aggregate_type,
            handlers: HashMap::new(),
        }
    }

    /// Register the transition for `E`.
    pub fn on<E: DomainEvent>(mut self, transition: fn(&mut S, &E)) -> Self {
        let aggregate_type = self.aggregate_type;
        self.handlers.insert(
            E::NAME,
            Box::new(move |state: &mut S, event: &dyn Event| {
                let data = event.data().downcast_ref::<E>().ok_or_else(|| {
                    EsError::unexpected(anyhow::anyhow!(
                        "{} received undecoded payload for event {}",
                        aggregate_type,
                        E::NAME
                    ))
                })?;
                transition(state, data);
                Ok(())
            }),
        );
        self
    }

    pub fn handles(&self, event_name: &str) -> bool {
        self.handlers.contains_key(event_name)
    }

    pub fn apply(&self, state: &mut S, event: &dyn Event) -> Result<()> {
        match self.handlers.get(event.name()) {
            Some(transition) => transition(state, event),
            None => Err(EsError::unexpected(anyhow::anyhow!(
                "{} has no transition for event {}",
                self.aggregate_type,
                event.name()
            ))),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
