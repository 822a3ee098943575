use std::collections::HashMap;

use super::error::{EsError, Result, UsageError};
use super::event::{DomainEvent, Event};

type EventConstructor = Box<dyn Fn() -> Box<dyn Event> + Send + Sync>;

/// Event type name -> zero-value constructor.
///
/// Backends hand back only the discriminator and the serialized payload; the
/// factory supplies an instance of the right concrete type to unmarshal into.
#[derive(Default)]
pub struct EventFactory {
    delegates: HashMap<String, EventConstructor>,
}

impl EventFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `event_name` to `delegate`. A second binding for the same name
    /// fails and leaves the first intact.
    pub fn register_delegate<F>(&mut self, event_name: &str, delegate: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Event> + Send + Sync + 'static,
    {
        if self.delegates.contains_key(event_name) {
            return Err(UsageError::AlreadyRegistered(event_name.to_string()).into());
        }
        self.delegates
            .insert(event_name.to_string(), Box::new(delegate));
        Ok(())
    }

    /// Register `E` under its own name with `E::default()` as the zero value.
    pub fn register<E: DomainEvent>(&mut self) -> Result<()> {
        self.register_delegate(E::NAME, || Box::new(E::default()))
    }

    /// A fresh zero-value event, or `None` when the name is unknown.
    pub fn get_event(&self, event_name: &str) -> Option<Box<dyn Event>> {
        self.delegates.get(event_name).map(|delegate| delegate())
    }

    /// Resolve `event_name` and unmarshal `payload` into it.
    pub fn decode(&self, event_name: &str, payload: &str) -> Result<Box<dyn Event>> {
        let mut event = self
            .get_event(event_name)
            .ok_or_else(|| EsError::EventNotFound(event_name.to_string()))?;
        event.unmarshal(payload)?;
        Ok(event)
    }

    pub fn is_registered(&self, event_name: &str) -> bool {
        self.delegates.contains_key(event_name)
    }
}

impl std::fmt::Debug for EventFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFactory")
            .field("events", &self.delegates.keys().collect::<Vec<_>>())
            .finish()
    }
}
