use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::error::Result;

// ============================================================================
// Event Envelope - Identity, Version and Headers around an Event
// ============================================================================
//
// The envelope is what travels between aggregates, the store and the bus.
// The event inside is polymorphic (`dyn Event`); the envelope itself is
// immutable apart from the one-time assignment of id and version when the
// store persists it.
//
// ============================================================================

/// Header carrying the owning aggregate id on every saved envelope.
pub const AGGREGATE_ID_HEADER: &str = "AggregateID";
/// Header carrying the correlation id, added by the store when absent.
pub const CORRELATION_ID_HEADER: &str = "CorrelationID";
/// Header carrying the RFC 3339 time the store accepted the event.
pub const TIMESTAMP_HEADER: &str = "Timestamp";

// ============================================================================
// Event Trait
// ============================================================================

/// Polymorphic event payload.
///
/// `marshal`/`unmarshal` convert to and from the transport string once the
/// discriminator (`name`) is already known.
pub trait Event: fmt::Debug + Send + Sync + 'static {
    fn name(&self) -> &str;

    /// The domain fields, for downcasting to the concrete event type.
    fn data(&self) -> &dyn Any;

    fn marshal(&self) -> Result<String>;

    fn unmarshal(&mut self, raw: &str) -> Result<()>;
}

/// Concrete domain events implement this; [`Event`] comes for free.
///
/// `Default` provides the zero value the [`EventFactory`](crate::event_sourcing::EventFactory)
/// hands out before deserialization.
pub trait DomainEvent:
    Serialize + DeserializeOwned + Default + Clone + fmt::Debug + Send + Sync + 'static
{
    const NAME: &'static str;
}

impl<E: DomainEvent> Event for E {
    fn name(&self) -> &str {
        E::NAME
    }

    fn data(&self) -> &dyn Any {
        self
    }

    fn marshal(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn unmarshal(&mut self, raw: &str) -> Result<()> {
        *self = serde_json::from_str(raw)?;
        Ok(())
    }
}

/// An event read back from a backend that has not been resolved through the
/// factory yet: only the discriminator and the serialized payload are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    name: String,
    payload: String,
}

impl RawEvent {
    pub fn new(name: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }
}

impl Event for RawEvent {
    fn name(&self) -> &str {
        &self.name
    }

    fn data(&self) -> &dyn Any {
        &self.payload
    }

    fn marshal(&self) -> Result<String> {
        Ok(self.payload.clone())
    }

    fn unmarshal(&mut self, raw: &str) -> Result<()> {
        self.payload = raw.to_string();
        Ok(())
    }
}

// ============================================================================
// Envelope
// ============================================================================

#[derive(Clone, Debug)]
pub struct EventEnvelope {
    event_id: Option<Uuid>,
    aggregate_id: String,
    version: Option<i64>,
    position: Option<i64>,
    headers: HashMap<String, String>,
    event: Arc<dyn Event>,
}

impl EventEnvelope {
    /// Wrap a not-yet-persisted event.
    pub fn new(aggregate_id: impl Into<String>, event: impl Event) -> Self {
        Self::from_boxed(aggregate_id, Box::new(event))
    }

    pub fn from_boxed(aggregate_id: impl Into<String>, event: Box<dyn Event>) -> Self {
        Self {
            event_id: None,
            aggregate_id: aggregate_id.into(),
            version: None,
            position: None,
            headers: HashMap::new(),
            event: Arc::from(event),
        }
    }

    /// Rebuild a persisted envelope as a backend hands it back.
    pub fn persisted(
        event_id: Uuid,
        version: i64,
        position: i64,
        headers: HashMap<String, String>,
        event: Box<dyn Event>,
    ) -> Self {
        let aggregate_id = headers
            .get(AGGREGATE_ID_HEADER)
            .cloned()
            .unwrap_or_default();

        Self {
            event_id: Some(event_id),
            aggregate_id,
            version: Some(version),
            position: Some(position),
            headers,
            event: Arc::from(event),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(key, value);
        self
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    pub fn event_id(&self) -> Option<Uuid> {
        self.event_id
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn version(&self) -> Option<i64> {
        self.version
    }

    /// Store-wide membership position, increasing with every append or link.
    /// `from_id`/`to_id` reads range over it.
    pub fn position(&self) -> Option<i64> {
        self.position
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn event(&self) -> &dyn Event {
        self.event.as_ref()
    }

    pub fn event_name(&self) -> &str {
        self.event.name()
    }

    /// Downcast the payload to a concrete domain event.
    pub fn data<E: DomainEvent>(&self) -> Option<&E> {
        self.event.data().downcast_ref::<E>()
    }

    /// Same event and headers, stamped with the identity the store assigned.
    pub(crate) fn into_persisted(mut self, event_id: Uuid, version: i64, position: i64) -> Self {
        self.event_id = Some(event_id);
        self.version = Some(version);
        self.position = Some(position);
        self
    }

    /// Same event and headers under a different stream version.
    pub fn with_version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }

    /// Replace the payload, keeping identity and headers.
    pub(crate) fn with_event(mut self, event: Box<dyn Event>) -> Self {
        self.event = Arc::from(event);
        self
    }

    pub(crate) fn with_aggregate_id(mut self, aggregate_id: impl Into<String>) -> Self {
        self.aggregate_id = aggregate_id.into();
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
    struct ItemsCounted {
        item: String,
        count: i32,
    }

    impl DomainEvent for ItemsCounted {
        const NAME: &'static str = "ItemsCounted";
    }

    #[test]
    fn test_event_envelope_creation() {
        let envelope = EventEnvelope::new(
            "agg-1",
            ItemsCounted {
                item: "bolt".to_string(),
                count: 3,
            },
        )
        .with_header(CORRELATION_ID_HEADER, "corr-1");

        assert_eq!(envelope.aggregate_id(), "agg-1");
        assert_eq!(envelope.event_id(), None);
        assert_eq!(envelope.version(), None);
        assert_eq!(envelope.event_name(), "ItemsCounted");
        assert_eq!(envelope.header(CORRELATION_ID_HEADER), Some("corr-1"));
        assert_eq!(envelope.data::<ItemsCounted>().map(|e| e.count), Some(3));
    }

    #[test]
    fn test_marshal_unmarshal_round_trip() {
        let original = ItemsCounted {
            item: "nut \"M8\"".to_string(),
            count: -7,
        };

        let json = original.marshal().unwrap();
        let mut restored = ItemsCounted::default();
        restored.unmarshal(&json).unwrap();

        assert_eq!(original, restored);
    }

    #[test]
    fn test_marshal_is_deterministic() {
        let event = ItemsCounted {
            item: "washer".to_string(),
            count: 10,
        };

        assert_eq!(event.marshal().unwrap(), event.marshal().unwrap());
    }

    #[test]
    fn test_unmarshal_rejects_garbage() {
        let mut event = ItemsCounted::default();
        assert!(event.unmarshal("{not json").is_err());
    }

    #[test]
    fn test_persisted_envelope_takes_aggregate_id_from_headers() {
        let mut headers = HashMap::new();
        headers.insert(AGGREGATE_ID_HEADER.to_string(), "agg-9".to_string());
        let id = Uuid::new_v4();

        let envelope = EventEnvelope::persisted(
            id,
            4,
            17,
            headers,
            Box::new(RawEvent::new("ItemsCounted", "{}")),
        );

        assert_eq!(envelope.aggregate_id(), "agg-9");
        assert_eq!(envelope.event_id(), Some(id));
        assert_eq!(envelope.version(), Some(4));
        assert_eq!(envelope.position(), Some(17));
        assert!(envelope.data::<ItemsCounted>().is_none());
    }
}
