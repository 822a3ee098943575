use std::collections::HashMap;
use std::sync::Arc;

use super::error::{Result, UsageError};

type StreamNameDelegate = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

/// Aggregate type -> function deriving the backing stream id from
/// `(aggregate_type, aggregate_id)`.
#[derive(Default, Clone)]
pub struct StreamNamer {
    delegates: HashMap<String, StreamNameDelegate>,
}

impl StreamNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one delegate for several aggregate types.
    ///
    /// Fails without registering anything if any of the types already has a
    /// delegate.
    pub fn register_delegate<F>(&mut self, delegate: F, aggregate_types: &[&str]) -> Result<()>
    where
        F: Fn(&str, &str) -> String + Send + Sync + 'static,
    {
        if let Some(taken) = aggregate_types
            .iter()
            .find(|t| self.delegates.contains_key(**t))
        {
            return Err(UsageError::AlreadyRegistered((*taken).to_string()).into());
        }

        let delegate: StreamNameDelegate = Arc::new(delegate);
        for aggregate_type in aggregate_types {
            self.delegates
                .insert((*aggregate_type).to_string(), Arc::clone(&delegate));
        }
        Ok(())
    }

    pub fn get_stream_name(&self, aggregate_type: &str, aggregate_id: &str) -> Result<String> {
        let delegate = self
            .delegates
            .get(aggregate_type)
            .ok_or_else(|| UsageError::NoDelegate(aggregate_type.to_string()))?;
        Ok(delegate(aggregate_type, aggregate_id))
    }
}

impl std::fmt::Debug for StreamNamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamNamer")
            .field("aggregate_types", &self.delegates.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// `"{type}#{id}"` with the type lowercased, e.g. `order#42`.
pub fn type_hash_id(aggregate_type: &str, aggregate_id: &str) -> String {
    format!("{}#{}", aggregate_type.to_lowercase(), aggregate_id)
}
