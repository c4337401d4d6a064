//! Job handlers and their registry.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;

use crate::error::{DispatchError, HandlerError};

/// Executes one job type.
///
/// Handlers are invoked at least once per message and may see the same
/// payload again after a retry, so side effects should tolerate repeats.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The `type` tag this handler serves.
    fn job_type(&self) -> &str;

    async fn handle(&self, payload: &Value) -> Result<(), HandlerError>;
}

/// Handlers by job type.
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Register a handler under its job type.
    ///
    /// Returns an error if the type already has a handler.
    pub fn register(&self, handler: Arc<dyn JobHandler>) -> Result<(), DispatchError> {
        let job_type = handler.job_type().to_string();
        match self.handlers.entry(job_type) {
            Entry::Occupied(entry) => Err(DispatchError::AlreadyRegistered(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(handler);
                Ok(())
            }
        }
    }

    pub fn unregister(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.remove(job_type).map(|(_, handler)| handler)
    }

    pub fn resolve(&self, job_type: &str) -> Result<Arc<dyn JobHandler>, DispatchError> {
        self.handlers
            .get(job_type)
            .map(|handler| handler.clone())
            .ok_or_else(|| DispatchError::UnknownType(job_type.to_string()))
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(&'static str);

    #[async_trait]
    impl JobHandler for Noop {
        fn job_type(&self) -> &str {
            self.0
        }

        async fn handle(&self, _payload: &Value) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = HandlerRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(Noop("webhook"))).unwrap();
        registry.register(Arc::new(Noop("alert"))).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("webhook"));
        assert_eq!(registry.resolve("alert").unwrap().job_type(), "alert");
        assert_eq!(registry.job_types(), vec!["alert", "webhook"]);
    }

    #[test]
    fn test_register_duplicate() {
        let registry = HandlerRegistry::new();
        registry.register(Arc::new(Noop("webhook"))).unwrap();
        let err = registry.register(Arc::new(Noop("webhook"))).unwrap_err();
        assert_eq!(err, DispatchError::AlreadyRegistered("webhook".to_string()));
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = HandlerRegistry::default();
        let err = registry.resolve("qr_generation").err().unwrap();
        assert_eq!(err, DispatchError::UnknownType("qr_generation".to_string()));
    }

    #[test]
    fn test_unregister() {
        let registry = HandlerRegistry::new();
        registry.register(Arc::new(Noop("alert"))).unwrap();
        assert!(registry.unregister("alert").is_some());
        assert!(registry.unregister("alert").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_resolved_handler_runs() {
        let registry = HandlerRegistry::new();
        registry.register(Arc::new(Noop("alert"))).unwrap();
        let handler = registry.resolve("alert").unwrap();
        assert!(handler.handle(&serde_json::json!({})).await.is_ok());
    }
}
