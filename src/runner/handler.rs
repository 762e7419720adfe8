//! Handler registry
//!
//! Maps `uses` keys to handler functions. The registry is owned by a
//! [`Runtime`](crate::runner::Runtime) and injected into each run.

use crate::runner::context::TaskContext;
use crate::runner::result::TaskResult;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A task handler
pub type Handler = Arc<dyn Fn(&mut TaskContext) -> TaskResult + Send + Sync>;

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous entry
    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&mut TaskContext) -> TaskResult + Send + Sync + 'static,
    {
        self.handlers.insert(name.to_ascii_lowercase(), Arc::new(handler));
    }

    /// Register one handler under several names
    pub fn register_all(&mut self, names: &[&str], handler: Handler) {
        for name in names {
            self.handlers.insert(name.to_ascii_lowercase(), handler.clone());
        }
    }

    pub fn get(&self, name: &str) -> Option<Handler> {
        self.handlers.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(&name.to_ascii_lowercase())
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup_ignore_case() {
        let mut registry = HandlerRegistry::new();
        registry.register("Echo", |ctx| ctx.result().ok());
        assert!(registry.contains("echo"));
        assert!(registry.get("ECHO").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_register_all_shares_handler() {
        let mut registry = HandlerRegistry::new();
        let handler: Handler = Arc::new(|ctx: &mut TaskContext| ctx.result().ok());
        registry.register_all(&["a", "b"], handler);
        assert_eq!(registry.names(), vec!["a", "b"]);
    }
}
