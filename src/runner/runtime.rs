//! Services shared by every run
//!
//! Handlers, the expression evaluator, the remote module resolver and the
//! SSH transport are injected here instead of living in globals, so tests
//! can swap any of them.

use crate::eval::{DefaultEvaluator, Evaluator};
use crate::handlers;
use crate::handlers::remote::{GitResolver, ModuleResolver};
use crate::handlers::transport::{OpenSsh, Transport};
use crate::runner::context::TaskContext;
use crate::runner::handler::HandlerRegistry;
use crate::runner::result::TaskResult;
use crate::ui::Printer;
use std::fmt;
use std::sync::Arc;

pub struct Runtime {
    pub handlers: HandlerRegistry,
    pub evaluator: Arc<dyn Evaluator>,
    pub resolver: Arc<dyn ModuleResolver>,
    pub transport: Arc<dyn Transport>,
    pub printer: Printer,
}

impl Runtime {
    /// Built-in handlers and default services
    pub fn new(printer: Printer) -> Self {
        let mut registry = HandlerRegistry::new();
        handlers::register_builtins(&mut registry);
        Runtime {
            handlers: registry,
            evaluator: Arc::new(DefaultEvaluator),
            resolver: Arc::new(GitResolver::default()),
            transport: Arc::new(OpenSsh),
            printer,
        }
    }

    pub fn with_handler<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(&mut TaskContext) -> TaskResult + Send + Sync + 'static,
    {
        self.handlers.register(name, handler);
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new(Printer::default())
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("handlers", &self.handlers)
            .field("printer", &self.printer)
            .finish_non_exhaustive()
    }
}
