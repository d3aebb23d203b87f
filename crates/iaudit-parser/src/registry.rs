use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::envelope::Envelope;
use crate::error::ParseError;
use crate::fields::RawFields;
use crate::handler::{ComputeInstanceHandler, NotificationHandler};

/// Dispatches an incoming `(routing_key, envelope)` pair to the handler bound
/// to that routing key. A routing key with no registered handler is silently
/// ignored — this is how unknown notifications (§4.C) are dropped without
/// error: `dispatch` returns `Ok(None)` rather than a [`ParseError`].
pub struct ParserRegistry {
    handlers: HashMap<String, Arc<dyn NotificationHandler>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        ParserRegistry { handlers: HashMap::new() }
    }

    /// Bind `routing_key` to `handler`. Chainable, mirrors a builder.
    pub fn register(mut self, routing_key: impl Into<String>, handler: Arc<dyn NotificationHandler>) -> Self {
        self.handlers.insert(routing_key.into(), handler);
        self
    }

    /// The default registry: every `compute.instance.*` routing key named in
    /// §4.F's dispatch table, all bound to [`ComputeInstanceHandler`].
    pub fn with_defaults() -> Self {
        const COMPUTE_INSTANCE_ROUTING_KEYS: &[&str] = &[
            "compute.instance.create.start",
            "compute.instance.create.end",
            "compute.instance.rebuild.start",
            "compute.instance.resize.prep.start",
            "compute.instance.resize.prep.end",
            "compute.instance.resize.revert.start",
            "compute.instance.resize.revert.end",
            "compute.instance.delete.end",
            "compute.instance.update",
            "compute.instance.exists",
        ];
        let handler: Arc<dyn NotificationHandler> = Arc::new(ComputeInstanceHandler);
        let mut registry = ParserRegistry::new();
        for key in COMPUTE_INSTANCE_ROUTING_KEYS {
            registry = registry.register(*key, handler.clone());
        }
        registry
    }

    /// Parse `raw_json` into an [`Envelope`] and dispatch it by routing key.
    /// Returns `Ok(None)` for an unrecognized routing key (dropped, no
    /// error); `Err` only for a malformed envelope or a handler-level parse
    /// failure on a *known* routing key.
    pub fn dispatch(&self, deployment: &str, raw_json: &str) -> Result<Option<RawFields>, ParseError> {
        let envelope = Envelope::parse(raw_json)?;
        match self.handlers.get(&envelope.routing_key) {
            Some(handler) => handler.parse(deployment, &envelope, raw_json).map(Some),
            None => {
                debug!(routing_key = %envelope.routing_key, "no handler registered, ignoring");
                Ok(None)
            }
        }
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
