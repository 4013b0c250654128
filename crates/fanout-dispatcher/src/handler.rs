//! Topic -> handler lookup (spec §4.6).

use fanout_core::handler::Handler;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct HandlerResolver {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.insert(handler.topic().to_string(), handler);
    }

    pub fn resolve(&self, topic: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(topic).cloned()
    }
}

impl FromIterator<Arc<dyn Handler>> for HandlerResolver {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Handler>>>(iter: I) -> Self {
        let mut resolver = Self::new();
        for handler in iter {
            resolver.register(handler);
        }
        resolver
    }
}
