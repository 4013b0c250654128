//! Producer-side key -> store lookup (spec §4.8).

use crate::store_provider::StoreHandle;
use fanout_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;

pub trait RoutableKey {
    fn canonical(&self) -> String;
}

impl RoutableKey for str {
    fn canonical(&self) -> String {
        self.to_string()
    }
}

impl RoutableKey for String {
    fn canonical(&self) -> String {
        self.clone()
    }
}

impl RoutableKey for uuid::Uuid {
    fn canonical(&self) -> String {
        self.to_string()
    }
}

/// Caches the resolved store per canonical key so repeated `get` calls hand back the exact same
/// `Arc`-backed handles (pointer equality), per spec §4.8.
pub struct Router {
    stores_by_key: Mutex<HashMap<String, StoreHandle>>,
}

impl Router {
    pub fn new(assignments: HashMap<String, StoreHandle>) -> Self {
        Self {
            stores_by_key: Mutex::new(assignments),
        }
    }

    pub fn get(&self, key: &dyn RoutableKey) -> Result<StoreHandle> {
        let canonical = key.canonical();
        if canonical.is_empty() {
            return Err(Error::msg("InvalidKey: router key must not be empty"));
        }
        let stores = self.stores_by_key.lock().expect("router state poisoned");
        stores
            .get(&canonical)
            .cloned()
            .ok_or_else(|| Error::msg(format!("UnknownKey: no store assigned to key {canonical}")))
    }
}
