//! Store observers and load providers.
//!
//! Both are keyed by the full path string they are registered at. The root is
//! keyed by [`ROOT_PATH`](crate::ROOT_PATH) (the empty string).

use serde_json::Value;
use std::collections::HashMap;
use std::rc::Rc;

/// Notified with the reconstructed value at its path after every change at or
/// beneath that path.
pub trait StoreObserver {
    fn on_store(&self, new_value: &Value) -> anyhow::Result<()>;
}

impl<F> StoreObserver for F
where
    F: Fn(&Value) -> anyhow::Result<()>,
{
    fn on_store(&self, new_value: &Value) -> anyhow::Result<()> {
        self(new_value)
    }
}

/// Supplies the value of a path the tree has not materialized yet.
///
/// Returning `Ok(None)` signals that the path does not exist.
pub trait LoadProvider {
    fn load(&self) -> anyhow::Result<Option<Value>>;
}

impl<F> LoadProvider for F
where
    F: Fn() -> anyhow::Result<Option<Value>>,
{
    fn load(&self) -> anyhow::Result<Option<Value>> {
        self()
    }
}

/// Observers and providers by full path.
#[derive(Default)]
pub struct ListenerRegistry {
    /// Observers per path, in registration (= notification) order
    store_observers: HashMap<String, Vec<Rc<dyn StoreObserver>>>,
    /// At most one provider per path
    load_providers: HashMap<String, Rc<dyn LoadProvider>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observer to the sequence at `path`.
    pub fn register_store_observer(&mut self, path: &str, observer: Rc<dyn StoreObserver>) {
        self.store_observers
            .entry(path.to_string())
            .or_default()
            .push(observer);
    }

    /// Set the provider at `path`, replacing any previous one.
    pub fn register_load_provider(&mut self, path: &str, provider: Rc<dyn LoadProvider>) {
        self.load_providers.insert(path.to_string(), provider);
    }

    /// Observers registered at exactly `path`, in registration order.
    ///
    /// The handles are cloned so callers can invoke them without holding a
    /// borrow of the registry.
    pub fn observers_at(&self, path: &str) -> Vec<Rc<dyn StoreObserver>> {
        self.store_observers.get(path).cloned().unwrap_or_default()
    }

    pub fn provider_at(&self, path: &str) -> Option<Rc<dyn LoadProvider>> {
        self.load_providers.get(path).cloned()
    }

    /// Total number of registered observers across all paths.
    pub fn observer_count(&self) -> usize {
        self.store_observers.values().map(Vec::len).sum()
    }

    pub fn provider_count(&self) -> usize {
        self.load_providers.len()
    }

    pub fn has_observers(&self) -> bool {
        self.store_observers.values().any(|v| !v.is_empty())
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut observed: Vec<&String> = self.store_observers.keys().collect();
        observed.sort();
        let mut provided: Vec<&String> = self.load_providers.keys().collect();
        provided.sort();
        f.debug_struct("ListenerRegistry")
            .field("store_observers", &observed)
            .field("load_providers", &provided)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;

    #[test]
    fn test_observers_in_registration_order() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ListenerRegistry::new();

        for id in 0..3 {
            let calls = calls.clone();
            registry.register_store_observer(
                "a:b",
                Rc::new(move |_: &Value| -> anyhow::Result<()> {
                    calls.borrow_mut().push(id);
                    Ok(())
                }),
            );
        }

        for observer in registry.observers_at("a:b") {
            observer.on_store(&json!(1)).unwrap();
        }
        assert_eq!(*calls.borrow(), vec![0, 1, 2]);
        assert_eq!(registry.observer_count(), 3);
    }

    #[test]
    fn test_observers_at_unknown_path_is_empty() {
        let registry = ListenerRegistry::new();
        assert!(registry.observers_at("").is_empty());
        assert!(registry.observers_at("missing").is_empty());
        assert!(!registry.has_observers());
    }

    #[test]
    fn test_provider_last_registration_wins() {
        let mut registry = ListenerRegistry::new();
        registry.register_load_provider(
            "k",
            Rc::new(|| -> anyhow::Result<Option<Value>> { Ok(Some(json!("first"))) }),
        );
        registry.register_load_provider(
            "k",
            Rc::new(|| -> anyhow::Result<Option<Value>> { Ok(Some(json!("second"))) }),
        );

        assert_eq!(registry.provider_count(), 1);
        let provider = registry.provider_at("k").unwrap();
        assert_eq!(provider.load().unwrap(), Some(json!("second")));
        assert!(registry.provider_at("other").is_none());
    }

    #[test]
    fn test_root_key_is_empty_string() {
        let mut registry = ListenerRegistry::new();
        registry.register_store_observer(
            crate::ROOT_PATH,
            Rc::new(|_: &Value| -> anyhow::Result<()> { Ok(()) }),
        );
        assert_eq!(registry.observers_at("").len(), 1);
    }
}
