//! The configuration tree.
//!
//! [`ConfigTree`] is a cheap-to-clone handle over one root map and one
//! [`ListenerRegistry`]. Reads that miss consult the load provider registered
//! at the missing path; writes and list mutations notify the store observers
//! of the changed path and of every ancestor, bottom-up, ending at the root.
//!
//! Observers run before a change is applied. If one fails, the change is
//! dropped and the error is returned. No `RefCell` borrow is held while a
//! provider or observer runs, so both may read and write the tree again; a
//! provider reading its own path gets [`TreeError::ReentrantLoad`].

use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

use crate::error::{Result, TreeError};
use crate::listener::{ListenerRegistry, LoadProvider, StoreObserver};
use crate::node::{list_parent, segments_of, Link, ListRef, MapNode, MapRef, TreeNode};
use crate::path::{join, PathKey, ROOT_PATH};
use crate::settings::TreeSettings;

struct Shared {
    settings: TreeSettings,
    /// Created on first access
    root: RefCell<Option<MapRef>>,
    registry: RefCell<ListenerRegistry>,
    /// Paths whose provider returned nothing
    absent: RefCell<HashSet<String>>,
    /// Paths whose provider is running
    loading: RefCell<HashSet<String>>,
}

/// Observable hierarchical configuration tree.
///
/// Clones share the same tree. Observers that need to write back into the
/// tree should capture a [`WeakConfigTree`] to avoid a reference cycle.
#[derive(Clone)]
pub struct ConfigTree {
    shared: Rc<Shared>,
}

/// Non-owning handle to a [`ConfigTree`].
#[derive(Clone)]
pub struct WeakConfigTree {
    shared: Weak<Shared>,
}

impl WeakConfigTree {
    pub fn upgrade(&self) -> Option<ConfigTree> {
        self.shared.upgrade().map(|shared| ConfigTree { shared })
    }
}

impl Default for ConfigTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigTree {
    /// Create an empty tree with default settings.
    pub fn new() -> Self {
        Self::with_settings(TreeSettings::default())
    }

    pub fn with_settings(settings: TreeSettings) -> Self {
        Self {
            shared: Rc::new(Shared {
                settings,
                root: RefCell::new(None),
                registry: RefCell::new(ListenerRegistry::new()),
                absent: RefCell::new(HashSet::new()),
                loading: RefCell::new(HashSet::new()),
            }),
        }
    }

    pub fn settings(&self) -> &TreeSettings {
        &self.shared.settings
    }

    pub fn downgrade(&self) -> WeakConfigTree {
        WeakConfigTree {
            shared: Rc::downgrade(&self.shared),
        }
    }

    // ========================================================================
    // Listener registration
    // ========================================================================

    /// Register a store observer at `path` ([`ROOT_PATH`] for the root).
    pub fn add_store_observer(&self, path: &str, observer: Rc<dyn StoreObserver>) {
        debug!("Registering store observer at '{}'", path);
        self.shared
            .registry
            .borrow_mut()
            .register_store_observer(path, observer);
    }

    /// Register a closure as a store observer at `path`.
    pub fn observe<F>(&self, path: &str, observer: F)
    where
        F: Fn(&Value) -> anyhow::Result<()> + 'static,
    {
        self.add_store_observer(path, Rc::new(observer));
    }

    /// Register the load provider for `path`, replacing any previous one.
    ///
    /// A provider at [`ROOT_PATH`] supplies the initial root map and is only
    /// consulted if registered before the tree is first accessed.
    pub fn add_load_provider(&self, path: &str, provider: Rc<dyn LoadProvider>) {
        debug!("Registering load provider at '{}'", path);
        self.shared.absent.borrow_mut().remove(path);
        self.shared
            .registry
            .borrow_mut()
            .register_load_provider(path, provider);
    }

    /// Register a closure as the load provider for `path`.
    pub fn provide<F>(&self, path: &str, provider: F)
    where
        F: Fn() -> anyhow::Result<Option<Value>> + 'static,
    {
        self.add_load_provider(path, Rc::new(provider));
    }

    // ========================================================================
    // Path operations
    // ========================================================================

    /// Read the value at `path`, loading missing segments on demand.
    ///
    /// Maps and lists come back as live handles, scalars as owned copies.
    pub fn get(&self, path: &str) -> Result<Entry> {
        let key = self.parse(path)?;
        let segment = last_segment(&key)?;
        let parent = self.resolve_parent(&key, false)?;
        let node = self.child_or_load(&parent, segment, &key.to_string())?;
        Ok(Entry::new(self.clone(), node))
    }

    /// Plain snapshot of the value at `path`.
    pub fn get_value(&self, path: &str) -> Result<Value> {
        Ok(self.get(path)?.to_value())
    }

    /// Write `value` at `path`, creating intermediate maps as needed.
    ///
    /// Observers of `path` and of all its ancestors are notified first; the
    /// value is stored only if every observer succeeds.
    pub fn set(&self, path: &str, value: impl Into<Value>) -> Result<()> {
        let key = self.parse(path)?;
        let segment = last_segment(&key)?;
        let parent = self.resolve_parent(&key, true)?;
        debug!("Setting '{}'", key);
        self.store_child(&parent, segment, value.into())
    }

    /// Whether `path` exists, possibly after loading it.
    ///
    /// Only [`TreeError::KeyNotFound`] maps to `false`; other errors are
    /// returned.
    pub fn contains(&self, path: &str) -> Result<bool> {
        match self.get(path) {
            Ok(_) => Ok(true),
            Err(err) if err.is_key_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Handle to the root map.
    pub fn root(&self) -> Result<MapHandle> {
        Ok(MapHandle {
            tree: self.clone(),
            map: self.root_map()?,
        })
    }

    /// Plain snapshot of the whole tree.
    pub fn snapshot(&self) -> Result<Value> {
        let root = self.root_map()?;
        let value = root.borrow().to_value();
        Ok(value)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn parse(&self, path: &str) -> Result<PathKey> {
        PathKey::parse_with(path, self.shared.settings.delimiter)
    }

    fn root_map(&self) -> Result<MapRef> {
        let existing = self.shared.root.borrow().clone();
        if let Some(root) = existing {
            return Ok(root);
        }

        let root = MapNode::new_root();
        let provider = self.shared.registry.borrow().provider_at(ROOT_PATH);
        if let Some(provider) = provider {
            debug!("Loading root map from provider");
            match self.load_guarded(&*provider, ROOT_PATH)? {
                Some(Value::Object(entries)) => MapNode::fill(&root, entries),
                Some(other) => {
                    return Err(TreeError::RootNotAMap {
                        kind: value_kind(&other),
                    })
                }
                None => {}
            }
        }

        *self.shared.root.borrow_mut() = Some(root.clone());
        Ok(root)
    }

    /// Walk every segment of `key` but the last and return the map that holds
    /// the final segment. With `create`, segments that neither exist nor load
    /// become empty maps; no observer is notified for them.
    fn resolve_parent(&self, key: &PathKey, create: bool) -> Result<MapRef> {
        let mut map = self.root_map()?;
        for depth in 1..key.len() {
            let segment = &key.segments()[depth - 1];
            let path = key.prefix(depth).to_string();
            let child = match self.child_or_load(&map, segment, &path) {
                Ok(node) => node,
                Err(err) if create && err.is_key_not_found() => {
                    debug!("Creating intermediate map at '{}'", path);
                    let created = MapNode::new_child(&map, segment);
                    map.borrow_mut()
                        .insert(segment.clone(), TreeNode::Map(created.clone()));
                    TreeNode::Map(created)
                }
                Err(err) => return Err(err),
            };
            map = match child {
                TreeNode::Map(next) => next,
                TreeNode::Scalar(_) | TreeNode::List(_) => {
                    return Err(TreeError::NotATraversableNode { path })
                }
            };
        }
        Ok(map)
    }

    /// Child `segment` of `map`, materialized from the provider at
    /// `full_path` if it is missing. Loading never notifies observers.
    fn child_or_load(&self, map: &MapRef, segment: &str, full_path: &str) -> Result<TreeNode> {
        let existing = map.borrow().get(segment);
        if let Some(node) = existing {
            return Ok(node);
        }

        let not_found = || TreeError::KeyNotFound {
            path: full_path.to_string(),
        };
        if self.shared.absent.borrow().contains(full_path) {
            return Err(not_found());
        }
        let provider = self.shared.registry.borrow().provider_at(full_path);
        let Some(provider) = provider else {
            return Err(not_found());
        };

        debug!("Invoking load provider for '{}'", full_path);
        let Some(value) = self.load_guarded(&*provider, full_path)? else {
            debug!("Load provider for '{}' returned nothing", full_path);
            self.shared.absent.borrow_mut().insert(full_path.to_string());
            return Err(not_found());
        };

        let node = TreeNode::wrap(value, map, segment);
        map.borrow_mut().insert(segment.to_string(), node.clone());
        Ok(node)
    }

    /// Run `provider` for `path`, refusing to start it again while it runs.
    fn load_guarded(&self, provider: &dyn LoadProvider, path: &str) -> Result<Option<Value>> {
        if !self.shared.loading.borrow_mut().insert(path.to_string()) {
            return Err(TreeError::ReentrantLoad {
                path: path.to_string(),
            });
        }
        let result = provider.load();
        self.shared.loading.borrow_mut().remove(path);
        Ok(result?)
    }

    /// Notify observers of the new child `segment` of `map`, then replace it.
    fn store_child(&self, map: &MapRef, segment: &str, value: Value) -> Result<()> {
        let node = TreeNode::wrap(value, map, segment);
        self.propagate(map, segment, node.to_value())?;
        map.borrow_mut().insert(segment.to_string(), node);

        if let Some(mut segments) = segments_of(map) {
            segments.push(segment.to_string());
            self.forget_absent(&join(&segments, self.shared.settings.delimiter));
        }
        Ok(())
    }

    /// Drop absent markers at and below `path` after it was overwritten.
    fn forget_absent(&self, path: &str) {
        let delimiter = self.shared.settings.delimiter;
        self.shared.absent.borrow_mut().retain(|absent| {
            absent != path
                && !(absent.starts_with(path) && absent[path.len()..].starts_with(delimiter))
        });
    }

    /// Notify observers of `map`'s child `key` and of every ancestor of `map`.
    ///
    /// `value` is the pending child value; the snapshots merge it into the
    /// current contents of each ancestor.
    fn propagate(&self, map: &MapRef, key: &str, value: Value) -> Result<()> {
        if !self.shared.registry.borrow().has_observers() {
            return Ok(());
        }

        for (path, value) in self.notifications(map, key, value) {
            let observers = self.shared.registry.borrow().observers_at(&path);
            for observer in observers {
                trace!("Notifying store observer at '{}'", path);
                observer.on_store(&value)?;
            }
        }
        Ok(())
    }

    /// Paths and snapshots to deliver, deepest first, root last.
    ///
    /// Each ancestor's snapshot is its current contents with the changed
    /// child replaced by the snapshot computed one level below.
    fn notifications(&self, map: &MapRef, key: &str, value: Value) -> Vec<(String, Value)> {
        let delimiter = self.shared.settings.delimiter;
        let Some(mut segments) = segments_of(map) else {
            trace!("Skipping propagation from detached map");
            return Vec::new();
        };

        let mut out = Vec::with_capacity(segments.len() + 2);
        let mut node = map.clone();
        let mut key = key.to_string();
        let mut value = value;
        loop {
            let path = if segments.is_empty() {
                key.clone()
            } else {
                format!("{}{}{}", join(&segments, delimiter), delimiter, key)
            };
            let snapshot = node.borrow().snapshot_with(&key, &value);
            out.push((path, value));

            let next = match &node.borrow().link {
                Link::Root => {
                    out.push((ROOT_PATH.to_string(), snapshot));
                    break;
                }
                Link::Child { parent, .. } => parent.upgrade(),
                Link::Detached => None,
            };
            let (Some(parent), Some(own_key)) = (next, segments.pop()) else {
                break;
            };
            node = parent;
            key = own_key;
            value = snapshot;
        }
        out
    }

    fn check_segment(&self, segment: &str) -> Result<()> {
        if segment.is_empty() || segment.contains(self.shared.settings.delimiter) {
            return Err(TreeError::InvalidPath {
                path: segment.to_string(),
                reason: "expected a single non-empty segment",
            });
        }
        Ok(())
    }
}

impl fmt::Debug for ConfigTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigTree")
            .field("settings", &self.shared.settings)
            .field("registry", &*self.shared.registry.borrow())
            .finish()
    }
}

fn last_segment(key: &PathKey) -> Result<&str> {
    key.last().ok_or_else(|| TreeError::InvalidPath {
        path: key.to_string(),
        reason: "path must not be empty",
    })
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

// ============================================================================
// Entries and handles
// ============================================================================

/// Result of a read: an owned scalar or a live container handle.
#[derive(Debug, Clone)]
pub enum Entry {
    Scalar(Value),
    Map(MapHandle),
    List(ListHandle),
}

impl Entry {
    fn new(tree: ConfigTree, node: TreeNode) -> Self {
        match node {
            TreeNode::Scalar(value) => Entry::Scalar(value),
            TreeNode::Map(map) => Entry::Map(MapHandle { tree, map }),
            TreeNode::List(list) => Entry::List(ListHandle { tree, list }),
        }
    }

    /// Plain snapshot of the entry.
    pub fn to_value(&self) -> Value {
        match self {
            Entry::Scalar(value) => value.clone(),
            Entry::Map(map) => map.to_value(),
            Entry::List(list) => list.to_value(),
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Entry::Scalar(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapHandle> {
        match self {
            Entry::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListHandle> {
        match self {
            Entry::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn into_map(self) -> Option<MapHandle> {
        match self {
            Entry::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn into_list(self) -> Option<ListHandle> {
        match self {
            Entry::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Entry::Scalar(_) => "scalar",
            Entry::Map(_) => "map",
            Entry::List(_) => "list",
        }
    }
}

impl PartialEq<Value> for Entry {
    fn eq(&self, other: &Value) -> bool {
        self.to_value() == *other
    }
}

/// Live handle to a map in the tree.
///
/// Writes through the handle notify observers exactly like
/// [`ConfigTree::set`]. A handle whose map was replaced by a later write is
/// detached: it keeps working locally but no longer notifies or loads.
#[derive(Clone)]
pub struct MapHandle {
    tree: ConfigTree,
    map: MapRef,
}

impl MapHandle {
    /// Full path of this map, `None` once detached.
    pub fn path(&self) -> Option<PathKey> {
        segments_of(&self.map)
            .map(|segments| PathKey::from_segments(segments, self.tree.settings().delimiter))
    }

    /// Child `key`, loading it if missing.
    pub fn get(&self, key: &str) -> Result<Entry> {
        self.tree.check_segment(key)?;
        let node = match self.path() {
            Some(path) => self
                .tree
                .child_or_load(&self.map, key, &path.child(key).to_string())?,
            None => {
                let existing = self.map.borrow().get(key);
                existing.ok_or_else(|| TreeError::DetachedKeyNotFound {
                    key: key.to_string(),
                })?
            }
        };
        Ok(Entry::new(self.tree.clone(), node))
    }

    pub fn get_value(&self, key: &str) -> Result<Value> {
        Ok(self.get(key)?.to_value())
    }

    /// Replace child `key` and notify observers.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.tree.check_segment(key)?;
        self.tree.store_child(&self.map, key, value.into())
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(err) if err.is_key_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Keys currently materialized, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.map.borrow().keys()
    }

    pub fn len(&self) -> usize {
        self.map.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_value(&self) -> Value {
        self.map.borrow().to_value()
    }
}

impl fmt::Debug for MapHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapHandle")
            .field("path", &self.path().map(|p| p.to_string()))
            .field("keys", &self.keys())
            .finish()
    }
}

/// Live handle to a list in the tree.
///
/// Every mutating operation notifies the observers at the list's own path
/// with the new list, then those of every ancestor.
#[derive(Clone)]
pub struct ListHandle {
    tree: ConfigTree,
    list: ListRef,
}

impl ListHandle {
    /// Full path of this list, `None` once detached.
    pub fn path(&self) -> Option<PathKey> {
        let (parent, key) = list_parent(&self.list)?;
        let mut segments = segments_of(&parent)?;
        segments.push(key);
        Some(PathKey::from_segments(
            segments,
            self.tree.settings().delimiter,
        ))
    }

    fn path_string(&self) -> String {
        self.path().map(|p| p.to_string()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.list.borrow().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.list.borrow().items.get(index).cloned()
    }

    pub fn to_value(&self) -> Value {
        Value::Array(self.list.borrow().items.clone())
    }

    pub fn append(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.mutate(|items| items.push(value))
    }

    /// Insert before `index`; `index == len` appends.
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let len = self.len();
        if index > len {
            return Err(TreeError::IndexOutOfRange {
                path: self.path_string(),
                index,
                len,
            });
        }
        let value = value.into();
        self.mutate(|items| items.insert(index, value))
    }

    /// Remove the first element structurally equal to `value`.
    pub fn remove(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let position = self.list.borrow().items.iter().position(|v| *v == value);
        let Some(position) = position else {
            return Err(TreeError::NotFound {
                path: self.path_string(),
            });
        };
        self.mutate(|items| {
            items.remove(position);
        })
    }

    /// Remove and return the element at `index`.
    pub fn pop(&self, index: usize) -> Result<Value> {
        let len = self.len();
        if index >= len {
            return Err(TreeError::IndexOutOfRange {
                path: self.path_string(),
                index,
                len,
            });
        }
        self.mutate(|items| items.remove(index))
    }

    pub fn clear(&self) -> Result<()> {
        self.mutate(Vec::clear)
    }

    /// Apply `op` to a copy, notify observers with it, then commit it.
    fn mutate<R>(&self, op: impl FnOnce(&mut Vec<Value>) -> R) -> Result<R> {
        let mut items = self.list.borrow().items.clone();
        let out = op(&mut items);
        if let Some((parent, key)) = list_parent(&self.list) {
            self.tree
                .propagate(&parent, &key, Value::Array(items.clone()))?;
        }
        self.list.borrow_mut().items = items;
        Ok(out)
    }
}

impl fmt::Debug for ListHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListHandle")
            .field("path", &self.path().map(|p| p.to_string()))
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorder(tree: &ConfigTree, path: &str, log: &Rc<RefCell<Vec<(String, Value)>>>) {
        let log = log.clone();
        let label = path.to_string();
        tree.observe(path, move |value| {
            log.borrow_mut().push((label.clone(), value.clone()));
            Ok(())
        });
    }

    #[test]
    fn test_notifications_bottom_up() {
        let tree = ConfigTree::new();
        tree.set("a:b:c", 1).unwrap();
        tree.set("a:x", 2).unwrap();

        let parent = tree.resolve_parent(&PathKey::parse("a:b:c").unwrap(), false).unwrap();
        let paths: Vec<(String, Value)> = tree.notifications(&parent, "c", json!(5));
        assert_eq!(
            paths,
            vec![
                ("a:b:c".to_string(), json!(5)),
                ("a:b".to_string(), json!({"c": 5})),
                ("a".to_string(), json!({"b": {"c": 5}, "x": 2})),
                ("".to_string(), json!({"a": {"b": {"c": 5}, "x": 2}})),
            ]
        );
    }

    #[test]
    fn test_notifications_from_root() {
        let tree = ConfigTree::new();
        let root = tree.root_map().unwrap();
        let paths = tree.notifications(&root, "k", json!("v"));
        assert_eq!(
            paths,
            vec![
                ("k".to_string(), json!("v")),
                ("".to_string(), json!({"k": "v"})),
            ]
        );
    }

    #[test]
    fn test_detached_map_does_not_notify() {
        let tree = ConfigTree::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        recorder(&tree, "", &log);

        tree.set("a", json!({"b": 1})).unwrap();
        let stale = tree.get("a").unwrap().into_map().unwrap();
        tree.set("a", "replaced").unwrap();
        log.borrow_mut().clear();

        stale.set("b", 2).unwrap();
        assert!(log.borrow().is_empty());
        match stale.get("missing").unwrap_err() {
            TreeError::DetachedKeyNotFound { key } => assert_eq!(key, "missing"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!stale.contains("missing").unwrap());
        assert!(stale.path().is_none());
        assert_eq!(stale.to_value(), json!({"b": 2}));
        assert_eq!(tree.get_value("a").unwrap(), json!("replaced"));
    }

    #[test]
    fn test_custom_delimiter_paths() {
        let tree = ConfigTree::with_settings(TreeSettings { delimiter: '/' });
        let log = Rc::new(RefCell::new(Vec::new()));
        recorder(&tree, "a", &log);

        tree.set("a/b", "x").unwrap();
        assert_eq!(tree.get_value("a/b").unwrap(), json!("x"));
        assert_eq!(*log.borrow(), vec![("a".to_string(), json!({"b": "x"}))]);

        let list_path = {
            tree.set("a/l", json!([])).unwrap();
            tree.get("a/l").unwrap().into_list().unwrap().path().unwrap()
        };
        assert_eq!(list_path.to_string(), "a/l");
    }

    #[test]
    fn test_map_handle_rejects_nested_key() {
        let tree = ConfigTree::new();
        let root = tree.root().unwrap();
        let err = root.set("a:b", 1).unwrap_err();
        assert!(matches!(err, TreeError::InvalidPath { .. }));
    }

    #[test]
    fn test_value_kind() {
        assert_eq!(value_kind(&json!(null)), "null");
        assert_eq!(value_kind(&json!([1])), "list");
        assert_eq!(value_kind(&json!({})), "map");
    }
}
