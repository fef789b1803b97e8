//! Managed tree nodes.
//!
//! Containers are shared through `Rc<RefCell<_>>`. Ownership flows from the
//! root down; the parent link of a child is a `Weak` and never keeps a map
//! alive. A container's full path is rebuilt on demand by walking parent links.

use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

pub(crate) type MapRef = Rc<RefCell<MapNode>>;
pub(crate) type ListRef = Rc<RefCell<ListNode>>;

/// Position of a container inside the tree.
#[derive(Debug, Clone)]
pub(crate) enum Link {
    /// The tree root, full path `""`.
    Root,
    /// Attached under `parent` at segment `key`.
    Child { parent: Weak<RefCell<MapNode>>, key: String },
    /// Replaced by a later write; no longer reachable from the root.
    Detached,
}

#[derive(Debug, Clone)]
pub(crate) enum TreeNode {
    Scalar(Value),
    Map(MapRef),
    List(ListRef),
}

#[derive(Debug)]
pub(crate) struct MapNode {
    children: BTreeMap<String, TreeNode>,
    pub(crate) link: Link,
}

#[derive(Debug)]
pub(crate) struct ListNode {
    pub(crate) items: Vec<Value>,
    pub(crate) link: Link,
}

impl TreeNode {
    /// Wrap a plain value as a child of `parent` at `key`.
    ///
    /// Objects and arrays become managed containers. Nested objects are
    /// wrapped depth-first, so every descendant is linked before the result
    /// is handed back.
    pub(crate) fn wrap(value: Value, parent: &MapRef, key: &str) -> TreeNode {
        let link = Link::Child {
            parent: Rc::downgrade(parent),
            key: key.to_string(),
        };
        match value {
            Value::Object(entries) => {
                let map = Rc::new(RefCell::new(MapNode::empty(link)));
                MapNode::fill(&map, entries);
                TreeNode::Map(map)
            }
            Value::Array(items) => TreeNode::List(Rc::new(RefCell::new(ListNode { items, link }))),
            scalar => TreeNode::Scalar(scalar),
        }
    }

    /// Plain snapshot, unaffected by later mutation.
    pub(crate) fn to_value(&self) -> Value {
        match self {
            TreeNode::Scalar(value) => value.clone(),
            TreeNode::Map(map) => map.borrow().to_value(),
            TreeNode::List(list) => Value::Array(list.borrow().items.clone()),
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            TreeNode::Scalar(_) => "scalar",
            TreeNode::Map(_) => "map",
            TreeNode::List(_) => "list",
        }
    }

    fn detach(&self) {
        match self {
            TreeNode::Scalar(_) => {}
            TreeNode::Map(map) => map.borrow_mut().link = Link::Detached,
            TreeNode::List(list) => list.borrow_mut().link = Link::Detached,
        }
    }
}

impl MapNode {
    pub(crate) fn empty(link: Link) -> Self {
        Self {
            children: BTreeMap::new(),
            link,
        }
    }

    pub(crate) fn new_root() -> MapRef {
        Rc::new(RefCell::new(Self::empty(Link::Root)))
    }

    /// Empty map attached under `parent` at `key`.
    pub(crate) fn new_child(parent: &MapRef, key: &str) -> MapRef {
        Rc::new(RefCell::new(Self::empty(Link::Child {
            parent: Rc::downgrade(parent),
            key: key.to_string(),
        })))
    }

    /// Insert wrapped `entries` into `map` without any notification.
    pub(crate) fn fill(map: &MapRef, entries: Map<String, Value>) {
        for (key, value) in entries {
            let child = TreeNode::wrap(value, map, &key);
            map.borrow_mut().insert(key, child);
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<TreeNode> {
        self.children.get(key).cloned()
    }

    /// Insert or replace a child. A replaced container is detached.
    pub(crate) fn insert(&mut self, key: String, node: TreeNode) {
        if let Some(old) = self.children.insert(key, node) {
            old.detach();
        }
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.children.keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.children.len()
    }

    pub(crate) fn to_value(&self) -> Value {
        Value::Object(
            self.children
                .iter()
                .map(|(key, child)| (key.clone(), child.to_value()))
                .collect(),
        )
    }

    /// Snapshot of this map with `key` set to `value`. Other children are
    /// reconstructed from their current contents.
    pub(crate) fn snapshot_with(&self, key: &str, value: &Value) -> Value {
        let mut out: Map<String, Value> = self
            .children
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, child)| (k.clone(), child.to_value()))
            .collect();
        out.insert(key.to_string(), value.clone());
        Value::Object(out)
    }
}

/// Segments of `map`'s full path, root first.
///
/// `None` when the map or one of its ancestors has been detached.
pub(crate) fn segments_of(map: &MapRef) -> Option<Vec<String>> {
    let mut segments = Vec::new();
    let mut current = map.clone();
    loop {
        let next = match &current.borrow().link {
            Link::Root => None,
            Link::Child { parent, key } => {
                segments.push(key.clone());
                Some(parent.upgrade()?)
            }
            Link::Detached => return None,
        };
        match next {
            Some(parent) => current = parent,
            None => break,
        }
    }
    segments.reverse();
    Some(segments)
}

/// Parent map and own key of a list, if it is still attached.
pub(crate) fn list_parent(list: &ListRef) -> Option<(MapRef, String)> {
    let link = list.borrow().link.clone();
    match link {
        Link::Child { parent, key } => Some((parent.upgrade()?, key)),
        Link::Root | Link::Detached => None,
    }
}
