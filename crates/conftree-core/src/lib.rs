//! # conftree-core
//!
//! Observable hierarchical configuration tree.
//!
//! This crate provides:
//! - Colon-delimited path parsing (`PathKey`)
//! - A tree of scalars, lists and maps with weak parent links
//! - Lazy materialization of subtrees through load providers
//! - Bottom-up change propagation to store observers
//!
//! The tree is single-owner and synchronous. Observers and providers run on
//! the caller's thread and may re-enter the tree.
//!
//! ```
//! use conftree_core::ConfigTree;
//! use serde_json::json;
//!
//! let tree = ConfigTree::new();
//! tree.observe("ses:minions", |value| {
//!     println!("minions changed: {value}");
//!     Ok(())
//! });
//! tree.set("ses:minions:all", json!(["node1", "node2"])).unwrap();
//! assert_eq!(tree.get_value("ses:minions:all").unwrap(), json!(["node1", "node2"]));
//! ```

pub mod error;
pub mod listener;
mod node;
pub mod path;
pub mod settings;
pub mod tree;

pub use error::{Result, TreeError};
pub use listener::{ListenerRegistry, LoadProvider, StoreObserver};
pub use path::{PathKey, DEFAULT_DELIMITER, ROOT_PATH};
pub use settings::{SettingsError, TreeSettings};
pub use tree::{ConfigTree, Entry, ListHandle, MapHandle, WeakConfigTree};
