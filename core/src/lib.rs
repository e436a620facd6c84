//! File-tree state for a browser-based IDE.
//!
//! A flat list of blob paths becomes a nested entry tree per
//! (project, branch), commit metadata is attached lazily page by page, and
//! row activations are dispatched by entry kind.

pub mod actions;
pub mod backfill;
pub mod config;
pub mod decorator;
pub mod entry;
pub mod error;
pub mod sources;
pub mod store;

#[cfg(feature = "cli")]
pub mod cli;

pub use actions::{RowAction, TreeActions};
pub use decorator::{decorate, DecoratedTree, EntryMap};
pub use entry::{Entry, EntryKind, LastCommit};
pub use error::TreeError;
pub use store::{StoreHandle, Tree, TreeKey, TreeStore};
