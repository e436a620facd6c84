//! Addressable tree state, one [`Tree`] per (project, branch).
//!
//! All mutation goes through patch methods on [`TreeStore`]. Async callers
//! share the store through a [`StoreHandle`] and hold its lock only for the
//! duration of one patch, never across an await.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::decorator::{DecoratedTree, EntryMap};
use crate::entry::{parent_path, Entry, LastCommit};

/// Identifies one tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeKey {
    pub project_id: String,
    pub branch_id: String,
}

impl TreeKey {
    pub fn new(project_id: impl Into<String>, branch_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            branch_id: branch_id.into(),
        }
    }
}

impl fmt::Display for TreeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.branch_id)
    }
}

/// The materialized tree for one (project, branch).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tree {
    pub entries: EntryMap,
    pub roots: Vec<String>,
    /// Backfill cursor; `None` once the commit log is exhausted
    pub last_commit_path: Option<String>,
    pub loading: bool,
    /// Set while a file-list fetch is in flight or after it succeeded
    #[serde(skip)]
    pub(crate) fetch_requested: bool,
    /// Bumped by every fetch claim and invalidation; results from an older
    /// generation are dropped
    #[serde(skip)]
    pub(crate) fetch_generation: u64,
}

impl Tree {
    fn new_loading() -> Self {
        Self {
            loading: true,
            ..Self::default()
        }
    }

    pub fn entry(&self, path: &str) -> Option<&Entry> {
        self.entries.get(path)
    }

    /// Direct children of `parent`, or the roots when `parent` is `None`.
    pub fn children_of(&self, parent: Option<&str>) -> &[String] {
        match parent {
            Some(path) => match self.entries.get(path) {
                Some(entry) => entry.children(),
                None => &[],
            },
            None => &self.roots,
        }
    }

    /// Find a direct child of `parent` by kind and name.
    pub fn find_child(&self, parent: Option<&str>, kind: &str, name: &str) -> Option<&Entry> {
        self.children_of(parent)
            .iter()
            .filter_map(|path| self.entries.get(path))
            .find(|entry| entry.kind.as_str() == kind && entry.name == name)
    }
}

/// File currently shown in the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveFile {
    pub key: TreeKey,
    pub path: String,
}

/// Result of walking/creating a temporary directory chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TmpTreeOutcome {
    /// Deepest created-or-found directory
    pub target: Option<String>,
    /// Newly created directories, outermost first
    pub created: Vec<String>,
}

#[derive(Debug, Default)]
pub struct TreeStore {
    trees: HashMap<TreeKey, Tree>,
    active: Option<ActiveFile>,
}

impl TreeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tree(&self, key: &TreeKey) -> Option<&Tree> {
        self.trees.get(key)
    }

    pub fn entry(&self, key: &TreeKey, path: &str) -> Option<&Entry> {
        self.trees.get(key)?.entries.get(path)
    }

    fn entry_mut(&mut self, key: &TreeKey, path: &str) -> Option<&mut Entry> {
        self.trees.get_mut(key)?.entries.get_mut(path)
    }

    pub fn active_file(&self) -> Option<&ActiveFile> {
        self.active.as_ref()
    }

    /// Insert an empty, loading tree for `key` if none exists.
    ///
    /// Returns `true` only when the tree was created by this call.
    pub fn create_tree(&mut self, key: &TreeKey) -> bool {
        if self.trees.contains_key(key) {
            return false;
        }
        self.trees.insert(key.clone(), Tree::new_loading());
        true
    }

    /// Mark a tree for refresh. Entries, roots and UI flags stay in place
    /// and the next population merges into them; any fetch still in flight
    /// is superseded.
    pub fn invalidate_tree(&mut self, key: &TreeKey) -> bool {
        let Some(tree) = self.trees.get_mut(key) else {
            return false;
        };
        tree.fetch_requested = false;
        tree.fetch_generation += 1;
        tree.loading = true;
        true
    }

    /// Claim the file-list fetch for `key`, returning the claim's generation.
    /// `None` if a fetch is already in flight or done.
    pub(crate) fn begin_fetch(&mut self, key: &TreeKey) -> Option<u64> {
        self.create_tree(key);
        let tree = self.trees.get_mut(key)?;
        if tree.fetch_requested {
            return None;
        }
        tree.fetch_requested = true;
        tree.fetch_generation += 1;
        Some(tree.fetch_generation)
    }

    /// Release a failed fetch claim; the tree stays `loading`. A claim that
    /// has since been superseded releases nothing and returns `false`.
    pub(crate) fn abandon_fetch(&mut self, key: &TreeKey, generation: u64) -> bool {
        match self.trees.get_mut(key) {
            Some(tree) if tree.fetch_generation == generation => {
                tree.fetch_requested = false;
                true
            }
            _ => false,
        }
    }

    /// Apply a full server population for the claim `generation`.
    ///
    /// Returns `false` without touching the tree when the claim was
    /// superseded. Otherwise entries the server no longer lists are dropped,
    /// unless they are temporary, changed, or above one that is, and the
    /// decorated entries and roots are merged in.
    pub(crate) fn apply_population(
        &mut self,
        key: &TreeKey,
        generation: u64,
        decorated: DecoratedTree,
    ) -> bool {
        match self.trees.get(key) {
            Some(tree) if tree.fetch_generation == generation => {}
            _ => return false,
        }
        self.prune_stale(key, &decorated.entries);
        self.set_entries(key, decorated.entries);
        self.set_directory_data(key, decorated.roots);
        true
    }

    fn prune_stale(&mut self, key: &TreeKey, incoming: &EntryMap) {
        let Some(tree) = self.trees.get_mut(key) else {
            return;
        };

        let mut keep: HashSet<&str> = HashSet::new();
        for entry in tree.entries.values() {
            if !(entry.temp || entry.changed) || incoming.contains_key(&entry.path) {
                continue;
            }
            let mut path = Some(entry.path.as_str());
            while let Some(p) = path {
                if !keep.insert(p) {
                    break;
                }
                path = parent_path(p);
            }
        }

        let stale: HashSet<String> = tree
            .entries
            .keys()
            .filter(|p| !incoming.contains_key(*p) && !keep.contains(p.as_str()))
            .cloned()
            .collect();
        if stale.is_empty() {
            return;
        }

        tree.entries.retain(|path, _| !stale.contains(path));
        tree.roots.retain(|path| !stale.contains(path));
        for entry in tree.entries.values_mut() {
            if let Some(children) = entry.children_mut() {
                children.retain(|child| !stale.contains(child));
            }
        }
        if self
            .active
            .as_ref()
            .is_some_and(|active| &active.key == key && stale.contains(&active.path))
        {
            self.active = None;
        }
        log::debug!("[get_files] {key}: dropped {} stale entries", stale.len());
    }

    /// Merge decorated entries into the tree for `key`.
    ///
    /// Incoming structure wins. Existing `opened`/`changed` flags and any
    /// applied `last_commit` are kept, and children that only exist locally
    /// are appended after the incoming ones.
    pub fn set_entries(&mut self, key: &TreeKey, incoming: EntryMap) {
        self.create_tree(key);
        let Some(tree) = self.trees.get_mut(key) else {
            return;
        };

        for (path, mut entry) in incoming {
            if let Some(existing) = tree.entries.remove(&path) {
                entry.opened |= existing.opened;
                entry.changed |= existing.changed;
                if entry.last_commit.is_none() {
                    entry.last_commit = existing.last_commit;
                }
                if let Some(local) = existing.kind.into_children() {
                    append_local_children(&mut entry, local);
                }
            }
            tree.entries.insert(path, entry);
        }
    }

    /// Set the root list and finish loading.
    pub fn set_directory_data(&mut self, key: &TreeKey, roots: Vec<String>) {
        self.create_tree(key);
        let Some(tree) = self.trees.get_mut(key) else {
            return;
        };

        let incoming: HashSet<&str> = roots.iter().map(String::as_str).collect();
        let local_only: Vec<String> = tree
            .roots
            .drain(..)
            .filter(|path| !incoming.contains(path.as_str()))
            .collect();
        tree.roots = roots;
        tree.roots.extend(local_only);
        tree.loading = false;
    }

    /// Store the backfill cursor. Empty strings mean "exhausted".
    pub fn set_last_commit_url(&mut self, key: &TreeKey, url: Option<String>) {
        if let Some(tree) = self.trees.get_mut(key) {
            tree.last_commit_path = url.filter(|u| !u.is_empty());
        }
    }

    /// Attach commit info to the direct child of the tree root matching
    /// `kind` and `name`. Returns `false` when nothing matched.
    pub fn set_last_commit_data(
        &mut self,
        key: &TreeKey,
        kind: &str,
        name: &str,
        last_commit: LastCommit,
    ) -> bool {
        let Some(tree) = self.trees.get_mut(key) else {
            return false;
        };
        let Some(path) = tree.find_child(None, kind, name).map(|e| e.path.clone()) else {
            return false;
        };
        match tree.entries.get_mut(&path) {
            Some(entry) => {
                entry.last_commit = Some(last_commit);
                true
            }
            None => false,
        }
    }

    /// Flip a directory open/closed. Returns the new state.
    pub fn toggle_tree_open(&mut self, key: &TreeKey, path: &str) -> Option<bool> {
        let entry = self.entry_mut(key, path)?;
        entry.opened = !entry.opened;
        Some(entry.opened)
    }

    pub fn set_file_open(&mut self, key: &TreeKey, path: &str) -> bool {
        match self.entry_mut(key, path) {
            Some(entry) => {
                entry.opened = true;
                true
            }
            None => false,
        }
    }

    pub fn set_loading(&mut self, key: &TreeKey, path: &str, loading: bool) {
        if let Some(entry) = self.entry_mut(key, path) {
            entry.loading = loading;
        }
    }

    pub fn set_file_active(&mut self, key: &TreeKey, path: &str) {
        self.active = Some(ActiveFile {
            key: key.clone(),
            path: path.to_owned(),
        });
    }

    /// Walk `name` segment by segment under `parent`, creating a temporary
    /// directory for every segment without a same-named tree child.
    ///
    /// A leading `"<parent path>/"` on `name` is ignored. Created entries
    /// are opened. Missing trees are created rather than reported.
    pub fn create_tmp_tree(
        &mut self,
        key: &TreeKey,
        parent: Option<&str>,
        name: &str,
    ) -> TmpTreeOutcome {
        self.create_tree(key);
        let mut outcome = TmpTreeOutcome::default();
        let Some(tree) = self.trees.get_mut(key) else {
            return outcome;
        };

        // An unknown parent path falls back to the root
        let mut selected: Option<String> = parent
            .filter(|p| tree.entries.contains_key(*p))
            .map(str::to_owned);
        let relative = match parent {
            Some(p) => name
                .strip_prefix(p)
                .and_then(|rest| rest.strip_prefix('/'))
                .unwrap_or(name),
            None => name,
        };

        for dir_name in relative.split('/').filter(|s| !s.is_empty()) {
            if let Some(found) = tree.find_child(selected.as_deref(), "tree", dir_name) {
                selected = Some(found.path.clone());
                continue;
            }

            let (path, level) = match selected.as_deref().and_then(|p| tree.entries.get(p)) {
                Some(parent_entry) => (
                    format!("{}/{dir_name}", parent_entry.path),
                    parent_entry.level + 1,
                ),
                None => (dir_name.to_owned(), 0),
            };

            match tree.entries.get(&path) {
                Some(existing) if existing.kind.is_tree() => {
                    selected = Some(path);
                    continue;
                }
                Some(_) => {
                    log::warn!("[create_tmp_tree] {key}: {path} is not a directory, stopping");
                    break;
                }
                None => {}
            }

            let mut tmp = Entry::temp_tree(&key.project_id, &key.branch_id, path.clone(), level);
            tmp.opened = true;
            tree.entries.insert(path.clone(), tmp);
            match selected.as_deref().and_then(|p| tree.entries.get_mut(p)) {
                Some(parent_entry) => {
                    parent_entry.push_child(&path);
                }
                None => {
                    if !tree.roots.contains(&path) {
                        tree.roots.push(path.clone());
                    }
                }
            }

            outcome.created.push(path.clone());
            selected = Some(path);
        }

        outcome.target = selected;
        outcome
    }
}

/// Append the `local` children `entry` does not list yet, keeping order.
fn append_local_children(entry: &mut Entry, local: Vec<String>) {
    let Some(children) = entry.children_mut() else {
        return;
    };
    let missing: Vec<String> = {
        let known: HashSet<&str> = children.iter().map(String::as_str).collect();
        local
            .into_iter()
            .filter(|child| !known.contains(child.as_str()))
            .collect()
    };
    children.extend(missing);
}

/// Shared handle to a [`TreeStore`].
///
/// Every `with` call is one atomic patch; readers never see a half-applied
/// update.
#[derive(Debug, Clone, Default)]
pub struct StoreHandle {
    inner: Arc<Mutex<TreeStore>>,
}

impl StoreHandle {
    pub fn new(store: TreeStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TreeStore> {
        // A panicked patch leaves the previous consistent state behind
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive access to the store.
    pub fn with<R>(&self, f: impl FnOnce(&mut TreeStore) -> R) -> R {
        f(&mut self.lock())
    }

    /// Clone of the tree for `key`, if present.
    pub fn snapshot(&self, key: &TreeKey) -> Option<Tree> {
        self.lock().tree(key).cloned()
    }

    pub fn entry(&self, key: &TreeKey, path: &str) -> Option<Entry> {
        self.lock().entry(key, path).cloned()
    }
}
