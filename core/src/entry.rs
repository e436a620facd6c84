//! Tree node representation.
//!
//! An [`Entry`] is keyed everywhere by its full slash-delimited path; the
//! path doubles as its `id`. Structural fields (name, path, level, kind,
//! url) come from decoration, while `opened`, `changed`, `loading` and
//! `temp` are UI state that survives tree refreshes.

use serde::{Deserialize, Serialize};

/// Kind of entry, with the fields only that kind carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EntryKind {
    /// Directory. `children` holds child paths in discovery order.
    Tree { children: Vec<String> },
    /// Regular file
    Blob,
    /// Nested repository; activating it leaves the editor.
    Submodule,
}

impl EntryKind {
    pub fn tree() -> Self {
        Self::Tree {
            children: Vec::new(),
        }
    }

    /// The short name used in URLs and commit-log records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tree { .. } => "tree",
            Self::Blob => "blob",
            Self::Submodule => "submodule",
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, Self::Tree { .. })
    }

    pub fn into_children(self) -> Option<Vec<String>> {
        match self {
            Self::Tree { children } => Some(children),
            Self::Blob | Self::Submodule => None,
        }
    }
}

/// Last commit touching an entry, attached by the backfill loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastCommit {
    pub id: String,
    pub message: String,
    pub author: String,
    pub authored_at: String,
    /// Link to the commit log for this entry
    pub url: Option<String>,
}

/// A file, directory or submodule node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: String,
    pub name: String,
    pub path: String,
    pub level: usize,
    pub url: String,
    pub kind: EntryKind,
    #[serde(default)]
    pub opened: bool,
    #[serde(default)]
    pub changed: bool,
    #[serde(default)]
    pub loading: bool,
    /// Created client-side and not yet known to the server
    #[serde(default)]
    pub temp: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<LastCommit>,
}

impl Entry {
    pub fn new(
        project_id: &str,
        branch_id: &str,
        path: impl Into<String>,
        level: usize,
        kind: EntryKind,
    ) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or_default().to_owned();
        let url = entry_url(project_id, branch_id, &kind, &path);
        Self {
            id: path.clone(),
            name,
            path,
            level,
            url,
            kind,
            opened: false,
            changed: false,
            loading: false,
            temp: false,
            last_commit: None,
        }
    }

    pub fn tree(project_id: &str, branch_id: &str, path: impl Into<String>, level: usize) -> Self {
        Self::new(project_id, branch_id, path, level, EntryKind::tree())
    }

    pub fn blob(project_id: &str, branch_id: &str, path: impl Into<String>, level: usize) -> Self {
        Self::new(project_id, branch_id, path, level, EntryKind::Blob)
    }

    pub fn submodule(
        project_id: &str,
        branch_id: &str,
        path: impl Into<String>,
        level: usize,
    ) -> Self {
        Self::new(project_id, branch_id, path, level, EntryKind::Submodule)
    }

    /// A client-side directory that has not been saved yet.
    pub fn temp_tree(
        project_id: &str,
        branch_id: &str,
        path: impl Into<String>,
        level: usize,
    ) -> Self {
        let mut entry = Self::tree(project_id, branch_id, path, level);
        entry.temp = true;
        entry
    }

    /// Child paths; empty for anything but a tree.
    pub fn children(&self) -> &[String] {
        match &self.kind {
            EntryKind::Tree { children } => children,
            EntryKind::Blob | EntryKind::Submodule => &[],
        }
    }

    /// Mutable child list; `None` for anything but a tree.
    pub fn children_mut(&mut self) -> Option<&mut Vec<String>> {
        match &mut self.kind {
            EntryKind::Tree { children } => Some(children),
            EntryKind::Blob | EntryKind::Submodule => None,
        }
    }

    /// Append a child path. Returns `false` if this entry is not a tree or
    /// already lists the child.
    ///
    /// Scans the existing children; bulk merges should dedup with a set and
    /// push through [`Entry::children_mut`] instead.
    pub fn push_child(&mut self, child: &str) -> bool {
        match &mut self.kind {
            EntryKind::Tree { children } => {
                if children.iter().any(|c| c == child) {
                    return false;
                }
                children.push(child.to_owned());
                true
            }
            EntryKind::Blob | EntryKind::Submodule => false,
        }
    }

    /// Path of the containing directory, `None` at the root.
    pub fn parent_path(&self) -> Option<&str> {
        parent_path(&self.path)
    }
}

/// Path with its last segment removed, `None` for a root-level path.
pub fn parent_path(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

/// Navigation target for an entry.
///
/// Files resolve to `/<project>/blob/<branch>/<path>`, directories and
/// submodules to `/<project>/tree/<branch>/<path>`.
pub fn entry_url(project_id: &str, branch_id: &str, kind: &EntryKind, path: &str) -> String {
    let segment = match kind {
        EntryKind::Blob => "blob",
        EntryKind::Tree { .. } | EntryKind::Submodule => "tree",
    };
    format!("/{project_id}/{segment}/{branch_id}/{path}")
}
