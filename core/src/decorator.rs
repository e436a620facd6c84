//! Flat path list to entry tree.
//!
//! [`decorate`] walks every path once, synthesizing directory entries the
//! first time a prefix is seen. It never sorts: `roots` and each tree's
//! `children` keep first-discovery order. [`decorate_detached`] runs the
//! same walk on a blocking worker thread and hands back one batched
//! [`DecoratedTree`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::entry::Entry;
use crate::error::TreeError;

/// Path -> entry lookup for one (project, branch).
pub type EntryMap = BTreeMap<String, Entry>;

/// Output of a decoration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoratedTree {
    pub entries: EntryMap,
    /// Top-level paths in discovery order
    pub roots: Vec<String>,
}

/// Build the entry mapping and root list for a checkout's blob paths.
pub fn decorate<S: AsRef<str>>(paths: &[S], project_id: &str, branch_id: &str) -> DecoratedTree {
    let mut entries = EntryMap::new();
    let mut roots: Vec<String> = Vec::new();

    for path in paths {
        let path = path.as_ref();
        if path.is_empty() {
            continue;
        }

        let (dirs, _blob_name) = match path.rsplit_once('/') {
            Some((dirs, name)) => (Some(dirs), name),
            None => (None, path),
        };

        let mut parent: Option<&str> = None;
        if let Some(dirs) = dirs {
            let mut end = 0;
            for (index, segment) in dirs.split('/').enumerate() {
                end += segment.len();
                let folder_path = &dirs[..end];
                end += 1;

                if !entries.contains_key(folder_path) {
                    let level = parent
                        .and_then(|p| entries.get(p))
                        .map_or(index, |p: &Entry| p.level + 1);
                    entries.insert(
                        folder_path.to_owned(),
                        Entry::tree(project_id, branch_id, folder_path, level),
                    );
                    attach(&mut entries, &mut roots, parent, folder_path);
                }
                parent = Some(folder_path);
            }
        }

        // A repeated path is a no-op beyond the directory reuse above
        if entries.contains_key(path) {
            continue;
        }

        let level = parent.and_then(|p| entries.get(p)).map_or(0, |p| p.level + 1);
        entries.insert(
            path.to_owned(),
            Entry::blob(project_id, branch_id, path, level),
        );
        attach(&mut entries, &mut roots, parent, path);
    }

    DecoratedTree { entries, roots }
}

/// Register `path` under its parent, or as a root when there is none.
///
/// Only called on a path's first insertion, so no duplicate check.
fn attach(entries: &mut EntryMap, roots: &mut Vec<String>, parent: Option<&str>, path: &str) {
    match parent {
        Some(parent) => {
            if let Some(children) = entries.get_mut(parent).and_then(Entry::children_mut) {
                children.push(path.to_owned());
            }
        }
        None => roots.push(path.to_owned()),
    }
}

/// Run [`decorate`] off the calling task.
///
/// Inputs are moved into the worker and the whole result comes back as a
/// single value; the worker never touches shared state.
pub async fn decorate_detached(
    paths: Vec<String>,
    project_id: String,
    branch_id: String,
) -> Result<DecoratedTree, TreeError> {
    let t0 = Instant::now();
    let path_count = paths.len();

    let decorated =
        tokio::task::spawn_blocking(move || decorate(&paths, &project_id, &branch_id)).await?;

    log::debug!(
        "[decorate] {} paths -> {} entries ({} roots) in {:?}",
        path_count,
        decorated.entries.len(),
        decorated.roots.len(),
        t0.elapsed()
    );
    Ok(decorated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{parent_path, EntryKind};

    fn sample() -> Vec<&'static str> {
        vec![
            "README.md",
            "src/lib.rs",
            "src/store/mod.rs",
            "src/store/tree.rs",
            "docs/guide/intro.md",
            "src/main.rs",
            "Cargo.toml",
        ]
    }

    #[test]
    fn test_directory_dedup() {
        let tree = decorate(&["a/b/c.txt", "a/b/d.txt", "a/e.txt"], "p", "main");

        assert_eq!(tree.roots, ["a"]);
        assert_eq!(tree.entries.len(), 5);

        let a = &tree.entries["a"];
        assert_eq!(a.level, 0);
        assert_eq!(a.children(), ["a/b", "a/e.txt"]);
        assert!(a.kind.is_tree());

        let b = &tree.entries["a/b"];
        assert_eq!(b.level, 1);
        assert_eq!(b.children(), ["a/b/c.txt", "a/b/d.txt"]);

        let c = &tree.entries["a/b/c.txt"];
        assert_eq!(c.kind, EntryKind::Blob);
        assert_eq!(c.level, 2);
        assert_eq!(c.name, "c.txt");
        assert_eq!(c.url, "/p/blob/main/a/b/c.txt");
    }

    #[test]
    fn test_roots_keep_discovery_order() {
        let tree = decorate(&sample(), "p", "main");
        assert_eq!(tree.roots, ["README.md", "src", "docs", "Cargo.toml"]);
        assert_eq!(
            tree.entries["src"].children(),
            ["src/lib.rs", "src/store", "src/main.rs"]
        );
    }

    #[test]
    fn test_levels_follow_parents() {
        let tree = decorate(&sample(), "p", "main");
        for entry in tree.entries.values() {
            match parent_path(&entry.path) {
                Some(parent) => {
                    let parent = &tree.entries[parent];
                    assert_eq!(entry.level, parent.level + 1, "{}", entry.path);
                    assert!(parent.children().contains(&entry.path));
                }
                None => {
                    assert_eq!(entry.level, 0, "{}", entry.path);
                    assert!(tree.roots.contains(&entry.path));
                }
            }
        }
    }

    #[test]
    fn test_decoration_is_idempotent() {
        let first = decorate(&sample(), "p", "main");
        let second = decorate(&sample(), "p", "main");
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_repeated_path_is_noop() {
        let tree = decorate(&["a/x.rs", "a/x.rs", "y.rs", "y.rs"], "p", "main");
        assert_eq!(tree.roots, ["a", "y.rs"]);
        assert_eq!(tree.entries["a"].children(), ["a/x.rs"]);
        assert_eq!(tree.entries.len(), 3);
    }

    #[test]
    fn test_wide_directory_keeps_every_child_in_order() {
        let paths: Vec<String> = (0..50_000).map(|i| format!("vendor/f{i}.rb")).collect();
        let tree = decorate(&paths, "p", "main");

        let children = tree.entries["vendor"].children();
        assert_eq!(children.len(), 50_000);
        assert_eq!(children[0], "vendor/f0.rb");
        assert_eq!(children[49_999], "vendor/f49999.rb");
        assert_eq!(tree.roots, ["vendor"]);
    }

    #[test]
    fn test_empty_input() {
        let tree = decorate::<&str>(&[], "p", "main");
        assert!(tree.entries.is_empty());
        assert!(tree.roots.is_empty());

        let tree = decorate(&[""], "p", "main");
        assert!(tree.entries.is_empty());
    }

    #[tokio::test]
    async fn test_decorate_detached_matches_inline() {
        let paths: Vec<String> = sample().into_iter().map(str::to_owned).collect();
        let inline = decorate(&paths, "p", "main");
        let detached = decorate_detached(paths, "p".to_owned(), "main".to_owned())
            .await
            .unwrap();
        assert_eq!(inline, detached);
    }
}
