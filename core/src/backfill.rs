//! Commit-metadata backfill.
//!
//! Pages of commit-log data are fetched strictly one at a time for a tree,
//! starting at the tree's `last_commit_path` cursor. Each page's records are
//! attached to the tree's root-level entries by (kind, name); records with
//! no matching entry are skipped.
//!
//! The cursor is taken off the tree while its page is in flight, so a
//! second trigger for the same tree finds nothing to fetch. On success the
//! response cursor replaces it; on failure the old cursor is put back.

use crate::error::TreeError;
use crate::sources::traits::{CommitLogPage, TreeService};
use crate::store::{StoreHandle, TreeKey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackfillState {
    Idle,
    Fetching { cursor: String },
    Applying { page: CommitLogPage },
    Done,
    Failed(TreeError),
}

impl BackfillState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }
}

/// Counters for one backfill run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillStats {
    pub requests: usize,
    pub applied: usize,
    pub unmatched: usize,
}

/// Drives [`BackfillState`] for one tree.
pub struct Backfill<'a, S> {
    store: &'a StoreHandle,
    service: &'a S,
    key: &'a TreeKey,
    stats: BackfillStats,
}

impl<'a, S: TreeService> Backfill<'a, S> {
    pub fn new(store: &'a StoreHandle, service: &'a S, key: &'a TreeKey) -> Self {
        Self {
            store,
            service,
            key,
            stats: BackfillStats::default(),
        }
    }

    pub fn stats(&self) -> BackfillStats {
        self.stats
    }

    /// Advance by one transition.
    pub async fn step(&mut self, state: BackfillState) -> BackfillState {
        match state {
            BackfillState::Idle => {
                let key = self.key;
                let cursor = self.store.with(|store| {
                    let cursor = store
                        .tree(key)
                        .and_then(|tree| tree.last_commit_path.clone());
                    if cursor.is_some() {
                        store.set_last_commit_url(key, None);
                    }
                    cursor
                });
                match cursor {
                    Some(cursor) => BackfillState::Fetching { cursor },
                    None => BackfillState::Done,
                }
            }
            BackfillState::Fetching { cursor } => {
                self.stats.requests += 1;
                match self.service.fetch_commit_log(&cursor).await {
                    Ok(page) => {
                        self.store.with(|store| {
                            store.set_last_commit_url(self.key, page.next_cursor.clone());
                        });
                        BackfillState::Applying { page }
                    }
                    Err(e) => {
                        self.store.with(|store| {
                            store.set_last_commit_url(self.key, Some(cursor));
                        });
                        BackfillState::Failed(e.into())
                    }
                }
            }
            BackfillState::Applying { page } => {
                let key = self.key;
                let stats = &mut self.stats;
                self.store.with(|store| {
                    for record in &page.records {
                        if store.set_last_commit_data(
                            key,
                            &record.kind,
                            &record.file_name,
                            record.to_last_commit(),
                        ) {
                            stats.applied += 1;
                        } else {
                            stats.unmatched += 1;
                        }
                    }
                });
                BackfillState::Idle
            }
            terminal @ (BackfillState::Done | BackfillState::Failed(_)) => terminal,
        }
    }
}

/// Run the backfill for `key` until the cursor runs out or a fetch fails.
pub async fn run_backfill<S: TreeService>(
    store: &StoreHandle,
    service: &S,
    key: &TreeKey,
) -> Result<BackfillStats, TreeError> {
    let mut backfill = Backfill::new(store, service, key);
    let mut state = BackfillState::Idle;

    loop {
        state = backfill.step(state).await;
        match state {
            BackfillState::Done => {
                let stats = backfill.stats();
                log::debug!(
                    "[get_last_commit_data] {key}: {} requests, {} applied, {} unmatched",
                    stats.requests,
                    stats.applied,
                    stats.unmatched
                );
                return Ok(stats);
            }
            BackfillState::Failed(e) => {
                log::warn!("[get_last_commit_data] {key}: {e}");
                return Err(e);
            }
            _ => {}
        }
    }
}
