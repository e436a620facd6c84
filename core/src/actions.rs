//! User-facing tree operations.
//!
//! [`TreeActions`] ties the store to its collaborators: the backend
//! service, navigation and user notifications. Store patches are applied
//! between suspension points, so the UI can keep issuing actions while a
//! population or backfill is still running.

use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

use crate::backfill::{run_backfill, BackfillStats};
use crate::config::TreeConfig;
use crate::decorator::decorate_detached;
use crate::entry::{Entry, EntryKind};
use crate::error::TreeError;
use crate::sources::traits::{Navigator, Notifier, Severity, TreeService};
use crate::store::{StoreHandle, TmpTreeOutcome, TreeKey};

pub const TREE_LOAD_ERROR: &str = "Error loading tree data. Please try again.";
pub const LOG_FETCH_ERROR: &str = "Error fetching log data.";
pub const FILE_LOAD_ERROR: &str = "Error loading file.";

/// What a row activation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowAction {
    /// Directory flipped to the given open state
    Toggled { opened: bool },
    /// Submodule handed to a full page load
    Navigated { url: String },
    /// Already-loaded file made active without a fetch
    Activated,
    /// File content requested from the backend
    Fetched,
    /// The entry is no longer in the tree
    Ignored,
}

pub struct TreeActions<S, V, N> {
    store: StoreHandle,
    service: Arc<S>,
    navigator: Arc<V>,
    notifier: Arc<N>,
    config: TreeConfig,
}

impl<S, V, N> TreeActions<S, V, N>
where
    S: TreeService,
    V: Navigator,
    N: Notifier,
{
    pub fn new(
        store: StoreHandle,
        service: Arc<S>,
        navigator: Arc<V>,
        notifier: Arc<N>,
        config: TreeConfig,
    ) -> Self {
        Self {
            store,
            service,
            navigator,
            notifier,
            config,
        }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Mark the tree for `key` for refresh; the next [`Self::get_files`]
    /// fetches again and merges into the existing entries.
    pub fn invalidate_tree(&self, key: &TreeKey) -> bool {
        self.store.with(|store| store.invalidate_tree(key))
    }

    /// Flip a directory open/closed. `None` if the path is unknown.
    pub fn toggle_tree_open(&self, key: &TreeKey, path: &str) -> Option<bool> {
        self.store.with(|store| store.toggle_tree_open(key, path))
    }

    /// Respond to a row being activated in the file tree.
    pub async fn handle_row_action(
        &self,
        key: &TreeKey,
        entry: &Entry,
    ) -> Result<RowAction, TreeError> {
        match &entry.kind {
            EntryKind::Tree { .. } => Ok(self
                .toggle_tree_open(key, &entry.path)
                .map_or(RowAction::Ignored, |opened| RowAction::Toggled { opened })),
            EntryKind::Submodule => {
                self.store
                    .with(|store| store.set_loading(key, &entry.path, true));
                self.navigator.visit_url(&entry.url);
                Ok(RowAction::Navigated {
                    url: entry.url.clone(),
                })
            }
            EntryKind::Blob => {
                // The caller's copy may predate the latest flags
                let Some(current) = self.store.entry(key, &entry.path) else {
                    return Ok(RowAction::Ignored);
                };

                if current.opened || current.changed {
                    self.store.with(|store| {
                        if current.changed && !current.opened {
                            store.set_file_open(key, &current.path);
                        }
                        store.set_file_active(key, &current.path);
                    });
                    return Ok(RowAction::Activated);
                }

                self.service
                    .fetch_file_data(key, &current)
                    .await
                    .map_err(|e| {
                        log::error!("[handle_row_action] ERROR loading {}: {e}", current.path);
                        self.notifier.notify(FILE_LOAD_ERROR, Severity::Alert);
                        TreeError::from(e)
                    })?;
                Ok(RowAction::Fetched)
            }
        }
    }

    /// Create the temporary directories named by `name` under `parent`
    /// (`None` for the tree root), opening and routing to each new one.
    pub fn create_temp_tree(
        &self,
        key: &TreeKey,
        parent: Option<&str>,
        name: &str,
    ) -> TmpTreeOutcome {
        let (outcome, urls) = self.store.with(|store| {
            let outcome = store.create_tmp_tree(key, parent, name);
            let urls: Vec<String> = outcome
                .created
                .iter()
                .filter_map(|path| store.entry(key, path).map(|e| e.url.clone()))
                .collect();
            (outcome, urls)
        });

        for url in urls {
            self.navigator
                .push_route(&format!("{}{url}", self.config.route_prefix));
        }
        outcome
    }

    /// Populate the tree for `key` from the backend, once.
    ///
    /// Returns immediately when the tree is already populated or being
    /// populated. On failure the tree stays `loading`, the user is
    /// notified, and a later call retries.
    pub async fn get_files(&self, key: &TreeKey) -> Result<(), TreeError> {
        let Some(generation) = self.store.with(|store| store.begin_fetch(key)) else {
            log::debug!("[get_files] {key}: already requested");
            return Ok(());
        };

        let t0 = Instant::now();
        match self.populate(key, generation).await {
            Ok(count) => {
                log::info!(
                    "[get_files] SUCCESS {key}: {count} entries in {:?}",
                    t0.elapsed()
                );
                Ok(())
            }
            Err(e) => {
                log::error!("[get_files] ERROR {key}: {e}");
                if self.store.with(|store| store.abandon_fetch(key, generation)) {
                    self.notifier.notify(TREE_LOAD_ERROR, Severity::Alert);
                }
                Err(e)
            }
        }
    }

    async fn populate(&self, key: &TreeKey, generation: u64) -> Result<usize, TreeError> {
        let paths = self.fetch_files_with_retry(key).await?;
        let decorated =
            decorate_detached(paths, key.project_id.clone(), key.branch_id.clone()).await?;
        let count = decorated.entries.len();

        if !self
            .store
            .with(|store| store.apply_population(key, generation, decorated))
        {
            log::warn!("[get_files] {key}: superseded during fetch, discarding result");
        }
        Ok(count)
    }

    async fn fetch_files_with_retry(&self, key: &TreeKey) -> Result<Vec<String>, TreeError> {
        let attempts = self.config.fetch_retries + 1;
        let timeout = self.config.fetch_timeout();
        let mut last_error = TreeError::transport("no attempt made", "fetch_files");

        for attempt in 1..=attempts {
            match tokio::time::timeout(timeout, self.service.fetch_files(key)).await {
                Ok(Ok(paths)) => return Ok(paths),
                Ok(Err(e)) => last_error = e.into(),
                Err(_) => {
                    last_error = TreeError::timeout("fetch_files", self.config.fetch_timeout_secs);
                }
            }
            log::warn!("[get_files] {key}: attempt {attempt}/{attempts} failed: {last_error}");
        }
        Err(last_error)
    }

    /// Run the commit-metadata backfill for `key` to completion.
    pub async fn backfill_last_commits(&self, key: &TreeKey) -> Result<BackfillStats, TreeError> {
        backfill_and_notify(&self.store, self.service.as_ref(), self.notifier.as_ref(), key).await
    }

    /// Start the commit-metadata backfill for `key` in the background.
    pub fn get_last_commit_data(
        &self,
        key: &TreeKey,
    ) -> JoinHandle<Result<BackfillStats, TreeError>> {
        let store = self.store.clone();
        let service = Arc::clone(&self.service);
        let notifier = Arc::clone(&self.notifier);
        let key = key.clone();

        tokio::spawn(async move {
            backfill_and_notify(&store, service.as_ref(), notifier.as_ref(), &key).await
        })
    }
}

async fn backfill_and_notify<S: TreeService, N: Notifier>(
    store: &StoreHandle,
    service: &S,
    notifier: &N,
    key: &TreeKey,
) -> Result<BackfillStats, TreeError> {
    let result = run_backfill(store, service, key).await;
    if result.is_err() {
        notifier.notify(LOG_FETCH_ERROR, Severity::Alert);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::traits::{CommitLogPage, ServiceError};
    use crate::store::TreeStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeService {
        files: Vec<String>,
        file_failures: AtomicUsize,
        file_calls: AtomicUsize,
        stall: bool,
        fail_file_data: bool,
        file_data_calls: Mutex<Vec<String>>,
    }

    impl FakeService {
        fn with_files(files: &[&str]) -> Self {
            Self {
                files: files.iter().map(|f| (*f).to_owned()).collect(),
                ..Self::default()
            }
        }
    }

    impl TreeService for FakeService {
        async fn fetch_files(&self, _key: &TreeKey) -> Result<Vec<String>, ServiceError> {
            self.file_calls.fetch_add(1, Ordering::SeqCst);
            if self.stall {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.file_failures.load(Ordering::SeqCst) > 0 {
                self.file_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ServiceError::new("fetch_files", "503 Service Unavailable"));
            }
            Ok(self.files.clone())
        }

        async fn fetch_commit_log(&self, _cursor: &str) -> Result<CommitLogPage, ServiceError> {
            Err(ServiceError::new("fetch_commit_log", "connection reset"))
        }

        async fn fetch_file_data(&self, _key: &TreeKey, entry: &Entry) -> Result<(), ServiceError> {
            self.file_data_calls.lock().unwrap().push(entry.path.clone());
            if self.fail_file_data {
                return Err(ServiceError::new("fetch_file_data", "404 Not Found"));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeNavigator {
        routes: Mutex<Vec<String>>,
        visits: Mutex<Vec<String>>,
    }

    impl Navigator for FakeNavigator {
        fn push_route(&self, route: &str) {
            self.routes.lock().unwrap().push(route.to_owned());
        }

        fn visit_url(&self, url: &str) {
            self.visits.lock().unwrap().push(url.to_owned());
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        messages: Mutex<Vec<(String, Severity)>>,
    }

    impl Notifier for FakeNotifier {
        fn notify(&self, message: &str, severity: Severity) {
            self.messages
                .lock()
                .unwrap()
                .push((message.to_owned(), severity));
        }
    }

    type Actions = TreeActions<FakeService, FakeNavigator, FakeNotifier>;

    type Harness = (Actions, Arc<FakeNavigator>, Arc<FakeNotifier>);

    fn actions(service: FakeService, config: TreeConfig) -> Harness {
        let navigator = Arc::new(FakeNavigator::default());
        let notifier = Arc::new(FakeNotifier::default());
        let actions = TreeActions::new(
            StoreHandle::new(TreeStore::new()),
            Arc::new(service),
            Arc::clone(&navigator),
            Arc::clone(&notifier),
            config,
        );
        (actions, navigator, notifier)
    }

    fn with_files(files: &[&str]) -> Harness {
        actions(FakeService::with_files(files), TreeConfig::default())
    }

    fn key() -> TreeKey {
        TreeKey::new("gitlab-org/gitlab-ce", "master")
    }

    #[tokio::test]
    async fn test_get_files_populates_once() {
        let (actions, _, _) = actions(
            FakeService::with_files(&["app/a.rb", "README.md"]),
            TreeConfig::default(),
        );

        actions.get_files(&key()).await.unwrap();
        actions.get_files(&key()).await.unwrap();

        assert_eq!(actions.service.file_calls.load(Ordering::SeqCst), 1);
        let tree = actions.store().snapshot(&key()).unwrap();
        assert!(!tree.loading);
        assert_eq!(tree.roots, ["app", "README.md"]);
    }

    #[tokio::test]
    async fn test_get_files_failure_notifies_and_allows_retry() {
        let service = FakeService::with_files(&["a.rb"]);
        service.file_failures.store(1, Ordering::SeqCst);
        let (actions, _, notifier) = actions(service, TreeConfig::default());

        let err = actions.get_files(&key()).await.unwrap_err();
        assert!(matches!(err, TreeError::Transport { .. }));
        assert!(actions.store().snapshot(&key()).unwrap().loading);
        assert_eq!(
            notifier.messages.lock().unwrap().as_slice(),
            [(TREE_LOAD_ERROR.to_owned(), Severity::Alert)]
        );

        actions.get_files(&key()).await.unwrap();
        assert!(!actions.store().snapshot(&key()).unwrap().loading);
    }

    #[tokio::test]
    async fn test_get_files_retries_within_one_call() {
        let service = FakeService::with_files(&["a.rb"]);
        service.file_failures.store(2, Ordering::SeqCst);
        let config = TreeConfig {
            fetch_retries: 2,
            ..TreeConfig::default()
        };
        let (actions, _, notifier) = actions(service, config);

        actions.get_files(&key()).await.unwrap();
        assert_eq!(actions.service.file_calls.load(Ordering::SeqCst), 3);
        assert!(notifier.messages.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_files_times_out() {
        let service = FakeService {
            stall: true,
            ..FakeService::default()
        };
        let config = TreeConfig {
            fetch_timeout_secs: 5,
            ..TreeConfig::default()
        };
        let (actions, _, _) = actions(service, config);

        let err = actions.get_files(&key()).await.unwrap_err();
        assert_eq!(err, TreeError::timeout("fetch_files", 5));
        assert!(actions.store().snapshot(&key()).unwrap().loading);
    }

    #[tokio::test]
    async fn test_row_action_toggles_tree() {
        let (actions, _, _) = with_files(&["app/a.rb"]);
        actions.get_files(&key()).await.unwrap();
        let app = actions.store().entry(&key(), "app").unwrap();

        let result = actions.handle_row_action(&key(), &app).await.unwrap();
        assert_eq!(result, RowAction::Toggled { opened: true });
        let result = actions.handle_row_action(&key(), &app).await.unwrap();
        assert_eq!(result, RowAction::Toggled { opened: false });
        assert!(actions.service.file_data_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_row_action_changed_blob_opens_without_fetch() {
        let (actions, _, _) = with_files(&["app/a.rb"]);
        actions.get_files(&key()).await.unwrap();
        actions.store().with(|store| {
            let mut entries = store.tree(&key()).unwrap().entries.clone();
            entries.get_mut("app/a.rb").unwrap().changed = true;
            store.set_entries(&key(), entries);
        });
        let file = actions.store().entry(&key(), "app/a.rb").unwrap();
        assert!(file.changed && !file.opened);

        let result = actions.handle_row_action(&key(), &file).await.unwrap();

        assert_eq!(result, RowAction::Activated);
        assert!(actions.store().entry(&key(), "app/a.rb").unwrap().opened);
        actions.store().with(|store| {
            let active = store.active_file().unwrap();
            assert_eq!(active.path, "app/a.rb");
            assert_eq!(active.key, key());
        });
        assert!(actions.service.file_data_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_row_action_fresh_blob_fetches() {
        let (actions, _, _) = with_files(&["README.md"]);
        actions.get_files(&key()).await.unwrap();
        let file = actions.store().entry(&key(), "README.md").unwrap();

        let result = actions.handle_row_action(&key(), &file).await.unwrap();

        assert_eq!(result, RowAction::Fetched);
        assert_eq!(
            actions.service.file_data_calls.lock().unwrap().as_slice(),
            ["README.md"]
        );
    }

    #[tokio::test]
    async fn test_row_action_fetch_failure_notifies() {
        let service = FakeService {
            fail_file_data: true,
            ..FakeService::with_files(&["README.md"])
        };
        let (actions, _, notifier) = actions(service, TreeConfig::default());
        actions.get_files(&key()).await.unwrap();
        let file = actions.store().entry(&key(), "README.md").unwrap();

        assert!(actions.handle_row_action(&key(), &file).await.is_err());
        assert_eq!(notifier.messages.lock().unwrap()[0].0, FILE_LOAD_ERROR);
    }

    #[tokio::test]
    async fn test_row_action_submodule_visits_url() {
        let (actions, navigator, _) = actions(FakeService::default(), TreeConfig::default());
        let module = Entry::submodule("gitlab-org/gitlab-ce", "master", "vendor/gitaly", 1);
        actions.store().with(|store| {
            let mut entries = crate::decorator::EntryMap::new();
            entries.insert(module.path.clone(), module.clone());
            store.set_entries(&key(), entries);
        });

        let result = actions.handle_row_action(&key(), &module).await.unwrap();

        assert_eq!(
            result,
            RowAction::Navigated {
                url: "/gitlab-org/gitlab-ce/tree/master/vendor/gitaly".to_owned()
            }
        );
        assert!(actions.store().entry(&key(), "vendor/gitaly").unwrap().loading);
        assert_eq!(
            navigator.visits.lock().unwrap().as_slice(),
            ["/gitlab-org/gitlab-ce/tree/master/vendor/gitaly"]
        );
    }

    #[tokio::test]
    async fn test_row_action_on_removed_entry_is_ignored() {
        let (actions, _, _) = actions(FakeService::default(), TreeConfig::default());
        let ghost = Entry::blob("gitlab-org/gitlab-ce", "master", "ghost.rb", 0);
        let result = actions.handle_row_action(&key(), &ghost).await.unwrap();
        assert_eq!(result, RowAction::Ignored);
    }

    #[tokio::test]
    async fn test_create_temp_tree_routes_to_each_new_dir() {
        let (actions, navigator, _) = with_files(&["x/a.rb"]);
        actions.get_files(&key()).await.unwrap();

        let outcome = actions.create_temp_tree(&key(), None, "x/y/z");

        assert_eq!(outcome.created, ["x/y", "x/y/z"]);
        assert_eq!(
            navigator.routes.lock().unwrap().as_slice(),
            [
                "/project/gitlab-org/gitlab-ce/tree/master/x/y",
                "/project/gitlab-org/gitlab-ce/tree/master/x/y/z"
            ]
        );
    }

    #[tokio::test]
    async fn test_backfill_failure_notifies() {
        let (actions, _, notifier) = with_files(&["a.rb"]);
        actions.get_files(&key()).await.unwrap();
        actions
            .store()
            .with(|store| store.set_last_commit_url(&key(), Some("/logs".to_owned())));

        let result = actions.get_last_commit_data(&key()).await.unwrap();

        assert!(result.is_err());
        assert_eq!(notifier.messages.lock().unwrap()[0].0, LOG_FETCH_ERROR);
    }
}
