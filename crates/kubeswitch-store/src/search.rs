//! Discovery orchestrator
//!
//! Runs every store concurrently and merges what they find into one event
//! channel. A store is served from its search index when the index is fresh,
//! otherwise it is searched live: each new entry is fetched and parsed, one
//! event is emitted per context, and the index is rewritten afterwards.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use kubeswitch_core::{Kubeconfig, StatePaths};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, warn};

use crate::error::Result;
use crate::index::{IndexEntry, SearchIndex};
use crate::store::{SearchResult, Store, Tags, prefixed_name};

/// Capacity of the merged event channel
const EVENT_BUFFER: usize = 64;

/// Capacity of each store's raw result channel
const STORE_BUFFER: usize = 16;

/// Settings of one search, shared by every store task
#[derive(Debug, Clone)]
pub struct SearchSession {
    pub paths: StatePaths,
    /// Index TTL for stores without their own `refreshIndexAfter`
    pub default_ttl: Option<Duration>,
    /// Ignore fresh indices and search every store live
    pub no_index: bool,
    /// Deadline of the whole search
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

/// One context offered for selection
pub struct DiscoveredContext {
    /// Displayed name, prefixed per store policy
    pub name: String,
    /// Context name inside the kubeconfig
    pub context: String,
    pub key: String,
    pub tags: Tags,
    pub store: Arc<dyn Store>,
    /// Sanitized kubeconfig, when it was already parsed during discovery
    pub preview: Option<String>,
}

impl fmt::Debug for DiscoveredContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveredContext")
            .field("name", &self.name)
            .field("context", &self.context)
            .field("key", &self.key)
            .field("tags", &self.tags)
            .field("store", &self.store.id())
            .finish()
    }
}

/// Item of the merged event channel
#[derive(Debug, Clone)]
pub enum SearchEvent {
    Context(Arc<DiscoveredContext>),
    Error { store_id: String, message: String },
}

/// Receiving side of a running search
pub struct SearchHandle {
    pub events: mpsc::Receiver<SearchEvent>,
    cancel: CancellationToken,
    timed_out: Arc<AtomicBool>,
}

impl SearchHandle {
    pub async fn next(&mut self) -> Option<SearchEvent> {
        self.events.recv().await
    }

    /// Stop every store task. The channel closes once they have wound down.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the search deadline cut the search short
    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    /// Split into the event receiver and a status view
    pub fn into_parts(self) -> (mpsc::Receiver<SearchEvent>, SearchStatus) {
        (
            self.events,
            SearchStatus {
                cancel: self.cancel,
                timed_out: self.timed_out,
            },
        )
    }
}

/// Cancellation and deadline state of a search, detached from its events
#[derive(Debug, Clone)]
pub struct SearchStatus {
    cancel: CancellationToken,
    timed_out: Arc<AtomicBool>,
}

impl SearchStatus {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }
}

/// Start searching `stores`
///
/// Every store is verified first; a verification failure aborts before any
/// search starts.
pub async fn search(stores: Vec<Arc<dyn Store>>, session: SearchSession) -> Result<SearchHandle> {
    for store in &stores {
        store.verify().instrument(store.span()).await?;
    }

    let (tx, events) = mpsc::channel(EVENT_BUFFER);
    let timed_out = Arc::new(AtomicBool::new(false));
    let finished = CancellationToken::new();
    let cancel = session.cancel.clone();

    tokio::spawn(watchdog(
        session.timeout,
        cancel.clone(),
        finished.clone(),
        timed_out.clone(),
    ));

    let session = Arc::new(session);
    let mut tasks = JoinSet::new();
    for store in stores {
        let session = session.clone();
        let tx = tx.clone();
        tasks.spawn(async move {
            let store_id = store.id().to_string();
            let span = store.span();
            // nested task so that a panic is observed here and not in the coordinator
            let outcome = tokio::spawn(search_store(store, session, tx).instrument(span)).await;
            (store_id, outcome)
        });
    }

    tokio::spawn(async move {
        while let Some(joined) = tasks.join_next().await {
            let (store_id, message) = match joined {
                Ok((_, Ok(()))) => continue,
                Ok((store_id, Err(e))) => (store_id, format!("store task failed: {}", e)),
                Err(e) => (String::from("unknown"), format!("store task failed: {}", e)),
            };
            warn!(store = %store_id, "{}", message);
            let _ = tx.send(SearchEvent::Error { store_id, message }).await;
        }
        // last sender: the channel closes here, once
        drop(tx);
        finished.cancel();
    });

    Ok(SearchHandle {
        events,
        cancel,
        timed_out,
    })
}

async fn watchdog(
    timeout: Duration,
    cancel: CancellationToken,
    finished: CancellationToken,
    timed_out: Arc<AtomicBool>,
) {
    tokio::select! {
        _ = tokio::time::sleep(timeout) => {
            debug!(timeout = ?timeout, "search deadline reached");
            timed_out.store(true, Ordering::SeqCst);
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
        _ = finished.cancelled() => {}
    }
}

async fn search_store(
    store: Arc<dyn Store>,
    session: Arc<SearchSession>,
    tx: mpsc::Sender<SearchEvent>,
) {
    let index = SearchIndex::new(&session.paths, store.id(), store.kind());
    let ttl = store.config().index_ttl(session.default_ttl);

    if !session.no_index && index.is_fresh(ttl) {
        match index.read() {
            Ok(entries) => {
                debug!(contexts = entries.len(), "serving from search index");
                replay_index(&store, entries, &session.cancel, &tx).await;
                return;
            }
            Err(e) => warn!(error = %e, "unreadable search index, searching live"),
        }
    }

    live_search(store, &session, index, &tx).await;
}

async fn replay_index(
    store: &Arc<dyn Store>,
    entries: BTreeMap<String, IndexEntry>,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<SearchEvent>,
) {
    for (name, entry) in entries {
        if cancel.is_cancelled() {
            return;
        }
        let context = DiscoveredContext {
            name,
            context: entry.context,
            key: entry.key,
            tags: entry.tags,
            store: store.clone(),
            preview: None,
        };
        if tx.send(SearchEvent::Context(Arc::new(context))).await.is_err() {
            return;
        }
    }
}

async fn live_search(
    store: Arc<dyn Store>,
    session: &SearchSession,
    index: SearchIndex,
    tx: &mpsc::Sender<SearchEvent>,
) {
    let (raw_tx, mut raw_rx) = mpsc::channel(STORE_BUFFER);
    let searcher = {
        let store = store.clone();
        let cancel = session.cancel.clone();
        let span = store.span();
        tokio::spawn(async move { store.start_search(raw_tx, cancel).await }.instrument(span))
    };

    let mut seen = HashSet::new();
    let mut discovered = BTreeMap::new();
    let mut errors = 0;
    let mut search_failed = false;

    loop {
        let result = tokio::select! {
            _ = session.cancel.cancelled() => break,
            result = raw_rx.recv() => result,
        };
        let Some(result) = result else {
            break;
        };

        let events = match result {
            SearchResult::Error { message } => {
                errors += 1;
                warn!(error = %message, "discovery error");
                vec![error_event(&store, message)]
            }
            SearchResult::Entry { key, tags } => {
                if !seen.insert(key.clone()) {
                    continue;
                }
                let outcome = tokio::select! {
                    _ = session.cancel.cancelled() => break,
                    outcome = discover_entry(&store, &key, &tags) => outcome,
                };
                match outcome {
                    Ok(contexts) => contexts
                        .into_iter()
                        .map(|context| {
                            discovered.insert(
                                context.name.clone(),
                                IndexEntry {
                                    key: context.key.clone(),
                                    tags: context.tags.clone(),
                                    context: context.context.clone(),
                                },
                            );
                            SearchEvent::Context(Arc::new(context))
                        })
                        .collect(),
                    Err(EntryError::Fetch(message)) => {
                        errors += 1;
                        warn!(key = %key, error = %message, "cannot fetch kubeconfig");
                        vec![error_event(&store, message)]
                    }
                    Err(EntryError::Parse(message)) => {
                        warn!(key = %key, error = %message, "skipping unparsable kubeconfig");
                        vec![error_event(&store, message)]
                    }
                }
            }
        };

        for event in events {
            if tx.send(event).await.is_err() {
                session.cancel.cancel();
                break;
            }
        }
    }
    drop(raw_rx);

    if let Err(e) = searcher.await {
        search_failed = true;
        let _ = tx.send(error_event(&store, format!("search task failed: {}", e))).await;
    }

    if session.cancel.is_cancelled() {
        debug!("search cancelled, keeping previous index");
        return;
    }
    // failed entries are left out; a store that produced nothing but errors keeps its old index
    if search_failed || (discovered.is_empty() && errors > 0) {
        debug!(errors, "store search failed, keeping previous index");
        return;
    }
    if let Err(e) = index.write(discovered) {
        warn!(error = %e, "failed to write search index");
    }
}

enum EntryError {
    Fetch(String),
    Parse(String),
}

/// Fetch and parse one entry into its contexts
async fn discover_entry(
    store: &Arc<dyn Store>,
    key: &str,
    tags: &Tags,
) -> std::result::Result<Vec<DiscoveredContext>, EntryError> {
    let bytes = store
        .fetch(key, tags)
        .await
        .map_err(|e| EntryError::Fetch(format!("{}: {}", key, e)))?;
    let kubeconfig =
        Kubeconfig::parse(&bytes).map_err(|e| EntryError::Parse(format!("{}: {}", key, e)))?;
    let prefix = store
        .context_prefix(key)
        .await
        .map_err(|e| EntryError::Fetch(format!("{}: {}", key, e)))?;

    // stores with their own previewer render previews on demand
    let preview = match store.previewer() {
        Some(_) => None,
        None => kubeconfig
            .to_sanitized_bytes()
            .ok()
            .map(|b| String::from_utf8_lossy(&b).into_owned()),
    };

    Ok(kubeconfig
        .context_names()
        .into_iter()
        .map(|context| DiscoveredContext {
            name: prefixed_name(&prefix, &context),
            context,
            key: key.to_string(),
            tags: tags.clone(),
            store: store.clone(),
            preview: preview.clone(),
        })
        .collect())
}

fn error_event(store: &Arc<dyn Store>, message: String) -> SearchEvent {
    SearchEvent::Error {
        store_id: store.id().to_string(),
        message,
    }
}

/// Drain a search, returning every context and every error message
pub async fn collect(mut handle: SearchHandle) -> (Vec<Arc<DiscoveredContext>>, Vec<String>) {
    let mut contexts = Vec::new();
    let mut errors = Vec::new();
    while let Some(event) = handle.next().await {
        match event {
            SearchEvent::Context(context) => contexts.push(context),
            SearchEvent::Error { store_id, message } => {
                errors.push(format!("{}: {}", store_id, message))
            }
        }
    }
    (contexts, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{FilesystemStore, MockEntry, MockStore};
    use async_trait::async_trait;
    use kubeswitch_core::{StoreConfig, StoreKind};
    use tempfile::TempDir;

    pub(crate) fn kubeconfig(contexts: &[&str]) -> String {
        let mut doc = String::from("apiVersion: v1\nkind: Config\nclusters:\n- name: c\n  cluster:\n    server: https://k8s.example.com\nusers:\n- name: u\n  user:\n    token: secret\ncontexts:\n");
        for context in contexts {
            doc.push_str(&format!(
                "- name: {}\n  context:\n    cluster: c\n    user: u\n",
                context
            ));
        }
        doc
    }

    fn session(tmp: &TempDir, ttl: Option<Duration>) -> SearchSession {
        SearchSession {
            paths: StatePaths::new(tmp.path(), None),
            default_ttl: ttl,
            no_index: false,
            timeout: Duration::from_secs(10),
            cancel: CancellationToken::new(),
        }
    }

    fn names(contexts: &[Arc<DiscoveredContext>]) -> Vec<String> {
        let mut names: Vec<String> = contexts.iter().map(|c| c.name.clone()).collect();
        names.sort();
        names
    }

    fn mock() -> MockStore {
        MockStore::new(
            "mock",
            vec![
                MockEntry::new("a", kubeconfig(&["ctx-a"])),
                MockEntry::new("b", kubeconfig(&["ctx-b", "ctx-c"])),
            ],
        )
    }

    #[tokio::test]
    async fn test_live_search_emits_one_event_per_context() {
        let tmp = TempDir::new().unwrap();
        let store = mock();
        let handle = search(vec![Arc::new(store.clone())], session(&tmp, None))
            .await
            .unwrap();
        let (contexts, errors) = collect(handle).await;

        assert!(errors.is_empty());
        assert_eq!(names(&contexts), vec!["a/ctx-a", "b/ctx-b", "b/ctx-c"]);
        let b = contexts.iter().find(|c| c.name == "b/ctx-c").unwrap();
        assert_eq!(b.context, "ctx-c");
        assert_eq!(b.key, "b");
        assert!(b.preview.as_deref().unwrap().contains("REDACTED"));

        let counts = store.operation_counts();
        assert_eq!(counts.verifies, 1);
        assert_eq!(counts.searches, 1);
        assert_eq!(counts.fetches, 2);
    }

    #[tokio::test]
    async fn test_index_round_trip_skips_discovery() {
        let tmp = TempDir::new().unwrap();
        let ttl = Some(Duration::from_secs(3600));

        let first_store = mock();
        let handle = search(vec![Arc::new(first_store.clone())], session(&tmp, ttl))
            .await
            .unwrap();
        let (first, _) = collect(handle).await;
        assert_eq!(first_store.operation_counts().searches, 1);

        let second_store = mock();
        let handle = search(vec![Arc::new(second_store.clone())], session(&tmp, ttl))
            .await
            .unwrap();
        let (second, _) = collect(handle).await;

        assert_eq!(names(&first), names(&second));
        assert_eq!(second_store.operation_counts().searches, 0);
        assert_eq!(second_store.operation_counts().fetches, 0);

        let replayed = second.iter().find(|c| c.name == "b/ctx-b").unwrap();
        assert_eq!(replayed.context, "ctx-b");
        assert_eq!(replayed.key, "b");
    }

    #[tokio::test]
    async fn test_no_index_forces_live_search() {
        let tmp = TempDir::new().unwrap();
        let ttl = Some(Duration::from_secs(3600));
        collect(search(vec![Arc::new(mock())], session(&tmp, ttl)).await.unwrap()).await;

        let store = mock();
        let mut forced = session(&tmp, ttl);
        forced.no_index = true;
        collect(search(vec![Arc::new(store.clone())], forced).await.unwrap()).await;
        assert_eq!(store.operation_counts().searches, 1);
    }

    #[tokio::test]
    async fn test_index_matches_emitted_contexts() {
        let tmp = TempDir::new().unwrap();
        let store = mock();
        let (contexts, _) = collect(
            search(vec![Arc::new(store.clone())], session(&tmp, None))
                .await
                .unwrap(),
        )
        .await;

        let index = SearchIndex::new(
            &StatePaths::new(tmp.path(), None),
            "filesystem.mock",
            StoreKind::Filesystem,
        );
        let stored = index.read().unwrap();
        assert_eq!(stored.keys().cloned().collect::<Vec<_>>(), names(&contexts));
        assert_eq!(stored["a/ctx-a"].key, "a");
    }

    #[tokio::test]
    async fn test_duplicate_keys_are_fetched_once() {
        let tmp = TempDir::new().unwrap();
        let store = MockStore::new(
            "dup",
            vec![
                MockEntry::new("a", kubeconfig(&["ctx"])),
                MockEntry::new("a", kubeconfig(&["ctx"])),
            ],
        );
        let (contexts, _) = collect(
            search(vec![Arc::new(store.clone())], session(&tmp, None))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(contexts.len(), 1);
        assert_eq!(store.operation_counts().fetches, 1);
    }

    #[tokio::test]
    async fn test_entry_errors_do_not_block_the_index() {
        let tmp = TempDir::new().unwrap();
        let store = MockStore::new(
            "err",
            vec![
                MockEntry::new("good", kubeconfig(&["ok"])),
                MockEntry::new("bad", "- not a mapping"),
            ],
        )
        .with_errors(vec!["backend unavailable".to_string()])
        .with_unreadable(vec!["locked".to_string()]);

        let (contexts, errors) = collect(
            search(vec![Arc::new(store)], session(&tmp, None))
                .await
                .unwrap(),
        )
        .await;

        assert_eq!(names(&contexts), vec!["good/ok"]);
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().all(|e| e.starts_with("filesystem.err: ")));

        let index = SearchIndex::new(
            &StatePaths::new(tmp.path(), None),
            "filesystem.err",
            StoreKind::Filesystem,
        );
        let stored = index.read().unwrap();
        assert_eq!(stored.keys().cloned().collect::<Vec<_>>(), vec!["good/ok"]);
    }

    #[tokio::test]
    async fn test_unreadable_entry_still_allows_index_replay() {
        let tmp = TempDir::new().unwrap();
        let ttl = Some(Duration::from_secs(3600));
        let store = || {
            MockStore::new("err", vec![MockEntry::new("good", kubeconfig(&["ok"]))])
                .with_unreadable(vec!["locked".to_string()])
        };

        let first = store();
        collect(search(vec![Arc::new(first.clone())], session(&tmp, ttl)).await.unwrap()).await;
        assert_eq!(first.operation_counts().searches, 1);

        for _ in 0..2 {
            let replay = store();
            let (contexts, errors) =
                collect(search(vec![Arc::new(replay.clone())], session(&tmp, ttl)).await.unwrap())
                    .await;
            assert_eq!(names(&contexts), vec!["good/ok"]);
            assert!(errors.is_empty());
            assert_eq!(replay.operation_counts().searches, 0);
        }
    }

    #[tokio::test]
    async fn test_failed_store_keeps_previous_index() {
        let tmp = TempDir::new().unwrap();
        collect(search(vec![Arc::new(mock())], session(&tmp, None)).await.unwrap()).await;

        let broken = MockStore::new("mock", Vec::new())
            .with_errors(vec!["backend unavailable".to_string()]);
        let (contexts, errors) =
            collect(search(vec![Arc::new(broken)], session(&tmp, None)).await.unwrap()).await;
        assert!(contexts.is_empty());
        assert_eq!(errors.len(), 1);

        let index = SearchIndex::new(
            &StatePaths::new(tmp.path(), None),
            "filesystem.mock",
            StoreKind::Filesystem,
        );
        assert_eq!(index.read().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_verify_failure_aborts() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("missing").to_string_lossy().into_owned();
        let store =
            FilesystemStore::new(StoreConfig::filesystem(vec![missing]), "config").unwrap();

        let result = search(vec![Arc::new(store), Arc::new(mock())], session(&tmp, None)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_cancel_closes_channel_once_after_all_stores() {
        let tmp = TempDir::new().unwrap();
        let hanging = mock().hanging();
        let other = MockStore::new("other", vec![MockEntry::new("x", kubeconfig(&["x"]))]);
        let mut handle = search(
            vec![Arc::new(hanging), Arc::new(other)],
            session(&tmp, None),
        )
        .await
        .unwrap();

        let mut received = 0;
        while received < 4 {
            if let Some(SearchEvent::Context(_)) = handle.next().await {
                received += 1;
            }
        }
        handle.cancel();

        // the hanging store finishes on cancellation, then the channel closes
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            while handle.next().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok());
        assert!(handle.next().await.is_none());
        assert!(!handle.timed_out());
        assert!(
            !StatePaths::new(tmp.path(), None)
                .index_file("filesystem.mock")
                .exists()
        );
    }

    #[tokio::test]
    async fn test_timeout_cancels_search() {
        let tmp = TempDir::new().unwrap();
        let mut session = session(&tmp, None);
        session.timeout = Duration::from_millis(300);

        let handle = search(vec![Arc::new(mock().hanging())], session)
            .await
            .unwrap();
        let timed_out = handle.timed_out.clone();
        let (contexts, _) = collect(handle).await;

        assert_eq!(contexts.len(), 3);
        assert!(timed_out.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_timeout_interrupts_slow_fetch() {
        let tmp = TempDir::new().unwrap();
        let mut session = session(&tmp, None);
        session.timeout = Duration::from_millis(200);

        let slow = mock().with_fetch_delay(Duration::from_secs(60));
        let handle = search(vec![Arc::new(slow)], session).await.unwrap();
        let timed_out = handle.timed_out.clone();

        let drained = tokio::time::timeout(Duration::from_secs(5), collect(handle)).await;
        let (contexts, _) = drained.expect("search outlived its deadline");
        assert!(contexts.is_empty());
        assert!(timed_out.load(Ordering::SeqCst));
    }

    struct PanickingStore {
        config: StoreConfig,
    }

    #[async_trait]
    impl Store for PanickingStore {
        fn id(&self) -> &str {
            "filesystem.panic"
        }

        fn kind(&self) -> StoreKind {
            StoreKind::Filesystem
        }

        fn config(&self) -> &StoreConfig {
            &self.config
        }

        async fn prefix(&self, _key: &str) -> Result<String> {
            Ok(String::new())
        }

        async fn start_search(&self, _out: mpsc::Sender<SearchResult>, _cancel: CancellationToken) {
            panic!("backend bug");
        }

        async fn fetch(&self, _key: &str, _tags: &Tags) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_panicking_store_is_isolated() {
        let tmp = TempDir::new().unwrap();
        let panicking = PanickingStore {
            config: StoreConfig::filesystem(vec!["x".to_string()]),
        };
        let (contexts, errors) = collect(
            search(
                vec![Arc::new(panicking), Arc::new(mock())],
                session(&tmp, None),
            )
            .await
            .unwrap(),
        )
        .await;

        assert_eq!(contexts.len(), 3);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("filesystem.panic: "));
    }
}
