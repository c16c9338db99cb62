//! Query client and cached query state.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

use super::key::QueryKey;
use super::options::{QueryOptions, DEFAULT_GC_TIME};

/// Whether a query has produced data yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// No successful or failed fetch has completed.
    Pending,
    /// The last fetch succeeded.
    Success,
    /// The last fetch failed.
    Error,
}

/// Whether a fetch is running for the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Idle,
    Fetching,
}

/// Snapshot of a query handed back to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<TData, E> {
    /// Last successful data, after `select`. Kept when a later fetch fails.
    pub data: Option<TData>,
    /// Error of the last fetch, if it failed.
    pub error: Option<E>,
    pub status: QueryStatus,
    pub fetch_status: FetchStatus,
    /// True when there is no data or it is older than `stale_time`.
    pub is_stale: bool,
    pub data_updated_at: Option<DateTime<Utc>>,
    /// Failed attempts during the last fetch.
    pub failure_count: u32,
}

impl<TData, E> QueryResult<TData, E> {
    pub fn is_pending(&self) -> bool {
        self.status == QueryStatus::Pending
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    pub fn is_fetching(&self) -> bool {
        self.fetch_status == FetchStatus::Fetching
    }

    /// No data yet and a first fetch is running.
    pub fn is_loading(&self) -> bool {
        self.is_pending() && self.is_fetching()
    }
}

/// Progress of a fetch, published to callers waiting on it.
#[derive(Clone)]
enum FetchState<E> {
    Running,
    Settled,
    /// Cancelled before completing; the entry kept its previous state.
    Cancelled(E),
}

impl<E: Clone> FetchState<E> {
    /// Reports a cancellation to the callers of that fetch.
    fn apply<TData>(&self, mut result: QueryResult<TData, E>) -> QueryResult<TData, E> {
        if let FetchState::Cancelled(error) = self {
            result.error = Some(error.clone());
            result.status = QueryStatus::Error;
        }
        result
    }
}

struct InFlight<E> {
    id: u64,
    cancel: CancellationToken,
    done: watch::Receiver<FetchState<E>>,
}

struct Entry<T, E> {
    data: Option<T>,
    error: Option<E>,
    status: QueryStatus,
    updated_at: Option<(Instant, DateTime<Utc>)>,
    failure_count: u32,
    in_flight: Option<InFlight<E>>,
    touched_at: Instant,
    gc_time: Duration,
}

impl<T, E> Default for Entry<T, E> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            status: QueryStatus::Pending,
            updated_at: None,
            failure_count: 0,
            in_flight: None,
            touched_at: Instant::now(),
            gc_time: DEFAULT_GC_TIME,
        }
    }
}

impl<T, E> Entry<T, E> {
    fn touch(&mut self, gc_time: Duration) {
        self.touched_at = Instant::now();
        self.gc_time = gc_time;
    }

    fn is_collectable(&self) -> bool {
        self.in_flight.is_none() && self.touched_at.elapsed() >= self.gc_time
    }
}

impl<T, E: Clone> Entry<T, E> {
    fn is_stale(&self, stale_time: Duration) -> bool {
        match self.updated_at {
            Some((at, _)) => at.elapsed() >= stale_time,
            None => true,
        }
    }

    fn is_fresh_success(&self, stale_time: Duration) -> bool {
        self.status == QueryStatus::Success && !self.is_stale(stale_time)
    }

    fn record(&mut self, outcome: Result<T, E>, failures: u32) {
        match outcome {
            Ok(data) => {
                self.data = Some(data);
                self.error = None;
                self.status = QueryStatus::Success;
                self.updated_at = Some((Instant::now(), Utc::now()));
                self.failure_count = 0;
            }
            Err(error) => {
                self.error = Some(error);
                self.status = QueryStatus::Error;
                self.failure_count = failures;
            }
        }
    }

    fn to_result<TData>(&self, options: &QueryOptions<T, TData>) -> QueryResult<TData, E> {
        QueryResult {
            data: self.data.as_ref().map(|d| options.apply_select(d)),
            error: self.error.clone(),
            status: self.status,
            fetch_status: if self.in_flight.is_some() {
                FetchStatus::Fetching
            } else {
                FetchStatus::Idle
            },
            is_stale: self.is_stale(options.stale_time),
            data_updated_at: self.updated_at.map(|(_, at)| at),
            failure_count: self.failure_count,
        }
    }
}

/// Cache of query results of one data type.
///
/// At most one fetch runs per key; concurrent callers for the same key wait
/// for it and read the stored outcome. Entries with no fetch running are
/// dropped once they have not been queried for their `gc_time`.
pub struct QueryClient<T, E> {
    entries: RwLock<HashMap<QueryKey, Entry<T, E>>>,
    next_fetch_id: AtomicU64,
}

impl<T, E> Default for QueryClient<T, E> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_fetch_id: AtomicU64::new(1),
        }
    }
}

impl<T, E: Clone> QueryClient<T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a query.
    ///
    /// Disabled queries return the cached snapshot without fetching. Fresh
    /// successful data is served from cache. Otherwise the caller joins the
    /// running fetch for `key` or starts one, passing `fetch` a cancellation
    /// token that [`cancel`](Self::cancel) triggers.
    pub async fn query<TData, F, Fut>(
        &self,
        key: QueryKey,
        options: &QueryOptions<T, TData>,
        fetch: F,
    ) -> QueryResult<TData, E>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !options.enabled {
            tracing::debug!(key = %key, "Query disabled, not fetching");
            return self.snapshot(&key, options).await;
        }

        loop {
            let mut entries = self.entries.write().await;
            collect_garbage(&mut *entries);
            let entry = entries.entry(key.clone()).or_default();
            entry.touch(options.gc_time);

            if let Some(in_flight) = &entry.in_flight {
                let id = in_flight.id;
                let mut done = in_flight.done.clone();
                drop(entries);

                tracing::debug!(key = %key, "Joining in-flight fetch");
                let settled = done
                    .wait_for(|state| !matches!(state, FetchState::Running))
                    .await
                    .map(|state| (*state).clone());
                match settled {
                    Ok(state) => return state.apply(self.snapshot(&key, options).await),
                    Err(_) => {
                        // The fetching caller went away before finishing.
                        self.clear_in_flight(&key, id).await;
                        continue;
                    }
                }
            }

            if entry.is_fresh_success(options.stale_time) {
                tracing::debug!(key = %key, "Serving fresh cached data");
                return entry.to_result(options);
            }

            let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
            let cancel = CancellationToken::new();
            let (done_tx, done_rx) = watch::channel(FetchState::Running);
            entry.in_flight = Some(InFlight {
                id,
                cancel: cancel.clone(),
                done: done_rx,
            });
            drop(entries);

            tracing::debug!(key = %key, "Fetching");
            let (outcome, failures) = run_fetch(&key, options.retry, &cancel, &fetch).await;

            let mut entries = self.entries.write().await;
            let entry = entries.entry(key.clone()).or_default();
            if entry.in_flight.as_ref().map(|f| f.id) == Some(id) {
                entry.in_flight = None;
            }
            entry.touch(options.gc_time);
            let state = match outcome {
                Err(error) if cancel.is_cancelled() => {
                    tracing::debug!(key = %key, "Fetch cancelled, keeping previous state");
                    FetchState::Cancelled(error)
                }
                outcome => {
                    entry.record(outcome, failures);
                    FetchState::Settled
                }
            };
            let result = state.apply(entry.to_result(options));
            drop(entries);

            let _ = done_tx.send(state);
            return result;
        }
    }

    /// Cancels the running fetch for `key`, if any. Returns whether one was running.
    pub async fn cancel(&self, key: &QueryKey) -> bool {
        let entries = self.entries.read().await;
        match entries.get(key).and_then(|e| e.in_flight.as_ref()) {
            Some(in_flight) => {
                tracing::debug!(key = %key, "Cancelling in-flight fetch");
                in_flight.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Current state of `key` without fetching.
    pub async fn snapshot<TData>(
        &self,
        key: &QueryKey,
        options: &QueryOptions<T, TData>,
    ) -> QueryResult<TData, E> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) => entry.to_result(options),
            None => Entry::default().to_result(options),
        }
    }

    /// Drops idle entries whose `gc_time` has passed. Returns how many were removed.
    pub async fn gc(&self) -> usize {
        let removed = collect_garbage(&mut *self.entries.write().await);
        if removed > 0 {
            tracing::debug!(removed, "Collected idle query entries");
        }
        removed
    }

    /// Number of cached entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn clear_in_flight(&self, key: &QueryKey, id: u64) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(key) {
            if entry.in_flight.as_ref().map(|f| f.id) == Some(id) {
                entry.in_flight = None;
            }
        }
    }
}

impl<T: Clone, E> QueryClient<T, E> {
    /// Raw cached data for `key`.
    pub async fn get_query_data(&self, key: &QueryKey) -> Option<T> {
        self.entries
            .read()
            .await
            .get(key)
            .and_then(|e| e.data.clone())
    }
}

fn collect_garbage<T, E>(entries: &mut HashMap<QueryKey, Entry<T, E>>) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_collectable());
    before - entries.len()
}

async fn run_fetch<T, E, F, Fut>(
    key: &QueryKey,
    retry: u32,
    cancel: &CancellationToken,
    fetch: &F,
) -> (Result<T, E>, u32)
where
    F: Fn(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut failures = 0;
    loop {
        match fetch(cancel.clone()).await {
            Ok(data) => return (Ok(data), failures),
            Err(error) => {
                failures += 1;
                if failures > retry || cancel.is_cancelled() {
                    return (Err(error), failures);
                }
                tracing::warn!(key = %key, attempt = failures, "Fetch failed, retrying");
            }
        }
    }
}
