//! Per-query options.

use std::sync::Arc;
use std::time::Duration;

type Select<T, TData> = Arc<dyn Fn(&T) -> TData + Send + Sync>;

/// Default time an idle entry is kept.
pub const DEFAULT_GC_TIME: Duration = Duration::from_secs(5 * 60);

/// Options recognised by [`QueryClient::query`](super::QueryClient::query).
///
/// `T` is the type the fetch function produces and the cache stores; `TData`
/// is what callers receive after `select`.
pub struct QueryOptions<T, TData = T> {
    /// When false the query never fetches and only reports cached state.
    pub enabled: bool,
    /// How long a successful result is served without refetching.
    pub stale_time: Duration,
    /// Extra attempts after a failed fetch. Cancelled fetches are not retried.
    pub retry: u32,
    /// How long an idle entry stays cached before it is collected.
    pub gc_time: Duration,
    select: Select<T, TData>,
}

impl<T: Clone + 'static> Default for QueryOptions<T, T> {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_time: Duration::ZERO,
            retry: 0,
            gc_time: DEFAULT_GC_TIME,
            select: Arc::new(T::clone),
        }
    }
}

impl<T: Clone + 'static> QueryOptions<T, T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T, TData> QueryOptions<T, TData> {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = gc_time;
        self
    }

    /// Replaces the result transform, changing the shape callers receive.
    pub fn select<U, F>(self, select: F) -> QueryOptions<T, U>
    where
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        QueryOptions {
            enabled: self.enabled,
            stale_time: self.stale_time,
            retry: self.retry,
            gc_time: self.gc_time,
            select: Arc::new(select),
        }
    }

    /// Applies the result transform.
    pub fn apply_select(&self, data: &T) -> TData {
        (self.select)(data)
    }
}

impl<T, TData> Clone for QueryOptions<T, TData> {
    fn clone(&self) -> Self {
        Self {
            enabled: self.enabled,
            stale_time: self.stale_time,
            retry: self.retry,
            gc_time: self.gc_time,
            select: Arc::clone(&self.select),
        }
    }
}

impl<T, TData> std::fmt::Debug for QueryOptions<T, TData> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOptions")
            .field("enabled", &self.enabled)
            .field("stale_time", &self.stale_time)
            .field("retry", &self.retry)
            .field("gc_time", &self.gc_time)
            .finish_non_exhaustive()
    }
}
