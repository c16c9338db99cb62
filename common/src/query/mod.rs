//! Keyed query cache.
//!
//! A [`QueryClient`] owns cached results per [`QueryKey`]. Callers describe a
//! query with a key, a fetch function and [`QueryOptions`]; the client decides
//! whether to serve cached data, join an in-flight fetch or start a new one.

pub mod client;
pub mod key;
pub mod options;

pub use client::{FetchStatus, QueryClient, QueryResult, QueryStatus};
pub use key::QueryKey;
pub use options::{QueryOptions, DEFAULT_GC_TIME};
