//! Shared building blocks for the pooling configuration workspace.
//!
//! - `config`: environment-driven service configuration
//! - `errors`: service-boundary error type rendered as JSON responses
//! - `fetchers`: management API transport with path templating and cancellation
//! - `query`: keyed query cache with deduplication and staleness tracking
//! - `models`: wire models returned by the management API
//! - `middleware`, `response`: axum plumbing shared by every service

pub mod config;
pub mod errors;
pub mod fetchers;
pub mod middleware;
pub mod models;
pub mod query;
pub mod response;
