//! Wire models returned by the management platform API.

pub mod pooling;

pub use pooling::{DatabaseType, PoolingConfiguration};
