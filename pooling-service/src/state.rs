//! Application state for pooling service.

use std::sync::Arc;

use anyhow::Context;
use common::config::AppConfig;
use common::fetchers::{Fetcher, HttpFetcher};

use crate::service::{PoolingConfigurationQuery, PoolingConfigurationQueryClient, PoolingService};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub pooling_query: PoolingConfigurationQuery,
}

impl AppState {
    /// Creates a new application state talking to the configured platform API.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let fetcher = HttpFetcher::from_config(&config).context("Failed to create HTTP client")?;
        Ok(Self::with_fetcher(config, Arc::new(fetcher)))
    }

    /// Creates a state over an arbitrary fetcher.
    pub fn with_fetcher(config: AppConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        let client = Arc::new(PoolingConfigurationQueryClient::new());
        Self {
            pooling_query: PoolingConfigurationQuery::new(fetcher, client),
            config,
        }
    }

    /// Builds the service used by handlers.
    pub fn pooling_service(&self) -> PoolingService {
        PoolingService::new(
            self.pooling_query.clone(),
            self.config.query_stale_time(),
            self.config.query_retry,
        )
        .with_gc_time(self.config.query_gc_time())
    }
}
