//! 连接池配置服务模块
//!
//! - `get_pooling_configuration`：请求管理平台并选出主库的连接池配置
//! - `PoolingConfigurationQuery`：以项目 ref 为缓存键的查询入口
//! - `PoolingService`：供 HTTP 处理器使用的服务实现

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use common::errors::{AppError, AppResult};
use common::fetchers::{self, Fetcher, PathParams, ResponseError, ResponseErrorKind};
use common::models::PoolingConfiguration;
use common::query::{QueryClient, QueryOptions, QueryResult, DEFAULT_GC_TIME};

use crate::keys;

/// 管理平台上的连接池配置路径
pub const POOLING_CONFIGURATION_PATH: &str = "/platform/projects/{ref}/config/supavisor";

/// 查询参数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolingConfigurationVariables {
    pub project_ref: Option<String>,
}

impl PoolingConfigurationVariables {
    pub fn new(project_ref: impl Into<String>) -> Self {
        Self {
            project_ref: Some(project_ref.into()),
        }
    }
}

/// 获取连接池配置的错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoolingConfigurationError {
    /// 未提供项目 ref，未发出任何请求
    #[error("Project ref is required")]
    MissingProjectRef,

    /// 管理平台请求失败，原样透传
    #[error(transparent)]
    Response(#[from] ResponseError),

    /// 响应中没有主库记录
    #[error("Unable to find Supavisor config for primary database")]
    PrimaryNotFound,
}

impl From<PoolingConfigurationError> for AppError {
    fn from(err: PoolingConfigurationError) -> Self {
        let message = err.to_string();
        match err {
            PoolingConfigurationError::MissingProjectRef => AppError::Validation(message),
            PoolingConfigurationError::PrimaryNotFound => AppError::NotFound(message),
            PoolingConfigurationError::Response(e) => match e.kind {
                ResponseErrorKind::Transport => AppError::ExternalService(e.message),
                _ => AppError::Upstream {
                    status: e.code,
                    message: e.message,
                },
            },
        }
    }
}

/// 获取项目主库的连接池配置
///
/// 项目 ref 为空时直接失败；平台返回的多条记录中取第一条 `PRIMARY`，
/// 只读副本等其他记录被忽略。
pub async fn get_pooling_configuration(
    fetcher: &dyn Fetcher,
    variables: &PoolingConfigurationVariables,
    signal: Option<&CancellationToken>,
) -> Result<PoolingConfiguration, PoolingConfigurationError> {
    let project_ref = variables
        .project_ref
        .as_deref()
        .filter(|r| !r.is_empty())
        .ok_or(PoolingConfigurationError::MissingProjectRef)?;

    let signal = signal.cloned().unwrap_or_else(CancellationToken::new);
    let params = PathParams::new().path("ref", project_ref);

    let configs: Vec<PoolingConfiguration> =
        fetchers::get_json(fetcher, POOLING_CONFIGURATION_PATH, &params, &signal).await?;
    tracing::debug!(project_ref = %project_ref, records = configs.len(), "连接池配置已获取");

    // 暂不处理只读副本
    configs
        .into_iter()
        .find(PoolingConfiguration::is_primary)
        .ok_or(PoolingConfigurationError::PrimaryNotFound)
}

pub type PoolingConfigurationQueryClient =
    QueryClient<PoolingConfiguration, PoolingConfigurationError>;

/// 带缓存的连接池配置查询
#[derive(Clone)]
pub struct PoolingConfigurationQuery {
    fetcher: Arc<dyn Fetcher>,
    client: Arc<PoolingConfigurationQueryClient>,
}

impl PoolingConfigurationQuery {
    pub fn new(fetcher: Arc<dyn Fetcher>, client: Arc<PoolingConfigurationQueryClient>) -> Self {
        Self { fetcher, client }
    }

    /// 执行查询
    ///
    /// 未提供项目 ref 或 `options.enabled` 为 false 时不发起请求。
    pub async fn query<TData>(
        &self,
        variables: &PoolingConfigurationVariables,
        options: QueryOptions<PoolingConfiguration, TData>,
    ) -> QueryResult<TData, PoolingConfigurationError> {
        let key = keys::pooling_configuration(variables.project_ref.as_deref());
        let enabled = options.enabled && variables.project_ref.is_some();
        let options = options.enabled(enabled);
        let fetcher = self.fetcher.as_ref();

        self.client
            .query(key, &options, move |signal| async move {
                get_pooling_configuration(fetcher, variables, Some(&signal)).await
            })
            .await
    }

    /// 取消该项目正在进行的请求
    pub async fn cancel(&self, variables: &PoolingConfigurationVariables) -> bool {
        let key = keys::pooling_configuration(variables.project_ref.as_deref());
        self.client.cancel(&key).await
    }
}

/// 连接池配置摘要
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PoolingSummary {
    /// 连接池模式（transaction / session）
    pub pool_mode: Option<String>,
    /// 默认连接池大小
    pub default_pool_size: Option<u64>,
    /// 最大客户端连接数
    pub max_client_conn: Option<u64>,
    /// 连接串
    pub connection_string: Option<String>,
}

impl From<&PoolingConfiguration> for PoolingSummary {
    fn from(config: &PoolingConfiguration) -> Self {
        Self {
            pool_mode: config.pool_mode().map(str::to_string),
            default_pool_size: config.default_pool_size(),
            max_client_conn: config.max_client_conn(),
            connection_string: config.connection_string().map(str::to_string),
        }
    }
}

/// 连接池配置服务 Trait
#[async_trait]
pub trait PoolingServiceTrait: Send + Sync {
    /// 获取主库连接池配置
    async fn get(&self, project_ref: &str) -> AppResult<PoolingConfiguration>;

    /// 获取主库连接池配置摘要
    async fn summary(&self, project_ref: &str) -> AppResult<PoolingSummary>;
}

/// 连接池配置服务
pub struct PoolingService {
    query: PoolingConfigurationQuery,
    stale_time: Duration,
    retry: u32,
    gc_time: Duration,
}

impl PoolingService {
    /// 创建新的服务实例
    pub fn new(query: PoolingConfigurationQuery, stale_time: Duration, retry: u32) -> Self {
        Self {
            query,
            stale_time,
            retry,
            gc_time: DEFAULT_GC_TIME,
        }
    }

    /// 设置缓存条目的空闲回收时间
    pub fn with_gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = gc_time;
        self
    }

    fn options(&self) -> QueryOptions<PoolingConfiguration> {
        QueryOptions::new()
            .stale_time(self.stale_time)
            .retry(self.retry)
            .gc_time(self.gc_time)
    }

    async fn resolve<TData: Send>(
        &self,
        project_ref: &str,
        options: QueryOptions<PoolingConfiguration, TData>,
    ) -> AppResult<TData> {
        let variables = PoolingConfigurationVariables::new(project_ref);
        let result = self.query.query(&variables, options).await;

        if let Some(err) = result.error {
            tracing::warn!(project_ref = %project_ref, error = %err, "获取连接池配置失败");
            return Err(err.into());
        }
        result
            .data
            .ok_or_else(|| AppError::Internal("query finished without data".into()))
    }
}

#[async_trait]
impl PoolingServiceTrait for PoolingService {
    async fn get(&self, project_ref: &str) -> AppResult<PoolingConfiguration> {
        self.resolve(project_ref, self.options()).await
    }

    async fn summary(&self, project_ref: &str) -> AppResult<PoolingSummary> {
        let options = self.options().select(|c: &PoolingConfiguration| PoolingSummary::from(c));
        self.resolve(project_ref, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// 记录调用次数并返回预设响应的 Fetcher
    struct MockFetcher {
        response: Result<Value, ResponseError>,
        calls: AtomicUsize,
        paths: Mutex<Vec<String>>,
    }

    impl MockFetcher {
        fn ok(body: Value) -> Self {
            Self {
                response: Ok(body),
                calls: AtomicUsize::new(0),
                paths: Mutex::new(Vec::new()),
            }
        }

        fn err(error: ResponseError) -> Self {
            Self {
                response: Err(error),
                calls: AtomicUsize::new(0),
                paths: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for MockFetcher {
        async fn get(
            &self,
            path: &str,
            params: &PathParams,
            _signal: &CancellationToken,
        ) -> Result<Value, ResponseError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.paths.lock().unwrap().push(params.render(path)?);
            self.response.clone()
        }
    }

    fn primary() -> Value {
        json!({
            "database_type": "PRIMARY",
            "identifier": "proj-123",
            "pool_mode": "transaction",
            "default_pool_size": 15,
            "max_client_conn": 200,
            "connection_string": "postgresql://postgres.proj-123@pooler:6543/postgres"
        })
    }

    fn replica() -> Value {
        json!({
            "database_type": "READ_REPLICA",
            "identifier": "proj-123-rr",
            "pool_mode": "session",
            "default_pool_size": 5
        })
    }

    fn query_for(fetcher: Arc<MockFetcher>) -> PoolingConfigurationQuery {
        PoolingConfigurationQuery::new(fetcher, Arc::new(PoolingConfigurationQueryClient::new()))
    }

    #[tokio::test]
    async fn test_missing_project_ref_fails_without_request() {
        let fetcher = MockFetcher::ok(json!([primary()]));

        let err = get_pooling_configuration(&fetcher, &PoolingConfigurationVariables::default(), None)
            .await
            .unwrap_err();

        assert_eq!(err, PoolingConfigurationError::MissingProjectRef);
        assert_eq!(err.to_string(), "Project ref is required");
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_project_ref_fails_without_request() {
        let fetcher = MockFetcher::ok(json!([primary()]));

        let err = get_pooling_configuration(&fetcher, &PoolingConfigurationVariables::new(""), None)
            .await
            .unwrap_err();

        assert_eq!(err, PoolingConfigurationError::MissingProjectRef);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_single_primary_is_returned_unchanged() {
        let fetcher = MockFetcher::ok(json!([primary()]));

        let config =
            get_pooling_configuration(&fetcher, &PoolingConfigurationVariables::new("proj-123"), None)
                .await
                .unwrap();

        assert_eq!(serde_json::to_value(&config).unwrap(), primary());
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(
            fetcher.paths.lock().unwrap().clone(),
            vec!["/platform/projects/proj-123/config/supavisor".to_string()]
        );
    }

    #[tokio::test]
    async fn test_primary_is_selected_over_replicas() {
        let fetcher = MockFetcher::ok(json!([
            { "database_type": "READ_REPLICA", "pool_size": 5 },
            { "database_type": "PRIMARY", "pool_size": 15 }
        ]));

        let config =
            get_pooling_configuration(&fetcher, &PoolingConfigurationVariables::new("proj-123"), None)
                .await
                .unwrap();

        assert_eq!(
            serde_json::to_value(&config).unwrap(),
            json!({ "database_type": "PRIMARY", "pool_size": 15 })
        );
    }

    #[tokio::test]
    async fn test_first_primary_wins() {
        let fetcher = MockFetcher::ok(json!([
            { "database_type": "PRIMARY", "identifier": "first" },
            { "database_type": "PRIMARY", "identifier": "second" }
        ]));

        let config =
            get_pooling_configuration(&fetcher, &PoolingConfigurationVariables::new("proj-123"), None)
                .await
                .unwrap();

        assert_eq!(config.attribute("identifier"), Some(&json!("first")));
    }

    #[tokio::test]
    async fn test_no_primary_fails() {
        let fetcher = MockFetcher::ok(json!([replica()]));

        let err =
            get_pooling_configuration(&fetcher, &PoolingConfigurationVariables::new("proj-123"), None)
                .await
                .unwrap_err();

        assert_eq!(err, PoolingConfigurationError::PrimaryNotFound);
        assert_eq!(
            err.to_string(),
            "Unable to find Supavisor config for primary database"
        );
    }

    #[tokio::test]
    async fn test_empty_response_fails() {
        let fetcher = MockFetcher::ok(json!([]));

        let err =
            get_pooling_configuration(&fetcher, &PoolingConfigurationVariables::new("proj-123"), None)
                .await
                .unwrap_err();

        assert_eq!(err, PoolingConfigurationError::PrimaryNotFound);
    }

    #[tokio::test]
    async fn test_transport_error_is_propagated_verbatim() {
        let upstream = ResponseError {
            message: "Project not found".into(),
            code: Some(404),
            request_id: Some("req-9".into()),
            retry_after: None,
            kind: ResponseErrorKind::Status,
        };
        let fetcher = MockFetcher::err(upstream.clone());

        let err =
            get_pooling_configuration(&fetcher, &PoolingConfigurationVariables::new("proj-123"), None)
                .await
                .unwrap_err();

        assert_eq!(err, PoolingConfigurationError::Response(upstream));
        assert_eq!(err.to_string(), "Project not found");
    }

    #[tokio::test]
    async fn test_unexpected_body_is_a_response_error() {
        let fetcher = MockFetcher::ok(json!({ "message": "not a list" }));

        let err =
            get_pooling_configuration(&fetcher, &PoolingConfigurationVariables::new("proj-123"), None)
                .await
                .unwrap_err();

        assert!(matches!(err, PoolingConfigurationError::Response(_)));
    }

    #[tokio::test]
    async fn test_query_without_project_ref_is_disabled() {
        let fetcher = Arc::new(MockFetcher::ok(json!([primary()])));
        let query = query_for(fetcher.clone());

        let result = query
            .query(&PoolingConfigurationVariables::default(), QueryOptions::new())
            .await;

        assert!(result.is_pending());
        assert!(result.data.is_none());
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_query_respects_enabled_flag() {
        let fetcher = Arc::new(MockFetcher::ok(json!([primary()])));
        let query = query_for(fetcher.clone());

        let result = query
            .query(
                &PoolingConfigurationVariables::new("proj-123"),
                QueryOptions::new().enabled(false),
            )
            .await;

        assert!(result.data.is_none());
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_query_returns_primary_and_caches_it() {
        let fetcher = Arc::new(MockFetcher::ok(json!([replica(), primary()])));
        let query = query_for(fetcher.clone());
        let variables = PoolingConfigurationVariables::new("proj-123");
        let options = QueryOptions::new().stale_time(Duration::from_secs(60));

        let first = query.query(&variables, options.clone()).await;
        let second = query.query(&variables, options).await;

        assert!(first.is_success());
        assert_eq!(serde_json::to_value(first.data.clone().unwrap()).unwrap(), primary());
        assert_eq!(second.data, first.data);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_query_select_reshapes_result() {
        let fetcher = Arc::new(MockFetcher::ok(json!([primary()])));
        let query = query_for(fetcher);

        let result = query
            .query(
                &PoolingConfigurationVariables::new("proj-123"),
                QueryOptions::new().select(|c: &PoolingConfiguration| c.default_pool_size()),
            )
            .await;

        assert_eq!(result.data, Some(Some(15)));
    }

    #[tokio::test]
    async fn test_query_error_state() {
        let fetcher = Arc::new(MockFetcher::ok(json!([replica()])));
        let query = query_for(fetcher);

        let result = query
            .query(&PoolingConfigurationVariables::new("proj-123"), QueryOptions::new())
            .await;

        assert!(result.is_error());
        assert_eq!(result.error, Some(PoolingConfigurationError::PrimaryNotFound));
    }

    #[tokio::test]
    async fn test_cancel_without_in_flight_request() {
        let fetcher = Arc::new(MockFetcher::ok(json!([primary()])));
        let query = query_for(fetcher);
        assert!(!query.cancel(&PoolingConfigurationVariables::new("proj-123")).await);
    }

    /// 一直等待到请求被取消的 Fetcher
    struct PendingFetcher;

    #[async_trait]
    impl Fetcher for PendingFetcher {
        async fn get(
            &self,
            _path: &str,
            _params: &PathParams,
            signal: &CancellationToken,
        ) -> Result<Value, ResponseError> {
            signal.cancelled().await;
            Err(ResponseError::aborted())
        }
    }

    #[tokio::test]
    async fn test_signal_is_forwarded_to_transport() {
        let signal = CancellationToken::new();
        signal.cancel();

        let err = get_pooling_configuration(
            &PendingFetcher,
            &PoolingConfigurationVariables::new("proj-123"),
            Some(&signal),
        )
        .await
        .unwrap_err();

        assert_eq!(err, PoolingConfigurationError::Response(ResponseError::aborted()));
    }

    #[tokio::test]
    async fn test_cancel_aborts_in_flight_query() {
        let query = PoolingConfigurationQuery::new(
            Arc::new(PendingFetcher),
            Arc::new(PoolingConfigurationQueryClient::new()),
        );
        let variables = PoolingConfigurationVariables::new("proj-123");

        let (result, cancelled) = tokio::join!(
            query.query(&variables, QueryOptions::new()),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                query.cancel(&variables).await
            },
        );

        assert!(cancelled);
        assert!(result.is_error());
        assert_eq!(
            result.error,
            Some(PoolingConfigurationError::Response(ResponseError::aborted()))
        );
    }

    /// 首次请求成功，之后的请求一直等待到被取消
    struct SucceedThenPendingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for SucceedThenPendingFetcher {
        async fn get(
            &self,
            _path: &str,
            _params: &PathParams,
            signal: &CancellationToken,
        ) -> Result<Value, ResponseError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(json!([primary()]));
            }
            signal.cancelled().await;
            Err(ResponseError::aborted())
        }
    }

    #[tokio::test]
    async fn test_cancelled_refetch_keeps_cached_configuration() {
        let fetcher = Arc::new(SucceedThenPendingFetcher {
            calls: AtomicUsize::new(0),
        });
        let query = PoolingConfigurationQuery::new(
            fetcher.clone(),
            Arc::new(PoolingConfigurationQueryClient::new()),
        );
        let variables = PoolingConfigurationVariables::new("proj-123");

        let first = query.query(&variables, QueryOptions::new()).await;
        assert!(first.is_success());

        let (refetch, cancelled) = tokio::join!(
            query.query(&variables, QueryOptions::new()),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                query.cancel(&variables).await
            },
        );
        assert!(cancelled);
        assert!(refetch.is_error());

        // 缓存仍是成功状态，新鲜期内直接返回
        let service = PoolingService::new(query, Duration::from_secs(60), 0);
        let config = service.get("proj-123").await.unwrap();
        assert_eq!(config.attribute("identifier"), Some(&json!("proj-123")));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_service_summary() {
        let fetcher = Arc::new(MockFetcher::ok(json!([replica(), primary()])));
        let service = PoolingService::new(query_for(fetcher), Duration::ZERO, 0);

        let summary = service.summary("proj-123").await.unwrap();

        assert_eq!(summary.pool_mode.as_deref(), Some("transaction"));
        assert_eq!(summary.default_pool_size, Some(15));
        assert_eq!(summary.max_client_conn, Some(200));
    }

    #[tokio::test]
    async fn test_service_maps_errors() {
        let fetcher = Arc::new(MockFetcher::ok(json!([replica()])));
        let service = PoolingService::new(query_for(fetcher), Duration::ZERO, 0);

        let err = service.get("proj-123").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let fetcher = Arc::new(MockFetcher::err(ResponseError::new("forbidden", Some(403))));
        let service = PoolingService::new(query_for(fetcher), Duration::ZERO, 0);

        let err = service.get("proj-123").await.unwrap_err();
        assert!(matches!(err, AppError::Upstream { status: Some(403), .. }));
    }

    #[test]
    fn test_unreachable_platform_maps_to_external_service() {
        let err: AppError = PoolingConfigurationError::Response(ResponseError::transport(
            "Failed to reach platform API: connection refused",
        ))
        .into();

        assert!(matches!(err, AppError::ExternalService(_)));
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_GATEWAY);
        assert_eq!(err.code(), "EXTERNAL_SERVICE_ERROR");

        let aborted: AppError = PoolingConfigurationError::Response(ResponseError::aborted()).into();
        assert!(matches!(aborted, AppError::Upstream { status: None, .. }));
    }

    #[test]
    fn test_missing_ref_maps_to_validation() {
        let err: AppError = PoolingConfigurationError::MissingProjectRef.into();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
