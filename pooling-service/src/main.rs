//! 项目连接池配置服务
//!
//! 从管理平台获取项目的连接池（Supavisor）配置，提供以下功能：
//! - 主库连接池配置查询
//! - 连接池配置摘要
//! - 取消进行中的平台请求
//! - 按项目缓存查询结果，合并并发的相同请求

mod handlers;
mod keys;
mod routes;
mod service;
mod state;

use anyhow::Context;
use axum::{middleware, routing::get, Json, Router};
use common::config::AppConfig;
use common::middleware::request_id_middleware;
use state::AppState;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

pub(crate) const SERVICE_NAME: &str = "pooling-service";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "连接池配置服务 API",
        version = "0.1.0",
        description = "项目连接池配置查询微服务"
    ),
    paths(
        handlers::get_pooling_configuration,
        handlers::get_pooling_summary,
        handlers::cancel_pooling_fetch,
        handlers::health_check,
    ),
    components(schemas(
        common::models::PoolingConfiguration,
        service::PoolingSummary,
        handlers::HealthResponse,
    )),
    tags(
        (name = "pooling", description = "连接池配置端点"),
        (name = "health", description = "健康检查端点")
    )
)]
struct ApiDoc;

fn main() -> anyhow::Result<()> {
    // 在启动运行时线程之前加载 .env，已存在的环境变量优先
    dotenvy::dotenv().ok();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("创建运行时失败")?
        .block_on(run())
}

async fn run() -> anyhow::Result<()> {
    // 初始化日志追踪
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // 加载配置
    let config = AppConfig::load_with_service(SERVICE_NAME);

    // 创建应用状态
    let state = AppState::new(config.clone())?;

    // 创建路由
    let app = create_router(state);

    // 启动服务
    let addr = config.bind_addr();
    info!(
        service = SERVICE_NAME,
        address = %addr,
        platform_api = %config.platform_api_url,
        "启动服务"
    );

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("绑定地址失败: {addr}"))?;
    axum::serve(listener, app).await.context("服务启动失败")?;
    Ok(())
}

fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::router())
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
