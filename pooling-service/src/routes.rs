//! 路由模块

use axum::{
    routing::{delete, get},
    Router,
};

use crate::handlers;
use crate::state::AppState;

/// 创建连接池配置路由
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/projects/{ref}/pooling-configuration",
            get(handlers::get_pooling_configuration),
        )
        .route(
            "/api/projects/{ref}/pooling-configuration/fetch",
            delete(handlers::cancel_pooling_fetch),
        )
        .route(
            "/api/projects/{ref}/pooling-configuration/summary",
            get(handlers::get_pooling_summary),
        )
        .route("/api/health", get(handlers::health_check))
}
