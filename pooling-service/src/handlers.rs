//! Handler模块

use std::time::Instant;

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use validator::Validate;

use common::errors::{AppError, AppResult};
use common::middleware::RequestId;
use common::models::PoolingConfiguration;
use common::response::ApiResponse;
use crate::service::{PoolingConfigurationVariables, PoolingServiceTrait, PoolingSummary};
use crate::state::AppState;
use crate::SERVICE_NAME;

/// 项目 ref 路径参数
#[derive(Debug, Validate)]
pub struct ProjectRefParam {
    #[validate(length(min = 1, max = 64, message = "Project ref must be 1-64 characters"))]
    pub project_ref: String,
}

impl ProjectRefParam {
    fn parse(project_ref: String) -> AppResult<Self> {
        let param = Self { project_ref };
        param
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        Ok(param)
    }
}

/// 获取项目主库的连接池配置
#[utoipa::path(
    get,
    path = "/api/projects/{ref}/pooling-configuration",
    tag = "pooling",
    params(
        ("ref" = String, Path, description = "项目 ref")
    ),
    responses(
        (status = 200, description = "主库连接池配置", body = ApiResponse<PoolingConfiguration>),
        (status = 400, description = "项目 ref 无效"),
        (status = 404, description = "没有主库连接池配置"),
        (status = 502, description = "管理平台请求失败")
    )
)]
pub async fn get_pooling_configuration(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(project_ref): Path<String>,
) -> AppResult<Json<ApiResponse<PoolingConfiguration>>> {
    let start = Instant::now();
    let param = ProjectRefParam::parse(project_ref)?;
    let data = state.pooling_service().get(&param.project_ref).await?;

    Ok(Json(
        ApiResponse::ok_with_service(data, SERVICE_NAME)
            .with_request_id(request_id.as_str())
            .with_duration(start.elapsed().as_millis() as u64),
    ))
}

/// 获取项目主库的连接池配置摘要
#[utoipa::path(
    get,
    path = "/api/projects/{ref}/pooling-configuration/summary",
    tag = "pooling",
    params(
        ("ref" = String, Path, description = "项目 ref")
    ),
    responses(
        (status = 200, description = "连接池配置摘要", body = ApiResponse<PoolingSummary>),
        (status = 400, description = "项目 ref 无效"),
        (status = 404, description = "没有主库连接池配置"),
        (status = 502, description = "管理平台请求失败")
    )
)]
pub async fn get_pooling_summary(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(project_ref): Path<String>,
) -> AppResult<Json<ApiResponse<PoolingSummary>>> {
    let start = Instant::now();
    let param = ProjectRefParam::parse(project_ref)?;
    let data = state.pooling_service().summary(&param.project_ref).await?;

    Ok(Json(
        ApiResponse::ok_with_service(data, SERVICE_NAME)
            .with_request_id(request_id.as_str())
            .with_duration(start.elapsed().as_millis() as u64),
    ))
}

/// 取消该项目正在进行的平台请求
#[utoipa::path(
    delete,
    path = "/api/projects/{ref}/pooling-configuration/fetch",
    tag = "pooling",
    params(
        ("ref" = String, Path, description = "项目 ref")
    ),
    responses(
        (status = 200, description = "是否存在被取消的请求", body = ApiResponse<bool>),
        (status = 400, description = "项目 ref 无效")
    )
)]
pub async fn cancel_pooling_fetch(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(project_ref): Path<String>,
) -> AppResult<Json<ApiResponse<bool>>> {
    let param = ProjectRefParam::parse(project_ref)?;
    let variables = PoolingConfigurationVariables::new(param.project_ref);
    let cancelled = state.pooling_query.cancel(&variables).await;
    tracing::info!(project_ref = ?variables.project_ref, cancelled, "取消连接池配置请求");

    Ok(Json(
        ApiResponse::ok_with_service(cancelled, SERVICE_NAME).with_request_id(request_id.as_str()),
    ))
}

/// 健康检查端点
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "服务运行正常", body = HealthResponse)
    )
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

/// 健康检查响应
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// 服务状态
    pub status: String,
    /// 服务名称
    pub service: String,
    /// 服务版本
    pub version: String,
    /// 当前时间戳
    pub timestamp: DateTime<Utc>,
}
