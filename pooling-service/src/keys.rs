//! 查询缓存键

use common::query::QueryKey;
use serde_json::Value;

/// 项目连接池配置的缓存键：`["projects", <ref>, "pooling-configuration"]`
///
/// 未提供项目 ref 时该段为 `null`，对应的查询处于禁用状态。
pub fn pooling_configuration(project_ref: Option<&str>) -> QueryKey {
    QueryKey::new([
        Value::from("projects"),
        Value::from(project_ref),
        Value::from("pooling-configuration"),
    ])
}
