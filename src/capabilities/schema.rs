//! 计划格式的 JSON Schema（schemars 自动生成）
//!
//! 拼入规划 prompt，让模型看到合法 Plan 的确切结构，减少格式错误。

use schemars::schema_for;

use crate::planning::Plan;

/// 返回 Plan 的 JSON Schema 字符串
pub fn plan_schema_json() -> String {
    let schema = schema_for!(Plan);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
