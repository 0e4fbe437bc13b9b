//! tabular-totals：对上传表格求和并找出最佳行
//!
//! 数值列优先取 details 中点名的数值列，否则取第一个整列为数值的列；
//! 标签列优先取 details 中点名的文本列，否则取第一个文本列，表格没有文本列时以行号为标签。

use async_trait::async_trait;
use serde_json::json;

use crate::capabilities::{Capability, CapabilityId, RequestContext};
use crate::core::CapabilityError;
use crate::data::{parse_number, Table};
use crate::planning::{CapabilityOutput, CapabilityResult};

const CONFIDENCE: f64 = 0.95;

/// 汇总结果
#[derive(Debug, Clone, PartialEq)]
pub struct Totals {
    pub metric: String,
    pub total: f64,
    pub best: String,
    pub average: f64,
    pub count: usize,
}

/// 计算 details 指定（或自动选择）数值列的总和与最大值所在行
pub fn compute_totals(table: &Table, details: &str) -> Result<Totals, CapabilityError> {
    if table.is_empty() {
        return Err(CapabilityError::InvalidInput("table has no rows".to_string()));
    }

    let width = table.headers().len();
    let mut columns: Vec<Option<Vec<f64>>> = (0..width).map(|i| table.numeric_column(i)).collect();
    let numeric: Vec<bool> = columns.iter().map(Option::is_some).collect();
    let details_lower = details.to_lowercase();
    let named: Vec<usize> = (0..width)
        .filter(|&i| details_lower.contains(&table.headers()[i].to_lowercase()))
        .collect();

    // 标签列：details 点名的文本列优先，其次第一个文本列；全为数值列时用行号
    let label_idx = named
        .iter()
        .copied()
        .find(|&i| !numeric[i])
        .or_else(|| (0..width).find(|&i| !numeric[i]));

    let value_idx = match named.iter().copied().find(|&i| numeric[i]) {
        Some(i) => i,
        None => match (0..width).find(|&i| numeric[i]) {
            Some(i) => i,
            None => return Err(no_numeric_column(table, &named)),
        },
    };
    let metric = table.headers()[value_idx].clone();

    let values = columns.swap_remove(value_idx).unwrap_or_default();

    // 并列最大值取第一个
    let best_row = values
        .iter()
        .enumerate()
        .fold(0, |best, (i, v)| if *v > values[best] { i } else { best });
    let total: f64 = values.iter().sum();
    let best = match label_idx {
        Some(i) => table.column(i)[best_row].to_string(),
        None => format!("row {}", best_row + 1),
    };

    Ok(Totals {
        best,
        average: total / values.len() as f64,
        count: values.len(),
        metric,
        total,
    })
}

/// 没有整列为数值的列：若 details 点名了某列，指出其第一个非数值单元格
fn no_numeric_column(table: &Table, named: &[usize]) -> CapabilityError {
    for &i in named {
        let bad = table
            .column(i)
            .into_iter()
            .enumerate()
            .find(|(_, cell)| parse_number(cell).is_none());
        if let Some((row, cell)) = bad {
            return CapabilityError::InvalidInput(format!(
                "column '{}' row {} is not a number: '{}'",
                table.headers()[i],
                row + 1,
                cell
            ));
        }
    }
    CapabilityError::InvalidInput("no numeric column found".to_string())
}

/// 表格汇总能力
#[derive(Debug, Default)]
pub struct TabularTotals;

#[async_trait]
impl Capability for TabularTotals {
    fn id(&self) -> CapabilityId {
        CapabilityId::TabularTotals
    }

    async fn execute(
        &self,
        details: &str,
        ctx: &RequestContext,
    ) -> Result<CapabilityOutput, CapabilityError> {
        let table = ctx.require_table()?;
        let totals = compute_totals(table, details)?;
        let reasoning = format!(
            "Summed {} values of column '{}' (average {:.2}); the highest value is in row '{}'.",
            totals.count, totals.metric, totals.average, totals.best
        );
        Ok(CapabilityResult::new(
            json!({"total": totals.total, "best": totals.best}),
            reasoning,
            CONFIDENCE,
        )
        .into())
    }
}
