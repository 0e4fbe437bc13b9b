//! 表格快照：随问题一起提交的结构化数据
//!
//! 以表头 + 字符串单元格保存，数值列在使用时解析；构造时校验形状（表头非空、每行列数一致）。

use std::io::Read;
use std::path::Path;

use thiserror::Error;

/// 表格形状或加载错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TableError {
    #[error("table has no columns")]
    NoColumns,

    #[error("column {0} has an empty header")]
    EmptyHeader(usize),

    #[error("duplicate column header: {0}")]
    DuplicateHeader(String),

    #[error("row {row} has {found} cells, expected {expected}")]
    RaggedRow {
        row: usize,
        found: usize,
        expected: usize,
    },

    #[error("column '{0}' has {1} values, expected {2}")]
    ColumnLength(String, usize, usize),

    #[error("csv error: {0}")]
    Csv(String),
}

impl From<csv::Error> for TableError {
    fn from(e: csv::Error) -> Self {
        TableError::Csv(e.to_string())
    }
}

/// 表格快照
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, TableError> {
        if headers.is_empty() {
            return Err(TableError::NoColumns);
        }
        for (i, h) in headers.iter().enumerate() {
            if h.trim().is_empty() {
                return Err(TableError::EmptyHeader(i));
            }
            if headers[..i].iter().any(|prev| prev == h) {
                return Err(TableError::DuplicateHeader(h.clone()));
            }
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != headers.len() {
                return Err(TableError::RaggedRow {
                    row: i + 1,
                    found: row.len(),
                    expected: headers.len(),
                });
            }
        }
        Ok(Self { headers, rows })
    }

    /// 按列构造，如 `[("quarter", ["Q1", "Q2"]), ("revenue", ["10", "20"])]`
    pub fn from_columns<N, V>(columns: Vec<(N, Vec<V>)>) -> Result<Self, TableError>
    where
        N: Into<String>,
        V: ToString,
    {
        let columns: Vec<(String, Vec<String>)> = columns
            .into_iter()
            .map(|(name, values)| (name.into(), values.iter().map(|v| v.to_string()).collect()))
            .collect();
        let height = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        for (name, values) in &columns {
            if values.len() != height {
                return Err(TableError::ColumnLength(name.clone(), values.len(), height));
            }
        }
        let headers = columns.iter().map(|(name, _)| name.clone()).collect();
        let rows = (0..height)
            .map(|r| columns.iter().map(|(_, values)| values[r].clone()).collect())
            .collect();
        Self::new(headers, rows)
    }

    /// 从 CSV 读取（首行为表头）
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);
        let headers = rdr.headers()?.iter().map(String::from).collect();
        let mut rows = Vec::new();
        for record in rdr.records() {
            rows.push(record?.iter().map(String::from).collect());
        }
        Self::new(headers, rows)
    }

    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let file = std::fs::File::open(path.as_ref())
            .map_err(|e| TableError::Csv(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_csv_reader(file)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 列下标（表头大小写不敏感）
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name.trim()))
    }

    pub fn column(&self, index: usize) -> Vec<&str> {
        self.rows.iter().map(|row| row[index].as_str()).collect()
    }

    /// 整列都能解析为数值时返回 Some
    pub fn numeric_column(&self, index: usize) -> Option<Vec<f64>> {
        self.rows
            .iter()
            .map(|row| parse_number(&row[index]))
            .collect()
    }

    /// 渲染为 CSV 文本，最多 max_rows 行数据；超出部分以一行说明代替
    pub fn to_csv_preview(&self, max_rows: usize) -> String {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        let mut write = || -> Result<(), csv::Error> {
            wtr.write_record(&self.headers)?;
            for row in self.rows.iter().take(max_rows) {
                wtr.write_record(row)?;
            }
            wtr.flush()?;
            Ok(())
        };
        if let Err(e) = write() {
            tracing::warn!("csv preview failed: {}", e);
        }
        let mut text = wtr
            .into_inner()
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_default();
        if self.rows.len() > max_rows {
            text.push_str(&format!("... {} more rows\n", self.rows.len() - max_rows));
        }
        text
    }
}

/// 宽松的数值解析：允许千分位逗号、货币符号与百分号
pub fn parse_number(cell: &str) -> Option<f64> {
    let cleaned: String = cell
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | '£' | '€' | '%' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}
