//! 结构化数据：随问题提交的表格快照

pub mod table;

pub use table::{parse_number, Table, TableError};
