//! CLI 通用输出格式化模块
//!
//! 提供 table/json/yaml 三种输出格式的通用实现

use anyhow::{bail, Result};
use serde::Serialize;

/// 可输出为表格行的数据 trait
pub trait TableRow {
    /// 返回表格列标题
    fn headers() -> Vec<&'static str>;

    /// 返回该项的表格行数据
    fn row(&self) -> Vec<String>;
}

/// 按列宽对齐的表格
pub fn render_table<T: TableRow>(items: &[T]) -> String {
    let headers = T::headers();
    let rows: Vec<Vec<String>> = items.iter().map(TableRow::row).collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let line = |cells: Vec<String>| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let header_line = line(headers.iter().map(|h| h.to_string()).collect());
    let mut out = vec![
        header_line.clone(),
        "-".repeat(header_line.chars().count()),
    ];
    out.extend(rows.into_iter().map(line));
    out.join("\n")
}

/// 根据格式参数选择输出方式
pub fn render<T: TableRow + Serialize>(items: &[T], format: &str) -> Result<String> {
    match format {
        "table" => Ok(render_table(items)),
        "json" => Ok(serde_json::to_string_pretty(items)?),
        "yaml" => Ok(serde_yaml::to_string(items)?),
        other => bail!("不支持的输出格式: {} (可选: table, json, yaml)", other),
    }
}
