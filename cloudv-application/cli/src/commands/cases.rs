//! 用例列表命令

use std::path::Path;

use anyhow::{Context, Result};
use cloudv_common::TestCase;
use cloudv_executor::load_test_cases;
use serde::Serialize;

use super::output::{render, TableRow};

/// 列表中的一行（不含面板密码）
#[derive(Debug, Serialize)]
pub struct CaseRow {
    pub index: usize,
    pub account: String,
    pub package: String,
    pub os_image: String,
}

impl CaseRow {
    pub fn new(index: usize, case: &TestCase) -> Self {
        Self {
            index,
            account: case.account.clone(),
            package: case.package.clone(),
            os_image: case.os_image.clone(),
        }
    }
}

impl TableRow for CaseRow {
    fn headers() -> Vec<&'static str> {
        vec!["#", "账号", "套餐", "操作系统"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.index.to_string(),
            self.account.clone(),
            self.package.clone(),
            self.os_image.clone(),
        ]
    }
}

pub fn handle(data: &Path, format: &str) -> Result<()> {
    let cases = load_test_cases(data).with_context(|| format!("加载测试数据失败: {:?}", data))?;
    let rows: Vec<CaseRow> = cases
        .iter()
        .enumerate()
        .map(|(i, case)| CaseRow::new(i, case))
        .collect();

    println!("{}", render(&rows, format)?);
    Ok(())
}
