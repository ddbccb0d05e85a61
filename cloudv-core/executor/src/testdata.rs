//! 测试数据加载
//!
//! 表格数据列为 `user, user_password, cloud_package, operating_system`，
//! 行顺序即执行顺序。除 `user_password` 外各列去掉首尾空白，密码原样保留。

use std::fs::File;
use std::io::Read;
use std::path::Path;

use cloudv_common::TestCase;
use tracing::{debug, info};

use crate::{ExecutorError, Result};

/// 从 CSV 文件加载测试用例
pub fn load_test_cases(path: &Path) -> Result<Vec<TestCase>> {
    let file = File::open(path).map_err(|e| {
        ExecutorError::TestDataError(format!("无法打开测试数据 {:?}: {}", path, e))
    })?;

    let cases = parse_test_cases(file)?;
    info!("从 {:?} 加载了 {} 个测试用例", path, cases.len());
    Ok(cases)
}

/// 解析 CSV 格式的测试用例
pub fn parse_test_cases<R: Read>(reader: R) -> Result<Vec<TestCase>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let mut cases = Vec::new();
    for (row, record) in csv_reader.deserialize::<TestCase>().enumerate() {
        // 表头占第 1 行
        let line = row + 2;
        let mut case = record
            .map_err(|e| ExecutorError::TestDataError(format!("第 {} 行格式错误: {}", line, e)))?;
        trim_in_place(&mut case.account);
        trim_in_place(&mut case.package);
        trim_in_place(&mut case.os_image);

        let missing = [
            ("user", &case.account),
            ("user_password", &case.secret),
            ("cloud_package", &case.package),
            ("operating_system", &case.os_image),
        ]
        .into_iter()
        .find(|(_, value)| value.is_empty());

        if let Some((column, _)) = missing {
            return Err(ExecutorError::TestDataError(format!(
                "第 {} 行缺少 {}",
                line, column
            )));
        }

        debug!("测试用例 {}: {}", row, case.label());
        cases.push(case);
    }

    Ok(cases)
}

fn trim_in_place(value: &mut String) {
    let trimmed = value.trim();
    if trimmed.len() != value.len() {
        *value = trimmed.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_preserves_row_order() {
        let data = "\
user,user_password,cloud_package,operating_system
a@x.com,i7MnuS*o,CloudV 0,Ubuntu 22.04
b@x.com,pw2,CloudV 1,Debian 12
";
        let cases = parse_test_cases(data.as_bytes()).unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].account, "a@x.com");
        assert_eq!(cases[0].package, "CloudV 0");
        assert_eq!(cases[1].os_image, "Debian 12");
    }

    #[test]
    fn test_column_order_does_not_matter() {
        let data = "\
operating_system,cloud_package,user,user_password
Ubuntu 22.04, CloudV 0 ,a@x.com,secret
";
        let cases = parse_test_cases(data.as_bytes()).unwrap();
        assert_eq!(cases[0].package, "CloudV 0");
        assert_eq!(cases[0].secret, "secret");
    }

    #[test]
    fn test_password_whitespace_preserved() {
        let data = "\
 user , user_password ,cloud_package,operating_system
 a@x.com ,  pa ss  ,CloudV 0, Ubuntu 22.04
";
        let cases = parse_test_cases(data.as_bytes()).unwrap();
        assert_eq!(cases[0].account, "a@x.com");
        assert_eq!(cases[0].os_image, "Ubuntu 22.04");
        assert_eq!(cases[0].secret, "  pa ss  ");
    }

    #[test]
    fn test_empty_field_rejected() {
        let data = "\
user,user_password,cloud_package,operating_system
a@x.com,,CloudV 0,Ubuntu 22.04
";
        let err = parse_test_cases(data.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("user_password"));
        assert!(err.to_string().contains("第 2 行"));
    }

    #[test]
    fn test_missing_column_rejected() {
        let data = "\
user,user_password,cloud_package
a@x.com,pw,CloudV 0
";
        assert!(parse_test_cases(data.as_bytes()).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_test_cases(Path::new("/nonexistent/cases.csv"));
        assert!(matches!(result, Err(ExecutorError::TestDataError(_))));
    }
}
