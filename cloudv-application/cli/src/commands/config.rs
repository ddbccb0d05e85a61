//! 配置文件命令

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use cloudv_executor::AcceptanceConfig;
use colored::Colorize;

pub fn handle(action: crate::ConfigAction) -> Result<()> {
    match action {
        crate::ConfigAction::Init { output, force } => init(&output, force),
        crate::ConfigAction::Show { config } => show(config),
    }
}

fn init(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!("{:?} 已存在, 使用 --force 覆盖", output);
    }

    AcceptanceConfig::default().save_to_file(output)?;
    println!("{} 已生成默认配置: {:?}", "✓".green(), output);
    Ok(())
}

/// 加载配置：指定文件时叠加环境变量，否则按搜索路径查找
pub fn load(path: Option<&Path>) -> Result<AcceptanceConfig> {
    match path {
        Some(path) => {
            let mut config = AcceptanceConfig::load_from_file(path)?;
            config.apply_overrides(|key| std::env::var(key).ok())?;
            Ok(config)
        }
        None => AcceptanceConfig::load(),
    }
}

fn show(path: Option<PathBuf>) -> Result<()> {
    let mut config = load(path.as_deref())?;
    if config.credentials.server_password.is_some() {
        config.credentials.server_password = Some("***".to_string());
    }
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
