//! CloudV ATP CLI 应用

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use cloudv_webdriver::Browser;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "cloudv-atp")]
#[command(about = "CloudV ATP - 云服务器开通验收测试", long_about = None)]
#[command(version)]
struct Cli {
    /// 日志级别 (RUST_LOG 优先)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 执行验收测试
    Run(RunArgs),

    /// 列出测试数据中的用例 (不执行)
    Cases {
        /// 测试数据 (CSV)
        #[arg(short, long, default_value = "testdata.csv")]
        data: PathBuf,

        /// 输出格式 (table/json/yaml)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// 运行报告
    Report {
        #[command(subcommand)]
        action: ReportAction,
    },

    /// 配置文件
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// 测试数据 (CSV)
    #[arg(short, long, default_value = "testdata.csv")]
    pub data: PathBuf,

    /// 配置文件 (默认按搜索路径查找)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 浏览器 (chrome/firefox/edge/ie)
    #[arg(short, long)]
    pub browser: Option<Browser>,

    /// 面板登录页地址
    #[arg(short, long)]
    pub url: Option<String>,

    /// WebDriver 服务地址
    #[arg(long)]
    pub webdriver: Option<String>,

    /// SSH 私钥
    #[arg(long)]
    pub private_key: Option<PathBuf>,

    /// 注入服务器的公钥
    #[arg(long)]
    pub public_key: Option<PathBuf>,

    /// 报告输出路径 (.json/.yaml)
    #[arg(short, long)]
    pub report: Option<PathBuf>,

    /// 执行日志路径 (JSON Lines)
    #[arg(long)]
    pub log: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum ReportAction {
    /// 显示保存的报告
    Show {
        /// 报告文件
        file: PathBuf,

        /// 输出格式 (table/json/yaml)
        #[arg(short, long, default_value = "table")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// 生成默认配置文件
    Init {
        /// 输出路径 (.toml/.yaml/.json)
        #[arg(default_value = "cloudv.toml")]
        output: PathBuf,

        /// 覆盖已存在的文件
        #[arg(long)]
        force: bool,
    },

    /// 显示生效的配置
    Show {
        /// 配置文件 (默认按搜索路径查找)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("CloudV ATP 启动");

    match cli.command {
        Commands::Run(args) => {
            let status = commands::run::handle(args).await?;
            std::process::exit(status.code());
        }
        Commands::Cases { data, format } => commands::cases::handle(&data, &format)?,
        Commands::Report { action } => commands::report::handle(action).await?,
        Commands::Config { action } => commands::config::handle(action)?,
    }

    Ok(())
}
