//! 执行验收测试

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use cloudv_executor::{
    load_test_cases, AcceptanceConfig, JsonLinesRecorder, NetworkVerifier, Orchestrator,
    PanelDestroyer, PanelProvisioner, PanelSession, RunExitStatus, TeardownController,
};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::progress::ProgressRecorder;
use super::report::print_report;
use crate::RunArgs;

/// 命令行参数覆盖配置
fn apply_flags(config: &mut AcceptanceConfig, args: &RunArgs) {
    if let Some(browser) = args.browser {
        config.panel.browser = browser;
    }
    if let Some(url) = &args.url {
        config.panel.url = url.clone();
    }
    if let Some(url) = &args.webdriver {
        config.panel.webdriver_url = url.clone();
    }
    if let Some(path) = &args.private_key {
        config.credentials.private_key = path.clone();
    }
    if let Some(path) = &args.public_key {
        config.credentials.public_key = path.clone();
    }
    if let Some(path) = &args.report {
        config.report.output = path.clone();
    }
    if let Some(path) = &args.log {
        config.report.execution_log = path.clone();
    }
}

pub async fn handle(args: RunArgs) -> Result<RunExitStatus> {
    let mut config = super::config::load(args.config.as_deref())?;
    apply_flags(&mut config, &args);
    config.validate()?;

    let cases = load_test_cases(&args.data)
        .with_context(|| format!("加载测试数据失败: {:?}", args.data))?;
    if cases.is_empty() {
        bail!("测试数据 {:?} 中没有用例", args.data);
    }

    println!(
        "{} 面板: {}  浏览器: {}  用例: {}",
        "▶".cyan(),
        config.panel.url.yellow(),
        config.panel.browser,
        cases.len().to_string().yellow()
    );

    let session = Arc::new(PanelSession::new(&config.panel).context("创建浏览器会话失败")?);
    let provisioner = Arc::new(
        PanelProvisioner::from_config(Arc::clone(&session), &config)
            .context("初始化开通驱动失败")?,
    );
    let verifier = Arc::new(NetworkVerifier::from_config(&config));
    let teardown = Arc::new(TeardownController::new(
        Arc::new(PanelDestroyer::new(Arc::clone(&session))),
        &config.teardown,
    ));

    let log = Arc::new(
        JsonLinesRecorder::open(&config.report.execution_log)
            .await
            .with_context(|| format!("打开执行日志失败: {:?}", config.report.execution_log))?,
    );
    let progress = Arc::new(ProgressRecorder::new(log, cases.len())?);

    let orchestrator = Orchestrator::new(provisioner, verifier, teardown, progress.clone())
        .with_provision_retries(config.provisioning.retries, config.provisioning.retry_delay)
        .with_run_label(config.panel.url.clone(), config.panel.browser.to_string());

    // Ctrl-C: 停止后续用例，当前用例仍会销毁
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号, 当前用例销毁后停止");
            token.cancel();
        }
    });

    let report = orchestrator.run(&cases, &cancel).await;
    progress.finish();

    if let Err(e) = session.close().await {
        warn!("关闭浏览器会话失败: {}", e);
    }

    print_report(&report);

    report
        .save(&config.report.output)
        .await
        .with_context(|| format!("保存报告失败: {:?}", config.report.output))?;
    println!(
        "报告: {:?}  执行日志: {:?}",
        config.report.output, config.report.execution_log
    );

    Ok(report.exit_status())
}
