//! 运行报告命令

use anyhow::{bail, Context, Result};
use chrono::Local;
use cloudv_common::{CaseOutcome, FunctionalOutcome, OutcomeTag, TeardownOutcome};
use cloudv_executor::{RunExitStatus, RunReport};
use colored::{ColoredString, Colorize};

pub async fn handle(action: crate::ReportAction) -> Result<()> {
    match action {
        crate::ReportAction::Show { file, format } => {
            let report = RunReport::load(&file)
                .await
                .with_context(|| format!("读取报告失败: {:?}", file))?;

            match format.as_str() {
                "table" => print_report(&report),
                "json" => println!("{}", report.to_json()?),
                "yaml" => println!("{}", report.to_yaml()?),
                other => bail!("不支持的输出格式: {} (可选: table, json, yaml)", other),
            }
            Ok(())
        }
    }
}

fn colored_tag(tag: OutcomeTag) -> ColoredString {
    let text = tag.to_string();
    match tag {
        OutcomeTag::Success => text.green(),
        OutcomeTag::Skipped => text.yellow(),
        OutcomeTag::TeardownFailed => text.red().bold(),
        _ => text.red(),
    }
}

fn teardown_text(teardown: &TeardownOutcome) -> ColoredString {
    match teardown {
        TeardownOutcome::NotRequired => "无需销毁".normal(),
        TeardownOutcome::Confirmed {
            already_destroyed: true,
            ..
        } => "已确认 (已不存在)".green(),
        TeardownOutcome::Confirmed { attempts, .. } => format!("已确认 ({} 次)", attempts).green(),
        TeardownOutcome::Failed { attempts, .. } => {
            format!("失败 ({} 次)", attempts).red().bold()
        }
    }
}

/// 用例的详细原因
fn details(case: &CaseOutcome) -> Vec<String> {
    let mut lines = Vec::new();
    match &case.functional {
        FunctionalOutcome::Passed => {}
        FunctionalOutcome::ProvisioningFailed { reason }
        | FunctionalOutcome::PartialProvisioning { reason }
        | FunctionalOutcome::Skipped { reason } => lines.push(reason.clone()),
        FunctionalOutcome::VerificationFailed { findings } => {
            lines.extend(findings.iter().map(|f| f.to_string()));
        }
    }
    if let (FunctionalOutcome::PartialProvisioning { .. }, Some(verification)) =
        (&case.functional, &case.verification)
    {
        lines.extend(
            verification
                .findings()
                .iter()
                .map(|f| format!("验证: {}", f)),
        );
    }
    if let TeardownOutcome::Failed { reason, .. } = &case.teardown {
        lines.push(format!("销毁: {}", reason));
    }
    lines
}

/// 打印报告汇总和每个用例的结果
pub fn print_report(report: &RunReport) {
    println!("\n{}", "=".repeat(60));
    println!("{}", "验收报告".bold());
    println!("{}", "=".repeat(60));

    println!("运行 ID: {}", report.run_id);
    if !report.panel_url.is_empty() {
        println!("面板: {} ({})", report.panel_url, report.browser);
    }
    println!(
        "开始时间: {}",
        report
            .started_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(finished) = report.finished_at {
        let secs = (finished - report.started_at).num_milliseconds() as f64 / 1000.0;
        println!("总耗时: {:.2} 秒", secs);
    }
    if report.cancelled {
        println!("{}", "运行被中断".yellow());
    }

    println!();
    for case in &report.cases {
        println!(
            "{} #{} {} / {} / {}",
            colored_tag(case.tag()),
            case.index,
            case.account,
            case.package,
            case.os_image
        );
        if let Some(id) = &case.resource_id {
            let ip = case
                .ipv4
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("    服务器: {} ({})  销毁: {}", id, ip, teardown_text(&case.teardown));
        }
        for line in details(case) {
            println!("    - {}", line.dimmed());
        }
        println!("    耗时: {:.2} 秒", case.duration_ms as f64 / 1000.0);
    }

    let summary = &report.summary;
    println!("\n{}", "-".repeat(60));
    println!("总用例数: {}", summary.total);
    println!("成功: {}", summary.succeeded.to_string().green());
    println!("开通失败: {}", summary.provisioning_failed.to_string().red());
    println!("部分开通: {}", summary.partial_provisioning.to_string().red());
    println!("验证失败: {}", summary.verification_failed.to_string().red());
    println!("跳过: {}", summary.skipped.to_string().yellow());
    println!("销毁失败: {}", summary.teardown_failed.to_string().red().bold());

    let leaks = report.leaks();
    if !leaks.is_empty() {
        println!(
            "\n{} 以下服务器可能仍在计费，请在面板中手动销毁:",
            "⚠".red().bold()
        );
        for case in leaks {
            if let Some(id) = &case.resource_id {
                println!("    {} ({})", id.as_str().red().bold(), case.account);
            }
        }
    }

    let status = match report.exit_status() {
        RunExitStatus::Passed => "全部通过 ✓".green().bold(),
        RunExitStatus::Failed => "存在失败 ✗".red().bold(),
        RunExitStatus::Leaked => "存在未销毁的服务器 ✗".red().bold(),
    };
    println!("\n结果: {}", status);
    println!("{}", "=".repeat(60));
}
