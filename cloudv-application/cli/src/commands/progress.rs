//! 运行进度显示
//!
//! 包装执行日志记录器，按事件推进进度条。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use cloudv_common::OutcomeTag;
use cloudv_executor::{RunEvent, RunRecorder, Stage};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

pub struct ProgressRecorder {
    inner: Arc<dyn RunRecorder>,
    bar: ProgressBar,
}

impl ProgressRecorder {
    pub fn new(inner: Arc<dyn RunRecorder>, total: usize) -> Result<Self> {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("=>-"),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Ok(Self { inner, bar })
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn stage_name(stage: Stage) -> &'static str {
    match stage {
        Stage::Provision => "开通",
        Stage::Verify => "验证",
        Stage::Teardown => "销毁",
    }
}

#[async_trait]
impl RunRecorder for ProgressRecorder {
    async fn record(&self, event: RunEvent) {
        match &event {
            RunEvent::CaseStarted { index, label, .. } => {
                self.bar.set_message(format!("#{} {}: 开通中", index, label));
            }
            RunEvent::StageFinished {
                index, stage, ok, ..
            } => {
                let next = match stage {
                    Stage::Provision if *ok => "验证中",
                    Stage::Provision | Stage::Verify => "销毁中",
                    Stage::Teardown => "完成",
                };
                self.bar
                    .set_message(format!("#{} {}结束, {}", index, stage_name(*stage), next));
            }
            RunEvent::CaseFinished { index, tag, .. } => {
                let tag = match tag {
                    OutcomeTag::Success => tag.to_string().green(),
                    OutcomeTag::TeardownFailed => tag.to_string().red().bold(),
                    OutcomeTag::Skipped => tag.to_string().yellow(),
                    _ => tag.to_string().red(),
                };
                self.bar.println(format!("  用例 #{}: {}", index, tag));
                self.bar.inc(1);
            }
            RunEvent::Leak {
                index, resource_id, ..
            } => {
                self.bar.println(format!(
                    "  {} 用例 #{} 的服务器 {} 销毁失败",
                    "⚠".red().bold(),
                    index,
                    resource_id
                ));
            }
            _ => {}
        }

        self.inner.record(event).await;
    }
}
