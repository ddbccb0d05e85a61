//! 运行报告与执行日志

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cloudv_common::{CaseOutcome, OutcomeTag, ResourceId};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::{ExecutorError, Result};

/// 运行退出状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunExitStatus {
    /// 全部用例成功
    Passed,
    /// 存在功能失败或跳过的用例
    Failed,
    /// 存在销毁失败的服务器
    Leaked,
}

impl RunExitStatus {
    pub fn code(self) -> i32 {
        match self {
            RunExitStatus::Passed => 0,
            RunExitStatus::Failed => 1,
            RunExitStatus::Leaked => 3,
        }
    }
}

/// 运行汇总
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub provisioning_failed: usize,
    pub partial_provisioning: usize,
    pub verification_failed: usize,
    pub skipped: usize,
    /// 销毁失败数（与功能结果独立统计）
    pub teardown_failed: usize,
}

/// 运行报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,

    /// 面板地址
    pub panel_url: String,

    /// 浏览器
    pub browser: String,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// 是否被操作员中断
    #[serde(default)]
    pub cancelled: bool,

    #[serde(default)]
    pub summary: RunSummary,

    /// 按输入顺序排列的用例结果
    pub cases: Vec<CaseOutcome>,
}

impl RunReport {
    pub fn new(panel_url: impl Into<String>, browser: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            panel_url: panel_url.into(),
            browser: browser.into(),
            started_at: Utc::now(),
            finished_at: None,
            cancelled: false,
            summary: RunSummary::default(),
            cases: Vec::new(),
        }
    }

    pub fn push(&mut self, outcome: CaseOutcome) {
        let summary = &mut self.summary;
        summary.total += 1;
        match outcome.tag() {
            OutcomeTag::Success => summary.succeeded += 1,
            OutcomeTag::ProvisioningFailed => summary.provisioning_failed += 1,
            OutcomeTag::PartialProvisioningFailed => summary.partial_provisioning += 1,
            OutcomeTag::VerificationFailed => summary.verification_failed += 1,
            OutcomeTag::Skipped => summary.skipped += 1,
            OutcomeTag::TeardownFailed => {}
        }
        if outcome.leaked() {
            summary.teardown_failed += 1;
        }
        self.cases.push(outcome);
    }

    pub fn finish(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
        self.finished_at = Some(Utc::now());
    }

    /// 销毁失败的用例
    pub fn leaks(&self) -> Vec<&CaseOutcome> {
        self.cases.iter().filter(|c| c.leaked()).collect()
    }

    pub fn all_passed(&self) -> bool {
        !self.cases.is_empty() && self.cases.iter().all(|c| c.is_success())
    }

    /// 销毁失败优先于其他失败
    pub fn exit_status(&self) -> RunExitStatus {
        if self.cases.iter().any(|c| c.leaked()) {
            RunExitStatus::Leaked
        } else if self.all_passed() {
            RunExitStatus::Passed
        } else {
            RunExitStatus::Failed
        }
    }

    /// 导出为 JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// 导出为 YAML
    pub fn to_yaml(&self) -> serde_yaml::Result<String> {
        serde_yaml::to_string(self)
    }

    /// 按扩展名保存 (yaml/yml 为 YAML，其余为 JSON)
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content = if is_yaml(path) {
            self.to_yaml()
                .map_err(|e| ExecutorError::SerdeError(e.to_string()))?
        } else {
            self.to_json()
                .map_err(|e| ExecutorError::SerdeError(e.to_string()))?
        };
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        if is_yaml(path) {
            serde_yaml::from_str(&content).map_err(|e| ExecutorError::SerdeError(e.to_string()))
        } else {
            serde_json::from_str(&content).map_err(|e| ExecutorError::SerdeError(e.to_string()))
        }
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// 用例阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Provision,
    Verify,
    Teardown,
}

/// 执行日志事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: Uuid,
        total: usize,
        at: DateTime<Utc>,
    },
    CaseStarted {
        index: usize,
        label: String,
        at: DateTime<Utc>,
    },
    StageFinished {
        index: usize,
        stage: Stage,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        at: DateTime<Utc>,
    },
    CaseFinished {
        index: usize,
        tag: OutcomeTag,
        leaked: bool,
        duration_ms: u64,
        at: DateTime<Utc>,
    },
    /// 服务器可能仍在计费
    Leak {
        index: usize,
        resource_id: ResourceId,
        reason: String,
        at: DateTime<Utc>,
    },
    RunFinished {
        run_id: Uuid,
        summary: RunSummary,
        cancelled: bool,
        at: DateTime<Utc>,
    },
}

/// 只追加的事件记录
#[async_trait]
pub trait RunRecorder: Send + Sync {
    async fn record(&self, event: RunEvent);
}

/// JSON Lines 执行日志，每行一个事件
pub struct JsonLinesRecorder {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesRecorder {
    /// 以追加模式打开日志文件
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RunRecorder for JsonLinesRecorder {
    async fn record(&self, event: RunEvent) {
        let mut line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!("序列化执行日志事件失败: {}", e);
                return;
            }
        };
        line.push('\n');

        let mut file = self.file.lock().await;
        if let Err(e) = file.write_all(line.as_bytes()).await {
            warn!("写入执行日志 {:?} 失败: {}", self.path, e);
            return;
        }
        if let Err(e) = file.flush().await {
            warn!("刷新执行日志 {:?} 失败: {}", self.path, e);
        }
    }
}

/// 内存中的事件记录
#[derive(Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<RunEvent>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<RunEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl RunRecorder for MemoryRecorder {
    async fn record(&self, event: RunEvent) {
        self.events.lock().await.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudv_common::{FunctionalOutcome, TeardownOutcome, TestCase};

    fn outcome(index: usize, functional: FunctionalOutcome, teardown: TeardownOutcome) -> CaseOutcome {
        let case = TestCase::new("a@x.com", "pw", "CloudV 0", "Ubuntu 22.04");
        let mut outcome = CaseOutcome::new(index, &case);
        outcome.functional = functional;
        outcome.teardown = teardown;
        outcome
    }

    fn confirmed() -> TeardownOutcome {
        TeardownOutcome::Confirmed {
            attempts: 1,
            already_destroyed: false,
        }
    }

    #[test]
    fn test_exit_status() {
        let mut report = RunReport::new("https://panel.example.com", "chrome");
        assert_eq!(report.exit_status(), RunExitStatus::Failed);

        report.push(outcome(0, FunctionalOutcome::Passed, confirmed()));
        assert_eq!(report.exit_status(), RunExitStatus::Passed);

        report.push(outcome(
            1,
            FunctionalOutcome::ProvisioningFailed {
                reason: "timeout".into(),
            },
            TeardownOutcome::NotRequired,
        ));
        assert_eq!(report.exit_status(), RunExitStatus::Failed);

        report.push(outcome(
            2,
            FunctionalOutcome::Passed,
            TeardownOutcome::Failed {
                reason: "timeout".into(),
                attempts: 3,
            },
        ));
        assert_eq!(report.exit_status(), RunExitStatus::Leaked);
        assert_eq!(report.exit_status().code(), 3);
        assert_eq!(report.leaks().len(), 1);
    }

    #[test]
    fn test_summary_counts_teardown_separately() {
        let mut report = RunReport::new("https://panel.example.com", "chrome");
        report.push(outcome(
            0,
            FunctionalOutcome::PartialProvisioning {
                reason: "confirmation".into(),
            },
            TeardownOutcome::Failed {
                reason: "timeout".into(),
                attempts: 3,
            },
        ));
        assert_eq!(report.summary.total, 1);
        assert_eq!(report.summary.partial_provisioning, 1);
        assert_eq!(report.summary.teardown_failed, 1);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = RunReport::new("https://panel.example.com", "firefox");
        report.push(outcome(0, FunctionalOutcome::Passed, confirmed()));
        report.finish(false);

        for name in ["report.json", "report.yaml"] {
            let path = dir.path().join(name);
            report.save(&path).await.unwrap();
            let loaded = RunReport::load(&path).await.unwrap();
            assert_eq!(loaded.run_id, report.run_id);
            assert_eq!(loaded.cases, report.cases);
            assert_eq!(loaded.summary, report.summary);
        }
    }

    #[tokio::test]
    async fn test_jsonl_recorder_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/execution.jsonl");

        for index in 0..2 {
            let recorder = JsonLinesRecorder::open(&path).await.unwrap();
            recorder
                .record(RunEvent::CaseStarted {
                    index,
                    label: "CloudV 0 / Ubuntu 22.04".into(),
                    at: Utc::now(),
                })
                .await;
        }

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let events: Vec<RunEvent> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert!(content.lines().all(|l| l.contains("\"event\":\"case_started\"")));
    }
}
