//! 用例编排
//!
//! 每个用例严格按 开通 → 验证 → 销毁 执行。只要获得过服务器标识就一定执行一次销毁，
//! 验证失败、验证任务 panic 或操作员中断都不会跳过销毁。部分开通时只要地址和用户
//! 已知仍然执行验证。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cloudv_common::{
    CaseOutcome, Finding, FunctionalOutcome, ProvisionedResource, ResourceId, TeardownOutcome,
    TestCase, VerificationResult,
};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::provisioner::{Provisioner, ProvisioningError};
use crate::report::{RunEvent, RunRecorder, RunReport, Stage};
use crate::teardown::{TeardownController, TeardownError};
use crate::verifier::Verifier;

/// 编排器
pub struct Orchestrator {
    provisioner: Arc<dyn Provisioner>,
    verifier: Arc<dyn Verifier>,
    teardown: Arc<TeardownController>,
    recorder: Arc<dyn RunRecorder>,
    provision_retries: u32,
    retry_delay: Duration,
    panel_url: String,
    browser: String,
}

impl Orchestrator {
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        verifier: Arc<dyn Verifier>,
        teardown: Arc<TeardownController>,
        recorder: Arc<dyn RunRecorder>,
    ) -> Self {
        Self {
            provisioner,
            verifier,
            teardown,
            recorder,
            provision_retries: 1,
            retry_delay: Duration::from_secs(5),
            panel_url: String::new(),
            browser: String::new(),
        }
    }

    /// 获得标识前瞬时失败的重试次数和间隔
    pub fn with_provision_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.provision_retries = retries;
        self.retry_delay = delay;
        self
    }

    /// 报告中记录的面板地址和浏览器
    pub fn with_run_label(mut self, panel_url: impl Into<String>, browser: impl Into<String>) -> Self {
        self.panel_url = panel_url.into();
        self.browser = browser.into();
        self
    }

    /// 依次执行所有用例，返回与输入顺序一致的报告
    pub async fn run(&self, cases: &[TestCase], cancel: &CancellationToken) -> RunReport {
        let mut report = RunReport::new(self.panel_url.clone(), self.browser.clone());
        info!("开始运行 {}: {} 个用例", report.run_id, cases.len());

        self.recorder
            .record(RunEvent::RunStarted {
                run_id: report.run_id,
                total: cases.len(),
                at: Utc::now(),
            })
            .await;

        for (index, case) in cases.iter().enumerate() {
            let outcome = if cancel.is_cancelled() {
                info!("运行已中断, 跳过用例 #{}: {}", index, case.label());
                let mut outcome = CaseOutcome::new(index, case);
                outcome.functional = FunctionalOutcome::Skipped {
                    reason: "运行被中断".to_string(),
                };
                outcome
            } else {
                self.run_case(index, case, cancel).await
            };

            if let TeardownOutcome::Failed { reason, .. } = &outcome.teardown {
                if let Some(id) = &outcome.resource_id {
                    self.recorder
                        .record(RunEvent::Leak {
                            index,
                            resource_id: id.clone(),
                            reason: reason.clone(),
                            at: Utc::now(),
                        })
                        .await;
                }
            }

            self.recorder
                .record(RunEvent::CaseFinished {
                    index,
                    tag: outcome.tag(),
                    leaked: outcome.leaked(),
                    duration_ms: outcome.duration_ms,
                    at: Utc::now(),
                })
                .await;

            info!("用例 #{} 结束: {}", index, outcome.tag());
            report.push(outcome);
        }

        report.finish(cancel.is_cancelled());

        self.recorder
            .record(RunEvent::RunFinished {
                run_id: report.run_id,
                summary: report.summary.clone(),
                cancelled: report.cancelled,
                at: Utc::now(),
            })
            .await;

        for leaked in report.leaks() {
            warn!(
                "服务器可能仍在计费: 用例 #{} {}",
                leaked.index,
                leaked
                    .resource_id
                    .as_ref()
                    .map(ResourceId::as_str)
                    .unwrap_or("-")
            );
        }

        report
    }

    /// 执行单个用例
    async fn run_case(&self, index: usize, case: &TestCase, cancel: &CancellationToken) -> CaseOutcome {
        let started = Instant::now();
        let mut outcome = CaseOutcome::new(index, case);

        info!("用例 #{}: {}", index, case.label());
        self.recorder
            .record(RunEvent::CaseStarted {
                index,
                label: case.label(),
                at: Utc::now(),
            })
            .await;

        let (provisioned, attempts) = self.provision_with_retry(case, cancel).await;
        outcome.provision_attempts = attempts;

        self.record_stage(
            index,
            Stage::Provision,
            provisioned.is_ok(),
            provisioned.as_ref().err().map(|e| e.to_string()),
        )
        .await;

        match provisioned {
            Ok(resource) => {
                outcome.resource_id = Some(resource.id.clone());
                outcome.ipv4 = Some(resource.ipv4);

                let verification = self.verify_stage(index, &resource, case, cancel).await;
                let findings = verification.findings();
                outcome.functional = if verification.passed() {
                    FunctionalOutcome::Passed
                } else {
                    FunctionalOutcome::VerificationFailed { findings }
                };
                outcome.verification = Some(verification);
                outcome.teardown = self.teardown(index, &resource.id, case).await;
            }
            Err(ProvisioningError::Partial {
                id,
                reason,
                resource,
            }) => {
                warn!("用例 #{} 部分开通 ({}): {}", index, id, reason);
                outcome.resource_id = Some(id.clone());
                outcome.functional = FunctionalOutcome::PartialProvisioning { reason };

                // 已知地址和用户时照常验证，结果附在部分开通之后
                if let Some(resource) = resource {
                    outcome.ipv4 = Some(resource.ipv4);
                    let verification = self.verify_stage(index, &resource, case, cancel).await;
                    outcome.verification = Some(verification);
                }
                outcome.teardown = self.teardown(index, &id, case).await;
            }
            Err(ProvisioningError::BeforeIdentity { reason, .. }) => {
                error!("用例 #{} 开通失败: {}", index, reason);
                outcome.functional = FunctionalOutcome::ProvisioningFailed { reason };
            }
        }

        outcome.duration_ms = started.elapsed().as_millis() as u64;
        outcome
    }

    /// 开通，只有在获得标识前的瞬时失败才重试
    async fn provision_with_retry(
        &self,
        case: &TestCase,
        cancel: &CancellationToken,
    ) -> (Result<ProvisionedResource, ProvisioningError>, u32) {
        let max_attempts = self.provision_retries + 1;
        let mut attempt = 1;

        loop {
            let result = self.provisioner.provision(case).await;

            match &result {
                Err(e) if e.is_transient() && attempt < max_attempts && !cancel.is_cancelled() => {
                    warn!(
                        "开通失败 (第 {}/{} 次): {}, {:?} 后重试",
                        attempt, max_attempts, e, self.retry_delay
                    );
                    tokio::select! {
                        _ = sleep(self.retry_delay) => {}
                        _ = cancel.cancelled() => return (result, attempt),
                    }
                    attempt += 1;
                }
                _ => return (result, attempt),
            }
        }
    }

    async fn verify_stage(
        &self,
        index: usize,
        resource: &ProvisionedResource,
        case: &TestCase,
        cancel: &CancellationToken,
    ) -> VerificationResult {
        let verification = self.verify(resource, case, cancel).await;
        let findings = verification.findings();
        self.record_stage(
            index,
            Stage::Verify,
            verification.passed(),
            (!findings.is_empty()).then(|| join_findings(&findings)),
        )
        .await;
        verification
    }

    /// 在独立任务中验证，任务 panic 时记为检查失败
    async fn verify(
        &self,
        resource: &ProvisionedResource,
        case: &TestCase,
        cancel: &CancellationToken,
    ) -> VerificationResult {
        let verifier = Arc::clone(&self.verifier);
        let resource = resource.clone();
        let case = case.clone();
        let cancel = cancel.clone();

        let task =
            tokio::spawn(async move { verifier.verify(&resource, &case, &cancel).await });

        match task.await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!("验证失败: {}", e);
                e.into_result()
            }
            Err(join_error) => {
                error!("验证任务异常退出: {}", join_error);
                VerificationResult {
                    incomplete: vec![Finding::CheckFailed {
                        check: "verification".to_string(),
                        detail: join_error.to_string(),
                    }],
                    ..VerificationResult::default()
                }
            }
        }
    }

    /// 销毁并转换为结果，不受中断影响
    async fn teardown(&self, index: usize, id: &ResourceId, owner: &TestCase) -> TeardownOutcome {
        let outcome = match self.teardown.destroy(id, owner).await {
            Ok(confirmation) => TeardownOutcome::Confirmed {
                attempts: confirmation.attempts,
                already_destroyed: confirmation.already_destroyed,
            },
            Err(e) => TeardownOutcome::Failed {
                reason: e.to_string(),
                attempts: match &e {
                    TeardownError::Exhausted { attempts, .. } => *attempts,
                    _ => 1,
                },
            },
        };

        let detail = match &outcome {
            TeardownOutcome::Failed { reason, .. } => Some(reason.clone()),
            _ => None,
        };
        self.record_stage(index, Stage::Teardown, !outcome.is_failed(), detail)
            .await;

        outcome
    }

    async fn record_stage(&self, index: usize, stage: Stage, ok: bool, detail: Option<String>) {
        self.recorder
            .record(RunEvent::StageFinished {
                index,
                stage,
                ok,
                detail,
                at: Utc::now(),
            })
            .await;
    }
}

fn join_findings(findings: &[Finding]) -> String {
    findings
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
