//! 用例执行结果
//!
//! 功能结果和销毁结果相互独立：一个用例可以同时"验证失败"且"销毁失败"。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

use crate::{Finding, ResourceId, TestCase, VerificationResult};

/// 功能结果（开通 + 验证）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FunctionalOutcome {
    /// 开通和验证全部通过
    Passed,

    /// 在获得服务器标识前失败，没有创建任何资源
    ProvisioningFailed { reason: String },

    /// 已获得服务器标识，但后续界面步骤失败
    PartialProvisioning { reason: String },

    /// 网络验证失败
    VerificationFailed { findings: Vec<Finding> },

    /// 运行被中断，用例未执行
    Skipped { reason: String },
}

impl FunctionalOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, FunctionalOutcome::Passed)
    }
}

/// 销毁结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TeardownOutcome {
    /// 没有创建资源，无需销毁
    NotRequired,

    /// 销毁已确认
    Confirmed {
        attempts: u32,
        /// 资源在销毁前已不存在
        #[serde(default)]
        already_destroyed: bool,
    },

    /// 重试后仍未确认销毁，资源可能仍在计费
    Failed { reason: String, attempts: u32 },
}

impl TeardownOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, TeardownOutcome::Failed { .. })
    }
}

/// 结果标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeTag {
    Success,
    ProvisioningFailed,
    PartialProvisioningFailed,
    VerificationFailed,
    TeardownFailed,
    Skipped,
}

impl fmt::Display for OutcomeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeTag::Success => "success",
            OutcomeTag::ProvisioningFailed => "provisioning_failed",
            OutcomeTag::PartialProvisioningFailed => "partial_provisioning_failed",
            OutcomeTag::VerificationFailed => "verification_failed",
            OutcomeTag::TeardownFailed => "teardown_failed",
            OutcomeTag::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// 单个用例的执行结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseOutcome {
    /// 用例在输入中的序号（从 0 开始）
    pub index: usize,

    pub account: String,
    pub package: String,
    pub os_image: String,

    /// 服务器标识（获得过标识时才有值）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<ResourceId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<Ipv4Addr>,

    /// 开通尝试次数
    pub provision_attempts: u32,

    pub functional: FunctionalOutcome,

    pub teardown: TeardownOutcome,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,

    /// 总耗时（毫秒）
    pub duration_ms: u64,
}

impl CaseOutcome {
    /// 以用例信息创建结果，各阶段结果由编排器填写
    pub fn new(index: usize, case: &TestCase) -> Self {
        Self {
            index,
            account: case.account.clone(),
            package: case.package.clone(),
            os_image: case.os_image.clone(),
            resource_id: None,
            ipv4: None,
            provision_attempts: 0,
            functional: FunctionalOutcome::Skipped {
                reason: "未执行".to_string(),
            },
            teardown: TeardownOutcome::NotRequired,
            verification: None,
            duration_ms: 0,
        }
    }

    /// 结果标签：最早失败的阶段决定标签，功能通过时销毁失败决定标签
    pub fn tag(&self) -> OutcomeTag {
        match &self.functional {
            FunctionalOutcome::ProvisioningFailed { .. } => OutcomeTag::ProvisioningFailed,
            FunctionalOutcome::PartialProvisioning { .. } => OutcomeTag::PartialProvisioningFailed,
            FunctionalOutcome::VerificationFailed { .. } => OutcomeTag::VerificationFailed,
            FunctionalOutcome::Skipped { .. } => OutcomeTag::Skipped,
            FunctionalOutcome::Passed if self.teardown.is_failed() => OutcomeTag::TeardownFailed,
            FunctionalOutcome::Passed => OutcomeTag::Success,
        }
    }

    /// 资源是否可能泄漏
    pub fn leaked(&self) -> bool {
        self.teardown.is_failed()
    }

    pub fn is_success(&self) -> bool {
        self.tag() == OutcomeTag::Success
    }
}
