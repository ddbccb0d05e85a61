//! 网络验证结果

use serde::{Deserialize, Serialize};
use std::fmt;

/// 端口方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    /// 从控制端连入云服务器
    Inbound,
    /// 从云服务器连出
    Outbound,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortDirection::Inbound => f.write_str("inbound"),
            PortDirection::Outbound => f.write_str("outbound"),
        }
    }
}

/// 端口策略期望状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedState {
    Open,
    Closed,
}

impl ExpectedState {
    /// 观测结果是否符合期望
    ///
    /// 关闭的端口可能表现为拒绝、超时或不可达，三者都满足 `Closed`。
    pub fn satisfied_by(self, observed: ObservedState) -> bool {
        match self {
            ExpectedState::Open => observed.is_open(),
            ExpectedState::Closed => !observed.is_open(),
        }
    }
}

impl fmt::Display for ExpectedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedState::Open => f.write_str("open"),
            ExpectedState::Closed => f.write_str("closed"),
        }
    }
}

/// 端口实际观测状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservedState {
    /// 连接建立
    Open,
    /// 对端明确拒绝 (RST)
    Refused,
    /// 在超时时间内没有响应
    TimedOut,
    /// 主机或网络不可达
    Unreachable,
}

impl ObservedState {
    pub fn is_open(self) -> bool {
        self == ObservedState::Open
    }
}

impl fmt::Display for ObservedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservedState::Open => f.write_str("open"),
            ObservedState::Refused => f.write_str("refused"),
            ObservedState::TimedOut => f.write_str("timed_out"),
            ObservedState::Unreachable => f.write_str("unreachable"),
        }
    }
}

/// 单个端口检查
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortCheck {
    pub direction: PortDirection,
    /// 探测目标（入站为云服务器地址，出站为外部探测主机）
    pub target: String,
    pub port: u16,
    pub expected: ExpectedState,
    pub observed: ObservedState,
}

impl PortCheck {
    pub fn is_violation(&self) -> bool {
        !self.expected.satisfied_by(self.observed)
    }
}

/// 验证发现的问题
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// 重试窗口内始终未能建立 SSH 连接
    ConnectTimeout { attempts: u32, waited_secs: u64 },

    /// SSH 端口明确拒绝连接
    ConnectionRefused { host: String, port: u16 },

    /// 主机不可达（路由、DNS）
    HostUnreachable { host: String, detail: String },

    /// 密钥认证失败
    AuthenticationFailed { detail: String },

    /// 密码登录失败
    PasswordLoginFailed { detail: String },

    /// 端口策略不符
    PortPolicyViolation {
        direction: PortDirection,
        target: String,
        port: u16,
        expected: ExpectedState,
        observed: ObservedState,
    },

    /// 额外数据卷在系统中不可见
    VolumeNotVisible { expected_size_gb: u32 },

    /// 检查未在超时时间内完成
    CheckTimedOut { check: String, timeout_secs: u64 },

    /// 检查无法执行
    CheckFailed { check: String, detail: String },

    /// 验证被操作员中断
    Cancelled,
}

impl From<&PortCheck> for Finding {
    fn from(check: &PortCheck) -> Self {
        Finding::PortPolicyViolation {
            direction: check.direction,
            target: check.target.clone(),
            port: check.port,
            expected: check.expected,
            observed: check.observed,
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::ConnectTimeout {
                attempts,
                waited_secs,
            } => write!(f, "SSH 连接超时: {} 次尝试, 等待 {}s", attempts, waited_secs),
            Finding::ConnectionRefused { host, port } => {
                write!(f, "SSH 连接被拒绝: {}:{}", host, port)
            }
            Finding::HostUnreachable { host, detail } => {
                write!(f, "主机不可达: {} ({})", host, detail)
            }
            Finding::AuthenticationFailed { detail } => write!(f, "SSH 密钥认证失败: {}", detail),
            Finding::PasswordLoginFailed { detail } => write!(f, "SSH 密码登录失败: {}", detail),
            Finding::PortPolicyViolation {
                direction,
                target,
                port,
                expected,
                observed,
            } => write!(
                f,
                "端口策略不符: {} {}:{} 期望 {}, 实际 {}",
                direction, target, port, expected, observed
            ),
            Finding::VolumeNotVisible { expected_size_gb } => {
                write!(f, "未找到 {}G 的额外数据卷", expected_size_gb)
            }
            Finding::CheckTimedOut {
                check,
                timeout_secs,
            } => write!(f, "检查超时: {} ({}s)", check, timeout_secs),
            Finding::CheckFailed { check, detail } => write!(f, "检查失败: {}: {}", check, detail),
            Finding::Cancelled => f.write_str("验证被中断"),
        }
    }
}

/// 网络验证结果
///
/// 每个用例只生成一次，生成后只读。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// 是否完成了完整的 SSH 握手和认证
    pub ssh_reachable: bool,

    /// SSH 连接尝试次数
    pub connect_attempts: u32,

    /// 密码登录结果（未设置密码时为空）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_login: Option<bool>,

    /// 端口检查
    #[serde(default)]
    pub ports: Vec<PortCheck>,

    /// 额外数据卷是否可见（未申请数据卷时为空）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_visible: Option<bool>,

    /// 未能完成的检查
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub incomplete: Vec<Finding>,
}

impl VerificationResult {
    /// 汇总所有问题
    pub fn findings(&self) -> Vec<Finding> {
        let mut findings: Vec<Finding> = self
            .ports
            .iter()
            .filter(|check| check.is_violation())
            .map(Finding::from)
            .collect();

        findings.extend(self.incomplete.iter().cloned());
        findings
    }

    pub fn passed(&self) -> bool {
        self.ssh_reachable && self.findings().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(expected: ExpectedState, observed: ObservedState) -> PortCheck {
        PortCheck {
            direction: PortDirection::Outbound,
            target: "archive.ubuntu.com".to_string(),
            port: 443,
            expected,
            observed,
        }
    }

    #[test]
    fn test_closed_satisfied_by_any_non_open_state() {
        assert!(ExpectedState::Closed.satisfied_by(ObservedState::Refused));
        assert!(ExpectedState::Closed.satisfied_by(ObservedState::TimedOut));
        assert!(ExpectedState::Closed.satisfied_by(ObservedState::Unreachable));
        assert!(!ExpectedState::Closed.satisfied_by(ObservedState::Open));
        assert!(ExpectedState::Open.satisfied_by(ObservedState::Open));
        assert!(!ExpectedState::Open.satisfied_by(ObservedState::TimedOut));
    }

    #[test]
    fn test_findings_collects_violations_and_incomplete_checks() {
        let result = VerificationResult {
            ssh_reachable: true,
            connect_attempts: 1,
            password_login: Some(true),
            ports: vec![
                check(ExpectedState::Open, ObservedState::Open),
                check(ExpectedState::Closed, ObservedState::Open),
            ],
            volume_visible: None,
            incomplete: vec![Finding::CheckTimedOut {
                check: "lsblk".to_string(),
                timeout_secs: 60,
            }],
        };

        let findings = result.findings();
        assert_eq!(findings.len(), 2);
        assert!(matches!(
            findings[0],
            Finding::PortPolicyViolation {
                observed: ObservedState::Open,
                ..
            }
        ));
        assert!(!result.passed());
    }

    #[test]
    fn test_unreachable_ssh_never_passes() {
        let result = VerificationResult::default();
        assert!(result.findings().is_empty());
        assert!(!result.passed());
    }

    #[test]
    fn test_finding_serialization_tag() {
        let finding = Finding::ConnectTimeout {
            attempts: 12,
            waited_secs: 300,
        };
        let json = serde_json::to_value(&finding).unwrap();
        assert_eq!(json["kind"], "connect_timeout");
        assert_eq!(json["attempts"], 12);
    }
}
