//! 端口策略
//!
//! - 入站：SSH 端口必须开放；临时监听端口在受限套餐上只允许部分开放
//! - 出站：apt 系发行版只允许包管理器端口，SMTP 必须关闭

use cloudv_common::ExpectedState;
use serde::{Deserialize, Serialize};

use crate::config::VerificationConfig;

pub const SSH_PORT: u16 = 22;

/// 出站探测规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundRule {
    pub host: String,
    pub port: u16,
    pub expected: ExpectedState,
}

/// 用例适用的端口策略
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortPolicy {
    /// 临时监听端口及期望状态
    pub listeners: Vec<(u16, ExpectedState)>,
    /// 出站探测
    pub outbound: Vec<OutboundRule>,
}

impl PortPolicy {
    /// 按套餐和操作系统生成策略
    pub fn for_case(package: &str, os_image: &str, config: &VerificationConfig) -> Self {
        let restricted = package.contains(&config.restricted_package);

        let listeners = config
            .listener_ports
            .iter()
            .map(|&port| {
                let expected = if restricted && port == config.restricted_port {
                    ExpectedState::Closed
                } else {
                    ExpectedState::Open
                };
                (port, expected)
            })
            .collect();

        let mut outbound = Vec::new();
        if let Some(mirror) = package_mirror(os_image) {
            outbound.extend(config.package_manager_ports.iter().map(|&port| OutboundRule {
                host: mirror.to_string(),
                port,
                expected: ExpectedState::Open,
            }));
            outbound.extend(config.smtp_ports.iter().map(|&port| OutboundRule {
                host: config.smtp_host.clone(),
                port,
                expected: ExpectedState::Closed,
            }));
        }

        Self {
            listeners,
            outbound,
        }
    }
}

/// apt 系发行版的软件源主机，其他系统不做出站检查
fn package_mirror(os_image: &str) -> Option<&'static str> {
    let os = os_image.to_lowercase();
    if os.starts_with("ubuntu") {
        Some("archive.ubuntu.com")
    } else if os.starts_with("debian") {
        Some("deb.debian.org")
    } else {
        None
    }
}
