//! CloudV ATP 通用类型定义
//!
//! 此 crate 包含执行器、CLI 和报告之间共享的数据模型：
//! - 测试用例 ([`TestCase`])
//! - 已开通的云服务器 ([`ProvisionedResource`])
//! - 网络验证结果 ([`VerificationResult`])
//! - 每个用例的执行结果 ([`CaseOutcome`])

mod outcome;
mod verification;

pub use outcome::{CaseOutcome, FunctionalOutcome, OutcomeTag, TeardownOutcome};
pub use verification::{
    ExpectedState, Finding, ObservedState, PortCheck, PortDirection, VerificationResult,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// 测试用例（测试数据中的一行）
///
/// 读取后不可变，每次开通尝试对应一个用例。
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// 面板登录账号
    #[serde(rename = "user")]
    pub account: String,

    /// 面板登录密码
    #[serde(rename = "user_password")]
    pub secret: String,

    /// 云服务器套餐，例如 "CloudV 0 (1 vCPU, 0.5 GB RAM, 20 GB SSD)"
    #[serde(rename = "cloud_package")]
    pub package: String,

    /// 操作系统镜像名称，例如 "Ubuntu 22.04"
    #[serde(rename = "operating_system")]
    pub os_image: String,
}

impl TestCase {
    pub fn new(
        account: impl Into<String>,
        secret: impl Into<String>,
        package: impl Into<String>,
        os_image: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            secret: secret.into(),
            package: package.into(),
            os_image: os_image.into(),
        }
    }

    /// 日志和报告中使用的简短描述
    pub fn label(&self) -> String {
        format!("{} / {} ({})", self.package, self.os_image, self.account)
    }
}

// 密码不进入日志
impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("account", &self.account)
            .field("secret", &"***")
            .field("package", &self.package)
            .field("os_image", &self.os_image)
            .finish()
    }
}

/// 云服务器标识
///
/// 面板中以主机名定位服务器，主机名在提交创建表单前生成，
/// 因此提交之后即可用于销毁。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 额外数据卷
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// 容量（GB）
    pub size_gb: u32,
}

/// 开通完成的云服务器
///
/// 由开通驱动在创建流程成功后生成，之后不再修改，由销毁控制器销毁。
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedResource {
    /// 服务器标识
    pub id: ResourceId,

    /// 公网 IPv4 地址
    pub ipv4: Ipv4Addr,

    /// 公网 IPv6 地址
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<Ipv6Addr>,

    /// 面板生成的 SSH 用户
    pub ssh_user: String,

    /// 创建时设置的服务器密码
    #[serde(skip)]
    pub password: Option<String>,

    /// 额外数据卷
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeSpec>,
}

impl fmt::Debug for ProvisionedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionedResource")
            .field("id", &self.id)
            .field("ipv4", &self.ipv4)
            .field("ipv6", &self.ipv6)
            .field("ssh_user", &self.ssh_user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("volume", &self.volume)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_column_names() {
        let case = TestCase::new("a@x.com", "i7MnuS*o", "CloudV 0", "Ubuntu 22.04");
        let json = serde_json::to_value(&case).unwrap();
        assert_eq!(json["user"], "a@x.com");
        assert_eq!(json["user_password"], "i7MnuS*o");
        assert_eq!(json["cloud_package"], "CloudV 0");
        assert_eq!(json["operating_system"], "Ubuntu 22.04");
    }

    #[test]
    fn test_case_debug_hides_secret() {
        let case = TestCase::new("a@x.com", "i7MnuS*o", "CloudV 0", "Ubuntu 22.04");
        let debug = format!("{:?}", case);
        assert!(!debug.contains("i7MnuS*o"));
        assert!(debug.contains("a@x.com"));
    }

    #[test]
    fn test_resource_password_not_serialized() {
        let resource = ProvisionedResource {
            id: ResourceId::new("kq3Xh2mL9aZp0Rt"),
            ipv4: "203.0.113.10".parse().unwrap(),
            ipv6: None,
            ssh_user: "ubuntu".to_string(),
            password: Some("SdF23!23^sdf".to_string()),
            volume: Some(VolumeSpec { size_gb: 10 }),
        };
        let json = serde_json::to_string(&resource).unwrap();
        assert!(!json.contains("SdF23"));
        assert!(json.contains("kq3Xh2mL9aZp0Rt"));
        assert!(!format!("{:?}", resource).contains("SdF23"));
    }
}
