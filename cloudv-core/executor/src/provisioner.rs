//! 云服务器开通
//!
//! 主机名在填写表单时随机生成并作为服务器标识。提交之后的任何失败都返回
//! [`ProvisioningError::Partial`]，调用方据此仍然执行销毁；已读到地址和用户时
//! 还会附带部分资源，调用方据此执行验证。

use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use cloudv_common::{ProvisionedResource, ResourceId, TestCase, VolumeSpec};
use cloudv_webdriver::WebDriverError;
use rand::distributions::Alphanumeric;
use rand::Rng;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::AcceptanceConfig;
use crate::panel::PanelSession;
use crate::{ExecutorError, Result};

/// 主机名长度
pub const HOSTNAME_LEN: usize = 15;

const PASSWORD_LEN: usize = 16;

/// 开通错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningError {
    /// 获得服务器标识之前失败，没有创建任何资源
    #[error("开通失败: {reason}")]
    BeforeIdentity {
        reason: String,
        /// 页面时序类失败，可以重试
        transient: bool,
    },

    /// 已获得服务器标识，后续界面步骤失败
    #[error("开通部分失败 ({id}): {reason}")]
    Partial {
        id: ResourceId,
        reason: String,
        /// 已读到 IPv4 和 SSH 用户时可用于验证的资源
        resource: Option<Box<ProvisionedResource>>,
    },
}

impl ProvisioningError {
    fn before_identity(err: WebDriverError) -> Self {
        ProvisioningError::BeforeIdentity {
            transient: err.is_timing(),
            reason: err.to_string(),
        }
    }

    /// 已获得的服务器标识
    pub fn identity(&self) -> Option<&ResourceId> {
        match self {
            ProvisioningError::Partial { id, .. } => Some(id),
            ProvisioningError::BeforeIdentity { .. } => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProvisioningError::BeforeIdentity {
                transient: true,
                ..
            }
        )
    }
}

/// 开通驱动
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// 为用例创建一台云服务器
    async fn provision(
        &self,
        case: &TestCase,
    ) -> std::result::Result<ProvisionedResource, ProvisioningError>;
}

/// 通过面板网页开通
pub struct PanelProvisioner {
    session: Arc<PanelSession>,
    public_key: String,
    server_password: Option<String>,
    extra_volume: bool,
    fallback_ssh_user: Option<String>,
}

impl PanelProvisioner {
    pub fn new(
        session: Arc<PanelSession>,
        public_key: impl Into<String>,
        server_password: Option<String>,
        extra_volume: bool,
    ) -> Self {
        Self {
            session,
            public_key: public_key.into(),
            server_password,
            extra_volume,
            fallback_ssh_user: None,
        }
    }

    /// 详情页读不到 SSH 用户时使用的用户名
    pub fn with_fallback_ssh_user(mut self, user: Option<String>) -> Self {
        self.fallback_ssh_user = user;
        self
    }

    /// 按配置创建，公钥文件内容原样注入
    pub fn from_config(session: Arc<PanelSession>, config: &AcceptanceConfig) -> Result<Self> {
        let public_key = read_public_key(&config.credentials.public_key)?;
        Ok(Self::new(
            session,
            public_key,
            config.credentials.server_password.clone(),
            config.provisioning.extra_volume,
        )
        .with_fallback_ssh_user(config.provisioning.fallback_ssh_user.clone()))
    }
}

#[async_trait]
impl Provisioner for PanelProvisioner {
    async fn provision(
        &self,
        case: &TestCase,
    ) -> std::result::Result<ProvisionedResource, ProvisioningError> {
        let mut page = self.session.lock().await;
        let before = ProvisioningError::before_identity;

        page.login(&case.account, &case.secret)
            .await
            .map_err(before)?;
        page.open_cloud().await.map_err(before)?;
        page.open_create_form().await.map_err(before)?;
        page.select_package(&case.package).await.map_err(before)?;
        page.select_os(&case.os_image).await.map_err(before)?;

        let hostname = generate_hostname(&mut rand::thread_rng(), HOSTNAME_LEN);
        info!("生成主机名: {}", hostname);
        page.set_hostname(&hostname).await.map_err(before)?;
        page.set_public_key(&self.public_key)
            .await
            .map_err(before)?;

        let password = self
            .server_password
            .clone()
            .unwrap_or_else(|| generate_password(&mut rand::thread_rng(), PASSWORD_LEN));
        page.set_password(&password).await.map_err(before)?;
        page.enable_public_interface().await.map_err(before)?;
        page.enable_ip_addresses().await.map_err(before)?;

        let volume = if self.extra_volume {
            let size_gb = page.enable_extra_volume().await.map_err(before)?;
            Some(VolumeSpec { size_gb })
        } else {
            None
        };

        // 从点击提交开始服务器可能已经存在
        let id = ResourceId::new(hostname.clone());
        let partial = |err: WebDriverError| ProvisioningError::Partial {
            id: id.clone(),
            reason: err.to_string(),
            resource: None,
        };

        page.submit().await.map_err(partial)?;
        page.wait_active().await.map_err(partial)?;

        let shown = page.read_hostname().await.map_err(partial)?;
        if shown != hostname {
            return Err(ProvisioningError::Partial {
                id,
                reason: format!("列表中的主机名不符: 期望 {}, 实际 {}", hostname, shown),
                resource: None,
            });
        }

        page.open_details().await.map_err(partial)?;
        let ipv4 = page.read_ipv4().await.map_err(partial)?;
        let ipv6 = match page.read_ipv6().await {
            Ok(addr) => addr,
            Err(e) => {
                warn!("读取 IPv6 地址失败: {}", e);
                None
            }
        };
        let ssh_user = match page.read_ssh_user().await {
            Ok(user) => user,
            Err(e) => {
                return Err(partial_after_details(
                    ProvisionedResource {
                        id,
                        ipv4,
                        ipv6,
                        ssh_user: String::new(),
                        password: Some(password),
                        volume,
                    },
                    self.fallback_ssh_user.as_deref(),
                    e,
                ))
            }
        };

        info!(
            "服务器已开通: {} ({}@{}{})",
            id,
            ssh_user,
            ipv4,
            ipv6.map(|a| format!(", {}", a)).unwrap_or_default()
        );

        Ok(ProvisionedResource {
            id,
            ipv4,
            ipv6,
            ssh_user,
            password: Some(password),
            volume,
        })
    }
}

/// 详情页读到地址后失败：有备用用户时附带资源以便继续验证
fn partial_after_details(
    mut resource: ProvisionedResource,
    fallback_user: Option<&str>,
    err: WebDriverError,
) -> ProvisioningError {
    let reason = format!("读取 SSH 用户失败: {}", err);
    let id = resource.id.clone();
    let resource = fallback_user.map(|user| {
        warn!("{}, 使用备用用户 {} 继续验证", reason, user);
        resource.ssh_user = user.to_string();
        Box::new(resource)
    });
    ProvisioningError::Partial {
        id,
        reason,
        resource,
    }
}

/// 读取公钥文件
pub fn read_public_key(path: &Path) -> Result<String> {
    let key = fs::read_to_string(path).map_err(|e| {
        ExecutorError::ConfigError(format!("读取公钥失败 {:?}: {}", path, e))
    })?;
    let key = key.trim().to_string();
    if key.is_empty() {
        return Err(ExecutorError::ConfigError(format!("公钥文件为空: {:?}", path)));
    }
    Ok(key)
}

/// 随机主机名：首字符为字母，其余为字母或数字
pub fn generate_hostname<R: Rng>(rng: &mut R, len: usize) -> String {
    const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

    let mut hostname = String::with_capacity(len);
    hostname.push(LETTERS[rng.gen_range(0..LETTERS.len())] as char);
    hostname.extend(
        (&mut *rng)
            .sample_iter(&Alphanumeric)
            .take(len.saturating_sub(1))
            .map(char::from),
    );
    hostname
}

/// 随机服务器密码，包含大小写字母、数字和符号
fn generate_password<R: Rng>(rng: &mut R, len: usize) -> String {
    const SYMBOLS: &[u8] = b"!#^*-_";

    let mut password: String = (&mut *rng)
        .sample_iter(&Alphanumeric)
        .take(len.saturating_sub(4))
        .map(char::from)
        .collect();
    password.push(rng.gen_range(b'A'..=b'Z') as char);
    password.push(rng.gen_range(b'a'..=b'z') as char);
    password.push(rng.gen_range(b'0'..=b'9') as char);
    password.push(SYMBOLS[rng.gen_range(0..SYMBOLS.len())] as char);
    password
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_hostname_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let hostname = generate_hostname(&mut rng, HOSTNAME_LEN);
            assert_eq!(hostname.len(), HOSTNAME_LEN);
            assert!(hostname.chars().next().unwrap().is_ascii_alphabetic());
            assert!(hostname.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_single_char_hostname() {
        let mut rng = StdRng::seed_from_u64(1);
        let hostname = generate_hostname(&mut rng, 1);
        assert_eq!(hostname.len(), 1);
        assert!(hostname.chars().all(|c| c.is_ascii_alphabetic()));
    }

    #[test]
    fn test_password_complexity() {
        let mut rng = StdRng::seed_from_u64(3);
        let password = generate_password(&mut rng, PASSWORD_LEN);
        assert_eq!(password.len(), PASSWORD_LEN);
        assert!(password.chars().any(|c| c.is_ascii_uppercase()));
        assert!(password.chars().any(|c| c.is_ascii_lowercase()));
        assert!(password.chars().any(|c| c.is_ascii_digit()));
        assert!(password.chars().any(|c| !c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_error_identity() {
        let before = ProvisioningError::before_identity(WebDriverError::Timeout("x".into()));
        assert!(before.identity().is_none());
        assert!(before.is_transient());

        let fatal = ProvisioningError::before_identity(WebDriverError::SessionError("x".into()));
        assert!(!fatal.is_transient());

        let partial = ProvisioningError::Partial {
            id: ResourceId::new("kq3Xh2mL9aZp0Rt"),
            reason: "timeout".into(),
            resource: None,
        };
        assert_eq!(partial.identity().map(|id| id.as_str()), Some("kq3Xh2mL9aZp0Rt"));
        assert!(!partial.is_transient());
    }

    fn read_back(id: &str) -> ProvisionedResource {
        ProvisionedResource {
            id: ResourceId::new(id),
            ipv4: "203.0.113.10".parse().unwrap(),
            ipv6: None,
            ssh_user: String::new(),
            password: Some("pw".to_string()),
            volume: Some(VolumeSpec { size_gb: 20 }),
        }
    }

    #[test]
    fn test_missing_ssh_user_keeps_address_with_fallback() {
        let err = partial_after_details(
            read_back("kq3Xh2mL9aZp0Rt"),
            Some("root"),
            WebDriverError::Timeout("user span".into()),
        );

        let ProvisioningError::Partial { id, resource, .. } = err else {
            panic!("expected partial provisioning");
        };
        assert_eq!(id.as_str(), "kq3Xh2mL9aZp0Rt");
        let resource = resource.expect("resource kept for verification");
        assert_eq!(resource.ssh_user, "root");
        assert_eq!(resource.ipv4.to_string(), "203.0.113.10");
        assert_eq!(resource.volume, Some(VolumeSpec { size_gb: 20 }));
    }

    #[test]
    fn test_missing_ssh_user_without_fallback() {
        let err = partial_after_details(
            read_back("kq3Xh2mL9aZp0Rt"),
            None,
            WebDriverError::Timeout("user span".into()),
        );

        assert_eq!(err.identity().map(|id| id.as_str()), Some("kq3Xh2mL9aZp0Rt"));
        assert!(matches!(err, ProvisioningError::Partial { resource: None, .. }));
    }

    #[test]
    fn test_read_public_key_trims() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.pub");
        fs::write(&path, "ssh-ed25519 AAAAC3Nza cloudv\n").unwrap();
        assert_eq!(read_public_key(&path).unwrap(), "ssh-ed25519 AAAAC3Nza cloudv");

        fs::write(&path, "\n").unwrap();
        assert!(read_public_key(&path).is_err());
    }
}
