//! 网络验证
//!
//! 先在重试窗口内建立 SSH 会话，然后依次检查：
//! 1. 密码登录
//! 2. 入站 SSH 端口 (IPv4/IPv6)
//! 3. 入站临时监听端口
//! 4. 出站端口策略
//! 5. 额外数据卷
//!
//! 连接层面的失败返回 [`VerificationError`]，各项检查的问题记录在
//! [`VerificationResult`] 中。

pub mod policy;
pub mod probe;
pub mod transport;

pub use policy::{OutboundRule, PortPolicy};
pub use probe::{PortProbe, TcpProbe};
pub use transport::{RemoteSession, SessionConnector, SshConnector};

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cloudv_common::{
    ExpectedState, Finding, PortCheck, PortDirection, ProvisionedResource, TestCase,
    VerificationResult,
};
use cloudv_ssh_executor::{CommandOutput, SshConfig, SshError};
use thiserror::Error;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{AcceptanceConfig, SshRetryConfig, VerificationConfig};

const LSBLK_COMMAND: &str = "lsblk -o NAME,SIZE";

/// 临时监听进程，每个端口一个线程，接受连接后立即关闭
const LISTENER_SCRIPT: &str = "import socket,threading
def serve(p):
    s=socket.socket(socket.AF_INET,socket.SOCK_STREAM)
    s.setsockopt(socket.SOL_SOCKET,socket.SO_REUSEADDR,1)
    s.bind(('0.0.0.0',p))
    s.listen(5)
    while True:
        s.accept()[0].close()
for p in PORTS:
    threading.Thread(target=serve,args=(p,),daemon=False).start()";

/// 监听进程启动后等待的时间
const LISTENER_SETTLE: Duration = Duration::from_secs(2);

/// 连接层面的验证错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("SSH 连接超时: {attempts} 次尝试, 等待 {waited_secs}s")]
    ConnectTimeout { attempts: u32, waited_secs: u64 },

    #[error("SSH 连接被拒绝: {host}:{port}")]
    ConnectionRefused { host: String, port: u16, attempts: u32 },

    #[error("主机不可达: {host}: {detail}")]
    HostUnreachable {
        host: String,
        detail: String,
        attempts: u32,
    },

    #[error("SSH 认证失败: {detail}")]
    AuthenticationFailed { detail: String, attempts: u32 },

    #[error("SSH 会话错误: {detail}")]
    Session { detail: String, attempts: u32 },

    #[error("验证被中断")]
    Cancelled { attempts: u32 },
}

impl VerificationError {
    fn from_ssh(err: SshError, config: &SshConfig, attempts: u32, waited: Duration) -> Self {
        match err {
            SshError::TimeoutError(_) | SshError::ConnectionError(_) => {
                VerificationError::ConnectTimeout {
                    attempts,
                    waited_secs: waited.as_secs(),
                }
            }
            SshError::ConnectionRefused(_) => VerificationError::ConnectionRefused {
                host: config.host.clone(),
                port: config.port,
                attempts,
            },
            SshError::HostUnreachable(detail) => VerificationError::HostUnreachable {
                host: config.host.clone(),
                detail,
                attempts,
            },
            SshError::AuthenticationError(detail) => {
                VerificationError::AuthenticationFailed { detail, attempts }
            }
            other => VerificationError::Session {
                detail: other.to_string(),
                attempts,
            },
        }
    }

    /// SSH 连接尝试次数
    pub fn attempts(&self) -> u32 {
        match self {
            VerificationError::ConnectTimeout { attempts, .. }
            | VerificationError::ConnectionRefused { attempts, .. }
            | VerificationError::HostUnreachable { attempts, .. }
            | VerificationError::AuthenticationFailed { attempts, .. }
            | VerificationError::Session { attempts, .. }
            | VerificationError::Cancelled { attempts } => *attempts,
        }
    }

    pub fn to_finding(&self) -> Finding {
        match self {
            VerificationError::ConnectTimeout {
                attempts,
                waited_secs,
            } => Finding::ConnectTimeout {
                attempts: *attempts,
                waited_secs: *waited_secs,
            },
            VerificationError::ConnectionRefused { host, port, .. } => {
                Finding::ConnectionRefused {
                    host: host.clone(),
                    port: *port,
                }
            }
            VerificationError::HostUnreachable { host, detail, .. } => Finding::HostUnreachable {
                host: host.clone(),
                detail: detail.clone(),
            },
            VerificationError::AuthenticationFailed { detail, .. } => {
                Finding::AuthenticationFailed {
                    detail: detail.clone(),
                }
            }
            VerificationError::Session { detail, .. } => Finding::CheckFailed {
                check: "ssh".to_string(),
                detail: detail.clone(),
            },
            VerificationError::Cancelled { .. } => Finding::Cancelled,
        }
    }

    /// 转换为只包含该问题的验证结果
    pub fn into_result(self) -> VerificationResult {
        VerificationResult {
            connect_attempts: self.attempts(),
            incomplete: vec![self.to_finding()],
            ..VerificationResult::default()
        }
    }
}

/// 网络验证器
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(
        &self,
        resource: &ProvisionedResource,
        case: &TestCase,
        cancel: &CancellationToken,
    ) -> Result<VerificationResult, VerificationError>;
}

/// 基于 SSH 和 TCP 探测的验证器
pub struct NetworkVerifier {
    connector: Arc<dyn SessionConnector>,
    probe: Arc<dyn PortProbe>,
    private_key: PathBuf,
    ssh: SshRetryConfig,
    config: VerificationConfig,
}

impl NetworkVerifier {
    pub fn new(
        connector: Arc<dyn SessionConnector>,
        probe: Arc<dyn PortProbe>,
        private_key: impl Into<PathBuf>,
        ssh: SshRetryConfig,
        config: VerificationConfig,
    ) -> Self {
        Self {
            connector,
            probe,
            private_key: private_key.into(),
            ssh,
            config,
        }
    }

    /// 使用系统 ssh 和 TCP 探测
    pub fn from_config(config: &AcceptanceConfig) -> Self {
        Self::new(
            Arc::new(SshConnector),
            Arc::new(TcpProbe),
            config.credentials.private_key.clone(),
            config.ssh.clone(),
            config.verification.clone(),
        )
    }

    fn session_config(&self, config: SshConfig) -> SshConfig {
        config
            .connect_timeout(self.ssh.connect_timeout)
            .command_timeout(self.ssh.command_timeout)
    }

    /// 在重试窗口内以指数退避建立会话
    async fn connect_with_retry(
        &self,
        config: SshConfig,
        cancel: &CancellationToken,
    ) -> Result<(Box<dyn RemoteSession>, u32), VerificationError> {
        let backoff = self.ssh.backoff();
        let attempt_limit = self.ssh.connect_timeout + self.ssh.command_timeout;
        let started = Instant::now();
        let mut attempts = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(VerificationError::Cancelled { attempts });
            }

            attempts += 1;
            debug!("SSH 连接尝试 #{}: {}", attempts, config.address());

            let err = match timeout(attempt_limit, self.connector.connect(config.clone())).await {
                Ok(Ok(session)) => return Ok((session, attempts)),
                Ok(Err(e)) => e,
                Err(_) => SshError::TimeoutError(format!("连接 {} 超时", config.address())),
            };

            let elapsed = started.elapsed();
            let delay = backoff.delay(attempts);
            if !err.is_transient() || !backoff.allows(elapsed, delay) {
                warn!("SSH 连接失败, 不再重试 ({} 次): {}", attempts, err);
                return Err(VerificationError::from_ssh(err, &config, attempts, elapsed));
            }

            warn!(
                "SSH 连接失败 (第 {} 次): {}, {:?} 后重试",
                attempts, err, delay
            );

            tokio::select! {
                _ = sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return Err(VerificationError::Cancelled { attempts });
                }
            }
        }
    }

    /// 在检查超时内执行远程命令
    async fn run_check(
        &self,
        check: &str,
        session: &dyn RemoteSession,
        command: &str,
    ) -> Result<CommandOutput, Finding> {
        self.bounded(check, session.run(command)).await
    }

    async fn bounded<T, F>(&self, check: &str, fut: F) -> Result<T, Finding>
    where
        F: Future<Output = Result<T, SshError>> + Send,
    {
        match timeout(self.config.check_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Finding::CheckFailed {
                check: check.to_string(),
                detail: e.to_string(),
            }),
            Err(_) => Err(Finding::CheckTimedOut {
                check: check.to_string(),
                timeout_secs: self.config.check_timeout.as_secs(),
            }),
        }
    }

    async fn check_password_login(
        &self,
        resource: &ProvisionedResource,
        password: &str,
        result: &mut VerificationResult,
    ) {
        let config = self.session_config(SshConfig::with_password(
            resource.ipv4.to_string(),
            resource.ssh_user.clone(),
            password,
        ));

        match self
            .bounded("password_login", self.connector.connect(config))
            .await
        {
            Ok(_session) => {
                info!("密码登录成功: {}", resource.id);
                result.password_login = Some(true);
            }
            Err(Finding::CheckFailed { detail, .. }) => {
                warn!("密码登录失败: {}: {}", resource.id, detail);
                result.password_login = Some(false);
                result.incomplete.push(Finding::PasswordLoginFailed { detail });
            }
            Err(finding) => result.incomplete.push(finding),
        }
    }

    async fn check_inbound_ssh(&self, resource: &ProvisionedResource, result: &mut VerificationResult) {
        let mut addrs = vec![IpAddr::V4(resource.ipv4)];
        addrs.extend(resource.ipv6.map(IpAddr::V6));

        for ip in addrs {
            let observed = self
                .probe
                .probe(SocketAddr::new(ip, policy::SSH_PORT), self.config.probe_timeout)
                .await;
            result.ports.push(PortCheck {
                direction: PortDirection::Inbound,
                target: ip.to_string(),
                port: policy::SSH_PORT,
                expected: ExpectedState::Open,
                observed,
            });
        }
    }

    async fn check_listeners(
        &self,
        resource: &ProvisionedResource,
        session: &dyn RemoteSession,
        listeners: &[(u16, ExpectedState)],
        result: &mut VerificationResult,
    ) {
        let ports: Vec<u16> = listeners.iter().map(|(port, _)| *port).collect();
        if let Err(finding) = self
            .run_check("inbound_listeners", session, &listener_command(&ports))
            .await
        {
            result.incomplete.push(finding);
            return;
        }

        sleep(LISTENER_SETTLE).await;

        for &(port, expected) in listeners {
            let observed = self
                .probe
                .probe(
                    SocketAddr::new(IpAddr::V4(resource.ipv4), port),
                    self.config.probe_timeout,
                )
                .await;
            result.ports.push(PortCheck {
                direction: PortDirection::Inbound,
                target: resource.ipv4.to_string(),
                port,
                expected,
                observed,
            });
        }
    }

    async fn check_outbound(
        &self,
        session: &dyn RemoteSession,
        rules: &[OutboundRule],
        result: &mut VerificationResult,
    ) {
        for rule in rules {
            let check = format!("outbound {}:{}", rule.host, rule.port);
            let command = probe::outbound_command(&rule.host, rule.port, self.config.probe_timeout);
            match self.run_check(&check, session, &command).await {
                Ok(output) => result.ports.push(PortCheck {
                    direction: PortDirection::Outbound,
                    target: rule.host.clone(),
                    port: rule.port,
                    expected: rule.expected,
                    observed: probe::classify_outbound(&output),
                }),
                Err(finding) => result.incomplete.push(finding),
            }
        }
    }

    async fn check_volume(
        &self,
        session: &dyn RemoteSession,
        size_gb: u32,
        result: &mut VerificationResult,
    ) {
        match self.run_check("volume", session, LSBLK_COMMAND).await {
            Ok(output) => {
                let visible = volume_listed(&output.stdout, size_gb);
                result.volume_visible = Some(visible);
                if !visible {
                    result.incomplete.push(Finding::VolumeNotVisible {
                        expected_size_gb: size_gb,
                    });
                }
            }
            Err(finding) => result.incomplete.push(finding),
        }
    }
}

#[async_trait]
impl Verifier for NetworkVerifier {
    async fn verify(
        &self,
        resource: &ProvisionedResource,
        case: &TestCase,
        cancel: &CancellationToken,
    ) -> Result<VerificationResult, VerificationError> {
        info!("开始验证: {} ({})", resource.id, resource.ipv4);

        let key_config = self.session_config(SshConfig::with_key(
            resource.ipv4.to_string(),
            resource.ssh_user.clone(),
            self.private_key.clone(),
        ));
        let (session, attempts) = self.connect_with_retry(key_config, cancel).await?;
        info!("SSH 密钥登录成功: {} ({} 次尝试)", resource.id, attempts);

        let mut result = VerificationResult {
            ssh_reachable: true,
            connect_attempts: attempts,
            ..VerificationResult::default()
        };

        if self.config.password_login {
            if let Some(password) = resource.password.as_deref() {
                self.check_password_login(resource, password, &mut result)
                    .await;
            }
        }

        self.check_inbound_ssh(resource, &mut result).await;

        let policy = PortPolicy::for_case(&case.package, &case.os_image, &self.config);

        if !policy.listeners.is_empty() {
            if cancel.is_cancelled() {
                result.incomplete.push(Finding::Cancelled);
                return Ok(result);
            }
            self.check_listeners(resource, session.as_ref(), &policy.listeners, &mut result)
                .await;
        }

        if cancel.is_cancelled() {
            result.incomplete.push(Finding::Cancelled);
            return Ok(result);
        }
        self.check_outbound(session.as_ref(), &policy.outbound, &mut result)
            .await;

        if self.config.volume {
            if let Some(volume) = resource.volume {
                self.check_volume(session.as_ref(), volume.size_gb, &mut result)
                    .await;
            }
        }

        let findings = result.findings();
        if findings.is_empty() {
            info!("验证通过: {}", resource.id);
        } else {
            for finding in &findings {
                warn!("{}: {}", resource.id, finding);
            }
        }

        Ok(result)
    }
}

/// 后台启动监听进程的命令，非 root 用户通过 sudo 绑定低端口
fn listener_command(ports: &[u16]) -> String {
    let ports = ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let script = LISTENER_SCRIPT.replace("PORTS", &format!("[{}]", ports));
    format!(
        "if [ \"$(id -u)\" -eq 0 ]; then S=; else S='sudo -n'; fi; \
         $S nohup python3 -c \"{}\" > /dev/null 2>&1 &",
        script
    )
}

/// `lsblk -o NAME,SIZE` 输出中是否有指定容量的 vd* 磁盘
pub fn volume_listed(lsblk: &str, size_gb: u32) -> bool {
    let expected = format!("{}G", size_gb);
    lsblk.lines().any(|line| {
        let parts: Vec<&str> = line.split_whitespace().collect();
        parts.len() == 2 && parts[0].starts_with("vd") && parts[1] == expected
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LSBLK: &str = "\
NAME    SIZE
vda      20G
├─vda1 19.9G
└─vda15  106M
vdb      40G
";

    #[test]
    fn test_volume_listed() {
        assert!(volume_listed(LSBLK, 40));
        assert!(volume_listed(LSBLK, 20));
        assert!(!volume_listed(LSBLK, 50));
        assert!(!volume_listed("", 40));
    }

    #[test]
    fn test_listener_command() {
        let command = listener_command(&[80, 443, 1000]);
        assert!(command.contains("for p in [80,443,1000]:"));
        assert!(command.contains("sudo -n"));
        assert!(command.ends_with('&'));
    }

    #[test]
    fn test_error_to_finding() {
        let refused = VerificationError::ConnectionRefused {
            host: "203.0.113.10".into(),
            port: 22,
            attempts: 3,
        };
        assert_eq!(refused.attempts(), 3);
        assert_eq!(
            refused.to_finding(),
            Finding::ConnectionRefused {
                host: "203.0.113.10".into(),
                port: 22
            }
        );

        let result = VerificationError::ConnectTimeout {
            attempts: 9,
            waited_secs: 300,
        }
        .into_result();
        assert!(!result.ssh_reachable);
        assert_eq!(result.connect_attempts, 9);
        assert!(!result.passed());
    }

    #[test]
    fn test_from_ssh_distinguishes_timeout_and_refusal() {
        let config = SshConfig::with_key("203.0.113.10", "ubuntu", "/tmp/key");
        let timeout = VerificationError::from_ssh(
            SshError::TimeoutError("x".into()),
            &config,
            4,
            Duration::from_secs(61),
        );
        assert_eq!(
            timeout,
            VerificationError::ConnectTimeout {
                attempts: 4,
                waited_secs: 61
            }
        );

        let refused =
            VerificationError::from_ssh(SshError::ConnectionRefused("x".into()), &config, 4, Duration::ZERO);
        assert!(matches!(refused, VerificationError::ConnectionRefused { port: 22, .. }));
    }
}
