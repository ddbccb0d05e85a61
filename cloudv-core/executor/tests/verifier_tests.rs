//! 网络验证测试
//!
//! 使用假的 SSH 连接器和端口探测，不访问网络。

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cloudv_common::{
    ExpectedState, Finding, ObservedState, PortDirection, ProvisionedResource, ResourceId,
    TestCase, VolumeSpec,
};
use cloudv_executor::config::{SshRetryConfig, VerificationConfig};
use cloudv_executor::{
    NetworkVerifier, PortProbe, RemoteSession, SessionConnector, VerificationError, Verifier,
};
use cloudv_ssh_executor::{AuthMethod, CommandOutput, SshConfig, SshError};
use tokio_util::sync::CancellationToken;

const LSBLK: &str = "NAME   SIZE\nvda     20G\n├─vda1 19.9G\nvdb     40G\n";

// ============================================================================
// 测试替身
// ============================================================================

#[derive(Clone, Copy)]
enum ConnectFailure {
    Timeout,
    Refused,
    Auth,
}

impl ConnectFailure {
    fn error(self) -> SshError {
        match self {
            ConnectFailure::Timeout => SshError::TimeoutError("connect timed out".into()),
            ConnectFailure::Refused => SshError::ConnectionRefused("port 22".into()),
            ConnectFailure::Auth => SshError::AuthenticationError("Permission denied".into()),
        }
    }
}

/// 远程服务器：按命令返回预设输出
#[derive(Clone, Default)]
struct FakeHost {
    /// 出站探测 "host:port" -> 退出码，未列出的返回 124
    outbound: HashMap<String, u32>,
    lsblk: String,
}

#[async_trait]
impl RemoteSession for FakeHost {
    async fn run(&self, command: &str) -> Result<CommandOutput, SshError> {
        let output = |stdout: &str, exit_code: u32| CommandOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: Some(exit_code),
        };

        if command.contains("python3") {
            return Ok(output("", 0));
        }
        if command.starts_with("lsblk") {
            return Ok(output(&self.lsblk, 0));
        }
        if let Some(target) = command
            .split("/dev/tcp/")
            .nth(1)
            .map(|rest| rest.trim_end_matches('\'').replace('/', ":"))
        {
            return Ok(output("", self.outbound.get(&target).copied().unwrap_or(124)));
        }
        Err(SshError::ExecutionError(format!("unexpected command: {}", command)))
    }
}

/// 密钥登录前 `key_failures` 次失败，密码登录由 `password_ok` 决定
struct FakeConnector {
    host: FakeHost,
    key_failures: u32,
    failure: ConnectFailure,
    password_ok: bool,
    key_attempts: AtomicU32,
}

impl FakeConnector {
    fn new(host: FakeHost) -> Self {
        Self {
            host,
            key_failures: 0,
            failure: ConnectFailure::Timeout,
            password_ok: true,
            key_attempts: AtomicU32::new(0),
        }
    }

    fn failing(mut self, failures: u32, failure: ConnectFailure) -> Self {
        self.key_failures = failures;
        self.failure = failure;
        self
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(&self, config: SshConfig) -> Result<Box<dyn RemoteSession>, SshError> {
        match config.auth {
            AuthMethod::Key { .. } => {
                let attempt = self.key_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt <= self.key_failures {
                    return Err(self.failure.error());
                }
            }
            AuthMethod::Password(_) if !self.password_ok => {
                return Err(ConnectFailure::Auth.error());
            }
            AuthMethod::Password(_) => {}
        }
        Ok(Box::new(self.host.clone()))
    }
}

/// 入站探测：未列出的端口视为开放
#[derive(Default)]
struct FakeProbe {
    ports: HashMap<u16, ObservedState>,
}

#[async_trait]
impl PortProbe for FakeProbe {
    async fn probe(&self, addr: SocketAddr, _limit: Duration) -> ObservedState {
        self.ports
            .get(&addr.port())
            .copied()
            .unwrap_or(ObservedState::Open)
    }
}

fn healthy_host() -> FakeHost {
    let mut outbound = HashMap::new();
    outbound.insert("archive.ubuntu.com:80".to_string(), 0);
    outbound.insert("archive.ubuntu.com:443".to_string(), 0);
    FakeHost {
        outbound,
        lsblk: LSBLK.to_string(),
    }
}

fn restricted_probe() -> FakeProbe {
    let mut ports = HashMap::new();
    ports.insert(1000, ObservedState::Refused);
    FakeProbe { ports }
}

fn resource() -> ProvisionedResource {
    ProvisionedResource {
        id: ResourceId::new("kq3Xh2mL9aZp0Rt"),
        ipv4: Ipv4Addr::new(203, 0, 113, 10),
        ipv6: None,
        ssh_user: "ubuntu".to_string(),
        password: Some("s3cretPassw0rd".to_string()),
        volume: Some(VolumeSpec { size_gb: 40 }),
    }
}

fn verifier(connector: FakeConnector, probe: FakeProbe) -> (NetworkVerifier, Arc<FakeConnector>) {
    let connector = Arc::new(connector);
    let verifier = NetworkVerifier::new(
        connector.clone(),
        Arc::new(probe),
        "/tmp/private_key",
        SshRetryConfig::default(),
        VerificationConfig::default(),
    );
    (verifier, connector)
}

fn ubuntu_case(package: &str) -> TestCase {
    TestCase::new("a@x.com", "pw", package, "Ubuntu 22.04")
}

// ============================================================================
// 测试
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_happy_path_passes() {
    let (verifier, _) = verifier(FakeConnector::new(healthy_host()), restricted_probe());

    let case = TestCase::new(
        "a@x.com",
        "i7MnuS*o",
        "CloudV 0 (1 vCPU, 0.5 GB RAM, 20 GB SSD)",
        "Ubuntu 22.04",
    );
    let result = verifier
        .verify(&resource(), &case, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.passed(), "findings: {:?}", result.findings());
    assert!(result.ssh_reachable);
    assert_eq!(result.connect_attempts, 1);
    assert_eq!(result.password_login, Some(true));
    assert_eq!(result.volume_visible, Some(true));

    let port_1000 = result
        .ports
        .iter()
        .find(|c| c.direction == PortDirection::Inbound && c.port == 1000)
        .unwrap();
    assert_eq!(port_1000.expected, ExpectedState::Closed);

    let outbound = result
        .ports
        .iter()
        .filter(|c| c.direction == PortDirection::Outbound)
        .count();
    assert_eq!(outbound, 5);
}

#[tokio::test(start_paused = true)]
async fn test_connects_after_boot_delay() {
    let connector = FakeConnector::new(healthy_host()).failing(3, ConnectFailure::Refused);
    let (verifier, connector) = verifier(connector, restricted_probe());

    let result = verifier
        .verify(&resource(), &ubuntu_case("CloudV 0"), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.passed());
    assert_eq!(result.connect_attempts, 4);
    assert_eq!(connector.key_attempts.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_ssh_never_connects_is_timeout() {
    let connector = FakeConnector::new(healthy_host()).failing(u32::MAX, ConnectFailure::Timeout);
    let (verifier, connector) = verifier(connector, FakeProbe::default());

    let err = verifier
        .verify(&resource(), &ubuntu_case("CloudV 1"), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        VerificationError::ConnectTimeout {
            attempts,
            waited_secs,
        } => {
            assert!(attempts > 1);
            assert!(waited_secs <= 300);
            assert_eq!(connector.key_attempts.load(Ordering::SeqCst), attempts);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_persistent_refusal_is_not_timeout() {
    let connector = FakeConnector::new(healthy_host()).failing(u32::MAX, ConnectFailure::Refused);
    let (verifier, _) = verifier(connector, FakeProbe::default());

    let err = verifier
        .verify(&resource(), &ubuntu_case("CloudV 1"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        VerificationError::ConnectionRefused { port: 22, .. }
    ));
    assert!(matches!(err.to_finding(), Finding::ConnectionRefused { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_open_smtp_is_policy_violation() {
    let mut host = healthy_host();
    host.outbound.insert("smtp.mail.yahoo.com:25".to_string(), 0);
    let (verifier, _) = verifier(FakeConnector::new(host), FakeProbe::default());

    let result = verifier
        .verify(&resource(), &ubuntu_case("CloudV 1"), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.passed());
    assert_eq!(
        result.findings(),
        vec![Finding::PortPolicyViolation {
            direction: PortDirection::Outbound,
            target: "smtp.mail.yahoo.com".to_string(),
            port: 25,
            expected: ExpectedState::Closed,
            observed: ObservedState::Open,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_blocked_package_mirror_is_violation() {
    let mut host = healthy_host();
    host.outbound.remove("archive.ubuntu.com:443");
    let (verifier, _) = verifier(FakeConnector::new(host), FakeProbe::default());

    let result = verifier
        .verify(&resource(), &ubuntu_case("CloudV 1"), &CancellationToken::new())
        .await
        .unwrap();

    let findings = result.findings();
    assert_eq!(findings.len(), 1);
    assert!(matches!(
        &findings[0],
        Finding::PortPolicyViolation { port: 443, observed: ObservedState::TimedOut, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_restricted_package_with_open_port_1000_fails() {
    let (verifier, _) = verifier(FakeConnector::new(healthy_host()), FakeProbe::default());

    let result = verifier
        .verify(&resource(), &ubuntu_case("CloudV 0"), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.findings().iter().any(|f| matches!(
        f,
        Finding::PortPolicyViolation {
            direction: PortDirection::Inbound,
            port: 1000,
            expected: ExpectedState::Closed,
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn test_password_login_failure_and_missing_volume() {
    let mut host = healthy_host();
    host.lsblk = "NAME SIZE\nvda 20G\n".to_string();
    let mut connector = FakeConnector::new(host);
    connector.password_ok = false;
    let (verifier, _) = verifier(connector, restricted_probe());

    let result = verifier
        .verify(&resource(), &ubuntu_case("CloudV 0"), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.ssh_reachable);
    assert_eq!(result.password_login, Some(false));
    assert_eq!(result.volume_visible, Some(false));
    let findings = result.findings();
    assert!(findings
        .iter()
        .any(|f| matches!(f, Finding::PasswordLoginFailed { .. })));
    assert!(findings
        .iter()
        .any(|f| matches!(f, Finding::VolumeNotVisible { expected_size_gb: 40 })));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_connect() {
    let connector = FakeConnector::new(healthy_host()).failing(u32::MAX, ConnectFailure::Timeout);
    let (verifier, _) = verifier(connector, FakeProbe::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = verifier
        .verify(&resource(), &ubuntu_case("CloudV 1"), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, VerificationError::Cancelled { .. }));
    assert_eq!(err.to_finding(), Finding::Cancelled);
}
