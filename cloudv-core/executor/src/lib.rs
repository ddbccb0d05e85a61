//! CloudV ATP 执行器
//!
//! 按用例依次执行 开通 → 验证 → 销毁：
//! - [`provisioner`] 通过面板网页创建云服务器
//! - [`verifier`] 通过 SSH 和端口探测验证网络策略与数据卷
//! - [`teardown`] 无论前面结果如何都销毁已创建的服务器
//! - [`orchestrator`] 串联以上阶段并生成 [`RunReport`]

pub mod config;
pub mod orchestrator;
pub mod panel;
pub mod provisioner;
pub mod report;
pub mod retry;
pub mod teardown;
pub mod testdata;
pub mod verifier;

pub use config::AcceptanceConfig;
pub use orchestrator::Orchestrator;
pub use panel::PanelSession;
pub use provisioner::{PanelProvisioner, Provisioner, ProvisioningError};
pub use report::{
    JsonLinesRecorder, MemoryRecorder, RunEvent, RunExitStatus, RunRecorder, RunReport,
    RunSummary, Stage,
};
pub use retry::{ExponentialBackoff, LinearBackoff};
pub use teardown::{
    Confirmation, DestroyStatus, PanelDestroyer, ResourceDestroyer, TeardownController,
    TeardownError,
};
pub use testdata::{load_test_cases, parse_test_cases};
pub use verifier::{
    NetworkVerifier, PortPolicy, PortProbe, RemoteSession, SessionConnector, SshConnector,
    TcpProbe, VerificationError, Verifier,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("测试数据错误: {0}")]
    TestDataError(String),

    #[error("浏览器错误: {0}")]
    BrowserError(#[from] cloudv_webdriver::WebDriverError),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    SerdeError(String),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
