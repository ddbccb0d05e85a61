//! SSH 错误定义

use thiserror::Error;

/// SSH 操作结果类型
pub type Result<T> = std::result::Result<T, SshError>;

/// SSH 错误类型
#[derive(Error, Debug)]
pub enum SshError {
    /// 连接错误（连接被关闭、协议握手失败等）
    #[error("SSH 连接失败: {0}")]
    ConnectionError(String),

    /// 对端明确拒绝连接
    #[error("SSH 连接被拒绝: {0}")]
    ConnectionRefused(String),

    /// 主机或网络不可达
    #[error("SSH 主机不可达: {0}")]
    HostUnreachable(String),

    /// 认证错误
    #[error("SSH 认证失败: {0}")]
    AuthenticationError(String),

    /// 密钥加载错误
    #[error("SSH 密钥加载失败: {0}")]
    KeyLoadError(String),

    /// 命令执行错误
    #[error("命令执行失败: {0}")]
    ExecutionError(String),

    /// 超时错误
    #[error("SSH 操作超时: {0}")]
    TimeoutError(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),
}

impl SshError {
    /// 是否可能在实例启动完成后自行恢复
    ///
    /// 新开通的实例在 sshd 启动、cloud-init 写入公钥之前，
    /// 会依次表现为不可达、拒绝连接、认证失败。
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SshError::ConnectionError(_)
                | SshError::ConnectionRefused(_)
                | SshError::HostUnreachable(_)
                | SshError::AuthenticationError(_)
                | SshError::TimeoutError(_)
        )
    }
}
