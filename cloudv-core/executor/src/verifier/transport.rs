//! SSH 会话抽象

use async_trait::async_trait;
use cloudv_ssh_executor::{CommandOutput, SshClient, SshConfig, SshError};

/// 已认证的远程会话
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// 执行远程命令，远程命令自身的非零退出码不视为错误
    async fn run(&self, command: &str) -> Result<CommandOutput, SshError>;
}

/// 建立远程会话
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// 返回成功意味着握手和认证都已完成
    async fn connect(&self, config: SshConfig) -> Result<Box<dyn RemoteSession>, SshError>;
}

/// 基于系统 ssh 的连接器
#[derive(Debug, Clone, Copy, Default)]
pub struct SshConnector;

#[async_trait]
impl SessionConnector for SshConnector {
    async fn connect(&self, config: SshConfig) -> Result<Box<dyn RemoteSession>, SshError> {
        let client = SshClient::connect(config).await?;
        Ok(Box::new(client))
    }
}

#[async_trait]
impl RemoteSession for SshClient {
    async fn run(&self, command: &str) -> Result<CommandOutput, SshError> {
        self.execute(command).await
    }
}
