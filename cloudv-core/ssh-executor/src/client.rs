//! SSH 客户端实现
//!
//! 使用系统 ssh/sshpass 命令执行远程命令，兼容性更好

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::{AuthMethod, SshConfig};
use crate::error::{Result, SshError};

/// ssh 自身出错时的退出码
const SSH_EXIT_ERROR: u32 = 255;
/// sshpass 密码错误的退出码
const SSHPASS_EXIT_BAD_PASSWORD: u32 = 5;

/// 命令执行输出
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// 标准输出
    pub stdout: String,
    /// 标准错误
    pub stderr: String,
    /// 退出码
    pub exit_code: Option<u32>,
}

impl CommandOutput {
    /// 检查命令是否成功执行
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// 获取合并的输出（stdout + stderr）
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// SSH 客户端（使用系统 ssh 命令）
pub struct SshClient {
    config: SshConfig,
}

impl SshClient {
    /// 连接到 SSH 服务器
    ///
    /// 通过执行 `echo connected` 验证连接，返回成功意味着握手和认证都已完成。
    pub async fn connect(config: SshConfig) -> Result<Self> {
        info!("正在连接 SSH: {}@{}", config.username, config.address());

        if let AuthMethod::Key { key_path } = &config.auth {
            let expanded = expand_path(key_path);
            if !expanded.exists() {
                return Err(SshError::KeyLoadError(format!(
                    "私钥文件不存在: {}",
                    expanded.display()
                )));
            }
        }

        let client = Self { config };

        let connect_budget = client.config.connect_timeout + client.config.command_timeout;
        let output = timeout(connect_budget, client.execute_internal("echo connected"))
            .await
            .map_err(|_| {
                SshError::TimeoutError(format!("连接 {} 超时", client.config.address()))
            })??;

        if output.stdout.trim() != "connected" {
            return Err(SshError::ConnectionError(format!(
                "SSH 连接验证失败: {}",
                output.combined_output()
            )));
        }

        info!(
            "SSH 连接成功: {}@{}",
            client.config.username,
            client.config.address()
        );
        Ok(client)
    }

    /// 执行命令
    pub async fn execute(&self, command: &str) -> Result<CommandOutput> {
        debug!("执行命令: {}", command);

        timeout(self.config.command_timeout, self.execute_internal(command))
            .await
            .map_err(|_| SshError::TimeoutError(format!("命令执行超时: {}", command)))?
    }

    /// 执行命令内部实现
    async fn execute_internal(&self, command: &str) -> Result<CommandOutput> {
        let mut cmd = match &self.config.auth {
            AuthMethod::Password(password) => {
                // 使用 sshpass 进行密码认证，并禁止回退到密钥
                let mut cmd = Command::new("sshpass");
                cmd.arg("-p").arg(password);
                cmd.arg("ssh");
                cmd.arg("-o").arg("PubkeyAuthentication=no");
                cmd.arg("-o").arg("PreferredAuthentications=password");
                cmd
            }
            AuthMethod::Key { key_path } => {
                let mut cmd = Command::new("ssh");
                cmd.arg("-i").arg(expand_path(key_path));
                cmd.arg("-o").arg("IdentitiesOnly=yes");
                cmd.arg("-o").arg("BatchMode=yes");
                cmd
            }
        };

        // 通用 SSH 参数：新实例的主机密钥每次都不同
        cmd.arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg("UserKnownHostsFile=/dev/null")
            .arg("-o")
            .arg("LogLevel=ERROR")
            .arg("-o")
            .arg(format!(
                "ConnectTimeout={}",
                self.config.connect_timeout.as_secs().max(1)
            ))
            .arg("-o")
            .arg("NumberOfPasswordPrompts=1")
            .arg("-p")
            .arg(self.config.port.to_string())
            .arg(format!("{}@{}", self.config.username, self.config.host))
            .arg(command);

        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| SshError::ExecutionError(format!("启动 SSH 进程失败: {}", e)))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SshError::ExecutionError(format!("等待 SSH 进程失败: {}", e)))?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            exit_code: output.status.code().map(|c| c as u32),
        };

        if let Some(err) = classify_failure(&result) {
            return Err(err);
        }

        debug!(
            "命令执行完成, 退出码: {:?}, stdout 长度: {}, stderr 长度: {}",
            result.exit_code,
            result.stdout.len(),
            result.stderr.len()
        );

        Ok(result)
    }

    /// 执行命令并检查是否成功
    pub async fn execute_checked(&self, command: &str) -> Result<CommandOutput> {
        let output = self.execute(command).await?;

        if !output.is_success() {
            return Err(SshError::ExecutionError(format!(
                "命令执行失败 (退出码 {:?}): {}",
                output.exit_code,
                if output.stderr.is_empty() {
                    &output.stdout
                } else {
                    &output.stderr
                }
            )));
        }

        Ok(output)
    }

    /// 获取配置
    pub fn config(&self) -> &SshConfig {
        &self.config
    }
}

/// 根据 ssh/sshpass 的退出码和 stderr 判断连接层面的失败
///
/// 远程命令自身的非零退出码不视为错误，由调用方判断。
fn classify_failure(output: &CommandOutput) -> Option<SshError> {
    let stderr = output.stderr.as_str();

    if output.exit_code == Some(SSHPASS_EXIT_BAD_PASSWORD) {
        return Some(SshError::AuthenticationError(stderr.to_string()));
    }

    if output.exit_code != Some(SSH_EXIT_ERROR) {
        return None;
    }

    let detail = stderr.to_string();
    let err = if stderr.contains("Connection refused") {
        SshError::ConnectionRefused(detail)
    } else if stderr.contains("timed out") {
        SshError::TimeoutError(detail)
    } else if stderr.contains("No route to host")
        || stderr.contains("Network is unreachable")
        || stderr.contains("Could not resolve hostname")
        || stderr.contains("Name or service not known")
    {
        SshError::HostUnreachable(detail)
    } else if stderr.contains("Permission denied") || stderr.contains("Authentication failed") {
        SshError::AuthenticationError(detail)
    } else {
        SshError::ConnectionError(detail)
    };

    Some(err)
}

/// 展开路径（处理 ~ 等）
fn expand_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    if path_str.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            let expanded = path_str.replacen('~', &home.to_string_lossy(), 1);
            return PathBuf::from(expanded);
        }
    }
    path.to_path_buf()
}
