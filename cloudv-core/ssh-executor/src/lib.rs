//! CloudV SSH 执行器
//!
//! 提供 SSH 远程命令执行能力，支持：
//! - SSH 密钥认证（开通时注入的公钥对应的私钥）
//! - 密码认证（开通时设置的服务器密码）
//! - 命令执行、退出码和输出捕获
//! - 连接失败分类（拒绝 / 不可达 / 超时 / 认证失败）
//!
//! # 示例
//!
//! ```ignore
//! use cloudv_ssh_executor::{SshClient, SshConfig};
//!
//! let config = SshConfig::with_key("203.0.113.10", "ubuntu", "~/.ssh/cloudv_ed25519");
//! let client = SshClient::connect(config).await?;
//! let output = client.execute("lsblk -dn -o NAME,SIZE").await?;
//! println!("{}", output.stdout);
//! ```

mod client;
mod config;
mod error;

pub use client::{CommandOutput, SshClient};
pub use config::{AuthMethod, SshConfig};
pub use error::{Result, SshError};
