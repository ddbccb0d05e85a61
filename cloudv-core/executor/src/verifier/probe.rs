//! 端口探测
//!
//! 入站端口由控制端直接发起 TCP 连接；出站端口在云服务器上通过
//! bash 的 `/dev/tcp` 发起连接，不依赖额外安装的工具。

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use cloudv_common::ObservedState;
use cloudv_ssh_executor::CommandOutput;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// coreutils `timeout` 超时时的退出码
const TIMEOUT_EXIT: u32 = 124;

/// 入站端口探测
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn probe(&self, addr: SocketAddr, limit: Duration) -> ObservedState;
}

/// TCP 连接探测
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

#[async_trait]
impl PortProbe for TcpProbe {
    async fn probe(&self, addr: SocketAddr, limit: Duration) -> ObservedState {
        let state = match timeout(limit, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => ObservedState::Open,
            Ok(Err(e)) => classify_connect_error(&e),
            Err(_) => ObservedState::TimedOut,
        };
        debug!("探测 {}: {}", addr, state);
        state
    }
}

fn classify_connect_error(err: &io::Error) -> ObservedState {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => ObservedState::Refused,
        io::ErrorKind::TimedOut => ObservedState::TimedOut,
        _ => ObservedState::Unreachable,
    }
}

/// 在云服务器上探测外部主机端口的命令
pub fn outbound_command(host: &str, port: u16, limit: Duration) -> String {
    format!(
        "timeout {} bash -c 'exec 3<>/dev/tcp/{}/{}'",
        limit.as_secs().max(1),
        host,
        port
    )
}

/// 根据出站探测命令的结果判断端口状态
pub fn classify_outbound(output: &CommandOutput) -> ObservedState {
    match output.exit_code {
        Some(0) => ObservedState::Open,
        Some(TIMEOUT_EXIT) => ObservedState::TimedOut,
        _ if output.stderr.contains("Connection refused") => ObservedState::Refused,
        _ if output.stderr.contains("timed out") => ObservedState::TimedOut,
        _ => ObservedState::Unreachable,
    }
}
