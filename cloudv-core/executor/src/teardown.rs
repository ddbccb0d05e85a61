//! 云服务器销毁
//!
//! 销毁是幂等的：已经不存在的服务器视为销毁成功。重试耗尽后以最高级别
//! 记录在 `cloudv::leak` 日志目标上，表示可能仍在计费的资源。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cloudv_common::{ResourceId, TestCase};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::config::TeardownConfig;
use crate::panel::PanelSession;
use crate::retry::LinearBackoff;

/// 资源泄漏日志目标
pub const LEAK_TARGET: &str = "cloudv::leak";

/// 单次销毁请求的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DestroyStatus {
    /// 本次请求销毁了服务器
    Destroyed,
    /// 服务器已不存在
    AlreadyGone,
}

/// 销毁确认
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    pub attempts: u32,
    pub already_destroyed: bool,
}

/// 销毁错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TeardownError {
    #[error("销毁请求失败: {0}")]
    Request(String),

    #[error("销毁请求超时 ({0}s)")]
    Timeout(u64),

    #[error("销毁 {id} 失败, 已尝试 {attempts} 次: {reason}")]
    Exhausted {
        id: ResourceId,
        attempts: u32,
        reason: String,
    },
}

/// 销毁执行者
#[async_trait]
pub trait ResourceDestroyer: Send + Sync {
    /// 销毁服务器，`owner` 是创建它的用例（用于登录所属账号）
    async fn destroy(&self, id: &ResourceId, owner: &TestCase)
        -> Result<DestroyStatus, TeardownError>;
}

/// 销毁控制器
pub struct TeardownController {
    destroyer: Arc<dyn ResourceDestroyer>,
    attempts: u32,
    backoff: LinearBackoff,
    attempt_timeout: Duration,
    confirmed: Mutex<HashSet<ResourceId>>,
}

impl TeardownController {
    pub fn new(destroyer: Arc<dyn ResourceDestroyer>, config: &TeardownConfig) -> Self {
        Self {
            destroyer,
            attempts: config.attempts.max(1),
            backoff: config.backoff(),
            attempt_timeout: config.attempt_timeout,
            confirmed: Mutex::new(HashSet::new()),
        }
    }

    /// 销毁并等待确认
    ///
    /// 已确认销毁过的标识直接返回确认，不再发出请求。
    pub async fn destroy(
        &self,
        id: &ResourceId,
        owner: &TestCase,
    ) -> Result<Confirmation, TeardownError> {
        if self.confirmed.lock().await.contains(id) {
            info!("{} 已确认销毁, 跳过", id);
            return Ok(Confirmation {
                attempts: 0,
                already_destroyed: true,
            });
        }

        let mut last_error = String::new();

        for attempt in 1..=self.attempts {
            info!("销毁 {} (第 {}/{} 次)", id, attempt, self.attempts);

            let outcome = match timeout(self.attempt_timeout, self.destroyer.destroy(id, owner)).await
            {
                Ok(result) => result,
                Err(_) => Err(TeardownError::Timeout(self.attempt_timeout.as_secs())),
            };

            match outcome {
                Ok(status) => {
                    self.confirmed.lock().await.insert(id.clone());
                    let already_destroyed = status == DestroyStatus::AlreadyGone;
                    info!(
                        "{} 销毁已确认{}",
                        id,
                        if already_destroyed { " (已不存在)" } else { "" }
                    );
                    return Ok(Confirmation {
                        attempts: attempt,
                        already_destroyed,
                    });
                }
                Err(e) => {
                    warn!("销毁 {} 失败 (第 {} 次): {}", id, attempt, e);
                    last_error = e.to_string();
                }
            }

            if attempt < self.attempts {
                sleep(self.backoff.delay(attempt)).await;
            }
        }

        error!(
            target: LEAK_TARGET,
            resource = %id,
            account = %owner.account,
            attempts = self.attempts,
            "服务器销毁失败, 可能仍在计费: {}",
            last_error
        );

        Err(TeardownError::Exhausted {
            id: id.clone(),
            attempts: self.attempts,
            reason: last_error,
        })
    }
}

/// 通过面板网页销毁
pub struct PanelDestroyer {
    session: Arc<PanelSession>,
}

impl PanelDestroyer {
    pub fn new(session: Arc<PanelSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl ResourceDestroyer for PanelDestroyer {
    async fn destroy(
        &self,
        id: &ResourceId,
        owner: &TestCase,
    ) -> Result<DestroyStatus, TeardownError> {
        let mut page = self.session.lock().await;
        let request = |e: cloudv_webdriver::WebDriverError| TeardownError::Request(e.to_string());

        page.login(&owner.account, &owner.secret)
            .await
            .map_err(request)?;

        if !page.server_listed(id.as_str()).await.map_err(request)? {
            return Ok(DestroyStatus::AlreadyGone);
        }

        page.destroy(id.as_str()).await.map_err(request)?;
        Ok(DestroyStatus::Destroyed)
    }
}
