//! 验收运行配置
//!
//! 支持从多个源加载配置:
//! - 命令行参数 (由 CLI 覆盖，优先级最高)
//! - 环境变量
//! - 配置文件 (TOML/YAML/JSON)
//! - 默认值 (优先级最低)
//!
//! 配置文件搜索路径 (按优先级):
//! 1. `CLOUDV_CONFIG` 环境变量指定的路径
//! 2. `./cloudv.toml` (当前目录)
//! 3. `./config/cloudv.toml`
//! 4. `~/.config/cloudv/cloudv.toml` (用户配置目录)
//! 5. `/etc/cloudv/cloudv.toml` (系统配置目录)

use anyhow::{Context, Result};
use cloudv_webdriver::Browser;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::{ExponentialBackoff, LinearBackoff};

// ============================================
// 核心配置结构
// ============================================

/// 验收配置 (顶层)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcceptanceConfig {
    /// 面板与浏览器
    #[serde(default)]
    pub panel: PanelConfig,

    /// 密钥文件与服务器密码
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// 开通行为
    #[serde(default)]
    pub provisioning: ProvisioningConfig,

    /// SSH 连接与重试
    #[serde(default)]
    pub ssh: SshRetryConfig,

    /// 网络验证
    #[serde(default)]
    pub verification: VerificationConfig,

    /// 销毁
    #[serde(default)]
    pub teardown: TeardownConfig,

    /// 报告输出
    #[serde(default)]
    pub report: ReportConfig,
}

/// 面板配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    /// 面板登录页地址
    #[serde(default = "default_panel_url")]
    pub url: String,

    /// WebDriver 服务地址
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,

    /// 浏览器
    #[serde(default = "default_browser")]
    pub browser: Browser,

    /// 单个页面元素的等待时间
    #[serde(with = "humantime_serde", default = "default_element_timeout")]
    pub element_timeout: Duration,

    /// 提交后等待服务器进入 Active 状态的时间
    #[serde(with = "humantime_serde", default = "default_active_timeout")]
    pub active_timeout: Duration,

    /// 确认销毁后等待服务器从列表消失的时间，须小于 teardown.attempt_timeout
    #[serde(with = "humantime_serde", default = "default_destroy_timeout")]
    pub destroy_timeout: Duration,

    /// 每条浏览器命令前的延迟
    #[serde(with = "humantime_serde", default)]
    pub step_delay: Duration,
}

/// 凭据配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// SSH 私钥 (验证时使用)
    #[serde(default = "default_private_key")]
    pub private_key: PathBuf,

    /// SSH 公钥 (开通时注入)
    #[serde(default = "default_public_key")]
    pub public_key: PathBuf,

    /// 服务器 root 密码，未设置时每台服务器随机生成
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_password: Option<String>,
}

/// 开通配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// 获得服务器标识前的瞬时失败重试次数
    #[serde(default = "default_provision_retries")]
    pub retries: u32,

    /// 重试间隔
    #[serde(with = "humantime_serde", default = "default_provision_retry_delay")]
    pub retry_delay: Duration,

    /// 是否申请额外数据卷
    #[serde(default = "default_true")]
    pub extra_volume: bool,

    /// 详情页读不到 SSH 用户时用于验证的用户名，未设置时跳过验证
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_ssh_user: Option<String>,
}

/// SSH 连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshRetryConfig {
    /// 单次连接超时
    #[serde(with = "humantime_serde", default = "default_ssh_connect_timeout")]
    pub connect_timeout: Duration,

    /// 远程命令超时
    #[serde(with = "humantime_serde", default = "default_ssh_command_timeout")]
    pub command_timeout: Duration,

    /// 退避基数
    #[serde(with = "humantime_serde", default = "default_ssh_retry_base")]
    pub retry_base: Duration,

    /// 退避上限
    #[serde(with = "humantime_serde", default = "default_ssh_retry_cap")]
    pub retry_cap: Duration,

    /// 重试窗口
    #[serde(with = "humantime_serde", default = "default_ssh_retry_window")]
    pub retry_window: Duration,
}

/// 网络验证配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// 单项检查超时
    #[serde(with = "humantime_serde", default = "default_check_timeout")]
    pub check_timeout: Duration,

    /// 单个端口探测超时
    #[serde(with = "humantime_serde", default = "default_probe_timeout")]
    pub probe_timeout: Duration,

    /// 是否验证密码登录
    #[serde(default = "default_true")]
    pub password_login: bool,

    /// 是否验证额外数据卷
    #[serde(default = "default_true")]
    pub volume: bool,

    /// 在服务器上临时监听并从外部探测的端口
    #[serde(default = "default_listener_ports")]
    pub listener_ports: Vec<u16>,

    /// 入站受限的套餐名前缀
    #[serde(default = "default_restricted_package")]
    pub restricted_package: String,

    /// 受限套餐必须关闭的入站端口
    #[serde(default = "default_restricted_port")]
    pub restricted_port: u16,

    /// 出站 SMTP 探测主机
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,

    /// 出站必须关闭的 SMTP 端口
    #[serde(default = "default_smtp_ports")]
    pub smtp_ports: Vec<u16>,

    /// 出站必须开放的包管理器端口
    #[serde(default = "default_package_manager_ports")]
    pub package_manager_ports: Vec<u16>,
}

/// 销毁配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeardownConfig {
    /// 最大尝试次数
    #[serde(default = "default_teardown_attempts")]
    pub attempts: u32,

    /// 线性退避步长
    #[serde(with = "humantime_serde", default = "default_teardown_backoff")]
    pub backoff_step: Duration,

    /// 单次销毁超时
    #[serde(with = "humantime_serde", default = "default_teardown_timeout")]
    pub attempt_timeout: Duration,
}

/// 报告配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// 结构化报告输出路径
    #[serde(default = "default_report_path")]
    pub output: PathBuf,

    /// 执行日志 (JSON Lines，追加写入)
    #[serde(default = "default_execution_log")]
    pub execution_log: PathBuf,
}

// ============================================
// 默认值函数
// ============================================

fn default_panel_url() -> String {
    "https://www.pidginhost.com/panel/account/login".to_string()
}
fn default_webdriver_url() -> String {
    "http://localhost:4444".to_string()
}
fn default_browser() -> Browser {
    Browser::Chrome
}
fn default_element_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_active_timeout() -> Duration {
    Duration::from_secs(600)
}
fn default_destroy_timeout() -> Duration {
    Duration::from_secs(150)
}
fn default_private_key() -> PathBuf {
    PathBuf::from("./keys/private_key")
}
fn default_public_key() -> PathBuf {
    PathBuf::from("./keys/public_key.pub")
}
fn default_provision_retries() -> u32 {
    1
}
fn default_provision_retry_delay() -> Duration {
    Duration::from_secs(5)
}
fn default_true() -> bool {
    true
}
fn default_ssh_connect_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_ssh_command_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_ssh_retry_base() -> Duration {
    Duration::from_secs(5)
}
fn default_ssh_retry_cap() -> Duration {
    Duration::from_secs(30)
}
fn default_ssh_retry_window() -> Duration {
    Duration::from_secs(300)
}
fn default_check_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_listener_ports() -> Vec<u16> {
    vec![80, 443, 1000]
}
fn default_restricted_package() -> String {
    "CloudV 0".to_string()
}
fn default_restricted_port() -> u16 {
    1000
}
fn default_smtp_host() -> String {
    "smtp.mail.yahoo.com".to_string()
}
fn default_smtp_ports() -> Vec<u16> {
    vec![25, 465, 587]
}
fn default_package_manager_ports() -> Vec<u16> {
    vec![80, 443]
}
fn default_teardown_attempts() -> u32 {
    3
}
fn default_teardown_backoff() -> Duration {
    Duration::from_secs(10)
}
fn default_teardown_timeout() -> Duration {
    Duration::from_secs(180)
}
fn default_report_path() -> PathBuf {
    PathBuf::from("cloudv-report.json")
}
fn default_execution_log() -> PathBuf {
    PathBuf::from("cloudv-execution.jsonl")
}

// ============================================
// Default 实现
// ============================================

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            url: default_panel_url(),
            webdriver_url: default_webdriver_url(),
            browser: default_browser(),
            element_timeout: default_element_timeout(),
            active_timeout: default_active_timeout(),
            destroy_timeout: default_destroy_timeout(),
            step_delay: Duration::ZERO,
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            private_key: default_private_key(),
            public_key: default_public_key(),
            server_password: None,
        }
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            retries: default_provision_retries(),
            retry_delay: default_provision_retry_delay(),
            extra_volume: true,
            fallback_ssh_user: None,
        }
    }
}

impl Default for SshRetryConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_ssh_connect_timeout(),
            command_timeout: default_ssh_command_timeout(),
            retry_base: default_ssh_retry_base(),
            retry_cap: default_ssh_retry_cap(),
            retry_window: default_ssh_retry_window(),
        }
    }
}

impl SshRetryConfig {
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.retry_base, self.retry_cap, self.retry_window)
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            check_timeout: default_check_timeout(),
            probe_timeout: default_probe_timeout(),
            password_login: true,
            volume: true,
            listener_ports: default_listener_ports(),
            restricted_package: default_restricted_package(),
            restricted_port: default_restricted_port(),
            smtp_host: default_smtp_host(),
            smtp_ports: default_smtp_ports(),
            package_manager_ports: default_package_manager_ports(),
        }
    }
}

impl Default for TeardownConfig {
    fn default() -> Self {
        Self {
            attempts: default_teardown_attempts(),
            backoff_step: default_teardown_backoff(),
            attempt_timeout: default_teardown_timeout(),
        }
    }
}

impl TeardownConfig {
    pub fn backoff(&self) -> LinearBackoff {
        LinearBackoff::new(self.backoff_step)
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output: default_report_path(),
            execution_log: default_execution_log(),
        }
    }
}

// ============================================
// 配置加载
// ============================================

impl AcceptanceConfig {
    /// 从多个源加载配置 (优先级: 环境变量 > 配置文件 > 默认值)
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_file() {
            Some(path) => {
                tracing::debug!("加载配置文件: {:?}", path);
                Self::load_from_file(&path)?
            }
            None => {
                tracing::debug!("未找到配置文件, 使用默认配置");
                Self::default()
            }
        };

        config.apply_env_vars()?;

        Ok(config)
    }

    /// 从指定文件加载配置 (按扩展名选择格式)
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {:?}", path))?;

        let config = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::from_str(&content)
                .with_context(|| format!("解析 TOML 配置失败: {:?}", path))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("解析 YAML 配置失败: {:?}", path))?,
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("解析 JSON 配置失败: {:?}", path))?,
            _ => anyhow::bail!("不支持的配置文件格式: {:?}", path),
        };

        Ok(config)
    }

    /// 查找配置文件 (按优先级搜索)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(path) = env::var("CLOUDV_CONFIG") {
            let p = PathBuf::from(path);
            if p.exists() {
                return Some(p);
            }
        }

        let mut candidates = vec![
            PathBuf::from("./cloudv.toml"),
            PathBuf::from("./cloudv.yaml"),
            PathBuf::from("./config/cloudv.toml"),
        ];

        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".config/cloudv/cloudv.toml"));
            candidates.push(home.join(".config/cloudv/cloudv.yaml"));
        }

        #[cfg(target_os = "linux")]
        candidates.push(PathBuf::from("/etc/cloudv/cloudv.toml"));

        candidates.into_iter().find(|p| p.exists())
    }

    /// 从环境变量覆盖配置
    fn apply_env_vars(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// 按 `CLOUDV_*` 键覆盖配置，`lookup` 返回键对应的值
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Panel
        if let Some(url) = lookup("CLOUDV_PANEL_URL") {
            self.panel.url = url;
        }
        if let Some(url) = lookup("CLOUDV_WEBDRIVER_URL") {
            self.panel.webdriver_url = url;
        }
        if let Some(browser) = lookup("CLOUDV_BROWSER") {
            self.panel.browser = browser
                .parse()
                .map_err(|e| anyhow::anyhow!("无效的 CLOUDV_BROWSER: {}", e))?;
        }
        if let Some(ms) = lookup("CLOUDV_STEP_DELAY_MS") {
            let ms: u64 = ms.parse().context("无效的 CLOUDV_STEP_DELAY_MS")?;
            self.panel.step_delay = Duration::from_millis(ms);
        }

        // Credentials
        if let Some(path) = lookup("CLOUDV_PRIVATE_KEY") {
            self.credentials.private_key = PathBuf::from(path);
        }
        if let Some(path) = lookup("CLOUDV_PUBLIC_KEY") {
            self.credentials.public_key = PathBuf::from(path);
        }
        if let Some(password) = lookup("CLOUDV_SERVER_PASSWORD") {
            self.credentials.server_password = Some(password);
        }

        // Provisioning
        if let Some(retries) = lookup("CLOUDV_PROVISION_RETRIES") {
            self.provisioning.retries = retries
                .parse()
                .context("无效的 CLOUDV_PROVISION_RETRIES")?;
        }
        if let Some(user) = lookup("CLOUDV_FALLBACK_SSH_USER") {
            self.provisioning.fallback_ssh_user = Some(user);
        }

        // SSH
        if let Some(secs) = lookup("CLOUDV_SSH_RETRY_WINDOW_SECS") {
            let secs: u64 = secs.parse().context("无效的 CLOUDV_SSH_RETRY_WINDOW_SECS")?;
            self.ssh.retry_window = Duration::from_secs(secs);
        }

        // Teardown
        if let Some(attempts) = lookup("CLOUDV_TEARDOWN_ATTEMPTS") {
            self.teardown.attempts = attempts
                .parse()
                .context("无效的 CLOUDV_TEARDOWN_ATTEMPTS")?;
        }

        // Report
        if let Some(path) = lookup("CLOUDV_REPORT") {
            self.report.output = PathBuf::from(path);
        }
        if let Some(path) = lookup("CLOUDV_EXECUTION_LOG") {
            self.report.execution_log = PathBuf::from(path);
        }

        Ok(())
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if self.panel.url.trim().is_empty() {
            anyhow::bail!("panel.url 不能为空");
        }
        if self.panel.webdriver_url.trim().is_empty() {
            anyhow::bail!("panel.webdriver_url 不能为空");
        }
        if self.ssh.retry_window.is_zero() {
            anyhow::bail!("ssh.retry_window 必须大于 0");
        }
        if self.ssh.retry_base.is_zero() {
            anyhow::bail!("ssh.retry_base 必须大于 0");
        }
        if self.ssh.retry_cap < self.ssh.retry_base {
            anyhow::bail!(
                "ssh.retry_cap ({:?}) 不能小于 ssh.retry_base ({:?})",
                self.ssh.retry_cap,
                self.ssh.retry_base
            );
        }
        if self.teardown.attempts == 0 {
            anyhow::bail!("teardown.attempts 至少为 1");
        }
        if self.panel.destroy_timeout >= self.teardown.attempt_timeout {
            anyhow::bail!(
                "panel.destroy_timeout ({:?}) 必须小于 teardown.attempt_timeout ({:?})",
                self.panel.destroy_timeout,
                self.teardown.attempt_timeout
            );
        }
        if self.verification.probe_timeout.is_zero() || self.verification.check_timeout.is_zero() {
            anyhow::bail!("verification 超时必须大于 0");
        }

        Ok(())
    }

    /// 保存配置到文件
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("创建目录失败: {:?}", parent))?;
            }
        }

        let content = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::to_string_pretty(self).context("序列化 TOML 失败")?,
            Some("yaml") | Some("yml") => {
                serde_yaml::to_string(self).context("序列化 YAML 失败")?
            }
            Some("json") => serde_json::to_string_pretty(self).context("序列化 JSON 失败")?,
            _ => anyhow::bail!("不支持的配置文件格式: {:?}", path),
        };

        fs::write(path, content).with_context(|| format!("写入配置文件失败: {:?}", path))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = AcceptanceConfig::default();
        assert_eq!(config.panel.browser, Browser::Chrome);
        assert_eq!(config.provisioning.retries, 1);
        assert_eq!(config.ssh.retry_base, Duration::from_secs(5));
        assert_eq!(config.ssh.retry_cap, Duration::from_secs(30));
        assert_eq!(config.ssh.retry_window, Duration::from_secs(300));
        assert_eq!(config.teardown.attempts, 3);
        assert_eq!(config.verification.listener_ports, vec![80, 443, 1000]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
            [panel]
            url = "https://panel.example.com/login"
            browser = "firefox"
            step_delay = "500ms"

            [ssh]
            retry_window = "2m"
        "#;
        let config: AcceptanceConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.panel.browser, Browser::Firefox);
        assert_eq!(config.panel.step_delay, Duration::from_millis(500));
        assert_eq!(config.ssh.retry_window, Duration::from_secs(120));
        assert_eq!(config.ssh.retry_base, Duration::from_secs(5));
        assert_eq!(config.teardown.attempts, 3);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CLOUDV_BROWSER", "edge"),
            ("CLOUDV_STEP_DELAY_MS", "250"),
            ("CLOUDV_PROVISION_RETRIES", "0"),
            ("CLOUDV_TEARDOWN_ATTEMPTS", "5"),
            ("CLOUDV_FALLBACK_SSH_USER", "root"),
        ]
        .into_iter()
        .collect();

        let mut config = AcceptanceConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.panel.browser, Browser::Edge);
        assert_eq!(config.panel.step_delay, Duration::from_millis(250));
        assert_eq!(config.provisioning.retries, 0);
        assert_eq!(config.teardown.attempts, 5);
        assert_eq!(config.provisioning.fallback_ssh_user.as_deref(), Some("root"));
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = AcceptanceConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "CLOUDV_TEARDOWN_ATTEMPTS").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AcceptanceConfig::default();
        config.panel.url = String::new();
        assert!(config.validate().is_err());

        let mut config = AcceptanceConfig::default();
        config.ssh.retry_window = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = AcceptanceConfig::default();
        config.ssh.retry_cap = Duration::from_secs(1);
        assert!(config.validate().is_err());

        let mut config = AcceptanceConfig::default();
        config.teardown.attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_destroy_wait_fits_teardown_attempt() {
        let config = AcceptanceConfig::default();
        assert!(config.panel.destroy_timeout < config.teardown.attempt_timeout);

        let mut config = AcceptanceConfig::default();
        config.teardown.attempt_timeout = Duration::from_secs(60);
        assert!(config.validate().is_err());

        config.panel.destroy_timeout = Duration::from_secs(45);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloudv.yaml");

        let mut config = AcceptanceConfig::default();
        config.panel.url = "https://panel.example.com/login".to_string();
        config.save_to_file(&path).unwrap();

        let loaded = AcceptanceConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.panel.url, "https://panel.example.com/login");
        assert_eq!(loaded.ssh.retry_window, config.ssh.retry_window);
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(AcceptanceConfig::load_from_file(Path::new("cloudv.ini")).is_err());
    }
}
