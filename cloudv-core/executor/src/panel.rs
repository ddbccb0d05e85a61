//! 面板会话与页面操作
//!
//! 一个运行只有一个浏览器会话，开通和销毁共用。
//! [`PanelSession::lock`] 返回的 [`PanelPage`] 独占会话，保证同一时刻只有一个阶段在操作面板。

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use cloudv_webdriver::{
    Browser, ElementRef, Locator, Result, WebDriverClient, WebDriverConfig, WebDriverError,
};
use regex::Regex;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::config::PanelConfig;

/// 页面元素定位
pub mod locators {
    // 登录
    pub const EMAIL_INPUT: &str = "//input[@name='email']";
    pub const EMAIL_NEXT: &str = "//button[text()='Log in / Sign up']";
    pub const PASSWORD_INPUT: &str = r#"//input[contains(@name, "password") and contains(@type, "password") and contains(@class, "form-control")]"#;
    pub const LOGIN_SUBMIT: &str = r#"//button[contains(@type, "submit") and contains(text(), "Login")]"#;
    pub const WELCOME_HEADING: &str = r#"//h2[@class="mb-0"]"#;
    pub const WELCOME_TEXT: &str = "Welcome to your account.";

    // 云服务器列表
    pub const CLOUD_NAV: &str = r#"//a[@href="/panel/cloud/"]"#;
    pub const CLOUD_HEADING: &str = r#"//h2[contains(@class, "mb-0") and contains(@class, "ms-3")]"#;
    pub const CLOUD_TEXT: &str = "Cloud";
    pub const ADD_NEW_SERVER: &str = r#"//a[@id="add_server_btn"]"#;
    pub const SERVER_TABLE: &str = ".table.table-striped";
    pub const ACTIVE_ITEM: &str = r#"//span[normalize-space()="Active"]"#;
    pub const DETAILS_LINK: &str = r#"//a[normalize-space()="Details"]"#;
    pub const DESTROY_CONFIRM: &str = r#"//button[normalize-space()="Destroy"]"#;

    // 创建表单
    pub const PACKAGE_DROPDOWN: &str = r#"//span[@id="select2-id_product-container"]"#;
    pub const PACKAGE_SEARCH: &str = r#"//input[@aria-controls="select2-id_product-results"]"#;
    pub const ADVANCED_OPTIONS: &str = r##"//button[@data-bs-target="#advanced-options"]"##;
    pub const OS_DROPDOWN: &str = r#"//span[@id="select2-id_os-container"]"#;
    pub const OS_SEARCH: &str = r#"//input[@aria-controls="select2-id_os-results"]"#;
    pub const HOSTNAME_INPUT: &str = r#"//input[@id="id_hostname"]"#;
    pub const PUBLIC_KEY_INPUT: &str = r#"//textarea[@id="id_ssh_pub_key"]"#;
    pub const SERVER_PASSWORD_INPUT: &str = r#"//input[@id="id_password"]"#;
    pub const PUBLIC_INTERFACE: &str = r#"//input[@id="id_public_interface"]"#;
    pub const IPV4_LABEL: &str = "//label[normalize-space()='IPv4 Address']";
    pub const IPV6_LABEL: &str = "//label[normalize-space()='IPv6 Address']";
    pub const EXTRA_VOLUME: &str = "//input[@id='id_extra_volume']";
    pub const VOLUME_SLIDER: &str = "//input[@id='sizeInput']";
    pub const VOLUME_SIZE: &str = "//span[@id='sizeValue']";
    pub const SUBMIT_SERVER: &str = r#"//button[text()="Add server"]"#;

    // 详情页
    pub const ACTIVE_BADGE: &str = r#"//span[contains(@class, "bg-success") and contains(text(), "ACTIVE")]"#;
    pub const SSH_USER: &str = "//span[@data-bs-toggle='popover']";
    pub const HOSTNAME_CELL: &str = r#"//td[strong[normalize-space()="Hostname"]]"#;

    /// 下拉框中文本完全匹配的选项
    pub fn option(text: &str) -> String {
        format!(r#"//li[text()="{}"]"#, text)
    }

    /// 列表中包含主机名的单元格
    pub fn server_row(hostname: &str) -> String {
        format!(r#"//td[contains(normalize-space(.), "{}")]"#, hostname)
    }

    /// 与主机名同属一个服务器条目的 Destroy 按钮
    pub fn destroy_link(hostname: &str) -> String {
        format!(
            r#"//td[contains(normalize-space(.), "{}")]/ancestor::*[.//a[normalize-space()="Destroy"]][1]//a[normalize-space()="Destroy"]"#,
            hostname
        )
    }
}

const IPV4_SPAN: &str = r"<span[^>]*>\s*((?:[0-9]{1,3}\.){3}[0-9]{1,3})\s*</span>";
const IPV6_SPAN: &str = r"<span[^>]*>\s*([a-f0-9:]+:[a-f0-9:]+)\s*</span>";

/// 面板浏览器会话
pub struct PanelSession {
    page: Mutex<PanelPage>,
}

impl PanelSession {
    /// 按配置创建会话（浏览器在首次登录时启动）
    pub fn new(config: &PanelConfig) -> Result<Self> {
        let driver = WebDriverClient::new(
            &config.webdriver_url,
            WebDriverConfig {
                poll_interval_ms: 250,
                step_delay_ms: config.step_delay.as_millis() as u64,
                ..WebDriverConfig::default()
            },
        )?;

        Ok(Self {
            page: Mutex::new(PanelPage {
                driver,
                url: config.url.clone(),
                browser: config.browser,
                element_timeout: config.element_timeout,
                active_timeout: config.active_timeout,
                destroy_timeout: config.destroy_timeout,
                logged_in_as: None,
            }),
        })
    }

    /// 独占面板
    pub async fn lock(&self) -> MutexGuard<'_, PanelPage> {
        self.page.lock().await
    }

    /// 关闭浏览器
    pub async fn close(&self) -> Result<()> {
        let mut page = self.page.lock().await;
        page.logged_in_as = None;
        page.driver.end_session().await
    }
}

/// 面板页面操作
pub struct PanelPage {
    driver: WebDriverClient,
    url: String,
    browser: Browser,
    element_timeout: Duration,
    active_timeout: Duration,
    destroy_timeout: Duration,
    logged_in_as: Option<String>,
}

impl PanelPage {
    /// 以指定账号登录，已登录同一账号时跳过
    pub async fn login(&mut self, account: &str, secret: &str) -> Result<()> {
        if self.logged_in_as.as_deref() == Some(account) {
            debug!("已登录: {}", account);
            return Ok(());
        }

        // 切换账号时重建会话以清空 cookie
        if self.driver.has_session().await {
            self.driver.end_session().await?;
        }
        self.logged_in_as = None;

        self.driver.start_session(self.browser).await?;
        self.driver.maximize_window().await?;
        self.driver.navigate(&self.url).await?;

        info!("登录面板: {}", account);
        self.type_into(locators::EMAIL_INPUT, account).await?;
        self.click(locators::EMAIL_NEXT).await?;
        self.type_into(locators::PASSWORD_INPUT, secret).await?;
        self.click(locators::LOGIN_SUBMIT).await?;
        self.expect_text(locators::WELCOME_HEADING, locators::WELCOME_TEXT)
            .await?;

        self.logged_in_as = Some(account.to_string());
        info!("登录成功: {}", account);
        Ok(())
    }

    /// 打开云服务器列表
    pub async fn open_cloud(&self) -> Result<()> {
        self.click(locators::CLOUD_NAV).await?;
        self.expect_text(locators::CLOUD_HEADING, locators::CLOUD_TEXT)
            .await?;
        debug!("已进入 Cloud 页面");
        Ok(())
    }

    /// 打开创建表单
    pub async fn open_create_form(&self) -> Result<()> {
        self.click(locators::ADD_NEW_SERVER).await
    }

    pub async fn select_package(&self, package: &str) -> Result<()> {
        self.click(locators::PACKAGE_DROPDOWN).await?;
        self.type_into(locators::PACKAGE_SEARCH, package).await?;
        self.pick_option(package).await?;
        info!("已选择套餐: {}", package);
        Ok(())
    }

    pub async fn select_os(&self, os_image: &str) -> Result<()> {
        self.click(locators::ADVANCED_OPTIONS).await?;
        self.click(locators::OS_DROPDOWN).await?;
        self.type_into(locators::OS_SEARCH, os_image).await?;
        self.pick_option(os_image).await?;
        info!("已选择操作系统: {}", os_image);
        Ok(())
    }

    pub async fn set_hostname(&self, hostname: &str) -> Result<()> {
        self.type_into(locators::HOSTNAME_INPUT, hostname).await
    }

    pub async fn set_public_key(&self, public_key: &str) -> Result<()> {
        self.type_into(locators::PUBLIC_KEY_INPUT, public_key).await
    }

    pub async fn set_password(&self, password: &str) -> Result<()> {
        self.type_into(locators::SERVER_PASSWORD_INPUT, password)
            .await
    }

    pub async fn enable_public_interface(&self) -> Result<()> {
        self.click(locators::PUBLIC_INTERFACE).await
    }

    pub async fn enable_ip_addresses(&self) -> Result<()> {
        self.click(locators::IPV4_LABEL).await?;
        self.click(locators::IPV6_LABEL).await
    }

    /// 启用额外数据卷，返回表单滑块上的容量 (GB)
    pub async fn enable_extra_volume(&self) -> Result<u32> {
        self.click(locators::EXTRA_VOLUME).await?;
        self.wait_clickable(locators::VOLUME_SLIDER).await?;
        let size = self.read_text(locators::VOLUME_SIZE).await?;
        let size_gb = parse_volume_size(&size).ok_or_else(|| {
            WebDriverError::ParseError(format!("无法解析数据卷容量: {:?}", size))
        })?;
        info!("额外数据卷: {}G", size_gb);
        Ok(size_gb)
    }

    /// 提交创建表单
    pub async fn submit(&self) -> Result<()> {
        self.click(locators::SUBMIT_SERVER).await?;
        info!("已提交创建表单");
        Ok(())
    }

    /// 等待服务器出现在列表中并进入 Active 状态
    pub async fn wait_active(&self) -> Result<()> {
        self.driver
            .wait_clickable(&Locator::xpath(locators::ACTIVE_ITEM), self.active_timeout)
            .await?;
        info!("服务器已进入 Active 状态");
        Ok(())
    }

    /// 读取列表中显示的主机名
    pub async fn read_hostname(&self) -> Result<String> {
        self.driver
            .wait_present(&Locator::css(locators::SERVER_TABLE), self.element_timeout)
            .await?;
        let cell = self.read_text(locators::HOSTNAME_CELL).await?;
        Ok(cell.rsplit(':').next().unwrap_or_default().trim().to_string())
    }

    /// 打开服务器详情页
    pub async fn open_details(&self) -> Result<()> {
        self.click(locators::ACTIVE_ITEM).await?;
        self.click(locators::DETAILS_LINK).await
    }

    /// 从详情页读取 IPv4 地址
    pub async fn read_ipv4(&self) -> Result<Ipv4Addr> {
        self.driver
            .wait_visible(&Locator::xpath(locators::ACTIVE_BADGE), self.element_timeout)
            .await?;
        let source = self.driver.page_source().await?;
        extract_ipv4(&source)
            .ok_or_else(|| WebDriverError::ParseError("详情页中没有 IPv4 地址".to_string()))
    }

    /// 从详情页读取 IPv6 地址（未分配时为空）
    pub async fn read_ipv6(&self) -> Result<Option<Ipv6Addr>> {
        let source = self.driver.page_source().await?;
        Ok(extract_ipv6(&source))
    }

    /// 从详情页读取面板生成的 SSH 用户
    pub async fn read_ssh_user(&self) -> Result<String> {
        let user = self.read_text(locators::SSH_USER).await?;
        let user = user.trim().to_string();
        if user.is_empty() {
            return Err(WebDriverError::ParseError("详情页中没有 SSH 用户".to_string()));
        }
        Ok(user)
    }

    /// 服务器是否仍在列表中
    pub async fn server_listed(&self, hostname: &str) -> Result<bool> {
        self.click(locators::CLOUD_NAV).await?;
        self.expect_text(locators::CLOUD_HEADING, locators::CLOUD_TEXT)
            .await?;
        let rows = self
            .driver
            .find_elements(&Locator::xpath(locators::server_row(hostname)))
            .await?;
        Ok(!rows.is_empty())
    }

    /// 在列表中销毁服务器并等待其消失
    pub async fn destroy(&self, hostname: &str) -> Result<()> {
        self.click(&locators::destroy_link(hostname)).await?;
        self.click(locators::DESTROY_CONFIRM).await?;
        self.driver
            .wait_invisible(
                &Locator::xpath(locators::server_row(hostname)),
                self.destroy_timeout,
            )
            .await?;
        info!("服务器 {} 已从列表中消失", hostname);
        Ok(())
    }

    async fn wait_clickable(&self, xpath: &str) -> Result<ElementRef> {
        self.driver
            .wait_clickable(&Locator::xpath(xpath), self.element_timeout)
            .await
    }

    async fn click(&self, xpath: &str) -> Result<()> {
        let element = self.wait_clickable(xpath).await?;
        self.driver.click(&element).await
    }

    async fn type_into(&self, xpath: &str, text: &str) -> Result<()> {
        let element = self.wait_clickable(xpath).await?;
        self.driver.send_keys(&element, text).await
    }

    async fn read_text(&self, xpath: &str) -> Result<String> {
        let element = self.wait_clickable(xpath).await?;
        self.driver.text(&element).await
    }

    /// 点击下拉选项并确认其文本与期望一致
    async fn pick_option(&self, text: &str) -> Result<()> {
        let element = self.wait_clickable(&locators::option(text)).await?;
        let actual = self.driver.text(&element).await?;
        self.driver.click(&element).await?;
        if actual.trim() != text {
            return Err(WebDriverError::ParseError(format!(
                "选项不符: 期望 {:?}, 实际 {:?}",
                text, actual
            )));
        }
        Ok(())
    }

    async fn expect_text(&self, xpath: &str, expected: &str) -> Result<()> {
        let element = self
            .driver
            .wait_visible(&Locator::xpath(xpath), self.element_timeout)
            .await?;
        let actual = self.driver.text(&element).await?;
        if actual.trim() != expected {
            return Err(WebDriverError::ParseError(format!(
                "页面文本不符: 期望 {:?}, 实际 {:?}",
                expected, actual
            )));
        }
        Ok(())
    }
}

/// 解析滑块显示的容量，例如 "20" 或 "20 GB"
fn parse_volume_size(text: &str) -> Option<u32> {
    text.split_whitespace()
        .next()?
        .trim_end_matches(|c: char| c.is_ascii_alphabetic())
        .parse()
        .ok()
}

fn extract_ipv4(html: &str) -> Option<Ipv4Addr> {
    let re = Regex::new(IPV4_SPAN).ok()?;
    let addr = re
        .captures_iter(html)
        .find_map(|caps| caps.get(1)?.as_str().parse().ok());
    addr
}

fn extract_ipv6(html: &str) -> Option<Ipv6Addr> {
    let re = Regex::new(IPV6_SPAN).ok()?;
    let addr = re
        .captures_iter(html)
        .find_map(|caps| caps.get(1)?.as_str().parse().ok());
    addr
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETAILS: &str = r#"
        <div class="card">
          <span class="badge bg-success">ACTIVE</span>
          <span class="text-muted">Created 10:42</span>
          <span>203.0.113.27</span>
          <span class="ip6">2001:db8:4::1a</span>
          <span data-bs-toggle="popover">ubuntu</span>
        </div>
    "#;

    #[test]
    fn test_extract_addresses() {
        assert_eq!(extract_ipv4(DETAILS), Some(Ipv4Addr::new(203, 0, 113, 27)));
        assert_eq!(extract_ipv6(DETAILS), "2001:db8:4::1a".parse().ok());
    }

    #[test]
    fn test_advanced_options_locator() {
        assert!(locators::ADVANCED_OPTIONS.ends_with(r##"="#advanced-options"]"##));
    }

    #[test]
    fn test_extract_skips_invalid_octets() {
        let html = "<span>999.1.1.1</span><span>198.51.100.4</span>";
        assert_eq!(extract_ipv4(html), Some(Ipv4Addr::new(198, 51, 100, 4)));
        assert_eq!(extract_ipv6("<span>10:42</span>"), None);
    }

    #[test]
    fn test_parse_volume_size() {
        assert_eq!(parse_volume_size("20"), Some(20));
        assert_eq!(parse_volume_size("40 GB"), Some(40));
        assert_eq!(parse_volume_size("10G"), Some(10));
        assert_eq!(parse_volume_size(""), None);
    }

    #[test]
    fn test_destroy_link_scoped_to_hostname() {
        let xpath = locators::destroy_link("kq3Xh2mL9aZp0Rt");
        assert!(xpath.starts_with(r#"//td[contains(normalize-space(.), "kq3Xh2mL9aZp0Rt")]"#));
        assert!(xpath.ends_with(r#"//a[normalize-space()="Destroy"]"#));
    }
}
