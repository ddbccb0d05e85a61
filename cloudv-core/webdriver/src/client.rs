//! WebDriver 客户端核心实现

use std::time::Duration;

use reqwest::{Client, Method};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::{Result, WebDriverError};
use crate::locator::{Browser, Locator};

/// W3C 规范中元素引用的键名
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// WebDriver 客户端配置
#[derive(Debug, Clone)]
pub struct WebDriverConfig {
    /// 连接超时（秒）
    pub connect_timeout: u64,

    /// 请求超时（秒）
    pub request_timeout: u64,

    /// 显式等待的轮询间隔（毫秒）
    pub poll_interval_ms: u64,

    /// 每条浏览器命令前的固定延迟（毫秒），0 表示不延迟
    pub step_delay_ms: u64,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            connect_timeout: 10,
            request_timeout: 60,
            poll_interval_ms: 250,
            step_delay_ms: 0,
        }
    }
}

/// 页面元素引用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef {
    id: String,
}

impl ElementRef {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn from_value(value: &Value) -> Result<Self> {
        value[ELEMENT_KEY]
            .as_str()
            .map(|id| Self { id: id.to_string() })
            .ok_or_else(|| WebDriverError::ParseError(format!("无效的元素引用: {}", value)))
    }
}

/// 显式等待条件
#[derive(Debug, Clone, Copy)]
enum WaitCondition {
    Present,
    Visible,
    Clickable,
}

impl WaitCondition {
    fn describe(self) -> &'static str {
        match self {
            WaitCondition::Present => "出现",
            WaitCondition::Visible => "可见",
            WaitCondition::Clickable => "可点击",
        }
    }
}

/// WebDriver 客户端
///
/// 一个客户端对应一个浏览器会话。
pub struct WebDriverClient {
    /// WebDriver 服务地址
    base_url: String,

    /// HTTP 客户端
    http_client: Client,

    /// 当前会话 ID
    session_id: RwLock<Option<String>>,

    /// 配置
    config: WebDriverConfig,
}

impl WebDriverClient {
    /// 创建新的 WebDriver 客户端
    pub fn new(base_url: &str, config: WebDriverConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .build()
            .map_err(|e| WebDriverError::HttpError(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            session_id: RwLock::new(None),
            config,
        })
    }

    /// 创建浏览器会话
    pub async fn start_session(&self, browser: Browser) -> Result<()> {
        info!("创建浏览器会话: {}", browser);

        let body = json!({
            "capabilities": {
                "alwaysMatch": { "browserName": browser.capability_name() }
            }
        });
        let value = self.command(Method::POST, "/session", Some(body)).await?;

        let session_id = value["sessionId"]
            .as_str()
            .ok_or_else(|| WebDriverError::SessionError("未获取到 sessionId".to_string()))?
            .to_string();

        info!("浏览器会话已创建: {}", session_id);
        *self.session_id.write().await = Some(session_id);
        Ok(())
    }

    /// 关闭浏览器会话
    pub async fn end_session(&self) -> Result<()> {
        let session_id = self.session_id.write().await.take();
        if let Some(id) = session_id {
            info!("关闭浏览器会话: {}", id);
            self.command(Method::DELETE, &format!("/session/{}", id), None)
                .await?;
        }
        Ok(())
    }

    /// 是否存在活动会话
    pub async fn has_session(&self) -> bool {
        self.session_id.read().await.is_some()
    }

    /// 打开页面
    pub async fn navigate(&self, url: &str) -> Result<()> {
        debug!("打开页面: {}", url);
        self.session_command(Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    /// 当前页面 URL
    pub async fn current_url(&self) -> Result<String> {
        let value = self.session_command(Method::GET, "/url", None).await?;
        as_string(value)
    }

    /// 最大化窗口
    pub async fn maximize_window(&self) -> Result<()> {
        self.session_command(Method::POST, "/window/maximize", None)
            .await?;
        Ok(())
    }

    /// 页面源码
    pub async fn page_source(&self) -> Result<String> {
        let value = self.session_command(Method::GET, "/source", None).await?;
        as_string(value)
    }

    /// 查找单个元素
    pub async fn find_element(&self, locator: &Locator) -> Result<ElementRef> {
        let body = json!({ "using": locator.strategy(), "value": locator.value() });
        let value = self
            .session_command(Method::POST, "/element", Some(body))
            .await?;
        ElementRef::from_value(&value)
    }

    /// 查找所有匹配的元素
    pub async fn find_elements(&self, locator: &Locator) -> Result<Vec<ElementRef>> {
        let body = json!({ "using": locator.strategy(), "value": locator.value() });
        let value = self
            .session_command(Method::POST, "/elements", Some(body))
            .await?;
        value
            .as_array()
            .ok_or_else(|| WebDriverError::ParseError(format!("元素列表格式错误: {}", value)))?
            .iter()
            .map(ElementRef::from_value)
            .collect()
    }

    /// 点击元素
    pub async fn click(&self, element: &ElementRef) -> Result<()> {
        self.session_command(
            Method::POST,
            &format!("/element/{}/click", element.id),
            None,
        )
        .await?;
        Ok(())
    }

    /// 向元素输入文本
    pub async fn send_keys(&self, element: &ElementRef, text: &str) -> Result<()> {
        self.session_command(
            Method::POST,
            &format!("/element/{}/value", element.id),
            Some(json!({ "text": text })),
        )
        .await?;
        Ok(())
    }

    /// 清空输入框
    pub async fn clear(&self, element: &ElementRef) -> Result<()> {
        self.session_command(
            Method::POST,
            &format!("/element/{}/clear", element.id),
            None,
        )
        .await?;
        Ok(())
    }

    /// 读取元素可见文本
    pub async fn text(&self, element: &ElementRef) -> Result<String> {
        let value = self
            .session_command(Method::GET, &format!("/element/{}/text", element.id), None)
            .await?;
        as_string(value)
    }

    /// 元素是否可见
    pub async fn is_displayed(&self, element: &ElementRef) -> Result<bool> {
        let value = self
            .session_command(
                Method::GET,
                &format!("/element/{}/displayed", element.id),
                None,
            )
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// 元素是否可用
    pub async fn is_enabled(&self, element: &ElementRef) -> Result<bool> {
        let value = self
            .session_command(
                Method::GET,
                &format!("/element/{}/enabled", element.id),
                None,
            )
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// 等待元素出现在 DOM 中
    pub async fn wait_present(&self, locator: &Locator, timeout: Duration) -> Result<ElementRef> {
        self.wait_until(locator, WaitCondition::Present, timeout).await
    }

    /// 等待元素可见
    pub async fn wait_visible(&self, locator: &Locator, timeout: Duration) -> Result<ElementRef> {
        self.wait_until(locator, WaitCondition::Visible, timeout).await
    }

    /// 等待元素可点击（可见且可用）
    pub async fn wait_clickable(&self, locator: &Locator, timeout: Duration) -> Result<ElementRef> {
        self.wait_until(locator, WaitCondition::Clickable, timeout).await
    }

    /// 等待元素消失（不存在或不可见）
    pub async fn wait_invisible(&self, locator: &Locator, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        loop {
            let mut visible = false;
            match self.find_elements(locator).await {
                Ok(elements) => {
                    for element in &elements {
                        match self.is_displayed(element).await {
                            Ok(true) => {
                                visible = true;
                                break;
                            }
                            Ok(false) => {}
                            Err(e) if e.is_timing() => {}
                            Err(e) => return Err(e),
                        }
                    }
                }
                Err(e) if e.is_timing() => {}
                Err(e) => return Err(e),
            }

            if !visible {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(WebDriverError::Timeout(format!(
                    "等待元素消失超时 ({}s): {}",
                    timeout.as_secs(),
                    locator
                )));
            }

            sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
        }
    }

    /// 轮询直到条件满足或超时
    async fn wait_until(
        &self,
        locator: &Locator,
        condition: WaitCondition,
        timeout: Duration,
    ) -> Result<ElementRef> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.probe(locator, condition).await {
                Ok(Some(element)) => return Ok(element),
                Ok(None) => {}
                Err(e) if e.is_timing() => {
                    debug!("等待 {} {}: {}", locator, condition.describe(), e);
                }
                Err(e) => return Err(e),
            }

            if Instant::now() >= deadline {
                return Err(WebDriverError::Timeout(format!(
                    "等待元素{}超时 ({}s): {}",
                    condition.describe(),
                    timeout.as_secs(),
                    locator
                )));
            }

            sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
        }
    }

    async fn probe(&self, locator: &Locator, condition: WaitCondition) -> Result<Option<ElementRef>> {
        let element = self.find_element(locator).await?;

        let ready = match condition {
            WaitCondition::Present => true,
            WaitCondition::Visible => self.is_displayed(&element).await?,
            WaitCondition::Clickable => {
                self.is_displayed(&element).await? && self.is_enabled(&element).await?
            }
        };

        Ok(ready.then_some(element))
    }

    /// 在当前会话中发送命令
    async fn session_command(
        &self,
        method: Method,
        suffix: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        let session_id = self
            .session_id
            .read()
            .await
            .clone()
            .ok_or_else(|| WebDriverError::SessionError("没有活动的浏览器会话".to_string()))?;

        self.command(method, &format!("/session/{}{}", session_id, suffix), body)
            .await
    }

    /// 发送 WebDriver 命令，返回响应中的 `value`
    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        if self.config.step_delay_ms > 0 {
            sleep(Duration::from_millis(self.config.step_delay_ms)).await;
        }

        let url = format!("{}{}", self.base_url, path);
        debug!("WebDriver 请求: {} {}", method, url);

        let mut request = self.http_client.request(method.clone(), &url);

        // W3C 要求 POST 请求必须携带 JSON 主体
        if method == Method::POST {
            request = request.json(&body.unwrap_or_else(|| json!({})));
        }

        let response = request
            .send()
            .await
            .map_err(|e| WebDriverError::HttpError(e.to_string()))?;

        let status = response.status();
        let mut payload: Value = response
            .json()
            .await
            .map_err(|e| WebDriverError::ParseError(e.to_string()))?;

        if !status.is_success() {
            let error = payload["value"]["error"].as_str().unwrap_or("unknown error");
            let message = payload["value"]["message"].as_str().unwrap_or("");
            warn!("WebDriver 请求失败: {} {} - {}", status, error, message);
            return Err(WebDriverError::from_w3c(status.as_u16(), error, message));
        }

        Ok(payload["value"].take())
    }
}

fn as_string(value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(WebDriverError::ParseError(format!(
            "期望字符串, 实际: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = WebDriverClient::new("http://localhost:4444/wd/hub/", WebDriverConfig::default());
        assert!(client.is_ok());
        assert_eq!(client.unwrap().base_url, "http://localhost:4444/wd/hub");
    }

    #[test]
    fn test_element_ref_parse() {
        let value = json!({ ELEMENT_KEY: "f.1A2B.d.3C" });
        let element = ElementRef::from_value(&value).unwrap();
        assert_eq!(element.id(), "f.1A2B.d.3C");

        assert!(ElementRef::from_value(&json!({ "ELEMENT": "x" })).is_err());
    }

    #[tokio::test]
    async fn test_command_without_session() {
        let client = WebDriverClient::new("http://localhost:4444", WebDriverConfig::default()).unwrap();
        assert!(!client.has_session().await);
        let result = client.page_source().await;
        assert!(matches!(result, Err(WebDriverError::SessionError(_))));
    }

    #[tokio::test]
    async fn test_end_session_without_session_is_noop() {
        let client = WebDriverClient::new("http://localhost:4444", WebDriverConfig::default()).unwrap();
        assert!(client.end_session().await.is_ok());
    }
}
