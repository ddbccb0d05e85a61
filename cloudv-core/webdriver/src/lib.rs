//! CloudV WebDriver 客户端
//!
//! 通过 W3C WebDriver HTTP 协议（selenium-server、chromedriver、geckodriver 等）
//! 驱动浏览器，提供：
//! - 会话管理
//! - 元素定位、点击、输入、读取文本
//! - 有上限的显式等待（可点击 / 可见 / 存在 / 消失）
//!
//! # 示例
//!
//! ```ignore
//! use cloudv_webdriver::{Browser, Locator, WebDriverClient, WebDriverConfig};
//!
//! let client = WebDriverClient::new("http://selenium-server:4444/wd/hub", WebDriverConfig::default())?;
//! client.start_session(Browser::Chrome).await?;
//! client.navigate("https://panel.example.com/panel/account/login").await?;
//! let button = client.wait_clickable(&Locator::xpath("//a[@href=\"/panel/cloud/\"]"), timeout).await?;
//! client.click(&button).await?;
//! ```

mod client;
mod error;
mod locator;

pub use client::{ElementRef, WebDriverClient, WebDriverConfig};
pub use error::{Result, WebDriverError};
pub use locator::{Browser, Locator};
