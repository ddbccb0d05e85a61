//! WebDriver 错误定义

use thiserror::Error;

/// WebDriver 错误类型
#[derive(Error, Debug)]
pub enum WebDriverError {
    #[error("HTTP 错误: {0}")]
    HttpError(String),

    /// WebDriver 服务端返回的错误 (HTTP 状态码, W3C 错误码, 消息)
    #[error("WebDriver 错误 [{0}] {1}: {2}")]
    ApiError(u16, String, String),

    #[error("元素不存在: {0}")]
    NoSuchElement(String),

    #[error("元素已失效: {0}")]
    StaleElement(String),

    #[error("元素不可交互: {0}")]
    NotInteractable(String),

    #[error("等待超时: {0}")]
    Timeout(String),

    #[error("会话错误: {0}")]
    SessionError(String),

    #[error("解析错误: {0}")]
    ParseError(String),

    #[error("配置错误: {0}")]
    ConfigError(String),
}

impl WebDriverError {
    /// 根据 W3C 错误码构造错误
    pub(crate) fn from_w3c(status: u16, error: &str, message: &str) -> Self {
        match error {
            "no such element" => WebDriverError::NoSuchElement(message.to_string()),
            "stale element reference" => WebDriverError::StaleElement(message.to_string()),
            "element not interactable" | "element click intercepted" => {
                WebDriverError::NotInteractable(message.to_string())
            }
            "timeout" | "script timeout" => WebDriverError::Timeout(message.to_string()),
            "invalid session id" | "session not created" => {
                WebDriverError::SessionError(message.to_string())
            }
            _ => WebDriverError::ApiError(status, error.to_string(), message.to_string()),
        }
    }

    /// 是否属于页面时序问题（元素尚未渲染、被遮挡等）
    pub fn is_timing(&self) -> bool {
        matches!(
            self,
            WebDriverError::NoSuchElement(_)
                | WebDriverError::StaleElement(_)
                | WebDriverError::NotInteractable(_)
                | WebDriverError::Timeout(_)
        )
    }
}

/// WebDriver 结果类型
pub type Result<T> = std::result::Result<T, WebDriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_w3c_error_mapping() {
        assert!(matches!(
            WebDriverError::from_w3c(404, "no such element", "xpath"),
            WebDriverError::NoSuchElement(_)
        ));
        assert!(matches!(
            WebDriverError::from_w3c(404, "invalid session id", ""),
            WebDriverError::SessionError(_)
        ));
        assert!(matches!(
            WebDriverError::from_w3c(500, "unknown error", "boom"),
            WebDriverError::ApiError(500, _, _)
        ));
    }

    #[test]
    fn test_timing_errors() {
        assert!(WebDriverError::Timeout("x".into()).is_timing());
        assert!(WebDriverError::NotInteractable("x".into()).is_timing());
        assert!(!WebDriverError::SessionError("x".into()).is_timing());
        assert!(!WebDriverError::HttpError("x".into()).is_timing());
    }
}
