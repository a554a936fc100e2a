//! 传输层错误类型
//!
//! 区分可重试错误（网络、超时、限流、5xx）和不可重试错误，
//! 并把取消单独建模，保证取消永远不会被当成失败上报。

use thiserror::Error;

/// 传输错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// 网络错误（连接失败、DNS 解析失败、连接被重置）
    #[error("网络错误: {0}")]
    Network(String),

    /// 请求超时
    #[error("请求超时")]
    Timeout,

    /// 非成功响应（已尽量从响应体中提取结构化错误信息）
    #[error("服务返回错误 ({status}): {message}")]
    Status {
        /// HTTP 状态码
        status: u16,
        /// 提取出的错误信息
        message: String,
    },

    /// 用户取消（不是错误，调用方应静默清理）
    #[error("请求已取消")]
    Cancelled,

    /// 配置错误（缺少地址、非法 URL 等）
    #[error("配置错误: {0}")]
    Config(String),
}

impl TransportError {
    /// 判断错误是否可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network(_) => true,
            TransportError::Timeout => true,
            TransportError::Status { status, .. } => *status == 429 || *status >= 500,
            TransportError::Cancelled => false,
            TransportError::Config(_) => false,
        }
    }

    /// 是否由取消引起
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Network(format!("连接失败: {}", err))
        } else if err.is_request() {
            TransportError::Network(format!("请求错误: {}", err))
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// 从非成功响应体中提取人类可读的错误信息
///
/// 先尝试按 JSON 解析并在常见字段名下查找 message，
/// 找不到再退回原始文本（截断）。
pub fn extract_error_message(status: u16, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        // 常见的错误信息字段名，按惯例顺序探测
        let candidates = [
            value.get("detail"),
            value.get("message"),
            value.get("error").and_then(|e| e.get("message")),
            value.get("error"),
            value.get("error_description"),
        ];
        for candidate in candidates.into_iter().flatten() {
            if let Some(text) = candidate.as_str() {
                if !text.is_empty() {
                    return text.to_string();
                }
            }
        }
    }

    let raw = body.trim();
    if raw.is_empty() {
        format!("HTTP {}", status)
    } else {
        truncate_message(raw, 500)
    }
}

/// 截断消息到指定长度
fn truncate_message(msg: &str, max_len: usize) -> String {
    if msg.chars().count() <= max_len {
        msg.to_string()
    } else {
        let cut: String = msg.chars().take(max_len).collect();
        format!("{}...", cut)
    }
}
