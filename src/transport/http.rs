//! 基于 reqwest 的 HTTP 流式传输实现
//!
//! 一次发送对应一个 POST 请求，携带提示词、模型、功能开关、
//! 会话 id 和附件引用，响应以 SSE 字节流返回。

use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::error::extract_error_message;
use super::{reqwest_stream_to_byte_stream, ByteStream, StreamTransport, TransportError};
use crate::models::ChatRequest;

/// HTTP 流式传输
pub struct HttpStreamTransport {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpStreamTransport {
    /// 创建传输实例
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            client: Client::new(),
        }
    }

    /// 构建完整的 API URL
    /// 智能处理用户输入的 base_url，无论是否带 /api 都能正确工作
    fn build_url(&self, endpoint: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/api") {
            format!("{}/{}", base, endpoint)
        } else {
            format!("{}/api/{}", base, endpoint)
        }
    }
}

#[async_trait]
impl StreamTransport for HttpStreamTransport {
    /// 发起流式请求
    ///
    /// 在发送与响应头到达之间也响应取消：等待响应期间令牌被触发时
    /// 返回 `TransportError::Cancelled`，调用方据此静默清理。
    async fn open_stream(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ByteStream, TransportError> {
        if self.base_url.trim().is_empty() {
            return Err(TransportError::Config("服务地址未配置".to_string()));
        }

        let url = self.build_url("chat/stream");

        let body = serde_json::json!({
            "session_id": request.session_id,
            "message": request.prompt,
            "model": request.model,
            "web_search": request.web_search,
            "features": request.features,
            "attachments": request.attachments,
        });

        info!(
            "[CHAT_STREAM] 发起流式请求: url={} model={} session={}",
            url, request.model, request.session_id
        );

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body);

        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        // biased: 取消优先于任何已就绪的响应
        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            resp = builder.send() => resp.map_err(TransportError::from)?,
        };

        let status = resp.status();
        if !status.is_success() {
            let raw = resp.text().await.unwrap_or_default();
            let message = extract_error_message(status.as_u16(), &raw);
            error!("[CHAT_STREAM] 请求失败: {} - {}", status, message);
            return Err(TransportError::Status {
                status: status.as_u16(),
                message,
            });
        }

        info!("[CHAT_STREAM] 流式响应开始: status={}", status);

        Ok(reqwest_stream_to_byte_stream(resp))
    }
}
