//! 流式传输层
//!
//! 定义 `StreamTransport` trait 并提供基于 reqwest 的 HTTP 实现。
//! 解码器/分发器只依赖 trait，单元测试无需真实网络栈。

mod error;
mod http;

pub use error::TransportError;
pub use http::HttpStreamTransport;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

use crate::models::ChatRequest;

/// 流式响应类型别名
///
/// 返回一个异步字节流，每个 Item 是一个 chunk 的字节数据或错误。
/// 使用 `Pin<Box<...>>` 以支持动态分发和异步迭代。
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// 流式传输 trait
///
/// 发起一次可取消的发送请求，返回惰性拉取的字节流。
/// 非成功响应在此层被翻译为单个描述性错误；
/// 取消导致的失败必须与其他失败区分开，调用方不得把取消上报为错误。
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// 发起流式请求
    async fn open_stream(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ByteStream, TransportError>;
}

/// 将 reqwest 响应体转换为统一的 ByteStream
pub fn reqwest_stream_to_byte_stream(response: reqwest::Response) -> ByteStream {
    use futures::StreamExt;

    let stream = response
        .bytes_stream()
        .map(|result| result.map_err(TransportError::from));

    Box::pin(stream)
}
