//! 流式回复错误类型

use thiserror::Error;

use crate::transport::TransportError;

/// 流式回复错误
///
/// 取消不在此列：取消通过 `TurnStatus::Cancelled` 表达，
/// 只有真正的失败才会走到这里。
#[derive(Debug, Error)]
pub enum StreamError {
    /// 传输层错误
    #[error("传输错误: {0}")]
    Transport(#[from] TransportError),

    /// 服务端 error 事件
    #[error("服务端错误: {0}")]
    Upstream(String),
}

impl StreamError {
    /// 判断错误是否可通过重新发送恢复
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::Transport(e) => e.is_retryable(),
            // error 事件一般重试发送即可恢复
            StreamError::Upstream(_) => true,
        }
    }
}
