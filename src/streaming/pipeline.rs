//! 读循环驱动
//!
//! `ChatPipeline` 把传输、解码、分发、取消和持久化接成一条线：
//! 打开字节流，喂给帧解码器，把事件交给 `ChatTurn`，在流终结后
//! 落库并产出 `TurnOutcome`。
//!
//! 同一会话同一时间只允许一次在途发送；取消是正常终结而不是错误；
//! 持久化失败只记日志，绝不打断已经拿到的回复。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::error::StreamError;
use super::frame::FrameDecoder;
use super::turn::{ChatTurn, FinishedTurn, TurnControl, TurnEnd, TurnNote};
use crate::models::{Artifact, ChatRequest, Message};
use crate::store::SessionMessageStore;
use crate::transport::{StreamTransport, TransportError};

// ============================================================================
// 错误与结果类型
// ============================================================================

/// 发送前置检查错误
///
/// 流式期间的失败不走这里：它们被翻译成可见文本放进消息列表，
/// 以 `TurnStatus::Failed` 返回。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// 会话已有在途发送
    #[error("会话 {0} 已有进行中的发送")]
    SessionBusy(String),
}

/// 一次发送的终态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    /// 正常完成
    Completed,
    /// 用户取消（部分内容已保留）
    Cancelled,
    /// 流失败，消息文本已替换为错误说明
    Failed { message: String, retryable: bool },
}

/// 一次发送的完整产出
#[derive(Debug)]
pub struct TurnOutcome {
    /// 更新后的会话消息列表
    pub messages: Vec<Message>,
    /// 最终的助手消息（空流或提前取消时为 None）
    pub assistant: Option<Message>,
    /// 本次发送产出的制品
    pub artifacts: Vec<Artifact>,
    /// 终态
    pub status: TurnStatus,
}

// ============================================================================
// ChatPipeline
// ============================================================================

/// 流式回复管线
pub struct ChatPipeline {
    transport: Arc<dyn StreamTransport>,
    store: Arc<dyn SessionMessageStore>,
    /// 在途发送的会话 id 集合
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl ChatPipeline {
    /// 创建管线
    pub fn new(transport: Arc<dyn StreamTransport>, store: Arc<dyn SessionMessageStore>) -> Self {
        Self {
            transport,
            store,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// 发送一条消息并驱动整条流直到终结
    ///
    /// `messages` 是当前会话的消息快照（应已包含刚落库的用户消息）。
    /// 流式期间的增量通过 `on_note` 推给调用方。
    pub async fn send<F>(
        &self,
        request: ChatRequest,
        messages: Vec<Message>,
        cancel: CancellationToken,
        mut on_note: F,
    ) -> Result<TurnOutcome, ChatError>
    where
        F: FnMut(TurnNote),
    {
        let _guard = self.acquire(&request.session_id)?;

        let mut turn = ChatTurn::new(&request, messages);

        // 打开流：失败直接翻译成可见错误文本
        let mut stream = match self.transport.open_stream(&request, &cancel).await {
            Ok(stream) => stream,
            Err(TransportError::Cancelled) => {
                return Ok(self.settle(turn.finalize_cancelled(), &request.session_id));
            }
            Err(e) => {
                let err = StreamError::Transport(e);
                let retryable = err.is_retryable();
                let finished = turn.finalize_error(visible_error(&err));
                return Ok(self.fail(finished, &err, retryable));
            }
        };

        let mut decoder = FrameDecoder::new();
        let mut saw_done = false;

        'read: loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("[PIPELINE] 发送被取消: session={}", request.session_id);
                    return Ok(self.settle(turn.finalize_cancelled(), &request.session_id));
                }
                chunk = stream.next() => chunk,
            };

            let eof = chunk.is_none();
            let events = match chunk {
                Some(Ok(bytes)) => decoder.feed(&bytes),
                Some(Err(TransportError::Cancelled)) => {
                    return Ok(self.settle(turn.finalize_cancelled(), &request.session_id));
                }
                Some(Err(e)) => {
                    let err = StreamError::Transport(e);
                    let retryable = err.is_retryable();
                    let finished = turn.finalize_error(visible_error(&err));
                    return Ok(self.fail(finished, &err, retryable));
                }
                // EOF：缓冲残余可能还有最后一帧
                None => decoder.finish(),
            };

            for event in events {
                let (control, notes) = turn.handle_event(event);
                for note in notes {
                    on_note(note);
                }
                match control {
                    TurnControl::Continue => {}
                    TurnControl::Done => {
                        saw_done = true;
                        break 'read;
                    }
                    TurnControl::Failed(msg) => {
                        let err = StreamError::Upstream(msg);
                        let retryable = err.is_retryable();
                        let finished = turn.finalize_error(visible_error(&err));
                        return Ok(self.fail(finished, &err, retryable));
                    }
                }
            }

            if eof {
                break 'read;
            }
        }

        if !saw_done {
            // 没有 done 的 EOF 按正常完成处理
            warn!(
                "[PIPELINE] 流在 done 之前结束，按完成处理: session={}",
                request.session_id
            );
        }

        Ok(self.settle(turn.finalize_done(), &request.session_id))
    }

    /// 占用会话的在途发送名额
    fn acquire(&self, session_id: &str) -> Result<InFlightGuard, ChatError> {
        let mut set = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !set.insert(session_id.to_string()) {
            return Err(ChatError::SessionBusy(session_id.to_string()));
        }
        Ok(InFlightGuard {
            set: Arc::clone(&self.in_flight),
            session_id: session_id.to_string(),
        })
    }

    /// 正常完成或取消后的落库与收尾
    fn settle(&self, finished: FinishedTurn, session_id: &str) -> TurnOutcome {
        if let Some(assistant) = &finished.assistant {
            if let Err(e) = self.store.save_message(session_id, assistant) {
                warn!("[PIPELINE] 助手消息落库失败: {}", e);
            }
        }
        for artifact in &finished.artifacts {
            if let Err(e) = self.store.save_artifact(artifact) {
                warn!("[PIPELINE] 制品落库失败: id={} - {}", artifact.id, e);
            }
        }
        if let Err(e) = self.store.touch_session(session_id) {
            warn!("[PIPELINE] 会话时间戳更新失败: {}", e);
        }

        let status = match finished.end {
            TurnEnd::Cancelled => TurnStatus::Cancelled,
            _ => TurnStatus::Completed,
        };
        TurnOutcome {
            messages: finished.messages,
            assistant: finished.assistant,
            artifacts: finished.artifacts,
            status,
        }
    }

    /// 流失败：错误文本留在列表里，不落库
    fn fail(&self, finished: FinishedTurn, err: &StreamError, retryable: bool) -> TurnOutcome {
        warn!("[PIPELINE] 流失败: {} retryable={}", err, retryable);
        TurnOutcome {
            messages: finished.messages,
            assistant: finished.assistant,
            artifacts: finished.artifacts,
            status: TurnStatus::Failed {
                message: err.to_string(),
                retryable,
            },
        }
    }
}

/// 翻译为展示给用户的错误文本
fn visible_error(err: &StreamError) -> String {
    match err {
        StreamError::Transport(TransportError::Network(msg)) => {
            format!("Falha de conexão com o servidor: {}", msg)
        }
        StreamError::Transport(TransportError::Timeout) => {
            "Tempo de resposta esgotado. Tente novamente.".to_string()
        }
        StreamError::Transport(TransportError::Status { status, message }) => {
            format!("O servidor respondeu com erro {}: {}", status, message)
        }
        StreamError::Transport(TransportError::Config(msg)) => {
            format!("Configuração inválida: {}", msg)
        }
        StreamError::Transport(TransportError::Cancelled) => {
            // 取消不该走到这里，按保守文本兜底
            "Solicitação cancelada.".to_string()
        }
        StreamError::Upstream(msg) => {
            format!("O assistente encontrou um erro: {}", msg)
        }
    }
}

/// 在途名额的 RAII 守卫
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    session_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self
            .set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        set.remove(&self.session_id);
    }
}

// ============================================================================
// 测试模块
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visible_error_texts() {
        let err = StreamError::Transport(TransportError::Status {
            status: 503,
            message: "indisponível".to_string(),
        });
        assert!(visible_error(&err).contains("503"));

        let err = StreamError::Upstream("model overloaded".to_string());
        assert!(visible_error(&err).contains("model overloaded"));
    }

    #[test]
    fn test_session_busy_display() {
        let err = ChatError::SessionBusy("s1".to_string());
        assert!(err.to_string().contains("s1"));
    }
}
