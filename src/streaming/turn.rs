//! 事件分发与消息累积
//!
//! 一次发送对应一个 `ChatTurn`：它在流式期间独占会话消息列表的
//! 工作快照（显式传参，不读共享可变单元），按事件的 `type` 标签
//! 路由到消息累积、制品组装或终止处理。所有列表修改都按稳定 id
//! 进行。
//!
//! 终结分三种：正常完成（`done`，必要时先跑回退检测）、服务端
//! 错误（消息被替换为翻译后的错误文本）、用户取消（静默清理，
//! 已流入的部分内容保留）。

use tracing::{debug, warn};

use super::assembler::ArtifactAssembler;
use super::event::{extract_legacy_text, StreamEvent};
use super::fallback::detect_artifacts;
use super::reconciler;
use crate::models::{Artifact, ChatRequest, Message};

// ============================================================================
// 控制与通知
// ============================================================================

/// 单个事件处理后的控制流
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnControl {
    /// 继续读取
    Continue,
    /// 收到 done，进入终结
    Done,
    /// 收到 error 事件
    Failed(String),
}

/// 处理事件过程中产生的增量通知，供上层（UI、持久化）消费
#[derive(Debug, Clone)]
pub enum TurnNote {
    /// 可见文本追加了一段
    TextDelta(String),
    /// 可见文本被整体替换
    TextReplaced(String),
    /// 一个制品完成终结
    ArtifactFinalized(Artifact),
}

// ============================================================================
// ChatTurn
// ============================================================================

/// 一次发送的流式处理状态
#[derive(Debug)]
pub struct ChatTurn {
    session_id: String,
    model: String,
    web_search: bool,
    /// 会话消息列表的工作快照
    messages: Vec<Message>,
    /// 占位消息 id
    placeholder_id: String,
    /// 真实助手消息 id（首个内容事件后才有）
    assistant_id: Option<String>,
    /// 在途消息文本的累积器
    accumulator: String,
    /// 制品组装器
    assembler: ArtifactAssembler,
    /// 流式期间已终结的制品
    artifacts: Vec<Artifact>,
    /// 是否收到过显式制品事件
    streamed_artifacts: bool,
}

impl ChatTurn {
    /// 创建并插入占位：必须在请求发出前调用
    pub fn new(request: &ChatRequest, mut messages: Vec<Message>) -> Self {
        let placeholder_id = reconciler::insert_placeholder(&mut messages);
        Self {
            session_id: request.session_id.clone(),
            model: request.model.clone(),
            web_search: request.web_search,
            messages,
            placeholder_id,
            assistant_id: None,
            accumulator: String::new(),
            assembler: ArtifactAssembler::new(),
            artifacts: Vec::new(),
            streamed_artifacts: false,
        }
    }

    /// 当前消息列表（测试与上层展示用）
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// 处理一个协议事件
    pub fn handle_event(&mut self, event: StreamEvent) -> (TurnControl, Vec<TurnNote>) {
        let mut notes = Vec::new();
        let control = match event {
            StreamEvent::Start => {
                debug!("[TURN] 流已开始: session={}", self.session_id);
                TurnControl::Continue
            }
            StreamEvent::ArtifactStart { artifact } => {
                self.streamed_artifacts = true;
                let artifact_id = artifact.artifact_id.clone();
                let assistant_id = self.ensure_live_message();
                reconciler::update_message(&mut self.messages, &assistant_id, |m| {
                    if !m.artifact_ids.contains(&artifact_id) {
                        m.artifact_ids.push(artifact_id.clone());
                    }
                });
                self.assembler.start(artifact);
                TurnControl::Continue
            }
            StreamEvent::ArtifactContent {
                artifact_id,
                content,
            } => {
                // 只进缓冲；未知或已终结的 id 静默忽略
                self.assembler.append(&artifact_id, &content);
                TurnControl::Continue
            }
            StreamEvent::ArtifactEnd { artifact_id } => {
                let message_id = self
                    .assistant_id
                    .clone()
                    .unwrap_or_else(|| self.placeholder_id.clone());
                if let Some(artifact) =
                    self.assembler
                        .finalize(&artifact_id, &self.session_id, &message_id)
                {
                    notes.push(TurnNote::ArtifactFinalized(artifact.clone()));
                    self.artifacts.push(artifact);
                }
                TurnControl::Continue
            }
            StreamEvent::Content {
                content,
                is_final,
                artifact_id,
            } => {
                let text = content.into_text();
                // 带 artifact_id 且草稿存在时，内容归制品缓冲
                if let Some(aid) = artifact_id {
                    if self.assembler.has_draft(&aid) {
                        self.assembler.append(&aid, &text);
                        return (TurnControl::Continue, notes);
                    }
                }
                if is_final {
                    self.replace_text(text, &mut notes);
                } else if !text.is_empty() {
                    self.append_text(text, &mut notes);
                }
                TurnControl::Continue
            }
            StreamEvent::Chunk { data } => {
                // 单调进度保护：残缺的遗留片段绝不回退覆盖更长的累积文本
                if let Some(text) = extract_legacy_text(&data) {
                    if text.len() > self.accumulator.len() {
                        self.replace_text(text, &mut notes);
                    } else {
                        debug!(
                            "[TURN] 忽略不超过累积长度的遗留 chunk: {} <= {}",
                            text.len(),
                            self.accumulator.len()
                        );
                    }
                }
                TurnControl::Continue
            }
            StreamEvent::Done { total_length } => {
                debug!(
                    "[TURN] 收到 done: session={} total_length={:?}",
                    self.session_id, total_length
                );
                TurnControl::Done
            }
            StreamEvent::Error { error } => TurnControl::Failed(error),
            StreamEvent::Unknown => {
                debug!("[TURN] 忽略未识别的事件类型");
                TurnControl::Continue
            }
        };
        (control, notes)
    }

    /// 追加可见文本
    fn append_text(&mut self, text: String, notes: &mut Vec<TurnNote>) {
        let assistant_id = self.ensure_live_message();
        self.accumulator.push_str(&text);
        reconciler::update_message(&mut self.messages, &assistant_id, |m| {
            m.content.push_str(&text)
        });
        notes.push(TurnNote::TextDelta(text));
    }

    /// 整体替换可见文本
    fn replace_text(&mut self, text: String, notes: &mut Vec<TurnNote>) {
        let assistant_id = self.ensure_live_message();
        self.accumulator = text.clone();
        reconciler::update_message(&mut self.messages, &assistant_id, |m| {
            m.content = text.clone()
        });
        notes.push(TurnNote::TextReplaced(text));
    }

    /// 首个内容事件：占位换成真实消息
    fn ensure_live_message(&mut self) -> String {
        if let Some(id) = &self.assistant_id {
            return id.clone();
        }
        let real = Message::assistant(Some(&self.model), self.web_search);
        let id = real.id.clone();
        reconciler::promote_placeholder(&mut self.messages, &self.placeholder_id, real);
        self.assistant_id = Some(id.clone());
        id
    }

    // ========================================================================
    // 终结
    // ========================================================================

    /// 正常完成：必要时先跑回退检测，然后清理并产出结果
    pub fn finalize_done(mut self) -> FinishedTurn {
        // 未终结的草稿到此作废
        self.assembler.discard_unfinished();

        // 整个流没有显式制品事件时，对最终文本跑回退检测
        if !self.streamed_artifacts && !self.accumulator.is_empty() {
            if let Some(assistant_id) = self.assistant_id.clone() {
                let (recovered, remainder) =
                    detect_artifacts(&self.session_id, &assistant_id, &self.accumulator);
                if !recovered.is_empty() {
                    self.accumulator = remainder;
                    reconciler::update_message(&mut self.messages, &assistant_id, |m| {
                        m.content = self.accumulator.clone();
                        for artifact in &recovered {
                            m.artifact_ids.push(artifact.id.clone());
                        }
                    });
                    self.artifacts.extend(recovered);
                }
            }
        }

        self.prune_artifact_ids();
        self.cleanup_empty();
        self.into_finished(TurnEnd::Completed)
    }

    /// 服务端错误：消息被替换为翻译后的错误文本，不进入持久化
    pub fn finalize_error(mut self, error_text: String) -> FinishedTurn {
        self.assembler.discard_unfinished();
        let mut notes = Vec::new();
        self.replace_text(error_text, &mut notes);
        self.prune_artifact_ids();
        self.into_finished(TurnEnd::Failed)
    }

    /// 用户取消：静默清理，保留已流入的部分内容和已终结的制品
    pub fn finalize_cancelled(mut self) -> FinishedTurn {
        self.assembler.discard_unfinished();
        self.prune_artifact_ids();
        self.cleanup_empty();
        self.into_finished(TurnEnd::Cancelled)
    }

    /// 消息的制品 id 列表只保留真正终结了的制品
    fn prune_artifact_ids(&mut self) {
        let finalized: Vec<String> = self.artifacts.iter().map(|a| a.id.clone()).collect();
        if let Some(assistant_id) = &self.assistant_id {
            reconciler::update_message(&mut self.messages, assistant_id, |m| {
                m.artifact_ids.retain(|id| finalized.contains(id));
            });
        }
    }

    /// 移除占位和空的助手消息
    fn cleanup_empty(&mut self) {
        reconciler::remove_message(&mut self.messages, &self.placeholder_id.clone());
        if let Some(assistant_id) = self.assistant_id.clone() {
            let is_empty = self
                .messages
                .iter()
                .find(|m| m.id == assistant_id)
                .map(|m| m.is_empty_assistant())
                .unwrap_or(false);
            if is_empty {
                warn!("[TURN] 流结束但没有任何内容，移除空的助手消息");
                reconciler::remove_message(&mut self.messages, &assistant_id);
                self.assistant_id = None;
            }
        }
    }

    fn into_finished(self, end: TurnEnd) -> FinishedTurn {
        let assistant = self
            .assistant_id
            .as_ref()
            .and_then(|id| self.messages.iter().find(|m| &m.id == id).cloned());
        FinishedTurn {
            messages: self.messages,
            assistant,
            artifacts: self.artifacts,
            end,
        }
    }
}

/// 终结方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEnd {
    Completed,
    Failed,
    Cancelled,
}

/// 终结后的产出
#[derive(Debug)]
pub struct FinishedTurn {
    /// 更新后的消息列表
    pub messages: Vec<Message>,
    /// 最终的助手消息（若有）
    pub assistant: Option<Message>,
    /// 本次发送产出的全部制品
    pub artifacts: Vec<Artifact>,
    /// 终结方式
    pub end: TurnEnd,
}

// ============================================================================
// 测试模块
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArtifactHeader, ArtifactSource, ArtifactType, MessageRole};
    use crate::streaming::event::ContentPayload;

    fn request() -> ChatRequest {
        ChatRequest::new("s1", "o que houve?", "ops-large")
    }

    fn content(text: &str) -> StreamEvent {
        StreamEvent::Content {
            content: ContentPayload::Text(text.to_string()),
            is_final: false,
            artifact_id: None,
        }
    }

    fn content_final(text: &str) -> StreamEvent {
        StreamEvent::Content {
            content: ContentPayload::Text(text.to_string()),
            is_final: true,
            artifact_id: None,
        }
    }

    fn header(id: &str) -> ArtifactHeader {
        ArtifactHeader {
            artifact_id: id.to_string(),
            title: "Análise de Causa Raiz".to_string(),
            artifact_type: ArtifactType::RcaAnalysis,
            intent: Some("diagnose".to_string()),
            source: ArtifactSource::RuleBased,
        }
    }

    #[test]
    fn test_scenario_append_twice_then_done() {
        let mut turn = ChatTurn::new(&request(), vec![Message::user("oi")]);
        turn.handle_event(StreamEvent::Start);
        turn.handle_event(content("Ol"));
        turn.handle_event(content("á!"));
        let (control, _) = turn.handle_event(StreamEvent::Done { total_length: None });
        assert_eq!(control, TurnControl::Done);

        let finished = turn.finalize_done();
        let assistant = finished.assistant.expect("deve haver mensagem final");
        assert_eq!(assistant.content, "Olá!");
        assert!(finished.artifacts.is_empty());
        // 没有占位残留，恰好一条助手消息
        assert!(!finished.messages.iter().any(|m| m.pending));
        assert_eq!(
            finished
                .messages
                .iter()
                .filter(|m| m.role == MessageRole::Assistant)
                .count(),
            1
        );
    }

    #[test]
    fn test_final_flag_replaces_not_appends() {
        let mut turn = ChatTurn::new(&request(), Vec::new());
        turn.handle_event(content("A"));
        turn.handle_event(content_final("B"));
        let finished = turn.finalize_done();
        assert_eq!(finished.assistant.unwrap().content, "B");
    }

    #[test]
    fn test_artifact_stream_separate_from_text() {
        let mut turn = ChatTurn::new(&request(), Vec::new());
        turn.handle_event(content("Resumo."));
        turn.handle_event(StreamEvent::ArtifactStart {
            artifact: header("a1"),
        });
        turn.handle_event(StreamEvent::ArtifactContent {
            artifact_id: "a1".to_string(),
            content: "## Causa\n".to_string(),
        });
        turn.handle_event(StreamEvent::ArtifactContent {
            artifact_id: "a1".to_string(),
            content: "Disco cheio.".to_string(),
        });
        let (_, notes) = turn.handle_event(StreamEvent::ArtifactEnd {
            artifact_id: "a1".to_string(),
        });
        assert!(matches!(notes[0], TurnNote::ArtifactFinalized(_)));

        let finished = turn.finalize_done();
        assert_eq!(finished.artifacts.len(), 1);
        assert_eq!(finished.artifacts[0].content, "## Causa\nDisco cheio.");
        let assistant = finished.assistant.unwrap();
        // 制品内容不重复出现在消息文本里
        assert_eq!(assistant.content, "Resumo.");
        assert_eq!(assistant.artifact_ids, vec!["a1".to_string()]);
    }

    #[test]
    fn test_artifact_content_unknown_id_noop() {
        let mut turn = ChatTurn::new(&request(), Vec::new());
        let (control, notes) = turn.handle_event(StreamEvent::ArtifactContent {
            artifact_id: "ghost".to_string(),
            content: "nada".to_string(),
        });
        assert_eq!(control, TurnControl::Continue);
        assert!(notes.is_empty());
    }

    #[test]
    fn test_legacy_chunk_monotonic_guard() {
        let mut turn = ChatTurn::new(&request(), Vec::new());
        turn.handle_event(content("texto já bem mais longo que o chunk"));
        // 更短的遗留片段被忽略
        turn.handle_event(StreamEvent::Chunk {
            data: "{'content': 'curto'}".to_string(),
        });
        let finished = turn.finalize_done();
        assert_eq!(
            finished.assistant.unwrap().content,
            "texto já bem mais longo que o chunk"
        );
    }

    #[test]
    fn test_legacy_chunk_adopted_when_longer() {
        let mut turn = ChatTurn::new(&request(), Vec::new());
        turn.handle_event(content("abc"));
        turn.handle_event(StreamEvent::Chunk {
            data: "{'content': 'abcdef completo'}".to_string(),
        });
        let finished = turn.finalize_done();
        assert_eq!(finished.assistant.unwrap().content, "abcdef completo");
    }

    #[test]
    fn test_done_with_empty_stream_removes_placeholder() {
        let pre = vec![Message::user("oi")];
        let mut turn = ChatTurn::new(&request(), pre.clone());
        turn.handle_event(StreamEvent::Start);
        let finished = turn.finalize_done();
        assert!(finished.assistant.is_none());
        assert_eq!(finished.messages.len(), pre.len());
    }

    #[test]
    fn test_cancel_before_content_restores_list() {
        let pre = vec![Message::user("oi")];
        let mut turn = ChatTurn::new(&request(), pre.clone());
        turn.handle_event(StreamEvent::Start);
        let finished = turn.finalize_cancelled();
        assert_eq!(finished.end, TurnEnd::Cancelled);
        assert!(finished.assistant.is_none());
        assert_eq!(finished.messages.len(), pre.len());
        assert_eq!(finished.messages[0].id, pre[0].id);
    }

    #[test]
    fn test_cancel_keeps_partial_content() {
        let mut turn = ChatTurn::new(&request(), Vec::new());
        turn.handle_event(content("parcial"));
        let finished = turn.finalize_cancelled();
        assert_eq!(finished.assistant.unwrap().content, "parcial");
    }

    #[test]
    fn test_error_replaces_message_text() {
        let mut turn = ChatTurn::new(&request(), Vec::new());
        turn.handle_event(content("parcial"));
        let finished = turn.finalize_error("服务暂时不可用，请稍后重试".to_string());
        assert_eq!(finished.end, TurnEnd::Failed);
        assert_eq!(finished.assistant.unwrap().content, "服务暂时不可用，请稍后重试");
    }

    #[test]
    fn test_fallback_runs_only_without_streamed_artifacts() {
        let section_body: String = "Investigação detalhada do incidente. "
            .chars()
            .cycle()
            .take(300)
            .collect();
        let full = format!("Resumo.\n\n## Análise de Causa Raiz\n\n{}", section_body);

        let mut turn = ChatTurn::new(&request(), Vec::new());
        turn.handle_event(content_final(&full));
        let finished = turn.finalize_done();

        assert_eq!(finished.artifacts.len(), 1);
        assert_eq!(finished.artifacts[0].source, ArtifactSource::Llm);
        let assistant = finished.assistant.unwrap();
        assert_eq!(assistant.content, "Resumo.");
        assert_eq!(assistant.artifact_ids.len(), 1);
    }

    #[test]
    fn test_no_fallback_when_artifacts_streamed() {
        let section_body: String = "Investigação detalhada do incidente. "
            .chars()
            .cycle()
            .take(300)
            .collect();
        let full = format!("## Análise de Causa Raiz\n\n{}", section_body);

        let mut turn = ChatTurn::new(&request(), Vec::new());
        turn.handle_event(StreamEvent::ArtifactStart {
            artifact: header("a1"),
        });
        turn.handle_event(StreamEvent::ArtifactContent {
            artifact_id: "a1".to_string(),
            content: "relatório".to_string(),
        });
        turn.handle_event(StreamEvent::ArtifactEnd {
            artifact_id: "a1".to_string(),
        });
        turn.handle_event(content_final(&full));
        let finished = turn.finalize_done();

        // 只有显式流出的制品，文本未被回退检测切割
        assert_eq!(finished.artifacts.len(), 1);
        assert_eq!(finished.artifacts[0].id, "a1");
        assert!(finished.assistant.unwrap().content.contains("Análise de Causa Raiz"));
    }

    #[test]
    fn test_unfinished_draft_discarded_and_id_pruned() {
        let mut turn = ChatTurn::new(&request(), Vec::new());
        turn.handle_event(content("Resumo."));
        turn.handle_event(StreamEvent::ArtifactStart {
            artifact: header("a1"),
        });
        turn.handle_event(StreamEvent::ArtifactContent {
            artifact_id: "a1".to_string(),
            content: "nunca termina".to_string(),
        });
        // 没有 artifact_end
        let finished = turn.finalize_done();
        assert!(finished.artifacts.is_empty());
        assert!(finished.assistant.unwrap().artifact_ids.is_empty());
    }
}
