//! 制品组装器
//!
//! 按制品 id 维护草稿缓冲，与消息状态完全不相交。缓冲期间内容
//! 只追加且对上层不可见（避免残缺的 Markdown 刷爆重渲染）；
//! `finalize` 把缓冲移入冻结的制品记录并删除工作项。
//! 未知或已终结 id 的追加是静默 no-op。

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, warn};

use crate::models::{Artifact, ArtifactHeader};

/// 制品草稿
#[derive(Debug)]
struct ArtifactDraft {
    header: ArtifactHeader,
    buffer: String,
}

/// 制品组装器
#[derive(Debug, Default)]
pub struct ArtifactAssembler {
    /// 在组装中的草稿，key 为制品 id
    drafts: HashMap<String, ArtifactDraft>,
}

impl ArtifactAssembler {
    /// 创建组装器
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始一个制品：创建空缓冲
    pub fn start(&mut self, header: ArtifactHeader) {
        let id = header.artifact_id.clone();
        if self.drafts.contains_key(&id) {
            warn!("[ARTIFACT] 重复的 artifact_start，重置缓冲: id={}", id);
        }
        self.drafts.insert(
            id,
            ArtifactDraft {
                header,
                buffer: String::new(),
            },
        );
    }

    /// 追加内容到指定草稿；未知或已终结的 id 返回 false（no-op）
    pub fn append(&mut self, artifact_id: &str, content: &str) -> bool {
        match self.drafts.get_mut(artifact_id) {
            Some(draft) => {
                draft.buffer.push_str(content);
                true
            }
            None => {
                debug!("[ARTIFACT] 忽略未知 id 的内容块: id={}", artifact_id);
                false
            }
        }
    }

    /// 是否存在指定 id 的草稿
    pub fn has_draft(&self, artifact_id: &str) -> bool {
        self.drafts.contains_key(artifact_id)
    }

    /// 终结一个制品：缓冲移入冻结记录，删除工作项
    ///
    /// 未知 id 返回 None（no-op）。
    pub fn finalize(
        &mut self,
        artifact_id: &str,
        session_id: &str,
        message_id: &str,
    ) -> Option<Artifact> {
        let draft = self.drafts.remove(artifact_id)?;
        Some(Artifact {
            id: draft.header.artifact_id,
            session_id: session_id.to_string(),
            message_id: message_id.to_string(),
            artifact_type: draft.header.artifact_type,
            title: draft.header.title,
            content: draft.buffer,
            created_at: Utc::now(),
            source: draft.header.source,
            intent: draft.header.intent,
        })
    }

    /// 丢弃所有未终结的草稿，返回被丢弃的 id
    pub fn discard_unfinished(&mut self) -> Vec<String> {
        let ids: Vec<String> = self.drafts.keys().cloned().collect();
        if !ids.is_empty() {
            warn!("[ARTIFACT] 丢弃未终结的制品草稿: {:?}", ids);
            self.drafts.clear();
        }
        ids
    }
}

// ============================================================================
// 测试模块
// ============================================================================
