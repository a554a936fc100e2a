//! 会话与消息数据结构
//!
//! 消息的可见文本在流式过程中可变，终结后不再修改。
//! 同一会话的消息列表中，处于占位（pending）状态的助手消息最多只有一条。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// 会话
// ============================================================================

/// 会话
///
/// 消息列表和制品列表的归属单位。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// 唯一标识符
    pub id: String,
    /// 会话标题
    pub title: String,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 最后活跃时间
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// 创建新会话
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// 消息
// ============================================================================

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// 用户消息
    User,
    /// 助手消息
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// 附件引用
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    /// 附件名称
    pub name: String,
    /// 附件引用（URL 或存储键）
    pub reference: String,
}

/// 消息
///
/// 列表中的消息一律按稳定 id 更新，绝不按下标更新，
/// 因为占位协调过程可能在挂起点之间改写列表结构。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// 稳定 id
    pub id: String,
    /// 角色
    pub role: MessageRole,
    /// 可见文本（终结前可变）
    pub content: String,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 产生该消息的模型
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// 是否启用了联网检索
    #[serde(default)]
    pub web_search: bool,
    /// 编辑时间
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    /// 附件列表
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// 该消息名下的制品 id
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifact_ids: Vec<String>,
    /// 占位状态（乐观插入的"思考中"消息）
    #[serde(default)]
    pub pending: bool,
}

impl Message {
    /// 创建用户消息
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: MessageRole::User,
            content: content.into(),
            created_at: Utc::now(),
            model: None,
            web_search: false,
            edited_at: None,
            attachments: Vec::new(),
            artifact_ids: Vec::new(),
            pending: false,
        }
    }

    /// 创建助手占位消息
    pub fn placeholder() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: MessageRole::Assistant,
            content: String::new(),
            created_at: Utc::now(),
            model: None,
            web_search: false,
            edited_at: None,
            attachments: Vec::new(),
            artifact_ids: Vec::new(),
            pending: true,
        }
    }

    /// 创建空的助手消息（真实回复的初始形态）
    pub fn assistant(model: Option<&str>, web_search: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: MessageRole::Assistant,
            content: String::new(),
            created_at: Utc::now(),
            model: model.map(String::from),
            web_search,
            edited_at: None,
            attachments: Vec::new(),
            artifact_ids: Vec::new(),
            pending: false,
        }
    }

    /// 是否为空的助手消息（无文本、无制品）
    pub fn is_empty_assistant(&self) -> bool {
        self.role == MessageRole::Assistant
            && self.content.is_empty()
            && self.artifact_ids.is_empty()
    }
}

// ============================================================================
// 发送请求
// ============================================================================

/// 一次发送的请求参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// 会话 id
    pub session_id: String,
    /// 用户输入
    pub prompt: String,
    /// 模型标识
    pub model: String,
    /// 是否启用联网检索工具
    #[serde(default)]
    pub web_search: bool,
    /// 功能开关
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub features: serde_json::Map<String, serde_json::Value>,
    /// 附件引用
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl ChatRequest {
    /// 创建请求
    pub fn new(
        session_id: impl Into<String>,
        prompt: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            prompt: prompt.into(),
            model: model.into(),
            web_search: false,
            features: serde_json::Map::new(),
            attachments: Vec::new(),
        }
    }

    /// 启用联网检索
    pub fn with_web_search(mut self, enabled: bool) -> Self {
        self.web_search = enabled;
        self
    }
}
