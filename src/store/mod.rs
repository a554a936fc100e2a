//! 会话持久化
//!
//! 消息与制品在各自的终结点写入本地 SQLite：用户消息在发送前落库，
//! 助手消息在流终结后落库，制品在终结时落库。占位消息和组装中的
//! 草稿永远不会进入存储。

mod sqlite;

use thiserror::Error;

use crate::models::{Artifact, Message, Session};

pub use sqlite::SqliteMessageStore;

/// 存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite 错误
    #[error("数据库错误: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON 列编解码错误
    #[error("JSON 编解码错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 文件系统错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 行数据损坏（非法枚举值或时间戳）
    #[error("行数据损坏: {0}")]
    Corrupt(String),
}

/// 会话存储接口
///
/// 实现必须可跨线程共享；所有方法都是同步的短操作。
pub trait SessionMessageStore: Send + Sync {
    /// 写入或更新会话
    fn upsert_session(&self, session: &Session) -> Result<(), StoreError>;

    /// 读取单个会话
    fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError>;

    /// 刷新会话的最后活跃时间
    fn touch_session(&self, session_id: &str) -> Result<(), StoreError>;

    /// 按最后活跃时间倒序列出会话
    fn list_sessions(&self) -> Result<Vec<Session>, StoreError>;

    /// 删除会话及其名下的消息和制品
    fn delete_session(&self, session_id: &str) -> Result<(), StoreError>;

    /// 写入或更新消息
    fn save_message(&self, session_id: &str, message: &Message) -> Result<(), StoreError>;

    /// 删除单条消息
    fn delete_message(&self, session_id: &str, message_id: &str) -> Result<(), StoreError>;

    /// 按写入顺序加载会话的全部消息
    fn load_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError>;

    /// 写入制品
    fn save_artifact(&self, artifact: &Artifact) -> Result<(), StoreError>;

    /// 加载会话的全部制品
    fn load_artifacts(&self, session_id: &str) -> Result<Vec<Artifact>, StoreError>;
}
