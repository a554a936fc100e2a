//! 数据模型模块
//!
//! 定义会话、消息、制品等核心数据结构。

mod artifact;
mod chat;

pub use artifact::{Artifact, ArtifactHeader, ArtifactSource, ArtifactType};
pub use chat::{Attachment, ChatRequest, Message, MessageRole, Session};
