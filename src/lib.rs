//! opschat - 运维助手的流式对话客户端
//!
//! 核心是一条流式回复管线：把代理服务的 SSE 字节流还原为协议事件，
//! 增量重建助手消息，从同一条流中分离内嵌的报告制品，支持中途取消，
//! 并把终结后的消息与制品写入本地 SQLite。
//!
//! # 模块
//!
//! - `models`: 会话、消息、制品数据结构
//! - `transport`: 可取消的 HTTP 流式传输
//! - `streaming`: 帧解码、事件分发、消息累积、制品组装、回退检测
//! - `store`: SQLite 持久化
//! - `config`: TOML 配置

pub mod config;
pub mod models;
pub mod store;
pub mod streaming;
pub mod transport;

pub use config::ClientConfig;
pub use models::{Artifact, ChatRequest, Message, Session};
pub use store::{SessionMessageStore, SqliteMessageStore};
pub use streaming::{ChatPipeline, TurnNote, TurnOutcome, TurnStatus};
pub use transport::{HttpStreamTransport, StreamTransport};
