//! 流式回复管线
//!
//! 该模块消费代理服务的分块 SSE 响应，增量重建助手消息文本，
//! 并从同一条流中分离出内嵌的制品子文档。
//!
//! # 主要组件
//!
//! - `frame`: 帧解码器（字节流 → 协议事件，对分块边界不敏感）
//! - `event`: 协议事件联合类型与内容载荷处理
//! - `assembler`: 制品组装器（按 id 的草稿缓冲）
//! - `reconciler`: 占位消息协调（乐观 UI 的替换与清理）
//! - `turn`: 事件分发器与消息累积器（一次发送一个 `ChatTurn`）
//! - `fallback`: 终结后的回退制品检测（正则分节提取）
//! - `pipeline`: 读循环驱动（传输、取消、持久化的接线）
//! - `error`: 流式错误类型

pub mod assembler;
pub mod error;
pub mod event;
pub mod fallback;
pub mod frame;
pub mod pipeline;
pub mod reconciler;
pub mod turn;

pub use assembler::ArtifactAssembler;
pub use error::StreamError;
pub use event::{ContentPayload, StreamEvent};
pub use fallback::{detect_artifacts, MIN_SECTION_CHARS};
pub use frame::FrameDecoder;
pub use pipeline::{ChatError, ChatPipeline, TurnOutcome, TurnStatus};
pub use turn::{ChatTurn, TurnControl, TurnNote};
