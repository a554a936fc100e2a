//! SSE 帧解码器
//!
//! 把任意切分的字节块还原为离散的协议事件序列。内部只维护一个
//! 跨块的字节缓冲：每次喂入后按换行切分，处理所有完整行，最后
//! 一段（可能是下一行的前半截）留作新缓冲。缓冲按字节保存，
//! UTF-8 码点被块边界劈开也不会破坏解码。
//!
//! 只有带 `data:` 前缀的行才是帧，其余（心跳、注释、event 行）
//! 直接丢弃。单帧解析失败记录日志后跳过，绝不终止整条流。

use tracing::{debug, warn};

use super::event::StreamEvent;

/// 帧解码器
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// 跨块结转缓冲
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// 创建解码器
    pub fn new() -> Self {
        Self::default()
    }

    /// 喂入一个字节块，返回其中包含的完整事件
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            // 去掉行尾的 \n（及可能的 \r）
            if let Some(event) = Self::parse_line(&line[..line.len() - 1]) {
                events.push(event);
            }
        }
        events
    }

    /// 输入结束：对非空的缓冲残余做最后一次解析尝试
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let rest = std::mem::take(&mut self.buf);
        if rest.iter().all(|b| b.is_ascii_whitespace()) {
            return Vec::new();
        }
        Self::parse_line(&rest).into_iter().collect()
    }

    /// 解析一行：带 data 前缀的行才是帧
    fn parse_line(line: &[u8]) -> Option<StreamEvent> {
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches('\r');

        let payload = text.strip_prefix("data:")?.trim_start();
        if payload.is_empty() {
            return None;
        }

        match serde_json::from_str::<StreamEvent>(payload) {
            Ok(event) => Some(event),
            Err(e) => {
                let preview: String = payload.chars().take(200).collect();
                warn!("[FRAME] 帧解析失败，跳过: {} - 载荷: {}", e, preview);
                None
            }
        }
    }
}

impl Drop for FrameDecoder {
    fn drop(&mut self) {
        if !self.buf.is_empty() {
            debug!("[FRAME] 丢弃未消费的缓冲残余: {} 字节", self.buf.len());
        }
    }
}

// ============================================================================
// 测试模块
// ============================================================================
