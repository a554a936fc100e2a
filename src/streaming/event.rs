//! 协议事件定义
//!
//! 线格式是以 `type` 为判别标签的 JSON 载荷，这里用一个内部标签的
//! serde 枚举作为唯一的协议真相来源：两代协议（结构化 `content` 与
//! 遗留 `chunk`）都是该枚举的显式成员，不做运行时格式嗅探。
//! 未识别的 `type` 落入 `Unknown`，忽略而非报错。

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;

use crate::models::ArtifactHeader;

// ============================================================================
// 事件联合类型
// ============================================================================

/// 协议事件
///
/// 每个变体对应线格式中一种载荷形态，仅在帧处理期间存在，不持久化。
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// 流已开始
    Start,
    /// 制品开始：创建空缓冲并登记到在途消息名下
    ArtifactStart {
        artifact: ArtifactHeader,
    },
    /// 制品内容：只进缓冲，不触碰可见文本
    ArtifactContent {
        artifact_id: String,
        content: String,
    },
    /// 制品结束：缓冲冻结为不可变记录
    ArtifactEnd {
        artifact_id: String,
    },
    /// 消息内容：默认追加；`final: true` 表示整体替换
    Content {
        content: ContentPayload,
        #[serde(default, rename = "final")]
        is_final: bool,
        #[serde(default)]
        artifact_id: Option<String>,
    },
    /// 遗留回退表示：从非结构化文本中尽力提取
    Chunk {
        data: String,
    },
    /// 终止：流正常结束
    Done {
        #[serde(default)]
        total_length: Option<u64>,
    },
    /// 终止：服务端错误
    Error {
        error: String,
    },
    /// 未识别的事件类型（忽略）
    #[serde(other)]
    Unknown,
}

// ============================================================================
// 内容载荷
// ============================================================================

/// content 事件的载荷：纯文本或块列表
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ContentPayload {
    /// 纯文本
    Text(String),
    /// 块列表（拼接各块的 text 字段归约为文本）
    Blocks(Vec<ContentBlock>),
}

/// 内容块，仅关心 text 字段
#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlock {
    #[serde(default)]
    pub text: Option<String>,
}

impl ContentPayload {
    /// 归约为文本并反转义
    pub fn into_text(self) -> String {
        let raw = match self {
            ContentPayload::Text(text) => text,
            ContentPayload::Blocks(blocks) => blocks
                .into_iter()
                .filter_map(|b| b.text)
                .collect::<Vec<_>>()
                .join(""),
        };
        unescape_text(&raw)
    }
}

/// 反转义载荷中的 `\n` / `\t` 序列
///
/// 服务端对换行和制表做了二次转义，JSON 解析后仍是字面的反斜杠序列。
pub fn unescape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.peek() {
                Some('n') => {
                    chars.next();
                    out.push('\n');
                }
                Some('t') => {
                    chars.next();
                    out.push('\t');
                }
                Some('\\') => {
                    chars.next();
                    out.push('\\');
                }
                _ => out.push(ch),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

// ============================================================================
// 遗留 chunk 提取
// ============================================================================

// 有界匹配：重复次数封顶，防止病态输入导致回溯爆炸
static SINGLE_QUOTED_CONTENT: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"'content'\s*:\s*'((?:[^'\\]|\\.){0,16384})'")
        .size_limit(64 * 1024 * 1024)
        .build()
        .expect("合法的正则")
});
static DOUBLE_QUOTED_CONTENT: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r#""content"\s*:\s*"((?:[^"\\]|\\.){0,16384})""#)
        .size_limit(64 * 1024 * 1024)
        .build()
        .expect("合法的正则")
});

/// 从遗留 chunk 的非结构化文本表示中尽力提取消息文本
///
/// 调用方必须套用单调进度保护：仅当提取结果严格长于当前累积文本时采用，
/// 避免残缺的遗留片段回退覆盖已有的完整内容。
pub fn extract_legacy_text(data: &str) -> Option<String> {
    let single = SINGLE_QUOTED_CONTENT
        .captures(data)
        .map(|c| c[1].to_string());
    let double = DOUBLE_QUOTED_CONTENT
        .captures(data)
        .map(|c| c[1].to_string());

    // 两种引号风格都可能出现，取提取更长的那个
    let best = match (single, double) {
        (Some(a), Some(b)) => Some(if a.len() >= b.len() { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }?;

    let text = unescape_quotes(&best);
    let text = unescape_text(&text);
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// 反转义提取结果中的引号序列
fn unescape_quotes(raw: &str) -> String {
    raw.replace("\\'", "'").replace("\\\"", "\"")
}

// ============================================================================
// 测试模块
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArtifactSource, ArtifactType};

    fn parse(json: &str) -> StreamEvent {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_start_and_done() {
        assert!(matches!(parse(r#"{"type":"start"}"#), StreamEvent::Start));
        match parse(r#"{"type":"done","total_length":42}"#) {
            StreamEvent::Done { total_length } => assert_eq!(total_length, Some(42)),
            other => panic!("意外的事件: {:?}", other),
        }
        assert!(matches!(
            parse(r#"{"type":"done"}"#),
            StreamEvent::Done { total_length: None }
        ));
    }

    #[test]
    fn test_parse_artifact_start() {
        let ev = parse(
            r#"{"type":"artifact_start","artifact":{"artifact_id":"a1","title":"RCA","artifact_type":"rca_analysis","intent":"diagnose","source":"rule-based"}}"#,
        );
        match ev {
            StreamEvent::ArtifactStart { artifact } => {
                assert_eq!(artifact.artifact_id, "a1");
                assert_eq!(artifact.artifact_type, ArtifactType::RcaAnalysis);
                assert_eq!(artifact.source, ArtifactSource::RuleBased);
                assert_eq!(artifact.intent.as_deref(), Some("diagnose"));
            }
            other => panic!("意外的事件: {:?}", other),
        }
    }

    #[test]
    fn test_parse_content_text_with_final() {
        let ev = parse(r#"{"type":"content","content":"B","final":true}"#);
        match ev {
            StreamEvent::Content {
                content, is_final, ..
            } => {
                assert!(is_final);
                assert_eq!(content.into_text(), "B");
            }
            other => panic!("意外的事件: {:?}", other),
        }
    }

    #[test]
    fn test_parse_content_blocks_reduced() {
        let ev = parse(
            r#"{"type":"content","content":[{"text":"Ol"},{"kind":"meta"},{"text":"á!"}]}"#,
        );
        match ev {
            StreamEvent::Content { content, .. } => {
                assert_eq!(content.into_text(), "Olá!");
            }
            other => panic!("意外的事件: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_ignored_variant() {
        assert!(matches!(
            parse(r#"{"type":"telemetry","x":1}"#),
            StreamEvent::Unknown
        ));
    }

    #[test]
    fn test_unescape_text() {
        assert_eq!(unescape_text("a\\nb\\tc"), "a\nb\tc");
        assert_eq!(unescape_text("a\\\\nb"), "a\\nb");
        assert_eq!(unescape_text("sem escapes"), "sem escapes");
    }

    #[test]
    fn test_extract_legacy_text_single_quotes() {
        let data = "{'type': 'message', 'content': 'Olá, tudo bem?\\nSim.'}";
        assert_eq!(
            extract_legacy_text(data).as_deref(),
            Some("Olá, tudo bem?\nSim.")
        );
    }

    #[test]
    fn test_extract_legacy_text_double_quotes() {
        let data = r#"chunk {"content": "partial text here"} trailing"#;
        assert_eq!(extract_legacy_text(data).as_deref(), Some("partial text here"));
    }

    #[test]
    fn test_extract_legacy_text_none() {
        assert!(extract_legacy_text("nothing to see").is_none());
        assert!(extract_legacy_text("'content': ''").is_none());
    }
}
