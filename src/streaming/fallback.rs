//! 回退制品检测
//!
//! 服务端偶尔会生成报告内容却没有发出显式的制品事件。流终结后，
//! 如果整个过程没有收集到任何制品 id，就对最终文本套用一组有序的
//! 分节规则，把可识别的报告小节切出来作为制品，剩余文本成为最终
//! 可见的消息内容。
//!
//! 每条规则：一个标题匹配模式；小节边界取下一个层级不深于当前标题
//! 的标题（或文本末尾）；短于阈值的小节视为不够充实，原样保留。
//! 提取自左向右进行，并对剩余文本重复，一条消息可恢复多个制品。

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;
use uuid::Uuid;

use crate::models::{Artifact, ArtifactSource, ArtifactType};

/// 小节最小字符数：低于此长度的小节不值得拆成制品
pub const MIN_SECTION_CHARS: usize = 200;

/// 分节规则
struct SectionRule {
    artifact_type: ArtifactType,
    default_title: &'static str,
    heading: Regex,
}

/// 有序规则表：顺序即优先级
static SECTION_RULES: Lazy<Vec<SectionRule>> = Lazy::new(|| {
    vec![
        SectionRule {
            artifact_type: ArtifactType::RcaAnalysis,
            default_title: "Análise de Causa Raiz",
            heading: Regex::new(
                r"(?mi)^(#{1,6})[ \t]+.*\b(an[aá]lise de causa[ \-]raiz|root cause analysis|rca)\b.*$",
            )
            .expect("合法的正则"),
        },
        SectionRule {
            artifact_type: ArtifactType::AlarmClassification,
            default_title: "Classificação de Alarmes",
            heading: Regex::new(
                r"(?mi)^(#{1,6})[ \t]+.*\b(classifica[çc][ãa]o de alarmes|alarm classification)\b.*$",
            )
            .expect("合法的正则"),
        },
        SectionRule {
            artifact_type: ArtifactType::StructuredAnalysis,
            default_title: "Análise Estruturada",
            heading: Regex::new(
                r"(?mi)^(#{1,6})[ \t]+.*\b(an[aá]lise estruturada|structured analysis)\b.*$",
            )
            .expect("合法的正则"),
        },
    ]
});

/// 通用标题模式，用于定位小节边界
static ANY_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(#{1,6})[ \t]").expect("合法的正则"));

/// 对最终文本运行回退检测
///
/// 返回恢复出的制品列表（来源标记为 `llm`）和剩余文本。
/// 剩余文本就是最终展示给用户的消息内容。
pub fn detect_artifacts(
    session_id: &str,
    message_id: &str,
    text: &str,
) -> (Vec<Artifact>, String) {
    let mut remainder = text.to_string();
    let mut recovered = Vec::new();

    for rule in SECTION_RULES.iter() {
        let mut search_from = 0;
        loop {
            let caps = match rule.heading.captures(&remainder[search_from..]) {
                Some(c) => c,
                None => break,
            };
            let whole = caps.get(0).expect("捕获 0 总是存在");
            let depth = caps.get(1).map(|m| m.as_str().len()).unwrap_or(1);
            let start = search_from + whole.start();
            let heading_end = search_from + whole.end();

            let end = section_end(&remainder, heading_end, depth);
            let section = &remainder[start..end];

            if section.chars().count() >= MIN_SECTION_CHARS {
                let title = heading_title(whole.as_str())
                    .unwrap_or_else(|| rule.default_title.to_string());
                info!(
                    "[FALLBACK] 恢复制品: type={} title={} chars={}",
                    rule.artifact_type.as_str(),
                    title,
                    section.chars().count()
                );
                recovered.push(Artifact {
                    id: Uuid::new_v4().to_string(),
                    session_id: session_id.to_string(),
                    message_id: message_id.to_string(),
                    artifact_type: rule.artifact_type,
                    title,
                    content: section.trim().to_string(),
                    created_at: Utc::now(),
                    source: ArtifactSource::Llm,
                    intent: None,
                });
                remainder.replace_range(start..end, "");
                // 从切除点继续，对剩余文本重复匹配
                search_from = start;
            } else {
                // 小节不够充实，原样保留，跳过这个标题继续找
                search_from = heading_end;
            }
            if search_from >= remainder.len() {
                break;
            }
        }
    }

    (recovered, tidy_remainder(&remainder))
}

/// 定位小节结束位置：下一个层级不深于 `depth` 的标题起点，或文本末尾
fn section_end(text: &str, from: usize, depth: usize) -> usize {
    for caps in ANY_HEADING.captures_iter(&text[from..]) {
        let hashes = caps.get(1).map(|m| m.as_str().len()).unwrap_or(usize::MAX);
        if hashes <= depth {
            return from + caps.get(0).expect("捕获 0 总是存在").start();
        }
    }
    text.len()
}

/// 从标题行提取标题文本
fn heading_title(heading_line: &str) -> Option<String> {
    let title = heading_line.trim_start_matches('#').trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

/// 整理剩余文本：压缩切除留下的连续空行
fn tidy_remainder(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

// ============================================================================
// 测试模块
// ============================================================================
