//! 制品数据结构
//!
//! 制品是从助手回复中拆分出来的结构化报告子文档（根因分析、
//! 告警分类表等），与普通消息文本分开展示。组装期间内容只追加，
//! 终结后不可变；缓冲中的内容在终结前绝不暴露给上层。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 制品类型（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    /// 根因分析报告
    RcaAnalysis,
    /// 告警分类表
    AlarmClassification,
    /// 结构化分析
    StructuredAnalysis,
    /// 其他报告
    Report,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::RcaAnalysis => "rca_analysis",
            ArtifactType::AlarmClassification => "alarm_classification",
            ArtifactType::StructuredAnalysis => "structured_analysis",
            ArtifactType::Report => "report",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rca_analysis" => Some(ArtifactType::RcaAnalysis),
            "alarm_classification" => Some(ArtifactType::AlarmClassification),
            "structured_analysis" => Some(ArtifactType::StructuredAnalysis),
            "report" => Some(ArtifactType::Report),
            _ => None,
        }
    }
}

/// 制品来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactSource {
    /// 服务端显式流出
    RuleBased,
    /// 终结后由回退检测恢复
    Llm,
}

impl ArtifactSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactSource::RuleBased => "rule-based",
            ArtifactSource::Llm => "llm",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rule-based" => Some(ArtifactSource::RuleBased),
            "llm" => Some(ArtifactSource::Llm),
            _ => None,
        }
    }
}

/// artifact_start 事件携带的制品头
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactHeader {
    /// 服务端下发的制品 id
    pub artifact_id: String,
    /// 标题
    pub title: String,
    /// 类型
    pub artifact_type: ArtifactType,
    /// 意图标签
    #[serde(default)]
    pub intent: Option<String>,
    /// 来源
    #[serde(default = "default_source")]
    pub source: ArtifactSource,
}

fn default_source() -> ArtifactSource {
    ArtifactSource::RuleBased
}

/// 已终结的制品
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// 制品 id
    pub id: String,
    /// 所属会话
    pub session_id: String,
    /// 所属消息
    pub message_id: String,
    /// 类型
    pub artifact_type: ArtifactType,
    /// 标题
    pub title: String,
    /// Markdown 内容（终结后不可变）
    pub content: String,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 来源
    pub source: ArtifactSource,
    /// 意图标签
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_type_roundtrip() {
        for t in [
            ArtifactType::RcaAnalysis,
            ArtifactType::AlarmClassification,
            ArtifactType::StructuredAnalysis,
            ArtifactType::Report,
        ] {
            assert_eq!(ArtifactType::parse(t.as_str()), Some(t));
        }
        assert_eq!(ArtifactType::parse("unknown_kind"), None);
    }

    #[test]
    fn test_artifact_header_default_source() {
        let json = r#"{"artifact_id":"a1","title":"RCA","artifact_type":"rca_analysis"}"#;
        let header: ArtifactHeader = serde_json::from_str(json).unwrap();
        assert_eq!(header.source, ArtifactSource::RuleBased);
        assert!(header.intent.is_none());
    }

    #[test]
    fn test_artifact_source_wire_names() {
        assert_eq!(ArtifactSource::RuleBased.as_str(), "rule-based");
        assert_eq!(ArtifactSource::parse("llm"), Some(ArtifactSource::Llm));
    }
}
