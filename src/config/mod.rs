//! 客户端配置
//!
//! 配置文件为 TOML，默认位于用户配置目录下的 `opschat/config.toml`。
//! 文件不存在时使用默认值，首次保存时自动创建目录。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 文件读写错误
    #[error("配置文件读写错误: {0}")]
    Io(#[from] std::io::Error),

    /// TOML 解析错误
    #[error("配置解析错误: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML 序列化错误
    #[error("配置序列化错误: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// 无法定位用户配置目录
    #[error("无法定位用户配置目录")]
    NoConfigDir,
}

/// 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// 代理服务地址
    pub base_url: String,
    /// API 密钥（可选，服务端可能不要求）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// 默认模型
    pub model: String,
    /// 默认是否启用联网检索
    pub web_search: bool,
    /// 数据库文件路径（缺省时放在配置目录下）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    /// 随请求透传的功能开关
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub features: serde_json::Map<String, serde_json::Value>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            api_key: None,
            model: "ops-large".to_string(),
            web_search: false,
            db_path: None,
            features: serde_json::Map::new(),
        }
    }
}

impl ClientConfig {
    /// 从默认位置加载；文件不存在时返回默认配置
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::default_path()?)
    }

    /// 从指定路径加载
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("[CONFIG] 配置文件不存在，使用默认配置: {}", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        let config = toml::from_str(&raw)?;
        info!("[CONFIG] 配置已加载: {}", path.display());
        Ok(config)
    }

    /// 保存到默认位置
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::default_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// 默认配置文件路径
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(dirs::config_dir()
            .ok_or(ConfigError::NoConfigDir)?
            .join("opschat")
            .join("config.toml"))
    }

    /// 数据库文件路径（缺省时与配置文件同目录）
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.db_path {
            Some(path) => Ok(path.clone()),
            None => Ok(dirs::config_dir()
                .ok_or(ConfigError::NoConfigDir)?
                .join("opschat")
                .join("sessions.db")),
        }
    }

    /// 覆盖代理服务地址
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// 覆盖默认模型
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

// ============================================================================
// 测试模块
// ============================================================================
