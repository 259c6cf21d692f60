use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::errors::{Fault, Result};
use crate::infrastructure::logger::{LogFormat, Sanitizer};

/// 最小会话 TTL（秒）
pub const MIN_CONTEXT_TTL_SECS: u64 = 3600;

/// 上下文窗口允许范围（token）
pub const CONTEXT_WINDOW_RANGE: (usize, usize) = (512, 8192);

/// 会话存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "sqlite" => Ok(StoreBackend::Sqlite),
            _ => Err(format!("Unknown store backend: {}", s)),
        }
    }
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Memory => write!(f, "memory"),
            StoreBackend::Sqlite => write!(f, "sqlite"),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Shared-context voice assistant runtime with pluggable extensions"
)]
pub struct RuntimeConfig {
    // 扩展配置
    /// 扩展目录
    #[arg(long, env = "HIVEMIND_EXTENSIONS_DIR", default_value = "plugins")]
    pub extensions_dir: PathBuf,

    /// 扩展清单文件名
    #[arg(long, env = "HIVEMIND_MANIFEST_FILE", default_value = "plugin.json")]
    pub manifest_file: String,

    /// 扫描时跳过的目录前缀
    #[arg(long, env = "HIVEMIND_RESERVED_PREFIX", default_value = "_")]
    pub reserved_prefix: String,

    /// 单次分发超时（秒）
    #[arg(long, env = "HIVEMIND_DISPATCH_TIMEOUT", default_value_t = 30)]
    pub dispatch_timeout_secs: u64,

    /// 健康检查超时（秒）
    #[arg(long, env = "HIVEMIND_HEALTH_TIMEOUT", default_value_t = 5)]
    pub health_timeout_secs: u64,

    // 会话上下文配置
    /// 会话 TTL（秒），最小 3600
    #[arg(long, env = "HIVEMIND_CONTEXT_TTL", default_value_t = 604_800)]
    pub context_ttl_secs: u64,

    #[arg(long, env = "HIVEMIND_CONTEXT_PREFIX", default_value = "hivemind:context")]
    pub context_key_prefix: String,

    /// 存储后端: memory, sqlite
    #[arg(long, env = "HIVEMIND_STORE", default_value = "memory")]
    pub store_backend: StoreBackend,

    /// SQLite 数据库路径（仅 sqlite 后端使用）
    #[arg(long, env = "HIVEMIND_SQLITE_PATH", default_value = "./data/hivemind.db")]
    pub sqlite_path: PathBuf,

    /// 每次渲染带入的消息数
    #[arg(long, env = "HIVEMIND_RENDER_WINDOW", default_value_t = 20)]
    pub render_window: usize,

    // LLM 配置
    /// OpenAI 兼容接口地址（本地 llama.cpp server 等）
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "http://localhost:8080/v1")]
    pub openai_base_url: String,

    #[arg(long, env = "OPENAI_API_KEY", default_value = "")]
    pub openai_api_key: String,

    #[arg(long, env = "OPENAI_MODEL", default_value = "phi-3-mini-4k-instruct")]
    pub openai_model: String,

    /// 上下文窗口（512–8192）
    #[arg(long, env = "HIVEMIND_CONTEXT_WINDOW", default_value_t = 2048)]
    pub context_window: usize,

    #[arg(long, env = "HIVEMIND_MAX_TOKENS", default_value_t = 512)]
    pub max_tokens: u32,

    /// 采样温度（0.0–2.0）
    #[arg(long, env = "HIVEMIND_TEMPERATURE", default_value_t = 0.7)]
    pub temperature: f32,

    /// 单次执行的用户输入（未提供时只做启动自检）
    #[arg(short, long, env = "HIVEMIND_INPUT")]
    pub input_message: Option<String>,

    /// 单次执行时使用的客户端 ID
    #[arg(long, env = "HIVEMIND_CLIENT_ID", default_value = "cli")]
    pub client_id: String,

    /// 日志格式: pretty, compact, json
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,
}

impl RuntimeConfig {
    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.context_ttl_secs < MIN_CONTEXT_TTL_SECS {
            return Err(Fault::configuration(
                "context_ttl",
                format!(
                    "must be at least {} seconds, got {}",
                    MIN_CONTEXT_TTL_SECS, self.context_ttl_secs
                ),
            ));
        }

        let (min, max) = CONTEXT_WINDOW_RANGE;
        if !(min..=max).contains(&self.context_window) {
            return Err(Fault::configuration(
                "context_window",
                format!("must be between {} and {}, got {}", min, max, self.context_window),
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Fault::configuration(
                "temperature",
                format!("must be between 0.0 and 2.0, got {}", self.temperature),
            ));
        }

        if self.max_tokens == 0 {
            return Err(Fault::configuration("max_tokens", "must be positive"));
        }

        if self.manifest_file.trim().is_empty() {
            return Err(Fault::configuration("manifest_file", "must not be empty"));
        }

        if self.dispatch_timeout_secs == 0 {
            return Err(Fault::configuration("dispatch_timeout", "must be positive"));
        }

        if self.openai_base_url.trim().is_empty() {
            return Err(Fault::configuration("openai_base_url", "must not be empty"));
        }

        Ok(())
    }

    pub fn context_ttl(&self) -> Duration {
        Duration::from_secs(self.context_ttl_secs)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    /// 脱敏后的配置摘要（用于启动日志）
    pub fn summary(&self) -> Vec<(&'static str, String)> {
        vec![
            ("extensions_dir", self.extensions_dir.display().to_string()),
            ("manifest_file", self.manifest_file.clone()),
            ("store_backend", self.store_backend.to_string()),
            ("sqlite_path", self.sqlite_path.display().to_string()),
            ("context_ttl_secs", self.context_ttl_secs.to_string()),
            ("context_key_prefix", self.context_key_prefix.clone()),
            ("render_window", self.render_window.to_string()),
            ("openai_base_url", Sanitizer::url(&self.openai_base_url)),
            ("openai_api_key", Sanitizer::api_key(&self.openai_api_key)),
            ("openai_model", self.openai_model.clone()),
            ("context_window", self.context_window.to_string()),
            ("max_tokens", self.max_tokens.to_string()),
            ("temperature", self.temperature.to_string()),
            ("log_format", self.log_format.to_string()),
        ]
    }
}
