//! 标准化错误处理
//!
//! 所有组件共享同一种故障类型 [`Fault`]：机器可读的分类、可读消息、
//! 时间戳以及结构化上下文。分类分为领域故障和基础设施故障两族。

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// 故障家族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultFamily {
    /// 领域故障：违反业务规则或领域状态无效
    Domain,
    /// 基础设施故障：外部系统（存储、网络、模型）出错
    Infrastructure,
}

/// 故障分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultKind {
    Validation,
    AudioProcessing,
    Generation,
    PluginExecution,
    Context,
    Storage,
    Network,
    ExternalApi,
    Configuration,
    ModelLoad,
}

impl FaultKind {
    /// 稳定的机器可读编码
    pub fn code(self) -> &'static str {
        match self {
            FaultKind::Validation => "VALIDATION_ERROR",
            FaultKind::AudioProcessing => "AUDIO_PROCESSING_ERROR",
            FaultKind::Generation => "GENERATION_ERROR",
            FaultKind::PluginExecution => "PLUGIN_EXECUTION_ERROR",
            FaultKind::Context => "CONTEXT_ERROR",
            FaultKind::Storage => "STORAGE_ERROR",
            FaultKind::Network => "NETWORK_ERROR",
            FaultKind::ExternalApi => "EXTERNAL_API_ERROR",
            FaultKind::Configuration => "CONFIGURATION_ERROR",
            FaultKind::ModelLoad => "MODEL_LOAD_ERROR",
        }
    }

    /// 错误类型名，用于记录中的 `error_type`
    pub fn type_name(self) -> &'static str {
        match self {
            FaultKind::Validation => "ValidationError",
            FaultKind::AudioProcessing => "AudioProcessingError",
            FaultKind::Generation => "GenerationError",
            FaultKind::PluginExecution => "PluginExecutionError",
            FaultKind::Context => "ContextError",
            FaultKind::Storage => "StorageError",
            FaultKind::Network => "NetworkError",
            FaultKind::ExternalApi => "ExternalApiError",
            FaultKind::Configuration => "ConfigurationError",
            FaultKind::ModelLoad => "ModelLoadError",
        }
    }

    /// 从编码反查分类
    pub fn from_code(code: &str) -> Option<Self> {
        Self::all().iter().copied().find(|k| k.code() == code)
    }

    /// 所属家族
    pub fn family(self) -> FaultFamily {
        match self {
            FaultKind::Validation
            | FaultKind::AudioProcessing
            | FaultKind::Generation
            | FaultKind::PluginExecution
            | FaultKind::Context => FaultFamily::Domain,
            FaultKind::Storage
            | FaultKind::Network
            | FaultKind::ExternalApi
            | FaultKind::Configuration
            | FaultKind::ModelLoad => FaultFamily::Infrastructure,
        }
    }

    /// 全部分类
    pub fn all() -> &'static [FaultKind] {
        &[
            FaultKind::Validation,
            FaultKind::AudioProcessing,
            FaultKind::Generation,
            FaultKind::PluginExecution,
            FaultKind::Context,
            FaultKind::Storage,
            FaultKind::Network,
            FaultKind::ExternalApi,
            FaultKind::Configuration,
            FaultKind::ModelLoad,
        ]
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// 插件执行故障的细分原因（写入上下文的 `reason` 键）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginFailure {
    /// 目标扩展未加载
    NotLoaded,
    /// 调用方施加的超时已到
    Timeout,
    /// 扩展返回了错误
    Raised,
    /// 扩展在执行中 panic
    Panicked,
    /// 生命周期钩子失败
    HookFailed,
}

impl PluginFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            PluginFailure::NotLoaded => "not_loaded",
            PluginFailure::Timeout => "timeout",
            PluginFailure::Raised => "raised",
            PluginFailure::Panicked => "panicked",
            PluginFailure::HookFailed => "hook_failed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "not_loaded" => Some(PluginFailure::NotLoaded),
            "timeout" => Some(PluginFailure::Timeout),
            "raised" => Some(PluginFailure::Raised),
            "panicked" => Some(PluginFailure::Panicked),
            "hook_failed" => Some(PluginFailure::HookFailed),
            _ => None,
        }
    }
}

const REASON_KEY: &str = "reason";
const UNAVAILABLE: &str = "unavailable";

/// 故障上下文
pub type FaultContext = BTreeMap<String, Value>;

/// 项目统一故障类型
#[derive(Error, Debug, Clone, PartialEq)]
#[error("[{}] {}", .kind.code(), .message)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub context: FaultContext,
}

impl Fault {
    /// 创建故障
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            context: FaultContext::new(),
        }
    }

    /// 添加上下文
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// 覆盖时间戳
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn family(&self) -> FaultFamily {
        self.kind.family()
    }

    /// 数据校验失败
    pub fn validation(field: &str, message: impl fmt::Display) -> Self {
        Self::new(
            FaultKind::Validation,
            format!("Validation failed for '{}': {}", field, message),
        )
        .with_context("field", field)
    }

    pub fn audio_processing(message: impl Into<String>) -> Self {
        Self::new(FaultKind::AudioProcessing, message)
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Generation, message)
    }

    /// 扩展执行失败
    pub fn plugin_execution(plugin: &str, intent: &str, message: impl fmt::Display) -> Self {
        Self::new(
            FaultKind::PluginExecution,
            format!(
                "Plugin '{}' failed to execute intent '{}': {}",
                plugin, intent, message
            ),
        )
        .with_context("plugin", plugin)
        .with_context("intent", intent)
    }

    /// 分发到未加载的扩展
    pub fn plugin_not_loaded(plugin: &str, intent: &str) -> Self {
        Self::plugin_execution(plugin, intent, format!("Plugin '{}' not loaded", plugin))
            .with_reason(PluginFailure::NotLoaded)
    }

    /// 调用方超时
    pub fn plugin_timeout(plugin: &str, intent: &str, after_ms: u128) -> Self {
        Self::plugin_execution(plugin, intent, format!("timed out after {} ms", after_ms))
            .with_reason(PluginFailure::Timeout)
            .with_context("timeout_ms", after_ms as u64)
    }

    pub fn context_fault(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Context, message)
    }

    /// 存储操作失败
    pub fn storage(operation: &str, message: impl fmt::Display) -> Self {
        Self::new(
            FaultKind::Storage,
            format!("Storage operation '{}' failed: {}", operation, message),
        )
        .with_context("operation", operation)
    }

    /// 存储不可达
    pub fn storage_unavailable(operation: &str, message: impl fmt::Display) -> Self {
        Self::storage(operation, message).with_context(REASON_KEY, UNAVAILABLE)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Network, message)
    }

    /// 外部 API 返回错误
    pub fn external_api(api: &str, status: Option<u16>, message: Option<&str>) -> Self {
        let text = match (status, message) {
            (Some(code), Some(msg)) => format!("API '{}' returned status {}: {}", api, code, msg),
            (Some(code), None) => format!("API '{}' returned status {}", api, code),
            (None, msg) => format!("API '{}' error: {}", api, msg.unwrap_or("Unknown error")),
        };
        Self::new(FaultKind::ExternalApi, text)
            .with_context("api_name", api)
            .with_context("status_code", status.map(Value::from).unwrap_or(Value::Null))
    }

    /// 配置错误
    pub fn configuration(field: &str, message: impl fmt::Display) -> Self {
        Self::new(
            FaultKind::Configuration,
            format!("Configuration error for '{}': {}", field, message),
        )
        .with_context("field", field)
    }

    /// 模型加载失败
    pub fn model_load(model_name: &str, model_path: &str, message: impl fmt::Display) -> Self {
        Self::new(
            FaultKind::ModelLoad,
            format!(
                "Failed to load model '{}' from '{}': {}",
                model_name, model_path, message
            ),
        )
        .with_context("model_name", model_name)
        .with_context("model_path", model_path)
    }

    /// 把无法归类的错误包装为本层的分类，保留原始类型名
    pub fn unexpected<E>(kind: FaultKind, what: &str, err: &E) -> Self
    where
        E: std::error::Error,
    {
        Self::new(kind, format!("{}: {}", what, err))
            .with_context("error_type", std::any::type_name::<E>())
    }

    /// 把扩展抛出的任意错误规范化为插件执行故障
    pub fn from_extension(plugin: &str, intent: &str, err: &anyhow::Error) -> Self {
        let (original_kind, error_type) = classify(err);
        Self::plugin_execution(plugin, intent, err)
            .with_reason(PluginFailure::Raised)
            .with_context("original_kind", original_kind)
            .with_context("error_type", error_type)
    }

    /// 扩展 panic
    pub fn from_panic(plugin: &str, intent: &str, payload: &(dyn std::any::Any + Send)) -> Self {
        Self::plugin_execution(plugin, intent, panic_message(payload))
            .with_reason(PluginFailure::Panicked)
            .with_context("original_kind", "PANIC")
            .with_context("error_type", "panic")
    }

    pub fn with_reason(self, reason: PluginFailure) -> Self {
        self.with_context(REASON_KEY, reason.as_str())
    }

    /// 插件执行故障的细分原因
    pub fn plugin_failure(&self) -> Option<PluginFailure> {
        if self.kind != FaultKind::PluginExecution {
            return None;
        }
        self.context
            .get(REASON_KEY)
            .and_then(Value::as_str)
            .and_then(PluginFailure::parse)
    }

    pub fn is_plugin_not_loaded(&self) -> bool {
        self.plugin_failure() == Some(PluginFailure::NotLoaded)
    }

    /// 存储是否不可达
    pub fn is_unavailable(&self) -> bool {
        self.kind == FaultKind::Storage
            && self.context.get(REASON_KEY).and_then(Value::as_str) == Some(UNAVAILABLE)
    }

    /// 导出为统一的记录结构（用于日志）
    ///
    /// `error_type` 优先取重新包装时保留的原始类型名
    pub fn record(&self) -> FaultRecord {
        let error_type = self
            .context
            .get("error_type")
            .and_then(Value::as_str)
            .unwrap_or(self.kind.type_name())
            .to_string();
        FaultRecord {
            kind: self.kind,
            code: self.kind.code().to_string(),
            family: self.family(),
            message: self.message.clone(),
            timestamp: self.timestamp.to_rfc3339(),
            context: self.context.clone(),
            error_type,
        }
    }
}

/// 故障记录：所有故障的统一序列化形态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultRecord {
    pub kind: FaultKind,
    pub code: String,
    pub family: FaultFamily,
    pub message: String,
    pub timestamp: String,
    pub context: FaultContext,
    pub error_type: String,
}

fn classify(err: &anyhow::Error) -> (&'static str, &'static str) {
    if let Some(fault) = err.downcast_ref::<Fault>() {
        return (fault.kind.code(), "Fault");
    }
    if err.downcast_ref::<std::io::Error>().is_some() {
        return ("UNCLASSIFIED", std::any::type_name::<std::io::Error>());
    }
    if err.downcast_ref::<serde_json::Error>().is_some() {
        return ("UNCLASSIFIED", std::any::type_name::<serde_json::Error>());
    }
    if err.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
        return ("UNCLASSIFIED", std::any::type_name::<tokio::time::error::Elapsed>());
    }
    ("UNCLASSIFIED", "anyhow::Error")
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

impl From<rusqlite::Error> for Fault {
    fn from(err: rusqlite::Error) -> Self {
        let fault = Fault::unexpected(FaultKind::Storage, "SQLite operation failed", &err);
        match err.sqlite_error_code() {
            Some(
                rusqlite::ErrorCode::CannotOpen
                | rusqlite::ErrorCode::SystemIoFailure
                | rusqlite::ErrorCode::PermissionDenied
                | rusqlite::ErrorCode::NotADatabase,
            ) => fault.with_context(REASON_KEY, UNAVAILABLE),
            _ => fault,
        }
    }
}

/// 项目结果类型别名
pub type Result<T> = std::result::Result<T, Fault>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes_round_trip() {
        for kind in FaultKind::all() {
            assert_eq!(FaultKind::from_code(kind.code()), Some(*kind));
        }
        assert_eq!(FaultKind::from_code("NOPE"), None);
    }

    #[test]
    fn test_families() {
        assert_eq!(FaultKind::PluginExecution.family(), FaultFamily::Domain);
        assert_eq!(FaultKind::Context.family(), FaultFamily::Domain);
        assert_eq!(FaultKind::Storage.family(), FaultFamily::Infrastructure);
        assert_eq!(FaultKind::Configuration.family(), FaultFamily::Infrastructure);
    }

    #[test]
    fn test_display_includes_code() {
        let fault = Fault::configuration("name", "missing");
        assert_eq!(
            fault.to_string(),
            "[CONFIGURATION_ERROR] Configuration error for 'name': missing"
        );
        assert_eq!(fault.context.get("field"), Some(&Value::from("name")));
    }

    #[test]
    fn test_plugin_not_loaded() {
        let fault = Fault::plugin_not_loaded("weather", "get_weather");
        assert_eq!(fault.kind, FaultKind::PluginExecution);
        assert!(fault.is_plugin_not_loaded());
        assert_eq!(fault.context.get("plugin"), Some(&Value::from("weather")));
    }

    #[test]
    fn test_from_extension_keeps_original_kind() {
        let inner = anyhow::Error::new(Fault::external_api("OpenWeather", Some(503), None));
        let fault = Fault::from_extension("weather", "get_weather", &inner);
        assert_eq!(fault.plugin_failure(), Some(PluginFailure::Raised));
        assert_eq!(
            fault.context.get("original_kind"),
            Some(&Value::from("EXTERNAL_API_ERROR"))
        );

        let plain = anyhow::anyhow!("boom");
        let fault = Fault::from_extension("weather", "get_weather", &plain);
        assert_eq!(
            fault.context.get("original_kind"),
            Some(&Value::from("UNCLASSIFIED"))
        );
    }

    #[test]
    fn test_unexpected_embeds_type_name() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        let fault = Fault::unexpected(FaultKind::Context, "Failed to add message", &io);
        let ty = fault.context.get("error_type").and_then(Value::as_str).unwrap();
        assert!(ty.contains("io::error::Error"));
    }

    #[test]
    fn test_unavailable_flag() {
        assert!(Fault::storage_unavailable("connect", "refused").is_unavailable());
        assert!(!Fault::storage("push", "bad").is_unavailable());
    }

    #[test]
    fn test_record_shape() {
        let record = Fault::external_api("Calendar", None, Some("down")).record();
        assert_eq!(record.code, "EXTERNAL_API_ERROR");
        assert_eq!(record.family, FaultFamily::Infrastructure);
        assert_eq!(record.message, "API 'Calendar' error: down");
        assert_eq!(record.context.get("status_code"), Some(&Value::Null));
        assert_eq!(record.error_type, "ExternalApiError");

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        let record = Fault::unexpected(FaultKind::Context, "Failed to add message", &io).record();
        assert!(record.error_type.contains("io::error::Error"));

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("error_type").is_some());
    }

    #[test]
    fn test_sqlite_cannot_open_is_unavailable() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
            None,
        );
        let fault = Fault::from(err);
        assert_eq!(fault.kind, FaultKind::Storage);
        assert!(fault.is_unavailable());

        let err = rusqlite::Error::QueryReturnedNoRows;
        assert!(!Fault::from(err).is_unavailable());
    }
}
