//! 扩展清单
//!
//! 每个扩展目录附带一份 JSON 清单（`plugin.json`），声明名字、版本、
//! 支持的意图和触发词。

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Fault, Result};

/// 清单必填字段
pub const REQUIRED_FIELDS: &[&str] = &["name", "version", "description", "intents"];

/// 扩展清单
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// 注册表内唯一的扩展名
    pub name: String,
    /// 语义化版本（`major.minor.patch`）
    pub version: String,
    pub description: String,
    /// 支持的意图，保持声明顺序
    pub intents: Vec<String>,
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Manifest {
    /// 创建启用状态、无触发词的清单
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        intents: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
            intents,
            triggers: Vec::new(),
            enabled: true,
        }
    }

    pub fn with_triggers(mut self, triggers: Vec<String>) -> Self {
        self.triggers = triggers;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// 解析并校验清单文本，`source` 用于故障消息
    pub fn parse(raw: &str, source: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(raw).map_err(|e| {
            Fault::configuration("plugin.json", format!("Invalid JSON in {}: {}", source, e))
                .with_context("source", source)
        })?;

        let object = document.as_object().ok_or_else(|| {
            Fault::configuration("plugin.json", format!("{} is not a JSON object", source))
                .with_context("source", source)
        })?;

        for field in REQUIRED_FIELDS {
            if !object.contains_key(*field) {
                return Err(Fault::configuration(
                    field,
                    format!("Missing required field '{}' in {}", field, source),
                )
                .with_context("source", source));
            }
        }

        let manifest: Manifest = serde_json::from_value(document).map_err(|e| {
            Fault::configuration("plugin.json", format!("Malformed manifest {}: {}", source, e))
                .with_context("source", source)
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// 读取并校验 `path` 处的清单
    pub async fn load(path: &Path) -> Result<Self> {
        let source = path.display().to_string();
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Fault::configuration(
                    "plugin.json",
                    format!("Manifest not found at {}", source),
                )
                .with_context("source", source));
            }
            Err(e) => {
                return Err(Fault::unexpected(
                    crate::errors::FaultKind::Configuration,
                    &format!("Failed to read manifest {}", source),
                    &e,
                )
                .with_context("field", "plugin.json"));
            }
        };
        Self::parse(&raw, &source)
    }

    /// 校验声明层面的约束
    pub fn validate(&self) -> Result<()> {
        require_non_empty("name", &self.name)?;
        require_non_empty("version", &self.version)?;
        require_non_empty("description", &self.description)?;

        if !is_semver(self.version.trim()) {
            return Err(Fault::configuration(
                "version",
                format!("'{}' is not a semantic version", self.version),
            ));
        }

        if self.intents.is_empty() {
            return Err(Fault::configuration("intents", "at least one intent is required"));
        }
        if self.intents.iter().any(|i| i.trim().is_empty()) {
            return Err(Fault::configuration("intents", "intent names must not be empty"));
        }
        Ok(())
    }

    /// 是否声明了该意图
    pub fn supports(&self, intent: &str) -> bool {
        self.intents.iter().any(|i| i == intent)
    }

    /// 触发词匹配（不区分大小写）
    pub fn matches_trigger(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.triggers
            .iter()
            .any(|t| !t.is_empty() && text.contains(&t.to_lowercase()))
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Fault::configuration(field, "must not be empty"));
    }
    Ok(())
}

fn is_semver(value: &str) -> bool {
    static SEMVER: OnceLock<Regex> = OnceLock::new();
    SEMVER
        .get_or_init(|| {
            Regex::new(r"^(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)(-[0-9A-Za-z.-]+)?(\+[0-9A-Za-z.-]+)?$")
                .expect("semver pattern is valid")
        })
        .is_match(value)
}
