//! 扩展能力接口
//!
//! 每个扩展都实现 [`Extension`]：执行意图、自我描述、声明清单，
//! 以及可选的生命周期钩子和健康检查（默认空实现）。

use std::fmt;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::manifest::Manifest;

/// 意图参数
pub type Params = Map<String, Value>;

/// 扩展执行结果（至少包含布尔 `success`）
pub type ExtensionOutput = Map<String, Value>;

/// 扩展能力接口
///
/// 返回的任何错误（以及执行中的 panic）都会在注册表边界被规范化为
/// 插件执行故障，不会以原始形态泄漏给调用方。
#[async_trait]
pub trait Extension: Send + Sync {
    /// 执行意图
    async fn execute(&self, intent: &str, params: &Params) -> anyhow::Result<ExtensionOutput>;

    /// 供生成引擎预热的能力描述
    fn describe(&self) -> String;

    /// 扩展自身声明的清单
    ///
    /// 加载时名字必须与目录中的清单一致，意图列表以目录清单为准
    fn manifest(&self) -> Manifest;

    /// 加载钩子
    async fn on_load(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// 卸载钩子
    async fn on_unload(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// 健康检查
    async fn health_check(&self) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// 扩展生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionState {
    Unloaded,
    Loading,
    Loaded,
    Unloading,
}

impl fmt::Display for ExtensionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtensionState::Unloaded => "unloaded",
            ExtensionState::Loading => "loading",
            ExtensionState::Loaded => "loaded",
            ExtensionState::Unloading => "unloading",
        };
        f.write_str(s)
    }
}

/// 扩展调用结果的结构化视图
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionReply {
    /// 是否成功
    pub success: bool,
    /// 结果数据（除 `success`/`error` 外的字段）
    pub data: Map<String, Value>,
    /// 错误信息（如果失败）
    pub error: Option<String>,
}

impl ExtensionReply {
    /// 创建成功结果
    pub fn success(data: Map<String, Value>) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    /// 创建失败结果
    pub fn failure(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Map::new(),
            error: Some(msg.into()),
        }
    }

    /// 解析扩展返回的映射；缺少 `success` 视为失败
    pub fn from_output(output: &ExtensionOutput) -> Self {
        let success = output
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let error = output
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string);
        let data = output
            .iter()
            .filter(|(k, _)| k.as_str() != "success" && k.as_str() != "error")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            success,
            data,
            error,
        }
    }

    /// 转回扩展输出映射
    pub fn into_output(self) -> ExtensionOutput {
        let mut output = Map::new();
        output.insert("success".to_string(), Value::Bool(self.success));
        if let Some(error) = self.error {
            output.insert("error".to_string(), Value::String(error));
        }
        output.extend(self.data);
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reply_from_output() {
        let output = json!({"success": true, "temperature": 8.5})
            .as_object()
            .cloned()
            .unwrap();
        let reply = ExtensionReply::from_output(&output);
        assert!(reply.success);
        assert_eq!(reply.data.get("temperature"), Some(&json!(8.5)));
        assert!(reply.error.is_none());
    }

    #[test]
    fn test_reply_missing_success_is_failure() {
        let output = json!({"temperature": 8.5}).as_object().cloned().unwrap();
        assert!(!ExtensionReply::from_output(&output).success);
    }

    #[test]
    fn test_failure_into_output() {
        let output = ExtensionReply::failure("Unknown intent: fly").into_output();
        assert_eq!(output.get("success"), Some(&json!(false)));
        assert_eq!(output.get("error"), Some(&json!("Unknown intent: fly")));
    }
}
