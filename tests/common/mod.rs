//! 测试通用工具
//!
//! 测试扩展、不可用的存储后端以及扩展目录构造函数

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use hivemind::core::catalog::ExtensionCatalog;
use hivemind::core::store::ListStore;
use hivemind::domain::{Extension, ExtensionOutput, Manifest, Params};
use hivemind::errors::{Fault, Result};
use serde_json::{json, Value};
use tokio::sync::Notify;

static INIT: Once = Once::new();

/// 初始化测试环境
pub fn setup() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    });
}

fn object(value: Value) -> ExtensionOutput {
    match value {
        Value::Object(map) => map,
        _ => ExtensionOutput::new(),
    }
}

/// 天气扩展：`get_weather` 固定返回 8.5°C
#[derive(Default)]
pub struct WeatherExtension;

#[async_trait]
impl Extension for WeatherExtension {
    async fn execute(&self, intent: &str, _params: &Params) -> anyhow::Result<ExtensionOutput> {
        match intent {
            "get_weather" => Ok(object(json!({"success": true, "temperature": 8.5}))),
            other => Ok(object(json!({"success": false, "error": format!("Unknown intent: {}", other)}))),
        }
    }

    fn describe(&self) -> String {
        "Use get_weather with a location".to_string()
    }

    fn manifest(&self) -> Manifest {
        Manifest::new("weather", "1.0.0", "d", vec!["get_weather".to_string()])
    }
}

/// 总是报错的扩展
#[derive(Default)]
pub struct BrokenExtension;

#[async_trait]
impl Extension for BrokenExtension {
    async fn execute(&self, intent: &str, _params: &Params) -> anyhow::Result<ExtensionOutput> {
        match intent {
            "fetch" => Err(Fault::external_api("Calendar", Some(503), Some("down")).into()),
            "io" => Err(std::io::Error::new(std::io::ErrorKind::Other, "disk gone").into()),
            _ => Err(anyhow::anyhow!("boom")),
        }
    }

    fn describe(&self) -> String {
        "Always fails".to_string()
    }

    fn manifest(&self) -> Manifest {
        Manifest::new("broken", "0.1.0", "Broken", vec!["fetch".to_string()])
    }
}

/// 执行时 panic 的扩展
#[derive(Default)]
pub struct PanickyExtension;

#[async_trait]
impl Extension for PanickyExtension {
    async fn execute(&self, _intent: &str, _params: &Params) -> anyhow::Result<ExtensionOutput> {
        panic!("extension exploded");
    }

    fn describe(&self) -> String {
        "Panics".to_string()
    }

    fn manifest(&self) -> Manifest {
        Manifest::new("panicky", "0.1.0", "Panicky", vec!["explode".to_string()])
    }

    async fn health_check(&self) -> anyhow::Result<bool> {
        panic!("health check exploded");
    }
}

/// 执行和健康检查都很慢的扩展
#[derive(Default)]
pub struct SlowExtension;

pub const SLOW_DELAY: Duration = Duration::from_millis(300);

#[async_trait]
impl Extension for SlowExtension {
    async fn execute(&self, _intent: &str, _params: &Params) -> anyhow::Result<ExtensionOutput> {
        tokio::time::sleep(SLOW_DELAY).await;
        Ok(object(json!({"success": true})))
    }

    fn describe(&self) -> String {
        "Slow".to_string()
    }

    fn manifest(&self) -> Manifest {
        Manifest::new("slow", "0.1.0", "Slow", vec!["wait".to_string()])
    }

    async fn health_check(&self) -> anyhow::Result<bool> {
        tokio::time::sleep(SLOW_DELAY).await;
        Ok(true)
    }
}

/// 健康检查报错的扩展
#[derive(Default)]
pub struct SickExtension;

#[async_trait]
impl Extension for SickExtension {
    async fn execute(&self, _intent: &str, _params: &Params) -> anyhow::Result<ExtensionOutput> {
        Ok(object(json!({"success": true})))
    }

    fn describe(&self) -> String {
        "Sick".to_string()
    }

    fn manifest(&self) -> Manifest {
        Manifest::new("sick", "0.1.0", "Sick", vec!["cough".to_string()])
    }

    async fn health_check(&self) -> anyhow::Result<bool> {
        Err(anyhow::anyhow!("upstream unreachable"))
    }
}

/// 加载钩子失败的扩展
#[derive(Default)]
pub struct GrumpyExtension;

#[async_trait]
impl Extension for GrumpyExtension {
    async fn execute(&self, _intent: &str, _params: &Params) -> anyhow::Result<ExtensionOutput> {
        Ok(ExtensionOutput::new())
    }

    fn describe(&self) -> String {
        "Grumpy".to_string()
    }

    fn manifest(&self) -> Manifest {
        Manifest::new("grumpy", "0.1.0", "Grumpy", vec!["sulk".to_string()])
    }

    async fn on_load(&self) -> anyhow::Result<()> {
        Err(Fault::configuration("api_key", "missing").into())
    }
}

/// 卸载钩子失败的扩展
#[derive(Default)]
pub struct StickyExtension;

#[async_trait]
impl Extension for StickyExtension {
    async fn execute(&self, _intent: &str, _params: &Params) -> anyhow::Result<ExtensionOutput> {
        Ok(ExtensionOutput::new())
    }

    fn describe(&self) -> String {
        "Sticky".to_string()
    }

    fn manifest(&self) -> Manifest {
        Manifest::new("sticky", "0.1.0", "Sticky", vec!["hold".to_string()])
    }

    async fn on_unload(&self) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("cannot let go"))
    }
}

/// 登记了全部测试扩展的工厂目录
pub fn test_catalog() -> ExtensionCatalog {
    let mut catalog = ExtensionCatalog::new();
    catalog
        .register::<WeatherExtension>("weather")
        .register::<BrokenExtension>("broken")
        .register::<PanickyExtension>("panicky")
        .register::<SlowExtension>("slow")
        .register::<SickExtension>("sick")
        .register::<GrumpyExtension>("grumpy")
        .register::<StickyExtension>("sticky");
    catalog
}

/// 清单 JSON
pub fn manifest_json(name: &str, intents: &[&str]) -> String {
    json!({
        "name": name,
        "version": "1.0.0",
        "description": format!("{} extension", name),
        "intents": intents,
        "enabled": true,
    })
    .to_string()
}

/// 在扩展目录下写入一个扩展
pub fn write_plugin(root: &Path, dir: &str, manifest: &str) {
    let path = root.join(dir);
    std::fs::create_dir_all(&path).unwrap();
    std::fs::write(path.join("plugin.json"), manifest).unwrap();
}

/// 总是不可达的存储后端
pub struct UnreachableStore;

#[async_trait]
impl ListStore for UnreachableStore {
    async fn push(&self, _key: &str, _value: String) -> Result<usize> {
        Err(Fault::storage_unavailable("push", "connection refused"))
    }

    async fn range(&self, _key: &str, _start: i64, _stop: i64) -> Result<Vec<String>> {
        Err(Fault::storage_unavailable("range", "connection refused"))
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        Err(Fault::storage_unavailable("delete", "connection refused"))
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool> {
        Err(Fault::storage_unavailable("expire", "connection refused"))
    }

    async fn len(&self, _key: &str) -> Result<usize> {
        Err(Fault::storage_unavailable("len", "connection refused"))
    }

    async fn replace_head(
        &self,
        _key: &str,
        _expected: Vec<String>,
        _replacement: Vec<String>,
    ) -> Result<bool> {
        Err(Fault::storage_unavailable("replace_head", "connection refused"))
    }
}

/// 在第一次头部重写前暂停的存储，用于构造与裁剪并发的操作
pub struct GatedStore {
    inner: Arc<dyn ListStore>,
    armed: AtomicBool,
    /// 第一次重写已到达闸门
    pub parked: Notify,
    /// 放行被暂停的重写
    pub release: Notify,
}

impl GatedStore {
    pub fn new(inner: Arc<dyn ListStore>) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(true),
            parked: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl ListStore for GatedStore {
    async fn push(&self, key: &str, value: String) -> Result<usize> {
        self.inner.push(key, value).await
    }

    async fn range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.inner.range(key, start, stop).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.inner.expire(key, ttl).await
    }

    async fn len(&self, key: &str) -> Result<usize> {
        self.inner.len(key).await
    }

    async fn replace_head(
        &self,
        key: &str,
        expected: Vec<String>,
        replacement: Vec<String>,
    ) -> Result<bool> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.parked.notify_one();
            self.release.notified().await;
        }
        self.inner.replace_head(key, expected, replacement).await
    }
}
