//! 扩展注册表与加载器
//!
//! 每个扩展的状态机：`Unloaded → Loading → Loaded → Unloading → Unloaded`。
//! 加载失败会完全回到 `Unloaded`，不留下部分注册。
//!
//! 分发时先克隆实例句柄再释放表锁，因此对不同扩展的并发分发互不阻塞；
//! 扩展抛出的任何错误或 panic 都在这里被规范化为插件执行故障。

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::core::catalog::ExtensionCatalog;
use crate::domain::{Extension, ExtensionOutput, ExtensionState, Manifest, Params};
use crate::errors::{Fault, PluginFailure, Result};

/// 默认清单文件名
pub const MANIFEST_FILE: &str = "plugin.json";

/// 模板和隐藏目录的保留前缀
pub const RESERVED_PREFIX: &str = "_";

/// 注册表选项
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub extensions_dir: PathBuf,
    pub manifest_file: String,
    pub reserved_prefix: String,
    /// 单个健康检查的超时
    pub health_timeout: Duration,
}

impl RegistryOptions {
    pub fn new(extensions_dir: impl Into<PathBuf>) -> Self {
        Self {
            extensions_dir: extensions_dir.into(),
            manifest_file: MANIFEST_FILE.to_string(),
            reserved_prefix: RESERVED_PREFIX.to_string(),
            health_timeout: Duration::from_secs(5),
        }
    }

    pub fn health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }
}

/// 已加载的扩展
#[derive(Clone)]
struct LoadedExtension {
    instance: Arc<dyn Extension>,
    manifest: Arc<Manifest>,
    loaded_at: DateTime<Utc>,
}

/// 单次加载结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    /// 清单中 `enabled = false`，未实例化也未注册
    Disabled,
}

/// 目录扫描报告
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub loaded: Vec<String>,
    pub disabled: Vec<String>,
    /// 保留前缀或已加载而跳过的目录
    pub skipped: Vec<String>,
    pub failed: Vec<(String, Fault)>,
}

impl DiscoveryReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// 单个扩展的健康状态
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub name: String,
    pub healthy: bool,
    /// 不健康时的原因
    pub detail: Option<String>,
}

/// 扩展注册表
pub struct ExtensionRegistry {
    options: RegistryOptions,
    catalog: ExtensionCatalog,
    entries: DashMap<String, LoadedExtension>,
    /// 插入顺序
    order: RwLock<Vec<String>>,
    /// 处于过渡状态（Loading / Unloading）的扩展
    transitions: DashMap<String, ExtensionState>,
}

impl ExtensionRegistry {
    /// 创建空注册表
    pub fn new(options: RegistryOptions, catalog: ExtensionCatalog) -> Self {
        Self {
            options,
            catalog,
            entries: DashMap::new(),
            order: RwLock::new(Vec::new()),
            transitions: DashMap::new(),
        }
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// 扫描扩展目录并逐个加载
    ///
    /// 单个目录失败只记录在报告里，扫描继续
    pub async fn discover(&self) -> Result<DiscoveryReport> {
        let mut report = DiscoveryReport::default();
        let dir = &self.options.extensions_dir;

        let mut reader = match tokio::fs::read_dir(dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Extensions directory {} does not exist", dir.display());
                return Ok(report);
            }
            Err(e) => {
                return Err(Fault::unexpected(
                    crate::errors::FaultKind::Configuration,
                    &format!("Failed to scan {}", dir.display()),
                    &e,
                )
                .with_context("field", "extensions_dir"));
            }
        };

        let mut names = Vec::new();
        loop {
            let entry = match reader.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read entry in {}: {}", dir.display(), e);
                    break;
                }
            };
            let is_directory = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_directory {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();

        for name in names {
            if name.starts_with(&self.options.reserved_prefix) || self.contains(&name) {
                debug!("Skipping extension directory {}", name);
                report.skipped.push(name);
                continue;
            }
            match self.load(&name).await {
                Ok(LoadOutcome::Loaded) => report.loaded.push(name),
                Ok(LoadOutcome::Disabled) => report.disabled.push(name),
                Err(fault) => {
                    warn!("Failed to load extension {}: {}", name, fault);
                    report.failed.push((name, fault));
                }
            }
        }

        info!(
            loaded = report.loaded.len(),
            disabled = report.disabled.len(),
            failed = report.failed.len(),
            "Extension discovery finished"
        );
        Ok(report)
    }

    /// 加载指定扩展
    ///
    /// 已加载的同名扩展会被拒绝（需先卸载），注册表保持不变
    pub async fn load(&self, name: &str) -> Result<LoadOutcome> {
        if self.entries.contains_key(name) {
            return Err(Fault::configuration(
                "name",
                format!("Extension '{}' is already loaded", name),
            )
            .with_context("plugin", name));
        }
        if let Some(state) = self.transitions.get(name).map(|s| *s) {
            return Err(Fault::configuration(
                "name",
                format!("Extension '{}' is {}", name, state),
            )
            .with_context("plugin", name));
        }

        self.transitions.insert(name.to_string(), ExtensionState::Loading);
        let result = self.load_inner(name).await;
        self.transitions.remove(name);
        result
    }

    async fn load_inner(&self, name: &str) -> Result<LoadOutcome> {
        let dir = self.options.extensions_dir.join(name);
        if !is_dir(&dir).await {
            return Err(Fault::configuration(
                "plugin_directory",
                format!("Plugin directory not found: {}", dir.display()),
            )
            .with_context("plugin", name));
        }

        let manifest = Manifest::load(&dir.join(&self.options.manifest_file)).await?;
        if manifest.name != name {
            return Err(Fault::configuration(
                "name",
                format!(
                    "Manifest name '{}' does not match directory '{}'",
                    manifest.name, name
                ),
            )
            .with_context("plugin", name));
        }

        if !manifest.enabled {
            info!("Extension {} is disabled, not loading", name);
            return Ok(LoadOutcome::Disabled);
        }

        let factory = self.catalog.resolve(name)?;
        let instance: Arc<dyn Extension> = Arc::from(factory());

        // 实现自报的清单必须与目录中的清单同名；意图以文件为准
        let declared = instance.manifest();
        if declared.name != manifest.name {
            return Err(Fault::configuration(
                "name",
                format!(
                    "Implementation declares '{}' but manifest is '{}'",
                    declared.name, manifest.name
                ),
            )
            .with_context("plugin", name));
        }
        if declared.intents != manifest.intents {
            warn!(
                "Extension {} declares intents {:?}, manifest lists {:?}",
                name, declared.intents, manifest.intents
            );
        }

        match AssertUnwindSafe(instance.on_load()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let cause = Fault::from_extension(name, "on_load", &e);
                return Err(hook_fault(name, "on_load", cause));
            }
            Err(payload) => {
                let cause = Fault::from_panic(name, "on_load", &*payload);
                return Err(hook_fault(name, "on_load", cause));
            }
        }

        let version = manifest.version.clone();
        self.entries.insert(
            name.to_string(),
            LoadedExtension {
                instance,
                manifest: Arc::new(manifest),
                loaded_at: Utc::now(),
            },
        );
        self.order.write().await.push(name.to_string());

        info!("Loaded extension {} v{}", name, version);
        Ok(LoadOutcome::Loaded)
    }

    /// 替换已加载的扩展：先卸载旧实例再重新加载
    ///
    /// 旧实例的 `on_unload` 失败只记录警告，不阻止新实例加载
    pub async fn reload(&self, name: &str) -> Result<LoadOutcome> {
        if let Err(fault) = self.unload(name).await {
            warn!("Replacing extension {} after failed unload: {}", name, fault);
        }
        self.load(name).await
    }

    /// 卸载扩展
    ///
    /// 未加载的名字不做任何事并返回 `false`。`on_unload` 失败时条目仍会被移除，
    /// 故障随后返回给调用方。
    pub async fn unload(&self, name: &str) -> Result<bool> {
        let Some(loaded) = self.entries.get(name).map(|e| e.clone()) else {
            debug!("Unload requested for {} which is not loaded", name);
            return Ok(false);
        };

        self.transitions.insert(name.to_string(), ExtensionState::Unloading);
        let hook = AssertUnwindSafe(loaded.instance.on_unload()).catch_unwind().await;

        self.entries.remove(name);
        self.order.write().await.retain(|n| n != name);
        self.transitions.remove(name);

        match hook {
            Ok(Ok(())) => {
                info!("Unloaded extension {}", name);
                Ok(true)
            }
            Ok(Err(e)) => {
                let fault = Fault::from_extension(name, "on_unload", &e)
                    .with_reason(PluginFailure::HookFailed);
                warn!("Extension {} failed to unload cleanly: {}", name, fault);
                Err(fault)
            }
            Err(payload) => {
                let fault = Fault::from_panic(name, "on_unload", &*payload)
                    .with_reason(PluginFailure::HookFailed);
                warn!("Extension {} panicked while unloading: {}", name, fault);
                Err(fault)
            }
        }
    }

    /// 按加载顺序卸载全部扩展，返回卸载失败的故障
    pub async fn unload_all(&self) -> Vec<Fault> {
        let names = self.loaded_names().await;
        let mut faults = Vec::new();
        for name in names {
            if let Err(fault) = self.unload(&name).await {
                faults.push(fault);
            }
        }
        faults
    }

    /// 把意图路由到已加载的扩展
    pub async fn dispatch(&self, name: &str, intent: &str, params: Params) -> Result<ExtensionOutput> {
        let Some(instance) = self.entries.get(name).map(|e| e.instance.clone()) else {
            return Err(Fault::plugin_not_loaded(name, intent));
        };

        debug!("Dispatching intent {} to extension {}", intent, name);
        let outcome = AssertUnwindSafe(instance.execute(intent, &params))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => {
                let fault = Fault::from_extension(name, intent, &e)
                    .with_context("params", Value::Object(params));
                warn!("Extension {} failed on {}: {}", name, intent, fault);
                Err(fault)
            }
            Err(payload) => {
                let fault = Fault::from_panic(name, intent, &*payload)
                    .with_context("params", Value::Object(params));
                warn!("Extension {} panicked on {}: {}", name, intent, fault);
                Err(fault)
            }
        }
    }

    /// 拼接各扩展的清单描述与自我描述（按插入顺序，空行分隔）
    pub async fn aggregate_capabilities(&self) -> String {
        let names = self.loaded_names().await;
        let blocks: Vec<String> = names
            .iter()
            .filter_map(|name| self.entries.get(name).map(|e| e.clone()))
            .map(|e| format!("## {}\n{}", e.manifest.description, e.instance.describe()))
            .collect();
        blocks.join("\n\n")
    }

    /// 并发检查所有扩展的健康状态
    ///
    /// 单个扩展超时、报错或 panic 只会让它自己被标记为不健康
    pub async fn health_check_all(&self) -> Vec<HealthReport> {
        let names = self.loaded_names().await;
        let timeout = self.options.health_timeout;

        let checks = names.into_iter().filter_map(|name| {
            let instance = self.entries.get(&name).map(|e| e.instance.clone())?;
            Some(async move {
                let check = AssertUnwindSafe(instance.health_check()).catch_unwind();
                let (healthy, detail) = match tokio::time::timeout(timeout, check).await {
                    Ok(Ok(Ok(true))) => (true, None),
                    Ok(Ok(Ok(false))) => (false, Some("reported unhealthy".to_string())),
                    Ok(Ok(Err(e))) => (false, Some(e.to_string())),
                    Ok(Err(_)) => (false, Some("panicked".to_string())),
                    Err(_) => (false, Some(format!("timed out after {:?}", timeout))),
                };
                if !healthy {
                    warn!("Extension {} is unhealthy: {:?}", name, detail);
                }
                HealthReport {
                    name,
                    healthy,
                    detail,
                }
            })
        });

        join_all(checks).await
    }

    /// 健康状态映射
    pub async fn health_map(&self) -> HashMap<String, bool> {
        self.health_check_all()
            .await
            .into_iter()
            .map(|r| (r.name, r.healthy))
            .collect()
    }

    /// 扩展当前生命周期状态
    pub fn state(&self, name: &str) -> ExtensionState {
        if let Some(state) = self.transitions.get(name) {
            return *state;
        }
        if self.entries.contains_key(name) {
            ExtensionState::Loaded
        } else {
            ExtensionState::Unloaded
        }
    }

    /// 已加载扩展的清单
    pub fn manifest(&self, name: &str) -> Option<Arc<Manifest>> {
        self.entries.get(name).map(|e| e.manifest.clone())
    }

    /// 扩展加载时间
    pub fn loaded_at(&self, name: &str) -> Option<DateTime<Utc>> {
        self.entries.get(name).map(|e| e.loaded_at)
    }

    /// 按插入顺序列出已加载扩展
    pub async fn loaded_names(&self) -> Vec<String> {
        self.order.read().await.clone()
    }

    /// 找出触发词与文本匹配的扩展
    pub async fn match_triggers(&self, text: &str) -> Vec<String> {
        self.loaded_names()
            .await
            .into_iter()
            .filter(|name| {
                self.entries
                    .get(name)
                    .is_some_and(|e| e.manifest.matches_trigger(text))
            })
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn hook_fault(name: &str, hook: &str, cause: Fault) -> Fault {
    let original = cause
        .context
        .get("original_kind")
        .cloned()
        .unwrap_or(Value::Null);
    Fault::configuration(
        "on_load",
        format!("Extension '{}' failed in {}: {}", name, hook, cause.message),
    )
    .with_context("plugin", name)
    .with_context("original_kind", original)
    .with_context(
        "error_type",
        cause.context.get("error_type").cloned().unwrap_or(Value::Null),
    )
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}
