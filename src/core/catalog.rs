//! 扩展实现注册表
//!
//! 扩展目录名（模块名）映射到启动时登记的工厂函数。
//! 加载时要求某个模块恰好有一个实现。

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::domain::Extension;
use crate::errors::{Fault, Result};

/// 扩展工厂
pub type ExtensionFactory = Arc<dyn Fn() -> Box<dyn Extension> + Send + Sync>;

#[derive(Clone)]
struct CatalogEntry {
    implementation: String,
    factory: ExtensionFactory,
}

/// 扩展工厂目录
#[derive(Default, Clone)]
pub struct ExtensionCatalog {
    modules: HashMap<String, Vec<CatalogEntry>>,
}

impl ExtensionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个以 `Default` 构造的实现
    pub fn register<E>(&mut self, module: &str) -> &mut Self
    where
        E: Extension + Default + 'static,
    {
        self.register_fn(module, std::any::type_name::<E>(), || {
            Box::new(E::default()) as Box<dyn Extension>
        })
    }

    /// 登记一个工厂函数
    pub fn register_fn<F>(&mut self, module: &str, implementation: &str, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    {
        debug!("Registered extension implementation {} for module {}", implementation, module);
        self.modules
            .entry(module.to_string())
            .or_default()
            .push(CatalogEntry {
                implementation: implementation.to_string(),
                factory: Arc::new(factory),
            });
        self
    }

    /// 查找模块的唯一实现
    pub fn resolve(&self, module: &str) -> Result<ExtensionFactory> {
        let entries = self.modules.get(module).map(Vec::as_slice).unwrap_or(&[]);
        match entries {
            [] => Err(Fault::configuration(
                "handler",
                format!("No extension implementation registered for module '{}'", module),
            )
            .with_context("module", module)),
            [only] => Ok(only.factory.clone()),
            many => {
                let names: Vec<&str> = many.iter().map(|e| e.implementation.as_str()).collect();
                Err(Fault::configuration(
                    "handler",
                    format!(
                        "Ambiguous extension implementations for module '{}': {}",
                        module,
                        names.join(", ")
                    ),
                )
                .with_context("module", module)
                .with_context("candidates", names))
            }
        }
    }

    /// 已登记的模块名
    pub fn modules(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, module: &str) -> bool {
        self.modules.get(module).is_some_and(|v| !v.is_empty())
    }
}
