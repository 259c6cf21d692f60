//! 内置扩展
//!
//! 随运行时一起编译的扩展，在启动时登记到扩展工厂目录

pub mod clock;

pub use clock::ClockExtension;

use crate::core::catalog::ExtensionCatalog;

/// 包含全部内置扩展的工厂目录
pub fn builtin_catalog() -> ExtensionCatalog {
    let mut catalog = ExtensionCatalog::new();
    catalog.register::<ClockExtension>("clock");
    catalog
}
