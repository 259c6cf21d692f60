//! Hive Mind 运行时
//!
//! 多个语音终端共享的助手核心：
//! - 共享会话上下文（整条日志一个 TTL）
//! - 可插拔扩展（发现、清单校验、生命周期、隔离分发）
//! - 统一故障分类
//!
//! # 架构分层
//!
//! - `domain`: 领域模型和接口
//! - `core`: 核心层，上下文存储与扩展运行时
//! - `infrastructure`: 基础设施层，外部系统交互
//! - `application`: 应用层，分发与轮次编排
//! - `extensions`: 内置扩展

pub mod errors;

pub mod config;

// 领域层
pub mod domain;

// 核心层
pub mod core;

// 基础设施层
pub mod infrastructure;

// 应用层
pub mod application;

// 内置扩展
pub mod extensions;

pub use errors::{Fault, FaultFamily, FaultKind, FaultRecord, PluginFailure, Result};

pub use config::{RuntimeConfig, StoreBackend};

pub use domain::{
    Extension, ExtensionOutput, ExtensionReply, ExtensionState, Generation, GenerationRequest,
    Generator, Manifest, Message, Metadata, Params, Role,
};

pub use crate::core::catalog::{ExtensionCatalog, ExtensionFactory};
pub use crate::core::clock::{Clock, ManualClock, SystemClock};
pub use crate::core::context::{ContextStore, ReadOptions};
pub use crate::core::prompt::ChatTemplate;
pub use crate::core::registry::{
    DiscoveryReport, ExtensionRegistry, HealthReport, LoadOutcome, RegistryOptions,
};
pub use crate::core::store::{ListStore, MemoryListStore};

pub use infrastructure::llm::{OpenAiGenerator, OpenAiSettings};
pub use infrastructure::logger;
pub use infrastructure::store::SqliteListStore;

pub use application::dispatcher::{Dispatcher, IntentCall};
pub use application::runtime::{AssistantRuntime, TurnOutcome, TurnSettings};

/// 运行时版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
