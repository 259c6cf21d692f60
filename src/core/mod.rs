//! 核心层：共享上下文与扩展运行时
//!
//! 包含时钟、列表存储抽象、会话上下文、提示词模板以及扩展的注册与加载

pub mod catalog;
pub mod clock;
pub mod context;
pub mod prompt;
pub mod registry;
pub mod store;
