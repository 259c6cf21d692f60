//! 应用层：意图分发与轮次编排

pub mod dispatcher;
pub mod runtime;
