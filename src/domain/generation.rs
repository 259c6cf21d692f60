//! 文本生成接口
//!
//! 运行时只依赖这个抽象契约，不依赖具体推理引擎

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::Stream;
use serde_json::{Map, Value};

use crate::errors::Result;

/// 装箱的异步流
pub type BoxedStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// 生成请求
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stop_sequences: Vec<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: 512,
            temperature: 0.7,
            stop_sequences: Vec::new(),
        }
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn stop_sequences(mut self, stops: Vec<String>) -> Self {
        self.stop_sequences = stops;
        self
    }
}

/// 生成结果
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub tokens_used: u32,
    pub metadata: Map<String, Value>,
}

/// 生成引擎
#[async_trait]
pub trait Generator: Send + Sync {
    /// 一次性生成完整回复
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation>;

    /// 流式生成，引擎给出结束信号时流结束
    async fn stream(&self, request: &GenerationRequest) -> Result<BoxedStream<Result<String>>>;

    /// 模型是否就绪
    async fn is_loaded(&self) -> bool;

    /// 释放模型资源
    async fn unload(&self) -> Result<()>;

    /// 上下文窗口大小（token）
    fn context_window_size(&self) -> usize;
}

/// 在第一个停止序列处截断文本
pub fn truncate_at_stop(text: &str, stops: &[String]) -> (String, bool) {
    let cut = stops
        .iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min();
    match cut {
        Some(idx) => (text[..idx].to_string(), true),
        None => (text.to_string(), false),
    }
}
