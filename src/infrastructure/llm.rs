//! LLM 生成引擎
//!
//! 使用 async-openai 对接任意 OpenAI 兼容接口（如本地 llama.cpp server）。
//! 渲染好的对话脚本作为单条用户消息发送，停止序列在客户端截断。

use std::sync::atomic::{AtomicBool, Ordering};

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures::future::ready;
use futures::StreamExt;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::domain::{truncate_at_stop, BoxedStream, Generation, GenerationRequest, Generator};
use crate::errors::{Fault, FaultKind, Result};

/// OpenAI 兼容生成引擎配置
#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub context_window: usize,
}

/// OpenAI 兼容生成引擎
pub struct OpenAiGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    base_url: String,
    context_window: usize,
    loaded: AtomicBool,
}

impl OpenAiGenerator {
    /// 创建生成引擎
    ///
    /// 地址不是 http(s) URL 时返回模型加载故障
    pub fn new(settings: OpenAiSettings) -> Result<Self> {
        let base_url = settings.base_url.trim().trim_end_matches('/').to_string();
        let valid = ["http://", "https://"]
            .iter()
            .any(|scheme| base_url.len() > scheme.len() && base_url.starts_with(scheme));
        if !valid {
            return Err(Fault::model_load(
                &settings.model,
                &base_url,
                "endpoint must be an http(s) URL",
            ));
        }

        let config = OpenAIConfig::new()
            .with_api_key(settings.api_key)
            .with_api_base(base_url.clone());

        info!("Generation engine ready: {} at {}", settings.model, base_url);

        Ok(Self {
            client: Client::with_config(config),
            model: settings.model,
            base_url,
            context_window: settings.context_window,
            loaded: AtomicBool::new(true),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn ensure_loaded(&self) -> Result<()> {
        if self.loaded.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Fault::generation("Model not loaded").with_context("model_name", self.model.as_str()))
        }
    }

    fn build_request(&self, request: &GenerationRequest) -> Result<CreateChatCompletionRequest> {
        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(request.prompt.as_str())
            .build()
            .map(ChatCompletionRequestMessage::User)
            .map_err(|e| Fault::unexpected(FaultKind::Generation, "Failed to build message", &e))?;

        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![message])
            .max_completion_tokens(request.max_tokens)
            .temperature(request.temperature)
            .build()
            .map_err(|e| Fault::unexpected(FaultKind::Generation, "Failed to build request", &e))
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        self.ensure_loaded()?;
        let body = self.build_request(request)?;

        let response = self.client.chat().create(body).await.map_err(|e| {
            Fault::unexpected(FaultKind::Generation, "Generation failed", &e)
                .with_context("model_name", self.model.as_str())
        })?;

        let tokens_used = response.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0);
        let raw = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let (text, stopped) = truncate_at_stop(&raw, &request.stop_sequences);

        let mut metadata = Map::new();
        metadata.insert("model".into(), Value::from(self.model.as_str()));
        metadata.insert("stopped_by_sequence".into(), Value::from(stopped));

        debug!(tokens_used, stopped, "Generation finished");
        Ok(Generation {
            text: text.trim().to_string(),
            tokens_used,
            metadata,
        })
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<BoxedStream<Result<String>>> {
        self.ensure_loaded()?;
        let body = self.build_request(request)?;

        let upstream = self.client.chat().create_stream(body).await.map_err(|e| {
            Fault::unexpected(FaultKind::Generation, "Failed to start stream", &e)
                .with_context("model_name", self.model.as_str())
        })?;

        let stops = request.stop_sequences.clone();
        let stream = upstream
            .scan((String::new(), false), move |(buffer, done), item| {
                if *done {
                    return ready(None);
                }
                let out = match item {
                    Err(e) => {
                        *done = true;
                        Err(Fault::unexpected(FaultKind::Generation, "Stream interrupted", &e))
                    }
                    Ok(chunk) => {
                        let emitted = buffer.len();
                        for choice in chunk.choices {
                            if let Some(delta) = choice.delta.content {
                                buffer.push_str(&delta);
                            }
                        }
                        let (kept, stopped) = truncate_at_stop(buffer, &stops);
                        *done = stopped;
                        Ok(kept.get(emitted..).unwrap_or_default().to_string())
                    }
                };
                ready(Some(out))
            })
            .filter(|item| ready(!matches!(item, Ok(text) if text.is_empty())));

        Ok(Box::pin(stream))
    }

    async fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn unload(&self) -> Result<()> {
        if self.loaded.swap(false, Ordering::SeqCst) {
            info!("Generation engine unloaded: {} at {}", self.model, self.base_url);
        }
        Ok(())
    }

    fn context_window_size(&self) -> usize {
        self.context_window
    }
}
