//! 助手运行时
//!
//! 把共享上下文、扩展分发和生成引擎串成一次完整的用户轮次：
//! 记录用户发言 → 带能力描述渲染 → 生成 → 可选的单次扩展调用 → 记录助手回复

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn, Instrument};

use crate::application::dispatcher::{Dispatcher, IntentCall};
use crate::core::context::ContextStore;
use crate::core::prompt::{system_prompt, DEFAULT_SYSTEM_PROMPT};
use crate::domain::{
    ExtensionOutput, ExtensionReply, GenerationRequest, Generator, Metadata, Role,
};
use crate::errors::{Fault, Result};
use crate::infrastructure::logger::{Timer, TurnContext};

/// 轮次参数
#[derive(Debug, Clone)]
pub struct TurnSettings {
    /// 每次渲染带入的消息数
    pub render_window: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    /// 人设模板，`{capabilities}` 会被替换
    pub persona: String,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            render_window: 20,
            max_tokens: 512,
            temperature: 0.7,
            persona: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// 一次轮次的结果
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub turn_id: String,
    /// 最终回复
    pub reply: String,
    /// 生成引擎选择的扩展调用
    pub call: Option<IntentCall>,
    /// 扩展调用结果（失败时为已规范化的故障）
    pub extension_result: Option<std::result::Result<ExtensionOutput, Fault>>,
    pub tokens_used: u32,
}

/// 助手运行时
pub struct AssistantRuntime {
    context: Arc<ContextStore>,
    dispatcher: Dispatcher,
    generator: Arc<dyn Generator>,
    settings: TurnSettings,
}

impl AssistantRuntime {
    pub fn new(
        context: Arc<ContextStore>,
        dispatcher: Dispatcher,
        generator: Arc<dyn Generator>,
        settings: TurnSettings,
    ) -> Self {
        Self {
            context,
            dispatcher,
            generator,
            settings,
        }
    }

    pub fn context(&self) -> &Arc<ContextStore> {
        &self.context
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// 处理一次用户发言
    ///
    /// 存储和生成故障直接返回给调用方；扩展故障被记录为系统轮次，
    /// 生成引擎据此给出后续回复。
    pub async fn handle_user_turn(&self, client_id: &str, text: &str) -> Result<TurnOutcome> {
        let turn = TurnContext::new(Some(client_id));
        let span = turn.span();
        self.run_turn(&turn, client_id, text).instrument(span).await
    }

    async fn run_turn(&self, turn: &TurnContext, client_id: &str, text: &str) -> Result<TurnOutcome> {
        let _timer = Timer::new("user_turn").with_turn(turn);

        self.context
            .append(Role::User, text, Some(client_id), None)
            .await?;

        let first = self.generate().await?;
        let mut tokens_used = first.tokens_used;

        let Some(call) = IntentCall::parse(&first.text) else {
            self.record_reply(client_id, &first.text).await?;
            return Ok(TurnOutcome {
                turn_id: turn.turn_id.clone(),
                reply: first.text,
                call: None,
                extension_result: None,
                tokens_used,
            });
        };

        info!("Engine selected {}::{}", call.plugin, call.intent);
        let result = self.dispatcher.dispatch_in_turn(&call, turn).await;
        self.record_extension_result(&call, &result).await?;

        let follow_up = self.generate().await?;
        tokens_used += follow_up.tokens_used;
        self.record_reply(client_id, &follow_up.text).await?;

        Ok(TurnOutcome {
            turn_id: turn.turn_id.clone(),
            reply: follow_up.text,
            call: Some(call),
            extension_result: Some(result),
            tokens_used,
        })
    }

    async fn generate(&self) -> Result<crate::domain::Generation> {
        let capabilities = self.dispatcher.registry().aggregate_capabilities().await;
        let system = system_prompt(&self.settings.persona, &capabilities);
        let script = self
            .context
            .render(Some(self.settings.render_window), Some(&system))
            .await?;

        let request = GenerationRequest::new(script)
            .max_tokens(self.settings.max_tokens)
            .temperature(self.settings.temperature)
            .stop_sequences(self.context.template().stop_sequences());

        self.generator.generate(&request).await
    }

    async fn record_reply(&self, client_id: &str, reply: &str) -> Result<()> {
        self.context
            .append(Role::Assistant, reply, Some(client_id), None)
            .await?;
        Ok(())
    }

    async fn record_extension_result(
        &self,
        call: &IntentCall,
        result: &std::result::Result<ExtensionOutput, Fault>,
    ) -> Result<()> {
        let mut metadata = Metadata::new();
        metadata.insert("plugin".into(), Value::from(call.plugin.as_str()));
        metadata.insert("intent".into(), Value::from(call.intent.as_str()));

        let content = match result {
            Ok(output) => {
                let reply = ExtensionReply::from_output(output);
                metadata.insert("success".into(), Value::Bool(reply.success));
                Value::Object(output.clone()).to_string()
            }
            Err(fault) => {
                warn!("Extension call contained: {}", fault);
                metadata.insert("success".into(), Value::Bool(false));
                metadata.insert("error_code".into(), Value::from(fault.kind.code()));
                serde_json::json!({ "success": false, "error": fault.message }).to_string()
            }
        };

        self.context
            .append(
                Role::System,
                &format!("Result of {}::{}: {}", call.plugin, call.intent, content),
                None,
                Some(metadata),
            )
            .await?;
        Ok(())
    }
}
