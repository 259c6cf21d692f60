//! 提示词模板
//!
//! 把会话渲染成带角色分隔符的线性脚本，并以开放的助手轮次结尾以触发生成

use crate::domain::{Message, Role};

/// 默认助手人设，`{capabilities}` 会被替换为已加载扩展的能力描述
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Hive Mind, a helpful voice assistant shared by every device in the home.

Traits:
- Answer naturally and conversationally, in the user's language
- Be concise but complete
- Use the available extensions when a request needs them
- Remember the earlier turns of the conversation

Current capabilities:
{capabilities}

To call an extension, reply with a single JSON object and nothing else:
{\"plugin\": \"<name>\", \"intent\": \"<intent>\", \"params\": {...}}
Otherwise answer directly. If you cannot help, say why.";

/// 把能力描述填入人设模板
pub fn system_prompt(template: &str, capabilities: &str) -> String {
    let capabilities = if capabilities.trim().is_empty() {
        "(no extensions loaded)"
    } else {
        capabilities
    };
    template.replace("{capabilities}", capabilities)
}

/// 对话脚本模板
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTemplate {
    pub system_open: String,
    pub user_open: String,
    pub assistant_open: String,
    pub turn_close: String,
}

impl Default for ChatTemplate {
    fn default() -> Self {
        Self {
            system_open: "<|system|>".to_string(),
            user_open: "<|user|>".to_string(),
            assistant_open: "<|assistant|>".to_string(),
            turn_close: "<|end|>".to_string(),
        }
    }
}

impl ChatTemplate {
    fn opener(&self, role: Role) -> &str {
        match role {
            Role::System => &self.system_open,
            Role::User => &self.user_open,
            Role::Assistant => &self.assistant_open,
        }
    }

    fn turn(&self, role: Role, content: &str) -> String {
        format!("{}\n{}{}", self.opener(role), content, self.turn_close)
    }

    /// 渲染完整脚本
    pub fn render(&self, messages: &[Message], system_prompt: Option<&str>) -> String {
        let mut lines = Vec::with_capacity(messages.len() + 2);

        if let Some(prompt) = system_prompt.filter(|p| !p.is_empty()) {
            lines.push(self.turn(Role::System, prompt));
        }
        for msg in messages {
            lines.push(self.turn(msg.role, &msg.content));
        }
        lines.push(self.assistant_open.clone());

        lines.join("\n")
    }

    /// 生成时的默认停止序列
    pub fn stop_sequences(&self) -> Vec<String> {
        vec![self.turn_close.clone(), self.user_open.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_render_with_system_prompt() {
        let now = Utc::now();
        let messages = vec![
            Message::new(Role::User, "Quel temps fait-il ?", now),
            Message::new(Role::Assistant, "Il fait 8°C.", now),
        ];
        let script = ChatTemplate::default().render(&messages, Some("Be brief."));
        assert_eq!(
            script,
            "<|system|>\nBe brief.<|end|>\n<|user|>\nQuel temps fait-il ?<|end|>\n<|assistant|>\nIl fait 8°C.<|end|>\n<|assistant|>"
        );
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(ChatTemplate::default().render(&[], None), "<|assistant|>");
    }

    #[test]
    fn test_system_prompt_fills_capabilities() {
        let prompt = system_prompt(DEFAULT_SYSTEM_PROMPT, "## Weather\nget_weather");
        assert!(prompt.contains("## Weather\nget_weather"));
        assert!(!prompt.contains("{capabilities}"));

        let empty = system_prompt("caps: {capabilities}", "  ");
        assert_eq!(empty, "caps: (no extensions loaded)");
    }
}
