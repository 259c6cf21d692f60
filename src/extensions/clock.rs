//! 时钟扩展：报告当前时间

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use serde_json::{json, Map, Value};

use crate::domain::{Extension, ExtensionOutput, ExtensionReply, Manifest, Params};

#[derive(Debug, Default)]
pub struct ClockExtension;

impl ClockExtension {
    fn current_time(&self, params: &Params) -> ExtensionReply {
        let offset_minutes = match params.get("utc_offset_minutes") {
            None | Some(Value::Null) => 0,
            Some(v) => match v.as_i64() {
                Some(m) => m,
                None => return ExtensionReply::failure("utc_offset_minutes must be an integer"),
            },
        };
        let Some(offset) = offset_minutes
            .checked_mul(60)
            .and_then(|secs| i32::try_from(secs).ok())
            .and_then(FixedOffset::east_opt)
        else {
            return ExtensionReply::failure(format!("Invalid UTC offset: {} minutes", offset_minutes));
        };

        let now = Utc::now().with_timezone(&offset);
        let data = json!({
            "timestamp": now.timestamp(),
            "iso": now.to_rfc3339(),
            "date": now.format("%Y-%m-%d").to_string(),
            "time": now.format("%H:%M:%S").to_string(),
            "utc_offset_minutes": offset_minutes,
        });
        match data {
            Value::Object(map) => ExtensionReply::success(map),
            _ => ExtensionReply::success(Map::new()),
        }
    }
}

#[async_trait]
impl Extension for ClockExtension {
    async fn execute(&self, intent: &str, params: &Params) -> anyhow::Result<ExtensionOutput> {
        let reply = match intent {
            "current_time" => self.current_time(params),
            _ => ExtensionReply::failure(format!("Unknown intent: {}", intent)),
        };
        Ok(reply.into_output())
    }

    fn describe(&self) -> String {
        "Intent 'current_time' returns the current date and time.\n\
         Parameters:\n\
         - utc_offset_minutes (optional): offset from UTC in minutes, e.g. 60 for Paris in winter"
            .to_string()
    }

    fn manifest(&self) -> Manifest {
        Manifest::new(
            "clock",
            "1.0.0",
            "Current date and time",
            vec!["current_time".to_string()],
        )
        .with_triggers(vec!["time".to_string(), "heure".to_string(), "date".to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_current_time_with_offset() {
        let mut params = Params::new();
        params.insert("utc_offset_minutes".into(), Value::from(60));
        let output = ClockExtension.execute("current_time", &params).await.unwrap();
        assert_eq!(output.get("success"), Some(&Value::Bool(true)));
        assert!(output.get("iso").and_then(Value::as_str).unwrap().ends_with("+01:00"));
    }

    #[tokio::test]
    async fn test_unknown_intent_is_a_failure_reply() {
        let output = ClockExtension.execute("alarm", &Params::new()).await.unwrap();
        let reply = ExtensionReply::from_output(&output);
        assert!(!reply.success);
        assert_eq!(reply.error.as_deref(), Some("Unknown intent: alarm"));
    }
}
