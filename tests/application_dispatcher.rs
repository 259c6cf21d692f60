//! 分发器测试

mod common;

use std::sync::Arc;
use std::time::Duration;

use hivemind::application::dispatcher::{Dispatcher, IntentCall};
use hivemind::core::registry::{ExtensionRegistry, RegistryOptions};
use hivemind::domain::Params;
use hivemind::errors::{FaultKind, PluginFailure};
use serde_json::Value;
use tempfile::TempDir;

use common::{manifest_json, setup, test_catalog, write_plugin};

async fn dispatcher_with(dir: &TempDir, timeout: Duration) -> Dispatcher {
    setup();
    write_plugin(dir.path(), "weather", &manifest_json("weather", &["get_weather"]));
    write_plugin(dir.path(), "slow", &manifest_json("slow", &["wait"]));
    let registry = Arc::new(ExtensionRegistry::new(
        RegistryOptions::new(dir.path()),
        test_catalog(),
    ));
    registry.discover().await.unwrap();
    Dispatcher::new(registry, timeout)
}

#[tokio::test]
async fn test_timeout_becomes_plugin_execution_fault() {
    let dir = TempDir::new().unwrap();
    let dispatcher = dispatcher_with(&dir, Duration::from_millis(50)).await;

    let fault = dispatcher
        .dispatch("slow", "wait", Params::new())
        .await
        .unwrap_err();
    assert_eq!(fault.kind, FaultKind::PluginExecution);
    assert_eq!(fault.plugin_failure(), Some(PluginFailure::Timeout));
    assert_eq!(fault.context.get("timeout_ms"), Some(&Value::from(50u64)));
}

#[tokio::test]
async fn test_dispatch_within_timeout() {
    let dir = TempDir::new().unwrap();
    let dispatcher = dispatcher_with(&dir, Duration::from_secs(2)).await;

    let output = dispatcher
        .dispatch("slow", "wait", Params::new())
        .await
        .unwrap();
    assert_eq!(output.get("success"), Some(&Value::Bool(true)));
}

#[tokio::test]
async fn test_dispatch_many_keeps_order_and_isolates_failures() {
    let dir = TempDir::new().unwrap();
    let dispatcher = dispatcher_with(&dir, Duration::from_millis(50)).await;

    let calls = vec![
        IntentCall::new("slow", "wait", Params::new()),
        IntentCall::new("weather", "get_weather", Params::new()),
        IntentCall::new("ghost", "boo", Params::new()),
    ];
    let results = dispatcher.dispatch_many(&calls).await;

    assert_eq!(results.len(), 3);
    assert_eq!(
        results[0].as_ref().unwrap_err().plugin_failure(),
        Some(PluginFailure::Timeout)
    );
    assert_eq!(
        results[1].as_ref().unwrap().get("temperature"),
        Some(&Value::from(8.5))
    );
    assert!(results[2].as_ref().unwrap_err().is_plugin_not_loaded());
}
