use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use hivemind::application::dispatcher::Dispatcher;
use hivemind::application::runtime::{AssistantRuntime, TurnSettings};
use hivemind::config::{RuntimeConfig, StoreBackend};
use hivemind::core::context::ContextStore;
use hivemind::core::registry::{ExtensionRegistry, RegistryOptions};
use hivemind::core::store::{ListStore, MemoryListStore};
use hivemind::domain::Generator;
use hivemind::extensions::builtin_catalog;
use hivemind::infrastructure::llm::{OpenAiGenerator, OpenAiSettings};
use hivemind::infrastructure::logger::{self, LogConfig};
use hivemind::infrastructure::store::SqliteListStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cfg = RuntimeConfig::parse();
    logger::init(&LogConfig::default().with_format(cfg.log_format))?;
    cfg.validate()?;

    for (key, value) in cfg.summary() {
        info!("config {} = {}", key, value);
    }

    let store = open_store(&cfg).await?;
    let context = Arc::new(
        ContextStore::new(store)
            .with_ttl(cfg.context_ttl())
            .with_key_prefix(&cfg.context_key_prefix),
    );

    let mut options = RegistryOptions::new(&cfg.extensions_dir).health_timeout(cfg.health_timeout());
    options.manifest_file = cfg.manifest_file.clone();
    options.reserved_prefix = cfg.reserved_prefix.clone();
    let registry = Arc::new(ExtensionRegistry::new(options, builtin_catalog()));

    let report = registry.discover().await?;
    info!(
        "discovery: loaded={:?} disabled={:?} skipped={:?}",
        report.loaded, report.disabled, report.skipped
    );
    for (name, fault) in &report.failed {
        warn!("extension {} failed to load: {:?}", name, fault.record());
    }

    info!("capabilities:\n{}", registry.aggregate_capabilities().await);
    for health in registry.health_check_all().await {
        info!("health {} = {} {:?}", health.name, health.healthy, health.detail);
    }

    if let Some(input) = cfg.input_message.as_deref() {
        let generator = Arc::new(OpenAiGenerator::new(OpenAiSettings {
            base_url: cfg.openai_base_url.clone(),
            api_key: cfg.openai_api_key.clone(),
            model: cfg.openai_model.clone(),
            context_window: cfg.context_window,
        })?);

        let runtime = AssistantRuntime::new(
            context.clone(),
            Dispatcher::new(registry.clone(), cfg.dispatch_timeout()),
            generator.clone(),
            TurnSettings {
                render_window: cfg.render_window,
                max_tokens: cfg.max_tokens,
                temperature: cfg.temperature,
                ..TurnSettings::default()
            },
        );

        match runtime.handle_user_turn(&cfg.client_id, input).await {
            Ok(outcome) => println!("{}", outcome.reply),
            Err(fault) => warn!("turn failed: {:?}", fault.record()),
        }
        generator.unload().await?;
    }

    for fault in registry.unload_all().await {
        warn!("unload: {}", fault);
    }

    info!("hivemind shut down");
    Ok(())
}

async fn open_store(cfg: &RuntimeConfig) -> Result<Arc<dyn ListStore>> {
    Ok(match cfg.store_backend {
        StoreBackend::Memory => Arc::new(MemoryListStore::new()),
        StoreBackend::Sqlite => {
            if let Some(parent) = cfg.sqlite_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            Arc::new(SqliteListStore::open(&cfg.sqlite_path)?)
        }
    })
}
