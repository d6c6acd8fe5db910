//! Shared CLI wiring: tracing, profile resolution, runtime assembly.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use opal_agent::{
    Coordinator, EngineConfig, ModelProfile, OpenAiClient, SubagentTool, ToolRegistry,
};
use opal_events::{EventBus, EventListener, SubagentTracker};
use opal_store::{Database, SessionStore};

/// Initialize tracing with `RUST_LOG` overrides.
pub fn init_tracing(default: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Whether full tool output was requested (`VERBOSE=1`).
pub fn verbose() -> bool {
    std::env::var("VERBOSE").map(|v| v.trim() == "1").unwrap_or(false)
}

/// Resolve the model profile from the environment.
///
/// `OPAL_PROVIDER` selects the provider (default `openai`); the profile
/// itself comes from `<PROVIDER>_API_KEY` / `<PROVIDER>_BASE_URL` /
/// `<PROVIDER>_MODEL`.
pub fn resolve_profile() -> Result<ModelProfile> {
    let provider = std::env::var("OPAL_PROVIDER").unwrap_or_else(|_| "openai".to_owned());
    ModelProfile::from_env(&provider).with_context(|| {
        format!(
            "failed to resolve model profile for provider `{provider}` \
             (set {0}_MODEL, {0}_API_KEY, {0}_BASE_URL)",
            provider.to_uppercase()
        )
    })
}

/// A fully wired agent runtime.
pub struct Runtime {
    pub coordinator: Arc<Coordinator>,
    pub store: SessionStore,
    pub bus: EventBus,
}

/// Assemble store, bus, registry, and coordinator, with the subagent tool
/// and progress deriver attached.
pub async fn build_runtime() -> Result<Runtime> {
    let data_dir = Path::new("data");
    if !data_dir.exists() {
        std::fs::create_dir_all(data_dir).context("failed to create data directory")?;
    }

    let db_path = data_dir.join("opal.db");
    let db = Database::open_and_migrate(db_path.clone())
        .await
        .context("failed to open database")?;
    info!(path = %db_path.display(), "store initialized");

    let store = SessionStore::new(db);
    let bus = EventBus::new();
    let registry = ToolRegistry::new();

    let profile = resolve_profile()?;
    info!(model = %profile.model_id, provider = %profile.provider, "LLM profile resolved");

    let llm = Arc::new(OpenAiClient::new().context("failed to create LLM client")?);
    let config = EngineConfig::default().with_env_overrides();

    let coordinator = Coordinator::new(
        llm,
        registry.clone(),
        store.clone(),
        bus.clone(),
        config,
        profile,
    );

    let tracker = Arc::new(SubagentTracker::new(bus.clone()));
    bus.register(Arc::clone(&tracker) as Arc<dyn EventListener>);
    registry.register(Arc::new(
        SubagentTool::new(coordinator.clone()).with_tracker(tracker),
    ));

    Ok(Runtime {
        coordinator,
        store,
        bus,
    })
}
