//! CLI helper functions

use crate::{
    catalog::{StreamDefinition, active_streams},
    client::ShopifyClient,
    config::TapConfig,
    etl::RecordSink,
    storage::{NdjsonSink, StateFile},
    sync::{SyncCoordinator, SyncReport},
};
use eyre::{Context, Result, eyre};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;

/// Load the tap configuration from a JSON or YAML file
///
/// Environment overrides (applied after the dotenv file is sourced):
/// - SHOPIFY_STORE: shop subdomain
/// - SHOPIFY_ACCESS_TOKEN: replaces the configured access token
/// - SHOPIFY_START_DATE: RFC 3339 start date
/// - SHOPIFY_ADMIN_URL: full admin URL, overrides the store
pub fn load_config(path: impl AsRef<Path>) -> Result<TapConfig> {
    let path = path.as_ref();
    TapConfig::from_file(path)
        .with_context(|| format!("Failed to load config: {}", path.display()))?
        .apply_env_overrides()
        .context("Invalid configuration")
}

/// Active streams of `config`, each checked for internal consistency
pub fn load_streams(config: &TapConfig) -> Result<Vec<StreamDefinition>> {
    let streams = active_streams(config).context("Failed to select streams")?;
    for stream in &streams {
        stream.validate().map_err(|e| eyre!(e))?;
    }
    Ok(streams)
}

/// Catalog of the active streams, with their JSON Schemas
pub fn discover(config: &TapConfig) -> Result<Value> {
    let streams = load_streams(config)?;
    log::info!("Discovered {} stream(s)", streams.len());
    Ok(json!({
        "streams": streams.iter().map(StreamDefinition::catalog_entry).collect::<Vec<_>>(),
    }))
}

/// Verify the credentials, returning the shop name
pub async fn check(config: &TapConfig) -> Result<String> {
    let client = ShopifyClient::try_new(config).context("Failed to create Shopify client")?;
    log::info!("Checking credentials against {}", client.base_url());
    client.check().await.context("Credential check failed")
}

/// Sync every active stream
///
/// Messages go to `output` or stdout. The replication state is read from
/// and written back to `state` when given. Ctrl+C stops the sync after the
/// pages in flight.
pub async fn run_sync(
    config: &TapConfig,
    state: Option<&Path>,
    output: Option<&Path>,
) -> Result<SyncReport> {
    let streams = load_streams(config)?;
    let client = ShopifyClient::try_new(config).context("Failed to create Shopify client")?;

    let sink: Arc<dyn RecordSink> = match output {
        Some(path) => Arc::new(
            NdjsonSink::create(path)
                .with_context(|| format!("Failed to create output: {}", path.display()))?,
        ),
        None => Arc::new(NdjsonSink::stdout()),
    };

    let state_file = state.map(StateFile::new);
    let initial = match &state_file {
        Some(file) => file
            .load()
            .with_context(|| format!("Failed to read state: {}", file.path().display()))?,
        None => Default::default(),
    };
    if initial.is_empty() {
        log::info!("No bookmarks loaded");
    } else {
        log::info!(
            "Loaded {} bookmark(s): {}",
            initial.len(),
            initial.streams().collect::<Vec<_>>().join(", ")
        );
    }

    let mut coordinator = SyncCoordinator::from_config(client, sink, config);
    if let Some(file) = state_file {
        coordinator = coordinator.with_state_file(file);
    }
    coordinator.stop_signal().trigger_on_ctrl_c();

    coordinator
        .run(streams, initial)
        .await
        .context("Failed to write final state")
}
