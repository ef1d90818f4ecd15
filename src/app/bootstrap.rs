use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{AppConfig, JsonSettingsStore};
use crate::error::AppResult;
use crate::geometry::Size;
use crate::inference::{EndpointConfig, OllamaClient};
use crate::session::SessionController;
use crate::storage::TempImageStore;

const STALE_TEMP_MAX_AGE_HOURS: u64 = 24;

/// Command-line overrides applied on top of `config.json`.
#[derive(Debug, Clone, Default)]
pub struct StartupOptions {
    pub config_path: Option<PathBuf>,
    pub host: Option<String>,
    pub model: Option<String>,
}

pub(super) fn bootstrap_session(
    options: &StartupOptions,
) -> AppResult<SessionController<JsonSettingsStore>> {
    let settings = match &options.config_path {
        Some(path) => JsonSettingsStore::open(path.clone()),
        None => JsonSettingsStore::open_default()?,
    };
    tracing::info!(path = %settings.path().display(), "loaded settings");

    let endpoint = resolve_endpoint(settings.config(), options);
    tracing::info!(host = %endpoint.host, model = %endpoint.model, "using inference endpoint");
    let backend = OllamaClient::new(endpoint)?;

    let temp_images = TempImageStore::with_default_dir()?;
    prune_stale_crop_files(&temp_images);

    let display = Size::new(
        settings.config().display_width,
        settings.config().display_height,
    );
    Ok(SessionController::new(
        Arc::new(backend),
        settings,
        temp_images,
        display,
    ))
}

pub(super) fn resolve_endpoint(config: &AppConfig, options: &StartupOptions) -> EndpointConfig {
    let mut endpoint = EndpointConfig::from(config);
    if let Some(host) = &options.host {
        endpoint.host = host.clone();
    }
    if let Some(model) = &options.model {
        endpoint.model = model.clone();
    }
    endpoint
}

fn prune_stale_crop_files(store: &TempImageStore) {
    match store.prune_stale_temp_files(STALE_TEMP_MAX_AGE_HOURS) {
        Ok(report) if report.removed_files > 0 => {
            tracing::info!(
                removed_files = report.removed_files,
                "pruned stale crop files"
            );
        }
        Ok(_) => {}
        Err(err) => {
            tracing::warn!(
                max_age_hours = STALE_TEMP_MAX_AGE_HOURS,
                ?err,
                "failed to prune stale crop files"
            );
        }
    }
}
