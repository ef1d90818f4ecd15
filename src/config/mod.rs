use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConfigPathError {
    MissingHomeDirectory,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing HOME environment variable")]
    MissingHomeDirectory,
    #[error("failed to write settings to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

const APP_DIR: &str = "itt-qwen";
const APP_CONFIG_FILE: &str = "config.json";

pub const DEFAULT_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "qwen2.5vl:7b";
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 600;
pub const DEFAULT_DISPLAY_WIDTH: u32 = 800;
pub const DEFAULT_DISPLAY_HEIGHT: u32 = 600;

pub const DEFAULT_TUTORIAL_MESSAGE: &str = "\
### Welcome to ITT-Qwen!

This is your visual analysis assistant. Here's how to get started:

**1. Provide an image**

* `/image <path>` loads a PNG, JPEG, BMP or GIF file.
* `/clear-image` removes it again.

**2. Ask a question**

* Type your question and press Enter.

**3. Focused analysis**

* `/select <x> <y> <width> <height>` marks a region of the preview.
* Your next question will focus *only* on the content within that box.
* `/select off` returns to the full image.

**Tips for best results**

* Be specific with your questions.
* Clear images with good lighting work best.

Run `/tutorial` to see this message again.
";

/// Application-level settings from `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_true")]
    pub show_tutorial: bool,
    #[serde(default = "default_tutorial_message")]
    pub tutorial_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default = "default_display_width")]
    pub display_width: u32,
    #[serde(default = "default_display_height")]
    pub display_height: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            model: default_model(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            show_tutorial: true,
            tutorial_message: default_tutorial_message(),
            system_prompt: None,
            display_width: DEFAULT_DISPLAY_WIDTH,
            display_height: DEFAULT_DISPLAY_HEIGHT,
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

const fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

const fn default_true() -> bool {
    true
}

fn default_tutorial_message() -> String {
    DEFAULT_TUTORIAL_MESSAGE.to_string()
}

const fn default_display_width() -> u32 {
    DEFAULT_DISPLAY_WIDTH
}

const fn default_display_height() -> u32 {
    DEFAULT_DISPLAY_HEIGHT
}

/// Typed access to the persisted user preferences.
pub trait SettingsStore {
    fn show_tutorial(&self) -> bool;
    fn set_show_tutorial(&mut self, value: bool) -> ConfigResult<()>;
    fn tutorial_message(&self) -> String;
    fn set_tutorial_message(&mut self, value: String) -> ConfigResult<()>;
    fn system_prompt(&self) -> Option<String>;
}

/// Settings backed by `config.json`; every setter writes the file through.
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: PathBuf,
    config: AppConfig,
}

impl JsonSettingsStore {
    pub fn open(path: PathBuf) -> Self {
        let config = load_app_config_from(&path);
        Self { path, config }
    }

    pub fn open_default() -> ConfigResult<Self> {
        let (xdg_config_home, home) = config_env_dirs();
        let path = app_config_path(
            APP_DIR,
            APP_CONFIG_FILE,
            xdg_config_home.as_deref(),
            home.as_deref(),
        )
        .map_err(|_| ConfigError::MissingHomeDirectory)?;
        Ok(Self::open(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn persist(&self) -> ConfigResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: self.path.clone(),
                source,
            })?;
        }
        let contents = serde_json::to_string_pretty(&self.config)?;
        std::fs::write(&self.path, contents).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

impl SettingsStore for JsonSettingsStore {
    fn show_tutorial(&self) -> bool {
        self.config.show_tutorial
    }

    fn set_show_tutorial(&mut self, value: bool) -> ConfigResult<()> {
        self.config.show_tutorial = value;
        self.persist()
    }

    fn tutorial_message(&self) -> String {
        self.config.tutorial_message.clone()
    }

    fn set_tutorial_message(&mut self, value: String) -> ConfigResult<()> {
        self.config.tutorial_message = value;
        self.persist()
    }

    fn system_prompt(&self) -> Option<String> {
        self.config.system_prompt.clone()
    }
}

/// In-memory settings, never persisted.
#[derive(Debug, Clone, Default)]
pub struct MemorySettingsStore {
    pub config: AppConfig,
}

impl MemorySettingsStore {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn show_tutorial(&self) -> bool {
        self.config.show_tutorial
    }

    fn set_show_tutorial(&mut self, value: bool) -> ConfigResult<()> {
        self.config.show_tutorial = value;
        Ok(())
    }

    fn tutorial_message(&self) -> String {
        self.config.tutorial_message.clone()
    }

    fn set_tutorial_message(&mut self, value: String) -> ConfigResult<()> {
        self.config.tutorial_message = value;
        Ok(())
    }

    fn system_prompt(&self) -> Option<String> {
        self.config.system_prompt.clone()
    }
}

pub fn load_app_config_from(path: &Path) -> AppConfig {
    if !path.exists() {
        return AppConfig::default();
    }
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
            tracing::warn!(?err, ?path, "failed to parse config.json; using defaults");
            AppConfig::default()
        }),
        Err(err) => {
            tracing::warn!(?err, ?path, "failed to read config.json; using defaults");
            AppConfig::default()
        }
    }
}

pub(crate) fn config_env_dirs() -> (Option<PathBuf>, Option<PathBuf>) {
    (
        std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from),
        std::env::var_os("HOME").map(PathBuf::from),
    )
}

pub(crate) fn app_config_path(
    app_dir: &str,
    file_name: &str,
    xdg_config_home: Option<&Path>,
    home: Option<&Path>,
) -> Result<PathBuf, ConfigPathError> {
    let mut path = config_root(xdg_config_home, home)?;
    path.push(app_dir);
    path.push(file_name);
    Ok(path)
}

fn config_root(
    xdg_config_home: Option<&Path>,
    home: Option<&Path>,
) -> Result<PathBuf, ConfigPathError> {
    if let Some(xdg) = xdg_config_home.filter(|path| !path.as_os_str().is_empty()) {
        return Ok(xdg.to_path_buf());
    }

    let home = home.ok_or(ConfigPathError::MissingHomeDirectory)?;
    Ok(home.join(".config"))
}
