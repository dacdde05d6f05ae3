use std::{fs, path::{Path, PathBuf}};

use dirs::config_dir as user_config_dir;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{LaunchError, Result};

static CONFIG: Lazy<RwLock<LauncherConfig>> = Lazy::new(|| RwLock::new(LauncherConfig::load_or_default()));

const APP_DIR: &str = "storybook-launcher";
const CONFIG_FILE: &str = "launcher.yaml";

pub const DEFAULT_READY_PATTERN: &str = "Storybook.*started";
pub const DEFAULT_URL_PATTERN: &str = r"Local:\s+(\S+)";
pub const DEFAULT_SCRIPT_MARKER: &str = "start-storybook";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LauncherConfig {
    #[serde(default)]
    pub window: WindowPreferences,
    #[serde(default)]
    pub launch: LaunchPreferences,
    #[serde(default)]
    pub behavior: BehaviorPreferences,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WindowPreferences {
    pub main: WindowSize,
    pub preview: WindowSize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LaunchPreferences {
    /// Package manager used as `<client> run <script>`.
    pub client: String,
    pub extra_args: Vec<String>,
    pub script_marker: String,
    pub ready_pattern: String,
    pub url_pattern: String,
    pub forward_output: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BehaviorPreferences {
    pub notify_on_failure: bool,
    pub open_in_browser: bool,
}

impl Default for WindowPreferences {
    fn default() -> Self {
        Self {
            main: WindowSize { width: 512, height: 512 },
            preview: WindowSize { width: 1280, height: 860 },
        }
    }
}

impl Default for LaunchPreferences {
    fn default() -> Self {
        Self {
            client: "npm".into(),
            extra_args: vec!["--ci".into()],
            script_marker: DEFAULT_SCRIPT_MARKER.into(),
            ready_pattern: DEFAULT_READY_PATTERN.into(),
            url_pattern: DEFAULT_URL_PATTERN.into(),
            forward_output: false,
        }
    }
}

impl Default for BehaviorPreferences {
    fn default() -> Self {
        Self {
            notify_on_failure: true,
            open_in_browser: false,
        }
    }
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            window: WindowPreferences::default(),
            launch: LaunchPreferences::default(),
            behavior: BehaviorPreferences::default(),
        }
    }
}

impl LauncherConfig {
    fn load_or_default() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Reads the YAML config at `path`, falling back to defaults when the
    /// file is missing or cannot be parsed.
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(raw) => match Self::parse(&raw) {
                Ok(config) => config,
                Err(error) => {
                    log::warn!("Failed to parse launcher config: {error}");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut config: LauncherConfig =
            serde_yaml::from_str(raw).map_err(|error| LaunchError::Config(error.to_string()))?;
        normalize_config(&mut config);
        Ok(config)
    }

    pub fn persist_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|error| LaunchError::persistence(dir, error))?;
        }
        let serialized = serde_yaml::to_string(self).map_err(|error| LaunchError::Config(error.to_string()))?;
        fs::write(path, serialized).map_err(|error| LaunchError::persistence(path, error))
    }
}

fn normalize_config(config: &mut LauncherConfig) {
    let defaults = LaunchPreferences::default();
    let launch = &mut config.launch;

    if launch.client.trim().is_empty() {
        launch.client = defaults.client;
    }
    if launch.script_marker.trim().is_empty() {
        launch.script_marker = defaults.script_marker;
    }
    if Regex::new(&launch.ready_pattern).is_err() {
        log::warn!("Ignoring invalid readyPattern {:?}", launch.ready_pattern);
        launch.ready_pattern = defaults.ready_pattern;
    }
    match Regex::new(&launch.url_pattern) {
        Ok(regex) if regex.captures_len() > 1 => {}
        _ => {
            log::warn!("Ignoring urlPattern {:?}, it needs one capture group", launch.url_pattern);
            launch.url_pattern = defaults.url_pattern;
        }
    }

    let windows = WindowPreferences::default();
    if config.window.main.width == 0 || config.window.main.height == 0 {
        config.window.main = windows.main;
    }
    if config.window.preview.width == 0 || config.window.preview.height == 0 {
        config.window.preview = windows.preview;
    }
}

/// Per-user directory holding `projects.json` and `launcher.yaml`.
pub fn app_dir() -> PathBuf {
    user_config_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn config_file_path() -> PathBuf {
    app_dir().join(CONFIG_FILE)
}

pub fn read_config() -> LauncherConfig {
    CONFIG.read().clone()
}

pub fn mutate_config<F>(mutator: F)
where
    F: FnOnce(&mut LauncherConfig),
{
    let mut guard = CONFIG.write();
    mutate_at(&mut guard, &config_file_path(), mutator);
}

fn mutate_at<F>(config: &mut LauncherConfig, path: &Path, mutator: F)
where
    F: FnOnce(&mut LauncherConfig),
{
    mutator(config);
    normalize_config(config);
    if let Err(error) = config.persist_to(path) {
        log::error!("Unable to write launcher config: {error}");
    }
}
