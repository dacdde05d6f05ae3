//! Reads a project's `package.json` and works out how to start its Storybook.
//!
//! Resolution is convention based: any script whose command text contains
//! the marker (`start-storybook` by default) is treated as the start script.

use std::{fs, path::{Path, PathBuf}};

use dirs::home_dir;
use serde_json::{Map, Value};

use crate::config::DEFAULT_SCRIPT_MARKER;
use crate::error::{LaunchError, Result};
use crate::projects::ProjectRecord;

const MANIFEST_FILE: &str = "package.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCommand {
    pub script: String,
    pub command: String,
}

impl StartCommand {
    /// Shell line running the script through the package manager, e.g.
    /// `npm run storybook -- --ci`. Script names and extra args are quoted
    /// for the platform shell.
    pub fn invocation(&self, client: &str, extra_args: &[String]) -> Result<String> {
        let quote: fn(&str) -> Result<String> = if cfg!(target_os = "windows") { cmd_quote } else { sh_quote };
        let mut line = format!("{client} run {}", quote(&self.script)?);
        if !extra_args.is_empty() {
            line.push_str(" --");
            for arg in extra_args {
                line.push(' ');
                line.push_str(&quote(arg)?);
            }
        }
        Ok(line)
    }
}

fn sh_quote(value: &str) -> Result<String> {
    Ok(shell_words::quote(value).into_owned())
}

/// `cmd /C` still expands `%VAR%` and `!VAR!` inside double quotes and has
/// no escape for an embedded quote, so such names are refused.
fn cmd_quote(value: &str) -> Result<String> {
    if value
        .chars()
        .any(|c| matches!(c, '"' | '%' | '!' | '^') || c.is_control())
    {
        return Err(LaunchError::UnsafeScriptName {
            script: value.to_string(),
        });
    }
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.' | '/' | '=' | '@'));
    if plain {
        Ok(value.to_string())
    } else {
        Ok(format!("\"{value}\""))
    }
}

#[derive(Debug, Clone)]
pub struct ProjectResolver {
    home: Option<PathBuf>,
    marker: String,
}

impl Default for ProjectResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectResolver {
    pub fn new() -> Self {
        Self {
            home: home_dir(),
            marker: DEFAULT_SCRIPT_MARKER.into(),
        }
    }

    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn resolve_project(&self, manifest_path: &Path) -> Result<ProjectRecord> {
        if manifest_path.file_name().and_then(|name| name.to_str()) != Some(MANIFEST_FILE) {
            return Err(LaunchError::invalid_manifest(
                manifest_path,
                "expecting a file called `package.json`",
            ));
        }

        let manifest = read_manifest(manifest_path)?;
        let directory = manifest_path.parent().unwrap_or_else(|| Path::new(""));
        let name = manifest
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| infer_name(directory));

        Ok(ProjectRecord {
            name,
            path: manifest_path.display().to_string(),
            location: collapse_home(directory, self.home.as_deref()),
        })
    }

    pub fn resolve_start_command(&self, manifest_path: &Path) -> Result<StartCommand> {
        let manifest = read_manifest(manifest_path)?;
        let scripts = scripts(&manifest, manifest_path)?;

        scripts
            .iter()
            .find_map(|(script, command)| {
                command
                    .as_str()
                    .filter(|command| command.contains(self.marker.as_str()))
                    .map(|command| StartCommand {
                        script: script.clone(),
                        command: command.to_string(),
                    })
            })
            .ok_or_else(|| LaunchError::NoStartScript {
                path: manifest_path.to_path_buf(),
            })
    }
}

fn read_manifest(path: &Path) -> Result<Map<String, Value>> {
    let content =
        fs::read_to_string(path).map_err(|error| LaunchError::invalid_manifest(path, error.to_string()))?;
    let value: Value =
        serde_json::from_str(&content).map_err(|error| LaunchError::invalid_manifest(path, error.to_string()))?;

    match value {
        Value::Object(map) => {
            scripts(&map, path)?;
            Ok(map)
        }
        _ => Err(LaunchError::invalid_manifest(path, "expecting a JSON object")),
    }
}

fn scripts<'a>(manifest: &'a Map<String, Value>, path: &Path) -> Result<&'a Map<String, Value>> {
    manifest
        .get("scripts")
        .and_then(Value::as_object)
        .ok_or_else(|| LaunchError::invalid_manifest(path, "expecting a `scripts` object"))
}

fn infer_name(directory: &Path) -> String {
    directory
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "Storybook project".into())
}

/// Replaces a leading home directory with `~`, component-wise.
pub fn collapse_home(directory: &Path, home: Option<&Path>) -> String {
    let Some(home) = home else {
        return directory.display().to_string();
    };

    match directory.strip_prefix(home) {
        Ok(rest) if rest.as_os_str().is_empty() => "~".into(),
        Ok(rest) => Path::new("~").join(rest).display().to_string(),
        Err(_) => directory.display().to_string(),
    }
}
