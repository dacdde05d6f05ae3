use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("Invalid package.json at {path:?}: {reason}")]
    InvalidManifest { path: PathBuf, reason: String },

    #[error("No script in {path:?} runs start-storybook")]
    NoStartScript { path: PathBuf },

    #[error("Script name {script:?} cannot be passed safely to the shell")]
    UnsafeScriptName { script: String },

    #[error("Failed to start Storybook: {0}")]
    ProcessSpawn(String),

    #[error("Storybook exited before it was ready ({})", exit_label(.code))]
    ProcessExited { code: Option<i32> },

    #[error("Storybook reported it started but printed no Local: URL")]
    MissingUrl,

    #[error("Unable to open the Storybook window: {0}")]
    Surface(String),

    #[error("Already launching {path:?}")]
    AlreadyLoading { path: PathBuf },

    #[error("Unable to write {path:?}: {message}")]
    Persistence { path: PathBuf, message: String },

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".into(),
    }
}

impl LaunchError {
    pub(crate) fn invalid_manifest(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidManifest {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, error: impl std::fmt::Display) -> Self {
        Self::Persistence {
            path: path.into(),
            message: error.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LaunchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_message_names_code_or_signal() {
        assert_eq!(
            LaunchError::ProcessExited { code: Some(1) }.to_string(),
            "Storybook exited before it was ready (exit code 1)"
        );
        assert_eq!(
            LaunchError::ProcessExited { code: None }.to_string(),
            "Storybook exited before it was ready (terminated by signal)"
        );
    }
}
