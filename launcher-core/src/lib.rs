//! Core of Storybook Launcher: the persisted project list, `package.json`
//! resolution and the single-project launch lifecycle.

pub mod config;
pub mod error;
pub mod launch;
pub mod manifest;
pub mod process;
pub mod projects;
pub mod readiness;

pub use error::{LaunchError, Result};
pub use launch::{Effect, LaunchController, LaunchEvent, LaunchId, LaunchMachine, LaunchState, Presenter};
pub use manifest::{ProjectResolver, StartCommand};
pub use process::{ProcessHandle, ShellSpawner, SpawnRequest, Spawner};
pub use projects::{ProjectRecord, ProjectStore};
