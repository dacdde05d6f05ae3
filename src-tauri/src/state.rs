use std::{path::Path, sync::Arc};

use storybook_launcher_core::config::read_config;
use storybook_launcher_core::{
    LaunchController, LaunchError, ProjectRecord, ProjectResolver, ProjectStore, ShellSpawner,
};
use tauri::AppHandle;

use crate::windows::TauriPresenter;

pub struct DesktopState {
    pub project_store: ProjectStore,
    pub launcher: LaunchController,
}

impl DesktopState {
    pub fn new(app: &AppHandle) -> Self {
        let presenter = Arc::new(TauriPresenter::new(app.clone()));
        Self {
            project_store: ProjectStore::load(),
            launcher: LaunchController::new(presenter, Arc::new(ShellSpawner)),
        }
    }

    pub fn resolver(&self) -> ProjectResolver {
        ProjectResolver::new().with_marker(read_config().launch.script_marker)
    }

    /// Resolves and stores the manifest at `path`. `None` when it was
    /// already tracked.
    pub fn add_manifest(&self, path: &Path) -> Result<Option<ProjectRecord>, LaunchError> {
        let project = self.resolver().resolve_project(path)?;
        let added = self.project_store.add(project.clone())?;
        Ok(added.then_some(project))
    }
}
