use std::path::PathBuf;

use anyhow::{anyhow, Result};
use serde::Serialize;
use storybook_launcher_core::config::{mutate_config, read_config, BehaviorPreferences, LauncherConfig};
use storybook_launcher_core::projects::discover_projects;
use storybook_launcher_core::{LaunchState, ProjectRecord};
use tauri::{AppHandle, Emitter, Manager, State};
use tauri_plugin_dialog::DialogExt;
use tauri_plugin_opener::OpenerExt;

use crate::state::DesktopState;
use crate::tray;
use crate::windows::MAIN_WINDOW;

const DISCOVERY_LIMIT: usize = 50;

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DesktopBootstrapPayload {
    pub config: LauncherConfig,
    pub launch: LaunchState,
    pub projects: Vec<ProjectRecord>,
}

#[tauri::command]
pub async fn desktop_bootstrap(app: AppHandle, state: State<'_, DesktopState>) -> Result<DesktopBootstrapPayload, String> {
    build_and_publish(&app, &state).map_err(|error| error.to_string())
}

#[tauri::command]
pub async fn desktop_refresh_projects(app: AppHandle, state: State<'_, DesktopState>) -> Result<DesktopBootstrapPayload, String> {
    state.project_store.refresh();
    build_and_publish(&app, &state).map_err(|error| error.to_string())
}

#[tauri::command]
pub async fn desktop_add_project(app: AppHandle, state: State<'_, DesktopState>) -> Result<DesktopBootstrapPayload, String> {
    let picked = app
        .dialog()
        .file()
        .set_title("Add Storybook project")
        .add_filter("package.json", &["json"])
        .blocking_pick_file();

    if let Some(file) = picked {
        let path = file.into_path().map_err(|error| error.to_string())?;
        add_manifest(&state, path)?;
    }

    build_and_publish(&app, &state).map_err(|error| error.to_string())
}

#[tauri::command]
pub async fn desktop_add_project_path(
    app: AppHandle,
    state: State<'_, DesktopState>,
    path: String,
) -> Result<DesktopBootstrapPayload, String> {
    add_manifest(&state, PathBuf::from(path))?;
    build_and_publish(&app, &state).map_err(|error| error.to_string())
}

#[tauri::command]
pub async fn desktop_discover_projects(app: AppHandle, state: State<'_, DesktopState>) -> Result<DesktopBootstrapPayload, String> {
    let picked = app
        .dialog()
        .file()
        .set_title("Scan a folder for Storybook projects")
        .blocking_pick_folder();

    if let Some(folder) = picked {
        let root = folder.into_path().map_err(|error| error.to_string())?;
        let found = discover_projects(&root, &state.resolver(), DISCOVERY_LIMIT);
        log::info!("Found {} Storybook project(s) under {root:?}", found.len());
        for manifest in found {
            if let Err(error) = state.add_manifest(&manifest) {
                log::warn!("Skipping {manifest:?}: {error}");
            }
        }
    }

    build_and_publish(&app, &state).map_err(|error| error.to_string())
}

#[tauri::command]
pub async fn desktop_remove_project(
    app: AppHandle,
    state: State<'_, DesktopState>,
    path: String,
) -> Result<DesktopBootstrapPayload, String> {
    let removed = state
        .project_store
        .remove(&path)
        .map_err(|error| error.to_string())?;
    if !removed {
        return Err("Project not found".into());
    }

    build_and_publish(&app, &state).map_err(|error| error.to_string())
}

#[tauri::command]
pub async fn desktop_launch_project(
    app: AppHandle,
    state: State<'_, DesktopState>,
    path: String,
) -> Result<DesktopBootstrapPayload, String> {
    launch_project(&app, &state, &path).map_err(|error| error.to_string())
}

#[tauri::command]
pub async fn desktop_stop_project(app: AppHandle, state: State<'_, DesktopState>) -> Result<DesktopBootstrapPayload, String> {
    state.launcher.stop();
    build_and_publish(&app, &state).map_err(|error| error.to_string())
}

#[tauri::command]
pub async fn desktop_open_in_browser(app: AppHandle, state: State<'_, DesktopState>) -> Result<(), String> {
    let url = match state.launcher.state() {
        LaunchState::Loading { url: Some(url), .. } => url,
        _ => return Err("Storybook is not running".into()),
    };
    app.opener()
        .open_url(url, None::<&str>)
        .map_err(|error| error.to_string())
}

#[tauri::command]
pub async fn desktop_update_behavior(
    app: AppHandle,
    state: State<'_, DesktopState>,
    behavior: BehaviorPreferences,
) -> Result<DesktopBootstrapPayload, String> {
    mutate_config(|config| {
        config.behavior = behavior;
    });
    build_and_publish(&app, &state).map_err(|error| error.to_string())
}

#[tauri::command]
pub async fn desktop_version(app: AppHandle) -> Result<String, String> {
    Ok(app.package_info().version.to_string())
}

pub fn launch_project(app: &AppHandle, state: &DesktopState, path: &str) -> Result<DesktopBootstrapPayload> {
    let project = state
        .project_store
        .find(path)
        .ok_or_else(|| anyhow!("Unknown project"))?;
    let config = read_config();
    state
        .launcher
        .launch(&project, &state.resolver(), &config.launch)?;
    build_and_publish(app, state)
}

fn add_manifest(state: &DesktopState, path: PathBuf) -> Result<(), String> {
    match state.add_manifest(&path).map_err(|error| error.to_string())? {
        Some(project) => log::info!("Added {} ({})", project.name, project.location),
        None => log::debug!("{path:?} is already tracked"),
    }
    Ok(())
}

pub fn build_and_publish(app: &AppHandle, state: &DesktopState) -> Result<DesktopBootstrapPayload> {
    let payload = build_payload(state);
    tray::rebuild_tray(app, &payload.projects, &payload.launch)
        .map_err(|error| anyhow!(error.to_string()))?;
    if let Some(window) = app.get_webview_window(MAIN_WINDOW) {
        window
            .emit("desktop://state-updated", payload.clone())
            .map_err(|error| anyhow!(error.to_string()))?;
    } else {
        app.emit("desktop://state-updated", payload.clone())
            .map_err(|error| anyhow!(error.to_string()))?;
    }
    Ok(payload)
}

fn build_payload(state: &DesktopState) -> DesktopBootstrapPayload {
    DesktopBootstrapPayload {
        config: read_config(),
        launch: state.launcher.state(),
        projects: state.project_store.all(),
    }
}
