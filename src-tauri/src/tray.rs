use storybook_launcher_core::{LaunchState, ProjectRecord};
use tauri::{
    menu::{Menu, MenuBuilder, MenuItemBuilder},
    tray::TrayIconBuilder,
    AppHandle, Emitter, Manager, Wry,
};

use crate::commands::launch_project;
use crate::state::DesktopState;
use crate::windows::MAIN_WINDOW;

const TRAY_ICON_ID: &str = "storybook-launcher-tray";
const TRAY_ID_OPEN: &str = "tray-open";
const TRAY_ID_ADD_PROJECT: &str = "tray-add";
const TRAY_ID_STOP: &str = "tray-stop";
const TRAY_ID_QUIT: &str = "tray-quit";
const PROJECT_PREFIX: &str = "project:";

pub fn init_tray(app: &AppHandle, projects: &[ProjectRecord], launch: &LaunchState) -> tauri::Result<()> {
    let menu = build_menu(app, projects, launch)?;

    let mut builder = TrayIconBuilder::with_id(TRAY_ICON_ID)
        .tooltip("Storybook Launcher")
        .menu(&menu)
        .on_menu_event(|app_handle, event| handle_menu_selection(app_handle, event.id().as_ref()));
    if let Some(icon) = app.default_window_icon() {
        builder = builder.icon(icon.clone());
    }
    builder.build(app)?;

    Ok(())
}

pub fn rebuild_tray(app: &AppHandle, projects: &[ProjectRecord], launch: &LaunchState) -> tauri::Result<()> {
    let menu = build_menu(app, projects, launch)?;

    if let Some(tray) = app.tray_by_id(TRAY_ICON_ID) {
        tray.set_menu(Some(menu))?;
    } else {
        init_tray(app, projects, launch)?;
    }

    Ok(())
}

fn build_menu(app: &AppHandle, projects: &[ProjectRecord], launch: &LaunchState) -> tauri::Result<Menu<Wry>> {
    let open = MenuItemBuilder::with_id(TRAY_ID_OPEN, "Show projects").build(app)?;
    let add_project = MenuItemBuilder::with_id(TRAY_ID_ADD_PROJECT, "Add project…").build(app)?;
    let stop = MenuItemBuilder::with_id(TRAY_ID_STOP, "Stop Storybook")
        .enabled(launch.is_loading())
        .build(app)?;
    let quit = MenuItemBuilder::with_id(TRAY_ID_QUIT, "Quit").build(app)?;

    let mut project_items = Vec::new();
    for project in projects.iter().take(5) {
        let item = MenuItemBuilder::with_id(project_menu_id(project), project.name.clone())
            .enabled(!launch.is_loading())
            .build(app)?;
        project_items.push(item);
    }

    let mut builder = MenuBuilder::new(app).item(&open);

    if !project_items.is_empty() {
        builder = builder.separator();
        for item in &project_items {
            builder = builder.item(item);
        }
    }

    builder = builder.separator();
    builder = builder.items(&[&add_project, &stop]);
    builder = builder.separator();
    builder = builder.item(&quit);

    builder.build()
}

fn handle_menu_selection(app: &AppHandle, id: &str) {
    match id {
        TRAY_ID_OPEN => {
            if let Some(window) = app.get_webview_window(MAIN_WINDOW) {
                let _ = window.show();
                let _ = window.set_focus();
            }
        }
        TRAY_ID_ADD_PROJECT => {
            let _ = app.emit("desktop://tray-add-project", ());
        }
        TRAY_ID_STOP => {
            if let Some(state) = app.try_state::<DesktopState>() {
                state.launcher.stop();
            }
        }
        TRAY_ID_QUIT => app.exit(0),
        project if project.starts_with(PROJECT_PREFIX) => {
            let path = project.trim_start_matches(PROJECT_PREFIX);
            if let Some(state) = app.try_state::<DesktopState>() {
                if let Err(error) = launch_project(app, &state, path) {
                    log::warn!("Tray launch of {path} failed: {error}");
                    let _ = app.emit("desktop://launch-failed", error.to_string());
                }
            }
        }
        _ => {}
    }
}

fn project_menu_id(project: &ProjectRecord) -> String {
    format!("{PROJECT_PREFIX}{}", project.path)
}
