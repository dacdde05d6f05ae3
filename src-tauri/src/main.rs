#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod commands;
mod state;
mod tray;
mod windows;

use tauri::{Manager, RunEvent};
use tauri_plugin_log::{Target, TargetKind};

use commands::{
    desktop_add_project, desktop_add_project_path, desktop_bootstrap, desktop_discover_projects,
    desktop_launch_project, desktop_open_in_browser, desktop_refresh_projects, desktop_remove_project,
    desktop_stop_project, desktop_update_behavior, desktop_version,
};
use state::DesktopState;

fn main() {
    let log_targets = vec![
        Target::new(TargetKind::Stdout),
        Target::new(TargetKind::LogDir { file_name: None }),
    ];

    tauri::Builder::default()
        .plugin(
            tauri_plugin_log::Builder::new()
                .level(if cfg!(debug_assertions) {
                    log::LevelFilter::Debug
                } else {
                    log::LevelFilter::Info
                })
                .targets(log_targets)
                .build(),
        )
        .plugin(tauri_plugin_dialog::init())
        .plugin(tauri_plugin_notification::init())
        .plugin(tauri_plugin_opener::init())
        .setup(|app| {
            let desktop_state = DesktopState::new(app.handle());
            let tray_projects = desktop_state.project_store.all();
            let launch = desktop_state.launcher.state();
            let store_path = desktop_state.project_store.path().to_path_buf();
            app.manage(desktop_state);
            windows::apply_main_size(app.handle())?;
            tray::init_tray(app.handle(), &tray_projects, &launch)?;
            log::info!(
                "Storybook Launcher ready with {} project(s) from {store_path:?}",
                tray_projects.len()
            );
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            desktop_bootstrap,
            desktop_refresh_projects,
            desktop_add_project,
            desktop_add_project_path,
            desktop_discover_projects,
            desktop_remove_project,
            desktop_launch_project,
            desktop_stop_project,
            desktop_open_in_browser,
            desktop_update_behavior,
            desktop_version
        ])
        .build(tauri::generate_context!())
        .expect("error while building Storybook Launcher")
        .run(|app, event| {
            if let RunEvent::Exit = event {
                if let Some(state) = app.try_state::<DesktopState>() {
                    state.launcher.shutdown();
                }
            }
        });
}
