//! Window swap between the project list and the running Storybook.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, Result};
use storybook_launcher_core::config::read_config;
use storybook_launcher_core::{LaunchError, LaunchEvent, LaunchId, LaunchState, Presenter};
use tauri::{
    webview::PageLoadEvent, AppHandle, Emitter, LogicalSize, Manager, Url, WebviewUrl,
    WebviewWindowBuilder, WindowEvent,
};
use tauri_plugin_notification::NotificationExt;
use tauri_plugin_opener::OpenerExt;

use crate::commands::build_and_publish;
use crate::state::DesktopState;

pub const MAIN_WINDOW: &str = "main";
pub const PREVIEW_WINDOW: &str = "storybook";

/// Sizes the project window from `window.main` in the launcher config.
pub fn apply_main_size(app: &AppHandle) -> tauri::Result<()> {
    let size = read_config().window.main;
    if let Some(window) = app.get_webview_window(MAIN_WINDOW) {
        window.set_size(LogicalSize::new(f64::from(size.width), f64::from(size.height)))?;
    }
    Ok(())
}

/// Trips on the first finished page load only; in-page navigation in
/// Storybook must not re-hide the project window.
#[derive(Debug, Default)]
struct FirstLoad(AtomicBool);

impl FirstLoad {
    fn take(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }
}

pub struct TauriPresenter {
    app: AppHandle,
}

impl TauriPresenter {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }

    fn open_preview(&self, id: LaunchId, project: &Path, url: &str) -> Result<()> {
        let config = read_config();
        if config.behavior.open_in_browser {
            self.app
                .opener()
                .open_url(url, None::<&str>)
                .map_err(|error| anyhow!(error.to_string()))?;
            return Ok(());
        }

        let target: Url = url.parse()?;
        if let Some(stale) = self.app.get_webview_window(PREVIEW_WINDOW) {
            stale.destroy()?;
        }

        let title = project
            .parent()
            .and_then(|dir| dir.file_name())
            .map(|name| format!("Storybook · {}", name.to_string_lossy()))
            .unwrap_or_else(|| "Storybook".into());
        let size = config.window.preview;
        let first_load = Arc::new(FirstLoad::default());

        let window = WebviewWindowBuilder::new(&self.app, PREVIEW_WINDOW, WebviewUrl::External(target))
            .title(title)
            .inner_size(f64::from(size.width), f64::from(size.height))
            .visible(false)
            .on_page_load(move |window, payload| {
                if matches!(payload.event(), PageLoadEvent::Finished) && first_load.take() {
                    if let Some(main) = window.app_handle().get_webview_window(MAIN_WINDOW) {
                        let _ = main.hide();
                    }
                    let _ = window.show();
                    let _ = window.set_focus();
                }
            })
            .build()?;

        let app = self.app.clone();
        window.on_window_event(move |event| {
            if let WindowEvent::Destroyed = event {
                if let Some(state) = app.try_state::<DesktopState>() {
                    state.launcher.dispatch(id, LaunchEvent::SurfaceClosed);
                }
            }
        });

        Ok(())
    }
}

impl Presenter for TauriPresenter {
    fn show_preview(&self, id: LaunchId, project: &Path, url: &str) {
        if let Err(error) = self.open_preview(id, project, url) {
            log::error!("Unable to open {url}: {error}");
            if let Some(state) = self.app.try_state::<DesktopState>() {
                state
                    .launcher
                    .dispatch(id, LaunchEvent::Failed(LaunchError::Surface(error.to_string())));
            }
        }
    }

    fn close_preview(&self, _id: LaunchId) {
        if let Some(window) = self.app.get_webview_window(PREVIEW_WINDOW) {
            let _ = window.destroy();
        }
    }

    fn restore_main(&self) {
        if let Some(window) = self.app.get_webview_window(MAIN_WINDOW) {
            let _ = window.show();
            let _ = window.set_focus();
        }
    }

    fn launch_failed(&self, error: &LaunchError) {
        let _ = self.app.emit("desktop://launch-failed", error.to_string());
        if read_config().behavior.notify_on_failure {
            let _ = self
                .app
                .notification()
                .builder()
                .title("Storybook failed to start")
                .body(error.to_string())
                .show();
        }
    }

    fn state_changed(&self, state: &LaunchState) {
        log::debug!("Launch state: {state:?}");
        if let Some(desktop) = self.app.try_state::<DesktopState>() {
            if let Err(error) = build_and_publish(&self.app, &desktop) {
                log::warn!("Unable to publish desktop state: {error}");
            }
        }
    }
}
