//! Launch lifecycle: `Idle → Loading → Idle`.
//!
//! [`LaunchMachine`] is the pure transition table. [`LaunchController`] owns
//! the machine and the running child, feeds it events from the process
//! reader threads and applies the resulting [`Effect`]s through a
//! [`Presenter`].

use std::{path::{Path, PathBuf}, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::LaunchPreferences;
use crate::error::{LaunchError, Result};
use crate::manifest::ProjectResolver;
use crate::process::{ProcessHandle, SpawnRequest, Spawner};
use crate::projects::ProjectRecord;
use crate::readiness::ReadinessScanner;

pub type LaunchId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum LaunchState {
    Idle,
    #[serde(rename_all = "camelCase")]
    Loading {
        id: LaunchId,
        project: PathBuf,
        url: Option<String>,
        started_at: DateTime<Utc>,
    },
}

impl LaunchState {
    pub fn is_loading(&self) -> bool {
        matches!(self, LaunchState::Loading { .. })
    }

    pub fn loading_project(&self) -> Option<&Path> {
        match self {
            LaunchState::Loading { project, .. } => Some(project),
            LaunchState::Idle => None,
        }
    }

    pub fn current_id(&self) -> Option<LaunchId> {
        match self {
            LaunchState::Loading { id, .. } => Some(*id),
            LaunchState::Idle => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchEvent {
    /// A raw chunk of the child's standard output.
    Output(String),
    Exited { code: Option<i32> },
    Failed(LaunchError),
    SurfaceClosed,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    ShowPreview { url: String },
    ClosePreview,
    RestoreMain,
    Terminate,
    Failed(LaunchError),
}

pub struct LaunchMachine {
    state: LaunchState,
    scanner: Option<ReadinessScanner>,
    next_id: LaunchId,
}

impl Default for LaunchMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl LaunchMachine {
    pub fn new() -> Self {
        Self {
            state: LaunchState::Idle,
            scanner: None,
            next_id: 1,
        }
    }

    pub fn state(&self) -> &LaunchState {
        &self.state
    }

    pub fn begin(&mut self, project: &Path, scanner: ReadinessScanner) -> Result<LaunchId> {
        if let Some(path) = self.state.loading_project() {
            return Err(LaunchError::AlreadyLoading {
                path: path.to_path_buf(),
            });
        }

        let id = self.next_id;
        self.next_id += 1;
        self.scanner = Some(scanner);
        self.state = LaunchState::Loading {
            id,
            project: project.to_path_buf(),
            url: None,
            started_at: Utc::now(),
        };
        Ok(id)
    }

    pub fn handle(&mut self, id: LaunchId, event: LaunchEvent) -> Vec<Effect> {
        let LaunchState::Loading { id: current, url, .. } = &mut self.state else {
            return Vec::new();
        };
        if *current != id {
            return Vec::new();
        }

        match event {
            LaunchEvent::Output(chunk) => {
                if url.is_some() {
                    return Vec::new();
                }
                let found = self.scanner.as_mut().and_then(|scanner| scanner.feed(&chunk));
                match found {
                    Some(found) => {
                        *url = Some(found.clone());
                        vec![Effect::ShowPreview { url: found }]
                    }
                    None => Vec::new(),
                }
            }
            LaunchEvent::Exited { code } => {
                let armed = self.scanner.as_ref().is_some_and(ReadinessScanner::is_armed);
                let failure = if armed {
                    LaunchError::MissingUrl
                } else {
                    LaunchError::ProcessExited { code }
                };
                self.reset();
                vec![Effect::ClosePreview, Effect::RestoreMain, Effect::Failed(failure)]
            }
            LaunchEvent::Failed(error) => {
                self.reset();
                vec![
                    Effect::Terminate,
                    Effect::ClosePreview,
                    Effect::RestoreMain,
                    Effect::Failed(error),
                ]
            }
            LaunchEvent::SurfaceClosed => {
                self.reset();
                vec![Effect::RestoreMain, Effect::Terminate]
            }
            LaunchEvent::Cancel => {
                self.reset();
                vec![Effect::Terminate, Effect::ClosePreview, Effect::RestoreMain]
            }
        }
    }

    fn reset(&mut self) {
        self.state = LaunchState::Idle;
        self.scanner = None;
    }
}

/// Window side of a launch, implemented by the desktop shell.
pub trait Presenter: Send + Sync {
    /// Open the secondary surface on `url`, hidden until it has loaded, then
    /// swap it with the primary one.
    fn show_preview(&self, id: LaunchId, project: &Path, url: &str);
    fn close_preview(&self, id: LaunchId);
    fn restore_main(&self);
    fn launch_failed(&self, error: &LaunchError);
    fn state_changed(&self, state: &LaunchState);
}

struct Session {
    machine: LaunchMachine,
    process: Option<Box<dyn ProcessHandle>>,
}

struct Inner {
    session: Mutex<Session>,
    presenter: Arc<dyn Presenter>,
    spawner: Arc<dyn Spawner>,
}

#[derive(Clone)]
pub struct LaunchController {
    inner: Arc<Inner>,
}

impl LaunchController {
    pub fn new(presenter: Arc<dyn Presenter>, spawner: Arc<dyn Spawner>) -> Self {
        Self {
            inner: Arc::new(Inner {
                session: Mutex::new(Session {
                    machine: LaunchMachine::new(),
                    process: None,
                }),
                presenter,
                spawner,
            }),
        }
    }

    pub fn state(&self) -> LaunchState {
        self.inner.session.lock().machine.state().clone()
    }

    /// Starts Storybook for `project`. Fails without side effects when a
    /// launch is already running or the manifest cannot be resolved.
    pub fn launch(
        &self,
        project: &ProjectRecord,
        resolver: &ProjectResolver,
        preferences: &LaunchPreferences,
    ) -> Result<LaunchId> {
        let mut session = self.inner.session.lock();
        if let Some(path) = session.machine.state().loading_project() {
            return Err(LaunchError::AlreadyLoading {
                path: path.to_path_buf(),
            });
        }

        let start = resolver.resolve_start_command(project.manifest_path())?;
        let command_line = start.invocation(&preferences.client, &preferences.extra_args)?;
        let scanner = ReadinessScanner::from_preferences(preferences)?;
        let id = session.machine.begin(project.manifest_path(), scanner)?;

        let request = SpawnRequest {
            command_line,
            working_dir: project.directory().to_path_buf(),
            forward_output: preferences.forward_output,
        };
        log::info!(
            "Starting '{}' for {} ({})",
            request.command_line,
            project.name,
            start.command
        );

        let controller = self.clone();
        let sink = Box::new(move |event: LaunchEvent| controller.dispatch(id, event));
        match self.inner.spawner.spawn(&request, sink) {
            Ok(process) => {
                session.process = Some(process);
                let state = session.machine.state().clone();
                drop(session);
                self.inner.presenter.state_changed(&state);
                Ok(id)
            }
            Err(error) => {
                session.machine.handle(id, LaunchEvent::Cancel);
                log::error!("Failed to spawn Storybook for {}: {error}", project.name);
                Err(error)
            }
        }
    }

    /// Feeds an event for launch `id` through the machine and applies the
    /// effects. Events for stale launches are dropped.
    pub fn dispatch(&self, id: LaunchId, event: LaunchEvent) {
        let (effects, process, state) = {
            let mut session = self.inner.session.lock();
            let was_loading = session.machine.state().current_id() == Some(id);
            let effects = session.machine.handle(id, event);
            let now_idle = !session.machine.state().is_loading();
            let process = if was_loading && now_idle {
                session.process.take()
            } else {
                None
            };
            let state = (was_loading && now_idle).then(|| session.machine.state().clone());
            (effects, process, state)
        };

        self.apply(id, effects, process);
        if let Some(state) = state {
            self.inner.presenter.state_changed(&state);
        }
    }

    pub fn stop(&self) -> bool {
        match self.state().current_id() {
            Some(id) => {
                self.dispatch(id, LaunchEvent::Cancel);
                true
            }
            None => false,
        }
    }

    /// Terminates the running child at application exit.
    pub fn shutdown(&self) {
        let process = self.inner.session.lock().process.take();
        if let Some(mut process) = process {
            log::info!("Terminating Storybook child process {:?} at exit", process.pid());
            if let Err(error) = process.terminate() {
                log::warn!("Unable to terminate Storybook: {error}");
            }
        }
    }

    fn apply(&self, id: LaunchId, effects: Vec<Effect>, mut process: Option<Box<dyn ProcessHandle>>) {
        let presenter = &self.inner.presenter;
        for effect in effects {
            match effect {
                Effect::ShowPreview { url } => {
                    let project = self
                        .state()
                        .loading_project()
                        .map(Path::to_path_buf)
                        .unwrap_or_default();
                    log::info!("Opening {url}");
                    presenter.show_preview(id, &project, &url);
                }
                Effect::ClosePreview => presenter.close_preview(id),
                Effect::RestoreMain => presenter.restore_main(),
                Effect::Terminate => {
                    if let Some(process) = process.as_mut() {
                        log::info!("Terminating Storybook child process {:?}", process.pid());
                        if let Err(error) = process.terminate() {
                            log::warn!("Unable to terminate Storybook: {error}");
                        }
                    }
                }
                Effect::Failed(error) => {
                    log::error!("{error}");
                    presenter.launch_failed(&error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::EventSink;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Show(LaunchId, String),
        Close(LaunchId),
        Restore,
        Failed(LaunchError),
        State(bool),
    }

    #[derive(Default)]
    struct RecordingPresenter {
        calls: Mutex<Vec<Call>>,
    }

    impl RecordingPresenter {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }
    }

    impl Presenter for RecordingPresenter {
        fn show_preview(&self, id: LaunchId, _project: &Path, url: &str) {
            self.calls.lock().push(Call::Show(id, url.to_string()));
        }

        fn close_preview(&self, id: LaunchId) {
            self.calls.lock().push(Call::Close(id));
        }

        fn restore_main(&self) {
            self.calls.lock().push(Call::Restore);
        }

        fn launch_failed(&self, error: &LaunchError) {
            self.calls.lock().push(Call::Failed(error.clone()));
        }

        fn state_changed(&self, state: &LaunchState) {
            self.calls.lock().push(Call::State(state.is_loading()));
        }
    }

    #[derive(Default)]
    struct FakeProcess {
        terminated: Arc<Mutex<u32>>,
    }

    impl ProcessHandle for FakeProcess {
        fn pid(&self) -> Option<u32> {
            Some(42)
        }

        fn terminate(&mut self) -> Result<()> {
            *self.terminated.lock() += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeSpawner {
        requests: Mutex<Vec<SpawnRequest>>,
        terminated: Arc<Mutex<u32>>,
        fail: bool,
    }

    impl Spawner for FakeSpawner {
        fn spawn(&self, request: &SpawnRequest, _sink: EventSink) -> Result<Box<dyn ProcessHandle>> {
            if self.fail {
                return Err(LaunchError::ProcessSpawn("sh: not found".into()));
            }
            self.requests.lock().push(request.clone());
            Ok(Box::new(FakeProcess {
                terminated: Arc::clone(&self.terminated),
            }))
        }
    }

    struct Fixture {
        _dir: TempDir,
        project: ProjectRecord,
        presenter: Arc<RecordingPresenter>,
        spawner: Arc<FakeSpawner>,
        controller: LaunchController,
    }

    fn fixture_with(spawner: FakeSpawner, manifest: &str) -> Fixture {
        let dir = tempdir().unwrap();
        let project_dir = dir.path().join("proj");
        fs::create_dir_all(&project_dir).unwrap();
        let manifest_path = project_dir.join("package.json");
        fs::write(&manifest_path, manifest).unwrap();

        let project = ProjectResolver::new().resolve_project(&manifest_path).unwrap();
        let presenter = Arc::new(RecordingPresenter::default());
        let spawner = Arc::new(spawner);
        let controller = LaunchController::new(presenter.clone(), spawner.clone());
        Fixture {
            _dir: dir,
            project,
            presenter,
            spawner,
            controller,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            FakeSpawner::default(),
            r#"{"name":"x","scripts":{"storybook":"start-storybook -p 6006"}}"#,
        )
    }

    fn launch(fixture: &Fixture) -> Result<LaunchId> {
        fixture
            .controller
            .launch(&fixture.project, &ProjectResolver::new(), &LaunchPreferences::default())
    }

    fn scanner() -> ReadinessScanner {
        ReadinessScanner::default()
    }

    #[test]
    fn machine_ignores_events_while_idle() {
        let mut machine = LaunchMachine::new();
        assert!(machine.handle(1, LaunchEvent::SurfaceClosed).is_empty());
        assert_eq!(machine.state(), &LaunchState::Idle);
    }

    #[test]
    fn machine_rejects_second_begin() {
        let mut machine = LaunchMachine::new();
        machine.begin(Path::new("/a/package.json"), scanner()).unwrap();
        let error = machine.begin(Path::new("/b/package.json"), scanner()).unwrap_err();

        assert_eq!(
            error,
            LaunchError::AlreadyLoading {
                path: PathBuf::from("/a/package.json")
            }
        );
        assert_eq!(machine.state().loading_project(), Some(Path::new("/a/package.json")));
    }

    #[test]
    fn machine_shows_preview_exactly_once() {
        let mut machine = LaunchMachine::new();
        let id = machine.begin(Path::new("/a/package.json"), scanner()).unwrap();

        let mut effects = Vec::new();
        for chunk in ["Building...", "Storybook 6.0.0 started\n", "Local: http://localhost:6006/\n"] {
            effects.extend(machine.handle(id, LaunchEvent::Output(chunk.into())));
        }
        effects.extend(machine.handle(
            id,
            LaunchEvent::Output("Storybook 6.0.0 started\nLocal: http://localhost:6006/\n".into()),
        ));

        assert_eq!(
            effects,
            vec![Effect::ShowPreview {
                url: "http://localhost:6006/".into()
            }]
        );
        assert!(machine.state().is_loading());
    }

    #[test]
    fn machine_drops_stale_events() {
        let mut machine = LaunchMachine::new();
        let first = machine.begin(Path::new("/a/package.json"), scanner()).unwrap();
        machine.handle(first, LaunchEvent::Cancel);
        let second = machine.begin(Path::new("/b/package.json"), scanner()).unwrap();

        assert!(machine.handle(first, LaunchEvent::Exited { code: Some(1) }).is_empty());
        assert_eq!(machine.state().current_id(), Some(second));
    }

    #[test]
    fn machine_exit_before_ready_returns_to_idle() {
        let mut machine = LaunchMachine::new();
        let id = machine.begin(Path::new("/a/package.json"), scanner()).unwrap();
        let effects = machine.handle(id, LaunchEvent::Exited { code: Some(1) });

        assert_eq!(machine.state(), &LaunchState::Idle);
        assert_eq!(
            effects.last(),
            Some(&Effect::Failed(LaunchError::ProcessExited { code: Some(1) }))
        );
    }

    #[test]
    fn machine_reports_missing_url() {
        let mut machine = LaunchMachine::new();
        let id = machine.begin(Path::new("/a/package.json"), scanner()).unwrap();
        machine.handle(id, LaunchEvent::Output("Storybook 6.0.0 started\n".into()));
        let effects = machine.handle(id, LaunchEvent::Exited { code: Some(0) });

        assert_eq!(effects.last(), Some(&Effect::Failed(LaunchError::MissingUrl)));
    }

    #[test]
    fn launch_spawns_npm_in_project_directory() {
        let fixture = fixture();
        launch(&fixture).unwrap();

        let requests = fixture.spawner.requests.lock().clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].command_line, "npm run storybook -- --ci");
        assert_eq!(requests[0].working_dir, fixture.project.directory());
        assert_eq!(
            fixture.controller.state().loading_project(),
            Some(fixture.project.manifest_path())
        );
        assert_eq!(fixture.presenter.calls(), vec![Call::State(true)]);
    }

    #[test]
    fn second_launch_is_rejected() {
        let fixture = fixture();
        launch(&fixture).unwrap();

        let error = launch(&fixture).unwrap_err();
        assert!(matches!(error, LaunchError::AlreadyLoading { .. }));
        assert_eq!(fixture.spawner.requests.lock().len(), 1);
        assert_eq!(
            fixture.controller.state().loading_project(),
            Some(fixture.project.manifest_path())
        );
    }

    #[test]
    fn missing_start_script_never_leaves_idle() {
        let fixture = fixture_with(FakeSpawner::default(), r#"{"name":"x","scripts":{"build":"webpack"}}"#);
        let error = launch(&fixture).unwrap_err();

        assert!(matches!(error, LaunchError::NoStartScript { .. }));
        assert_eq!(fixture.controller.state(), LaunchState::Idle);
        assert!(fixture.spawner.requests.lock().is_empty());
    }

    #[test]
    fn spawn_failure_returns_to_idle() {
        let spawner = FakeSpawner {
            fail: true,
            ..FakeSpawner::default()
        };
        let fixture = fixture_with(spawner, r#"{"name":"x","scripts":{"sb":"start-storybook"}}"#);

        let error = launch(&fixture).unwrap_err();
        assert!(matches!(error, LaunchError::ProcessSpawn(_)));
        assert_eq!(fixture.controller.state(), LaunchState::Idle);
        assert!(launch(&fixture).is_err());
    }

    #[test]
    fn closing_preview_restores_main_and_terminates() {
        let fixture = fixture();
        let id = launch(&fixture).unwrap();
        fixture.controller.dispatch(
            id,
            LaunchEvent::Output("Storybook 6.0.0 started\nLocal: http://localhost:6006/\n".into()),
        );
        fixture.controller.dispatch(id, LaunchEvent::SurfaceClosed);

        assert_eq!(
            fixture.presenter.calls(),
            vec![
                Call::State(true),
                Call::Show(id, "http://localhost:6006/".into()),
                Call::Restore,
                Call::State(false),
            ]
        );
        assert_eq!(*fixture.spawner.terminated.lock(), 1);
        assert_eq!(fixture.controller.state(), LaunchState::Idle);

        // The child's exit arrives after the close and is ignored.
        fixture.controller.dispatch(id, LaunchEvent::Exited { code: None });
        assert_eq!(fixture.presenter.calls().len(), 4);
    }

    #[test]
    fn crash_before_ready_allows_retry() {
        let fixture = fixture();
        let id = launch(&fixture).unwrap();
        fixture.controller.dispatch(id, LaunchEvent::Exited { code: Some(1) });

        assert!(fixture
            .presenter
            .calls()
            .contains(&Call::Failed(LaunchError::ProcessExited { code: Some(1) })));
        assert_eq!(fixture.controller.state(), LaunchState::Idle);

        let retry = launch(&fixture).unwrap();
        assert!(retry > id);
    }

    #[test]
    fn stop_cancels_current_launch() {
        let fixture = fixture();
        let id = launch(&fixture).unwrap();

        assert!(fixture.controller.stop());
        assert!(!fixture.controller.stop());
        assert_eq!(*fixture.spawner.terminated.lock(), 1);
        assert!(fixture.presenter.calls().contains(&Call::Close(id)));
    }

    #[test]
    fn surface_failure_tears_down_and_allows_retry() {
        let fixture = fixture();
        let id = launch(&fixture).unwrap();
        fixture.controller.dispatch(
            id,
            LaunchEvent::Output("Storybook 6.0.0 started\nLocal: http://localhost:6006/\n".into()),
        );
        let error = LaunchError::Surface("webview unavailable".into());
        fixture.controller.dispatch(id, LaunchEvent::Failed(error.clone()));

        assert_eq!(fixture.controller.state(), LaunchState::Idle);
        assert_eq!(*fixture.spawner.terminated.lock(), 1);
        assert_eq!(
            fixture.presenter.calls(),
            vec![
                Call::State(true),
                Call::Show(id, "http://localhost:6006/".into()),
                Call::Close(id),
                Call::Restore,
                Call::Failed(error),
                Call::State(false),
            ]
        );

        let retry = launch(&fixture).unwrap();
        assert!(retry > id);
        assert_eq!(fixture.spawner.requests.lock().len(), 2);
    }

    #[test]
    fn stop_after_preview_closes_it() {
        let fixture = fixture();
        let id = launch(&fixture).unwrap();
        fixture.controller.dispatch(
            id,
            LaunchEvent::Output("Storybook 6.0.0 started\nLocal: http://localhost:6006/\n".into()),
        );

        assert!(fixture.controller.stop());
        assert_eq!(*fixture.spawner.terminated.lock(), 1);
        assert_eq!(
            fixture.presenter.calls(),
            vec![
                Call::State(true),
                Call::Show(id, "http://localhost:6006/".into()),
                Call::Close(id),
                Call::Restore,
                Call::State(false),
            ]
        );
    }

    #[test]
    fn unsafe_script_name_never_leaves_idle() {
        let fixture = fixture_with(
            FakeSpawner::default(),
            r#"{"name":"x","scripts":{"sb %PATH%":"start-storybook"}}"#,
        );
        let result = launch(&fixture);

        if cfg!(target_os = "windows") {
            assert!(matches!(result, Err(LaunchError::UnsafeScriptName { .. })));
            assert_eq!(fixture.controller.state(), LaunchState::Idle);
        } else {
            result.unwrap();
            let requests = fixture.spawner.requests.lock().clone();
            assert_eq!(requests[0].command_line, "npm run 'sb %PATH%' -- --ci");
        }
    }

    #[test]
    fn shutdown_terminates_running_child() {
        let fixture = fixture();
        launch(&fixture).unwrap();
        fixture.controller.shutdown();
        assert_eq!(*fixture.spawner.terminated.lock(), 1);
    }

    #[test]
    fn loading_state_serializes_for_the_ui() {
        let mut machine = LaunchMachine::new();
        machine.begin(Path::new("/a/package.json"), scanner()).unwrap();
        let value = serde_json::to_value(machine.state()).unwrap();

        assert_eq!(value["status"], "loading");
        assert_eq!(value["project"], "/a/package.json");
        assert!(value["startedAt"].is_string());
        assert_eq!(serde_json::to_value(LaunchState::Idle).unwrap()["status"], "idle");
    }
}
