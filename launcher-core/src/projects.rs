use std::{collections::VecDeque, fs, path::{Path, PathBuf}};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::config::app_dir;
use crate::error::{LaunchError, Result};
use crate::manifest::ProjectResolver;

const PROJECTS_JSON: &str = "projects.json";
const DISCOVERY_MAX_DEPTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub name: String,
    /// Absolute path of the project's `package.json`. Unique within the store.
    pub path: String,
    pub location: String,
}

impl ProjectRecord {
    pub fn manifest_path(&self) -> &Path {
        Path::new(&self.path)
    }

    pub fn directory(&self) -> &Path {
        self.manifest_path().parent().unwrap_or_else(|| Path::new("."))
    }
}

pub struct ProjectStore {
    path_json: PathBuf,
    data: RwLock<Vec<ProjectRecord>>,
}

impl ProjectStore {
    pub fn load() -> Self {
        Self::load_from(app_dir().join(PROJECTS_JSON))
    }

    pub fn load_from(path: impl Into<PathBuf>) -> Self {
        let path_json = path.into();
        let data = load_projects(&path_json);
        Self {
            path_json,
            data: RwLock::new(data),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path_json
    }

    pub fn all(&self) -> Vec<ProjectRecord> {
        self.data.read().clone()
    }

    pub fn find(&self, manifest_path: &str) -> Option<ProjectRecord> {
        self.data
            .read()
            .iter()
            .find(|project| project.path == manifest_path)
            .cloned()
    }

    pub fn refresh(&self) -> Vec<ProjectRecord> {
        match read_projects(&self.path_json) {
            Ok(latest) => *self.data.write() = latest,
            Err(error) => log::warn!("Keeping cached projects, unable to reload: {error}"),
        }
        self.all()
    }

    /// Appends `project` unless its path is already tracked. Returns whether
    /// the list changed.
    pub fn add(&self, project: ProjectRecord) -> Result<bool> {
        let mut guard = self.data.write();
        if guard.iter().any(|existing| existing.path == project.path) {
            return Ok(false);
        }

        guard.push(project);
        if let Err(error) = save_projects(&self.path_json, &guard) {
            guard.pop();
            return Err(error);
        }
        Ok(true)
    }

    pub fn remove(&self, manifest_path: &str) -> Result<bool> {
        let mut guard = self.data.write();
        let Some(index) = guard.iter().position(|project| project.path == manifest_path) else {
            return Ok(false);
        };

        let removed = guard.remove(index);
        if let Err(error) = save_projects(&self.path_json, &guard) {
            guard.insert(index, removed);
            return Err(error);
        }
        Ok(true)
    }
}

/// Reads the persisted list; anything unreadable counts as "no projects yet".
pub fn load_projects(path: &Path) -> Vec<ProjectRecord> {
    read_projects(path).unwrap_or_else(|error| {
        log::warn!("Ignoring unreadable project list: {error}");
        Vec::new()
    })
}

fn read_projects(path: &Path) -> Result<Vec<ProjectRecord>> {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).map_err(|error| LaunchError::persistence(path, error)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(error) => Err(LaunchError::persistence(path, error)),
    }
}

/// Replaces the file at `path` with `projects`.
pub fn save_projects(path: &Path, projects: &[ProjectRecord]) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|error| LaunchError::persistence(dir, error))?;
    }

    let json = serde_json::to_string_pretty(projects).map_err(|error| LaunchError::persistence(path, error))?;
    let temp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
    fs::write(&temp_path, json).map_err(|error| LaunchError::persistence(&temp_path, error))?;
    fs::rename(&temp_path, path).map_err(|error| {
        let _ = fs::remove_file(&temp_path);
        LaunchError::persistence(path, error)
    })
}

/// Finds Storybook manifests below `root`, breadth first, up to `limit`.
pub fn discover_projects(root: &Path, resolver: &ProjectResolver, limit: usize) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut queue = VecDeque::new();
    queue.push_back((root.to_path_buf(), 0));

    while let Some((dir, depth)) = queue.pop_front() {
        if depth > DISCOVERY_MAX_DEPTH {
            continue;
        }

        let manifest = dir.join("package.json");
        if manifest.is_file() && resolver.resolve_start_command(&manifest).is_ok() {
            found.push(dunce::canonicalize(&manifest).unwrap_or(manifest));
            if found.len() >= limit {
                break;
            }
        }

        let mut children: Vec<PathBuf> = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir() && !skip_dir(entry.file_name()))
            .map(|entry| entry.into_path())
            .collect();
        children.sort();
        queue.extend(children.into_iter().map(|child| (child, depth + 1)));
    }

    found
}

fn skip_dir(name: &std::ffi::OsStr) -> bool {
    let name = name.to_string_lossy();
    name == "node_modules" || name.starts_with('.')
}
