use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub(crate) const SCHEDULE_DAILY_6AM: &str = "daily_6am";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    Done,
}

/// The persisted task schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: u32,
    pub text: String,
    pub created_at: String,
    pub start_date: String,
    pub status: TaskStatus,
    pub schedule: String,
    pub last_reminded_date: Option<String>,
}

/// Top-level tasks.json structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub next_id: u32,
    pub tasks: Vec<Task>,
}

impl Default for TaskState {
    fn default() -> Self {
        Self {
            next_id: 1,
            tasks: Vec::new(),
        }
    }
}

/// Persists tasks in a single JSON file, written atomically.
pub struct TaskStore {
    path: PathBuf,
}

impl TaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<TaskState> {
        let data = match fs::read(&self.path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(TaskState::default()),
            Err(e) => return Err(e).context("read tasks file"),
            Ok(data) => data,
        };
        if data.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(TaskState::default());
        }

        let state: TaskState = serde_json::from_slice(&data).context("parse tasks file")?;
        Ok(normalize(state))
    }

    pub fn save(&self, state: TaskState) -> Result<()> {
        let state = normalize(state);

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).context("create tasks dir")?;
            fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
                .context("chmod tasks dir")?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(&state).context("encode tasks file")?;

        let mut file = fs::File::create(&tmp).context("open temp tasks file")?;
        let written = file
            .write_all(&data)
            .and_then(|()| file.sync_all())
            .context("write temp tasks file");
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        drop(file);

        fs::rename(&tmp, &self.path).context("rename temp tasks file")?;
        fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))
            .context("chmod tasks file")?;
        Ok(())
    }
}

fn normalize(mut state: TaskState) -> TaskState {
    if state.next_id < 1 {
        state.next_id = next_id_from_tasks(&state.tasks);
    }
    state
}

pub(crate) fn next_id_from_tasks(tasks: &[Task]) -> u32 {
    tasks.iter().map(|t| t.id + 1).max().unwrap_or(1).max(1)
}
