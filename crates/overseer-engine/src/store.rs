//! Persisted work-area layout.
//!
//! ```text
//! <work area>/
//!   cfg.yaml          overseer configuration
//!   tasks.json        ordered list of task names
//!   status.json       last published status snapshot
//!   tasks/<name>/     per-task state
//!   law/jobs, law/logs  local executor bookkeeping
//! ```
//!
//! Every file the overseer rewrites goes through [`write_atomic`], so a crash
//! mid-round leaves the previous valid version in place.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use overseer_core::TaskName;

use crate::error::Result;

/// Write `contents` to `path` through a temporary file in the same directory
/// followed by a rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Serialize `value` as indented JSON and write it atomically.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &json)?;
    Ok(())
}

/// Remove a file if it exists. Returns true if a file was removed.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// The overseer work area.
#[derive(Debug, Clone)]
pub struct WorkArea {
    root: PathBuf,
}

impl WorkArea {
    /// Open a work area, creating the directory if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        let root = fs::canonicalize(root)?;
        debug!(work_area = %root.display(), "Opened work area");
        Ok(Self { root })
    }

    /// Absolute path of the work area.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cfg_path(&self) -> PathBuf {
        self.root.join("cfg.yaml")
    }

    pub fn task_list_path(&self) -> PathBuf {
        self.root.join("tasks.json")
    }

    pub fn status_path(&self) -> PathBuf {
        self.root.join("status.json")
    }

    /// Directory holding the state of one task.
    pub fn task_dir(&self, name: &TaskName) -> PathBuf {
        self.root.join("tasks").join(name.as_str())
    }

    pub fn law_jobs_dir(&self) -> PathBuf {
        self.root.join("law").join("jobs")
    }

    pub fn law_logs_dir(&self) -> PathBuf {
        self.root.join("law").join("logs")
    }

    /// Copy an overseer configuration file into the work area.
    pub fn install_config(&self, source: &Path) -> Result<()> {
        let contents = fs::read(source)?;
        write_atomic(&self.cfg_path(), &contents)?;
        Ok(())
    }

    /// Load the persisted task names. A missing list means no tasks.
    pub fn load_task_names(&self) -> Result<Vec<TaskName>> {
        let path = self.task_list_path();
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)?;
        let names: Vec<TaskName> = serde_json::from_str(&content)?;

        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(names.len());
        for name in names {
            if seen.insert(name.clone()) {
                unique.push(name);
            } else {
                warn!(task = %name, "Duplicate task name in task list, ignoring");
            }
        }
        Ok(unique)
    }

    /// Persist the task names, replacing the previous list.
    pub fn save_task_names(&self, names: &[TaskName]) -> Result<()> {
        write_json_atomic(&self.task_list_path(), names)
    }

    /// Persist the status snapshot and return its path.
    pub fn save_status<T: Serialize>(&self, status: &T) -> Result<PathBuf> {
        let path = self.status_path();
        write_json_atomic(&path, status)?;
        Ok(path)
    }
}
