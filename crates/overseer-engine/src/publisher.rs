//! Status publication: `status.json` in the work area and, optionally, an
//! HTML report on remote storage.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{OverseerError, Result};
use crate::process::run_captured;
use crate::stats::AggregatedStatus;
use crate::store::WorkArea;

/// Static files of the HTML status viewer.
pub const VIEWER_ASSETS: [&str; 5] = [
    "index.html",
    "jquery.min.js",
    "jsgrid.css",
    "jsgrid.min.js",
    "jsgrid-theme.css",
];

/// Copies a local file to a remote destination, overwriting it.
#[async_trait]
pub trait RemoteCopy: Send + Sync {
    async fn copy(&self, file: &Path, dest: &str) -> Result<()>;
}

/// `gfal-copy` based remote copy.
#[derive(Debug, Clone)]
pub struct GfalCopy {
    program: String,
    proxy: Option<PathBuf>,
}

impl GfalCopy {
    pub fn new(program: impl Into<String>, proxy: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            proxy,
        }
    }
}

#[async_trait]
impl RemoteCopy for GfalCopy {
    async fn copy(&self, file: &Path, dest: &str) -> Result<()> {
        let mut args = vec!["-f".to_string()];
        if let Some(proxy) = &self.proxy {
            args.push("--cert".to_string());
            args.push(proxy.display().to_string());
        }
        args.push(file.display().to_string());
        args.push(dest.to_string());

        run_captured(&self.program, &args)
            .await
            .map_err(|e| OverseerError::Publication {
                file: file.to_path_buf(),
                dest: dest.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

/// Writes the status snapshot after every round and mirrors it to the report
/// destination.
pub struct StatusPublisher {
    area: WorkArea,
    destination: Option<String>,
    assets_dir: PathBuf,
    copier: Box<dyn RemoteCopy>,
    assets_published: bool,
}

impl StatusPublisher {
    /// Create a publisher. Without a destination only `status.json` is written.
    pub fn new(
        area: WorkArea,
        destination: Option<String>,
        assets_dir: PathBuf,
        copier: Box<dyn RemoteCopy>,
    ) -> Self {
        Self {
            area,
            destination,
            assets_dir,
            copier,
            assets_published: false,
        }
    }

    /// Persist the snapshot and copy it to the report destination.
    pub async fn publish(&mut self, status: &AggregatedStatus) -> Result<PathBuf> {
        let status_path = self.area.save_status(status)?;
        debug!(path = %status_path.display(), "Saved status snapshot");

        let Some(dest) = self.destination.as_deref() else {
            return Ok(status_path);
        };

        let mut files = vec![status_path.clone()];
        if !self.assets_published {
            files.extend(VIEWER_ASSETS.iter().map(|f| self.assets_dir.join(f)));
        }
        for file in &files {
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let target = format!("{}/{}", dest.trim_end_matches('/'), file_name);
            self.copier.copy(file, &target).await?;
        }

        info!(destination = dest, files = files.len(), "Published status report");
        println!("HTML report is updated in {dest}.");
        self.assets_published = true;
        Ok(status_path)
    }
}
