//! Overseer configuration.
//!
//! The configuration lives in `cfg.yaml` inside the work area. Keys are
//! camelCase; everything except `localProcessing` has a default.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{OverseerError, Result};

/// Overseer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Minutes between the starts of two consecutive rounds.
    pub update_interval: u64,

    /// Destination of the HTML status report. `SITE:/lfn` destinations are
    /// resolved through `sites`.
    pub html_report: Option<String>,

    /// Directory with the static viewer assets of the HTML report.
    pub html_assets_dir: PathBuf,

    /// Renew the Kerberos ticket after each sleep.
    pub renew_kerberos_ticket: bool,

    /// Local batch processing settings.
    pub local_processing: Option<LocalProcessingConfig>,

    /// Hours without progress after which a task is considered stuck.
    pub stuck_threshold_hours: f64,

    /// Above this many in-progress tasks the report only shows summaries.
    pub summary_only_threshold: usize,

    /// Storage site name to PFN prefix.
    pub sites: BTreeMap<String, String>,

    /// Remote submission backend used by command-backed tasks.
    pub backend: BackendConfig,

    /// External executables.
    pub commands: CommandsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            update_interval: 60,
            html_report: None,
            html_assets_dir: PathBuf::from("html"),
            renew_kerberos_ticket: false,
            local_processing: None,
            stuck_threshold_hours: 24.0,
            summary_only_threshold: 10,
            sites: BTreeMap::new(),
            backend: BackendConfig::default(),
            commands: CommandsConfig::default(),
        }
    }
}

impl Config {
    /// Load the configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(OverseerError::Config(
                "The overseer configuration is not found".to_string(),
            ));
        }
        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        info!(path = %path.display(), "Loaded overseer configuration");
        Ok(config)
    }

    /// Resolve the HTML report destination, if one is configured.
    pub fn report_destination(&self) -> Result<Option<String>> {
        let dest = match self.html_report.as_deref().map(str::trim) {
            Some(dest) if !dest.is_empty() => dest,
            _ => return Ok(None),
        };

        if dest.starts_with('T') {
            if let Some((site, lfn)) = dest.split_once(':') {
                let prefix = self.sites.get(site).ok_or_else(|| {
                    OverseerError::Config(format!("No PFN prefix known for site '{site}'"))
                })?;
                return Ok(Some(format!("{}{}", prefix.trim_end_matches('/'), lfn)));
            }
        }
        Ok(Some(dest.to_string()))
    }

    /// Local processing settings, required to run the overseer.
    pub fn local_processing(&self) -> Result<&LocalProcessingConfig> {
        self.local_processing.as_ref().ok_or_else(|| {
            OverseerError::Precondition(
                "Local processing is not configured. It is needed to run the local processing step."
                    .to_string(),
            )
        })
    }
}

/// Settings of the local batch executor.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalProcessingConfig {
    /// Task run by the workflow executor.
    pub law_task: String,

    /// Workflow type of the executor (e.g. `htcondor`, `local`).
    pub workflow: String,

    /// Bootstrap script sourced by every local job.
    pub bootstrap: String,

    /// Number of CPUs per local job.
    #[serde(rename = "nCPU", default = "default_n_cpu")]
    pub n_cpu: u32,

    /// Runtime cap of a local job, in hours.
    #[serde(default = "default_max_runtime")]
    pub max_runtime: f64,

    /// Additional scheduler requirements.
    #[serde(default)]
    pub requirements: Option<String>,
}

fn default_n_cpu() -> u32 {
    1
}

fn default_max_runtime() -> f64 {
    24.0
}

/// Settings of the command-backed remote submission backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackendConfig {
    /// Backend executable.
    pub command: String,

    /// Recovery attempts before a task is declared failed.
    pub max_recovery_count: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: "grid-task-backend".to_string(),
            max_recovery_count: 10,
        }
    }
}

/// External executables used by the overseer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CommandsConfig {
    pub voms_proxy_info: String,
    pub copy: String,
    pub kinit: String,
    pub law: String,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            voms_proxy_info: "voms-proxy-info".to_string(),
            copy: "gfal-copy".to_string(),
            kinit: "kinit".to_string(),
            law: "law".to_string(),
        }
    }
}
