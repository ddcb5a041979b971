//! Overseer entry point: prepares the work area and the task collection, then
//! either applies a one-shot action or runs the scheduling loop.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use overseer_core::{Action, CoreError, TaskDefinition, TaskName, TaskSelection};

use crate::actions::ActionDispatcher;
use crate::collection::{TaskCollection, TaskFactory};
use crate::command_task::CommandTaskFactory;
use crate::config::Config;
use crate::credentials::{check_prerequisites, VomsProxy};
use crate::detector::StuckWorkDetector;
use crate::error::Result;
use crate::executor::{LawExecutor, LocalBatch};
use crate::interrupt::ConsoleInterrupt;
use crate::lifecycle::LifecycleDriver;
use crate::publisher::{GfalCopy, StatusPublisher};
use crate::scheduler::{LoopSummary, SchedulingLoop};
use crate::store::WorkArea;

/// Key of the list-wide defaults in a task list file.
const DEFAULTS_KEY: &str = "config";

/// Options of one overseer run.
#[derive(Debug, Clone, Default)]
pub struct OverseerOptions {
    pub work_area: PathBuf,
    /// Configuration copied into the work area before loading.
    pub cfg: Option<PathBuf>,
    /// Task list files with new task definitions.
    pub task_files: Vec<PathBuf>,
    pub no_status_update: bool,
    /// Update the configuration of tasks that already exist.
    pub update_cfg: bool,
    pub no_loop: bool,
    pub selection: Option<TaskSelection>,
    pub action: Option<Action>,
}

/// Parse a task list file: a YAML mapping of task names to parameters, with
/// optional defaults under `config`.
pub fn parse_task_list(content: &str) -> Result<Vec<TaskDefinition>> {
    let document: serde_yaml::Value = serde_yaml::from_str(content)?;
    let entries = match document {
        serde_yaml::Value::Mapping(entries) => entries,
        serde_yaml::Value::Null => return Ok(Vec::new()),
        _ => {
            return Err(CoreError::InvalidInput(
                "task list must be a mapping of task names to definitions".to_string(),
            )
            .into())
        }
    };

    let mut defaults = serde_json::Map::new();
    let mut tasks = Vec::new();
    for (key, value) in &entries {
        let name = key.as_str().ok_or_else(|| {
            CoreError::InvalidInput(format!("task name must be a string, got {key:?}"))
        })?;
        let params = match serde_json::to_value(value)? {
            serde_json::Value::Object(params) => params,
            serde_json::Value::Null => serde_json::Map::new(),
            _ => {
                return Err(CoreError::InvalidInput(format!(
                    "definition of '{name}' must be a mapping"
                ))
                .into())
            }
        };
        if name == DEFAULTS_KEY {
            defaults = params;
        } else {
            tasks.push((TaskName::from(name), params));
        }
    }

    Ok(tasks
        .into_iter()
        .map(|(name, params)| TaskDefinition::merged(name, &defaults, &params))
        .collect())
}

/// Add new tasks to the collection; update existing ones only if asked to.
pub async fn apply_task_definitions(
    tasks: &mut TaskCollection,
    factory: &dyn TaskFactory,
    definitions: &[TaskDefinition],
    update_cfg: bool,
) -> Result<()> {
    for definition in definitions {
        match tasks.get_mut(&definition.name) {
            Some(task) if update_cfg => {
                task.update_config(definition)?;
                task.save_cfg().await?;
                info!(task = %definition.name, "Updated task configuration");
            }
            Some(_) => {
                debug!(task = %definition.name, "Task already exists, keeping its configuration");
            }
            None => {
                let task = factory.create(definition).await?;
                tasks.insert(task)?;
            }
        }
    }
    Ok(())
}

async fn load_task_files(
    tasks: &mut TaskCollection,
    factory: &dyn TaskFactory,
    files: &[PathBuf],
    update_cfg: bool,
) -> Result<()> {
    for file in files {
        let content = fs::read_to_string(file)?;
        let definitions = parse_task_list(&content)?;
        info!(file = %file.display(), tasks = definitions.len(), "Read task list");
        apply_task_definitions(tasks, factory, &definitions, update_cfg).await?;
    }
    Ok(())
}

/// Prepare the work area and return its configuration.
fn prepare_work_area(work_area: &Path, cfg: Option<&Path>) -> Result<(WorkArea, Config)> {
    let area = WorkArea::open(work_area)?;
    if let Some(cfg) = cfg {
        area.install_config(cfg)?;
    }
    let config = Config::load(&area.cfg_path())?;
    Ok((area, config))
}

/// Run the overseer. Returns the loop summary, or `None` after an action.
pub async fn run(options: OverseerOptions) -> Result<Option<LoopSummary>> {
    let (area, config) = prepare_work_area(&options.work_area, options.cfg.as_deref())?;

    let law_home = env::var("LAW_HOME").ok();
    let proxy = check_prerequisites(
        &config,
        &VomsProxy::new(config.commands.voms_proxy_info.clone()),
        law_home.as_deref(),
    )
    .await?;

    let factory = CommandTaskFactory::new(area.clone(), config.backend.clone());
    let names = area.load_task_names()?;
    let mut tasks = TaskCollection::load(&factory, &names).await?;
    if !options.task_files.is_empty() {
        load_task_files(&mut tasks, &factory, &options.task_files, options.update_cfg).await?;
        area.save_task_names(&tasks.names())?;
    }

    let selection = options.selection.unwrap_or(TaskSelection::All);
    if let Some(action) = options.action {
        ActionDispatcher::new(&area)
            .apply(action, &mut tasks, &selection)
            .await?;
        return Ok(None);
    }

    tasks.retain(|task| selection.matches(task));
    for task in tasks.iter() {
        task.check_configuration_validity()?;
    }

    let driver = LifecycleDriver::new(
        StuckWorkDetector::new(config.stuck_threshold_hours),
        config.summary_only_threshold,
    )
    .with_no_status_update(options.no_status_update);
    let publisher = StatusPublisher::new(
        area.clone(),
        config.report_destination()?,
        config.html_assets_dir.clone(),
        Box::new(GfalCopy::new(config.commands.copy.clone(), proxy.path.clone())),
    );
    let batch = LocalBatch::new(config.local_processing()?, &area);
    let kinit = config
        .renew_kerberos_ticket
        .then(|| config.commands.kinit.clone());

    let mut scheduler = SchedulingLoop::new(
        driver,
        publisher,
        Box::new(LawExecutor::new(config.commands.law.clone())),
        batch,
        config.update_interval,
    )
    .with_no_loop(options.no_loop)
    .with_kerberos_renewal(kinit);

    info!(tasks = tasks.len(), work_area = %area.root().display(), "Starting overseer loop");
    let mut interrupt = ConsoleInterrupt::spawn();
    let summary = scheduler.run(&mut tasks, &mut interrupt).await?;
    Ok(Some(summary))
}
