//! Grid Task Overseer Engine
//!
//! Drives a collection of remote grid tasks through their lifecycle: one
//! round advances every task by one step, kills stuck tasks, aggregates a
//! status report and hands remaining work to a local batch executor.

pub mod actions;
pub mod collection;
pub mod command_task;
pub mod config;
pub mod credentials;
pub mod detector;
pub mod error;
pub mod executor;
pub mod interrupt;
pub mod lifecycle;
pub mod overseer;
pub mod process;
pub mod publisher;
pub mod scheduler;
pub mod stats;
pub mod store;

#[cfg(test)]
mod testing;

pub use actions::ActionDispatcher;
pub use collection::{TaskCollection, TaskFactory};
pub use command_task::{CommandTask, CommandTaskFactory};
pub use config::Config;
pub use credentials::{CredentialProvider, ProxyInfo, VomsProxy};
pub use detector::{StuckReason, StuckWorkDetector};
pub use error::{OverseerError, Result};
pub use executor::{LawExecutor, LocalBatch, LocalExecutor};
pub use interrupt::{ConsoleInterrupt, SleepOutcome};
pub use lifecycle::{LifecycleDriver, RoundOutcome};
pub use overseer::{run, OverseerOptions};
pub use publisher::{GfalCopy, RemoteCopy, StatusPublisher};
pub use scheduler::{LoopState, LoopSummary, SchedulingLoop};
pub use stats::{AggregatedStatus, StatusAggregator};
pub use store::WorkArea;
