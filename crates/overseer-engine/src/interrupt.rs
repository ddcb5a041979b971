//! Interruptible wait between rounds.
//!
//! Console input is read by a dedicated thread so that a pending blocking
//! read never holds up the runtime. Ctrl-C is watched by a single task for
//! the whole run, and both sources feed the same channel, so a request made
//! while a round is running is seen once the round completes.

use std::io::BufRead;
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// How a wait between rounds ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    Elapsed,
    Interrupted,
}

/// Waits for the next round unless the user presses return or Ctrl-C.
pub struct ConsoleInterrupt {
    input: mpsc::UnboundedReceiver<()>,
}

impl ConsoleInterrupt {
    /// Start listening on standard input and for Ctrl-C.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let signal_tx = tx.clone();
        tokio::spawn(async move {
            loop {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        if signal_tx.send(()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Unable to listen for Ctrl-C");
                        break;
                    }
                }
            }
        });

        let spawned = thread::Builder::new()
            .name("console-input".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    if line.is_err() || tx.send(()).is_err() {
                        break;
                    }
                }
                debug!("Console input closed");
            });
        if let Err(e) = spawned {
            debug!(error = %e, "Could not start console listener");
        }
        Self::from_channel(rx)
    }

    /// Use an existing input channel as the only interrupt source.
    pub fn from_channel(input: mpsc::UnboundedReceiver<()>) -> Self {
        Self { input }
    }

    /// Consume an interrupt request made since the last check, if any.
    pub fn interrupted(&mut self) -> bool {
        self.input.try_recv().is_ok()
    }

    /// Sleep for `duration` or until interrupted.
    pub async fn sleep(&mut self, duration: Duration) -> SleepOutcome {
        tokio::select! {
            _ = tokio::time::sleep(duration) => SleepOutcome::Elapsed,
            Some(()) = self.input.recv() => SleepOutcome::Interrupted,
        }
    }
}
