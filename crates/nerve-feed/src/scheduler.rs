//! Fixed-period cycle scheduler
//!
//! The first cycle runs before [`Scheduler::start`] returns, so callers can
//! wait for a populated cache before serving. Later cycles run after a fixed
//! sleep, each in its own task, so a failing or panicking cycle is logged and
//! the schedule carries on.

use crate::orchestrator::{CycleReport, CycleRunner};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Starts the periodic scrape loop
pub struct Scheduler;

impl Scheduler {
    /// Run one cycle now, then keep running every `period` until stopped
    pub async fn start(runner: Arc<dyn CycleRunner>, period: Duration) -> SchedulerHandle {
        let initial = run_isolated(&runner).await;
        let (stop_tx, mut stop_rx) = watch::channel(false);

        info!(period_secs = period.as_secs_f64(), "Scheduler started");

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    _ = stop_rx.changed() => break,
                }

                run_isolated(&runner).await;

                if *stop_rx.borrow() {
                    break;
                }
            }
            debug!("Scheduler loop exited");
        });

        SchedulerHandle {
            stop_tx,
            task,
            initial,
        }
    }
}

/// Handle to a running scheduler
pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    initial: Option<CycleReport>,
}

impl SchedulerHandle {
    /// Report of the initial cycle, if it succeeded
    pub fn initial_report(&self) -> Option<&CycleReport> {
        self.initial.as_ref()
    }

    /// Cancel the pending sleep and wait for any in-flight cycle to finish
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Scheduler task ended abnormally");
        }
        info!("Scheduler stopped");
    }
}

async fn run_isolated(runner: &Arc<dyn CycleRunner>) -> Option<CycleReport> {
    let runner = runner.clone();
    match tokio::spawn(async move { runner.run_cycle().await }).await {
        Ok(Ok(report)) => Some(report),
        Ok(Err(e)) => {
            error!(error = %e, "Scrape cycle failed");
            None
        }
        Err(e) => {
            error!(error = %e, "Scrape cycle panicked");
            None
        }
    }
}
