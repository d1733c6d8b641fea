//! Recurring collection runs using tokio-cron-scheduler.
//!
//! ```text
//! startup ──► (optional) immediate run
//! cron tick ──► Collector::trigger ──► Pipeline::run
//!                    │
//!                    └─ run already in flight? skip this tick
//! SIGINT / SIGTERM ──► stop ticks ──► cancel token ──► wait for in-flight run
//! ```

use chrono_tz::Tz;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::ConfigError;
use crate::models::{RunSummary, SourceItem};
use crate::pipeline::Pipeline;

pub const DEFAULT_CRON: &str = "0 */2 * * *";
pub const DEFAULT_TIMEZONE: &str = "Africa/Dakar";

/// A validated cron expression (with seconds field) and its timezone.
#[derive(Debug, Clone, PartialEq)]
pub struct CronSchedule {
    expression: String,
    timezone: Tz,
}

impl CronSchedule {
    pub fn parse(expression: &str, timezone: &str) -> Result<Self, ConfigError> {
        let expression = normalize_cron(expression)?;
        let timezone: Tz = timezone
            .trim()
            .parse()
            .map_err(|_| ConfigError::Timezone(timezone.to_string()))?;

        // Building a job is what parses the expression.
        Job::new_async_tz(expression.as_str(), timezone, |_uuid, _lock| Box::pin(async {}))
            .map_err(|e| ConfigError::Schedule {
                expression: expression.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            expression,
            timezone,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }
}

/// Five-field expressions get a leading `0` seconds field. Six and seven
/// fields are kept as written.
pub fn normalize_cron(expression: &str) -> Result<String, ConfigError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {}", fields.join(" "))),
        6 | 7 => Ok(fields.join(" ")),
        n => Err(ConfigError::Schedule {
            expression: expression.to_string(),
            reason: format!("expected 5, 6 or 7 fields, found {n}"),
        }),
    }
}

/// At most one run at a time.
#[derive(Debug, Clone, Default)]
pub struct RunGuard(Arc<Mutex<()>>);

impl RunGuard {
    /// `None` while another run holds the guard.
    pub fn try_begin(&self) -> Option<OwnedMutexGuard<()>> {
        Arc::clone(&self.0).try_lock_owned().ok()
    }

    /// Resolve once no run is in flight.
    pub async fn wait_idle(&self) {
        let _idle = self.0.lock().await;
    }
}

/// The pipeline plus its input list, shared by every trigger.
pub struct Collector {
    pipeline: Arc<Pipeline>,
    items: Arc<Vec<SourceItem>>,
    guard: RunGuard,
    cancel: CancellationToken,
}

impl Collector {
    pub fn new(pipeline: Arc<Pipeline>, items: Vec<SourceItem>, cancel: CancellationToken) -> Self {
        Self {
            pipeline,
            items: Arc::new(items),
            guard: RunGuard::default(),
            cancel,
        }
    }

    /// Start a run unless one is already in flight or shutdown began.
    pub async fn trigger(&self, reason: &'static str) -> Option<RunSummary> {
        let Some(_running) = self.guard.try_begin() else {
            warn!(reason, action = "run_skipped", "Previous run still in progress; skipping this trigger");
            return None;
        };
        if self.cancel.is_cancelled() {
            return None;
        }
        info!(reason, items = self.items.len(), action = "run_triggered", "Collection triggered");
        Some(self.pipeline.run(&self.items, &self.cancel).await)
    }

    /// Stop at the next item boundary and wait for the in-flight run.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.guard.wait_idle().await;
    }
}

/// Run the collector on `schedule` until SIGINT or SIGTERM.
pub async fn run_scheduled(
    collector: Arc<Collector>,
    schedule: &CronSchedule,
    run_on_startup: bool,
) -> Result<(), Box<dyn Error>> {
    let mut scheduler = JobScheduler::new().await?;

    let job_collector = Arc::clone(&collector);
    let job = Job::new_async_tz(schedule.expression(), schedule.timezone(), move |_uuid, _lock| {
        let collector = Arc::clone(&job_collector);
        Box::pin(async move {
            collector.trigger("schedule").await;
        })
    })?;
    scheduler.add(job).await?;
    scheduler.start().await?;

    info!(
        schedule = %schedule.expression(),
        timezone = %schedule.timezone(),
        run_on_startup,
        action = "scheduler_started",
        "Scheduler started"
    );

    let startup = run_on_startup.then(|| {
        let collector = Arc::clone(&collector);
        tokio::spawn(async move {
            collector.trigger("startup").await;
        })
    });

    shutdown_signal().await;
    info!(action = "scheduler_stopping", "Shutdown signal received; stopping scheduler");

    if let Err(e) = scheduler.shutdown().await {
        warn!(error = %e, "Scheduler shutdown reported an error");
    }
    collector.stop().await;
    if let Some(handle) = startup {
        if let Err(e) = handle.await {
            error!(error = %e, "Startup run task failed");
        }
    }

    info!(action = "scheduler_stopped", "Scheduler stopped");
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
