use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use cron::Schedule;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{RotationJob, TickOutcome};

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid schedule {expr:?}: {reason}")]
    Invalid { expr: String, reason: String },
}

/// Every eight hours, at the minute the process started.
pub fn default_schedule(minute: u32) -> String {
    format!("{minute} */8 * * *")
}

/// Accepts classic five-field expressions (seconds implied 0) as well as the
/// six and seven-field forms understood by `cron`.
pub fn parse_schedule(expr: &str) -> Result<Schedule, ScheduleError> {
    let normalized = match expr.split_whitespace().count() {
        5 => format!("0 {}", expr.trim()),
        _ => expr.trim().to_string(),
    };
    Schedule::from_str(&normalized).map_err(|e| ScheduleError::Invalid {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// Fires `job` at every upcoming instant of `schedule` until `shutdown` is
/// cancelled. Ticks never overlap.
pub async fn run_schedule(job: Arc<RotationJob>, schedule: Schedule, shutdown: CancellationToken) {
    loop {
        let Some(next) = schedule.upcoming(Local).next() else {
            warn!("schedule has no upcoming fire time, rotation stopped");
            return;
        };
        let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
        info!("next credential rotation at {next}");

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("credential rotation stopped");
                return;
            }
            _ = sleep(wait) => {}
        }

        match job.tick().await {
            Ok(TickOutcome::Rotated) => info!("credential rotation succeeded"),
            Ok(TickOutcome::Skipped(reason)) => info!("credential rotation skipped: {reason:?}"),
            Err(e) => error!("credential rotation failed: {e}"),
        }
    }
}
