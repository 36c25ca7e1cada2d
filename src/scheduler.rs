use anyhow::{anyhow, Result};
use chrono::{Duration as DateDelta, Local, NaiveDateTime, NaiveTime};
use std::future::Future;
use tracing::{error, info};

use crate::ai::LlmProvider;
use crate::config::ScheduleConfig;
use crate::pipeline::Pipeline;
use crate::scraper::PageFetcher;

/// A fixed local time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    at: NaiveTime,
}

impl DailySchedule {
    pub fn new(config: ScheduleConfig) -> Result<Self> {
        let at = NaiveTime::from_hms_opt(config.hour, config.minute, 0).ok_or_else(|| {
            anyhow!(
                "Invalid schedule time {:02}:{:02} (hour 0-23, minute 0-59)",
                config.hour,
                config.minute
            )
        })?;
        Ok(Self { at })
    }

    /// First trigger strictly after `now`.
    pub fn next_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        let today = now.date().and_time(self.at);
        if today > now {
            today
        } else {
            today + DateDelta::days(1)
        }
    }
}

/// Runs the pipeline daily until `shutdown` resolves. Cycles run one after
/// another on this task, so they never overlap; a trigger that falls due
/// while a cycle is still running is skipped. Shutdown abandons any pending
/// wait or in-flight cycle, whose uncommitted work is rolled back.
pub async fn run_daily<F, P, S>(
    pipeline: &Pipeline<'_, F, P>,
    schedule: DailySchedule,
    run_now: bool,
    shutdown: S,
) where
    F: PageFetcher,
    P: LlmProvider,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    if run_now {
        tokio::select! {
            _ = run_logged(pipeline) => {}
            _ = &mut shutdown => {
                info!("Shutdown requested");
                return;
            }
        }
    }

    loop {
        let now = Local::now().naive_local();
        let next = schedule.next_after(now);
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next_run = %next, "Scheduler waiting for next run");

        tokio::select! {
            _ = async {
                tokio::time::sleep(wait).await;
                run_logged(pipeline).await;
            } => {}
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
        }
    }
}

async fn run_logged<F: PageFetcher, P: LlmProvider>(pipeline: &Pipeline<'_, F, P>) {
    info!("Starting scraping run");
    match pipeline.run_cycle().await {
        Ok(stats) => info!(
            scraped = stats.scraped,
            upserted = stats.upserted,
            enriched = stats.enriched,
            no_skills = stats.no_skills,
            "Scraping run complete"
        ),
        Err(e) => error!(error = ?e, "Scraping run failed, changes rolled back"),
    }
}
