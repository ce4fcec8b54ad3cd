use super::service::TaskService;
use super::store::{Task, DATE_FORMAT};
use crate::traits::Notifier;
use crate::types::Notification;
use anyhow::{Context, Result};
use chrono::{DateTime, Local, Timelike, Utc};
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const SIX_AM_SECS: i64 = 6 * 3600;

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Drives the daily 06:00 (local time) task reminder.
pub struct Scheduler {
    service: Arc<TaskService>,
    notifier: Arc<dyn Notifier>,
    now: Clock,
}

impl Scheduler {
    pub fn new(service: Arc<TaskService>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            service,
            notifier,
            now: Arc::new(Utc::now),
        }
    }

    /// Sleeps until the next 06:00 tick, fires the reminder, repeats. Returns
    /// when the shutdown signal changes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let wait = duration_until_next_six_am((self.now)());
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(wait) => {}
            }

            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "tasks reminder tick failed");
            }
        }
    }

    async fn tick(&self) -> Result<()> {
        let today = (self.now)()
            .with_timezone(&Local)
            .format(DATE_FORMAT)
            .to_string();
        let due = self
            .service
            .prepare_daily_reminder(&today)
            .context("select due tasks")?;
        if due.is_empty() {
            return Ok(());
        }

        let n = Notification {
            id: uuid::Uuid::new_v4().to_string(),
            text: format_reminder_message(&today, &due),
            source: "tasks".to_string(),
            created_at: Utc::now(),
        };
        tokio::time::timeout(SEND_TIMEOUT, self.notifier.send(n))
            .await
            .context("send reminder timed out")?
            .context("send reminder")?;
        Ok(())
    }
}

fn duration_until_next_six_am(now: DateTime<Utc>) -> Duration {
    let local = now.with_timezone(&Local);
    let elapsed_today = i64::from(local.num_seconds_from_midnight());
    let mut wait = SIX_AM_SECS - elapsed_today;
    if wait <= 0 {
        wait += 24 * 3600;
    }
    Duration::from_secs(wait as u64)
}

/// Renders the reminder sent to the chat, tasks sorted by id.
pub fn format_reminder_message(today: &str, due: &[Task]) -> String {
    let mut tasks = due.to_vec();
    tasks.sort_by_key(|t| t.id);

    let mut out = String::new();
    let _ = writeln!(out, "Tasks for {today}");
    for task in &tasks {
        let _ = writeln!(out, "{}: {}", task.id, task.text);
    }
    out.push_str("Reply /done <id> when finished");
    out
}
