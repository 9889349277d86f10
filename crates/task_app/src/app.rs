use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::info;

use task_core::storage::JsonFileStore;
use task_core::TaskService;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub data_path: PathBuf,
    pub horizon_days: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("taskdeck.json"),
            horizon_days: 7,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("TASKDECK_DATA") {
            config.data_path = PathBuf::from(path);
        }
        if let Ok(days) = std::env::var("TASKDECK_HORIZON_DAYS") {
            if let Ok(value) = days.trim().parse::<i64>() {
                if value > 0 {
                    config.horizon_days = value;
                }
            }
        }
        Ok(config)
    }
}

/// Prints the pending agenda for the configured horizon and the net score.
pub fn run(config: AppConfig) -> Result<()> {
    info!(path = %config.data_path.display(), "opening task store");
    let service = TaskService::builder(Box::new(JsonFileStore::new(&config.data_path)))
        .build()
        .with_context(|| format!("open task store at {}", config.data_path.display()))?;

    let agenda = service.pending_within_days(config.horizon_days);
    if agenda.is_empty() {
        println!("Nothing pending in the next {} days.", config.horizon_days);
    } else {
        let mut current_day: Option<NaiveDate> = None;
        for task in &agenda {
            if current_day != Some(task.due_date) {
                println!("\n{}", task.due_date.format("%A %Y-%m-%d"));
                current_day = Some(task.due_date);
            }
            let time = task
                .due_time
                .map(|time| format!(" {}", time.format("%H:%M")))
                .unwrap_or_default();
            let postponed = if task.postpone_count > 0 {
                format!("  (postponed x{})", task.postpone_count)
            } else {
                String::new()
            };
            println!("  -{time} {}{postponed}", task.title);
        }
    }
    println!("\nNet score: {}", service.net_score());
    Ok(())
}
