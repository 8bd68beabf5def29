//! `status`: print catalog counts, optionally listing tasks in one status.

use anyhow::Result;
use harvester_core::{Catalog, StatusCounts, Task, TaskStatus};

use super::open_database;
use crate::app::settings::CommonSettings;
use crate::cli::StatusArgs;

pub(crate) async fn run_status_command(settings: &CommonSettings, args: &StatusArgs) -> Result<()> {
    let db = open_database(settings).await?;
    let catalog = Catalog::new(db.clone());

    let counts = catalog.count_by_status().await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&counts)?);
    } else {
        print!("{}", format_counts(&counts));
    }

    if let Some(status) = args.list {
        let tasks = catalog.list_by_status(status, args.limit).await?;
        println!();
        for task in &tasks {
            println!("{}", format_task_line(task));
        }
        if tasks.is_empty() {
            println!("(no {status} tasks)");
        }
    }

    db.close().await;
    Ok(())
}

fn format_counts(counts: &StatusCounts) -> String {
    let mut out = String::new();
    for status in TaskStatus::ALL {
        out.push_str(&format!("{:<12}{:>10}\n", status.as_str(), counts.get(status)));
    }
    out.push_str(&format!("{:<12}{:>10}\n", "total", counts.total()));
    out
}

fn format_task_line(task: &Task) -> String {
    let mut line = format!(
        "{:>8}  {}  retries={}",
        task.id, task.key, task.retry_count
    );
    if let Some(started) = &task.lease_started_at {
        line.push_str(&format!("  leased_at={started}"));
    }
    if let Some(artifact) = &task.artifact_reference {
        line.push_str(&format!("  artifact={artifact}"));
    }
    if let Some(error) = &task.last_error {
        line.push_str(&format!("  last_error={error}"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_counts_lists_every_status_and_total() {
        let counts = StatusCounts {
            pending: 3,
            in_progress: 1,
            completed: 10,
            failed: 2,
        };
        let out = format_counts(&counts);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("pending"));
        assert!(lines[1].starts_with("in_progress"));
        assert!(lines[4].starts_with("total"));
        assert!(lines[4].ends_with("16"));
    }
}
