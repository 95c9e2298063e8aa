//! Queue subcommand handlers.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use jarvis_bus::EventBus;
use jarvis_config::Config;
use jarvis_offline::{OfflineQueue, OperationStatus};
use jarvis_protocols::LogNotifier;

use crate::cli::QueueAction;

pub(crate) async fn handle_queue_command(action: QueueAction, config: &Config) -> anyhow::Result<()> {
    let path = config.queue_db_path();
    if config.queue.persistent && !path.exists() {
        println!("No queue database at {}", path.display());
        return Ok(());
    }
    let queue = OfflineQueue::from_config(&config.queue, &path, EventBus::new(), Arc::new(LogNotifier))
        .await
        .with_context(|| format!("opening queue at {}", path.display()))?;

    match action {
        QueueAction::Stats { json } => queue_stats(&queue, json).await,
        QueueAction::List { status, json } => {
            let status = status
                .as_deref()
                .map(str::parse::<OperationStatus>)
                .transpose()
                .map_err(|e| anyhow!(e))?;
            queue_list(&queue, status, json).await
        }
    }
}

async fn queue_stats(queue: &OfflineQueue, json: bool) -> anyhow::Result<()> {
    let stats = queue.stats().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    println!("{:<12} {:>6}", "STATUS", "COUNT");
    for (status, count) in [
        (OperationStatus::Pending, stats.pending),
        (OperationStatus::Processing, stats.processing),
        (OperationStatus::Completed, stats.completed),
        (OperationStatus::Failed, stats.failed),
        (OperationStatus::Cancelled, stats.cancelled),
    ] {
        println!("{:<12} {:>6}", status.as_str(), count);
    }
    println!("{:<12} {:>6}", "TOTAL", stats.total());
    Ok(())
}

async fn queue_list(
    queue: &OfflineQueue,
    status: Option<OperationStatus>,
    json: bool,
) -> anyhow::Result<()> {
    let operations = queue.list(status).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&operations)?);
        return Ok(());
    }
    if operations.is_empty() {
        println!("No operations");
        return Ok(());
    }
    println!(
        "{:<36}  {:<20} {:<10} {:<8} {:>7}  {}",
        "ID", "TYPE", "STATUS", "PRIORITY", "RETRIES", "NEXT ATTEMPT"
    );
    for op in &operations {
        println!(
            "{:<36}  {:<20} {:<10} {:<8} {:>3}/{:<3}  {}",
            op.id,
            op.op_type,
            op.status.as_str(),
            op.priority.to_string(),
            op.retry_count,
            op.max_retries,
            op.next_retry_at.format("%Y-%m-%d %H:%M:%S"),
        );
        if let Some(ref error) = op.last_error {
            println!("    last error: {}", error);
        }
    }
    Ok(())
}
