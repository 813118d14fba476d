use anyhow::Result;
use clap::Subcommand;
use warehouse::{CacheAction, Warehouse};

use crate::common::format_size;

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Show cache location and summary counters
    Info,
    /// List every cached entry, newest first
    List,
    /// Drop all cached queries for one dataset
    Clear {
        /// Dataset id to clear
        dataset_id: String,
    },
    /// Drop the entire cache
    ClearAll,
}

#[allow(clippy::print_stdout)]
pub fn cache_command(warehouse: &Warehouse, command: &CacheCommand, json: bool) -> Result<()> {
    let action = match command {
        CacheCommand::Info => CacheAction::Inspect,
        CacheCommand::List => CacheAction::List,
        CacheCommand::Clear { dataset_id } => CacheAction::ClearDataset(dataset_id.clone()),
        CacheCommand::ClearAll => CacheAction::ClearAll,
    };
    let summary = warehouse.manage_cache(action)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if let Some(removed) = summary.removed {
        println!("Removed {removed} cached entries");
    }
    if let Some(entries) = &summary.entries {
        for entry in entries {
            println!(
                "{}  {}  {} rows  {}  age {}s",
                &entry.fingerprint[..12],
                entry.dataset_id,
                entry.row_count,
                format_size(entry.size_bytes),
                entry.age_secs(now_unix_secs())
            );
        }
        if entries.is_empty() {
            println!("Cache is empty");
        }
        return Ok(());
    }

    let stats = &summary.stats;
    println!("cache dir: {}", stats.cache_dir.display());
    println!(
        "{} entries across {} datasets, {}",
        stats.total_entries,
        stats.unique_datasets,
        format_size(stats.total_size_bytes)
    );
    Ok(())
}

fn now_unix_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
