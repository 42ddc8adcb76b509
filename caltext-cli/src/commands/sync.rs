use anyhow::{Context, Result};
use owo_colors::OwoColorize;

use crate::config::Settings;
use crate::sync;

pub async fn run(settings: Settings) -> Result<()> {
    // CalDAV and the gateway are blocking; keep them off the runtime.
    let stats = tokio::task::spawn_blocking(move || sync::run(&settings))
        .await
        .context("Task join error")??;

    println!(
        "Synced {} changed, {} evicted; {} scheduled, {} pending",
        stats.ingested, stats.evicted, stats.scheduled, stats.pending
    );
    if stats.dispatched > 0 {
        println!("Sent {} messages", stats.dispatched.to_string().green());
    }

    Ok(())
}
