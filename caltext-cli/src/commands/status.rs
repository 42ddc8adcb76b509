use anyhow::Result;
use owo_colors::OwoColorize;

use crate::config::Settings;
use crate::store::Store;

/// Print the pending notifications, earliest first, in the default
/// zone.
pub async fn run(settings: Settings) -> Result<()> {
    let store = Store::open(&settings.storage_dir)?;

    let mut tasks = store.tasks().to_vec();
    tasks.sort_by_key(|t| t.datetime);

    if tasks.is_empty() {
        println!("No pending notifications");
        return Ok(());
    }

    for task in tasks {
        let local = task.datetime.with_timezone(&settings.zone);
        println!(
            "{}  {} {}",
            local.format("%Y-%m-%d %H:%M:%S"),
            task.uid,
            format!("({})", task.uid_trigger).dimmed()
        );
    }

    Ok(())
}
