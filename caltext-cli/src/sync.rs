//! One synchronization run.
//!
//! Strictly sequential: reconcile the mirror against the server's
//! change window, recompute next-due tasks, dispatch the overdue ones,
//! and only then persist the fresh sync token. A crash anywhere before
//! the token write replays the same window on the next run.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;

use caltext_core::{CoreError, Event, ics, scheduler};

use crate::caldav::CalDavClient;
use crate::config::Settings;
use crate::dispatcher::{self, SmsGateway};
use crate::store::{Props, Store};

/// Statistics from one run.
#[derive(Debug, Default)]
pub struct RunStats {
    pub evicted: usize,
    pub ingested: usize,
    pub scheduled: usize,
    pub dispatched: usize,
    pub pending: usize,
}

pub fn run(settings: &Settings) -> Result<RunStats> {
    let now = Utc::now();
    if now < settings.mintime {
        anyhow::bail!("Current time {now} is before the configured mintime");
    }

    let mut store = Store::open(&settings.storage_dir)?;
    let props = load_or_init_props(&mut store, settings, now)?;

    let client = CalDavClient::connect(&settings.uri, &settings.username, &settings.password)?;
    let principal = client.find_current_user_principal()?;
    let home_set = client.find_calendar_home_set(&principal)?;
    let calendar_path = client.find_calendar_path(&home_set, &settings.calendar_name)?;

    let changes = client.sync_collection(&calendar_path, &props.token)?;
    let new_token = client.get_sync_token(&calendar_path)?;

    let mut stats = RunStats::default();

    // Vanished resources leave the mirror together with their tasks.
    for change in changes.iter().filter(|c| !c.is_actual) {
        if let Some(uid) = uid_from_path(&change.path, &calendar_path) {
            store.delete_events_by_uid(&uid)?;
            store.delete_task(&uid)?;
            stats.evicted += 1;
        }
    }

    // Fetch and ingest the present ones.
    let present: Vec<String> = changes
        .iter()
        .filter(|c| c.is_actual)
        .map(|c| c.path.clone())
        .collect();

    let mut ingested: Vec<Event> = Vec::new();
    if !present.is_empty() {
        for payload in client.multiget(&calendar_path, &present)? {
            match ics::parse_events(&payload, settings.zone.name()) {
                Ok(parsed) => {
                    report_skipped(&parsed.skipped);
                    ingested.extend(parsed.events);
                }
                Err(err) => eprintln!("{}", format!("Skipping payload: {err}").red()),
            }
        }
    }
    stats.ingested = ingested.len();

    // Recompute next-due tasks for the changed families against the
    // previous run's cutoff.
    let (tasks, skipped) = scheduler::schedule_all(&ingested, props.last_sync_time)?;
    report_skipped(&skipped);
    stats.scheduled = tasks.tasks().len();
    store.upsert_tasks(tasks.tasks().to_vec())?;

    // Families that produced no task have nothing left to say: drop
    // them and any stale task row. The rest replace their mirrored
    // records wholesale (retainable records only).
    let mut families: BTreeMap<String, Vec<Event>> = BTreeMap::new();
    for event in ingested {
        families.entry(event.uid.clone()).or_default().push(event);
    }
    for (uid, family) in families {
        if tasks.contains_uid(&uid) {
            let records = family.into_iter().filter(|e| e.is_retainable()).collect();
            store.replace_family(&uid, records)?;
        } else {
            store.delete_events_by_uid(&uid)?;
            store.delete_task(&uid)?;
        }
    }

    // Dispatch everything that has come due, then line up successors.
    let due = store.tasks_due_before(now);
    let messages = dispatcher::collect_messages(&store, &due);
    let gateway = SmsGateway::new(settings.sms_gateway.clone())?;
    dispatcher::send_batch(&gateway, &messages);
    stats.dispatched = messages.len();

    dispatcher::regenerate(&mut store, &due, now)?;

    store.put_props(Props {
        last_sync_time: now,
        token: new_token,
    })?;

    stats.pending = store.tasks().len();
    Ok(stats)
}

/// Load the sync properties, creating them on first run. The stored
/// time must lie within `[mintime, now]`.
fn load_or_init_props(store: &mut Store, settings: &Settings, now: DateTime<Utc>) -> Result<Props> {
    match store.props() {
        Some(props) => {
            if props.last_sync_time < settings.mintime {
                anyhow::bail!(
                    "Stored sync time {} is before the configured mintime",
                    props.last_sync_time
                );
            }
            if props.last_sync_time > now {
                return Err(CoreError::InvariantViolated(
                    "stored sync time lies in the future".to_string(),
                )
                .into());
            }
            Ok(props.clone())
        }
        None => {
            let props = Props {
                last_sync_time: now,
                token: settings.first_token.clone(),
            };
            store.put_props(props.clone())?;
            Ok(props)
        }
    }
}

/// The event uid is the resource path minus the calendar-path prefix
/// and the `.ics` extension.
fn uid_from_path(path: &str, calendar_path: &str) -> Option<String> {
    path.strip_prefix(calendar_path)?
        .strip_suffix(".ics")
        .map(str::to_string)
}

fn report_skipped(skipped: &[(String, CoreError)]) {
    for (uid, err) in skipped {
        eprintln!("{}", format!("Skipping record {uid}: {err}").red());
    }
}
