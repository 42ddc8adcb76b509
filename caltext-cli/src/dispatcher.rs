//! Overdue-task dispatch and post-dispatch regeneration.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;
use url::Url;

use caltext_core::{Task, scheduler};

use crate::store::Store;

/// Courtesy pause between gateway calls on multi-message batches.
const SEND_PAUSE: Duration = Duration::from_secs(10);

/// One SMS about to leave through the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub phone: String,
    pub text: String,
}

pub struct SmsGateway {
    http: reqwest::blocking::Client,
    base: Url,
}

impl SmsGateway {
    pub fn new(base: Url) -> Result<SmsGateway> {
        let http = reqwest::blocking::Client::builder()
            .build()
            .context("Failed to create HTTP client")?;
        Ok(SmsGateway { http, base })
    }

    /// Fire one gateway GET. Failures are reported but never propagate;
    /// delivery is best-effort.
    pub fn send(&self, message: &Message) {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("n", &message.phone)
            .append_pair("m", &message.text);

        if let Err(err) = self.http.get(url).send() {
            eprintln!(
                "{}",
                format!("SMS gateway send to {} failed: {err}", message.phone).red()
            );
        }
    }
}

/// Resolve a batch of due tasks into messages: each task maps to the
/// family record owning its winning trigger, one message per recipient.
pub fn collect_messages(store: &Store, due: &[Task]) -> Vec<Message> {
    let mut messages = Vec::new();
    'tasks: for task in due {
        for record in store.events_by_uid(&task.uid) {
            if record.triggers.iter().any(|t| t.uid == task.uid_trigger) {
                for phone in &record.phones {
                    messages.push(Message {
                        phone: phone.clone(),
                        text: record.text.clone(),
                    });
                }
                continue 'tasks;
            }
        }
    }
    messages
}

/// Send a batch, pausing between sends when there is more than one.
pub fn send_batch(gateway: &SmsGateway, messages: &[Message]) {
    for message in messages {
        gateway.send(message);
        if messages.len() > 1 {
            thread::sleep(SEND_PAUSE);
        }
    }
}

/// Recompute each fired family with the dispatch time as the new
/// cutoff. Families with nothing left to fire leave the mirror.
pub fn regenerate(store: &mut Store, fired: &[Task], now: DateTime<Utc>) -> Result<()> {
    for task in fired {
        store.delete_task(&task.uid)?;

        let family = store.events_by_uid(&task.uid);
        let (tasks, skipped) = scheduler::schedule_all(&family, now)?;
        for (uid, err) in &skipped {
            eprintln!("{}", format!("Skipping record {uid}: {err}").red());
        }

        if tasks.is_empty() {
            store.delete_events_by_uid(&task.uid)?;
        } else {
            store.upsert_tasks(tasks.into_tasks())?;
        }
    }
    Ok(())
}
