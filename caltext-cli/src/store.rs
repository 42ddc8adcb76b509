//! JSON file store for events, tasks, and sync properties.
//!
//! Three files under the storage directory, one per entity kind, each
//! rewritten atomically (temp file + rename). The engine is the only
//! writer for the duration of a run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use caltext_core::{Event, Task};

const EVENTS_FILE: &str = "events.json";
const TASKS_FILE: &str = "tasks.json";
const PROPS_FILE: &str = "props.json";

/// The sync-properties singleton: where the previous run left off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Props {
    pub last_sync_time: DateTime<Utc>,
    pub token: String,
}

/// File-backed store. Events are keyed by `(uid, recurrence_id)` so a
/// master and its overrides coexist; tasks are keyed by uid.
pub struct Store {
    dir: PathBuf,
    events: Vec<Event>,
    tasks: Vec<Task>,
    props: Option<Props>,
}

impl Store {
    /// Open the store, creating the directory if needed, and load all
    /// entities.
    pub fn open(dir: &Path) -> Result<Store> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create store directory {}", dir.display()))?;

        Ok(Store {
            dir: dir.to_path_buf(),
            events: load_list(&dir.join(EVENTS_FILE))?,
            tasks: load_list(&dir.join(TASKS_FILE))?,
            props: load_props(&dir.join(PROPS_FILE))?,
        })
    }

    pub fn props(&self) -> Option<&Props> {
        self.props.as_ref()
    }

    pub fn put_props(&mut self, props: Props) -> Result<()> {
        save(&self.dir.join(PROPS_FILE), &props)?;
        self.props = Some(props);
        Ok(())
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// All records of a uid family (master plus overrides).
    pub fn events_by_uid(&self, uid: &str) -> Vec<Event> {
        self.events.iter().filter(|e| e.uid == uid).cloned().collect()
    }

    pub fn upsert_event(&mut self, event: Event) -> Result<()> {
        match self
            .events
            .iter_mut()
            .find(|e| e.uid == event.uid && e.recurrence_id == event.recurrence_id)
        {
            Some(existing) => *existing = event,
            None => self.events.push(event),
        }
        self.save_events()
    }

    /// Swap out every record of a uid family in one write.
    pub fn replace_family(&mut self, uid: &str, records: Vec<Event>) -> Result<()> {
        self.events.retain(|e| e.uid != uid);
        self.events.extend(records);
        self.save_events()
    }

    pub fn delete_events_by_uid(&mut self, uid: &str) -> Result<()> {
        self.events.retain(|e| e.uid != uid);
        self.save_events()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Tasks strictly before `instant`, earliest first.
    pub fn tasks_due_before(&self, instant: DateTime<Utc>) -> Vec<Task> {
        let mut due: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.datetime < instant)
            .cloned()
            .collect();
        due.sort_by_key(|t| t.datetime);
        due
    }

    pub fn upsert_task(&mut self, task: Task) -> Result<()> {
        match self.tasks.iter_mut().find(|t| t.uid == task.uid) {
            Some(existing) => *existing = task,
            None => self.tasks.push(task),
        }
        self.save_tasks()
    }

    pub fn upsert_tasks(&mut self, tasks: Vec<Task>) -> Result<()> {
        for task in tasks {
            match self.tasks.iter_mut().find(|t| t.uid == task.uid) {
                Some(existing) => *existing = task,
                None => self.tasks.push(task),
            }
        }
        self.save_tasks()
    }

    pub fn delete_task(&mut self, uid: &str) -> Result<()> {
        self.tasks.retain(|t| t.uid != uid);
        self.save_tasks()
    }

    fn save_events(&self) -> Result<()> {
        save(&self.dir.join(EVENTS_FILE), &self.events)
    }

    fn save_tasks(&self) -> Result<()> {
        save(&self.dir.join(TASKS_FILE), &self.tasks)
    }
}

fn load_list<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

fn load_props(path: &Path) -> Result<Option<Props>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let props =
        serde_json::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(props))
}

/// Atomic write via temp file + rename (rename is atomic on POSIX when
/// both paths share a filesystem).
fn save<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let temp_path = path.with_extension("json.tmp");

    let contents = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;

    std::fs::write(&temp_path, contents)
        .with_context(|| format!("Failed to write {}", temp_path.display()))?;

    std::fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename into {}", path.display()))?;

    Ok(())
}
