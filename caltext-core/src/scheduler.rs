//! Next-trigger computation.
//!
//! For every event record the scheduler finds the earliest alarm firing
//! strictly after a cutoff instant and emits at most one pending task
//! per uid family.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rrule::RRuleSet;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::event::{Event, Trigger};
use crate::recurrence::{RecurrenceOracle, occurrence_set};
use crate::time;

/// Upper bound on the forward occurrence walk. Unbounded rules with
/// long dead stretches give up past this point and contribute nothing.
const MAX_OCCURRENCE_WALK: usize = 4096;

/// The single pending notification for an event family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub uid: String,
    /// Which of the event's alarms won the race.
    pub uid_trigger: String,
    pub datetime: DateTime<Utc>,
}

/// Compute the next-due task for one record: the earliest instant
/// strictly after `cutoff` at which any of its triggers fires. Ties go
/// to the first-listed trigger. Records that cannot carry an SMS
/// produce nothing; SMS-capable overrides are scheduled as independent
/// one-shots.
pub fn schedule(
    event: &Event,
    oracle: &RecurrenceOracle,
    cutoff: DateTime<Utc>,
) -> CoreResult<Option<Task>> {
    if !event.sms_capable() {
        return Ok(None);
    }

    let zone = event.zone()?;
    let start = time::to_instant(&event.dtstart, zone)?;

    // Strict comparison keeps the first-listed trigger on ties.
    let mut best: Option<(DateTime<Utc>, &str)> = None;

    if event.rrule.is_empty() {
        for trigger in &event.triggers {
            let fire = fire_time(trigger, start, zone)?;
            if fire > cutoff && best.is_none_or(|(b, _)| fire < b) {
                best = Some((fire, trigger.uid.as_str()));
            }
        }
    } else {
        let set = occurrence_set(event)?;
        for trigger in &event.triggers {
            let Some(fire) = next_fire(event, oracle, &set, trigger, start, zone, cutoff)? else {
                continue;
            };
            if best.is_none_or(|(b, _)| fire < b) {
                best = Some((fire, trigger.uid.as_str()));
            }
        }
    }

    Ok(best.map(|(datetime, uid_trigger)| Task {
        uid: event.uid.clone(),
        uid_trigger: uid_trigger.to_string(),
        datetime,
    }))
}

/// When a trigger fires relative to one occurrence.
fn fire_time(trigger: &Trigger, occurrence: DateTime<Utc>, zone: Tz) -> CoreResult<DateTime<Utc>> {
    if time::is_relative(&trigger.trigger) {
        Ok(occurrence + time::parse_duration(&trigger.trigger)?)
    } else {
        time::to_instant(&trigger.trigger, zone)
    }
}

/// One contribution per trigger of a recurring event:
///
/// - absolute triggers fire at a fixed instant, gated on the anchor
///   occurrence being live, and never iterate;
/// - relative triggers walk the occurrence stream forward. Fire times
///   are monotone in the occurrence for a fixed offset, so the first
///   live occurrence firing after the cutoff is the trigger's minimum.
fn next_fire(
    event: &Event,
    oracle: &RecurrenceOracle,
    set: &RRuleSet,
    trigger: &Trigger,
    start: DateTime<Utc>,
    zone: Tz,
    cutoff: DateTime<Utc>,
) -> CoreResult<Option<DateTime<Utc>>> {
    if !time::is_relative(&trigger.trigger) {
        let fire = time::to_instant(&trigger.trigger, zone)?;
        if fire > cutoff && oracle.is_live(event, start)? {
            return Ok(Some(fire));
        }
        return Ok(None);
    }

    let offset = time::parse_duration(&trigger.trigger)?;
    for occurrence in set.clone().into_iter().take(MAX_OCCURRENCE_WALK) {
        let occurrence = occurrence.with_timezone(&Utc);
        let fire = occurrence + offset;
        if fire <= cutoff {
            continue;
        }
        if oracle.is_live(event, occurrence)? {
            return Ok(Some(fire));
        }
    }
    Ok(None)
}

/// Per-pass task accumulator enforcing the one-task-per-uid invariant.
///
/// Insertion order is preserved; a later task for the same uid wins
/// only by being strictly earlier.
#[derive(Debug, Default)]
pub struct TaskSet {
    tasks: Vec<Task>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, task: Task) {
        match self.tasks.iter_mut().find(|t| t.uid == task.uid) {
            Some(existing) => {
                if task.datetime < existing.datetime {
                    *existing = task;
                }
            }
            None => self.tasks.push(task),
        }
    }

    pub fn contains_uid(&self, uid: &str) -> bool {
        self.tasks.iter().any(|t| t.uid == uid)
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }
}

/// Schedule every record of a batch against one cutoff.
///
/// Records whose data fails to parse are collected for the caller to
/// report; invariant violations propagate.
pub fn schedule_all(
    records: &[Event],
    cutoff: DateTime<Utc>,
) -> CoreResult<(TaskSet, Vec<(String, CoreError)>)> {
    let oracle = RecurrenceOracle::build(records);
    let mut tasks = TaskSet::new();
    let mut skipped = Vec::new();

    for record in records {
        match schedule(record, &oracle, cutoff) {
            Ok(Some(task)) => tasks.upsert(task),
            Ok(None) => {}
            Err(err @ CoreError::InvariantViolated(_)) => return Err(err),
            Err(err) => skipped.push((record.uid.clone(), err)),
        }
    }

    Ok((tasks, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ComponentKind;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn make_event(uid: &str, dtstart: &str, triggers: &[(&str, &str)]) -> Event {
        let mut event = Event {
            uid: uid.to_string(),
            tzid: "UTC".to_string(),
            kind: ComponentKind::Event,
            status: String::new(),
            dtstart: dtstart.to_string(),
            rrule: String::new(),
            recurrence_id: String::new(),
            exdates: vec![],
            description: "sms:+79991112233:hi".to_string(),
            triggers: triggers
                .iter()
                .map(|(uid, trigger)| Trigger {
                    uid: uid.to_string(),
                    trigger: trigger.to_string(),
                })
                .collect(),
            text: String::new(),
            phones: vec![],
            exdate_instants: vec![],
            recurrence_instant: None,
        };
        event.derive().unwrap();
        event
    }

    #[test]
    fn test_single_negative_trigger() {
        let event = make_event("A", "20240115T100000", &[("t1", "-PT15M")]);
        let oracle = RecurrenceOracle::build(&[]);

        let task = schedule(&event, &oracle, utc(2024, 1, 15, 9, 0, 0))
            .unwrap()
            .unwrap();
        assert_eq!(task.uid, "A");
        assert_eq!(task.uid_trigger, "t1");
        assert_eq!(task.datetime, utc(2024, 1, 15, 9, 45, 0));
    }

    #[test]
    fn test_returns_minimum_over_triggers_and_breaks_ties_first_seen() {
        let event = make_event(
            "A",
            "20240115T100000",
            &[("late", "PT2H"), ("t-a", "-PT15M"), ("t-b", "-PT15M")],
        );
        let oracle = RecurrenceOracle::build(&[]);

        let task = schedule(&event, &oracle, utc(2024, 1, 15, 9, 0, 0))
            .unwrap()
            .unwrap();
        assert_eq!(task.datetime, utc(2024, 1, 15, 9, 45, 0));
        assert_eq!(task.uid_trigger, "t-a");
    }

    #[test]
    fn test_triggers_at_or_before_cutoff_do_not_fire() {
        let event = make_event("A", "20240115T100000", &[("t1", "-PT15M")]);
        let oracle = RecurrenceOracle::build(&[]);

        // Exactly at the fire instant: strictly-after means no task.
        let at_fire = schedule(&event, &oracle, utc(2024, 1, 15, 9, 45, 0)).unwrap();
        assert!(at_fire.is_none());
    }

    #[test]
    fn test_recurring_daily_with_exdate() {
        let mut event = make_event("A", "20240115T100000", &[("t1", "-PT0S")]);
        event.rrule = "FREQ=DAILY".to_string();
        event.exdates = vec!["20240116T100000".to_string()];
        event.derive().unwrap();
        let oracle = RecurrenceOracle::build(std::slice::from_ref(&event));

        let task = schedule(&event, &oracle, utc(2024, 1, 15, 11, 0, 0))
            .unwrap()
            .unwrap();
        assert_eq!(task.datetime, utc(2024, 1, 17, 10, 0, 0));
    }

    #[test]
    fn test_override_replaces_master_occurrence() {
        let mut master = make_event("A", "20240115T100000", &[("m1", "PT0S")]);
        master.rrule = "FREQ=DAILY".to_string();
        master.derive().unwrap();

        let mut moved = make_event("A", "20240116T150000", &[("o1", "PT0S")]);
        moved.recurrence_id = "20240116T100000".to_string();
        moved.derive().unwrap();

        let records = vec![master, moved];
        let (tasks, skipped) = schedule_all(&records, utc(2024, 1, 15, 12, 0, 0)).unwrap();
        assert!(skipped.is_empty());

        // One task for the family, at the override's moved time; the
        // master's suppressed 2024-01-16T10:00 occurrence loses.
        assert_eq!(tasks.tasks().len(), 1);
        let task = &tasks.tasks()[0];
        assert_eq!(task.uid, "A");
        assert_eq!(task.uid_trigger, "o1");
        assert_eq!(task.datetime, utc(2024, 1, 16, 15, 0, 0));
    }

    #[test]
    fn test_master_skips_overridden_occurrence_without_override_task() {
        // The override carries no SMS payload: it suppresses the
        // master's occurrence but schedules nothing itself.
        let mut master = make_event("A", "20240115T100000", &[("m1", "PT0S")]);
        master.rrule = "FREQ=DAILY".to_string();
        master.derive().unwrap();

        let mut blank = make_event("A", "20240116T150000", &[]);
        blank.description = String::new();
        blank.recurrence_id = "20240116T100000".to_string();
        blank.derive().unwrap();

        let records = vec![master, blank];
        let (tasks, _) = schedule_all(&records, utc(2024, 1, 15, 12, 0, 0)).unwrap();
        assert_eq!(tasks.tasks().len(), 1);
        assert_eq!(tasks.tasks()[0].datetime, utc(2024, 1, 17, 10, 0, 0));
    }

    #[test]
    fn test_absolute_trigger_in_the_past_contributes_nothing() {
        let event = make_event("B", "20240115T100000", &[("t1", "20230101T000000Z")]);
        let oracle = RecurrenceOracle::build(&[]);

        let task = schedule(&event, &oracle, utc(2024, 1, 1, 0, 0, 0)).unwrap();
        assert!(task.is_none());
    }

    #[test]
    fn test_absolute_trigger_on_recurring_event_requires_live_anchor() {
        let mut event = make_event("B", "20240115T100000", &[("t1", "20240201T000000Z")]);
        event.rrule = "FREQ=DAILY".to_string();
        event.derive().unwrap();
        let oracle = RecurrenceOracle::build(std::slice::from_ref(&event));

        let task = schedule(&event, &oracle, utc(2024, 1, 1, 0, 0, 0))
            .unwrap()
            .unwrap();
        assert_eq!(task.datetime, utc(2024, 2, 1, 0, 0, 0));

        let mut anchored_out = event.clone();
        anchored_out.exdates = vec!["20240115T100000".to_string()];
        anchored_out.derive().unwrap();
        let task = schedule(&anchored_out, &oracle, utc(2024, 1, 1, 0, 0, 0)).unwrap();
        assert!(task.is_none());
    }

    #[test]
    fn test_dispatch_then_regenerate_yields_next_day() {
        let mut event = make_event("A", "20240115T100000", &[("t1", "-PT0S")]);
        event.rrule = "FREQ=DAILY".to_string();
        event.derive().unwrap();
        let oracle = RecurrenceOracle::build(std::slice::from_ref(&event));

        // The 10:00 task fired; regenerating at 10:00:01 moves to the
        // next day's occurrence.
        let task = schedule(&event, &oracle, utc(2024, 1, 15, 10, 0, 1))
            .unwrap()
            .unwrap();
        assert_eq!(task.datetime, utc(2024, 1, 16, 10, 0, 0));
    }

    #[test]
    fn test_non_capable_records_produce_nothing() {
        let mut completed = make_event("A", "20240115T100000", &[("t1", "-PT15M")]);
        completed.status = "COMPLETED".to_string();
        let mut silent = make_event("B", "20240115T100000", &[("t1", "-PT15M")]);
        silent.description = String::new();
        silent.derive().unwrap();
        let oracle = RecurrenceOracle::build(&[]);

        let cutoff = utc(2024, 1, 15, 9, 0, 0);
        assert!(schedule(&completed, &oracle, cutoff).unwrap().is_none());
        assert!(schedule(&silent, &oracle, cutoff).unwrap().is_none());
    }

    #[test]
    fn test_recurring_rule_with_count_exhausts() {
        let mut event = make_event("A", "20240115T100000", &[("t1", "PT0S")]);
        event.rrule = "FREQ=DAILY;COUNT=3".to_string();
        event.derive().unwrap();
        let oracle = RecurrenceOracle::build(std::slice::from_ref(&event));

        // All three occurrences lie before the cutoff.
        let task = schedule(&event, &oracle, utc(2024, 2, 1, 0, 0, 0)).unwrap();
        assert!(task.is_none());
    }

    #[test]
    fn test_task_set_keeps_earliest_per_uid() {
        let mut tasks = TaskSet::new();
        tasks.upsert(Task {
            uid: "A".to_string(),
            uid_trigger: "t1".to_string(),
            datetime: utc(2024, 1, 17, 10, 0, 0),
        });
        tasks.upsert(Task {
            uid: "A".to_string(),
            uid_trigger: "t2".to_string(),
            datetime: utc(2024, 1, 16, 15, 0, 0),
        });
        tasks.upsert(Task {
            uid: "A".to_string(),
            uid_trigger: "t3".to_string(),
            datetime: utc(2024, 1, 18, 10, 0, 0),
        });
        tasks.upsert(Task {
            uid: "B".to_string(),
            uid_trigger: "t1".to_string(),
            datetime: utc(2024, 1, 20, 10, 0, 0),
        });

        assert_eq!(tasks.tasks().len(), 2);
        assert_eq!(tasks.tasks()[0].uid_trigger, "t2");
        assert_eq!(tasks.tasks()[0].datetime, utc(2024, 1, 16, 15, 0, 0));
        assert!(tasks.contains_uid("B"));
    }

    #[test]
    fn test_schedule_all_collects_bad_records() {
        let good = make_event("good", "20240115T100000", &[("t1", "-PT15M")]);
        let mut bad = make_event("bad", "20240115T100000", &[("t1", "not-a-trigger")]);
        bad.derive().unwrap();

        let (tasks, skipped) =
            schedule_all(&[good, bad], utc(2024, 1, 15, 9, 0, 0)).unwrap();
        assert!(tasks.contains_uid("good"));
        assert!(!tasks.contains_uid("bad"));
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].0, "bad");
    }
}
