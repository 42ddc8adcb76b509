//! Recurrence liveness checks and occurrence streams.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rrule::RRuleSet;

use crate::error::{CoreError, CoreResult};
use crate::event::Event;

/// Answers whether an instant from a master's RRULE expansion is still
/// live, i.e. neither excluded by an EXDATE nor replaced by a
/// RECURRENCE-ID override.
pub struct RecurrenceOracle {
    /// Override instants indexed by master uid.
    overrides: HashMap<String, Vec<DateTime<Utc>>>,
}

impl RecurrenceOracle {
    /// Index the override records found in `records`. Non-overrides and
    /// records of other families are ignored at query time.
    pub fn build(records: &[Event]) -> Self {
        let mut overrides: HashMap<String, Vec<DateTime<Utc>>> = HashMap::new();
        for record in records {
            if record.rrule.is_empty()
                && let Some(instant) = record.recurrence_instant
            {
                overrides.entry(record.uid.clone()).or_default().push(instant);
            }
        }
        RecurrenceOracle { overrides }
    }

    /// True iff `instant` is a live occurrence of `master`.
    ///
    /// `master` must be recurring; asking about a non-recurring record
    /// is a programming error.
    pub fn is_live(&self, master: &Event, instant: DateTime<Utc>) -> CoreResult<bool> {
        if master.rrule.is_empty() {
            return Err(CoreError::InvariantViolated(
                "recurrence liveness asked of a non-recurring event".to_string(),
            ));
        }
        if master.exdate_instants.contains(&instant) {
            return Ok(false);
        }
        if self
            .overrides
            .get(&master.uid)
            .is_some_and(|instants| instants.contains(&instant))
        {
            return Ok(false);
        }
        Ok(true)
    }
}

/// Build the RRULE occurrence set for a recurring event, anchored at
/// its DTSTART in its own zone.
pub fn occurrence_set(event: &Event) -> CoreResult<RRuleSet> {
    let source = match event.dtstart.len() {
        8 => format!(
            "DTSTART;TZID={}:{}T000000\nRRULE:{}",
            event.tzid, event.dtstart, event.rrule
        ),
        15 => format!(
            "DTSTART;TZID={}:{}\nRRULE:{}",
            event.tzid, event.dtstart, event.rrule
        ),
        16 => format!("DTSTART:{}\nRRULE:{}", event.dtstart, event.rrule),
        _ => return Err(CoreError::MalformedTime(event.dtstart.clone())),
    };

    source.parse().map_err(|e: rrule::RRuleError| {
        CoreError::IcsParse(format!("RRULE for event '{}': {}", event.uid, e))
    })
}
