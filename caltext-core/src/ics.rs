//! Ingestion of iCalendar payloads into event records.
//!
//! Each CalDAV multiget resource is one VCALENDAR holding a uid family:
//! the master VEVENT/VTODO plus any RECURRENCE-ID overrides, and
//! optionally a VTIMEZONE naming the zone their wall times live in.

use icalendar::parser::{Component, read_calendar, unfold};

use crate::error::{CoreError, CoreResult};
use crate::event::{ComponentKind, Event, Trigger};

/// The records parsed out of one payload. Records whose time fields do
/// not parse are reported in `skipped` instead of failing the payload.
#[derive(Debug, Default)]
pub struct ParsedEvents {
    pub events: Vec<Event>,
    pub skipped: Vec<(String, CoreError)>,
}

/// Parse one VCALENDAR payload into event records.
///
/// Property extraction is tolerant: absent properties become empty
/// strings. EXDATE may repeat and each value may hold a comma-separated
/// list. Nested VALARM components become the record's triggers.
pub fn parse_events(content: &str, default_zone: &str) -> CoreResult<ParsedEvents> {
    let unfolded = unfold(content);
    let calendar =
        read_calendar(&unfolded).map_err(|e| CoreError::IcsParse(e.to_string()))?;

    let tzid = calendar
        .components
        .iter()
        .find(|c| c.name == "VTIMEZONE")
        .and_then(|c| c.find_prop("TZID"))
        .map(|p| p.val.to_string())
        .unwrap_or_else(|| default_zone.to_string());

    let mut parsed = ParsedEvents::default();
    for component in &calendar.components {
        let kind = if component.name == "VEVENT" {
            ComponentKind::Event
        } else if component.name == "VTODO" {
            ComponentKind::Todo
        } else {
            continue;
        };

        let mut event = Event {
            uid: prop_value(component, "UID"),
            tzid: tzid.clone(),
            kind,
            status: prop_value(component, "STATUS"),
            dtstart: prop_value(component, "DTSTART"),
            rrule: prop_value(component, "RRULE"),
            recurrence_id: prop_value(component, "RECURRENCE-ID"),
            exdates: exdate_values(component),
            description: prop_value(component, "DESCRIPTION"),
            triggers: alarm_triggers(component),
            text: String::new(),
            phones: vec![],
            exdate_instants: vec![],
            recurrence_instant: None,
        };

        match event.derive() {
            Ok(()) => parsed.events.push(event),
            Err(err) => parsed.skipped.push((event.uid, err)),
        }
    }

    Ok(parsed)
}

fn prop_value(component: &Component, name: &str) -> String {
    component
        .find_prop(name)
        .map(|p| p.val.to_string())
        .unwrap_or_default()
}

/// Collect EXDATE values across repeated properties and comma lists.
fn exdate_values(component: &Component) -> Vec<String> {
    component
        .properties
        .iter()
        .filter(|p| p.name == "EXDATE")
        .flat_map(|p| {
            p.val
                .as_ref()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        })
        .collect()
}

fn alarm_triggers(component: &Component) -> Vec<Trigger> {
    component
        .components
        .iter()
        .filter(|c| c.name == "VALARM")
        .filter_map(|alarm| {
            let uid = alarm.find_prop("UID")?.val.to_string();
            let trigger = alarm.find_prop("TRIGGER")?.val.to_string();
            Some(Trigger { uid, trigger })
        })
        .collect()
}
