//! Calendar event records and their derived notification fields.
//!
//! These types are storage-neutral: the CLI persists them as-is and the
//! scheduler consumes them as-is. A master recurring event and its
//! RECURRENCE-ID overrides share a `uid`; the pair
//! `(uid, recurrence_id)` identifies a record.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::sms;
use crate::time;

/// Which component kind a record was ingested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentKind {
    Event,
    Todo,
}

/// A single alarm attached to an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub uid: String,
    /// Absolute UTC instant (`YYYYMMDDTHHMMSSZ`) or signed ISO-8601
    /// duration relative to DTSTART (`PT30M`, `-P1D`).
    pub trigger: String,
}

/// One VEVENT/VTODO record, plus the fields derived at ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub uid: String,
    /// IANA zone name; ingestion substitutes the default zone when the
    /// payload carries none.
    pub tzid: String,
    pub kind: ComponentKind,
    pub status: String,
    /// Textual DTSTART in one of the three accepted forms; empty when
    /// the payload had none.
    pub dtstart: String,
    /// Textual RFC 5545 RRULE; empty for non-recurring records.
    pub rrule: String,
    /// Textual RECURRENCE-ID; non-empty marks this record as an
    /// override of the master sharing its uid.
    pub recurrence_id: String,
    pub exdates: Vec<String>,
    pub description: String,
    pub triggers: Vec<Trigger>,

    // Derived at ingestion
    pub text: String,
    pub phones: Vec<String>,
    pub exdate_instants: Vec<DateTime<Utc>>,
    pub recurrence_instant: Option<DateTime<Utc>>,
}

impl Event {
    /// The zone this record's wall times live in.
    pub fn zone(&self) -> CoreResult<Tz> {
        time::load_zone(&self.tzid)
    }

    /// Compute the derived fields. Called once after ingestion.
    pub fn derive(&mut self) -> CoreResult<()> {
        let derived = sms::parse_description(&self.description);
        self.text = derived.text;
        self.phones = derived.phones;

        let zone = self.zone()?;
        self.exdate_instants = self
            .exdates
            .iter()
            .map(|exdate| time::to_instant(exdate, zone))
            .collect::<CoreResult<Vec<_>>>()?;
        self.recurrence_instant = if self.recurrence_id.is_empty() {
            None
        } else {
            Some(time::to_instant(&self.recurrence_id, zone)?)
        };
        Ok(())
    }

    /// True when this record can produce an SMS task.
    pub fn sms_capable(&self) -> bool {
        self.status != "COMPLETED"
            && !self.dtstart.is_empty()
            && !self.phones.is_empty()
            && !self.text.is_empty()
    }

    /// True for RECURRENCE-ID override records.
    pub fn is_override(&self) -> bool {
        !self.recurrence_id.is_empty()
    }

    /// Records worth keeping in the mirror: SMS-capable ones, and
    /// overrides, which inform the recurrence oracle even when they
    /// carry no notification of their own.
    pub fn is_retainable(&self) -> bool {
        self.sms_capable() || self.is_override()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_event() -> Event {
        Event {
            uid: "abc-123".to_string(),
            tzid: "UTC".to_string(),
            kind: ComponentKind::Event,
            status: String::new(),
            dtstart: "20240115T100000".to_string(),
            rrule: String::new(),
            recurrence_id: String::new(),
            exdates: vec![],
            description: "sms:+79991112233:hi".to_string(),
            triggers: vec![Trigger {
                uid: "t1".to_string(),
                trigger: "-PT15M".to_string(),
            }],
            text: String::new(),
            phones: vec![],
            exdate_instants: vec![],
            recurrence_instant: None,
        }
    }

    #[test]
    fn test_derive_fills_sms_and_exdates() {
        let mut event = make_event();
        event.exdates = vec!["20240116T100000".to_string()];
        event.derive().unwrap();

        assert_eq!(event.text, "hi");
        assert_eq!(event.phones, vec!["89991112233"]);
        assert_eq!(
            event.exdate_instants,
            vec![Utc.with_ymd_and_hms(2024, 1, 16, 10, 0, 0).unwrap()]
        );
        assert!(event.recurrence_instant.is_none());
    }

    #[test]
    fn test_derive_parses_recurrence_id() {
        let mut event = make_event();
        event.recurrence_id = "20240116T100000".to_string();
        event.derive().unwrap();

        assert_eq!(
            event.recurrence_instant,
            Some(Utc.with_ymd_and_hms(2024, 1, 16, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_derive_fails_on_bad_exdate() {
        let mut event = make_event();
        event.exdates = vec!["yesterday".to_string()];
        assert!(event.derive().is_err());
    }

    #[test]
    fn test_sms_capable_requires_all_parts() {
        let mut event = make_event();
        event.derive().unwrap();
        assert!(event.sms_capable());

        let mut completed = event.clone();
        completed.status = "COMPLETED".to_string();
        assert!(!completed.sms_capable());

        let mut no_start = event.clone();
        no_start.dtstart.clear();
        assert!(!no_start.sms_capable());

        let mut no_sms = event.clone();
        no_sms.text.clear();
        assert!(!no_sms.sms_capable());
    }

    #[test]
    fn test_overrides_are_retainable_without_sms() {
        let mut event = make_event();
        event.description.clear();
        event.recurrence_id = "20240116T100000".to_string();
        event.derive().unwrap();

        assert!(!event.sms_capable());
        assert!(event.is_retainable());
    }
}
