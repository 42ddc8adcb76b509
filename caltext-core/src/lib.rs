//! Scheduling engine for calendar-driven SMS notifications.
//!
//! This crate is the pure core of caltext: given event records mirrored
//! from a CalDAV calendar, it computes when the next SMS per event is
//! due. It does no I/O; the caltext binary supplies the transport,
//! store, and gateway around it.
//!
//! - `time`: the three iCalendar date forms and signed ISO-8601 durations
//! - `sms`: recipient/text derivation from event descriptions
//! - `event`, `ics`: the event record and its ingestion from payloads
//! - `recurrence`: RRULE occurrence streams and liveness (EXDATE,
//!   RECURRENCE-ID overrides)
//! - `scheduler`: the next-trigger computation and task accumulation

pub mod error;
pub mod event;
pub mod ics;
pub mod recurrence;
pub mod scheduler;
pub mod sms;
pub mod time;

pub use error::{CoreError, CoreResult};
pub use event::{ComponentKind, Event, Trigger};
pub use recurrence::RecurrenceOracle;
pub use scheduler::{Task, TaskSet, schedule, schedule_all};
