//! Recurring-event expansion.
//!
//! [`RecurrenceRule`] expands a rule into successive start date-times in
//! the event's own time zone; [`RecurringEvent`] layers per-instance
//! overrides (exclusions, moves, added dates, attribute patches) on top
//! and answers range queries with stable per-occurrence identities.

mod occurrence;
mod rule;

pub use occurrence::{
    format_recurrence_id, parse_iso_duration, parse_recurrence_id, Occurrence, RecurringEvent,
};
pub use rule::{Frequency, RecurrenceRule};
