//! Recurrence rules and calendar-correct occurrence math.
//!
//! A rule is validated once at the write boundary (`RecurrenceRule::validate`)
//! and treated as trusted afterwards; the calculator itself is pure and does
//! no I/O.

pub mod calculator;
pub mod rule;

pub use calculator::{next_occurrence, series_complete};
pub use rule::{EndCondition, Frequency, RecurrenceRule};
