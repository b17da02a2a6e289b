//! Desired-mode triggers.
//!
//! The engine never decides whether an override should currently be
//! active; a trigger supplies the desired [`Mode`] as an input. The only
//! trigger shipped here is the calendar one the system was built around:
//! override on configured pause days (Saturday and Sunday by default), or
//! unconditionally while travel mode is on.

use chrono::{Datelike, Local, NaiveDate, Weekday};

use crate::record::Mode;

/// Supplies the desired mode for the next reconciliation pass.
pub trait TriggerEvaluator {
    /// The mode that should be in effect right now.
    fn desired_mode(&self) -> Mode;
}

/// Calendar-driven trigger: override on pause days or while traveling.
#[derive(Debug, Clone)]
pub struct ScheduleTrigger {
    pause_days: Vec<Weekday>,
    travel_mode: bool,
}

impl ScheduleTrigger {
    /// Build a trigger from an explicit day list and travel flag.
    #[must_use]
    pub fn new(pause_days: Vec<Weekday>, travel_mode: bool) -> Self {
        Self {
            pause_days,
            travel_mode,
        }
    }

    /// The mode desired on a specific date. Split out so the calendar
    /// arithmetic is testable without the wall clock.
    #[must_use]
    pub fn desired_on(&self, date: NaiveDate) -> Mode {
        if self.travel_mode {
            return Mode::Override;
        }
        if self.pause_days.contains(&date.weekday()) {
            Mode::Override
        } else {
            Mode::Inactive
        }
    }
}

impl Default for ScheduleTrigger {
    /// Weekends off, travel mode disabled.
    fn default() -> Self {
        Self::new(vec![Weekday::Sat, Weekday::Sun], false)
    }
}

impl TriggerEvaluator for ScheduleTrigger {
    fn desired_mode(&self) -> Mode {
        self.desired_on(Local::now().date_naive())
    }
}
