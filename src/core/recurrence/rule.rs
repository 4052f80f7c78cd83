//! Recurrence rules and their expansion.
//!
//! A rule is expanded in the event's local time: weekly and daily
//! frequencies step by a fixed span, monthly and yearly frequencies step
//! the calendar fields and clamp the day-of-month (Jan 31 + 1 month =
//! Feb 28/29). A rule bounded by `count` or `until` enumerates finitely;
//! an unbounded rule yields lazily and must be windowed by the caller.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// How often a rule repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Frequency {
    /// Every `interval` years.
    Yearly,
    /// Every `interval` months.
    Monthly,
    /// Every `interval` weeks.
    Weekly,
    /// Every `interval` days.
    Daily,
}

impl Frequency {
    /// Cap, in days, on the safety margin used when windowing a range
    /// query: no occurrence can start more than one period before an
    /// instant it covers.
    #[must_use]
    pub fn margin_cap_days(self) -> i64 {
        match self {
            Frequency::Yearly => 366,
            Frequency::Monthly => 31,
            Frequency::Weekly => 7,
            Frequency::Daily => 1,
        }
    }
}

fn default_interval() -> u32 {
    1
}

/// A recurrence rule.
///
/// # Examples
///
/// ```
/// use jmap_engine::core::recurrence::{Frequency, RecurrenceRule};
///
/// let rule: RecurrenceRule =
///     serde_json::from_str(r#"{"frequency": "WEEKLY", "count": 4}"#).unwrap();
/// assert_eq!(rule.frequency, Frequency::Weekly);
/// assert_eq!(rule.interval, 1);
/// assert!(rule.is_bounded());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceRule {
    /// Repeat frequency.
    pub frequency: Frequency,

    /// Periods between occurrences; defaults to 1.
    #[serde(default = "default_interval")]
    pub interval: u32,

    /// Total number of generated occurrences.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,

    /// Last instant (inclusive) an occurrence may start at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<NaiveDateTime>,
}

impl RecurrenceRule {
    /// Create an unbounded rule.
    #[must_use]
    pub fn new(frequency: Frequency) -> Self {
        RecurrenceRule {
            frequency,
            interval: 1,
            count: None,
            until: None,
        }
    }

    /// Bound the rule by a total occurrence count.
    #[must_use]
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    /// Bound the rule by a final start instant.
    #[must_use]
    pub fn with_until(mut self, until: NaiveDateTime) -> Self {
        self.until = Some(until);
        self
    }

    /// Repeat every `interval` periods.
    #[must_use]
    pub fn with_interval(mut self, interval: u32) -> Self {
        self.interval = interval.max(1);
        self
    }

    /// Whether the rule generates a finite series.
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        self.count.is_some() || self.until.is_some()
    }

    /// Expand the rule from `start`; the first yielded value is `start`
    /// itself. Unbounded rules yield forever.
    pub fn starts(&self, start: NaiveDateTime) -> RuleIter {
        RuleIter {
            frequency: self.frequency,
            interval: i64::from(self.interval.max(1)),
            until: self.until,
            remaining: self.count,
            base: start,
            step: 0,
        }
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    next.and_then(|date| date.pred_opt())
        .map(|date| date.day())
        .unwrap_or(28)
}

/// Add calendar months, clamping the day-of-month.
fn add_months(base: NaiveDateTime, months: i64) -> Option<NaiveDateTime> {
    let zero_based = i64::from(base.month0()) + months;
    let year = base.year() + i32::try_from(zero_based.div_euclid(12)).ok()?;
    let month = u32::try_from(zero_based.rem_euclid(12)).ok()? + 1;
    let day = base.day().min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).map(|date| date.and_time(base.time()))
}

/// Iterator over a rule's start date-times.
#[derive(Debug, Clone)]
pub struct RuleIter {
    frequency: Frequency,
    interval: i64,
    until: Option<NaiveDateTime>,
    remaining: Option<u32>,
    base: NaiveDateTime,
    step: i64,
}

impl Iterator for RuleIter {
    type Item = NaiveDateTime;

    fn next(&mut self) -> Option<NaiveDateTime> {
        if self.remaining == Some(0) {
            return None;
        }
        let offset = self.step.checked_mul(self.interval)?;
        let current = match self.frequency {
            Frequency::Yearly => add_months(self.base, offset.checked_mul(12)?)?,
            Frequency::Monthly => add_months(self.base, offset)?,
            Frequency::Weekly => self
                .base
                .checked_add_signed(Duration::weeks(offset))?,
            Frequency::Daily => self.base.checked_add_signed(Duration::days(offset))?,
        };
        if let Some(until) = self.until {
            if current > until {
                return None;
            }
        }
        self.step += 1;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    #[test]
    fn test_weekly_count() {
        let rule = RecurrenceRule::new(Frequency::Weekly).with_count(4);
        let starts: Vec<_> = rule.starts(at("2024-06-01T10:00:00")).collect();
        assert_eq!(
            starts,
            vec![
                at("2024-06-01T10:00:00"),
                at("2024-06-08T10:00:00"),
                at("2024-06-15T10:00:00"),
                at("2024-06-22T10:00:00"),
            ]
        );
    }

    #[test]
    fn test_daily_interval() {
        let rule = RecurrenceRule::new(Frequency::Daily)
            .with_interval(3)
            .with_count(3);
        let starts: Vec<_> = rule.starts(at("2024-01-30T08:30:00")).collect();
        assert_eq!(
            starts,
            vec![
                at("2024-01-30T08:30:00"),
                at("2024-02-02T08:30:00"),
                at("2024-02-05T08:30:00"),
            ]
        );
    }

    #[test]
    fn test_monthly_clamps_day() {
        let rule = RecurrenceRule::new(Frequency::Monthly).with_count(3);
        let starts: Vec<_> = rule.starts(at("2024-01-31T09:00:00")).collect();
        assert_eq!(
            starts,
            vec![
                at("2024-01-31T09:00:00"),
                // 2024 is a leap year
                at("2024-02-29T09:00:00"),
                // Stepping is from the base, so March recovers the 31st
                at("2024-03-31T09:00:00"),
            ]
        );
    }

    #[test]
    fn test_yearly_leap_day() {
        let rule = RecurrenceRule::new(Frequency::Yearly).with_count(2);
        let starts: Vec<_> = rule.starts(at("2024-02-29T12:00:00")).collect();
        assert_eq!(
            starts,
            vec![at("2024-02-29T12:00:00"), at("2025-02-28T12:00:00")]
        );
    }

    #[test]
    fn test_until_bound_inclusive() {
        let rule = RecurrenceRule::new(Frequency::Weekly)
            .with_until(at("2024-06-15T10:00:00"));
        let starts: Vec<_> = rule.starts(at("2024-06-01T10:00:00")).collect();
        assert_eq!(starts.len(), 3);
        assert_eq!(*starts.last().unwrap(), at("2024-06-15T10:00:00"));
    }

    #[test]
    fn test_unbounded_yields_lazily() {
        let rule = RecurrenceRule::new(Frequency::Daily);
        assert!(!rule.is_bounded());
        let starts: Vec<_> = rule.starts(at("2024-06-01T10:00:00")).take(400).collect();
        assert_eq!(starts.len(), 400);
    }

    #[test]
    fn test_margin_caps() {
        assert_eq!(Frequency::Yearly.margin_cap_days(), 366);
        assert_eq!(Frequency::Monthly.margin_cap_days(), 31);
        assert_eq!(Frequency::Weekly.margin_cap_days(), 7);
        assert_eq!(Frequency::Daily.margin_cap_days(), 1);
    }
}
