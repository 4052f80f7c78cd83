//! Concrete occurrences of a recurring event.
//!
//! Overrides are keyed by recurrence id: the original local start of the
//! instance they override. A patch may exclude the instance entirely,
//! replace its `start`/`duration`/`timeZone`, or override attributes
//! addressed by JSON Pointer. A key that matches no generated start is an
//! added date. Occurrence handles are memoised per recurrence id and stay
//! stable between mutations; changing the event's start, time zone or
//! recurrence data invalidates them.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde_json::{Map, Value};

use crate::core::recurrence::rule::RecurrenceRule;
use crate::core::types::{apply_patch, is_valid_patch};

/// Override keys that configure the occurrence itself rather than patch
/// its attribute data.
const CONTROL_KEYS: [&str; 4] = ["excluded", "start", "duration", "timeZone"];

/// Parse a recurrence id or local date-time string. Seconds and a trailing
/// `Z` are optional.
#[must_use]
pub fn parse_recurrence_id(value: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y-%m-%dT%H:%MZ",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
}

/// Canonical string form of a recurrence id; seconds are omitted when
/// zero.
#[must_use]
pub fn format_recurrence_id(id: NaiveDateTime) -> String {
    if id.second() == 0 && id.nanosecond() == 0 {
        id.format("%Y-%m-%dT%H:%MZ").to_string()
    } else {
        id.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

/// Parse an ISO-8601 duration of the `PnW` / `PnDTnHnMnS` family.
#[must_use]
pub fn parse_iso_duration(value: &str) -> Option<Duration> {
    let rest = value.strip_prefix('P')?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((date, time)) => (date, Some(time)),
        None => (rest, None),
    };

    fn take_number<'a>(input: &'a str, suffix: char) -> (i64, &'a str) {
        if let Some(position) = input.find(suffix) {
            if let Ok(number) = input[..position].parse() {
                return (number, &input[position + 1..]);
            }
        }
        (0, input)
    }

    let (weeks, date_part) = take_number(date_part, 'W');
    let (days, date_part) = take_number(date_part, 'D');
    if !date_part.is_empty() {
        return None;
    }
    let mut duration = Duration::weeks(weeks) + Duration::days(days);
    if let Some(time_part) = time_part {
        let (hours, time_part) = take_number(time_part, 'H');
        let (minutes, time_part) = take_number(time_part, 'M');
        let (seconds, time_part) = take_number(time_part, 'S');
        if !time_part.is_empty() {
            return None;
        }
        duration = duration
            + Duration::hours(hours)
            + Duration::minutes(minutes)
            + Duration::seconds(seconds);
    }
    Some(duration)
}

/// One concrete instance of a recurring event.
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    /// The original local start identifying this instance.
    pub recurrence_id: NaiveDateTime,
    /// Effective local start (differs from the id when moved).
    pub start: NaiveDateTime,
    /// Effective duration.
    pub duration: Duration,
    /// Effective time zone.
    pub time_zone: Option<Tz>,
    /// Parent attributes with this instance's patches applied.
    pub data: Value,
}

impl Occurrence {
    /// The canonical string form of the recurrence id.
    #[must_use]
    pub fn id_string(&self) -> String {
        format_recurrence_id(self.recurrence_id)
    }

    /// Whether the instance was moved off its original start.
    #[must_use]
    pub fn is_moved(&self) -> bool {
        self.start != self.recurrence_id
    }

    /// The effective start as a UTC instant.
    #[must_use]
    pub fn start_utc(&self) -> DateTime<Utc> {
        match self.time_zone {
            Some(tz) => tz
                .from_local_datetime(&self.start)
                .earliest()
                .map(|local| local.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&self.start)),
            None => Utc.from_utc_datetime(&self.start),
        }
    }
}

/// A calendar event with recurrence data and per-instance overrides.
pub struct RecurringEvent {
    start: NaiveDateTime,
    time_zone: Option<Tz>,
    duration: Duration,
    rule: Option<RecurrenceRule>,
    overrides: BTreeMap<NaiveDateTime, Value>,
    properties: Value,
    cache: HashMap<NaiveDateTime, Arc<Occurrence>>,
}

impl RecurringEvent {
    /// Create an event. `properties` holds the remaining attributes
    /// (locations, participants, links, alerts, ...).
    pub fn new(
        start: NaiveDateTime,
        time_zone: Option<Tz>,
        duration: Duration,
        rule: Option<RecurrenceRule>,
        properties: Value,
    ) -> Self {
        RecurringEvent {
            start,
            time_zone,
            duration,
            rule,
            overrides: BTreeMap::new(),
            properties,
            cache: HashMap::new(),
        }
    }

    /// The event's local start.
    #[must_use]
    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    /// The current override map.
    #[must_use]
    pub fn overrides(&self) -> &BTreeMap<NaiveDateTime, Value> {
        &self.overrides
    }

    /// Replace the override map from its JSON form; unparseable keys are
    /// dropped. Invalid attribute patches are pruned immediately.
    pub fn set_overrides_json(&mut self, overrides: &Map<String, Value>) {
        self.overrides = overrides
            .iter()
            .filter_map(|(key, patch)| {
                let id = parse_recurrence_id(key);
                if id.is_none() {
                    tracing::warn!(key = %key, "unparseable recurrence id dropped");
                }
                id.map(|id| (id, patch.clone()))
            })
            .collect();
        self.prune_invalid_overrides();
        self.cache.clear();
    }

    /// Replace the override map. Invalid attribute patches are pruned.
    pub fn set_overrides(&mut self, overrides: BTreeMap<NaiveDateTime, Value>) {
        self.overrides = overrides;
        self.prune_invalid_overrides();
        self.cache.clear();
    }

    /// Move the event. Every override id is translated by the same delta,
    /// payloads untouched.
    pub fn set_start(&mut self, start: NaiveDateTime) {
        let delta = start - self.start;
        self.start = start;
        self.overrides = std::mem::take(&mut self.overrides)
            .into_iter()
            .map(|(id, patch)| (id + delta, patch))
            .collect();
        self.cache.clear();
    }

    /// Change the event's time zone.
    pub fn set_time_zone(&mut self, time_zone: Option<Tz>) {
        self.time_zone = time_zone;
        self.cache.clear();
    }

    /// Change the recurrence rule.
    pub fn set_rule(&mut self, rule: Option<RecurrenceRule>) {
        self.rule = rule;
        self.cache.clear();
    }

    /// Replace the event's attribute data, pruning overrides whose patch
    /// paths no longer resolve.
    pub fn set_properties(&mut self, properties: Value) {
        self.properties = properties;
        self.prune_invalid_overrides();
        self.cache.clear();
    }

    /// Remove override patches whose path prefix no longer resolves in the
    /// current attribute data. Overrides left with no effect disappear.
    pub fn prune_invalid_overrides(&mut self) {
        let properties = &self.properties;
        self.overrides.retain(|_, patch| {
            let Value::Object(map) = patch else { return false };
            map.retain(|key, _| {
                CONTROL_KEYS.contains(&key.as_str()) || is_valid_patch(properties, key)
            });
            !map.is_empty()
        });
    }

    fn to_local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        match self.time_zone {
            Some(tz) => instant.with_timezone(&tz).naive_local(),
            None => instant.naive_utc(),
        }
    }

    fn is_excluded(patch: &Value) -> bool {
        patch
            .get("excluded")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    fn alters_occurrence(patch: &Value) -> bool {
        patch.get("start").is_some()
            || patch.get("duration").is_some()
            || patch.get("timeZone").is_some()
    }

    /// The memoised occurrence for a recurrence id, or `None` when the
    /// instance is excluded. The same handle is returned until the event's
    /// start, time zone or recurrence data changes.
    pub fn occurrence(&mut self, id: NaiveDateTime) -> Option<Arc<Occurrence>> {
        if let Some(existing) = self.cache.get(&id) {
            return Some(existing.clone());
        }
        let patch = self.overrides.get(&id).cloned().unwrap_or(Value::Null);
        if Self::is_excluded(&patch) {
            return None;
        }

        let start = patch
            .get("start")
            .and_then(Value::as_str)
            .and_then(parse_recurrence_id)
            .unwrap_or(id);
        let duration = patch
            .get("duration")
            .and_then(Value::as_str)
            .and_then(parse_iso_duration)
            .unwrap_or(self.duration);
        let time_zone = patch
            .get("timeZone")
            .and_then(Value::as_str)
            .and_then(|name| name.parse().ok())
            .or(self.time_zone);

        let mut data = self.properties.clone();
        if let Value::Object(map) = &patch {
            for (path, value) in map {
                if !CONTROL_KEYS.contains(&path.as_str()) {
                    apply_patch(&mut data, path, value.clone());
                }
            }
        }

        let occurrence = Arc::new(Occurrence {
            recurrence_id: id,
            start,
            duration,
            time_zone,
            data,
        });
        self.cache.insert(id, occurrence.clone());
        Some(occurrence)
    }

    /// Every start date of the event, ascending. Unbounded rules are not
    /// enumerated: the event's own start is returned alone.
    #[must_use]
    pub fn all_start_dates(&self) -> Vec<NaiveDateTime> {
        let Some(rule) = &self.rule else {
            return vec![self.start];
        };
        if !rule.is_bounded() {
            return vec![self.start];
        }

        let mut ids: BTreeSet<NaiveDateTime> = rule.starts(self.start).collect();
        for (id, patch) in &self.overrides {
            if Self::is_excluded(patch) {
                ids.remove(id);
            } else {
                ids.insert(*id);
            }
        }
        let mut starts: Vec<NaiveDateTime> = ids
            .into_iter()
            .map(|id| {
                self.overrides
                    .get(&id)
                    .and_then(|patch| patch.get("start"))
                    .and_then(Value::as_str)
                    .and_then(parse_recurrence_id)
                    .unwrap_or(id)
            })
            .collect();
        starts.sort_unstable();
        starts
    }

    /// The occurrences that may fall within `[range_start, range_end)`.
    ///
    /// The rule is expanded in the event's zone with a safety margin of
    /// `min(duration, frequency cap)`, so an occurrence already running at
    /// `range_start` is included. Count-bounded series are materialised in
    /// full. Overrides add dates (always, when they alter the occurrence;
    /// otherwise only inside the range) and remove excluded ones. Order is
    /// unspecified.
    pub fn occurrences_in_range(
        &mut self,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
    ) -> Vec<Arc<Occurrence>> {
        let local_start = self.to_local(range_start);
        let local_end = self.to_local(range_end);

        let mut ids: BTreeSet<NaiveDateTime> = BTreeSet::new();
        match self.rule.clone() {
            None => {
                if self.start < local_end && self.start + self.duration > local_start {
                    ids.insert(self.start);
                }
            }
            Some(rule) if rule.count.is_some() => {
                // Count-bounded series are cheap: precompute the whole
                // series once and materialise every entry.
                ids.extend(rule.starts(self.start));
            }
            Some(rule) => {
                let margin = self
                    .duration
                    .min(Duration::days(rule.frequency.margin_cap_days()));
                let earliest = local_start - margin + Duration::seconds(1);
                ids.extend(
                    rule.starts(self.start)
                        .skip_while(|start| *start < earliest)
                        .take_while(|start| *start < local_end),
                );
            }
        }

        let in_full_series = self
            .rule
            .as_ref()
            .map_or(false, |rule| rule.count.is_some());
        for (id, patch) in self.overrides.clone() {
            if Self::is_excluded(&patch) {
                ids.remove(&id);
            } else if in_full_series
                || Self::alters_occurrence(&patch)
                || (id >= local_start && id < local_end)
            {
                ids.insert(id);
            }
        }

        ids.into_iter()
            .filter_map(|id| self.occurrence(id))
            .collect()
    }
}
