//! Lazy occurrence iteration.
//!
//! The iterator yields epoch-millisecond timestamps in strictly increasing
//! order, starting with `DTSTART` itself, until `COUNT`/`UNTIL` terminate the
//! rule. Unterminated rules are infinite — callers bound consumption.
//!
//! Time-based frequencies (MINUTELY, HOURLY) step by exact durations on the
//! instant timeline. Date-based frequencies (DAILY and up) step on the
//! rule's local calendar and resolve each candidate back through the
//! timezone, so a daily 08:00 stays 08:00 local across DST transitions
//! (earliest instant wins on ambiguity, gaps shift forward).

use std::collections::VecDeque;

use chrono::offset::LocalResult;
use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use crate::rule::{Freq, Rule};

const MS_PER_MINUTE: i64 = 60_000;
const MS_PER_HOUR: i64 = 3_600_000;

/// Consecutive BYDAY-filtered periods tolerated before giving up. Guards
/// against filters that can never match (e.g. INTERVAL=7 with a BYDAY the
/// anchor weekday never reaches).
const MAX_FILTER_MISSES: u32 = 1000;

/// Iterator over a rule's occurrences. Obtained via [`Rule::occurrences`].
#[derive(Debug, Clone)]
pub struct OccurrenceIter {
    freq: Freq,
    interval: u64,
    count: Option<u64>,
    until: Option<i64>,
    by_day: Vec<Weekday>,
    tz: Tz,
    start_ms: i64,
    start_local: NaiveDateTime,
    week_anchor: NaiveDate,
    started: bool,
    emitted: u64,
    period: u64,
    week_buf: VecDeque<i64>,
    last: Option<i64>,
    filter_misses: u32,
    done: bool,
}

impl OccurrenceIter {
    pub(crate) fn new(rule: &Rule) -> Self {
        let start_utc = DateTime::<Utc>::from_timestamp_millis(rule.dtstart).unwrap_or_default();
        let start_local = start_utc.with_timezone(&rule.tz).naive_local();
        let start_date = start_local.date();
        let week_anchor = start_date
            .checked_sub_days(Days::new(u64::from(start_date.weekday().num_days_from_monday())))
            .unwrap_or(start_date);

        let mut by_day = rule.by_day.clone();
        by_day.sort_by_key(|d| d.num_days_from_monday());

        Self {
            freq: rule.freq,
            interval: u64::from(rule.interval),
            count: rule.count,
            until: rule.until,
            by_day,
            tz: rule.tz,
            start_ms: rule.dtstart,
            start_local,
            week_anchor,
            started: false,
            emitted: 0,
            period: 0,
            week_buf: VecDeque::new(),
            last: None,
            filter_misses: 0,
            done: false,
        }
    }

    fn expands_weekly(&self) -> bool {
        self.freq == Freq::Weekly && !self.by_day.is_empty()
    }

    /// Local candidate for period `k` of a date-based frequency.
    fn local_for_period(&self, k: u64) -> Option<NaiveDateTime> {
        let date = self.start_local.date();
        let stepped = match self.freq {
            Freq::Daily => date.checked_add_days(Days::new(k.checked_mul(self.interval)?))?,
            Freq::Weekly => {
                date.checked_add_days(Days::new(k.checked_mul(self.interval)?.checked_mul(7)?))?
            }
            Freq::Monthly => {
                let months = u32::try_from(k.checked_mul(self.interval)?).ok()?;
                date.checked_add_months(Months::new(months))?
            }
            Freq::Yearly => {
                let months = u32::try_from(k.checked_mul(self.interval)?.checked_mul(12)?).ok()?;
                date.checked_add_months(Months::new(months))?
            }
            Freq::Minutely | Freq::Hourly => return None,
        };
        Some(NaiveDateTime::new(stepped, self.start_local.time()))
    }

    /// Next candidate for WEEKLY + BYDAY: expand one week at a time.
    fn next_weekly_candidate(&mut self) -> Option<i64> {
        loop {
            if let Some(ms) = self.week_buf.pop_front() {
                return Some(ms);
            }
            let k = self.period;
            self.period += 1;
            let week_start = self
                .week_anchor
                .checked_add_days(Days::new(k.checked_mul(self.interval)?.checked_mul(7)?))?;
            for day in &self.by_day {
                let Some(date) = week_start
                    .checked_add_days(Days::new(u64::from(day.num_days_from_monday())))
                else {
                    continue;
                };
                let local = NaiveDateTime::new(date, self.start_local.time());
                if local < self.start_local {
                    continue;
                }
                if let Some(ms) = resolve_local(self.tz, local) {
                    self.week_buf.push_back(ms);
                }
            }
        }
    }
}

impl Iterator for OccurrenceIter {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        loop {
            if self.done {
                return None;
            }
            if let Some(count) = self.count {
                if self.emitted >= count {
                    self.done = true;
                    return None;
                }
            }

            let candidate = if !self.started {
                // DTSTART is always the first instance of the rule.
                self.started = true;
                Some(self.start_ms)
            } else if self.expands_weekly() {
                match self.next_weekly_candidate() {
                    Some(ms) => Some(ms),
                    None => {
                        self.done = true;
                        return None;
                    }
                }
            } else {
                let k = self.period;
                self.period += 1;
                match self.freq {
                    Freq::Minutely => k
                        .checked_mul(self.interval)
                        .and_then(|n| i64::try_from(n).ok())
                        .and_then(|n| self.start_ms.checked_add(n * MS_PER_MINUTE)),
                    Freq::Hourly => k
                        .checked_mul(self.interval)
                        .and_then(|n| i64::try_from(n).ok())
                        .and_then(|n| self.start_ms.checked_add(n * MS_PER_HOUR)),
                    _ => match self.local_for_period(k) {
                        None => {
                            self.done = true;
                            return None;
                        }
                        Some(local) => {
                            if self.freq == Freq::Daily
                                && !self.by_day.is_empty()
                                && !self.by_day.contains(&local.weekday())
                            {
                                self.filter_misses += 1;
                                if self.filter_misses > MAX_FILTER_MISSES {
                                    self.done = true;
                                    return None;
                                }
                                continue;
                            }
                            resolve_local(self.tz, local)
                        }
                    },
                }
            };

            let Some(ms) = candidate else {
                continue;
            };
            if let Some(until) = self.until {
                if ms > until {
                    self.done = true;
                    return None;
                }
            }
            if let Some(last) = self.last {
                if ms <= last {
                    continue;
                }
            }
            self.last = Some(ms);
            self.emitted += 1;
            self.filter_misses = 0;
            return Some(ms);
        }
    }
}

/// Resolve a local wall-clock time to an instant in `tz`. On DST ambiguity
/// the earlier instant wins; times inside a gap shift forward hour by hour.
fn resolve_local(tz: Tz, local: NaiveDateTime) -> Option<i64> {
    let mut candidate = local;
    for _ in 0..4 {
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(dt) => return Some(dt.timestamp_millis()),
            LocalResult::Ambiguous(earliest, _) => return Some(earliest.timestamp_millis()),
            LocalResult::None => candidate = candidate + chrono::Duration::hours(1),
        }
    }
    None
}
