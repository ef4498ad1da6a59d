// Date-or-datetime value used for every alarm trigger.
//
// An alarm may be set for a whole day ("any time" alarms) or for an exact
// instant. Timed values are stored normalised to UTC; date-only values are
// bound to the local zone only when a concrete instant is needed, using the
// process-wide start-of-day time (mixed comparisons apply the start-of-day
// to the date-only side).

use chrono::{DateTime, Datelike, Duration, Local, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::RwLock;

static START_OF_DAY: Lazy<RwLock<NaiveTime>> = Lazy::new(|| RwLock::new(NaiveTime::MIN));

/// Set the time of day at which date-only alarms are considered due.
pub fn set_start_of_day(t: NaiveTime) {
    *START_OF_DAY.write().unwrap() = t;
}

pub fn start_of_day() -> NaiveTime {
    *START_OF_DAY.read().unwrap()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum AlarmDateTime {
    /// A whole-day value; the effective instant is the configured
    /// start-of-day in the local zone.
    DateOnly(NaiveDate),
    Timed(DateTime<Utc>),
}

impl AlarmDateTime {
    pub fn from_date(d: NaiveDate) -> Self {
        AlarmDateTime::DateOnly(d)
    }

    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        AlarmDateTime::Timed(dt)
    }

    /// Constructs from a full datetime, optionally discarding the time.
    pub fn new(dt: DateTime<Utc>, date_only: bool) -> Self {
        if date_only {
            AlarmDateTime::DateOnly(dt.with_timezone(&Local).date_naive())
        } else {
            AlarmDateTime::Timed(dt)
        }
    }

    pub fn is_date_only(&self) -> bool {
        matches!(self, AlarmDateTime::DateOnly(_))
    }

    /// The calendar date, local-zone for timed values.
    pub fn date(&self) -> NaiveDate {
        match self {
            AlarmDateTime::DateOnly(d) => *d,
            AlarmDateTime::Timed(dt) => dt.with_timezone(&Local).date_naive(),
        }
    }

    /// The concrete UTC instant this value triggers at. Date-only values
    /// resolve via the configured start-of-day in the local zone.
    pub fn effective_utc(&self) -> DateTime<Utc> {
        match self {
            AlarmDateTime::DateOnly(d) => d
                .and_time(start_of_day())
                .and_local_timezone(Local)
                .earliest()
                .map(|l| l.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&d.and_time(start_of_day()))),
            AlarmDateTime::Timed(dt) => *dt,
        }
    }

    /// Converts to a date-only or timed value in place, keeping the date.
    pub fn set_date_only(&mut self, date_only: bool) {
        match (date_only, &*self) {
            (true, AlarmDateTime::Timed(_)) => *self = AlarmDateTime::DateOnly(self.date()),
            (false, AlarmDateTime::DateOnly(d)) => {
                let naive = d.and_time(start_of_day());
                let dt = Local
                    .from_local_datetime(&naive)
                    .earliest()
                    .map(|l| l.with_timezone(&Utc))
                    .unwrap_or_else(|| Utc.from_utc_datetime(&naive));
                *self = AlarmDateTime::Timed(dt);
            }
            _ => {}
        }
    }

    // --- Arithmetic ---
    //
    // All arithmetic returns None on out-of-range results so overflow
    // propagates as an absent value. On date-only values, second/minute
    // offsets round down to whole days.

    pub fn add_secs(&self, n: i64) -> Option<Self> {
        match self {
            AlarmDateTime::DateOnly(_) => self.add_days(n / 86_400),
            AlarmDateTime::Timed(dt) => dt
                .checked_add_signed(Duration::seconds(n))
                .map(AlarmDateTime::Timed),
        }
    }

    pub fn add_mins(&self, n: i64) -> Option<Self> {
        match self {
            AlarmDateTime::DateOnly(_) => self.add_days(n / (60 * 24)),
            AlarmDateTime::Timed(dt) => dt
                .checked_add_signed(Duration::minutes(n))
                .map(AlarmDateTime::Timed),
        }
    }

    pub fn add_days(&self, n: i64) -> Option<Self> {
        match self {
            AlarmDateTime::DateOnly(d) => d
                .checked_add_signed(Duration::days(n))
                .map(AlarmDateTime::DateOnly),
            AlarmDateTime::Timed(dt) => dt
                .checked_add_signed(Duration::days(n))
                .map(AlarmDateTime::Timed),
        }
    }

    pub fn add_months(&self, n: i32) -> Option<Self> {
        let months = Months::new(n.unsigned_abs());
        match self {
            AlarmDateTime::DateOnly(d) => if n >= 0 {
                d.checked_add_months(months)
            } else {
                d.checked_sub_months(months)
            }
            .map(AlarmDateTime::DateOnly),
            AlarmDateTime::Timed(dt) => if n >= 0 {
                dt.checked_add_months(months)
            } else {
                dt.checked_sub_months(months)
            }
            .map(AlarmDateTime::Timed),
        }
    }

    pub fn add_years(&self, n: i32) -> Option<Self> {
        n.checked_mul(12).and_then(|m| self.add_months(m))
    }

    // --- Differences ---
    //
    // When either side is date-only the difference is computed in whole days.

    pub fn days_to(&self, other: &AlarmDateTime) -> i64 {
        if self.is_date_only() || other.is_date_only() {
            other.date().signed_duration_since(self.date()).num_days()
        } else {
            (other.effective_utc() - self.effective_utc()).num_days()
        }
    }

    pub fn mins_to(&self, other: &AlarmDateTime) -> i64 {
        if self.is_date_only() || other.is_date_only() {
            self.days_to(other) * 24 * 60
        } else {
            (other.effective_utc() - self.effective_utc()).num_minutes()
        }
    }

    pub fn secs_to(&self, other: &AlarmDateTime) -> i64 {
        if self.is_date_only() || other.is_date_only() {
            self.days_to(other) * 24 * 3600
        } else {
            (other.effective_utc() - self.effective_utc()).num_seconds()
        }
    }

    // --- Formatting ---

    pub fn format_short(&self) -> String {
        match self {
            AlarmDateTime::DateOnly(d) => d.format("%Y-%m-%d").to_string(),
            AlarmDateTime::Timed(dt) => dt
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string(),
        }
    }

    pub fn format_long(&self) -> String {
        match self {
            AlarmDateTime::DateOnly(d) => d.format("%A %-d %B %Y").to_string(),
            AlarmDateTime::Timed(dt) => dt
                .with_timezone(&Local)
                .format("%A %-d %B %Y %H:%M:%S")
                .to_string(),
        }
    }

    pub fn year(&self) -> i32 {
        self.date().year()
    }
}

impl PartialEq for AlarmDateTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for AlarmDateTime {}

impl PartialOrd for AlarmDateTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AlarmDateTime {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (AlarmDateTime::DateOnly(a), AlarmDateTime::DateOnly(b)) => a.cmp(b),
            (AlarmDateTime::Timed(a), AlarmDateTime::Timed(b)) => a.cmp(b),
            // Mixed: the date-only side resolves at the start-of-day time.
            _ => self.effective_utc().cmp(&other.effective_utc()),
        }
    }
}

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    // Both dates are always valid: day 1 of a real month.
    let first = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
    let next = NaiveDate::from_ymd_opt(ny, nm, 1).unwrap();
    next.signed_duration_since(first).num_days() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_only_second_arithmetic_rounds_down_to_days() {
        let d = AlarmDateTime::from_date(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
        let plus = d.add_secs(86_400 + 3600).unwrap();
        assert_eq!(plus.date(), NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
        assert!(plus.is_date_only());
    }

    #[test]
    fn mixed_difference_uses_whole_days() {
        let a = AlarmDateTime::from_date(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
        let b = AlarmDateTime::from_utc(
            Utc.with_ymd_and_hms(2025, 6, 3, 15, 30, 0).unwrap(),
        );
        assert_eq!(a.mins_to(&b) % (24 * 60), 0);
    }

    #[test]
    fn month_lengths() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2025, 2), 28);
        assert_eq!(days_in_month(2025, 12), 31);
    }
}
