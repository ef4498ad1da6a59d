// Restricted recurrence engine with special yearly February 29th handling.
//
// Only the rule shapes the scheduler can produce are supported: minutely,
// daily (optionally masked to weekdays), weekly, monthly by date or by
// position, and yearly by date or by position. Yearly rules on February
// 29th carry a policy for non-leap years: skip, fall back to February 28th,
// or fall back to March 1st.
//
// On disk a February 29th rule with a fallback policy is stored as a pair of
// RFC 5545 rules (a 29th-of-month rule plus either a 60th-day-of-year rule
// or a last-day-of-February rule) so other calendar consumers see a
// conforming representation. The parser recognises the pair and rebuilds
// the single internal form; the combined duration is the shorter of the two.

use chrono::{Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::str::FromStr;

use crate::error::{AlarmError, AlarmResult};
use crate::model::datetime::{days_in_month, is_leap_year, AlarmDateTime};

/// Consecutive candidate-free periods tolerated before a rule is treated as
/// never recurring (covers leap-year gaps and frequency/mask dead cycles).
const MAX_EMPTY_PERIODS: u32 = 100;

/// What to do in a non-leap year with a recurrence on February 29th.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Feb29Policy {
    /// Occurs only in leap years.
    #[default]
    Feb29,
    /// Falls back to February 28th.
    Feb28,
    /// Falls back to March 1st.
    Mar1,
}

/// Set of weekdays, Monday first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WeekdayMask(pub [bool; 7]);

impl WeekdayMask {
    pub fn empty() -> Self {
        WeekdayMask([false; 7])
    }

    pub fn single(day: Weekday) -> Self {
        let mut m = [false; 7];
        m[day.num_days_from_monday() as usize] = true;
        WeekdayMask(m)
    }

    pub fn set(&mut self, day: Weekday) {
        self.0[day.num_days_from_monday() as usize] = true;
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0[day.num_days_from_monday() as usize]
    }

    pub fn is_empty(&self) -> bool {
        !self.0.iter().any(|b| *b)
    }

    pub fn count(&self) -> usize {
        self.0.iter().filter(|b| **b).count()
    }

    /// Indices of the set days, 0 = Monday.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, b)| **b)
            .map(|(i, _)| i)
    }
}

/// An "nth weekday of the month" selector, e.g. 2nd Tuesday (`week: 2`) or
/// last Friday (`week: -1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthPos {
    pub week: i8,
    pub days: WeekdayMask,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurRule {
    Minutely {
        freq: u32,
    },
    /// Every `freq` days; an empty mask means every such day qualifies.
    Daily {
        freq: u32,
        days: WeekdayMask,
    },
    Weekly {
        freq: u32,
        days: WeekdayMask,
    },
    /// `day` 1..=31, or -1 for the last day of the month.
    MonthlyByDay {
        freq: u32,
        day: i8,
    },
    MonthlyByPos {
        freq: u32,
        positions: Vec<MonthPos>,
    },
    /// `day` 1..=31 or -1; `months` sorted, 1..=12.
    AnnualByDate {
        freq: u32,
        months: Vec<u32>,
        day: i8,
        feb29: Feb29Policy,
    },
    AnnualByPos {
        freq: u32,
        months: Vec<u32>,
        positions: Vec<MonthPos>,
    },
}

impl RecurRule {
    pub fn frequency(&self) -> u32 {
        match self {
            RecurRule::Minutely { freq }
            | RecurRule::Daily { freq, .. }
            | RecurRule::Weekly { freq, .. }
            | RecurRule::MonthlyByDay { freq, .. }
            | RecurRule::MonthlyByPos { freq, .. }
            | RecurRule::AnnualByDate { freq, .. }
            | RecurRule::AnnualByPos { freq, .. } => *freq,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurLimit {
    Infinite,
    Count(u32),
    Until(AlarmDateTime),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    rule: RecurRule,
    limit: RecurLimit,
    start: AlarmDateTime,
}

impl Recurrence {
    /// Builds a validated recurrence. `count` follows the stored-form
    /// convention: -1 = infinite, 0 = bounded by `end`, n > 0 = exactly n
    /// occurrences.
    pub fn new(
        mut rule: RecurRule,
        start: AlarmDateTime,
        count: i32,
        end: Option<AlarmDateTime>,
    ) -> AlarmResult<Self> {
        fn check_positions(positions: &[MonthPos]) -> AlarmResult<()> {
            if positions.is_empty() {
                return Err(AlarmError::InvalidRecurrence(
                    "positional recurrence needs at least one position".into(),
                ));
            }
            for p in positions {
                if p.week == 0 || p.week > 5 || p.week < -5 || p.days.is_empty() {
                    return Err(AlarmError::InvalidRecurrence(format!(
                        "invalid month position {:?}",
                        p
                    )));
                }
            }
            Ok(())
        }
        fn check_months(months: &mut Vec<u32>) -> AlarmResult<()> {
            if months.is_empty() || months.iter().any(|m| !(1..=12).contains(m)) {
                return Err(AlarmError::InvalidRecurrence(
                    "yearly recurrence needs valid months".into(),
                ));
            }
            months.sort_unstable();
            months.dedup();
            Ok(())
        }
        fn check_day(day: i8) -> AlarmResult<()> {
            if day == -1 || (1..=31).contains(&day) {
                Ok(())
            } else {
                Err(AlarmError::InvalidRecurrence(format!(
                    "invalid day of month {}",
                    day
                )))
            }
        }

        if count < -1 {
            return Err(AlarmError::InvalidRecurrence(format!(
                "count {} out of range",
                count
            )));
        }
        if count == 0 && end.is_none() {
            return Err(AlarmError::InvalidRecurrence(
                "an end date is required when no count is given".into(),
            ));
        }
        if rule.frequency() == 0 {
            return Err(AlarmError::InvalidRecurrence("frequency must be >= 1".into()));
        }
        match &mut rule {
            RecurRule::Minutely { .. } => {
                if start.is_date_only() {
                    return Err(AlarmError::InvalidRecurrence(
                        "minutely recurrence needs a timed start".into(),
                    ));
                }
            }
            RecurRule::Daily { .. } => {}
            RecurRule::Weekly { days, .. } => {
                if days.is_empty() {
                    return Err(AlarmError::InvalidRecurrence(
                        "weekly recurrence needs at least one weekday".into(),
                    ));
                }
            }
            RecurRule::MonthlyByDay { day, .. } => check_day(*day)?,
            RecurRule::MonthlyByPos { positions, .. } => check_positions(positions)?,
            RecurRule::AnnualByDate {
                months, day, ..
            } => {
                check_day(*day)?;
                check_months(months)?;
            }
            RecurRule::AnnualByPos {
                months, positions, ..
            } => {
                check_positions(positions)?;
                check_months(months)?;
            }
        }

        let limit = match count {
            -1 => RecurLimit::Infinite,
            0 => RecurLimit::Until(end.unwrap()),
            n => RecurLimit::Count(n as u32),
        };

        let start = normalise_feb29_start(&rule, start);
        Ok(Recurrence { rule, limit, start })
    }

    pub fn rule(&self) -> &RecurRule {
        &self.rule
    }

    pub fn limit(&self) -> &RecurLimit {
        &self.limit
    }

    pub fn start(&self) -> AlarmDateTime {
        self.start
    }

    pub fn set_start(&mut self, start: AlarmDateTime) {
        self.start = normalise_feb29_start(&self.rule, start);
    }

    /// The stored-form count: -1 infinite, 0 end-bounded, n occurrences.
    pub fn count(&self) -> i32 {
        match self.limit {
            RecurLimit::Infinite => -1,
            RecurLimit::Until(_) => 0,
            RecurLimit::Count(n) => n as i32,
        }
    }

    pub fn feb29_policy(&self) -> Option<Feb29Policy> {
        match &self.rule {
            RecurRule::AnnualByDate { day: 29, months, feb29, .. }
                if months.contains(&2) =>
            {
                Some(*feb29)
            }
            _ => None,
        }
    }

    /// Date used as the stepping origin. For timed values this is the UTC
    /// calendar date, which is also the date space occurrences are generated
    /// in.
    fn base_date(&self) -> NaiveDate {
        match self.start {
            AlarmDateTime::DateOnly(d) => d,
            AlarmDateTime::Timed(dt) => dt.date_naive(),
        }
    }

    fn materialise(&self, d: NaiveDate) -> AlarmDateTime {
        match self.start {
            AlarmDateTime::DateOnly(_) => AlarmDateTime::DateOnly(d),
            AlarmDateTime::Timed(dt) => {
                AlarmDateTime::Timed(Utc.from_utc_datetime(&d.and_time(dt.time())))
            }
        }
    }

    /// Candidate occurrences within stepping period `p`, ascending, already
    /// clipped to dates at or after the start.
    fn period_candidates(&self, p: u64) -> Vec<AlarmDateTime> {
        let base = self.base_date();
        let mut dates: Vec<NaiveDate> = Vec::new();
        match &self.rule {
            RecurRule::Minutely { .. } => {
                // Minutely occurrences are generated arithmetically.
            }
            RecurRule::Daily { freq, days } => {
                if let Some(d) = base.checked_add_signed(Duration::days((p * *freq as u64) as i64))
                {
                    if days.is_empty() || days.contains(d.weekday()) {
                        dates.push(d);
                    }
                }
            }
            RecurRule::Weekly { freq, days } => {
                let week_start = base
                    - Duration::days(base.weekday().num_days_from_monday() as i64);
                if let Some(week_base) = week_start
                    .checked_add_signed(Duration::days((p * *freq as u64 * 7) as i64))
                {
                    for i in days.iter_set() {
                        let d = week_base + Duration::days(i as i64);
                        dates.push(d);
                    }
                }
            }
            RecurRule::MonthlyByDay { freq, day } => {
                let (y, m) = ym_add(base.year(), base.month(), p * *freq as u64);
                if let Some(d) = resolve_month_day(y, m, *day) {
                    dates.push(d);
                }
            }
            RecurRule::MonthlyByPos { freq, positions } => {
                let (y, m) = ym_add(base.year(), base.month(), p * *freq as u64);
                for pos in positions {
                    for wd in pos.days.iter_set() {
                        if let Some(d) = nth_weekday(y, m, pos.week, wd) {
                            dates.push(d);
                        }
                    }
                }
            }
            RecurRule::AnnualByDate {
                freq,
                months,
                day,
                feb29,
            } => {
                let year = base.year() + (p * *freq as u64) as i32;
                for m in months {
                    if *m == 2 && *day == 29 && !is_leap_year(year) {
                        match feb29 {
                            Feb29Policy::Feb29 => {}
                            Feb29Policy::Feb28 => {
                                dates.extend(NaiveDate::from_ymd_opt(year, 2, 28));
                            }
                            Feb29Policy::Mar1 => {
                                dates.extend(NaiveDate::from_ymd_opt(year, 3, 1));
                            }
                        }
                    } else if let Some(d) = resolve_month_day(year, *m, *day) {
                        dates.push(d);
                    }
                }
            }
            RecurRule::AnnualByPos {
                freq,
                months,
                positions,
            } => {
                let year = base.year() + (p * *freq as u64) as i32;
                for m in months {
                    for pos in positions {
                        for wd in pos.days.iter_set() {
                            if let Some(d) = nth_weekday(year, *m, pos.week, wd) {
                                dates.push(d);
                            }
                        }
                    }
                }
            }
        }
        dates.sort_unstable();
        dates.dedup();
        dates
            .into_iter()
            .filter(|d| *d >= base)
            .map(|d| self.materialise(d))
            .collect()
    }

    /// All occurrences in order, starting at the first rule match at or
    /// after the start, bounded by the terminator.
    pub fn iter(&self) -> OccurrenceIter<'_> {
        OccurrenceIter {
            rec: self,
            period: 0,
            buf: VecDeque::new(),
            yielded: 0,
            empty_streak: 0,
            exhausted: false,
            minutely_k: 0,
        }
    }

    /// Occurrence iteration fast-forwarded to shortly before `t`. Only valid
    /// when the occurrence index is not needed, so count-limited rules fall
    /// back to full iteration.
    ///
    /// The margin matches the empty-period guard: a rule with a longer
    /// candidate-free stretch is treated as never recurring, so rewinding by
    /// that many periods cannot skip a real occurrence.
    fn iter_from(&self, t: &AlarmDateTime) -> OccurrenceIter<'_> {
        if matches!(self.limit, RecurLimit::Count(_)) {
            return self.iter();
        }
        let margin = MAX_EMPTY_PERIODS as u64 + 2;
        let base = self.base_date();
        let days = t.date().signed_duration_since(base).num_days().max(0) as u64;
        let p0 = match &self.rule {
            RecurRule::Minutely { .. } => 0,
            RecurRule::Daily { freq, .. } => (days / *freq as u64).saturating_sub(margin),
            RecurRule::Weekly { freq, .. } => (days / (*freq as u64 * 7)).saturating_sub(margin),
            RecurRule::MonthlyByDay { freq, .. } | RecurRule::MonthlyByPos { freq, .. } => {
                (days / (*freq as u64 * 28)).saturating_sub(margin)
            }
            RecurRule::AnnualByDate { freq, .. } | RecurRule::AnnualByPos { freq, .. } => {
                (days / (*freq as u64 * 365)).saturating_sub(margin)
            }
        };
        let mut it = self.iter();
        it.period = p0;
        it
    }

    /// Smallest occurrence strictly after `t`, or None if the recurrence has
    /// ended by then.
    pub fn next_after(&self, t: &AlarmDateTime) -> Option<AlarmDateTime> {
        if let RecurRule::Minutely { freq } = self.rule {
            return self.minutely_next_after(freq, t);
        }
        self.iter_from(t).find(|o| o > t)
    }

    /// Smallest occurrence at or after `t`.
    pub fn next_at_or_after(&self, t: &AlarmDateTime) -> Option<AlarmDateTime> {
        let probe = match t {
            AlarmDateTime::DateOnly(d) => AlarmDateTime::DateOnly(*d - Duration::days(1)),
            AlarmDateTime::Timed(dt) => AlarmDateTime::Timed(*dt - Duration::seconds(1)),
        };
        self.next_after(&probe)
    }

    /// Largest occurrence at or before `t`.
    pub fn prev_at_or_before(&self, t: &AlarmDateTime) -> Option<AlarmDateTime> {
        let probe = match t {
            AlarmDateTime::DateOnly(d) => AlarmDateTime::DateOnly(*d + Duration::days(1)),
            AlarmDateTime::Timed(dt) => AlarmDateTime::Timed(*dt + Duration::seconds(1)),
        };
        self.prev_before(&probe)
    }

    /// Largest occurrence strictly before `t`.
    pub fn prev_before(&self, t: &AlarmDateTime) -> Option<AlarmDateTime> {
        if let RecurRule::Minutely { freq } = self.rule {
            return self.minutely_prev_before(freq, t);
        }
        let mut prev = None;
        for o in self.iter_from(t) {
            if o < *t {
                prev = Some(o);
            } else {
                break;
            }
        }
        prev
    }

    /// Whether `d` (in the rule's own date space) is an occurrence date.
    pub fn occurs_on(&self, d: NaiveDate) -> bool {
        if d < self.base_date() {
            return false;
        }
        if let RecurRule::Minutely { freq } = self.rule {
            let probe = AlarmDateTime::Timed(
                Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap()) - Duration::seconds(1),
            );
            return match self.minutely_next_after(freq, &probe) {
                Some(AlarmDateTime::Timed(dt)) => dt.date_naive() == d,
                _ => false,
            };
        }
        let probe = AlarmDateTime::DateOnly(d - Duration::days(1));
        for o in self.iter_from(&probe) {
            let od = match o {
                AlarmDateTime::DateOnly(x) => x,
                AlarmDateTime::Timed(dt) => dt.date_naive(),
            };
            if od == d {
                return true;
            }
            if od > d {
                return false;
            }
        }
        false
    }

    /// The last occurrence, or None for an infinite recurrence.
    pub fn end_datetime(&self) -> Option<AlarmDateTime> {
        match &self.limit {
            RecurLimit::Infinite => None,
            RecurLimit::Until(_) => self.iter_last(),
            RecurLimit::Count(n) => {
                if let RecurRule::Minutely { freq } = self.rule {
                    return self.start.add_mins((*n as i64 - 1) * freq as i64);
                }
                self.iter_last()
            }
        }
    }

    fn iter_last(&self) -> Option<AlarmDateTime> {
        let mut last = None;
        for o in self.iter() {
            last = Some(o);
        }
        last
    }

    fn minutely_step_secs(&self, freq: u32) -> i64 {
        freq as i64 * 60
    }

    fn minutely_next_after(&self, freq: u32, t: &AlarmDateTime) -> Option<AlarmDateTime> {
        let start = match self.start {
            AlarmDateTime::Timed(dt) => dt,
            AlarmDateTime::DateOnly(_) => return None,
        };
        let step = self.minutely_step_secs(freq);
        let delta = (t.effective_utc() - start).num_seconds();
        let k = if delta < 0 { 0 } else { delta / step + 1 };
        if let RecurLimit::Count(n) = self.limit {
            if k >= n as i64 {
                return None;
            }
        }
        let cand = start.checked_add_signed(Duration::seconds(k * step))?;
        let cand = AlarmDateTime::Timed(cand);
        if let RecurLimit::Until(e) = &self.limit {
            if cand > *e {
                return None;
            }
        }
        Some(cand)
    }

    fn minutely_prev_before(&self, freq: u32, t: &AlarmDateTime) -> Option<AlarmDateTime> {
        let start = match self.start {
            AlarmDateTime::Timed(dt) => dt,
            AlarmDateTime::DateOnly(_) => return None,
        };
        let step = self.minutely_step_secs(freq);
        let delta = (t.effective_utc() - start).num_seconds();
        if delta <= 0 {
            return None;
        }
        let mut k = (delta - 1) / step;
        if let RecurLimit::Count(n) = self.limit {
            k = k.min(n as i64 - 1);
        }
        if let RecurLimit::Until(e) = &self.limit {
            let until = (e.effective_utc() - start).num_seconds();
            if until >= 0 {
                k = k.min(until / step);
            } else {
                return None;
            }
        }
        if k < 0 {
            return None;
        }
        let cand = start.checked_add_signed(Duration::seconds(k * step))?;
        Some(AlarmDateTime::Timed(cand))
    }

    /// The longest gap between consecutive occurrences, in minutes.
    /// Zero means the rule never recurs.
    pub fn longest_interval(&self) -> i64 {
        match &self.rule {
            RecurRule::Minutely { freq } => *freq as i64,
            RecurRule::Daily { freq, days } => {
                let freq = *freq as i64;
                if days.is_empty() {
                    return freq * 1440;
                }
                if freq % 7 != 0 {
                    // The cycle visits every weekday eventually; find the
                    // longest stretch between qualifying days.
                    let mut first = -1i64;
                    let mut last = -1i64;
                    let mut maxgap = 1i64;
                    let mut i = 0i64;
                    while i < freq * 7 {
                        if days.0[(i % 7) as usize] {
                            if first < 0 {
                                first = i;
                            } else if i - last > maxgap {
                                maxgap = i - last;
                            }
                            last = i;
                        }
                        i += freq;
                    }
                    if first < 0 {
                        return 0;
                    }
                    let wrap = freq * 7 - last + first;
                    maxgap.max(wrap) * 1440
                } else {
                    // Always lands on the same weekday.
                    if days.contains(self.base_date().weekday()) {
                        freq * 1440
                    } else {
                        0
                    }
                }
            }
            RecurRule::Weekly { freq, days } => {
                let freq = *freq as i64;
                let mut first = -1i64;
                let mut last = -1i64;
                let mut maxgap = 1i64;
                for i in 0..7i64 {
                    if days.0[i as usize] {
                        if first < 0 {
                            first = i;
                        } else if i - last > maxgap {
                            maxgap = i - last;
                        }
                        last = i;
                    }
                }
                if first < 0 {
                    return 0;
                }
                let span = last - first;
                if freq > 1 {
                    return (freq * 7 - span) * 1440;
                }
                if 7 - span > maxgap {
                    return (7 - span) * 1440;
                }
                maxgap * 1440
            }
            RecurRule::MonthlyByDay { freq, .. } | RecurRule::MonthlyByPos { freq, .. } => {
                *freq as i64 * 1440 * 31
            }
            RecurRule::AnnualByDate { freq, months, .. }
            | RecurRule::AnnualByPos { freq, months, .. } => {
                let freq = *freq as i64;
                if months.is_empty() {
                    return 0;
                }
                if months.len() == 1 {
                    return freq * 1440 * 365;
                }
                // Months are sorted; measure gaps in a non-leap template year.
                let month_start =
                    |m: u32| NaiveDate::from_ymd_opt(2001, m, 1).unwrap();
                let mut first = 0u32;
                let mut last = 0u32;
                let mut maxgap = 0i64;
                for m in months {
                    if first == 0 {
                        first = *m;
                    } else {
                        let gap = month_start(*m)
                            .signed_duration_since(month_start(last))
                            .num_days();
                        if gap > maxgap {
                            maxgap = gap;
                        }
                    }
                    last = *m;
                }
                let span = month_start(last)
                    .signed_duration_since(month_start(first))
                    .num_days();
                if freq > 1 {
                    return (freq * 365 - span) * 1440;
                }
                if 365 - span > maxgap {
                    return (365 - span) * 1440;
                }
                maxgap * 1440
            }
        }
    }

    // --- RFC 5545 serialisation ---

    /// Emits the stored RRULE content lines (without the "RRULE:" prefix).
    /// A February 29th rule with a fallback policy becomes the conforming
    /// two-rule pair.
    pub fn to_rrule_strings(&self) -> Vec<String> {
        if let RecurRule::AnnualByDate {
            freq,
            months,
            day: 29,
            feb29,
        } = &self.rule
        {
            if *feb29 != Feb29Policy::Feb29 && months.contains(&2) {
                return self.feb29_rrule_pair(*freq, months, *feb29);
            }
        }
        vec![format!(
            "{}{}",
            self.rule_body(&self.rule),
            self.terminator_suffix(&self.limit)
        )]
    }

    fn rule_body(&self, rule: &RecurRule) -> String {
        let freq = rule.frequency();
        let interval = if freq > 1 {
            format!(";INTERVAL={}", freq)
        } else {
            String::new()
        };
        match rule {
            RecurRule::Minutely { .. } => format!("FREQ=MINUTELY{}", interval),
            RecurRule::Daily { days, .. } => {
                if days.is_empty() {
                    format!("FREQ=DAILY{}", interval)
                } else {
                    format!("FREQ=DAILY{};BYDAY={}", interval, byday_tokens(days))
                }
            }
            RecurRule::Weekly { days, .. } => {
                format!("FREQ=WEEKLY{};BYDAY={}", interval, byday_tokens(days))
            }
            RecurRule::MonthlyByDay { day, .. } => {
                format!("FREQ=MONTHLY{};BYMONTHDAY={}", interval, day)
            }
            RecurRule::MonthlyByPos { positions, .. } => {
                format!("FREQ=MONTHLY{};BYDAY={}", interval, bypos_tokens(positions))
            }
            RecurRule::AnnualByDate {
                months, day, ..
            } => format!(
                "FREQ=YEARLY{};BYMONTH={};BYMONTHDAY={}",
                interval,
                join_u32(months),
                day
            ),
            RecurRule::AnnualByPos {
                months, positions, ..
            } => format!(
                "FREQ=YEARLY{};BYMONTH={};BYDAY={}",
                interval,
                join_u32(months),
                bypos_tokens(positions)
            ),
        }
    }

    fn terminator_suffix(&self, limit: &RecurLimit) -> String {
        match limit {
            RecurLimit::Infinite => String::new(),
            RecurLimit::Count(n) => format!(";COUNT={}", n),
            RecurLimit::Until(e) => format!(";UNTIL={}", format_until(e)),
        }
    }

    fn feb29_rrule_pair(&self, freq: u32, months: &[u32], policy: Feb29Policy) -> Vec<String> {
        let interval = if freq > 1 {
            format!(";INTERVAL={}", freq)
        } else {
            String::new()
        };
        let feb_rule = match policy {
            Feb29Policy::Mar1 => format!("FREQ=YEARLY{};BYYEARDAY=60", interval),
            _ => format!("FREQ=YEARLY{};BYMONTH=2;BYMONTHDAY=-1", interval),
        };
        let others: Vec<u32> = months.iter().copied().filter(|m| *m != 2).collect();
        if others.is_empty() {
            return vec![format!(
                "{}{}",
                feb_rule,
                self.terminator_suffix(&self.limit)
            )];
        }
        let other_rule = format!(
            "FREQ=YEARLY{};BYMONTH={};BYMONTHDAY=29",
            interval,
            join_u32(&others)
        );
        match &self.limit {
            RecurLimit::Infinite => vec![other_rule, feb_rule],
            RecurLimit::Until(e) => vec![
                format!("{};UNTIL={}", other_rule, format_until(e)),
                format!("{};UNTIL={}", feb_rule, format_until(e)),
            ],
            RecurLimit::Count(_) => {
                // Split the combined count between the two rules so that the
                // overall occurrence total is preserved.
                let end = match self.end_datetime() {
                    Some(e) => e,
                    None => return vec![other_rule, feb_rule],
                };
                let c_others = self.sub_rule_count(&others, Feb29Policy::Feb29, &end);
                let c_feb = self.sub_rule_count(&[2], policy, &end);
                let mut out = Vec::with_capacity(2);
                out.push(bounded_rule(other_rule, c_others, &self.start));
                out.push(bounded_rule(feb_rule, c_feb, &self.start));
                out
            }
        }
    }

    /// Number of occurrences of a sub-rule (29th of `months` with `policy`)
    /// between the start and `end` inclusive.
    fn sub_rule_count(&self, months: &[u32], policy: Feb29Policy, end: &AlarmDateTime) -> u32 {
        let sub = Recurrence {
            rule: RecurRule::AnnualByDate {
                freq: self.rule.frequency(),
                months: months.to_vec(),
                day: 29,
                feb29: policy,
            },
            limit: RecurLimit::Until(*end),
            start: self.start,
        };
        sub.iter().count() as u32
    }
}

fn bounded_rule(body: String, count: u32, start: &AlarmDateTime) -> String {
    if count > 0 {
        format!("{};COUNT={}", body, count)
    } else {
        // A rule with no occurrences within the span keeps an UNTIL at the
        // start so the February 29th pairing is preserved on disk.
        format!("{};UNTIL={}", body, format_until(start))
    }
}

pub struct OccurrenceIter<'a> {
    rec: &'a Recurrence,
    period: u64,
    buf: VecDeque<AlarmDateTime>,
    yielded: u32,
    empty_streak: u32,
    exhausted: bool,
    minutely_k: u32,
}

impl Iterator for OccurrenceIter<'_> {
    type Item = AlarmDateTime;

    fn next(&mut self) -> Option<AlarmDateTime> {
        // Minutely iteration is only used for bounded rules; unbounded
        // minutely lookups go through the arithmetic paths.
        if let RecurRule::Minutely { freq } = self.rec.rule {
            if let RecurLimit::Count(n) = self.rec.limit {
                if self.minutely_k >= n {
                    return None;
                }
                let out = self
                    .rec
                    .start
                    .add_mins(self.minutely_k as i64 * freq as i64);
                self.minutely_k += 1;
                return out;
            }
            if let RecurLimit::Until(e) = &self.rec.limit {
                let out = self
                    .rec
                    .start
                    .add_mins(self.minutely_k as i64 * freq as i64)?;
                self.minutely_k += 1;
                if out > *e {
                    return None;
                }
                return Some(out);
            }
            return None;
        }

        if self.exhausted {
            return None;
        }
        if let RecurLimit::Count(n) = self.rec.limit {
            if self.yielded >= n {
                self.exhausted = true;
                return None;
            }
        }
        let v = loop {
            if let Some(v) = self.buf.pop_front() {
                break v;
            }
            if self.empty_streak > MAX_EMPTY_PERIODS {
                self.exhausted = true;
                return None;
            }
            let c = self.rec.period_candidates(self.period);
            self.period += 1;
            if c.is_empty() {
                self.empty_streak += 1;
            } else {
                self.empty_streak = 0;
                self.buf.extend(c);
            }
        };
        if let RecurLimit::Until(e) = &self.rec.limit {
            if v > *e {
                self.exhausted = true;
                return None;
            }
        }
        self.yielded += 1;
        Some(v)
    }
}

/// A 29th February recurrence whose start sits on the fallback day of a
/// non-leap year is re-anchored to the most recent real February 29th, so
/// the rule's reference date is always valid.
fn normalise_feb29_start(rule: &RecurRule, start: AlarmDateTime) -> AlarmDateTime {
    let policy = match rule {
        RecurRule::AnnualByDate {
            day: 29,
            months,
            feb29,
            ..
        } if months.contains(&2) && *feb29 != Feb29Policy::Feb29 => *feb29,
        _ => return start,
    };
    let date = match start {
        AlarmDateTime::DateOnly(d) => d,
        AlarmDateTime::Timed(dt) => dt.date_naive(),
    };
    if is_leap_year(date.year()) {
        return start;
    }
    let fallback_ordinal = if policy == Feb29Policy::Mar1 { 60 } else { 59 };
    if date.ordinal() != fallback_ordinal {
        return start;
    }
    let mut year = date.year() - 1;
    while !is_leap_year(year) {
        year -= 1;
    }
    let adjusted = NaiveDate::from_ymd_opt(year, 2, 29).unwrap();
    match start {
        AlarmDateTime::DateOnly(_) => AlarmDateTime::DateOnly(adjusted),
        AlarmDateTime::Timed(dt) => {
            AlarmDateTime::Timed(Utc.from_utc_datetime(&adjusted.and_time(dt.time())))
        }
    }
}

// --- helpers ---

fn ym_add(year: i32, month: u32, add: u64) -> (i32, u32) {
    let idx = year as i64 * 12 + (month as i64 - 1) + add as i64;
    ((idx.div_euclid(12)) as i32, (idx.rem_euclid(12) + 1) as u32)
}

fn resolve_month_day(year: i32, month: u32, day: i8) -> Option<NaiveDate> {
    if day == -1 {
        let last = days_in_month(year, month);
        NaiveDate::from_ymd_opt(year, month, last)
    } else if day >= 1 && (day as u32) <= days_in_month(year, month) {
        NaiveDate::from_ymd_opt(year, month, day as u32)
    } else {
        None
    }
}

/// The `week`-th weekday of a month (`week` < 0 counts from the end);
/// `wd` is a Monday-first index.
fn nth_weekday(year: i32, month: u32, week: i8, wd: usize) -> Option<NaiveDate> {
    let len = days_in_month(year, month);
    if week > 0 {
        let first = NaiveDate::from_ymd_opt(year, month, 1)?;
        let offset =
            (wd as i64 + 7 - first.weekday().num_days_from_monday() as i64) % 7;
        let day = 1 + offset + (week as i64 - 1) * 7;
        if day >= 1 && day <= len as i64 {
            NaiveDate::from_ymd_opt(year, month, day as u32)
        } else {
            None
        }
    } else {
        let last = NaiveDate::from_ymd_opt(year, month, len)?;
        let offset =
            (last.weekday().num_days_from_monday() as i64 + 7 - wd as i64) % 7;
        let day = len as i64 - offset - (-week as i64 - 1) * 7;
        if day >= 1 {
            NaiveDate::from_ymd_opt(year, month, day as u32)
        } else {
            None
        }
    }
}

const WEEKDAY_TOKENS: [&str; 7] = ["MO", "TU", "WE", "TH", "FR", "SA", "SU"];

fn byday_tokens(days: &WeekdayMask) -> String {
    days.iter_set()
        .map(|i| WEEKDAY_TOKENS[i])
        .collect::<Vec<_>>()
        .join(",")
}

fn bypos_tokens(positions: &[MonthPos]) -> String {
    let mut parts = Vec::new();
    for pos in positions {
        for i in pos.days.iter_set() {
            parts.push(format!("{}{}", pos.week, WEEKDAY_TOKENS[i]));
        }
    }
    parts.join(",")
}

fn join_u32(vals: &[u32]) -> String {
    vals.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn format_until(e: &AlarmDateTime) -> String {
    match e {
        AlarmDateTime::DateOnly(d) => d.format("%Y%m%d").to_string(),
        AlarmDateTime::Timed(dt) => dt.format("%Y%m%dT%H%M%SZ").to_string(),
    }
}

// --- RFC 5545 parsing ---

#[derive(Debug, Default, Clone)]
struct RawRule {
    freq: String,
    interval: u32,
    count: Option<u32>,
    until: Option<AlarmDateTime>,
    byday: Vec<(i8, usize)>, // (week-or-0, Monday-first weekday)
    bymonthday: Vec<i32>,
    bymonth: Vec<u32>,
    byyearday: Vec<i32>,
}

fn parse_weekday_token(tok: &str) -> Option<(i8, usize)> {
    let tok = tok.trim();
    let split = tok.len().checked_sub(2)?;
    let (num, day) = tok.split_at(split);
    let wd = WEEKDAY_TOKENS.iter().position(|t| *t == day)?;
    let week = if num.is_empty() {
        0
    } else {
        num.parse::<i8>().ok()?
    };
    Some((week, wd))
}

fn parse_rrule_content(line: &str) -> AlarmResult<RawRule> {
    let mut raw = RawRule {
        interval: 1,
        ..RawRule::default()
    };
    for part in line.trim().trim_start_matches("RRULE:").split(';') {
        if part.is_empty() {
            continue;
        }
        let (key, val) = part.split_once('=').ok_or_else(|| {
            AlarmError::InvalidRecurrence(format!("malformed rule part '{}'", part))
        })?;
        match key.to_uppercase().as_str() {
            "FREQ" => raw.freq = val.to_uppercase(),
            "INTERVAL" => {
                raw.interval = val
                    .parse()
                    .map_err(|_| AlarmError::InvalidRecurrence("bad INTERVAL".into()))?;
            }
            "COUNT" => {
                raw.count = Some(
                    val.parse()
                        .map_err(|_| AlarmError::InvalidRecurrence("bad COUNT".into()))?,
                );
            }
            "UNTIL" => {
                raw.until = Some(parse_until(val)?);
            }
            "BYDAY" => {
                for tok in val.split(',') {
                    raw.byday.push(parse_weekday_token(tok).ok_or_else(|| {
                        AlarmError::InvalidRecurrence(format!("bad BYDAY token '{}'", tok))
                    })?);
                }
            }
            "BYMONTHDAY" => {
                for tok in val.split(',') {
                    raw.bymonthday.push(tok.parse().map_err(|_| {
                        AlarmError::InvalidRecurrence("bad BYMONTHDAY".into())
                    })?);
                }
            }
            "BYMONTH" => {
                for tok in val.split(',') {
                    raw.bymonth.push(
                        tok.parse()
                            .map_err(|_| AlarmError::InvalidRecurrence("bad BYMONTH".into()))?,
                    );
                }
            }
            "BYYEARDAY" => {
                for tok in val.split(',') {
                    raw.byyearday.push(tok.parse().map_err(|_| {
                        AlarmError::InvalidRecurrence("bad BYYEARDAY".into())
                    })?);
                }
            }
            // WKST and the remaining BYxxx refinements are not produced by
            // this application; ignore them on read.
            _ => {}
        }
    }
    if raw.freq.is_empty() {
        return Err(AlarmError::InvalidRecurrence("missing FREQ".into()));
    }
    if raw.interval == 0 {
        return Err(AlarmError::InvalidRecurrence("INTERVAL must be >= 1".into()));
    }
    Ok(raw)
}

fn parse_until(val: &str) -> AlarmResult<AlarmDateTime> {
    if val.len() == 8 {
        NaiveDate::parse_from_str(val, "%Y%m%d")
            .map(AlarmDateTime::DateOnly)
            .map_err(|_| AlarmError::InvalidRecurrence("bad UNTIL date".into()))
    } else {
        chrono::NaiveDateTime::parse_from_str(val, "%Y%m%dT%H%M%SZ")
            .map(|n| AlarmDateTime::Timed(Utc.from_utc_datetime(&n)))
            .map_err(|_| AlarmError::InvalidRecurrence("bad UNTIL datetime".into()))
    }
}

impl Recurrence {
    /// Rejects recurrence strings the RRULE grammar does not accept. Used at
    /// the request boundary before the restricted parser interprets them.
    pub fn validate_rrule_syntax(rrule: &str, start: &AlarmDateTime) -> AlarmResult<()> {
        let seed = start.effective_utc();
        let body = rrule.trim().trim_start_matches("RRULE:");
        let spec = format!(
            "DTSTART:{}\nRRULE:{}\n",
            seed.format("%Y%m%dT%H%M%SZ"),
            body
        );
        rrule::RRuleSet::from_str(&spec)
            .map(|_| ())
            .map_err(|e| AlarmError::InvalidRecurrence(e.to_string()))
    }

    /// Reconstructs a recurrence from stored RRULE content lines, applying
    /// the format fixes older calendars need:
    /// - hourly rules become minutely;
    /// - surplus yearly BYMONTHDAY values are dropped;
    /// - a lone 60th-day-of-year rule becomes a Feb 29 / Mar 1 rule;
    /// - a last-day-of-February rule becomes a Feb 29 / Feb 28 rule;
    /// - a 29th-of-month rule paired with one of the above collapses into
    ///   the single internal February 29th form, keeping the shorter of the
    ///   two durations.
    pub fn from_rrule_strings(lines: &[String], start: AlarmDateTime) -> AlarmResult<Recurrence> {
        if lines.is_empty() {
            return Err(AlarmError::InvalidRecurrence("no RRULE present".into()));
        }
        let mut raws = Vec::with_capacity(lines.len());
        for l in lines {
            raws.push(parse_rrule_content(l)?);
        }

        // Recognise the stored February 29th pair.
        if raws.len() == 2 {
            let classify = |r: &RawRule| -> Option<Feb29Pair> {
                if r.freq != "YEARLY" {
                    return None;
                }
                if r.byyearday.first() == Some(&60) {
                    return Some(Feb29Pair::Feb(Feb29Policy::Mar1));
                }
                if r.bymonthday.first() == Some(&-1)
                    && r.bymonth.len() == 1
                    && r.bymonth[0] == 2
                {
                    return Some(Feb29Pair::Feb(Feb29Policy::Feb28));
                }
                if r.bymonthday.first() == Some(&29) {
                    return Some(Feb29Pair::TwentyNinth);
                }
                None
            };
            let c0 = classify(&raws[0]);
            let c1 = classify(&raws[1]);
            let pair = match (c0, c1) {
                (Some(Feb29Pair::TwentyNinth), Some(Feb29Pair::Feb(p))) => Some((0usize, 1usize, p)),
                (Some(Feb29Pair::Feb(p)), Some(Feb29Pair::TwentyNinth)) => Some((1, 0, p)),
                _ => None,
            };
            if let Some((day_idx, feb_idx, policy)) = pair {
                if raws[day_idx].interval == raws[feb_idx].interval {
                    return combine_feb29_pair(&raws[day_idx], &raws[feb_idx], policy, start);
                }
            }
        }

        // Otherwise only the first rule is used, as the restricted model
        // holds a single rule.
        let raw = &raws[0];
        build_single(raw, start)
    }
}

enum Feb29Pair {
    TwentyNinth,
    Feb(Feb29Policy),
}

fn raw_limit(raw: &RawRule) -> (i32, Option<AlarmDateTime>) {
    match (raw.count, &raw.until) {
        (Some(n), _) => (n as i32, None),
        (None, Some(u)) => (0, Some(*u)),
        (None, None) => (-1, None),
    }
}

fn build_single(raw: &RawRule, start: AlarmDateTime) -> AlarmResult<Recurrence> {
    let (count, until) = raw_limit(raw);
    let start_date = start.date();
    let rule = match raw.freq.as_str() {
        "MINUTELY" => RecurRule::Minutely { freq: raw.interval },
        // Older calendars stored hourly rules; they are carried forward as
        // minutely ones.
        "HOURLY" => RecurRule::Minutely {
            freq: raw.interval.saturating_mul(60),
        },
        "DAILY" => {
            let mut days = WeekdayMask::empty();
            for (week, wd) in &raw.byday {
                if *week == 0 {
                    days.0[*wd] = true;
                }
            }
            RecurRule::Daily {
                freq: raw.interval,
                days,
            }
        }
        "WEEKLY" => {
            let mut days = WeekdayMask::empty();
            for (week, wd) in &raw.byday {
                if *week == 0 {
                    days.0[*wd] = true;
                }
            }
            if days.is_empty() {
                days = WeekdayMask::single(start_date.weekday());
            }
            RecurRule::Weekly {
                freq: raw.interval,
                days,
            }
        }
        "MONTHLY" => {
            if !raw.byday.is_empty() {
                RecurRule::MonthlyByPos {
                    freq: raw.interval,
                    positions: group_positions(&raw.byday),
                }
            } else {
                let day = raw
                    .bymonthday
                    .first()
                    .copied()
                    .unwrap_or(start_date.day() as i32);
                RecurRule::MonthlyByDay {
                    freq: raw.interval,
                    day: clamp_monthday(day)?,
                }
            }
        }
        "YEARLY" => {
            if raw.byyearday.first() == Some(&60) {
                RecurRule::AnnualByDate {
                    freq: raw.interval,
                    months: vec![2],
                    day: 29,
                    feb29: Feb29Policy::Mar1,
                }
            } else if !raw.byday.is_empty() {
                let months = if raw.bymonth.is_empty() {
                    vec![start_date.month()]
                } else {
                    raw.bymonth.clone()
                };
                RecurRule::AnnualByPos {
                    freq: raw.interval,
                    months,
                    positions: group_positions(&raw.byday),
                }
            } else {
                let months = if raw.bymonth.is_empty() {
                    vec![start_date.month()]
                } else {
                    raw.bymonth.clone()
                };
                // Surplus BYMONTHDAY values are dropped; only the first is
                // meaningful in this model.
                let day = raw
                    .bymonthday
                    .first()
                    .copied()
                    .unwrap_or(start_date.day() as i32);
                if day == -1 && months == vec![2] {
                    RecurRule::AnnualByDate {
                        freq: raw.interval,
                        months: vec![2],
                        day: 29,
                        feb29: Feb29Policy::Feb28,
                    }
                } else {
                    RecurRule::AnnualByDate {
                        freq: raw.interval,
                        months,
                        day: clamp_monthday(day)?,
                        feb29: Feb29Policy::Feb29,
                    }
                }
            }
        }
        other => {
            return Err(AlarmError::InvalidRecurrence(format!(
                "unsupported frequency {}",
                other
            )));
        }
    };
    Recurrence::new(rule, start, count, until)
}

fn clamp_monthday(day: i32) -> AlarmResult<i8> {
    if day == -1 || (1..=31).contains(&day) {
        Ok(day as i8)
    } else {
        Err(AlarmError::InvalidRecurrence(format!(
            "invalid BYMONTHDAY {}",
            day
        )))
    }
}

fn group_positions(byday: &[(i8, usize)]) -> Vec<MonthPos> {
    let mut out: Vec<MonthPos> = Vec::new();
    for (week, wd) in byday {
        if *week == 0 {
            continue;
        }
        if let Some(pos) = out.iter_mut().find(|p| p.week == *week) {
            pos.days.0[*wd] = true;
        } else {
            let mut days = WeekdayMask::empty();
            days.0[*wd] = true;
            out.push(MonthPos { week: *week, days });
        }
    }
    out
}

/// Merges the stored two-rule February 29th representation back into the
/// internal single rule. The combined duration is the shorter of the two.
fn combine_feb29_pair(
    day_rule: &RawRule,
    feb_rule: &RawRule,
    policy: Feb29Policy,
    start: AlarmDateTime,
) -> AlarmResult<Recurrence> {
    let mut months: Vec<u32> = day_rule.bymonth.clone();
    if !months.contains(&2) {
        months.push(2);
    }
    months.sort_unstable();
    months.dedup();

    let rule = RecurRule::AnnualByDate {
        freq: day_rule.interval,
        months: months.clone(),
        day: 29,
        feb29: policy,
    };

    let (c1, u1) = raw_limit(day_rule);
    let (c2, u2) = raw_limit(feb_rule);
    if c1 == -1 && c2 == -1 {
        return Recurrence::new(rule, start, -1, None);
    }

    // Resolve each rule's end; a rule whose UNTIL sits at the start
    // contributed no occurrences and is ignored for the combination.
    let end_of = |count: i32,
                  until: &Option<AlarmDateTime>,
                  months: Vec<u32>,
                  pol: Feb29Policy|
     -> AlarmResult<Option<AlarmDateTime>> {
        match (count, until) {
            (-1, _) => Ok(None),
            (0, Some(u)) => Ok(Some(*u)),
            (0, None) => Err(AlarmError::InvalidRecurrence(
                "rule has neither COUNT nor UNTIL".into(),
            )),
            (n, _) => {
                let sub = Recurrence::new(
                    RecurRule::AnnualByDate {
                        freq: day_rule.interval,
                        months,
                        day: 29,
                        feb29: pol,
                    },
                    start,
                    n,
                    None,
                )?;
                Ok(sub.end_datetime())
            }
        }
    };

    let others: Vec<u32> = months.iter().copied().filter(|m| *m != 2).collect();
    let end1 = end_of(c1, &u1, others, Feb29Policy::Feb29)?;
    let end2 = end_of(c2, &u2, vec![2], policy)?;

    let start_date = start.date();
    let degenerate = |e: &Option<AlarmDateTime>| match e {
        Some(v) => v.date() <= start_date,
        None => false,
    };
    let combined_end = match (end1, end2) {
        (None, None) => None,
        (Some(e), None) | (None, Some(e)) => Some(e),
        (Some(e1), Some(e2)) => {
            if degenerate(&end1) {
                Some(e2)
            } else if degenerate(&end2) {
                Some(e1)
            } else {
                Some(e1.min(e2))
            }
        }
    };

    match combined_end {
        None => Recurrence::new(rule, start, -1, None),
        Some(end) => {
            if c1 > 0 || c2 > 0 {
                // Both sides were counted: rebuild the total over the merged
                // occurrence stream.
                let probe = Recurrence::new(rule.clone(), start, 0, Some(end))?;
                let total = probe.iter().count() as i32;
                if total > 0 {
                    Recurrence::new(rule, start, total, None)
                } else {
                    Recurrence::new(rule, start, 0, Some(end))
                }
            } else {
                Recurrence::new(rule, start, 0, Some(end))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> AlarmDateTime {
        AlarmDateTime::DateOnly(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    fn timed(y: i32, m: u32, d: u32, h: u32, min: u32) -> AlarmDateTime {
        AlarmDateTime::Timed(Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap())
    }

    #[test]
    fn weekly_next_lands_on_masked_day() {
        let mut days = WeekdayMask::empty();
        days.set(Weekday::Mon);
        days.set(Weekday::Thu);
        let rec = Recurrence::new(
            RecurRule::Weekly { freq: 1, days },
            date(2025, 6, 2), // a Monday
            -1,
            None,
        )
        .unwrap();
        let next = rec.next_after(&date(2025, 6, 2)).unwrap();
        assert_eq!(next, date(2025, 6, 5));
        let after = rec.next_after(&date(2025, 6, 5)).unwrap();
        assert_eq!(after, date(2025, 6, 9));
    }

    #[test]
    fn count_limit_is_exact() {
        let rec = Recurrence::new(
            RecurRule::Daily {
                freq: 1,
                days: WeekdayMask::empty(),
            },
            timed(2025, 1, 1, 9, 0),
            3,
            None,
        )
        .unwrap();
        let all: Vec<_> = rec.iter().collect();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2], timed(2025, 1, 3, 9, 0));
        assert!(rec.next_after(&timed(2025, 1, 3, 9, 0)).is_none());
    }

    #[test]
    fn feb29_pair_roundtrip() {
        let rec = Recurrence::new(
            RecurRule::AnnualByDate {
                freq: 1,
                months: vec![2],
                day: 29,
                feb29: Feb29Policy::Mar1,
            },
            date(2024, 2, 29),
            -1,
            None,
        )
        .unwrap();
        let lines = rec.to_rrule_strings();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("BYYEARDAY=60"));
        let back = Recurrence::from_rrule_strings(&lines, date(2024, 2, 29)).unwrap();
        assert_eq!(back.feb29_policy(), Some(Feb29Policy::Mar1));
    }

    #[test]
    fn hourly_rules_are_read_as_minutely() {
        let rec = Recurrence::from_rrule_strings(
            &["FREQ=HOURLY;INTERVAL=2".to_string()],
            timed(2025, 1, 1, 8, 0),
        )
        .unwrap();
        assert_eq!(rec.rule(), &RecurRule::Minutely { freq: 120 });
    }
}
