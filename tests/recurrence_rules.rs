// General recurrence engine behaviour: stepping, terminators, masks, and
// the longest-interval computation the scheduler uses to bound searches.
use chrono::{NaiveDate, TimeZone, Utc, Weekday};
use tocsin::model::datetime::AlarmDateTime;
use tocsin::model::recurrence::{MonthPos, RecurRule, Recurrence, WeekdayMask};

fn timed(y: i32, m: u32, d: u32, h: u32, min: u32) -> AlarmDateTime {
    AlarmDateTime::Timed(Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap())
}

fn date(y: i32, m: u32, d: u32) -> AlarmDateTime {
    AlarmDateTime::DateOnly(NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

fn mask(days: &[Weekday]) -> WeekdayMask {
    let mut m = WeekdayMask::empty();
    for d in days {
        m.set(*d);
    }
    m
}

#[test]
fn minutely_steps_from_start() {
    let rec = Recurrence::new(
        RecurRule::Minutely { freq: 20 },
        timed(2025, 6, 1, 9, 0),
        -1,
        None,
    )
    .unwrap();
    assert_eq!(
        rec.next_after(&timed(2025, 6, 1, 9, 0)).unwrap(),
        timed(2025, 6, 1, 9, 20)
    );
    assert_eq!(
        rec.next_after(&timed(2025, 6, 1, 9, 30)).unwrap(),
        timed(2025, 6, 1, 9, 40)
    );
    assert_eq!(
        rec.prev_before(&timed(2025, 6, 1, 9, 40)).unwrap(),
        timed(2025, 6, 1, 9, 20)
    );
}

#[test]
fn finite_count_yields_exactly_count_occurrences() {
    let rec = Recurrence::new(
        RecurRule::Weekly {
            freq: 1,
            days: mask(&[Weekday::Mon]),
        },
        date(2025, 6, 2),
        5,
        None,
    )
    .unwrap();
    // Walk via next_after, as the scheduler does.
    let mut seen = Vec::new();
    let mut cursor = date(2025, 6, 1);
    while let Some(next) = rec.next_after(&cursor) {
        seen.push(next);
        cursor = next;
    }
    assert_eq!(seen.len(), 5);
    assert_eq!(seen[0], date(2025, 6, 2));
    assert_eq!(seen[4], date(2025, 6, 30));
}

#[test]
fn no_occurrence_hides_between_consecutive_results() {
    let rec = Recurrence::new(
        RecurRule::Daily {
            freq: 3,
            days: WeekdayMask::empty(),
        },
        timed(2025, 6, 1, 7, 0),
        -1,
        None,
    )
    .unwrap();
    let a = rec.next_after(&timed(2025, 6, 1, 7, 0)).unwrap();
    assert_eq!(a, timed(2025, 6, 4, 7, 0));
    // Probing anywhere inside the gap returns the same next occurrence.
    assert_eq!(rec.next_after(&timed(2025, 6, 2, 12, 0)).unwrap(), a);
    assert_eq!(rec.next_after(&timed(2025, 6, 3, 23, 59)).unwrap(), a);
}

#[test]
fn until_terminator_is_inclusive_bound() {
    let rec = Recurrence::new(
        RecurRule::Daily {
            freq: 1,
            days: WeekdayMask::empty(),
        },
        date(2025, 6, 1),
        0,
        Some(date(2025, 6, 3)),
    )
    .unwrap();
    assert!(rec.next_after(&date(2025, 6, 2)).is_some());
    assert!(rec.next_after(&date(2025, 6, 3)).is_none());
    assert_eq!(rec.end_datetime().unwrap(), date(2025, 6, 3));
}

#[test]
fn monthly_last_day_resolves_per_month() {
    let rec = Recurrence::new(
        RecurRule::MonthlyByDay { freq: 1, day: -1 },
        date(2025, 1, 31),
        -1,
        None,
    )
    .unwrap();
    assert_eq!(rec.next_after(&date(2025, 1, 31)).unwrap(), date(2025, 2, 28));
    assert_eq!(rec.next_after(&date(2025, 2, 28)).unwrap(), date(2025, 3, 31));
}

#[test]
fn monthly_day31_skips_short_months() {
    let rec = Recurrence::new(
        RecurRule::MonthlyByDay { freq: 1, day: 31 },
        date(2025, 1, 31),
        -1,
        None,
    )
    .unwrap();
    assert_eq!(rec.next_after(&date(2025, 1, 31)).unwrap(), date(2025, 3, 31));
}

#[test]
fn monthly_by_position_finds_nth_weekday() {
    // Second Tuesday of each month.
    let rec = Recurrence::new(
        RecurRule::MonthlyByPos {
            freq: 1,
            positions: vec![MonthPos {
                week: 2,
                days: mask(&[Weekday::Tue]),
            }],
        },
        date(2025, 6, 10),
        -1,
        None,
    )
    .unwrap();
    assert_eq!(rec.next_after(&date(2025, 6, 10)).unwrap(), date(2025, 7, 8));
    // Last Friday of each month.
    let rec = Recurrence::new(
        RecurRule::MonthlyByPos {
            freq: 1,
            positions: vec![MonthPos {
                week: -1,
                days: mask(&[Weekday::Fri]),
            }],
        },
        date(2025, 6, 27),
        -1,
        None,
    )
    .unwrap();
    assert_eq!(rec.next_after(&date(2025, 6, 27)).unwrap(), date(2025, 7, 25));
}

#[test]
fn occurs_on_respects_rule_and_limits() {
    let rec = Recurrence::new(
        RecurRule::Weekly {
            freq: 2,
            days: mask(&[Weekday::Wed]),
        },
        date(2025, 6, 4),
        3,
        None,
    )
    .unwrap();
    assert!(rec.occurs_on(NaiveDate::from_ymd_opt(2025, 6, 4).unwrap()));
    assert!(!rec.occurs_on(NaiveDate::from_ymd_opt(2025, 6, 11).unwrap()));
    assert!(rec.occurs_on(NaiveDate::from_ymd_opt(2025, 6, 18).unwrap()));
    // The 4th Wednesday is beyond the count of 3.
    assert!(!rec.occurs_on(NaiveDate::from_ymd_opt(2025, 7, 16).unwrap()));
}

// --- longest_interval ---

#[test]
fn longest_interval_simple_kinds() {
    let rec = Recurrence::new(
        RecurRule::Minutely { freq: 45 },
        timed(2025, 6, 1, 0, 0),
        -1,
        None,
    )
    .unwrap();
    assert_eq!(rec.longest_interval(), 45);

    let rec = Recurrence::new(
        RecurRule::Daily {
            freq: 3,
            days: WeekdayMask::empty(),
        },
        date(2025, 6, 1),
        -1,
        None,
    )
    .unwrap();
    assert_eq!(rec.longest_interval(), 3 * 1440);

    let rec = Recurrence::new(
        RecurRule::MonthlyByDay { freq: 2, day: 15 },
        date(2025, 6, 15),
        -1,
        None,
    )
    .unwrap();
    assert_eq!(rec.longest_interval(), 2 * 31 * 1440);
}

#[test]
fn longest_interval_weekly_masked() {
    // Monday and Thursday, weekly: gaps of 3 and 4 days; longest is 4.
    let rec = Recurrence::new(
        RecurRule::Weekly {
            freq: 1,
            days: mask(&[Weekday::Mon, Weekday::Thu]),
        },
        date(2025, 6, 2),
        -1,
        None,
    )
    .unwrap();
    assert_eq!(rec.longest_interval(), 4 * 1440);

    // Fortnightly on Monday and Friday: span 4, longest gap 14*7... the
    // wrap-around dominates: (2*7 - 4) days.
    let rec = Recurrence::new(
        RecurRule::Weekly {
            freq: 2,
            days: mask(&[Weekday::Mon, Weekday::Fri]),
        },
        date(2025, 6, 2),
        -1,
        None,
    )
    .unwrap();
    assert_eq!(rec.longest_interval(), (2 * 7 - 4) * 1440);
}

#[test]
fn longest_interval_annual_months() {
    // Single month: a full year.
    let rec = Recurrence::new(
        RecurRule::AnnualByDate {
            freq: 1,
            months: vec![6],
            day: 15,
            feb29: Default::default(),
        },
        date(2025, 6, 15),
        -1,
        None,
    )
    .unwrap();
    assert_eq!(rec.longest_interval(), 365 * 1440);

    // March and September: the wrap from September to March dominates.
    let rec = Recurrence::new(
        RecurRule::AnnualByDate {
            freq: 1,
            months: vec![3, 9],
            day: 1,
            feb29: Default::default(),
        },
        date(2025, 3, 1),
        -1,
        None,
    )
    .unwrap();
    // Sep 1 -> Mar 1 is the longer leg of the year.
    let sep_to_mar = 365 - 184; // days from 2001-03-01 to 2001-09-01 = 184
    assert_eq!(rec.longest_interval(), sep_to_mar.max(184) * 1440);
}

#[test]
fn daily_mask_that_never_matches_reports_zero() {
    // Every 7 days starting on a Monday, but only Tuesdays allowed: the
    // cycle can never land on a Tuesday.
    let rec = Recurrence::new(
        RecurRule::Daily {
            freq: 7,
            days: mask(&[Weekday::Tue]),
        },
        date(2025, 6, 2), // a Monday
        -1,
        None,
    )
    .unwrap();
    assert_eq!(rec.longest_interval(), 0);
    assert!(rec.next_after(&date(2025, 6, 2)).is_none());
}
