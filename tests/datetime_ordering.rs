// Ordering and arithmetic of the date-or-datetime value.
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use tocsin::model::datetime::{set_start_of_day, AlarmDateTime};

fn date(y: i32, m: u32, d: u32) -> AlarmDateTime {
    AlarmDateTime::DateOnly(NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

fn timed(y: i32, m: u32, d: u32, h: u32, min: u32) -> AlarmDateTime {
    AlarmDateTime::Timed(Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap())
}

#[test]
fn date_only_pairs_compare_by_date() {
    assert!(date(2025, 6, 1) < date(2025, 6, 2));
    assert_eq!(date(2025, 6, 1), date(2025, 6, 1));
}

#[test]
fn timed_pairs_compare_by_instant() {
    assert!(timed(2025, 6, 1, 8, 0) < timed(2025, 6, 1, 9, 0));
}

#[test]
fn mixed_comparison_uses_start_of_day() {
    // With the start-of-day at 09:00, a date-only alarm for the day sits
    // at 09:00 local; times either side order accordingly. This test owns
    // the process-wide start-of-day setting for this binary.
    set_start_of_day(NaiveTime::from_hms_opt(9, 0, 0).unwrap());
    let d = date(2025, 6, 1);
    let effective = d.effective_utc();
    let before = AlarmDateTime::Timed(effective - chrono::Duration::hours(1));
    let after = AlarmDateTime::Timed(effective + chrono::Duration::hours(1));
    assert!(before < d);
    assert!(d < after);
    set_start_of_day(NaiveTime::MIN);
}

#[test]
fn calendar_aware_month_arithmetic() {
    let jan31 = date(2025, 1, 31);
    // Chrono clamps to the end of February.
    assert_eq!(jan31.add_months(1).unwrap(), date(2025, 2, 28));
    assert_eq!(date(2024, 2, 29).add_years(1).unwrap(), date(2025, 2, 28));
    assert_eq!(date(2024, 2, 29).add_years(4).unwrap(), date(2028, 2, 29));
}

#[test]
fn differences_are_whole_days_when_either_side_is_date_only() {
    let a = date(2025, 6, 1);
    // Noon UTC keeps the local calendar date stable across time zones.
    let b = timed(2025, 6, 3, 12, 0);
    assert_eq!(a.days_to(&b), 2);
    assert_eq!(a.secs_to(&b), 2 * 24 * 3600);

    let t1 = timed(2025, 6, 1, 9, 0);
    let t2 = timed(2025, 6, 1, 10, 30);
    assert_eq!(t1.mins_to(&t2), 90);
}

#[test]
fn second_arithmetic_on_dates_rounds_down() {
    let d = date(2025, 6, 1);
    assert_eq!(d.add_secs(86_399).unwrap(), d);
    assert_eq!(d.add_secs(86_400).unwrap(), date(2025, 6, 2));
    assert_eq!(d.add_mins(23 * 60).unwrap(), d);
}
