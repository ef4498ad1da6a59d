// Tests for yearly February 29th recurrences and their fallback policies.
use chrono::{NaiveDate, TimeZone, Utc};
use tocsin::model::datetime::AlarmDateTime;
use tocsin::model::recurrence::{Feb29Policy, RecurRule, Recurrence};

fn timed(y: i32, m: u32, d: u32, h: u32, min: u32) -> AlarmDateTime {
    AlarmDateTime::Timed(Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap())
}

fn feb29(policy: Feb29Policy) -> Recurrence {
    Recurrence::new(
        RecurRule::AnnualByDate {
            freq: 1,
            months: vec![2],
            day: 29,
            feb29: policy,
        },
        timed(2024, 2, 29, 8, 0),
        -1,
        None,
    )
    .unwrap()
}

#[test]
fn feb28_policy_falls_back_in_non_leap_years() {
    let rec = feb29(Feb29Policy::Feb28);
    // Spec scenario: next after 2024-03-01 is Feb 28th 2025.
    let next = rec.next_after(&timed(2024, 3, 1, 0, 0)).unwrap();
    assert_eq!(next, timed(2025, 2, 28, 8, 0));
    // And the next leap year gets the real 29th again.
    let next = rec.next_after(&timed(2027, 12, 31, 23, 59)).unwrap();
    assert_eq!(next, timed(2028, 2, 29, 8, 0));
}

#[test]
fn mar1_policy_falls_forward_in_non_leap_years() {
    let rec = feb29(Feb29Policy::Mar1);
    let next = rec.next_after(&timed(2024, 3, 1, 0, 0)).unwrap();
    assert_eq!(next, timed(2025, 3, 1, 8, 0));
}

#[test]
fn strict_policy_skips_non_leap_years() {
    let rec = feb29(Feb29Policy::Feb29);
    let next = rec.next_after(&timed(2024, 3, 1, 0, 0)).unwrap();
    assert_eq!(next, timed(2028, 2, 29, 8, 0));
}

#[test]
fn start_on_fallback_day_is_reanchored_to_leap_feb29() {
    // An event "recurring on Feb 29th, shown on Feb 28th" whose stored
    // start sits on 2025-02-28 must reference the previous real Feb 29th.
    let rec = Recurrence::new(
        RecurRule::AnnualByDate {
            freq: 1,
            months: vec![2],
            day: 29,
            feb29: Feb29Policy::Feb28,
        },
        timed(2025, 2, 28, 8, 0),
        -1,
        None,
    )
    .unwrap();
    assert_eq!(rec.start().date(), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
}

#[test]
fn compound_pair_is_written_and_read_back() {
    // Feb 29th combined with the 29th of other months stores as two rules.
    let rec = Recurrence::new(
        RecurRule::AnnualByDate {
            freq: 1,
            months: vec![2, 5],
            day: 29,
            feb29: Feb29Policy::Mar1,
        },
        timed(2024, 2, 29, 8, 0),
        -1,
        None,
    )
    .unwrap();
    let lines = rec.to_rrule_strings();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().any(|l| l.contains("BYMONTH=5") && l.contains("BYMONTHDAY=29")));
    assert!(lines.iter().any(|l| l.contains("BYYEARDAY=60")));

    let back = Recurrence::from_rrule_strings(&lines, timed(2024, 2, 29, 8, 0)).unwrap();
    assert_eq!(back.feb29_policy(), Some(Feb29Policy::Mar1));
    match back.rule() {
        RecurRule::AnnualByDate { months, day, .. } => {
            assert_eq!(months, &vec![2, 5]);
            assert_eq!(*day, 29);
        }
        other => panic!("unexpected rule {:?}", other),
    }
    // May 29th and March 1st (for 2025) both occur.
    assert_eq!(
        back.next_after(&timed(2024, 3, 1, 0, 0)).unwrap(),
        timed(2024, 5, 29, 8, 0)
    );
    assert_eq!(
        back.next_after(&timed(2025, 1, 1, 0, 0)).unwrap(),
        timed(2025, 3, 1, 8, 0)
    );
}

#[test]
fn last_day_of_february_rule_reads_as_feb28_policy() {
    let back = Recurrence::from_rrule_strings(
        &["FREQ=YEARLY;BYMONTH=2;BYMONTHDAY=-1".to_string()],
        timed(2024, 2, 29, 8, 0),
    )
    .unwrap();
    assert_eq!(back.feb29_policy(), Some(Feb29Policy::Feb28));
}

#[test]
fn combined_pair_duration_takes_the_shorter() {
    // The 29th-of-May rule ends in 2026, the February rule in 2032; the
    // combined recurrence must not outlive 2026.
    let lines = vec![
        "FREQ=YEARLY;BYMONTH=5;BYMONTHDAY=29;UNTIL=20260601T000000Z".to_string(),
        "FREQ=YEARLY;BYYEARDAY=60;UNTIL=20320601T000000Z".to_string(),
    ];
    let rec = Recurrence::from_rrule_strings(&lines, timed(2024, 2, 29, 8, 0)).unwrap();
    let end = rec.end_datetime().unwrap();
    assert!(end <= timed(2026, 6, 1, 0, 0));
}

#[test]
fn occurrence_sequence_is_strictly_increasing() {
    let rec = feb29(Feb29Policy::Feb28);
    let mut prev = None;
    for occ in rec.iter().take(10) {
        if let Some(p) = prev {
            assert!(occ > p);
        }
        prev = Some(occ);
    }
}
