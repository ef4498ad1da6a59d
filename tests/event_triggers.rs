// Event-level trigger computation: sub-repetition, occurrence advancement,
// reminders, and working-time masking.
use chrono::{Datelike, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use tocsin::config::WorkSchedule;
use tocsin::model::datetime::AlarmDateTime;
use tocsin::model::event::{
    Action, AlarmKind, Event, OccurKind, RepetitionOption, TriggerKind,
};
use tocsin::model::recurrence::{RecurRule, Recurrence, WeekdayMask};

fn timed(y: i32, m: u32, d: u32, h: u32, min: u32) -> AlarmDateTime {
    AlarmDateTime::Timed(Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap())
}

fn daily_event(start: AlarmDateTime) -> Event {
    let mut e = Event::new(Action::Message("daily".into()), start);
    let rec = Recurrence::new(
        RecurRule::Daily {
            freq: 1,
            days: WeekdayMask::empty(),
        },
        start,
        -1,
        None,
    )
    .unwrap();
    e.set_recurrence(Some(rec));
    e
}

#[test]
fn sub_repetition_advances_index_then_recurrence() {
    // Spec scenario: next_main = T, repeat every 10 minutes, 3 times.
    let t = timed(2025, 6, 1, 9, 0);
    let mut e = daily_event(t);
    e.set_repetition(10, 3).unwrap();

    // Fire at T: the next point is the first sub-repetition.
    let occ = e.set_next_occurrence(&timed(2025, 6, 1, 9, 0).add_secs(1).unwrap());
    assert!(occ.repeat);
    assert_eq!(e.next_repeat, 1);
    assert_eq!(e.next_main, t);
    assert_eq!(e.main_trigger(), timed(2025, 6, 1, 9, 10));

    // After the third repetition the recurrence advances.
    let occ = e.set_next_occurrence(&timed(2025, 6, 1, 9, 30).add_secs(1).unwrap());
    assert!(!occ.repeat);
    assert_eq!(e.next_repeat, 0);
    assert_eq!(e.next_main, timed(2025, 6, 2, 9, 0));
    assert_eq!(occ.kind, OccurKind::RecurDateTime);
}

#[test]
fn zero_count_repetition_never_produces_points() {
    let t = timed(2025, 6, 1, 9, 0);
    let mut e = daily_event(t);
    e.set_repetition(10, 0).unwrap();
    let occ = e.set_next_occurrence(&t.add_secs(1).unwrap());
    assert!(!occ.repeat);
    assert_eq!(e.next_main, timed(2025, 6, 2, 9, 0));
}

#[test]
fn non_recurring_event_expires_after_advance() {
    let t = timed(2025, 6, 1, 9, 0);
    let mut e = Event::new(Action::Message("once".into()), t);
    let occ = e.set_next_occurrence(&t.add_secs(1).unwrap());
    assert_eq!(occ.kind, OccurKind::None);
    assert!(e.main_expired);
    assert!(e.is_expired());
    assert!(e.next_trigger(TriggerKind::All, None).is_none());
}

#[test]
fn first_occurrence_classification() {
    let t = timed(2025, 6, 1, 9, 0);
    let e = daily_event(t);
    let (occ, when) = e.next_occurrence(&timed(2025, 5, 31, 0, 0), RepetitionOption::Ignore);
    assert_eq!(occ.kind, OccurKind::FirstOrOnly);
    assert_eq!(when.unwrap(), t);
}

#[test]
fn reminder_trigger_precedes_main() {
    let t = timed(2025, 6, 1, 9, 0);
    let mut e = daily_event(t);
    e.set_reminder(30, false);
    assert_eq!(
        e.next_trigger(TriggerKind::All, None).unwrap(),
        timed(2025, 6, 1, 8, 30)
    );
    // The display trigger excludes pending reminders.
    assert_eq!(e.next_trigger(TriggerKind::Display, None).unwrap(), t);
    // Once shown, the reminder stops contributing for this occurrence.
    e.reminder_shown = true;
    assert_eq!(e.next_trigger(TriggerKind::All, None).unwrap(), t);
}

#[test]
fn once_only_reminder_skips_later_occurrences() {
    let t = timed(2025, 6, 1, 9, 0);
    let mut e = daily_event(t);
    e.set_reminder(30, true);
    assert!(e.reminder_trigger().is_some());
    e.set_next_occurrence(&t.add_secs(1).unwrap());
    assert!(e.reminder_trigger().is_none());
}

#[test]
fn work_time_only_moves_trigger_to_working_hours() {
    let ws = WorkSchedule {
        days: [true, true, true, true, true, false, false],
        start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        end: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
        holidays: Default::default(),
    };
    // Saturday 2025-06-07: a daily date-only alarm restricted to working
    // time must move to Monday.
    let start = AlarmDateTime::DateOnly(NaiveDate::from_ymd_opt(2025, 6, 7).unwrap());
    let mut e = Event::new(Action::Message("standup".into()), start);
    let rec = Recurrence::new(
        RecurRule::Daily {
            freq: 1,
            days: WeekdayMask::empty(),
        },
        start,
        -1,
        None,
    )
    .unwrap();
    e.set_recurrence(Some(rec));
    e.work_time_only = true;

    let trigger = e.next_trigger(TriggerKind::Work, Some(&ws)).unwrap();
    assert_eq!(trigger.date(), NaiveDate::from_ymd_opt(2025, 6, 9).unwrap());
    assert_eq!(trigger.date().weekday(), Weekday::Mon);
}

#[test]
fn holiday_exclusion_skips_the_day() {
    let mut holidays = std::collections::BTreeSet::new();
    holidays.insert(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
    let ws = WorkSchedule {
        days: [true; 7],
        start: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
        end: NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
        holidays,
    };
    let start = AlarmDateTime::DateOnly(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
    let mut e = Event::new(Action::Message("hi".into()), start);
    let rec = Recurrence::new(
        RecurRule::Daily {
            freq: 1,
            days: WeekdayMask::empty(),
        },
        start,
        -1,
        None,
    )
    .unwrap();
    e.set_recurrence(Some(rec));
    e.exclude_holidays = true;
    let trigger = e.next_trigger(TriggerKind::Work, Some(&ws)).unwrap();
    assert_eq!(trigger.date(), NaiveDate::from_ymd_opt(2025, 6, 3).unwrap());
}

#[test]
fn sub_alarm_iteration_follows_processing_order() {
    let t = timed(2025, 6, 1, 9, 0);
    let mut e = daily_event(t);
    e.set_reminder(15, false);
    e.at_login = true;
    e.post_action = Some("notify-send done".into());

    let kinds: Vec<AlarmKind> = std::iter::successors(e.first_alarm(), |prev| {
        e.next_alarm(prev.kind)
    })
    .map(|a| a.kind)
    .collect();
    assert_eq!(
        kinds,
        vec![
            AlarmKind::Main,
            AlarmKind::Reminder,
            AlarmKind::AtLogin,
            AlarmKind::PostAction
        ]
    );
}

#[test]
fn removing_expired_reminder_archives_its_period() {
    let t = timed(2025, 6, 1, 9, 0);
    let mut e = daily_event(t);
    e.set_reminder(20, false);
    e.remove_expired_alarm(AlarmKind::Reminder);
    assert_eq!(e.reminder_minutes, 0);
    assert_eq!(e.archive_reminder_minutes, 20);
}
