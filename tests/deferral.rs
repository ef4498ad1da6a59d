// Deferral limits and the defer / cancel-defer round trip.
use chrono::{TimeZone, Utc};
use tocsin::error::AlarmError;
use tocsin::model::datetime::AlarmDateTime;
use tocsin::model::event::{Action, DeferLimitKind, Event, TriggerKind};
use tocsin::model::recurrence::{RecurRule, Recurrence, WeekdayMask};

fn timed(y: i32, m: u32, d: u32, h: u32, min: u32) -> AlarmDateTime {
    AlarmDateTime::Timed(Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap())
}

/// Daily 09:00 event with a 30-minute reminder, as in the deferral-limit
/// scenario.
fn reminder_event() -> Event {
    let start = timed(2025, 6, 1, 9, 0);
    let mut e = Event::new(Action::Message("stand up".into()), start);
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
    e.set_reminder(30, false);
    e
}

#[test]
fn reminder_deferral_is_limited_by_the_main_alarm() {
    let e = reminder_event();
    let now = timed(2025, 6, 1, 8, 35);
    let (limit, kind) = e.deferral_limit(&now);
    assert_eq!(limit.unwrap(), timed(2025, 6, 1, 9, 0));
    assert_eq!(kind, DeferLimitKind::Main);
}

#[test]
fn defer_past_limit_is_rejected_and_leaves_event_unchanged() {
    let mut e = reminder_event();
    let now = timed(2025, 6, 1, 8, 35);
    let err = e
        .defer(&now, timed(2025, 6, 1, 10, 0), true, false)
        .unwrap_err();
    assert!(matches!(err, AlarmError::DeferralBeyondLimit));
    assert!(e.deferral.is_none());
}

#[test]
fn defer_within_limit_sets_reminder_deferral() {
    let mut e = reminder_event();
    let now = timed(2025, 6, 1, 8, 35);
    e.defer(&now, timed(2025, 6, 1, 8, 55), true, false).unwrap();
    let d = e.deferral.unwrap();
    assert!(d.reminder);
    assert_eq!(d.time, timed(2025, 6, 1, 8, 55));
    // The deferred reminder becomes the next trigger.
    assert_eq!(
        e.next_trigger(TriggerKind::All, None).unwrap(),
        timed(2025, 6, 1, 8, 55)
    );
}

#[test]
fn cancel_defer_restores_previous_triggers() {
    let mut e = reminder_event();
    let now = timed(2025, 6, 1, 8, 35);
    let before = e.clone();
    e.defer(&now, timed(2025, 6, 1, 8, 55), true, false).unwrap();
    e.cancel_defer();
    assert_eq!(e.deferral, before.deferral);
    assert_eq!(e.next_main, before.next_main);
    assert_eq!(
        e.next_trigger(TriggerKind::All, None),
        before.next_trigger(TriggerKind::All, None)
    );
}

#[test]
fn recurring_deferral_is_limited_by_next_occurrence() {
    let start = timed(2025, 6, 1, 9, 0);
    let mut e = Event::new(Action::Message("meds".into()), start);
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

    // Just after the 09:00 firing, deferral may not reach tomorrow 09:00.
    let now = timed(2025, 6, 1, 9, 5);
    let (limit, kind) = e.deferral_limit(&now);
    assert_eq!(limit.unwrap(), timed(2025, 6, 2, 9, 0));
    assert_eq!(kind, DeferLimitKind::Recurrence);
    assert!(e
        .defer(&now, timed(2025, 6, 2, 10, 0), false, false)
        .is_err());
    assert!(e
        .defer(&now, timed(2025, 6, 1, 12, 0), false, false)
        .is_ok());
}

#[test]
fn repetition_point_limits_deferral() {
    let start = timed(2025, 6, 1, 9, 0);
    let mut e = Event::new(Action::Message("sip water".into()), start);
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
    e.set_repetition(60, 3).unwrap();

    let now = timed(2025, 6, 1, 9, 5);
    let (limit, kind) = e.deferral_limit(&now);
    assert_eq!(limit.unwrap(), timed(2025, 6, 1, 10, 0));
    assert_eq!(kind, DeferLimitKind::Repetition);
}

#[test]
fn deferring_a_reminder_without_reminder_is_invalid() {
    let start = timed(2025, 6, 1, 9, 0);
    let mut e = Event::new(Action::Message("plain".into()), start);
    let now = timed(2025, 6, 1, 8, 0);
    assert!(e.defer(&now, timed(2025, 6, 1, 8, 30), true, false).is_err());
}
