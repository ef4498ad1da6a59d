// Round-trip stability of the stored calendar form, and UID category
// tagging.
use chrono::{NaiveDate, TimeZone, Utc};
use tocsin::model::adapter::IcsAdapter;
use tocsin::model::datetime::AlarmDateTime;
use tocsin::model::event::{
    Action, AudioSettings, EmailAddress, Event, EventCategory,
};
use tocsin::model::recurrence::{RecurRule, Recurrence, WeekdayMask};

fn timed(y: i32, m: u32, d: u32, h: u32, min: u32) -> AlarmDateTime {
    AlarmDateTime::Timed(Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap())
}

/// The stored form modulo the DTSTAMP line, which records serialisation
/// time.
fn stable_form(ics: &str) -> String {
    ics.lines()
        .filter(|l| !l.starts_with("DTSTAMP"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn assert_roundtrip_stable(event: &Event) {
    let first = IcsAdapter::to_ics(event);
    let parsed = IcsAdapter::from_ics(&first).unwrap();
    let second = IcsAdapter::to_ics(&parsed);
    assert_eq!(stable_form(&first), stable_form(&second));
}

#[test]
fn message_alarm_roundtrip_is_stable() {
    let mut e = Event::new(
        Action::Message("Water the plants;\nboth shelves, too".into()),
        timed(2025, 6, 1, 9, 0),
    );
    e.late_cancel = 10;
    e.auto_close = true;
    e.bg_colour = Some("#202030".into());
    e.fg_colour = Some("#f0f0f0".into());
    e.set_reminder(15, true);
    e.set_repetition(30, 2).unwrap();
    e.archive = true;
    assert_roundtrip_stable(&e);
}

#[test]
fn command_and_email_alarm_roundtrip() {
    let mut cmd = Event::new(
        Action::Command {
            command: "fetchmail --all".into(),
            script: false,
        },
        timed(2025, 6, 1, 7, 30),
    );
    cmd.exec_in_terminal = true;
    assert_roundtrip_stable(&cmd);

    let email = Event::new(
        Action::Email {
            from_id: 2,
            to: vec![
                EmailAddress::new("ops@example.org"),
                EmailAddress {
                    name: "On Call".into(),
                    address: "oncall@example.org".into(),
                },
            ],
            subject: "backup finished".into(),
            body: "See attached log.".into(),
            attachments: vec!["/var/log/backup.log".into()],
            bcc: true,
        },
        timed(2025, 6, 1, 23, 0),
    );
    assert_roundtrip_stable(&email);
    let parsed = IcsAdapter::from_ics(&IcsAdapter::to_ics(&email)).unwrap();
    match parsed.action {
        Action::Email { to, bcc, .. } => {
            assert_eq!(to.len(), 2);
            assert_eq!(to[1].name, "On Call");
            assert!(bcc);
        }
        other => panic!("unexpected action {:?}", other),
    }
}

#[test]
fn audio_alarm_roundtrip_keeps_volume() {
    let e = Event::new(
        Action::Audio(AudioSettings {
            file: "/home/u/chime.ogg".into(),
            volume: Some(0.75),
            fade_volume: Some(0.1),
            fade_seconds: 10,
            repeat_pause: Some(30),
        }),
        timed(2025, 6, 1, 6, 45),
    );
    let parsed = IcsAdapter::from_ics(&IcsAdapter::to_ics(&e)).unwrap();
    match parsed.action {
        Action::Audio(a) => {
            assert_eq!(a.volume, Some(0.75));
            assert_eq!(a.fade_seconds, 10);
            assert_eq!(a.repeat_pause, Some(30));
        }
        other => panic!("unexpected action {:?}", other),
    }
    assert_roundtrip_stable(&e);
}

#[test]
fn date_only_event_roundtrip() {
    let start = AlarmDateTime::DateOnly(NaiveDate::from_ymd_opt(2025, 12, 24).unwrap());
    let mut e = Event::new(Action::Message("pack presents".into()), start);
    let rec = Recurrence::new(
        RecurRule::AnnualByDate {
            freq: 1,
            months: vec![12],
            day: 24,
            feb29: Default::default(),
        },
        start,
        -1,
        None,
    )
    .unwrap();
    e.set_recurrence(Some(rec));
    let parsed = IcsAdapter::from_ics(&IcsAdapter::to_ics(&e)).unwrap();
    assert!(parsed.start.is_date_only());
    assert!(parsed.next_main.is_date_only());
    assert_eq!(parsed.recurrence, e.recurrence);
    assert_roundtrip_stable(&e);
}

#[test]
fn recurrence_survives_storage() {
    let start = timed(2025, 6, 2, 9, 0);
    let mut e = Event::new(Action::Message("weekly sync".into()), start);
    let mut days = WeekdayMask::empty();
    days.set(chrono::Weekday::Mon);
    days.set(chrono::Weekday::Wed);
    let rec = Recurrence::new(RecurRule::Weekly { freq: 2, days }, start, 10, None).unwrap();
    e.set_recurrence(Some(rec.clone()));

    let parsed = IcsAdapter::from_ics(&IcsAdapter::to_ics(&e)).unwrap();
    assert_eq!(parsed.recurrence.as_ref(), Some(&rec));
}

#[test]
fn category_is_tagged_through_the_uid() {
    let mut e = Event::new(Action::Message("old".into()), timed(2025, 1, 1, 8, 0));
    let active_uid = e.uid.clone();
    e.set_category(EventCategory::Archived);
    assert_ne!(e.uid, active_uid);

    let parsed = IcsAdapter::from_ics(&IcsAdapter::to_ics(&e)).unwrap();
    assert_eq!(parsed.category, EventCategory::Archived);
    assert_eq!(EventCategory::from_uid(&parsed.uid), EventCategory::Archived);
}

#[test]
fn deferral_and_flags_roundtrip() {
    let start = timed(2025, 6, 1, 9, 0);
    let mut e = Event::new(Action::Message("review".into()), start);
    e.deferral = Some(tocsin::model::event::Deferral {
        time: timed(2025, 6, 1, 9, 45),
        reminder: false,
    });
    e.at_login = true;
    e.work_time_only = true;
    e.exclude_holidays = true;
    e.enabled = false;
    e.pre_action = Some("pkill -USR1 statusbar".into());
    e.post_action = Some("pkill -USR2 statusbar".into());
    e.cancel_on_pre_error = true;

    let parsed = IcsAdapter::from_ics(&IcsAdapter::to_ics(&e)).unwrap();
    assert_eq!(parsed.deferral, e.deferral);
    assert!(parsed.at_login);
    assert!(parsed.work_time_only);
    assert!(parsed.exclude_holidays);
    assert!(!parsed.enabled);
    assert_eq!(parsed.pre_action, e.pre_action);
    assert_eq!(parsed.post_action, e.post_action);
    assert!(parsed.cancel_on_pre_error);
}
