// The scheduling request surface.
//
// External callers (the command line today; an IPC layer would sit in the
// same seam) describe an alarm with a `ScheduleRequest`; the engine turns
// it into an event, picks a destination resource and stores it. Recurrence
// comes either as a raw RRULE string, validated against the RRULE grammar
// before the restricted parser interprets it, or as a simple
// (period, interval, count-or-end) tuple.

use crate::config::Config;
use crate::error::{AlarmError, AlarmResult};
use crate::model::datetime::AlarmDateTime;
use crate::model::event::{Action, Event};
use crate::model::recurrence::{RecurRule, Recurrence, WeekdayMask};
use chrono::Datelike;

/// CLI exit codes for the request surface.
pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const INVALID_ARGS: i32 = 1;
    pub const SCHEDULING_FAILED: i32 = 2;
    pub const IO_ERROR: i32 = 3;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodKind {
    Minutely,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl PeriodKind {
    pub fn parse(s: &str) -> Option<PeriodKind> {
        match s.to_lowercase().as_str() {
            "minutely" => Some(PeriodKind::Minutely),
            "daily" => Some(PeriodKind::Daily),
            "weekly" => Some(PeriodKind::Weekly),
            "monthly" => Some(PeriodKind::Monthly),
            "yearly" | "annually" => Some(PeriodKind::Yearly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RecurrenceSpec {
    /// A serialised RFC 5545 RRULE.
    RRule(String),
    /// A simple repetition description; the rule details (weekday, day of
    /// month, month) come from the start date.
    Period {
        kind: PeriodKind,
        interval: u32,
        /// -1 = infinite, 0 = bounded by `end`, n > 0 = n occurrences.
        count: i32,
        end: Option<AlarmDateTime>,
    },
}

impl RecurrenceSpec {
    /// Builds the recurrence for a given start, validating the spec.
    pub fn into_recurrence(self, start: AlarmDateTime, config: &Config) -> AlarmResult<Recurrence> {
        match self {
            RecurrenceSpec::RRule(s) => {
                Recurrence::validate_rrule_syntax(&s, &start)?;
                Recurrence::from_rrule_strings(&[s], start)
            }
            RecurrenceSpec::Period {
                kind,
                interval,
                count,
                end,
            } => {
                let date = start.date();
                let rule = match kind {
                    PeriodKind::Minutely => RecurRule::Minutely { freq: interval },
                    PeriodKind::Daily => RecurRule::Daily {
                        freq: interval,
                        days: WeekdayMask::empty(),
                    },
                    PeriodKind::Weekly => RecurRule::Weekly {
                        freq: interval,
                        days: WeekdayMask::single(date.weekday()),
                    },
                    PeriodKind::Monthly => RecurRule::MonthlyByDay {
                        freq: interval,
                        day: date.day() as i8,
                    },
                    PeriodKind::Yearly => RecurRule::AnnualByDate {
                        freq: interval,
                        months: vec![date.month()],
                        day: date.day() as i8,
                        feb29: config.feb29_policy,
                    },
                };
                Recurrence::new(rule, start, count, end)
            }
        }
    }
}

/// Presentation and behaviour switches shared by the schedule_* methods.
#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    pub late_cancel: Option<u32>,
    pub auto_close: bool,
    pub beep: bool,
    pub speak: bool,
    pub confirm_ack: bool,
    pub at_login: bool,
    pub archive: bool,
    pub exclude_holidays: bool,
    pub work_time_only: bool,
    pub display_command_output: bool,
    pub exec_in_terminal: bool,
    pub bg_colour: Option<String>,
    pub fg_colour: Option<String>,
    pub font: Option<String>,
    pub audio_file: Option<String>,
    pub audio_volume: Option<f32>,
    pub reminder_minutes: u32,
    pub reminder_once_only: bool,
    pub recurrence: Option<RecurrenceSpec>,
    pub sub_repeat_interval: u32,
    pub sub_repeat_count: u32,
}

/// A fully described scheduling request, as produced by the schedule_*
/// surface methods.
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub action: Action,
    pub start: AlarmDateTime,
    pub options: ScheduleOptions,
}

impl ScheduleRequest {
    /// Builds the event this request describes. Fails without touching any
    /// resource if the recurrence or repetition is invalid.
    pub fn build_event(self, config: &Config) -> AlarmResult<Event> {
        let ScheduleRequest {
            action,
            start,
            options,
        } = self;
        let mut event = Event::new(action, start);
        event.late_cancel = options
            .late_cancel
            .unwrap_or(config.default_late_cancel);
        if options.auto_close && event.late_cancel == 0 {
            return Err(AlarmError::InvalidEvent(
                "auto-close requires a late-cancel period".into(),
            ));
        }
        event.auto_close = options.auto_close;
        event.beep = options.beep;
        event.speak = options.speak;
        event.confirm_ack = options.confirm_ack;
        event.at_login = options.at_login;
        event.archive = options.archive;
        event.exclude_holidays = options.exclude_holidays;
        event.work_time_only = options.work_time_only;
        event.display_command_output = options.display_command_output;
        event.exec_in_terminal = options.exec_in_terminal;
        event.bg_colour = options.bg_colour;
        event.fg_colour = options.fg_colour;
        event.use_default_font = options.font.is_none();
        event.font = options.font;
        if let Some(file) = options.audio_file {
            event.sound = Some(crate::model::event::AudioSettings {
                file,
                volume: options.audio_volume,
                ..Default::default()
            });
        }
        event.set_reminder(options.reminder_minutes, options.reminder_once_only);

        if let Some(spec) = options.recurrence {
            let recurrence = spec.into_recurrence(start, config)?;
            event.set_recurrence(Some(recurrence));
        }
        // A zero count means no sub-repetition even with an interval given.
        event.set_repetition(options.sub_repeat_interval, options.sub_repeat_count)?;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn start() -> AlarmDateTime {
        AlarmDateTime::Timed(Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap())
    }

    #[test]
    fn invalid_rrule_is_rejected() {
        let spec = RecurrenceSpec::RRule("FREQ=BOGUS".into());
        assert!(matches!(
            spec.into_recurrence(start(), &Config::default()),
            Err(AlarmError::InvalidRecurrence(_))
        ));
    }

    #[test]
    fn period_tuple_builds_weekly_on_start_weekday() {
        let spec = RecurrenceSpec::Period {
            kind: PeriodKind::Weekly,
            interval: 2,
            count: -1,
            end: None,
        };
        let rec = spec.into_recurrence(start(), &Config::default()).unwrap();
        match rec.rule() {
            RecurRule::Weekly { freq, days } => {
                assert_eq!(*freq, 2);
                // 2025-06-01 is a Sunday.
                assert!(days.contains(chrono::Weekday::Sun));
            }
            other => panic!("unexpected rule {:?}", other),
        }
    }

    #[test]
    fn auto_close_requires_late_cancel() {
        let req = ScheduleRequest {
            action: Action::Message("hi".into()),
            start: start(),
            options: ScheduleOptions {
                auto_close: true,
                ..Default::default()
            },
        };
        assert!(req.build_event(&Config::default()).is_err());
    }
}
