// Central model module re-exports to make types available as `crate::model::*`.

pub mod adapter;
pub mod datetime;
pub mod event;
pub mod recurrence;

pub use adapter::{FormatCompat, IcsAdapter, CALENDAR_VERSION};
pub use datetime::{set_start_of_day, start_of_day, AlarmDateTime};
pub use event::{
    Action, AlarmKind, AudioSettings, CommandError, DeferLimitKind, Deferral, DisplayingState,
    EmailAddress, Event, EventCategory, OccurKind, OccurType, Repetition, RepetitionOption,
    SubAlarm, TemplateInfo, TriggerKind,
};
pub use recurrence::{Feb29Policy, MonthPos, RecurLimit, RecurRule, Recurrence, WeekdayMask};
