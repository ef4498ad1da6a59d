// Core data structures for alarm events and their sub-alarms.
//
// An `Event` is a compound entity: one main alarm plus optional reminder,
// deferral, repeat-at-login, displaying, sound and pre-/post-action
// sub-alarms. Sub-alarms are views derived from the event state rather than
// stored separately; `alarm()`/`first_alarm()`/`next_alarm()` expose them in
// their processing order.

use chrono::{DateTime, Utc};
use strum::EnumIter;
use uuid::Uuid;

use crate::config::WorkSchedule;
use crate::error::{AlarmError, AlarmResult};
use crate::model::datetime::AlarmDateTime;
use crate::model::recurrence::Recurrence;
use crate::resource::ResourceId;

/// Upper bound on occurrences examined when searching for the next trigger
/// inside working hours.
const MAX_WORK_SEARCH: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum EventCategory {
    Active,
    Archived,
    Template,
    Displaying,
}

impl EventCategory {
    /// UID suffix tagging the category. Active events carry a bare UID.
    pub fn uid_suffix(&self) -> &'static str {
        match self {
            EventCategory::Active => "",
            EventCategory::Archived => "-exp",
            EventCategory::Template => "-tmpl",
            EventCategory::Displaying => "-disp",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventCategory::Active => "active",
            EventCategory::Archived => "archived",
            EventCategory::Template => "template",
            EventCategory::Displaying => "displaying",
        }
    }

    pub fn from_uid(uid: &str) -> EventCategory {
        if uid.ends_with("-exp") {
            EventCategory::Archived
        } else if uid.ends_with("-tmpl") {
            EventCategory::Template
        } else if uid.ends_with("-disp") {
            EventCategory::Displaying
        } else {
            EventCategory::Active
        }
    }

    /// Rewrites a UID to carry this category's tag.
    pub fn tag_uid(&self, uid: &str) -> String {
        let base = uid
            .strip_suffix("-exp")
            .or_else(|| uid.strip_suffix("-tmpl"))
            .or_else(|| uid.strip_suffix("-disp"))
            .unwrap_or(uid);
        format!("{}{}", base, self.uid_suffix())
    }
}

/// Which command execution failed the last time the event triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandError {
    #[default]
    None,
    Main,
    Pre,
    Post,
    PrePost,
}

impl CommandError {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandError::None => "NONE",
            CommandError::Main => "MAIN",
            CommandError::Pre => "PRE",
            CommandError::Post => "POST",
            CommandError::PrePost => "PRE_POST",
        }
    }

    pub fn parse(s: &str) -> CommandError {
        match s {
            "MAIN" => CommandError::Main,
            "PRE" => CommandError::Pre,
            "POST" => CommandError::Post,
            "PRE_POST" => CommandError::PrePost,
            _ => CommandError::None,
        }
    }

    /// Merges a newly recorded failure into the existing state. Pre and
    /// post failures accumulate; otherwise the latest failure wins.
    pub fn merge(self, other: CommandError) -> CommandError {
        use CommandError::*;
        match (self, other) {
            (None, x) | (x, None) => x,
            (Pre, Post) | (Post, Pre) => PrePost,
            (PrePost, Pre) | (PrePost, Post) => PrePost,
            (_, x) => x,
        }
    }
}

/// The sub-alarm types an event can contain, in processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmKind {
    Main,
    Reminder,
    Deferred { reminder: bool },
    AtLogin,
    Displaying,
    Sound,
    PreAction,
    PostAction,
}

impl AlarmKind {
    pub fn rank(&self) -> u8 {
        match self {
            AlarmKind::Main => 0x01,
            AlarmKind::Reminder => 0x02,
            AlarmKind::Deferred { reminder: false } => 0x04,
            AlarmKind::Deferred { reminder: true } => 0x06,
            AlarmKind::AtLogin => 0x10,
            AlarmKind::Displaying => 0x20,
            AlarmKind::Sound => 0x30,
            AlarmKind::PreAction => 0x40,
            AlarmKind::PostAction => 0x50,
        }
    }

    fn ordered() -> [AlarmKind; 9] {
        [
            AlarmKind::Main,
            AlarmKind::Reminder,
            AlarmKind::Deferred { reminder: false },
            AlarmKind::Deferred { reminder: true },
            AlarmKind::AtLogin,
            AlarmKind::Displaying,
            AlarmKind::Sound,
            AlarmKind::PreAction,
            AlarmKind::PostAction,
        ]
    }
}

/// A derived view of one sub-alarm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAlarm {
    pub kind: AlarmKind,
    pub trigger: AlarmDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailAddress {
    pub name: String,
    pub address: String,
}

impl EmailAddress {
    pub fn new(address: &str) -> Self {
        EmailAddress {
            name: String::new(),
            address: address.to_string(),
        }
    }

    pub fn full(&self) -> String {
        if self.name.is_empty() {
            self.address.clone()
        } else {
            format!("{} <{}>", self.name, self.address)
        }
    }
}

/// Sound attached to a display alarm, or the payload of an audio alarm.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioSettings {
    pub file: String,
    /// 0.0..=1.0, None for the player default.
    pub volume: Option<f32>,
    pub fade_volume: Option<f32>,
    pub fade_seconds: u32,
    /// Pause in seconds between repeats; None = play once.
    pub repeat_pause: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Display a text message.
    Message(String),
    /// Display the contents of a file (URL or path).
    File(String),
    Command {
        command: String,
        /// The text is a script body rather than a command line.
        script: bool,
    },
    Email {
        from_id: u32,
        to: Vec<EmailAddress>,
        subject: String,
        body: String,
        attachments: Vec<String>,
        bcc: bool,
    },
    Audio(AudioSettings),
}

impl Action {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Action::Message(_) => "MESSAGE",
            Action::File(_) => "FILE",
            Action::Command { .. } => "COMMAND",
            Action::Email { .. } => "EMAIL",
            Action::Audio(_) => "AUDIO",
        }
    }
}

/// Sub-repetition: a burst of extra triggers after each main occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Repetition {
    pub interval_minutes: u32,
    pub count: u32,
}

impl Repetition {
    pub fn new(interval_minutes: u32, count: u32) -> Self {
        // A zero count means no sub-repetition even if an interval is given.
        if interval_minutes == 0 || count == 0 {
            Repetition::default()
        } else {
            Repetition {
                interval_minutes,
                count,
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.count > 0 && self.interval_minutes > 0
    }

    pub fn duration_minutes(&self) -> i64 {
        self.interval_minutes as i64 * self.count as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deferral {
    pub time: AlarmDateTime,
    /// True when a reminder, rather than the main alarm, was deferred.
    pub reminder: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayingState {
    pub kind_rank: u8,
    pub time: AlarmDateTime,
    pub resource: ResourceId,
    pub show_edit: bool,
    pub show_defer: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateInfo {
    pub name: String,
    /// "n minutes after default time", or None to use the template's time.
    pub after_time: Option<i32>,
}

/// What kind of occurrence `set_next_occurrence` selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccurKind {
    None,
    FirstOrOnly,
    RecurDate,
    RecurDateTime,
    LastRecur,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OccurType {
    pub kind: OccurKind,
    /// Set when a sub-repetition point, not a main occurrence, was selected.
    pub repeat: bool,
}

impl OccurType {
    pub fn none() -> Self {
        OccurType {
            kind: OccurKind::None,
            repeat: false,
        }
    }

    pub fn occurred(&self) -> bool {
        self.kind != OccurKind::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepetitionOption {
    Ignore,
    Return,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferLimitKind {
    None,
    Main,
    Recurrence,
    Repetition,
    Reminder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// Next trigger including reminders, ignoring working hours.
    All,
    /// Next main trigger, ignoring reminders and working hours.
    Main,
    /// Next trigger for display purposes (deferred reminders included,
    /// pending reminders excluded).
    Display,
    /// Next main trigger within working hours / outside holidays.
    Work,
    /// Next trigger of any kind within working hours / outside holidays.
    AllWork,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub uid: String,
    pub resource_id: Option<ResourceId>,
    pub category: EventCategory,
    /// DTSTART: the first scheduled date/time.
    pub start: AlarmDateTime,
    /// The next non-repetition trigger.
    pub next_main: AlarmDateTime,
    pub recurrence: Option<Recurrence>,
    pub repetition: Repetition,
    /// Index of the next due sub-repetition (0 = the main occurrence).
    pub next_repeat: u32,
    pub action: Action,

    // Presentation
    pub bg_colour: Option<String>,
    pub fg_colour: Option<String>,
    pub font: Option<String>,
    pub use_default_font: bool,
    pub beep: bool,
    pub speak: bool,
    pub confirm_ack: bool,
    pub auto_close: bool,
    /// Sound to play alongside a display alarm.
    pub sound: Option<AudioSettings>,

    pub reminder_minutes: u32,
    pub reminder_once_only: bool,
    /// The reminder for the current occurrence has already been shown.
    pub reminder_shown: bool,
    /// Original reminder period once it has expired, so edits can restore it.
    pub archive_reminder_minutes: u32,

    /// Minutes after the trigger beyond which the alarm is cancelled
    /// instead of shown. 0 = never cancel.
    pub late_cancel: u32,

    pub deferral: Option<Deferral>,
    pub defer_default_minutes: u32,

    pub at_login: bool,
    pub archive_at_login: bool,

    pub pre_action: Option<String>,
    pub post_action: Option<String>,
    pub cancel_on_pre_error: bool,

    pub enabled: bool,
    /// Archive rather than delete once the last occurrence has fired.
    pub archive: bool,
    pub copy_to_calendar: bool,
    pub exclude_holidays: bool,
    pub work_time_only: bool,
    pub display_command_output: bool,
    pub exec_in_terminal: bool,

    pub command_error: CommandError,
    /// SEQUENCE: bumped on every user edit.
    pub revision: u32,
    /// CREATED: when the event was created or archived.
    pub created: Option<DateTime<Utc>>,

    pub main_expired: bool,
    pub template: Option<TemplateInfo>,
    pub displaying: Option<DisplayingState>,
}

impl Event {
    pub fn new(action: Action, start: AlarmDateTime) -> Event {
        Event {
            uid: Uuid::new_v4().to_string(),
            resource_id: None,
            category: EventCategory::Active,
            start,
            next_main: start,
            recurrence: None,
            repetition: Repetition::default(),
            next_repeat: 0,
            action,
            bg_colour: None,
            fg_colour: None,
            font: None,
            use_default_font: true,
            beep: false,
            speak: false,
            confirm_ack: false,
            auto_close: false,
            sound: None,
            reminder_minutes: 0,
            reminder_once_only: false,
            reminder_shown: false,
            archive_reminder_minutes: 0,
            late_cancel: 0,
            deferral: None,
            defer_default_minutes: 0,
            at_login: false,
            archive_at_login: false,
            pre_action: None,
            post_action: None,
            cancel_on_pre_error: false,
            enabled: true,
            archive: false,
            copy_to_calendar: false,
            exclude_holidays: false,
            work_time_only: false,
            display_command_output: false,
            exec_in_terminal: false,
            command_error: CommandError::None,
            revision: 0,
            created: Some(Utc::now()),
            main_expired: false,
            template: None,
            displaying: None,
        }
    }

    pub fn is_template(&self) -> bool {
        self.template.is_some()
    }

    /// An event is valid if it has at least one live sub-alarm, and a lone
    /// repeat-at-login trigger does not count.
    pub fn is_valid(&self) -> bool {
        let kinds = self.present_alarms();
        !kinds.is_empty() && !(kinds.len() == 1 && kinds[0] == AlarmKind::AtLogin)
    }

    pub fn set_category(&mut self, category: EventCategory) {
        self.uid = category.tag_uid(&self.uid);
        self.category = category;
    }

    pub fn set_recurrence(&mut self, recurrence: Option<Recurrence>) {
        self.recurrence = recurrence;
        if let Some(rec) = &mut self.recurrence {
            rec.set_start(self.start);
        }
        self.set_first_recurrence();
    }

    pub fn set_repetition(&mut self, interval_minutes: u32, count: u32) -> AlarmResult<()> {
        let rep = Repetition::new(interval_minutes, count);
        if rep.is_active() {
            if let Some(rec) = &self.recurrence {
                // A sub-repetition burst longer than the recurrence gap
                // would overlap the next occurrence.
                if rep.duration_minutes() >= rec.longest_interval() && rec.longest_interval() > 0 {
                    return Err(AlarmError::InvalidEvent(
                        "sub-repetition would outlast the recurrence interval".into(),
                    ));
                }
            }
            if self.start.is_date_only() && rep.interval_minutes % (24 * 60) != 0 {
                return Err(AlarmError::InvalidEvent(
                    "sub-repetition of a date-only alarm must be in whole days".into(),
                ));
            }
        }
        self.repetition = rep;
        self.next_repeat = 0;
        Ok(())
    }

    pub fn set_reminder(&mut self, minutes: u32, once_only: bool) {
        self.reminder_minutes = minutes;
        self.reminder_once_only = once_only;
        if minutes > 0 {
            self.archive_reminder_minutes = 0;
        }
    }

    pub fn increment_revision(&mut self) {
        self.revision += 1;
    }

    // --- Trigger computation ---

    /// The active main trigger: `next_main` advanced by any due
    /// sub-repetition index.
    pub fn main_trigger(&self) -> AlarmDateTime {
        if self.next_repeat > 0 && self.repetition.is_active() {
            self.next_main
                .add_mins(self.next_repeat as i64 * self.repetition.interval_minutes as i64)
                .unwrap_or(self.next_main)
        } else {
            self.next_main
        }
    }

    /// The end of the current occurrence's sub-repetition burst.
    pub fn main_end_repeat_time(&self) -> AlarmDateTime {
        if self.repetition.is_active() {
            self.next_main
                .add_mins(self.repetition.duration_minutes())
                .unwrap_or(self.next_main)
        } else {
            self.next_main
        }
    }

    /// Trigger of the pending reminder, if one applies to the next
    /// occurrence.
    pub fn reminder_trigger(&self) -> Option<AlarmDateTime> {
        if self.reminder_minutes == 0 || self.main_expired || self.reminder_shown {
            return None;
        }
        if self.reminder_once_only && self.next_main != self.start {
            return None;
        }
        self.next_main.add_mins(-(self.reminder_minutes as i64))
    }

    /// Next trigger of the requested kind, or None when the event can no
    /// longer fire. `work` supplies working hours and holidays for the
    /// work-time kinds.
    pub fn next_trigger(
        &self,
        kind: TriggerKind,
        work: Option<&WorkSchedule>,
    ) -> Option<AlarmDateTime> {
        if self.category != EventCategory::Active || !self.enabled {
            return None;
        }
        let main = if self.main_expired {
            None
        } else {
            Some(self.main_trigger())
        };
        let deferred = self.deferral.map(|d| d.time);
        let reminder = self.reminder_trigger();

        let base = match kind {
            TriggerKind::Main => main,
            TriggerKind::Display => [deferred, main].into_iter().flatten().min(),
            TriggerKind::All | TriggerKind::AllWork | TriggerKind::Work => {
                let with_reminder = match kind {
                    TriggerKind::Work => [deferred, main].into_iter().flatten().min(),
                    _ => [deferred, reminder, main].into_iter().flatten().min(),
                };
                with_reminder
            }
        }?;

        match kind {
            TriggerKind::Work | TriggerKind::AllWork => {
                if !self.work_time_only && !self.exclude_holidays {
                    return Some(base);
                }
                let ws = work?;
                let mut candidates: Vec<AlarmDateTime> = Vec::new();
                // Deferrals are user-chosen times and fire regardless.
                if let Some(d) = deferred {
                    candidates.push(d);
                }
                if kind == TriggerKind::AllWork {
                    if let Some(r) = reminder {
                        if self.is_working_time(&r, ws) {
                            candidates.push(r);
                        }
                    }
                }
                candidates.extend(self.next_working_trigger(ws));
                candidates.into_iter().min()
            }
            _ => Some(base),
        }
    }

    /// Whether this event may fire at `t` given its working-time and
    /// holiday flags.
    pub fn is_working_time(&self, t: &AlarmDateTime, ws: &WorkSchedule) -> bool {
        if self.exclude_holidays && ws.holidays.contains(&t.date()) {
            return false;
        }
        if !self.work_time_only {
            return true;
        }
        ws.is_working_time(t)
    }

    /// Walks occurrences (and their sub-repetitions) forward until one lands
    /// inside working time. The search is bounded; a rule that can never
    /// satisfy the mask yields None.
    fn next_working_trigger(&self, ws: &WorkSchedule) -> Option<AlarmDateTime> {
        let mut main = self.next_main;
        let mut first_rep = self.next_repeat;
        let rep_count = if self.repetition.is_active() {
            self.repetition.count
        } else {
            0
        };
        for _ in 0..MAX_WORK_SEARCH {
            for k in first_rep..=rep_count {
                let t = if k == 0 {
                    main
                } else {
                    main.add_mins(k as i64 * self.repetition.interval_minutes as i64)?
                };
                if self.is_working_time(&t, ws) {
                    return Some(t);
                }
            }
            main = self.recurrence.as_ref()?.next_after(&main)?;
            first_rep = 0;
        }
        None
    }

    // --- Occurrence advancement ---

    /// Read-only query for the next occurrence strictly after `pre`.
    pub fn next_occurrence(
        &self,
        pre: &AlarmDateTime,
        opt: RepetitionOption,
    ) -> (OccurType, Option<AlarmDateTime>) {
        let recur_next = match &self.recurrence {
            Some(rec) => rec.next_after(pre),
            None => {
                if self.next_main > *pre {
                    Some(self.next_main)
                } else {
                    None
                }
            }
        };

        if opt == RepetitionOption::Return && self.repetition.is_active() {
            // A sub-repetition of the occurrence at or before `pre` may come
            // sooner than the next main occurrence.
            let prev = match &self.recurrence {
                Some(rec) => rec.prev_at_or_before(pre),
                None => {
                    if self.next_main <= *pre {
                        Some(self.next_main)
                    } else {
                        None
                    }
                }
            };
            if let Some(prev) = prev {
                let gap = prev.mins_to(pre);
                let interval = self.repetition.interval_minutes as i64;
                let k = gap / interval + 1;
                if k >= 1 && k <= self.repetition.count as i64 {
                    if let Some(point) = prev.add_mins(k * interval) {
                        if *pre < point && recur_next.map_or(true, |r| point < r) {
                            let mut occ = self.classify_occurrence(&prev);
                            occ.repeat = true;
                            return (occ, Some(point));
                        }
                    }
                }
            }
        }

        match recur_next {
            Some(next) => (self.classify_occurrence(&next), Some(next)),
            None => (OccurType::none(), None),
        }
    }

    /// Largest occurrence strictly before `after`.
    pub fn previous_occurrence(
        &self,
        after: &AlarmDateTime,
        include_repetitions: bool,
    ) -> Option<AlarmDateTime> {
        let prev = match &self.recurrence {
            Some(rec) => rec.prev_before(after),
            None => {
                if self.start < *after {
                    Some(self.start)
                } else {
                    None
                }
            }
        }?;
        if include_repetitions && self.repetition.is_active() {
            let gap = prev.mins_to(after);
            let interval = self.repetition.interval_minutes as i64;
            let k = ((gap - 1) / interval).min(self.repetition.count as i64);
            if k >= 1 {
                return prev.add_mins(k * interval);
            }
        }
        Some(prev)
    }

    fn classify_occurrence(&self, at: &AlarmDateTime) -> OccurType {
        let kind = if *at == self.start {
            OccurKind::FirstOrOnly
        } else {
            match &self.recurrence {
                Some(rec) => {
                    if rec.next_after(at).is_none() {
                        OccurKind::LastRecur
                    } else if at.is_date_only() {
                        OccurKind::RecurDate
                    } else {
                        OccurKind::RecurDateTime
                    }
                }
                None => OccurKind::FirstOrOnly,
            }
        };
        OccurType {
            kind,
            repeat: false,
        }
    }

    /// Advances `next_main` to the smallest occurrence at or after `t`,
    /// resetting the sub-repetition index. If a sub-repetition point of the
    /// current occurrence covers `t`, the index is bumped instead and the
    /// result carries the repeat flag.
    pub fn set_next_occurrence(&mut self, t: &AlarmDateTime) -> OccurType {
        if self.next_main >= *t {
            return self.classify_occurrence(&self.next_main);
        }

        if self.repetition.is_active() {
            let gap_secs = self.next_main.secs_to(t);
            let interval_secs = self.repetition.interval_minutes as i64 * 60;
            // Smallest index whose point is at or after t.
            let k = (gap_secs + interval_secs - 1) / interval_secs;
            if k >= 1 && k <= self.repetition.count as i64 {
                self.next_repeat = k as u32;
                let mut occ = self.classify_occurrence(&self.next_main);
                occ.repeat = true;
                return occ;
            }
        }

        match &self.recurrence {
            Some(rec) => match rec.next_at_or_after(t) {
                Some(next) => {
                    self.next_main = next;
                    self.next_repeat = 0;
                    self.reminder_shown = false;
                    self.classify_occurrence(&next)
                }
                None => {
                    self.main_expired = true;
                    self.next_repeat = 0;
                    OccurType::none()
                }
            },
            None => {
                self.main_expired = true;
                self.next_repeat = 0;
                OccurType::none()
            }
        }
    }

    /// Snaps `next_main` to the first date/time the recurrence rule actually
    /// generates.
    pub fn set_first_recurrence(&mut self) {
        if let Some(rec) = &self.recurrence {
            if let Some(first) = rec.iter().next() {
                self.next_main = first;
                self.next_repeat = 0;
            }
        }
    }

    pub fn occurs_after(&self, t: &AlarmDateTime, include_repetitions: bool) -> bool {
        let opt = if include_repetitions {
            RepetitionOption::Return
        } else {
            RepetitionOption::Ignore
        };
        self.next_occurrence(t, opt).1.is_some()
    }

    // --- Deferral ---

    /// The latest time the alarm may currently be deferred to, with the
    /// limiting factor.
    pub fn deferral_limit(&self, now: &AlarmDateTime) -> (Option<AlarmDateTime>, DeferLimitKind) {
        let mut limit = None;
        let mut kind = DeferLimitKind::None;

        if self.recurrence.is_some() || self.repetition.is_active() {
            let (occ, when) = self.next_occurrence(now, RepetitionOption::Return);
            if let Some(t) = when {
                limit = Some(t);
                kind = if occ.repeat {
                    DeferLimitKind::Repetition
                } else {
                    DeferLimitKind::Recurrence
                };
            }
        }

        // A pending reminder may not be deferred past its own main alarm.
        if self.reminder_minutes > 0 && *now < self.next_main {
            if limit.is_none_or(|l| self.next_main <= l) {
                limit = Some(self.next_main);
                kind = DeferLimitKind::Main;
            }
        } else if self.reminder_minutes > 0 && !self.reminder_once_only {
            // Deferral must leave room for the next occurrence's reminder.
            if let Some(l) = limit {
                if let Some(r) = l.add_mins(-(self.reminder_minutes as i64)) {
                    if *now < r {
                        limit = Some(r);
                        kind = DeferLimitKind::Reminder;
                    }
                }
            }
        }

        (limit, kind)
    }

    /// Defers the alarm (or its reminder) to `dt`.
    pub fn defer(
        &mut self,
        now: &AlarmDateTime,
        dt: AlarmDateTime,
        reminder: bool,
        adjust_recurrence: bool,
    ) -> AlarmResult<()> {
        if self.category == EventCategory::Archived {
            return Err(AlarmError::ReadOnly);
        }
        if reminder && self.reminder_minutes == 0 && self.archive_reminder_minutes == 0 {
            return Err(AlarmError::InvalidEvent(
                "no reminder exists to defer".into(),
            ));
        }
        let (limit, _) = self.deferral_limit(now);
        if let Some(l) = limit {
            if dt > l {
                return Err(AlarmError::DeferralBeyondLimit);
            }
        }
        self.deferral = Some(Deferral { time: dt, reminder });
        if adjust_recurrence && !reminder {
            let probe = dt.add_secs(1).unwrap_or(dt);
            if self.main_trigger() <= dt {
                self.set_next_occurrence(&probe);
            }
        }
        Ok(())
    }

    /// Removes the deferral, restoring the previous trigger state.
    pub fn cancel_defer(&mut self) {
        self.deferral = None;
    }

    // --- Sub-alarm views ---

    fn present_alarms(&self) -> Vec<AlarmKind> {
        AlarmKind::ordered()
            .into_iter()
            .filter(|k| self.alarm(*k).is_some())
            .collect()
    }

    pub fn alarm(&self, kind: AlarmKind) -> Option<SubAlarm> {
        let trigger = match kind {
            AlarmKind::Main => {
                if self.main_expired {
                    return None;
                }
                Some(self.main_trigger())
            }
            AlarmKind::Reminder => self.reminder_trigger(),
            AlarmKind::Deferred { reminder } => match self.deferral {
                Some(d) if d.reminder == reminder => Some(d.time),
                _ => None,
            },
            AlarmKind::AtLogin => {
                if self.at_login {
                    Some(self.main_trigger())
                } else {
                    return None;
                }
            }
            AlarmKind::Displaying => self.displaying.as_ref().map(|d| d.time),
            AlarmKind::Sound => {
                if self.sound.is_some() {
                    Some(self.main_trigger())
                } else {
                    return None;
                }
            }
            AlarmKind::PreAction => {
                if self.pre_action.is_some() {
                    Some(self.main_trigger())
                } else {
                    return None;
                }
            }
            AlarmKind::PostAction => {
                if self.post_action.is_some() {
                    Some(self.main_trigger())
                } else {
                    return None;
                }
            }
        }?;
        Some(SubAlarm { kind, trigger })
    }

    pub fn first_alarm(&self) -> Option<SubAlarm> {
        AlarmKind::ordered()
            .into_iter()
            .find_map(|k| self.alarm(k))
    }

    /// The next sub-alarm after `prev` in processing order.
    pub fn next_alarm(&self, prev: AlarmKind) -> Option<SubAlarm> {
        AlarmKind::ordered()
            .into_iter()
            .filter(|k| k.rank() > prev.rank())
            .find_map(|k| self.alarm(k))
    }

    /// Removes one expired sub-alarm, adjusting the related state.
    pub fn remove_expired_alarm(&mut self, kind: AlarmKind) {
        match kind {
            AlarmKind::Main => {
                self.main_expired = true;
            }
            AlarmKind::Reminder => {
                if self.reminder_minutes > 0 {
                    self.archive_reminder_minutes = self.reminder_minutes;
                    self.reminder_minutes = 0;
                }
            }
            AlarmKind::Deferred { .. } => {
                self.deferral = None;
            }
            AlarmKind::AtLogin => {
                if self.at_login {
                    self.at_login = false;
                    self.archive_at_login = true;
                }
            }
            AlarmKind::Displaying => {
                self.displaying = None;
            }
            AlarmKind::Sound => {
                self.sound = None;
            }
            AlarmKind::PreAction => {
                self.pre_action = None;
            }
            AlarmKind::PostAction => {
                self.post_action = None;
            }
        }
    }

    // --- Displaying calendar support ---

    /// Builds the copy stored in the displaying calendar while this event's
    /// window is open.
    pub fn displaying_copy(
        src: &Event,
        kind: AlarmKind,
        resource: ResourceId,
        when: AlarmDateTime,
        show_edit: bool,
        show_defer: bool,
    ) -> Event {
        let mut copy = src.clone();
        copy.set_category(EventCategory::Displaying);
        copy.resource_id = None;
        copy.displaying = Some(DisplayingState {
            kind_rank: kind.rank(),
            time: when,
            resource,
            show_edit,
            show_defer,
        });
        copy
    }

    /// Inverse of `displaying_copy`: recovers the original event identity
    /// and the display attributes.
    pub fn reinstate_from_displaying(mut self) -> (Event, Option<ResourceId>, bool, bool) {
        let state = self.displaying.take();
        self.set_category(EventCategory::Active);
        match state {
            Some(s) => (self, Some(s.resource), s.show_edit, s.show_defer),
            None => (self, None, false, false),
        }
    }

    /// Whether the alarm is past the point of display: the main alarm has
    /// expired with no deferral pending.
    pub fn is_expired(&self) -> bool {
        (self.main_expired && self.deferral.is_none())
            || self.category == EventCategory::Archived
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn timed(y: i32, m: u32, d: u32, h: u32, min: u32) -> AlarmDateTime {
        AlarmDateTime::Timed(Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap())
    }

    #[test]
    fn category_retagging_rewrites_uid() {
        let mut e = Event::new(Action::Message("hi".into()), timed(2025, 6, 1, 9, 0));
        let base = e.uid.clone();
        e.set_category(EventCategory::Archived);
        assert_eq!(e.uid, format!("{}-exp", base));
        assert_eq!(EventCategory::from_uid(&e.uid), EventCategory::Archived);
        e.set_category(EventCategory::Active);
        assert_eq!(e.uid, base);
    }

    #[test]
    fn repetition_with_zero_count_is_inert() {
        let mut e = Event::new(Action::Message("hi".into()), timed(2025, 6, 1, 9, 0));
        e.set_repetition(10, 0).unwrap();
        assert!(!e.repetition.is_active());
        assert_eq!(e.main_trigger(), e.next_main);
    }

    #[test]
    fn sub_alarm_ordering() {
        let mut e = Event::new(Action::Message("hi".into()), timed(2025, 6, 1, 9, 0));
        e.reminder_minutes = 15;
        e.pre_action = Some("true".into());
        let first = e.first_alarm().unwrap();
        assert_eq!(first.kind, AlarmKind::Main);
        let second = e.next_alarm(first.kind).unwrap();
        assert_eq!(second.kind, AlarmKind::Reminder);
        let third = e.next_alarm(second.kind).unwrap();
        assert_eq!(third.kind, AlarmKind::PreAction);
    }

    #[test]
    fn date_only_events_keep_date_only_triggers() {
        let d = AlarmDateTime::DateOnly(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
        let e = Event::new(Action::Message("hi".into()), d);
        assert!(e.main_trigger().is_date_only());
    }
}
