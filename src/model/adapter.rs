// Maps events to and from their stored iCalendar form.
//
// Each event is a VEVENT whose sub-alarms are VALARM components tagged with
// an X-TOCSIN-TYPE marker (MAIN, REMINDER, DEFERRAL, LOGIN, DISPLAYING,
// SOUND, PRE, POST). Sub-repetition is the MAIN alarm's REPEAT + DURATION.
// The calendar PRODID carries the format version; older versions get a
// migration pass on load (hourly recurrences become minutely, surplus
// yearly BYMONTHDAY values are dropped, and the stored February 29th rule
// pair collapses into the internal single-rule form).

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use icalendar::{Calendar, CalendarComponent, Component};
use log::warn;

use crate::error::{AlarmError, AlarmResult};
use crate::model::datetime::AlarmDateTime;
use crate::model::event::{
    Action, AudioSettings, Deferral, DisplayingState, EmailAddress, Event, EventCategory,
    Repetition, TemplateInfo,
};
use crate::model::recurrence::Recurrence;

/// Current on-disk calendar format version.
pub const CALENDAR_VERSION: u32 = 3;

fn prodid(version: u32) -> String {
    format!("-//TOCSIN//NONSGML Tocsin {}//EN", version)
}

/// Whether a calendar file's format can be used, after optional migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatCompat {
    /// Matches the current format.
    Current,
    /// Older format which the loader can migrate.
    Convertible,
    /// Was Convertible and has been rewritten in the current format.
    Converted,
    /// Newer than this build understands; mutations are blocked.
    Incompatible,
    #[default]
    Unknown,
}

impl FormatCompat {
    pub fn is_writable(&self) -> bool {
        matches!(self, FormatCompat::Current | FormatCompat::Converted)
    }
}

/// Extracts the format version from a calendar's PRODID line.
pub fn calendar_version(content: &str) -> Option<u32> {
    for line in content.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("PRODID:") {
            let marker = "Tocsin ";
            let idx = rest.find(marker)?;
            let tail = &rest[idx + marker.len()..];
            let end = tail.find("//").unwrap_or(tail.len());
            return tail[..end].trim().parse().ok();
        }
    }
    None
}

pub fn version_compat(version: Option<u32>) -> FormatCompat {
    match version {
        Some(v) if v == CALENDAR_VERSION => FormatCompat::Current,
        Some(v) if v < CALENDAR_VERSION => FormatCompat::Convertible,
        Some(_) => FormatCompat::Incompatible,
        None => FormatCompat::Unknown,
    }
}

// --- iCalendar TEXT value escaping ---

fn escape_text(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace(',', "\\,")
        .replace(';', "\\;")
}

fn unescape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') | Some('N') => out.push('\n'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn format_dt(dt: &AlarmDateTime) -> String {
    match dt {
        AlarmDateTime::DateOnly(d) => d.format("%Y%m%d").to_string(),
        AlarmDateTime::Timed(t) => t.format("%Y%m%dT%H%M%SZ").to_string(),
    }
}

fn dt_value_param(dt: &AlarmDateTime) -> &'static str {
    match dt {
        AlarmDateTime::DateOnly(_) => "DATE",
        AlarmDateTime::Timed(_) => "DATE-TIME",
    }
}

fn parse_dt(val: &str, is_date: bool) -> Option<AlarmDateTime> {
    let val = val.trim();
    if is_date || val.len() == 8 {
        NaiveDate::parse_from_str(val, "%Y%m%d")
            .ok()
            .map(AlarmDateTime::DateOnly)
    } else if val.ends_with('Z') {
        NaiveDateTime::parse_from_str(val, "%Y%m%dT%H%M%SZ")
            .ok()
            .map(|d| AlarmDateTime::Timed(Utc.from_utc_datetime(&d)))
    } else {
        NaiveDateTime::parse_from_str(val, "%Y%m%dT%H%M%S")
            .ok()
            .map(|d| {
                let dt = chrono::Local
                    .from_local_datetime(&d)
                    .earliest()
                    .unwrap_or_else(|| Utc.from_utc_datetime(&d).with_timezone(&chrono::Local));
                AlarmDateTime::Timed(dt.with_timezone(&Utc))
            })
    }
}

fn parse_utc(val: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(val.trim(), "%Y%m%dT%H%M%SZ")
        .ok()
        .map(|d| Utc.from_utc_datetime(&d))
}

/// Parses an iCal duration (subset: PnW / PnD / PTnHnM) into minutes.
fn parse_duration_minutes(val: &str) -> Option<i64> {
    let mut minutes: i64 = 0;
    let mut num_buf = String::new();
    let mut in_time = false;
    let mut seen_unit = false;
    for c in val.trim().trim_start_matches('-').chars() {
        match c {
            'P' | 'p' => {}
            'T' | 't' => in_time = true,
            d if d.is_ascii_digit() => num_buf.push(d),
            unit => {
                if num_buf.is_empty() {
                    return None;
                }
                let n: i64 = num_buf.parse().ok()?;
                match unit {
                    'W' | 'w' => minutes += n * 7 * 24 * 60,
                    'D' | 'd' => minutes += n * 24 * 60,
                    'H' | 'h' if in_time => minutes += n * 60,
                    'M' | 'm' if in_time => minutes += n,
                    'S' | 's' if in_time => minutes += n / 60,
                    _ => return None,
                }
                seen_unit = true;
                num_buf.clear();
            }
        }
    }
    if seen_unit { Some(minutes) } else { None }
}

fn format_duration_minutes(mins: i64) -> String {
    if mins % (24 * 60) == 0 {
        format!("P{}D", mins / (24 * 60))
    } else {
        format!("PT{}M", mins)
    }
}

// --- Event-level flag tokens ---

const FLAG_BEEP: &str = "BEEP";
const FLAG_SPEAK: &str = "SPEAK";
const FLAG_CONFIRM_ACK: &str = "CONFIRM_ACK";
const FLAG_AUTO_CLOSE: &str = "AUTO_CLOSE";
const FLAG_ARCHIVE: &str = "ARCHIVE";
const FLAG_COPY_CAL: &str = "COPY_CAL";
const FLAG_EXCL_HOLIDAYS: &str = "EXCL_HOLIDAYS";
const FLAG_WORK_TIME: &str = "WORK_TIME";
const FLAG_DISP_OUTPUT: &str = "DISP_OUTPUT";
const FLAG_XTERM: &str = "XTERM";
const FLAG_DISABLED: &str = "DISABLED";
const FLAG_OWN_FONT: &str = "OWN_FONT";
const FLAG_MAIN_EXPIRED: &str = "MAIN_EXPIRED";
const FLAG_ARCHIVE_LOGIN: &str = "ARCHIVE_LOGIN";
const FLAG_CANCEL_PRE_ERR: &str = "CANCEL_PRE_ERR";
const FLAG_REMINDER_SHOWN: &str = "REMINDER_SHOWN";

pub struct IcsAdapter;

impl IcsAdapter {
    // --- Writing ---

    /// Serialises one event as a complete single-event VCALENDAR.
    pub fn to_ics(event: &Event) -> String {
        let mut ics = Self::event_component(event);

        // Replace the library PRODID with ours so the format version is
        // recorded.
        ics = replace_prodid(&ics, CALENDAR_VERSION);
        ics
    }

    fn event_component(event: &Event) -> String {
        let mut ve = icalendar::Event::new();
        ve.add_property("UID", &event.uid);
        ve.summary(&Self::summary_of(event));
        ve.timestamp(Utc::now());

        {
            let mut p = icalendar::Property::new("DTSTART", format_dt(&event.start));
            if event.start.is_date_only() {
                p.add_parameter("VALUE", "DATE");
            }
            ve.append_property(p);
        }

        if let Some(created) = event.created {
            ve.add_property("CREATED", created.format("%Y%m%dT%H%M%SZ").to_string());
        }
        ve.add_property("SEQUENCE", event.revision.to_string());

        if let Some(rec) = &event.recurrence {
            for line in rec.to_rrule_strings() {
                ve.append_multi_property(icalendar::Property::new("RRULE", &line));
            }
        }

        let flags = Self::flag_tokens(event);
        if !flags.is_empty() {
            ve.add_property("X-TOCSIN-FLAGS", flags.join(";"));
        }
        if event.late_cancel > 0 {
            ve.add_property("X-TOCSIN-LATE-CANCEL", event.late_cancel.to_string());
        }
        if event.next_repeat > 0 {
            ve.add_property("X-TOCSIN-NEXT-REPEAT", event.next_repeat.to_string());
        }
        if event.archive_reminder_minutes > 0 {
            ve.add_property(
                "X-TOCSIN-ARCHIVE-REMINDER",
                event.archive_reminder_minutes.to_string(),
            );
        }
        if event.defer_default_minutes > 0 {
            ve.add_property(
                "X-TOCSIN-DEFER-DEFAULT",
                event.defer_default_minutes.to_string(),
            );
        }
        if event.bg_colour.is_some() || event.fg_colour.is_some() {
            ve.add_property(
                "X-TOCSIN-COLOUR",
                format!(
                    "{};{}",
                    event.bg_colour.clone().unwrap_or_default(),
                    event.fg_colour.clone().unwrap_or_default()
                ),
            );
        }
        if let Some(font) = &event.font {
            ve.add_property("X-TOCSIN-FONT", font);
        }
        if let Some(tmpl) = &event.template {
            let val = match tmpl.after_time {
                Some(n) => format!("{};AFTER={}", tmpl.name, n),
                None => tmpl.name.clone(),
            };
            ve.add_property("X-TOCSIN-TEMPLATE", val);
        }
        if let Some(d) = &event.displaying {
            ve.add_property(
                "X-TOCSIN-DISPLAYING",
                format!(
                    "{};{};{};{}",
                    d.resource,
                    d.kind_rank,
                    if d.show_edit { "EDIT" } else { "" },
                    if d.show_defer { "DEFER" } else { "" }
                ),
            );
            let mut p = icalendar::Property::new("X-TOCSIN-DISPLAY-TIME", format_dt(&d.time));
            p.add_parameter("VALUE", dt_value_param(&d.time));
            ve.append_property(p);
        }

        let mut calendar = Calendar::new();
        calendar.push(ve);
        let mut ics = calendar.to_string();

        // The icalendar crate has no VALARM object model, so alarm blocks
        // are spliced in verbatim before END:VEVENT.
        let alarms = Self::valarm_blocks(event);
        if !alarms.is_empty() {
            if let Some(idx) = ics.rfind("END:VEVENT") {
                let (head, tail) = ics.split_at(idx);
                let mut buffer = String::with_capacity(ics.len() + alarms.len() + 2);
                buffer.push_str(head);
                buffer.push_str(&alarms);
                buffer.push_str(tail);
                ics = buffer;
            }
        }
        ics
    }

    fn summary_of(event: &Event) -> String {
        if let Some(t) = &event.template {
            return t.name.clone();
        }
        match &event.action {
            Action::Message(text) => text.lines().next().unwrap_or("").to_string(),
            Action::File(url) => url.clone(),
            Action::Command { command, .. } => command.lines().next().unwrap_or("").to_string(),
            Action::Email { subject, .. } => subject.clone(),
            Action::Audio(a) => a.file.clone(),
        }
    }

    fn flag_tokens(event: &Event) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if event.beep {
            flags.push(FLAG_BEEP);
        }
        if event.speak {
            flags.push(FLAG_SPEAK);
        }
        if event.confirm_ack {
            flags.push(FLAG_CONFIRM_ACK);
        }
        if event.auto_close {
            flags.push(FLAG_AUTO_CLOSE);
        }
        if event.archive {
            flags.push(FLAG_ARCHIVE);
        }
        if event.copy_to_calendar {
            flags.push(FLAG_COPY_CAL);
        }
        if event.exclude_holidays {
            flags.push(FLAG_EXCL_HOLIDAYS);
        }
        if event.work_time_only {
            flags.push(FLAG_WORK_TIME);
        }
        if event.display_command_output {
            flags.push(FLAG_DISP_OUTPUT);
        }
        if event.exec_in_terminal {
            flags.push(FLAG_XTERM);
        }
        if !event.enabled {
            flags.push(FLAG_DISABLED);
        }
        if !event.use_default_font {
            flags.push(FLAG_OWN_FONT);
        }
        if event.main_expired {
            flags.push(FLAG_MAIN_EXPIRED);
        }
        if event.archive_at_login {
            flags.push(FLAG_ARCHIVE_LOGIN);
        }
        if event.cancel_on_pre_error {
            flags.push(FLAG_CANCEL_PRE_ERR);
        }
        if event.reminder_shown {
            flags.push(FLAG_REMINDER_SHOWN);
        }
        flags
    }

    fn valarm_blocks(event: &Event) -> String {
        let mut out = String::new();

        // MAIN: always present; it carries the action even once expired.
        {
            let mut block = ValarmWriter::new("MAIN");
            block.trigger_abs(&event.next_main);
            match &event.action {
                Action::Message(text) => {
                    block.line("ACTION", "DISPLAY");
                    block.text("DESCRIPTION", text);
                }
                Action::File(url) => {
                    block.line("ACTION", "DISPLAY");
                    block.text("DESCRIPTION", url);
                    block.line("X-TOCSIN-FILE", "TRUE");
                }
                Action::Command { command, script } => {
                    block.line("ACTION", "PROCEDURE");
                    block.text("DESCRIPTION", command);
                    if *script {
                        block.line("X-TOCSIN-SCRIPT", "TRUE");
                    }
                }
                Action::Email {
                    from_id,
                    to,
                    subject,
                    body,
                    attachments,
                    bcc,
                } => {
                    block.line("ACTION", "EMAIL");
                    block.text("SUMMARY", subject);
                    block.text("DESCRIPTION", body);
                    for addr in to {
                        block.line("ATTENDEE", &format!("MAILTO:{}", addr.full()));
                    }
                    for att in attachments {
                        block.line("ATTACH", att);
                    }
                    if *from_id > 0 {
                        block.line("X-TOCSIN-EMAIL-FROM", &from_id.to_string());
                    }
                    if *bcc {
                        block.line("X-TOCSIN-EMAIL-BCC", "TRUE");
                    }
                }
                Action::Audio(a) => {
                    block.line("ACTION", "AUDIO");
                    block.audio(a);
                }
            }
            if event.repetition.is_active() {
                block.line("REPEAT", &event.repetition.count.to_string());
                block.line(
                    "DURATION",
                    &format_duration_minutes(event.repetition.interval_minutes as i64),
                );
            }
            out.push_str(&block.finish());
        }

        if event.reminder_minutes > 0 {
            let mut block = ValarmWriter::new("REMINDER");
            block.line(
                "TRIGGER",
                &format!("-PT{}M", event.reminder_minutes),
            );
            if event.reminder_once_only {
                block.line("X-TOCSIN-ONCE", "TRUE");
            }
            out.push_str(&block.finish());
        }

        if let Some(d) = &event.deferral {
            let kind = if d.reminder {
                "REMINDER,DEFERRAL"
            } else {
                "DEFERRAL"
            };
            let mut block = ValarmWriter::new(kind);
            block.trigger_abs(&d.time);
            out.push_str(&block.finish());
        }

        if event.at_login {
            let mut block = ValarmWriter::new("LOGIN");
            block.trigger_abs(&event.next_main);
            out.push_str(&block.finish());
        }

        if event.displaying.is_some() {
            let mut block = ValarmWriter::new("DISPLAYING");
            block.trigger_abs(&event.next_main);
            out.push_str(&block.finish());
        }

        if let Some(a) = &event.sound {
            let mut block = ValarmWriter::new("SOUND");
            block.line("ACTION", "AUDIO");
            block.audio(a);
            out.push_str(&block.finish());
        }

        if let Some(cmd) = &event.pre_action {
            let mut block = ValarmWriter::new("PRE");
            block.line("ACTION", "PROCEDURE");
            block.text("DESCRIPTION", cmd);
            out.push_str(&block.finish());
        }

        if let Some(cmd) = &event.post_action {
            let mut block = ValarmWriter::new("POST");
            block.line("ACTION", "PROCEDURE");
            block.text("DESCRIPTION", cmd);
            out.push_str(&block.finish());
        }

        out
    }

    // --- Reading ---

    /// Parses a single-event VCALENDAR into the event model.
    pub fn from_ics(raw_ics: &str) -> AlarmResult<Event> {
        let calendar: Calendar = raw_ics
            .parse()
            .map_err(|e| AlarmError::InvalidEvent(format!("parse: {}", e)))?;

        let mut vevent = None;
        for component in &calendar.components {
            if let CalendarComponent::Event(e) = component {
                vevent = Some(e);
                break;
            }
        }
        let vevent = vevent.ok_or_else(|| AlarmError::InvalidEvent("no VEVENT found".into()))?;

        let get_prop = |key: &str| -> Option<String> {
            vevent.properties().get(key).map(|p| p.value().to_string())
        };

        let uid = get_prop("UID").unwrap_or_default();
        if uid.is_empty() {
            return Err(AlarmError::InvalidEvent("missing UID".into()));
        }

        let start = vevent
            .properties()
            .get("DTSTART")
            .and_then(|p| {
                let is_date = p
                    .params()
                    .get("VALUE")
                    .map(|v| v.value() == "DATE")
                    .unwrap_or(false);
                parse_dt(p.value(), is_date)
            })
            .ok_or_else(|| AlarmError::InvalidEvent("missing or invalid DTSTART".into()))?;

        let revision = get_prop("SEQUENCE")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);
        let created = get_prop("CREATED").and_then(|v| parse_utc(&v));

        // RRULEs and VALARMs are collected from the raw unfolded text; the
        // property map keeps only the last RRULE and has no alarm model.
        let unfolded = icalendar::parser::unfold(raw_ics);
        let mut rrules: Vec<String> = Vec::new();
        let mut in_valarm = false;
        for line in unfolded.lines() {
            let line = line.trim();
            if line == "BEGIN:VALARM" {
                in_valarm = true;
            } else if line == "END:VALARM" {
                in_valarm = false;
            } else if !in_valarm {
                if let Some(rest) = line.strip_prefix("RRULE:") {
                    rrules.push(rest.to_string());
                }
            }
        }

        let alarms = parse_valarm_blocks(&unfolded);
        let main = alarms
            .iter()
            .find(|a| a.has_type("MAIN"))
            .ok_or_else(|| AlarmError::InvalidEvent("event has no main alarm".into()))?;

        let action = main.to_action()?;
        let mut event = Event::new(action, start);
        event.uid = uid.clone();
        event.category = EventCategory::from_uid(&uid);
        event.revision = revision;
        event.created = created;
        event.next_main = main.trigger.unwrap_or(start);
        if let Some(rep) = main.repeat {
            if let Some(mins) = main.duration_minutes {
                event.repetition = Repetition::new(mins.max(0) as u32, rep);
            }
        }

        if !rrules.is_empty() {
            event.recurrence = Some(Recurrence::from_rrule_strings(&rrules, start)?);
        }

        for flag in get_prop("X-TOCSIN-FLAGS").unwrap_or_default().split(';') {
            match flag.trim() {
                FLAG_BEEP => event.beep = true,
                FLAG_SPEAK => event.speak = true,
                FLAG_CONFIRM_ACK => event.confirm_ack = true,
                FLAG_AUTO_CLOSE => event.auto_close = true,
                FLAG_ARCHIVE => event.archive = true,
                FLAG_COPY_CAL => event.copy_to_calendar = true,
                FLAG_EXCL_HOLIDAYS => event.exclude_holidays = true,
                FLAG_WORK_TIME => event.work_time_only = true,
                FLAG_DISP_OUTPUT => event.display_command_output = true,
                FLAG_XTERM => event.exec_in_terminal = true,
                FLAG_DISABLED => event.enabled = false,
                FLAG_OWN_FONT => event.use_default_font = false,
                FLAG_MAIN_EXPIRED => event.main_expired = true,
                FLAG_ARCHIVE_LOGIN => event.archive_at_login = true,
                FLAG_CANCEL_PRE_ERR => event.cancel_on_pre_error = true,
                FLAG_REMINDER_SHOWN => event.reminder_shown = true,
                _ => {}
            }
        }

        event.late_cancel = get_prop("X-TOCSIN-LATE-CANCEL")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        event.next_repeat = get_prop("X-TOCSIN-NEXT-REPEAT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        event.archive_reminder_minutes = get_prop("X-TOCSIN-ARCHIVE-REMINDER")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        event.defer_default_minutes = get_prop("X-TOCSIN-DEFER-DEFAULT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        if let Some(colour) = get_prop("X-TOCSIN-COLOUR") {
            let mut parts = colour.splitn(2, ';');
            let bg = parts.next().unwrap_or("").trim();
            let fg = parts.next().unwrap_or("").trim();
            event.bg_colour = (!bg.is_empty()).then(|| bg.to_string());
            event.fg_colour = (!fg.is_empty()).then(|| fg.to_string());
        }
        event.font = get_prop("X-TOCSIN-FONT");

        if let Some(tmpl) = get_prop("X-TOCSIN-TEMPLATE") {
            let mut parts = tmpl.splitn(2, ';');
            let name = parts.next().unwrap_or("").to_string();
            let after = parts
                .next()
                .and_then(|p| p.strip_prefix("AFTER="))
                .and_then(|v| v.parse().ok());
            event.template = Some(TemplateInfo {
                name,
                after_time: after,
            });
        }

        for alarm in &alarms {
            if alarm.has_type("REMINDER") && !alarm.has_type("DEFERRAL") {
                if let Some(mins) = alarm.trigger_rel_minutes {
                    event.reminder_minutes = (-mins).max(0) as u32;
                    event.reminder_once_only = alarm.prop("X-TOCSIN-ONCE").is_some();
                }
            } else if alarm.has_type("DEFERRAL") {
                if let Some(t) = alarm.trigger {
                    event.deferral = Some(Deferral {
                        time: t,
                        reminder: alarm.has_type("REMINDER"),
                    });
                }
            } else if alarm.has_type("LOGIN") {
                event.at_login = true;
            } else if alarm.has_type("SOUND") {
                event.sound = Some(alarm.to_audio());
            } else if alarm.has_type("PRE") {
                event.pre_action = alarm.description.clone();
            } else if alarm.has_type("POST") {
                event.post_action = alarm.description.clone();
            }
        }

        if let Some(disp) = get_prop("X-TOCSIN-DISPLAYING") {
            let parts: Vec<&str> = disp.split(';').collect();
            let resource = parts
                .first()
                .and_then(|v| v.parse().ok())
                .unwrap_or(-1);
            let kind_rank = parts.get(1).and_then(|v| v.parse().ok()).unwrap_or(1);
            let show_edit = parts.contains(&"EDIT");
            let show_defer = parts.contains(&"DEFER");
            let time = vevent
                .properties()
                .get("X-TOCSIN-DISPLAY-TIME")
                .and_then(|p| {
                    let is_date = p
                        .params()
                        .get("VALUE")
                        .map(|v| v.value() == "DATE")
                        .unwrap_or(false);
                    parse_dt(p.value(), is_date)
                })
                .unwrap_or(event.next_main);
            event.displaying = Some(DisplayingState {
                kind_rank,
                time,
                resource,
                show_edit,
                show_defer,
            });
        }

        Ok(event)
    }

    // --- Whole-calendar IO ---

    /// Serialises a set of events into one calendar file.
    pub fn calendar_to_ics(events: &[&Event]) -> String {
        let mut out = String::from("BEGIN:VCALENDAR\r\nVERSION:2.0\r\n");
        out.push_str(&format!("PRODID:{}\r\n", prodid(CALENDAR_VERSION)));
        for event in events {
            let full = Self::event_component(event);
            if let (Some(b), Some(e)) = (full.find("BEGIN:VEVENT"), full.rfind("END:VEVENT")) {
                out.push_str(&full[b..e + "END:VEVENT".len()]);
                out.push_str("\r\n");
            }
        }
        out.push_str("END:VCALENDAR\r\n");
        out
    }

    /// Parses a calendar file. Individual malformed events are skipped with
    /// a warning; a structurally broken file is an error.
    pub fn calendar_from_ics(content: &str) -> AlarmResult<(Vec<Event>, FormatCompat)> {
        if content.trim().is_empty() {
            return Ok((Vec::new(), FormatCompat::Current));
        }
        let version = calendar_version(content);
        let compat = version_compat(version);
        if compat == FormatCompat::Incompatible {
            return Ok((Vec::new(), compat));
        }

        let normalized = content.replace("\r\n", "\n").replace('\n', "\r\n");
        let mut events = Vec::new();
        for part in normalized.split("BEGIN:VEVENT").skip(1) {
            let end = match part.find("END:VEVENT") {
                Some(pos) => pos + "END:VEVENT".len(),
                None => continue,
            };
            let single = format!(
                "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:{}\r\nBEGIN:VEVENT{}\r\nEND:VCALENDAR",
                prodid(version.unwrap_or(CALENDAR_VERSION)),
                &part[..end]
            );
            match Self::from_ics(&single) {
                Ok(ev) => events.push(ev),
                Err(e) => warn!("Skipping unreadable calendar entry: {}", e),
            }
        }
        Ok((events, compat))
    }
}

fn replace_prodid(ics: &str, version: u32) -> String {
    let mut out = String::with_capacity(ics.len() + 32);
    let mut replaced = false;
    for line in ics.split_inclusive("\r\n") {
        if line.starts_with("PRODID") && !replaced {
            out.push_str(&format!("PRODID:{}\r\n", prodid(version)));
            replaced = true;
        } else {
            out.push_str(line);
        }
    }
    if !replaced {
        if let Some(idx) = out.find("BEGIN:VCALENDAR\r\n") {
            let insert = idx + "BEGIN:VCALENDAR\r\n".len();
            out.insert_str(insert, &format!("PRODID:{}\r\n", prodid(version)));
        }
    }
    out
}

// --- VALARM block writer/parser ---

struct ValarmWriter {
    buf: String,
}

impl ValarmWriter {
    fn new(kind: &str) -> Self {
        let mut buf = String::from("BEGIN:VALARM\r\n");
        buf.push_str(&format!("X-TOCSIN-TYPE:{}\r\n", kind));
        ValarmWriter { buf }
    }

    fn line(&mut self, key: &str, val: &str) {
        self.buf.push_str(&format!("{}:{}\r\n", key, val));
    }

    fn text(&mut self, key: &str, val: &str) {
        self.buf
            .push_str(&format!("{}:{}\r\n", key, escape_text(val)));
    }

    fn trigger_abs(&mut self, dt: &AlarmDateTime) {
        self.buf.push_str(&format!(
            "TRIGGER;VALUE={}:{}\r\n",
            dt_value_param(dt),
            format_dt(dt)
        ));
    }

    fn audio(&mut self, a: &AudioSettings) {
        if !a.file.is_empty() {
            self.line("ATTACH", &a.file);
        }
        if let Some(v) = a.volume {
            let fade_v = a.fade_volume.map(|f| f.to_string()).unwrap_or_default();
            self.line(
                "X-TOCSIN-VOLUME",
                &format!("{};{};{}", v, fade_v, a.fade_seconds),
            );
        }
        if let Some(pause) = a.repeat_pause {
            self.line("X-TOCSIN-REPEAT-PAUSE", &pause.to_string());
        }
    }

    fn finish(self) -> String {
        let mut buf = self.buf;
        buf.push_str("END:VALARM\r\n");
        buf
    }
}

#[derive(Debug, Default)]
struct RawValarm {
    types: Vec<String>,
    action: String,
    trigger: Option<AlarmDateTime>,
    trigger_rel_minutes: Option<i64>,
    description: Option<String>,
    summary: Option<String>,
    attach: Vec<String>,
    attendees: Vec<String>,
    repeat: Option<u32>,
    duration_minutes: Option<i64>,
    props: Vec<(String, String)>,
}

impl RawValarm {
    fn has_type(&self, t: &str) -> bool {
        self.types.iter().any(|x| x == t)
    }

    fn prop(&self, key: &str) -> Option<&str> {
        self.props
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn to_audio(&self) -> AudioSettings {
        let mut audio = AudioSettings {
            file: self.attach.first().cloned().unwrap_or_default(),
            ..AudioSettings::default()
        };
        if let Some(vol) = self.prop("X-TOCSIN-VOLUME") {
            let parts: Vec<&str> = vol.split(';').collect();
            audio.volume = parts.first().and_then(|v| v.parse().ok());
            audio.fade_volume = parts.get(1).and_then(|v| v.parse().ok());
            audio.fade_seconds = parts.get(2).and_then(|v| v.parse().ok()).unwrap_or(0);
        }
        audio.repeat_pause = self.prop("X-TOCSIN-REPEAT-PAUSE").and_then(|v| v.parse().ok());
        audio
    }

    fn to_action(&self) -> AlarmResult<Action> {
        match self.action.as_str() {
            "DISPLAY" => {
                let text = self.description.clone().unwrap_or_default();
                if self.prop("X-TOCSIN-FILE").is_some() {
                    Ok(Action::File(text))
                } else {
                    Ok(Action::Message(text))
                }
            }
            "PROCEDURE" => Ok(Action::Command {
                command: self.description.clone().unwrap_or_default(),
                script: self.prop("X-TOCSIN-SCRIPT").is_some(),
            }),
            "EMAIL" => {
                let to = self
                    .attendees
                    .iter()
                    .map(|a| {
                        let addr = a.trim().trim_start_matches("MAILTO:").trim();
                        parse_email_address(addr)
                    })
                    .collect();
                Ok(Action::Email {
                    from_id: self
                        .prop("X-TOCSIN-EMAIL-FROM")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0),
                    to,
                    subject: self.summary.clone().unwrap_or_default(),
                    body: self.description.clone().unwrap_or_default(),
                    attachments: self.attach.clone(),
                    bcc: self.prop("X-TOCSIN-EMAIL-BCC").is_some(),
                })
            }
            "AUDIO" => Ok(Action::Audio(self.to_audio())),
            other => Err(AlarmError::InvalidEvent(format!(
                "unsupported alarm action '{}'",
                other
            ))),
        }
    }
}

fn parse_email_address(s: &str) -> EmailAddress {
    if let (Some(lt), Some(gt)) = (s.find('<'), s.rfind('>')) {
        if lt < gt {
            return EmailAddress {
                name: s[..lt].trim().to_string(),
                address: s[lt + 1..gt].trim().to_string(),
            };
        }
    }
    EmailAddress::new(s)
}

fn parse_valarm_blocks(unfolded: &str) -> Vec<RawValarm> {
    let mut alarms = Vec::new();
    let mut current: Option<RawValarm> = None;

    for line in unfolded.lines() {
        let trimmed = line.trim();
        if trimmed == "BEGIN:VALARM" {
            current = Some(RawValarm::default());
            continue;
        }
        if trimmed == "END:VALARM" {
            if let Some(alarm) = current.take() {
                alarms.push(alarm);
            }
            continue;
        }
        let Some(alarm) = current.as_mut() else {
            continue;
        };
        let Some((raw_key, val)) = trimmed.split_once(':') else {
            continue;
        };
        let mut key_parts = raw_key.split(';');
        let key = key_parts.next().unwrap_or(raw_key).to_uppercase();
        let is_date_param = raw_key.to_uppercase().contains("VALUE=DATE")
            && !raw_key.to_uppercase().contains("DATE-TIME");
        match key.as_str() {
            "X-TOCSIN-TYPE" => {
                alarm.types = val.split(',').map(|s| s.trim().to_string()).collect();
            }
            "ACTION" => alarm.action = val.trim().to_string(),
            "TRIGGER" => {
                let v = val.trim();
                if v.starts_with('-') || v.starts_with('P') {
                    // Relative duration trigger.
                    if let Some(mins) = parse_duration_minutes(v) {
                        let sign = if v.starts_with('-') { -1 } else { 1 };
                        alarm.trigger_rel_minutes = Some(sign * mins);
                    }
                } else {
                    alarm.trigger = parse_dt(v, is_date_param);
                }
            }
            "DESCRIPTION" => alarm.description = Some(unescape_text(val)),
            "SUMMARY" => alarm.summary = Some(unescape_text(val)),
            "ATTACH" => alarm.attach.push(val.trim().to_string()),
            "ATTENDEE" => alarm.attendees.push(val.trim().to_string()),
            "REPEAT" => alarm.repeat = val.trim().parse().ok(),
            "DURATION" => alarm.duration_minutes = parse_duration_minutes(val),
            other => alarm
                .props
                .push((other.to_string(), val.trim().to_string())),
        }
    }
    alarms
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn timed(y: i32, m: u32, d: u32, h: u32, min: u32) -> AlarmDateTime {
        AlarmDateTime::Timed(Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap())
    }

    #[test]
    fn message_event_roundtrip() {
        let mut event = Event::new(
            Action::Message("Stand up\nStretch".into()),
            timed(2025, 6, 1, 9, 0),
        );
        event.late_cancel = 5;
        event.beep = true;
        event.set_repetition(10, 3).unwrap();

        let ics = IcsAdapter::to_ics(&event);
        let back = IcsAdapter::from_ics(&ics).unwrap();
        assert_eq!(back.action, event.action);
        assert_eq!(back.late_cancel, 5);
        assert!(back.beep);
        assert_eq!(back.repetition, event.repetition);
        assert_eq!(back.next_main, event.next_main);
    }

    #[test]
    fn version_detection() {
        let content = format!(
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:{}\r\nEND:VCALENDAR\r\n",
            prodid(2)
        );
        assert_eq!(calendar_version(&content), Some(2));
        assert_eq!(version_compat(Some(2)), FormatCompat::Convertible);
        assert_eq!(version_compat(Some(CALENDAR_VERSION)), FormatCompat::Current);
        assert_eq!(
            version_compat(Some(CALENDAR_VERSION + 1)),
            FormatCompat::Incompatible
        );
    }

    #[test]
    fn missing_main_alarm_is_invalid() {
        let content = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nUID:x\r\nDTSTART:20250601T090000Z\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
        assert!(matches!(
            IcsAdapter::from_ics(content),
            Err(AlarmError::InvalidEvent(_))
        ));
    }
}
