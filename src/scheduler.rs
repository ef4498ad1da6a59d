// The application action queue and due-alarm policy.
//
// Actions queue up (from the timer, the request surface, or the command
// line) and are processed strictly serially; a processing guard prevents
// re-entry. Handling a due alarm evaluates late-cancellation, writes the
// displaying copy, invokes the action dispatcher, advances the event to
// its next occurrence, and archives or deletes it once expired. After each
// drain the single-shot timer is re-armed to the earliest active trigger,
// capped at 24 hours so clock changes and working-hours boundaries are
// re-evaluated at least daily.

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::collections::{HashMap, VecDeque};

use crate::calendar::{EventId, ResourcesCalendar};
use crate::command_error::CommandErrorStore;
use crate::config::{Config, WorkSchedule};
use crate::context::AppContext;
use crate::dispatch::{DisplayFlags, Dispatcher};
use crate::display::DisplayCalendar;
use crate::error::AlarmError;
use crate::model::datetime::AlarmDateTime;
use crate::model::event::{AlarmKind, Event, EventCategory, TriggerKind};
use crate::resources::Resources;

/// Timer ceiling: re-arm at least once a day to survive clock changes.
const MAX_TIMER_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, Default)]
pub struct ActionFlags {
    /// Search every resource for the UID instead of one resource.
    pub find_id: bool,
    pub exit_after: bool,
    pub error_exit: bool,
    pub from_command_line: bool,
}

#[derive(Debug, Clone)]
pub enum ActionKind {
    /// Execute the alarm if due, then reschedule it.
    Handle(EventId),
    /// Execute the alarm regardless; reschedule only if it was due.
    Trigger(EventId),
    /// Delete the alarm.
    Cancel(EventId),
    /// Hand the alarm to the edit collaborator.
    Edit(EventId),
    /// List all active alarms.
    List,
}

#[derive(Debug, Clone)]
pub struct QueuedAction {
    pub action: ActionKind,
    pub flags: ActionFlags,
}

/// Outcome of one processed queue entry, consumed by the engine / CLI.
#[derive(Debug, Clone)]
pub enum ActionResult {
    Fired(EventId),
    NotDue(EventId),
    LateCancelled(EventId),
    Cancelled(EventId),
    EditRequested(EventId),
    Listed(Vec<(String, Option<AlarmDateTime>)>),
    Failed(String, String),
}

/// Pre-action state for an alarm whose display is waiting on the
/// pre-display command.
#[derive(Debug, Clone)]
pub struct PendingPre {
    pub id: EventId,
    pub kind: AlarmKind,
    pub flags: DisplayFlags,
}

/// Everything the queue processor operates on. Borrowed per call so the
/// engine keeps single ownership of the parts.
pub struct SchedulerCtx<'a> {
    pub app: &'a dyn AppContext,
    pub config: &'a Config,
    pub resources: &'a mut Resources,
    pub calendar: &'a mut ResourcesCalendar,
    pub display: &'a mut DisplayCalendar,
    pub dispatcher: &'a Dispatcher,
}

impl SchedulerCtx<'_> {
    fn work(&self) -> WorkSchedule {
        self.config.work_schedule()
    }
}

#[derive(Debug, Default)]
pub struct Scheduler {
    queue: VecDeque<QueuedAction>,
    processing: bool,
    alarms_enabled: bool,
    /// When the single-shot timer should next fire, if armed.
    next_wake: Option<DateTime<Utc>>,
    /// Alarms whose display is gated on a running pre-action.
    pending_pre: HashMap<String, PendingPre>,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler {
            alarms_enabled: true,
            ..Scheduler::default()
        }
    }

    pub fn alarms_enabled(&self) -> bool {
        self.alarms_enabled
    }

    /// Globally enables or disables alarm triggering. While disabled the
    /// timer stays unarmed and due alarms are not dispatched.
    pub fn set_alarms_enabled(&mut self, c: &mut SchedulerCtx<'_>, enabled: bool) {
        if self.alarms_enabled != enabled {
            self.alarms_enabled = enabled;
            info!("Alarms {}", if enabled { "enabled" } else { "disabled" });
            self.check_next_due_alarm(c, Utc::now());
        }
    }

    pub fn next_wake(&self) -> Option<DateTime<Utc>> {
        self.next_wake
    }

    pub fn enqueue(&mut self, action: ActionKind, flags: ActionFlags) {
        self.queue.push_back(QueuedAction { action, flags });
    }

    pub fn has_queued_work(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn take_pending_pre(&mut self, uid: &str) -> Option<PendingPre> {
        self.pending_pre.remove(uid)
    }

    /// Queues a Handle action for every alarm due at `now`.
    pub fn queue_due_alarms(&mut self, c: &mut SchedulerCtx<'_>, now: DateTime<Utc>) {
        if !self.alarms_enabled {
            return;
        }
        let work = c.work();
        let now_adt = AlarmDateTime::Timed(now);
        let due: Vec<EventId> = c
            .calendar
            .events(Some(EventCategory::Active))
            .into_iter()
            .filter(|e| e.enabled && !c.calendar.is_pending(&e.uid))
            .filter(|e| {
                e.next_trigger(TriggerKind::AllWork, Some(&work))
                    .map(|t| t <= now_adt)
                    .unwrap_or(false)
            })
            .filter_map(|e| e.resource_id.map(|rid| EventId::new(rid, &e.uid)))
            .collect();
        for id in due {
            debug!("Queueing due alarm {}", id.uid);
            self.enqueue(ActionKind::Handle(id), ActionFlags::default());
        }
    }

    /// Drains the action queue serially. Re-entrant calls return
    /// immediately; the timer is re-armed after the drain.
    pub fn process_queue(
        &mut self,
        c: &mut SchedulerCtx<'_>,
        now: DateTime<Utc>,
    ) -> Vec<ActionResult> {
        if self.processing {
            return Vec::new();
        }
        self.processing = true;
        let mut results = Vec::new();
        while let Some(entry) = self.queue.pop_front() {
            let result = match entry.action {
                ActionKind::Handle(id) => self.handle_event(c, &id, entry.flags, now, false),
                ActionKind::Trigger(id) => self.handle_event(c, &id, entry.flags, now, true),
                ActionKind::Cancel(id) => self.cancel_event(c, &id, entry.flags),
                ActionKind::Edit(id) => self.edit_event(c, &id, entry.flags),
                ActionKind::List => Ok(ActionResult::Listed(self.list_alarms(c))),
            };
            match result {
                Ok(r) => results.push(r),
                Err((id, e)) => {
                    warn!("Queued action for '{}' failed: {}", id, e);
                    results.push(ActionResult::Failed(id, e.to_string()));
                }
            }
        }
        self.processing = false;
        self.check_next_due_alarm(c, now);
        results
    }

    /// Finds the event an action refers to, searching all resources when
    /// the find-id flag is set.
    fn lookup(
        &self,
        c: &SchedulerCtx<'_>,
        id: &EventId,
        flags: ActionFlags,
    ) -> Option<(EventId, Event)> {
        if let Some(e) = c.calendar.event(id) {
            return Some((id.clone(), e.clone()));
        }
        if flags.find_id {
            if let Some(e) = c.calendar.event_by_uid(&id.uid) {
                let rid = e.resource_id?;
                return Some((EventId::new(rid, &id.uid), e.clone()));
            }
        }
        None
    }

    fn handle_event(
        &mut self,
        c: &mut SchedulerCtx<'_>,
        id: &EventId,
        flags: ActionFlags,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<ActionResult, (String, AlarmError)> {
        let (id, mut event) = self
            .lookup(c, id, flags)
            .ok_or_else(|| (id.uid.clone(), AlarmError::EventNotFound(id.uid.clone())))?;
        if !event.enabled && !force {
            return Ok(ActionResult::NotDue(id));
        }
        if !self.alarms_enabled && !force {
            return Ok(ActionResult::NotDue(id));
        }

        let work = c.work();
        let now_adt = AlarmDateTime::Timed(now);

        // Which sub-alarm is due: a deferral takes precedence, then the
        // main alarm, then a pending reminder.
        let deferred_due = event
            .deferral
            .filter(|d| d.time <= now_adt)
            .map(|d| AlarmKind::Deferred {
                reminder: d.reminder,
            });
        let main_trigger = event.main_trigger();
        let main_due = !event.main_expired
            && main_trigger <= now_adt
            && event.is_working_time(&now_adt, &work);
        let reminder_due = event
            .reminder_trigger()
            .map(|t| t <= now_adt)
            .unwrap_or(false);

        let (kind, trigger) = if let Some(k) = deferred_due {
            (k, event.deferral.map(|d| d.time).unwrap_or(main_trigger))
        } else if main_due || force {
            (AlarmKind::Main, main_trigger)
        } else if reminder_due {
            (
                AlarmKind::Reminder,
                event.reminder_trigger().unwrap_or(main_trigger),
            )
        } else {
            return Ok(ActionResult::NotDue(id));
        };

        // Late-cancellation: if handling started too long after the
        // trigger, suppress the action but still advance the occurrence.
        if event.late_cancel > 0 && kind == AlarmKind::Main && !force {
            let overdue_secs =
                (now - trigger.effective_utc()).num_seconds();
            if overdue_secs > event.late_cancel as i64 * 60 {
                info!(
                    "Alarm {} is {}s overdue, late-cancelling",
                    id.uid, overdue_secs
                );
                self.reschedule_alarm(c, &id, &mut event, now)?;
                return Ok(ActionResult::LateCancelled(id));
            }
        }

        // Consume the fired sub-alarm.
        match kind {
            AlarmKind::Deferred { .. } => event.cancel_defer(),
            AlarmKind::Reminder => event.reminder_shown = true,
            _ => {}
        }

        c.calendar
            .set_alarm_pending(&id, true, Some(&work));

        let display_flags = DisplayFlags {
            allow_defer: true,
            allow_edit: true,
        };
        let is_display = matches!(
            event.action,
            crate::model::event::Action::Message(_) | crate::model::event::Action::File(_)
        ) || event.display_command_output;

        if is_display {
            if let Err(e) = c.display.add_displaying(
                &event,
                kind,
                id.resource,
                trigger,
                display_flags.allow_edit,
                display_flags.allow_defer,
            ) {
                warn!("Failed to record displaying copy for {}: {}", id.uid, e);
            }
        }

        // A pre-display action gates the display; its exit report resumes
        // the flow in the engine.
        let gated = is_display
            && kind != AlarmKind::Reminder
            && c.dispatcher.run_pre_action(&event);
        if gated {
            self.pending_pre.insert(
                id.uid.clone(),
                PendingPre {
                    id: id.clone(),
                    kind,
                    flags: display_flags,
                },
            );
        } else if let Err(e) = c.dispatcher.execute(&event, kind, display_flags) {
            warn!("Action for alarm {} failed: {}", id.uid, e);
        }

        // Reminders and deferral firings do not consume the occurrence.
        if kind == AlarmKind::Main {
            self.reschedule_alarm(c, &id, &mut event, now)?;
        } else {
            self.persist(c, &id, &event)?;
        }

        // Processing is complete: the advanced occurrence (or the consumed
        // reminder/deferral) now protects against re-firing, so the alarm
        // leaves the pending set even while its display stays open.
        let work = c.work();
        c.calendar.set_alarm_pending(&id, false, Some(&work));
        Ok(ActionResult::Fired(id))
    }

    /// Advances the event past `now`, persisting the result: bump the
    /// sub-repetition index, else move to the next recurrence, else
    /// archive or delete.
    pub fn reschedule_alarm(
        &mut self,
        c: &mut SchedulerCtx<'_>,
        id: &EventId,
        event: &mut Event,
        now: DateTime<Utc>,
    ) -> Result<(), (String, AlarmError)> {
        let probe = AlarmDateTime::Timed(now + Duration::seconds(1));
        let occ = event.set_next_occurrence(&probe);
        if occ.occurred() {
            debug!(
                "Alarm {} rescheduled to {}",
                id.uid,
                event.main_trigger().format_short()
            );
            self.persist(c, id, event)
        } else if event.deferral.is_some() {
            // Expired but a deferral is still outstanding.
            self.persist(c, id, event)
        } else {
            self.archive_or_delete(c, id, event, now)
        }
    }

    fn persist(
        &self,
        c: &mut SchedulerCtx<'_>,
        id: &EventId,
        event: &Event,
    ) -> Result<(), (String, AlarmError)> {
        c.resources
            .update_event(id.resource, event.clone())
            .map(|_| ())
            .map_err(|e| (id.uid.clone(), e))
    }

    /// Removes an expired event, moving a copy to the archive calendar when
    /// the event asks for it and archiving is configured.
    fn archive_or_delete(
        &self,
        c: &mut SchedulerCtx<'_>,
        id: &EventId,
        event: &Event,
        now: DateTime<Utc>,
    ) -> Result<(), (String, AlarmError)> {
        c.resources
            .delete_event(id.resource, &id.uid)
            .map_err(|e| (id.uid.clone(), e))?;
        if event.archive && c.config.archived_keep_days != 0 {
            let mut copy = event.clone();
            copy.set_category(EventCategory::Archived);
            copy.created = Some(now);
            if event.at_login {
                copy.at_login = false;
                copy.archive_at_login = true;
            }
            match c.resources.get_standard(EventCategory::Archived, true) {
                Some(dest) => {
                    if let Err(e) = c.resources.add_event(dest, copy) {
                        warn!("Could not archive alarm {}: {}", id.uid, e);
                    }
                }
                None => {
                    warn!(
                        "No archive calendar available; expired alarm {} deleted",
                        id.uid
                    );
                }
            }
        }
        Ok(())
    }

    fn cancel_event(
        &mut self,
        c: &mut SchedulerCtx<'_>,
        id: &EventId,
        flags: ActionFlags,
    ) -> Result<ActionResult, (String, AlarmError)> {
        let (id, event) = self
            .lookup(c, id, flags)
            .ok_or_else(|| (id.uid.clone(), AlarmError::EventNotFound(id.uid.clone())))?;
        let _ = c.display.remove_displaying(&id.uid);
        c.resources
            .delete_event(id.resource, &event.uid)
            .map_err(|e| (id.uid.clone(), e))?;
        Ok(ActionResult::Cancelled(id))
    }

    fn edit_event(
        &mut self,
        c: &mut SchedulerCtx<'_>,
        id: &EventId,
        flags: ActionFlags,
    ) -> Result<ActionResult, (String, AlarmError)> {
        let (id, _) = self
            .lookup(c, id, flags)
            .ok_or_else(|| (id.uid.clone(), AlarmError::EventNotFound(id.uid.clone())))?;
        Ok(ActionResult::EditRequested(id))
    }

    fn list_alarms(&self, c: &SchedulerCtx<'_>) -> Vec<(String, Option<AlarmDateTime>)> {
        let work = c.work();
        let mut list: Vec<(String, Option<AlarmDateTime>)> = c
            .calendar
            .events(Some(EventCategory::Active))
            .into_iter()
            .map(|e| {
                (
                    e.uid.clone(),
                    e.next_trigger(TriggerKind::Display, Some(&work)),
                )
            })
            .collect();
        list.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        list
    }

    /// Commits a user deferral: updates the event, clears its displaying
    /// copy, and re-arms the timer.
    pub fn defer_alarm(
        &mut self,
        c: &mut SchedulerCtx<'_>,
        id: &EventId,
        defer_to: AlarmDateTime,
        reminder: bool,
        now: DateTime<Utc>,
    ) -> Result<(), AlarmError> {
        let mut event = c
            .calendar
            .event(id)
            .cloned()
            .ok_or_else(|| AlarmError::EventNotFound(id.uid.clone()))?;
        let now_adt = AlarmDateTime::Timed(now);
        event.defer(&now_adt, defer_to, reminder, true)?;
        let _ = c.display.remove_displaying(&id.uid);
        let work = c.work();
        c.calendar.set_alarm_pending(id, false, Some(&work));
        c.resources.update_event(id.resource, event)?;
        self.check_next_due_alarm(c, now);
        Ok(())
    }

    /// Handles a repeat-at-login alarm at startup: fires the display
    /// without consuming an occurrence.
    pub fn trigger_login_alarm(&mut self, c: &mut SchedulerCtx<'_>, id: &EventId) {
        let Some(event) = c.calendar.event(id).cloned() else {
            return;
        };
        if !event.enabled || !event.at_login {
            return;
        }
        info!("Firing repeat-at-login alarm {}", id.uid);
        let flags = DisplayFlags {
            allow_defer: false,
            allow_edit: true,
        };
        if let Err(e) = c.dispatcher.execute(&event, AlarmKind::AtLogin, flags) {
            warn!("Login alarm {} failed: {}", id.uid, e);
        }
    }

    /// Purges archived events older than the configured keep-days.
    pub fn purge_archive(&mut self, c: &mut SchedulerCtx<'_>, now: DateTime<Utc>) {
        let keep_days = c.config.archived_keep_days;
        if keep_days <= 0 {
            return;
        }
        let cutoff = now - Duration::days(keep_days as i64);
        let stale: Vec<EventId> = c
            .calendar
            .events(Some(EventCategory::Archived))
            .into_iter()
            .filter(|e| e.created.map(|t| t < cutoff).unwrap_or(false))
            .filter_map(|e| e.resource_id.map(|rid| EventId::new(rid, &e.uid)))
            .collect();
        for id in stale {
            info!("Purging archived alarm {}", id.uid);
            if let Err(e) = c.resources.delete_event(id.resource, &id.uid) {
                warn!("Failed to purge {}: {}", id.uid, e);
            }
        }
    }

    /// Records a command failure against the event, both in memory and in
    /// the persistent store.
    pub fn record_command_error(
        &self,
        c: &mut SchedulerCtx<'_>,
        id: &EventId,
        error: crate::model::event::CommandError,
    ) {
        if let Some(mut event) = c.calendar.event(id).cloned() {
            event.command_error = event.command_error.merge(error);
            let merged = event.command_error;
            if let Err(e) = c.resources.update_event(id.resource, event) {
                warn!("Could not store command error for {}: {}", id.uid, e);
            }
            if let Err(e) = CommandErrorStore::record(c.app, &id.uid, merged) {
                warn!("Could not persist command error for {}: {}", id.uid, e);
            }
        }
    }

    /// Re-arms the single-shot timer to the earliest active trigger,
    /// clamped to at most 24 hours out.
    pub fn check_next_due_alarm(&mut self, c: &mut SchedulerCtx<'_>, now: DateTime<Utc>) {
        if !self.alarms_enabled {
            self.next_wake = None;
            return;
        }
        let work = c.work();
        let earliest = c
            .calendar
            .earliest_alarm(Some(&work))
            .and_then(|e| e.next_trigger(TriggerKind::AllWork, Some(&work)));
        self.next_wake = earliest.map(|t| {
            let trigger = t.effective_utc();
            let cap = now + Duration::hours(MAX_TIMER_HOURS);
            let wake = trigger.max(now).min(cap);
            debug!("Timer armed for {}", wake);
            wake
        });
    }
}
