// Ties the registry, calendar index, display calendar, scheduler and
// dispatcher into the single main-context actor.
//
// All state mutation happens on this task: worker threads (commands,
// audio) only post `DispatchOutcome`s back over a channel which the run
// loop drains. Startup follows the original ordering: load resources,
// migrate old formats, recover unacknowledged displays, fire
// repeat-at-login alarms, purge the archive, then arm the timer.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use crate::calendar::{CalendarChange, EventId, ResourcesCalendar};
use crate::command_error::CommandErrorStore;
use crate::config::Config;
use crate::context::SharedContext;
use crate::dispatch::{
    CommandPhase, DispatchOutcome, Dispatcher, DisplayFlags, MailResult,
};
use crate::display::DisplayCalendar;
use crate::error::{AlarmError, AlarmResult};
use crate::model::adapter::FormatCompat;
use crate::model::datetime::{set_start_of_day, AlarmDateTime};
use crate::model::event::{
    Action, AlarmKind, AudioSettings, CommandError, EmailAddress, EventCategory,
};
use crate::resource::Resource;
use crate::resources::{DestOptions, Resources};
use crate::requests::{ScheduleOptions, ScheduleRequest};
use crate::scheduler::{ActionFlags, ActionKind, ActionResult, Scheduler, SchedulerCtx};

/// Control messages for the running engine actor.
#[derive(Debug)]
pub enum EngineCommand {
    /// The user closed (or auto-close closed) an alarm display.
    Acknowledge(String),
    Defer {
        uid: String,
        when: AlarmDateTime,
        reminder: bool,
    },
    StopAudio,
    Stop,
}

pub struct Engine {
    app: SharedContext,
    config: Config,
    resources: Resources,
    calendar: ResourcesCalendar,
    display: DisplayCalendar,
    scheduler: Scheduler,
    dispatcher: Dispatcher,
    outcomes: UnboundedReceiver<DispatchOutcome>,
}

impl Engine {
    /// Creates an engine with the default collaborators (desktop
    /// notifications, shell commands, no mail transport, no audio decoder).
    pub fn init(app: SharedContext) -> Result<Engine> {
        Self::init_with(app, Dispatcher::with_defaults)
    }

    /// Creates an engine with custom collaborators; `make` receives the
    /// outcome sender worker threads report back on.
    pub fn init_with<F>(app: SharedContext, make: F) -> Result<Engine>
    where
        F: FnOnce(tokio::sync::mpsc::UnboundedSender<DispatchOutcome>) -> Dispatcher,
    {
        let config = Config::load(app.as_ref())?;
        set_start_of_day(config.start_of_day_time());
        let (tx, rx) = unbounded_channel();
        let dispatcher = make(tx);
        let display = DisplayCalendar::new(app.as_ref())?;
        Ok(Engine {
            app,
            config,
            resources: Resources::new(),
            calendar: ResourcesCalendar::new(),
            display,
            scheduler: Scheduler::new(),
            dispatcher,
            outcomes: rx,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn calendar(&self) -> &ResourcesCalendar {
        &self.calendar
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut Resources {
        &mut self.resources
    }

    pub fn display_calendar(&self) -> &DisplayCalendar {
        &self.display
    }

    /// Splits the engine into the scheduler and the context it operates on.
    fn parts(&mut self) -> (SchedulerCtx<'_>, &mut Scheduler) {
        let Engine {
            app,
            config,
            resources,
            calendar,
            display,
            scheduler,
            dispatcher,
            ..
        } = self;
        (
            SchedulerCtx {
                app: &**app,
                config,
                resources,
                calendar,
                display,
                dispatcher,
            },
            scheduler,
        )
    }

    // --- Startup / shutdown ---

    pub fn startup(&mut self) -> Result<()> {
        // 1. Create and load every configured resource.
        for rc in self.config.resources.clone() {
            let path = rc.resolve_path(self.app.as_ref())?;
            self.resources.add_resource(Resource::new(rc, path));
        }
        self.resources.load_all(false);

        // 2. Migrate older-format calendars unless asked to keep them.
        for id in self.resources.ids() {
            let convertible = self
                .resources
                .resource(id)
                .map(|r| r.compatibility() == FormatCompat::Convertible && !r.keep_format())
                .unwrap_or(false);
            if convertible {
                if let Some(res) = self.resources.resource_mut(id) {
                    match res.update_to_current() {
                        Ok(()) => info!("Migrated resource {} to the current format", id),
                        Err(e) => warn!("Could not migrate resource {}: {}", id, e),
                    }
                }
            }
        }
        self.drain_notices();

        // 3. Crash recovery: re-raise every unacknowledged display.
        self.display.open()?;
        let recovered = self.display.take_for_recovery();
        for (copy, rid, show_edit, show_defer) in recovered {
            let uid = copy.uid.clone();
            let original = self.resources.find_event(&uid).or_else(|| {
                // The event may have been archived in the meantime.
                self.resources
                    .find_event(&EventCategory::Archived.tag_uid(&uid))
            });
            let Some((orig_rid, original)) = original else {
                info!("Not re-raising {}: event no longer exists", uid);
                continue;
            };
            info!("Re-raising alarm display for {}", uid);
            let flags = DisplayFlags {
                allow_defer: show_defer,
                allow_edit: show_edit,
            };
            let resource = rid.unwrap_or(orig_rid);
            if let Err(e) = self.display.add_displaying(
                &original,
                AlarmKind::Main,
                resource,
                original.main_trigger(),
                show_edit,
                show_defer,
            ) {
                warn!("Could not re-record displaying copy for {}: {}", uid, e);
            }
            if let Err(e) = self
                .dispatcher
                .execute(&original, AlarmKind::Displaying, flags)
            {
                warn!("Could not re-raise display for {}: {}", uid, e);
            }
        }
        // Drop any stale copies from disk as well.
        if let Err(e) = self.display.flush() {
            warn!("Could not rewrite the display calendar: {}", e);
        }

        // 4. Repeat-at-login alarms fire on each start.
        let login_ids: Vec<EventId> = self
            .calendar
            .events(Some(EventCategory::Active))
            .into_iter()
            .filter(|e| e.enabled && e.at_login)
            .filter_map(|e| e.resource_id.map(|rid| EventId::new(rid, &e.uid)))
            .collect();
        {
            let (mut c, scheduler) = self.parts();
            for id in login_ids {
                scheduler.trigger_login_alarm(&mut c, &id);
            }
        }

        // 5. Purge old archived alarms, surface stored command errors.
        let now = Utc::now();
        {
            let (mut c, scheduler) = self.parts();
            scheduler.purge_archive(&mut c, now);
        }
        self.drain_notices();
        let store = CommandErrorStore::load(self.app.as_ref());
        if !store.is_empty() {
            for event in self.calendar.events(None) {
                let err = store.get(&event.uid);
                if err != CommandError::None {
                    warn!(
                        "Alarm {} failed its last command execution ({})",
                        event.uid,
                        err.as_str()
                    );
                }
            }
        }

        // 6. Arm the timer.
        {
            let (mut c, scheduler) = self.parts();
            scheduler.check_next_due_alarm(&mut c, now);
        }
        Ok(())
    }

    /// Writes resource settings back to the config file and closes down.
    pub fn terminate(&mut self) -> Result<()> {
        self.dispatcher.stop_audio();
        self.config.resources = self.resources.configs();
        self.config.save(self.app.as_ref())?;
        Ok(())
    }

    // --- Signal plumbing ---

    /// Forwards registry notices to the calendar index and reacts to the
    /// index's own change reports.
    pub fn drain_notices(&mut self) {
        let work = self.config.work_schedule();
        loop {
            let notices = self.resources.take_notices();
            if notices.is_empty() {
                break;
            }
            for notice in &notices {
                self.calendar.handle_notice(notice, Some(&work));
            }
        }
        let changes = self.calendar.take_changes();
        for change in changes {
            match change {
                CalendarChange::EarliestChanged => {
                    let now = Utc::now();
                    let (mut c, scheduler) = self.parts();
                    scheduler.check_next_due_alarm(&mut c, now);
                }
                CalendarChange::HaveDisabledChanged(have) => {
                    info!(
                        "{} individually disabled alarm(s) present",
                        if have { "Some" } else { "No" }
                    );
                }
                CalendarChange::AtLoginEventAdded(event) => {
                    if let Some(rid) = event.resource_id {
                        let id = EventId::new(rid, &event.uid);
                        let (mut c, scheduler) = self.parts();
                        scheduler.trigger_login_alarm(&mut c, &id);
                    }
                }
            }
        }
    }

    /// Queues any due alarms and drains the action queue once.
    pub fn process_once(&mut self, now: DateTime<Utc>) -> Vec<ActionResult> {
        let results = {
            let (mut c, scheduler) = self.parts();
            scheduler.queue_due_alarms(&mut c, now);
            scheduler.process_queue(&mut c, now)
        };
        self.drain_notices();
        results
    }

    /// Applies a worker-thread completion report.
    pub fn handle_outcome(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::CommandExited {
                uid,
                phase,
                exit,
                output,
            } => {
                if !output.trim().is_empty() {
                    log::debug!("Command output for {}: {}", uid, output.trim_end());
                }
                match phase {
                    CommandPhase::Pre => self.pre_action_exited(&uid, exit.is_success()),
                    CommandPhase::Main => {
                        if !exit.is_success() {
                            self.record_error(&uid, CommandError::Main);
                        }
                    }
                    CommandPhase::Post => {
                        if !exit.is_success() {
                            self.record_error(&uid, CommandError::Post);
                        }
                    }
                }
            }
            DispatchOutcome::AudioFinished { uid, error } => {
                if let Some(e) = error {
                    // Playback failure aborts the sound; the display stays.
                    warn!("Audio for alarm {} failed: {}", uid, e);
                }
            }
            DispatchOutcome::MailFinished { uid, result } => {
                if let MailResult::Error(msg) = result {
                    warn!("Email alarm {} failed: {}", uid, msg);
                }
            }
        }
    }

    fn record_error(&mut self, uid: &str, error: CommandError) {
        if let Some((rid, _)) = self.resources.find_event(uid) {
            let id = EventId::new(rid, uid);
            let (mut c, scheduler) = self.parts();
            scheduler.record_command_error(&mut c, &id, error);
        }
        self.drain_notices();
    }

    /// Resumes (or cancels) a display that was gated on its pre-action.
    fn pre_action_exited(&mut self, uid: &str, success: bool) {
        let Some(pending) = self.scheduler.take_pending_pre(uid) else {
            return;
        };
        let event = match self.calendar.event(&pending.id) {
            Some(e) => e.clone(),
            None => return,
        };
        if !success {
            self.record_error(uid, CommandError::Pre);
            if event.cancel_on_pre_error {
                info!("Pre-alarm action failed; cancelling display of {}", uid);
                let work = self.config.work_schedule();
                let _ = self.display.remove_displaying(uid);
                self.calendar
                    .set_alarm_pending(&pending.id, false, Some(&work));
                return;
            }
        }
        if let Err(e) = self.dispatcher.execute(&event, pending.kind, pending.flags) {
            warn!("Action for alarm {} failed: {}", uid, e);
        }
    }

    /// Display acknowledged: drop the crash-recovery copy, stop any sound,
    /// fire the post-action, re-arm.
    pub fn acknowledge(&mut self, uid: &str) {
        let _ = self.display.remove_displaying(uid);
        self.dispatcher.stop_audio();
        if let Some((rid, event)) = self.resources.find_event(uid) {
            let work = self.config.work_schedule();
            self.calendar
                .set_alarm_pending(&EventId::new(rid, uid), false, Some(&work));
            self.dispatcher.run_post_action(&event);
        }
        let now = Utc::now();
        let (mut c, scheduler) = self.parts();
        scheduler.check_next_due_alarm(&mut c, now);
    }

    // --- Request surface ---

    pub fn schedule_message(
        &mut self,
        text: &str,
        start: AlarmDateTime,
        options: ScheduleOptions,
    ) -> AlarmResult<String> {
        self.schedule(ScheduleRequest {
            action: Action::Message(text.to_string()),
            start,
            options,
        })
    }

    pub fn schedule_file(
        &mut self,
        url: &str,
        start: AlarmDateTime,
        options: ScheduleOptions,
    ) -> AlarmResult<String> {
        self.schedule(ScheduleRequest {
            action: Action::File(url.to_string()),
            start,
            options,
        })
    }

    pub fn schedule_command(
        &mut self,
        command: &str,
        script: bool,
        start: AlarmDateTime,
        options: ScheduleOptions,
    ) -> AlarmResult<String> {
        self.schedule(ScheduleRequest {
            action: Action::Command {
                command: command.to_string(),
                script,
            },
            start,
            options,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn schedule_email(
        &mut self,
        from_id: u32,
        to: Vec<EmailAddress>,
        subject: &str,
        body: &str,
        attachments: Vec<String>,
        bcc: bool,
        start: AlarmDateTime,
        options: ScheduleOptions,
    ) -> AlarmResult<String> {
        if to.is_empty() {
            return Err(AlarmError::InvalidEvent(
                "email alarm needs at least one recipient".into(),
            ));
        }
        self.schedule(ScheduleRequest {
            action: Action::Email {
                from_id,
                to,
                subject: subject.to_string(),
                body: body.to_string(),
                attachments,
                bcc,
            },
            start,
            options,
        })
    }

    pub fn schedule_audio(
        &mut self,
        url: &str,
        volume_percent: Option<u8>,
        start: AlarmDateTime,
        options: ScheduleOptions,
    ) -> AlarmResult<String> {
        self.schedule(ScheduleRequest {
            action: Action::Audio(AudioSettings {
                file: url.to_string(),
                volume: volume_percent.map(|v| (v.min(100) as f32) / 100.0),
                ..Default::default()
            }),
            start,
            options,
        })
    }

    /// Stores a new alarm in the destination resource for its type.
    pub fn schedule(&mut self, request: ScheduleRequest) -> AlarmResult<String> {
        let event = request.build_event(&self.config)?;
        let mut cancelled = false;
        let dest = self.resources.destination(
            EventCategory::Active,
            None,
            DestOptions::default(),
            &mut cancelled,
        )?;
        let stored = self.resources.add_event(dest, event)?;
        info!("Scheduled {} alarm {}", stored.action.kind_name(), stored.uid);
        self.drain_notices();
        Ok(stored.uid)
    }

    fn resolve(&self, uid: &str) -> AlarmResult<EventId> {
        self.resources
            .find_event(uid)
            .map(|(rid, _)| EventId::new(rid, uid))
            .ok_or_else(|| AlarmError::EventNotFound(uid.to_string()))
    }

    fn run_action(&mut self, action: ActionKind) -> Vec<ActionResult> {
        let now = Utc::now();
        let results = {
            let (mut c, scheduler) = self.parts();
            scheduler.enqueue(
                action,
                ActionFlags {
                    find_id: true,
                    ..Default::default()
                },
            );
            scheduler.process_queue(&mut c, now)
        };
        self.drain_notices();
        results
    }

    /// Fires an alarm immediately, regardless of its trigger time.
    pub fn trigger_event(&mut self, uid: &str) -> AlarmResult<()> {
        let id = self.resolve(uid)?;
        let results = self.run_action(ActionKind::Trigger(id));
        match results.into_iter().next() {
            Some(ActionResult::Failed(_, msg)) => Err(AlarmError::InvalidEvent(msg)),
            _ => Ok(()),
        }
    }

    /// Deletes an alarm.
    pub fn cancel_event(&mut self, uid: &str) -> AlarmResult<()> {
        let id = self.resolve(uid)?;
        let results = self.run_action(ActionKind::Cancel(id));
        match results.into_iter().next() {
            Some(ActionResult::Cancelled(_)) => Ok(()),
            Some(ActionResult::Failed(_, msg)) => Err(AlarmError::InvalidEvent(msg)),
            _ => Err(AlarmError::EventNotFound(uid.to_string())),
        }
    }

    /// Reports the alarm to the edit collaborator.
    pub fn edit_event(&mut self, uid: &str) -> AlarmResult<()> {
        let id = self.resolve(uid)?;
        let results = self.run_action(ActionKind::Edit(id));
        match results.into_iter().next() {
            Some(ActionResult::EditRequested(id)) => {
                info!("Alarm {} handed to the editor", id.uid);
                Ok(())
            }
            _ => Err(AlarmError::EventNotFound(uid.to_string())),
        }
    }

    /// Active alarms with their next display triggers, soonest first.
    pub fn list(&mut self) -> Vec<(String, Option<AlarmDateTime>)> {
        let results = self.run_action(ActionKind::List);
        for r in results {
            if let ActionResult::Listed(list) = r {
                return list;
            }
        }
        Vec::new()
    }

    /// Commits a user deferral of a displayed alarm.
    pub fn defer_event(
        &mut self,
        uid: &str,
        when: AlarmDateTime,
        reminder: bool,
    ) -> AlarmResult<()> {
        let id = self.resolve(uid)?;
        let now = Utc::now();
        let result = {
            let (mut c, scheduler) = self.parts();
            scheduler.defer_alarm(&mut c, &id, when, reminder, now)
        };
        self.drain_notices();
        result
    }

    pub fn set_alarms_enabled(&mut self, enabled: bool) {
        let (mut c, scheduler) = self.parts();
        scheduler.set_alarms_enabled(&mut c, enabled);
    }

    /// Applies changed working hours / holidays / start-of-day settings:
    /// work-time triggers are recomputed and the timer re-armed.
    pub fn update_config(&mut self, config: Config) {
        set_start_of_day(config.start_of_day_time());
        self.config = config;
        let work = self.config.work_schedule();
        self.calendar.refresh_triggers(Some(&work));
        let now = Utc::now();
        let (mut c, scheduler) = self.parts();
        scheduler.check_next_due_alarm(&mut c, now);
    }

    pub fn alarms_enabled(&self) -> bool {
        self.scheduler.alarms_enabled()
    }

    pub fn stop_audio(&self) {
        self.dispatcher.stop_audio();
    }

    // --- Actor loop ---

    /// Runs the engine until a Stop command (or channel closure). The loop
    /// sleeps until the armed timer, a worker outcome, or a command, and
    /// never blocks on collaborator work.
    pub async fn run(mut self, mut commands: UnboundedReceiver<EngineCommand>) -> Result<()> {
        loop {
            let now = Utc::now();
            let _ = self.process_once(now);

            let wake = self
                .scheduler
                .next_wake()
                .unwrap_or(now + Duration::hours(24));
            let sleep_for = (wake - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(0));

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {
                    // Due alarms are queued at the top of the loop.
                }
                outcome = self.outcomes.recv() => {
                    if let Some(outcome) = outcome {
                        self.handle_outcome(outcome);
                    }
                }
                command = commands.recv() => {
                    match command {
                        Some(EngineCommand::Acknowledge(uid)) => self.acknowledge(&uid),
                        Some(EngineCommand::Defer { uid, when, reminder }) => {
                            if let Err(e) = self.defer_event(&uid, when, reminder) {
                                warn!("Deferral of {} rejected: {}", uid, e);
                            }
                        }
                        Some(EngineCommand::StopAudio) => self.dispatcher.stop_audio(),
                        Some(EngineCommand::Stop) | None => break,
                    }
                }
            }
        }
        self.terminate()?;
        Ok(())
    }
}
