// Hands due alarms off to the display / command / email / audio
// collaborators.
//
// Collaborators are trait objects so the engine never depends on a
// concrete subsystem: the default display is a desktop notification, the
// default commander spawns a shell, and the mail/audio defaults merely
// report that no transport or decoder is wired in. Long-running work
// (commands, audio) runs on worker threads which post their outcome back
// over a channel the engine drains; audio playback is serialised by a
// process-wide mutex so at most one player thread is ever active.

use log::{info, warn};
use notify_rust::Notification;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{AlarmError, AlarmResult};
use crate::model::event::{Action, AlarmKind, AudioSettings, EmailAddress, Event};

/// Exit classification for command alarms and pre/post actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandExit {
    Success,
    /// The process died on a signal.
    Died,
    /// The command was found but not executable.
    Unauthorised,
    NotFound,
    /// The process could not be started at all.
    StartFail,
    /// Execution was skipped (alarms disabled or empty command).
    Inactive,
}

impl CommandExit {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandExit::Success | CommandExit::Inactive)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPhase {
    Main,
    Pre,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MailResult {
    Queued,
    Sent,
    Error(String),
}

/// Completion reports posted back to the engine from worker threads.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    CommandExited {
        uid: String,
        phase: CommandPhase,
        exit: CommandExit,
        output: String,
    },
    AudioFinished {
        uid: String,
        error: Option<String>,
    },
    MailFinished {
        uid: String,
        result: MailResult,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DisplayFlags {
    pub allow_defer: bool,
    pub allow_edit: bool,
}

/// Shows message and file alarms. Out-of-scope GUI concerns live behind
/// this seam.
pub trait DisplayFactory: Send + Sync {
    fn create(&self, event: &Event, kind: AlarmKind, flags: DisplayFlags) -> AlarmResult<()>;
}

/// Spawns a shell command, blocking the calling worker thread until exit.
pub trait Commander: Send + Sync {
    fn run(&self, command: &str, script: bool, on_output: &mut dyn FnMut(&str)) -> CommandExit;
}

/// Assembles and sends mail. Transport is out of scope; implementations
/// report a single status per send.
pub trait Mailer: Send + Sync {
    fn send(
        &self,
        from_id: u32,
        to: &[EmailAddress],
        subject: &str,
        body: &str,
        attachments: &[String],
        bcc: bool,
    ) -> MailResult;
}

/// Plays an audio file, blocking the calling worker thread. The dispatcher
/// holds the global audio mutex for the duration, so implementations never
/// see concurrent playback.
pub trait AudioPlayer: Send + Sync {
    fn play(&self, settings: &AudioSettings) -> AlarmResult<()>;
    /// Requests an early stop of the current playback, if any.
    fn stop(&self);
}

// --- Default collaborators ---

/// Desktop-notification display.
pub struct NotificationDisplay;

impl DisplayFactory for NotificationDisplay {
    fn create(&self, event: &Event, _kind: AlarmKind, _flags: DisplayFlags) -> AlarmResult<()> {
        let (summary, body) = match &event.action {
            Action::Message(text) => ("Alarm".to_string(), text.clone()),
            Action::File(url) => ("Alarm file".to_string(), url.clone()),
            Action::Command { command, .. } => ("Command output".to_string(), command.clone()),
            _ => ("Alarm".to_string(), String::new()),
        };
        // Notification daemons can block; fire from a detached thread.
        std::thread::spawn(move || {
            let _ = Notification::new()
                .summary(&summary)
                .body(&body)
                .appname("Tocsin")
                .show();
        });
        Ok(())
    }
}

/// Runs commands via the user's shell.
pub struct ShellCommander;

impl Commander for ShellCommander {
    fn run(&self, command: &str, script: bool, on_output: &mut dyn FnMut(&str)) -> CommandExit {
        use std::io::{BufRead, BufReader};
        use std::process::{Command, Stdio};

        if command.trim().is_empty() {
            return CommandExit::Inactive;
        }
        let mut cmd = if script {
            // Feed script text to the shell's stdin.
            let mut c = Command::new("sh");
            c.arg("-s");
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        };
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        if script {
            cmd.stdin(Stdio::piped());
        }

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(_) => return CommandExit::StartFail,
        };
        if script {
            use std::io::Write;
            if let Some(stdin) = child.stdin.take() {
                let mut stdin = stdin;
                let _ = stdin.write_all(command.as_bytes());
            }
        }
        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                on_output(&line);
            }
        }
        if let Some(stderr) = child.stderr.take() {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                on_output(&line);
            }
        }
        match child.wait() {
            Ok(status) => {
                if status.success() {
                    CommandExit::Success
                } else {
                    match status.code() {
                        Some(127) => CommandExit::NotFound,
                        Some(126) => CommandExit::Unauthorised,
                        Some(_) => CommandExit::Died,
                        None => CommandExit::Died,
                    }
                }
            }
            Err(_) => CommandExit::Died,
        }
    }
}

/// Stand-in mailer used when no transport is configured.
pub struct NullMailer;

impl Mailer for NullMailer {
    fn send(
        &self,
        _from_id: u32,
        to: &[EmailAddress],
        subject: &str,
        _body: &str,
        _attachments: &[String],
        _bcc: bool,
    ) -> MailResult {
        warn!(
            "No mail transport configured; dropping email '{}' to {} recipient(s)",
            subject,
            to.len()
        );
        MailResult::Error("no mail transport configured".into())
    }
}

/// Stand-in audio player used when no decoder is configured; completes
/// immediately.
pub struct NullAudioPlayer;

impl AudioPlayer for NullAudioPlayer {
    fn play(&self, settings: &AudioSettings) -> AlarmResult<()> {
        info!("Audio playback requested for '{}'", settings.file);
        Ok(())
    }

    fn stop(&self) {}
}

// --- Dispatcher ---

pub struct Dispatcher {
    pub display: Box<dyn DisplayFactory>,
    commander: Arc<dyn Commander>,
    mailer: Arc<dyn Mailer>,
    audio: Arc<dyn AudioPlayer>,
    /// Serialises audio playback process-wide.
    audio_lock: Arc<Mutex<()>>,
    tx: UnboundedSender<DispatchOutcome>,
}

impl Dispatcher {
    pub fn new(
        display: Box<dyn DisplayFactory>,
        commander: Arc<dyn Commander>,
        mailer: Arc<dyn Mailer>,
        audio: Arc<dyn AudioPlayer>,
        tx: UnboundedSender<DispatchOutcome>,
    ) -> Dispatcher {
        Dispatcher {
            display,
            commander,
            mailer,
            audio,
            audio_lock: Arc::new(Mutex::new(())),
            tx,
        }
    }

    pub fn with_defaults(tx: UnboundedSender<DispatchOutcome>) -> Dispatcher {
        Dispatcher::new(
            Box::new(NotificationDisplay),
            Arc::new(ShellCommander),
            Arc::new(NullMailer),
            Arc::new(NullAudioPlayer),
            tx,
        )
    }

    /// Executes the event's main action. Pre-actions are the engine's
    /// responsibility and have already completed when this is called.
    pub fn execute(&self, event: &Event, kind: AlarmKind, flags: DisplayFlags) -> AlarmResult<()> {
        match &event.action {
            Action::Message(_) | Action::File(_) => {
                self.display.create(event, kind, flags)?;
                if let Some(sound) = &event.sound {
                    self.play_audio(&event.uid, sound.clone());
                }
                Ok(())
            }
            Action::Command { command, script } => {
                if event.display_command_output {
                    self.display.create(event, kind, flags)?;
                }
                self.run_command(&event.uid, command.clone(), *script, CommandPhase::Main);
                Ok(())
            }
            Action::Email {
                from_id,
                to,
                subject,
                body,
                attachments,
                bcc,
            } => {
                let result =
                    self.mailer
                        .send(*from_id, to, subject, body, attachments, *bcc);
                let _ = self.tx.send(DispatchOutcome::MailFinished {
                    uid: event.uid.clone(),
                    result: result.clone(),
                });
                match result {
                    MailResult::Error(msg) => Err(AlarmError::EmailError(msg)),
                    _ => Ok(()),
                }
            }
            Action::Audio(settings) => {
                self.play_audio(&event.uid, settings.clone());
                Ok(())
            }
        }
    }

    /// Starts the pre-display action; its exit arrives as a
    /// `CommandExited` outcome with phase `Pre`.
    pub fn run_pre_action(&self, event: &Event) -> bool {
        match &event.pre_action {
            Some(cmd) if !cmd.trim().is_empty() => {
                self.run_command(&event.uid, cmd.clone(), false, CommandPhase::Pre);
                true
            }
            _ => false,
        }
    }

    /// Fires the post-display action after the display was acknowledged.
    pub fn run_post_action(&self, event: &Event) {
        if let Some(cmd) = &event.post_action {
            if !cmd.trim().is_empty() {
                self.run_command(&event.uid, cmd.clone(), false, CommandPhase::Post);
            }
        }
    }

    fn run_command(&self, uid: &str, command: String, script: bool, phase: CommandPhase) {
        let commander = self.commander.clone();
        let tx = self.tx.clone();
        let uid = uid.to_string();
        std::thread::spawn(move || {
            let mut output = String::new();
            let exit = commander.run(&command, script, &mut |line| {
                output.push_str(line);
                output.push('\n');
            });
            let _ = tx.send(DispatchOutcome::CommandExited {
                uid,
                phase,
                exit,
                output,
            });
        });
    }

    /// Plays audio on a worker thread, holding the global audio lock for
    /// the duration of playback.
    pub fn play_audio(&self, uid: &str, settings: AudioSettings) {
        let audio = self.audio.clone();
        let lock = self.audio_lock.clone();
        let tx = self.tx.clone();
        let uid = uid.to_string();
        std::thread::spawn(move || {
            let _guard = lock.lock().unwrap();
            let error = audio.play(&settings).err().map(|e| e.to_string());
            let _ = tx.send(DispatchOutcome::AudioFinished { uid, error });
        });
    }

    /// Stops the current audio playback, if any.
    pub fn stop_audio(&self) {
        self.audio.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn shell_commander_classifies_missing_command() {
        let exit = ShellCommander.run("definitely_not_a_command_xyz", false, &mut |_| {});
        assert_eq!(exit, CommandExit::NotFound);
    }

    #[test]
    fn shell_commander_captures_output() {
        let mut captured = String::new();
        let exit = ShellCommander.run("echo hello", false, &mut |line| {
            captured.push_str(line);
        });
        assert_eq!(exit, CommandExit::Success);
        assert_eq!(captured.trim(), "hello");
    }

    #[tokio::test]
    async fn command_outcome_is_posted() {
        let (tx, mut rx) = unbounded_channel();
        let dispatcher = Dispatcher::with_defaults(tx);
        dispatcher.run_command("uid-1", "true".into(), false, CommandPhase::Pre);
        let outcome = rx.recv().await.unwrap();
        match outcome {
            DispatchOutcome::CommandExited { uid, phase, exit, .. } => {
                assert_eq!(uid, "uid-1");
                assert_eq!(phase, CommandPhase::Pre);
                assert_eq!(exit, CommandExit::Success);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
