// Binary entry point: the alarm daemon and its one-shot scheduling
// commands.

use anyhow::Result;
use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use simplelog::{ColorChoice, Config as LogConfig, LevelFilter, TermLogger, TerminalMode};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use tocsin::cli;
use tocsin::context::{AppContext, StandardContext};
use tocsin::engine::{Engine, EngineCommand};
use tocsin::error::AlarmError;
use tocsin::model::datetime::AlarmDateTime;
use tocsin::model::event::EmailAddress;
use tocsin::requests::exit_codes;
use tocsin::requests::{PeriodKind, RecurrenceSpec, ScheduleOptions};

fn parse_start(s: &str) -> Option<AlarmDateTime> {
    for fmt in ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            let local = Local.from_local_datetime(&naive).earliest()?;
            return Some(AlarmDateTime::Timed(local.with_timezone(&Utc)));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(AlarmDateTime::DateOnly)
}

struct ParsedOptions {
    start: AlarmDateTime,
    options: ScheduleOptions,
    positional: Vec<String>,
}

fn parse_schedule_args(args: &[String]) -> Result<ParsedOptions, String> {
    let mut start = AlarmDateTime::Timed(Utc::now());
    let mut options = ScheduleOptions::default();
    let mut positional = Vec::new();
    let mut recur: Option<String> = None;
    let mut count: i32 = -1;

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        let mut take_value = |i: &mut usize| -> Result<String, String> {
            *i += 1;
            args.get(*i)
                .cloned()
                .ok_or_else(|| format!("missing value for {}", arg))
        };
        match arg.as_str() {
            "--at" => {
                let v = take_value(&mut i)?;
                start = parse_start(&v).ok_or_else(|| format!("invalid date/time '{}'", v))?;
            }
            "--recur" => recur = Some(take_value(&mut i)?),
            "--count" => {
                let v = take_value(&mut i)?;
                count = v.parse().map_err(|_| format!("invalid count '{}'", v))?;
            }
            "--late-cancel" => {
                let v = take_value(&mut i)?;
                options.late_cancel =
                    Some(v.parse().map_err(|_| format!("invalid minutes '{}'", v))?);
            }
            "--reminder" => {
                let v = take_value(&mut i)?;
                options.reminder_minutes =
                    v.parse().map_err(|_| format!("invalid minutes '{}'", v))?;
            }
            "--repeat" => {
                let v = take_value(&mut i)?;
                let (interval, repeats) = v
                    .split_once(':')
                    .ok_or_else(|| format!("expected <interval>:<count>, got '{}'", v))?;
                options.sub_repeat_interval = interval
                    .parse()
                    .map_err(|_| format!("invalid interval '{}'", interval))?;
                options.sub_repeat_count = repeats
                    .parse()
                    .map_err(|_| format!("invalid repeat count '{}'", repeats))?;
            }
            "--at-login" => options.at_login = true,
            "--archive" => options.archive = true,
            "--auto-close" => options.auto_close = true,
            "--beep" => options.beep = true,
            "--confirm-ack" => options.confirm_ack = true,
            "--work-time-only" => options.work_time_only = true,
            "--exclude-holidays" => options.exclude_holidays = true,
            "--bg" => options.bg_colour = Some(take_value(&mut i)?),
            "--fg" => options.fg_colour = Some(take_value(&mut i)?),
            "--audio" => options.audio_file = Some(take_value(&mut i)?),
            other if other.starts_with("--") => {
                return Err(format!("unknown option {}", other));
            }
            _ => positional.push(arg.clone()),
        }
        i += 1;
    }

    if let Some(spec) = recur {
        options.recurrence = Some(if spec.to_uppercase().contains("FREQ=") {
            RecurrenceSpec::RRule(spec)
        } else {
            let (period, interval) = match spec.split_once(':') {
                Some((p, n)) => (
                    p.to_string(),
                    n.parse::<u32>()
                        .map_err(|_| format!("invalid interval in '{}'", spec))?,
                ),
                None => (spec.clone(), 1),
            };
            let kind = PeriodKind::parse(&period)
                .ok_or_else(|| format!("unknown recurrence period '{}'", period))?;
            RecurrenceSpec::Period {
                kind,
                interval,
                count,
                end: None,
            }
        });
    }

    Ok(ParsedOptions {
        start,
        options,
        positional,
    })
}

fn schedule_exit_code(e: &AlarmError) -> i32 {
    match e {
        AlarmError::LoadFailed { .. } | AlarmError::SaveFailed { .. } => exit_codes::IO_ERROR,
        _ => exit_codes::SCHEDULING_FAILED,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args: Vec<String> = env::args().collect();
    let binary_name = args
        .first()
        .cloned()
        .unwrap_or_else(|| "tocsin".to_string());

    // Parse for --root before creating the context.
    let mut override_root: Option<PathBuf> = None;
    if let Some(pos) = args.iter().position(|arg| arg == "--root" || arg == "-r")
        && pos + 1 < args.len()
    {
        override_root = Some(PathBuf::from(args[pos + 1].clone()));
        args.remove(pos); // remove flag
        args.remove(pos); // remove value (now at the same index)
    }

    TermLogger::init(
        LevelFilter::Info,
        LogConfig::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .ok();

    let ctx: Arc<dyn AppContext> = Arc::new(StandardContext::new(override_root));

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" || args[1] == "help" {
        cli::print_help(&binary_name);
        return Ok(());
    }

    let command = args[1].clone();
    let rest: Vec<String> = args[2..].to_vec();

    let mut engine = match Engine::init(ctx.clone()) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(exit_codes::IO_ERROR);
        }
    };
    if let Err(e) = engine.startup() {
        eprintln!("Error: {}", e);
        std::process::exit(exit_codes::IO_ERROR);
    }

    match command.as_str() {
        "daemon" => {
            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                let _ = tx.send(EngineCommand::Stop);
            });
            engine.run(rx).await?;
        }
        "message" | "file" | "command" | "audio" => {
            let parsed = match parse_schedule_args(&rest) {
                Ok(p) => p,
                Err(msg) => {
                    eprintln!("Error: {}", msg);
                    std::process::exit(exit_codes::INVALID_ARGS);
                }
            };
            let Some(payload) = parsed.positional.first().cloned() else {
                eprintln!("Error: missing {} argument", command);
                std::process::exit(exit_codes::INVALID_ARGS);
            };
            let result = match command.as_str() {
                "message" => engine.schedule_message(&payload, parsed.start, parsed.options),
                "file" => engine.schedule_file(&payload, parsed.start, parsed.options),
                "command" => {
                    engine.schedule_command(&payload, false, parsed.start, parsed.options)
                }
                _ => engine.schedule_audio(&payload, None, parsed.start, parsed.options),
            };
            match result {
                Ok(uid) => println!("{}", uid),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(schedule_exit_code(&e));
                }
            }
            engine.terminate()?;
        }
        "email" => {
            let parsed = match parse_schedule_args(&rest) {
                Ok(p) => p,
                Err(msg) => {
                    eprintln!("Error: {}", msg);
                    std::process::exit(exit_codes::INVALID_ARGS);
                }
            };
            if parsed.positional.len() < 3 {
                eprintln!("Usage: {} email <addr> <subject> <body>", binary_name);
                std::process::exit(exit_codes::INVALID_ARGS);
            }
            let to: Vec<EmailAddress> = parsed.positional[0]
                .split(',')
                .map(EmailAddress::new)
                .collect();
            match engine.schedule_email(
                0,
                to,
                &parsed.positional[1],
                &parsed.positional[2],
                Vec::new(),
                false,
                parsed.start,
                parsed.options,
            ) {
                Ok(uid) => println!("{}", uid),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(schedule_exit_code(&e));
                }
            }
            engine.terminate()?;
        }
        "list" => {
            for (uid, next) in engine.list() {
                match next {
                    Some(t) => println!("{}  {}", uid, t.format_short()),
                    None => println!("{}  (expired)", uid),
                }
            }
            engine.terminate()?;
        }
        "trigger" | "cancel" | "edit" => {
            let Some(uid) = rest.first() else {
                eprintln!("Usage: {} {} <uid>", binary_name, command);
                std::process::exit(exit_codes::INVALID_ARGS);
            };
            let result = match command.as_str() {
                "trigger" => engine.trigger_event(uid),
                "cancel" => engine.cancel_event(uid),
                _ => engine.edit_event(uid),
            };
            if let Err(e) = result {
                eprintln!("Error: {}", e);
                std::process::exit(schedule_exit_code(&e));
            }
            engine.terminate()?;
        }
        other => {
            eprintln!("Error: unknown command '{}'", other);
            cli::print_help(&binary_name);
            std::process::exit(exit_codes::INVALID_ARGS);
        }
    }
    Ok(())
}
