//! Shared command-line interface logic, like printing help.

pub fn print_help(binary_name: &str) {
    println!(
        "tocsin {} - personal alarm scheduler",
        env!("CARGO_PKG_VERSION")
    );
    println!();
    println!("USAGE:");
    println!("  {} [--root <dir>] <command> [options]", binary_name);
    println!();
    println!("COMMANDS:");
    println!("  daemon                          Run the alarm scheduler in the foreground");
    println!("  message <text>                  Schedule a message alarm");
    println!("  file <path>                     Schedule a file-display alarm");
    println!("  command <cmdline>               Schedule a command alarm");
    println!("  email <addr> <subject> <body>   Schedule an email alarm");
    println!("  audio <path>                    Schedule an audio alarm");
    println!("  list                            List active alarms and next triggers");
    println!("  trigger <uid>                   Fire an alarm now");
    println!("  cancel <uid>                    Delete an alarm");
    println!("  edit <uid>                      Hand an alarm to the editor");
    println!();
    println!("SCHEDULING OPTIONS:");
    println!("  --at <YYYY-MM-DD[ HH:MM]>       Trigger date or datetime (default: now)");
    println!("  --recur <RRULE|period:n>        Recurrence, e.g. 'daily:1', 'weekly:2',");
    println!("                                  or a raw RRULE string");
    println!("  --count <n>                     Number of occurrences (-1 = infinite)");
    println!("  --late-cancel <mins>            Cancel if not handled within <mins>");
    println!("  --reminder <mins>               Reminder this many minutes in advance");
    println!("  --repeat <interval>:<count>     Sub-repetition after each occurrence");
    println!("  --at-login                      Also fire at every program start");
    println!("  --archive                       Archive instead of delete when done");
    println!();
    println!("OTHER OPTIONS:");
    println!("  --root <dir>                    Use <dir> for config and data");
    println!("  -h, --help                      Show this help");
    println!();
    println!("EXIT CODES: 0 ok, 1 invalid arguments, 2 scheduling failed, 3 I/O error");
}
