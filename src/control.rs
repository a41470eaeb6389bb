use crate::settings::{Flags, LiveFlags, Settings};

use std::{
    io::{self, BufRead},
    path::PathBuf,
    process::exit,
    thread,
};
use tracing::{info, warn};

#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    Flags(Flags),
    Changed(Flags),
    Quit,
    Unknown(String),
}

/// Applies one control line to the live flags.
pub fn apply(line: &str, flags: &LiveFlags) -> Reply {
    let mut words = line.split_whitespace();
    let (target, arg) = (words.next().unwrap_or(""), words.next().unwrap_or("toggle"));

    let set = |current: bool| match arg {
        "on" => Some(true),
        "off" => Some(false),
        "toggle" => Some(!current),
        _ => None,
    };

    match target {
        "notify" | "notifications" => match set(flags.notifications()) {
            Some(value) => Reply::Changed(flags.update(|f| f.notifications = value)),
            None => Reply::Unknown(line.to_string()),
        },
        "autostart" => match set(flags.get().autostart) {
            Some(value) => {
                info!(
                    "autostart is only recorded in the config, \
                     register upsmon with the service manager to start it on boot"
                );
                Reply::Changed(flags.update(|f| f.autostart = value))
            }
            None => Reply::Unknown(line.to_string()),
        },
        "status" => Reply::Flags(flags.get()),
        "quit" | "exit" => Reply::Quit,
        _ => Reply::Unknown(line.to_string()),
    }
}

/// Reads control commands from stdin until it closes, saving changed flags
/// to `config`.
pub fn spawn(flags: LiveFlags, config: PathBuf) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new().name("control".into()).spawn(move || {
        for line in io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "control input failed");
                    return;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match apply(&line, &flags) {
                Reply::Flags(flags) => info!(
                    notifications = flags.notifications,
                    autostart = flags.autostart,
                    "flags"
                ),
                Reply::Changed(flags) => {
                    info!(
                        notifications = flags.notifications,
                        autostart = flags.autostart,
                        "flags changed"
                    );
                    if let Err(e) = Settings::save_flags(&config, flags) {
                        warn!(error = %e, path = %config.display(), "failed to save flags");
                    }
                }
                Reply::Quit => {
                    info!("Quitting.");
                    exit(0)
                }
                Reply::Unknown(line) => warn!(
                    command = %line,
                    "unknown command, try: notify on|off|toggle, autostart on|off|toggle, status, quit"
                ),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggles_and_sets_flags() {
        let flags = LiveFlags::new(&Settings::default());

        assert_eq!(
            apply("notify", &flags),
            Reply::Changed(Flags {
                notifications: false,
                autostart: true
            })
        );
        apply("notify on", &flags);
        apply("autostart off", &flags);
        assert_eq!(
            flags.get(),
            Flags {
                notifications: true,
                autostart: false
            }
        );
    }

    #[test]
    fn status_reports_without_changing() {
        let flags = LiveFlags::new(&Settings::default());
        assert_eq!(apply("status", &flags), Reply::Flags(flags.get()));
        assert!(matches!(apply("autostart toggle", &flags), Reply::Changed(f) if !f.autostart));
    }

    #[test]
    fn reports_unknown_commands() {
        let flags = LiveFlags::new(&Settings::default());
        assert_eq!(apply("reboot", &flags), Reply::Unknown("reboot".into()));
        assert_eq!(apply("notify maybe", &flags), Reply::Unknown("notify maybe".into()));
        assert_eq!(apply("quit", &flags), Reply::Quit);
        assert!(flags.notifications());
    }
}
