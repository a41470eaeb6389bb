//! Seams between the monitor and the platform it runs on.

use crate::settings::LiveFlags;

use std::{io, process::Command};
use tracing::{error, info, warn};

pub trait Presenter {
    fn set_connected(&mut self);
    fn set_error(&mut self);
    fn set_tooltip(&mut self, text: &str);
}

pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

pub trait ShutdownExecutor: Send + Sync {
    fn perform_shutdown(&self) -> io::Result<()>;
}

/// Presents status on the log, only writing when something changed.
#[derive(Default)]
pub struct LogPresenter {
    connected: Option<bool>,
    tooltip: String,
}

impl Presenter for LogPresenter {
    fn set_connected(&mut self) {
        if self.connected != Some(true) {
            info!("status: ok");
            self.connected = Some(true);
        }
    }

    fn set_error(&mut self) {
        if self.connected != Some(false) {
            warn!("status: error");
            self.connected = Some(false);
        }
    }

    fn set_tooltip(&mut self, text: &str) {
        if self.tooltip != text {
            info!("{}", text.replace('\n', " | "));
            self.tooltip = text.to_string();
        }
    }
}

pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        warn!(title, "{}", message);
    }
}

/// Forwards to every sink while the live notification flag is set.
pub struct GatedNotifier {
    flags: LiveFlags,
    sinks: Vec<Box<dyn Notifier>>,
}

impl GatedNotifier {
    pub fn new(flags: LiveFlags, sinks: Vec<Box<dyn Notifier>>) -> GatedNotifier {
        GatedNotifier { flags, sinks }
    }
}

impl Notifier for GatedNotifier {
    fn notify(&self, title: &str, message: &str) {
        if !self.flags.notifications() {
            return;
        }
        for sink in &self.sinks {
            sink.notify(title, message);
        }
    }
}

pub struct SystemShutdown;

impl ShutdownExecutor for SystemShutdown {
    fn perform_shutdown(&self) -> io::Result<()> {
        info!("Shutting down.");
        let output = if cfg!(windows) {
            Command::new("C:\\Windows\\System32\\shutdown.exe")
                .args(["/s", "/f", "/t", "0"])
                .output()?
        } else {
            Command::new("shutdown").args(["-h", "now"]).output()?
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(status = %output.status, stderr = %stderr.trim(), "shutdown command failed");
            return Err(io::Error::new(io::ErrorKind::Other, "shutdown command failed"));
        }
        Ok(())
    }
}

/// Stands in for `SystemShutdown` when testing a setup.
pub struct DryRunShutdown;

impl ShutdownExecutor for DryRunShutdown {
    fn perform_shutdown(&self) -> io::Result<()> {
        warn!("Dry run, not shutting down.");
        Ok(())
    }
}
