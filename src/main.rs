mod control;
mod instance;
mod mailer;
mod monitor;
mod ports;
mod scheduler;
mod settings;
mod status;
mod ups;

use std::{error::Error, path::PathBuf, process::exit, sync::Arc};

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use instance::{InstanceError, SingletonGuard};
use mailer::Mailer;
use monitor::PowerMonitor;
use ports::{
    DryRunShutdown, GatedNotifier, LogNotifier, LogPresenter, Notifier, ShutdownExecutor,
    SystemShutdown,
};
use scheduler::ShutdownScheduler;
use settings::{LiveFlags, Settings};
use ups::NutClient;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Path to the TOML config file.
    #[clap(short, long, value_parser, default_value = "upsmon.toml")]
    config: PathBuf,

    /// Write a config file with the defaults and exit.
    #[clap(long, value_parser)]
    init: bool,

    /// Log instead of shutting the host down.
    #[clap(long, value_parser)]
    dry_run: bool,

    /// Don't read control commands from stdin.
    #[clap(long, value_parser)]
    no_control: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    if let Err(e) = run(Args::parse()) {
        error!("{}", e);
        exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    if args.init {
        if args.config.exists() {
            return Err(format!("{} already exists", args.config.display()).into());
        }
        Settings::write_default(&args.config)?;
        info!(path = %args.config.display(), "Config written, fill it in and restart.");
        return Ok(());
    }

    let _guard = match SingletonGuard::acquire() {
        Ok(guard) => guard,
        Err(InstanceError::AlreadyRunning) => {
            warn!("UPS monitor is already running.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let settings = Settings::load(&args.config)?;
    if cfg!(debug_assertions) {
        let mut shown = settings.clone();
        shown.password = "****".into();
        if let Some(mailer) = shown.mailer.as_mut() {
            mailer.pass = "****".into();
        }
        info!("{:#?}", shown);
    }

    let flags = LiveFlags::new(&settings);
    let mut sinks: Vec<Box<dyn Notifier>> = vec![Box::new(LogNotifier)];
    if let Some(mailer_settings) = settings.mailer.clone() {
        sinks.push(Box::new(Mailer::new(mailer_settings)?));
    }
    let notifier: Arc<dyn Notifier> = Arc::new(GatedNotifier::new(flags.clone(), sinks));

    let executor: Arc<dyn ShutdownExecutor> = if args.dry_run {
        Arc::new(DryRunShutdown)
    } else {
        Arc::new(SystemShutdown)
    };

    if !args.no_control {
        control::spawn(flags, args.config.clone())?;
    }

    let client = NutClient::new(&settings.host, settings.port);
    let scheduler = ShutdownScheduler::new(Arc::clone(&notifier), executor);
    let mut monitor = PowerMonitor::new(
        client,
        settings,
        scheduler,
        Box::new(LogPresenter::default()),
        notifier,
    );

    monitor.run()?;
    Ok(())
}
