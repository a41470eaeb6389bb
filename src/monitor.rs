use crate::{
    ports::{Notifier, Presenter},
    scheduler::ShutdownScheduler,
    settings::Settings,
    status::{PowerState, UpsStatus},
    ups::{UpsClient, UpsError},
};

use std::{sync::Arc, thread};
use tracing::{debug, error, info, warn};

const STATUS_VAR: &str = "ups.status";
const CHARGE_VAR: &str = "battery.charge";

pub struct PowerMonitor<C: UpsClient> {
    client: C,
    settings: Settings,
    state: PowerState,
    scheduler: ShutdownScheduler,
    presenter: Box<dyn Presenter + Send>,
    notifier: Arc<dyn Notifier>,
}

impl<C: UpsClient> PowerMonitor<C> {
    pub fn new(
        client: C,
        settings: Settings,
        scheduler: ShutdownScheduler,
        presenter: Box<dyn Presenter + Send>,
        notifier: Arc<dyn Notifier>,
    ) -> PowerMonitor<C> {
        PowerMonitor {
            client,
            settings,
            state: PowerState::Connecting,
            scheduler,
            presenter,
            notifier,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> PowerState {
        self.state
    }

    #[cfg(test)]
    pub fn scheduler(&self) -> &ShutdownScheduler {
        &self.scheduler
    }

    /// Connects and logs in. Either failing ends the session.
    pub fn start(&mut self) -> Result<(), UpsError> {
        self.presenter.set_tooltip("UPS monitor started");

        let result = self.client.connect().and_then(|_| {
            self.client
                .authenticate(&self.settings.user, &self.settings.password)
        });

        if let Err(e) = result {
            error!(
                error = %e,
                host = %self.settings.host,
                port = self.settings.port,
                "UPS session failed"
            );
            self.presenter.set_error();
            self.presenter
                .set_tooltip(&format!("Connection failed!\n{}", e));
            self.notifier.notify("UPS monitor stopped", &e.to_string());
            return Err(e);
        }

        info!(
            host = %self.settings.host,
            port = self.settings.port,
            ups = %self.settings.ups_name,
            "UPS monitor running and connected!"
        );
        Ok(())
    }

    /// Polls until the process exits. Only session setup can fail.
    pub fn run(&mut self) -> Result<(), UpsError> {
        self.start()?;
        loop {
            self.tick();
            thread::sleep(self.settings.poll_interval());
        }
    }

    /// Reads the UPS once and reacts to any change of power state.
    pub fn tick(&mut self) -> PowerState {
        let ups_name = self.settings.ups_name.clone();
        let status = self.client.get_variable(&ups_name, STATUS_VAR);
        let charge = self.client.get_variable(&ups_name, CHARGE_VAR);
        let status = UpsStatus::new(&ups_name, status, charge);
        debug!(?status, timer = ?self.scheduler.state(), "polled");

        if status.state != self.state {
            self.transition(&status);
        }
        self.report(&status);

        status.state
    }

    fn transition(&mut self, status: &UpsStatus) {
        info!(from = %self.state, to = %status.state, "power state changed");
        self.state = status.state;

        match status.state {
            PowerState::Online => {
                self.scheduler.cancel();
                self.notifier.notify(
                    "Power restored",
                    &format!("UPS {} is back on line power.", status.ups_name),
                );
            }
            PowerState::OnBattery => {
                let delay = self.settings.shutdown_delay();
                self.scheduler.arm(delay);
                self.notifier.notify(
                    "Power lost",
                    &format!(
                        "UPS {} is on battery ({}%), shutting down in {}s.",
                        status.ups_name,
                        status.charge,
                        delay.as_secs()
                    ),
                );
            }
            // A pending shutdown keeps counting down while the UPS is unreachable.
            PowerState::Degraded => {
                warn!(status = %status.status, "UPS status unreadable");
                self.notifier.notify(
                    "UPS unreachable",
                    "Check the connection or the credentials.",
                );
            }
            PowerState::Connecting => {}
        }
    }

    fn report(&mut self, status: &UpsStatus) {
        match status.state {
            PowerState::Online => self.presenter.set_connected(),
            _ => self.presenter.set_error(),
        }
        self.presenter.set_tooltip(&status.tooltip());
    }
}
