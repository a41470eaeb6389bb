use crate::ports::Notifier;

use lettre::{
    address::AddressError,
    message::Mailbox,
    transport::smtp::{authentication::Credentials, Error as SmtpError},
    Message, SmtpTransport, Transport,
};
use serde::{Deserialize, Serialize};
use std::thread;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum MailerError {
    #[error("invalid address: {0}")]
    Address(#[from] AddressError),
    #[error("smtp relay: {0}")]
    Relay(#[from] SmtpError),
    #[error("no recipients configured")]
    NoRecipients,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct MailerSettings {
    pub user: String,
    pub pass: String,
    pub relay: String,
    pub from: String,
    pub to: Vec<String>,
    /// Prefix for subjects, defaults to the host name.
    #[serde(default)]
    pub machine_id: Option<String>,
}

pub struct Mailer {
    from: Mailbox,
    vec_to: Vec<Mailbox>,
    machine_id: String,
    relay: SmtpTransport,
}

impl Mailer {
    pub fn new(settings: MailerSettings) -> Result<Mailer, MailerError> {
        if settings.to.is_empty() {
            return Err(MailerError::NoRecipients);
        }

        let vec_to = settings
            .to
            .iter()
            .map(|to| to.parse())
            .collect::<Result<Vec<Mailbox>, _>>()?;

        Ok(Mailer {
            from: settings.from.parse()?,
            vec_to,
            machine_id: settings.machine_id.unwrap_or_else(machine_name),
            relay: SmtpTransport::relay(&settings.relay)?
                .credentials(Credentials::new(settings.user, settings.pass))
                .build(),
        })
    }

    fn subject(&self, title: &str) -> String {
        format!("{}: {}", self.machine_id, title)
    }
}

impl Notifier for Mailer {
    fn notify(&self, title: &str, message: &str) {
        let mut builder = Message::builder().from(self.from.clone());
        for to in &self.vec_to {
            builder = builder.to(to.clone())
        }

        let email = match builder.subject(self.subject(title)).body(message.to_string()) {
            Ok(email) => email,
            Err(e) => {
                error!(error = %e, "failed to build email");
                return;
            }
        };

        // A slow relay must not hold up the caller, which may be about to
        // shut the host down.
        let relay = self.relay.clone();
        let title = title.to_string();
        let spawned = thread::Builder::new()
            .name("mailer".into())
            .spawn(move || match relay.send(&email) {
                Ok(_) => debug!(%title, "email sent"),
                Err(e) => error!(error = %e, "failed to send email"),
            });
        if let Err(e) = spawned {
            error!(error = %e, "failed to start mail sender");
        }
    }
}

fn machine_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "upsmon".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        net::TcpListener,
        time::{Duration, Instant},
    };

    fn settings() -> MailerSettings {
        MailerSettings {
            user: "alerts".into(),
            pass: "secret".into(),
            relay: "smtp.example.com".into(),
            from: "ups@example.com".into(),
            to: vec!["ops@example.com".into()],
            machine_id: Some("nas".into()),
        }
    }

    #[test]
    fn subject_is_prefixed_with_machine_id() {
        let mailer = Mailer::new(settings()).unwrap();
        assert_eq!(mailer.subject("Power lost"), "nas: Power lost");
    }

    #[test]
    fn machine_id_defaults_to_host_name() {
        let mailer = Mailer::new(MailerSettings {
            machine_id: None,
            ..settings()
        })
        .unwrap();
        assert!(!mailer.machine_id.is_empty());
    }

    #[test]
    fn hung_relay_does_not_block_notify() {
        // Accepts connections but never speaks SMTP.
        let relay = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = relay.local_addr().unwrap().port();

        let mut mailer = Mailer::new(settings()).unwrap();
        mailer.relay = SmtpTransport::builder_dangerous("127.0.0.1")
            .port(port)
            .build();

        let started = Instant::now();
        mailer.notify("Shutting down", "now");
        assert!(started.elapsed() < Duration::from_secs(1));
        drop(relay);
    }

    #[test]
    fn rejects_bad_recipient() {
        let result = Mailer::new(MailerSettings {
            to: vec!["not an address".into()],
            ..settings()
        });
        assert!(matches!(result, Err(MailerError::Address(_))));
    }

    #[test]
    fn requires_a_recipient() {
        let result = Mailer::new(MailerSettings {
            to: vec![],
            ..settings()
        });
        assert!(matches!(result, Err(MailerError::NoRecipients)));
    }
}
