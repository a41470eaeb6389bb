use crate::status::Value;

use std::{
    io::{self, BufRead, BufReader, Write},
    net::TcpStream,
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, trace, warn};

// NUT speaks ASCII lines terminated by a line feed.
const TERMINATOR: char = '\n';
const QUOTE: char = '"';
const OK_PREFIX: &str = "OK";
const ERR_PREFIX: &str = "ERR";

// How many foreign lines a variable read skips before giving up.
const MAX_STALE_REPLIES: usize = 3;

const READ_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum UpsError {
    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: String, source: io::Error },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("no reply within {}s", READ_TIMEOUT.as_secs())]
    Timeout,
    #[error("connection closed by the server")]
    Closed,
    #[error("not connected")]
    NotConnected,
    #[error("communication failed: {0}")]
    Io(#[from] io::Error),
}

/// What the monitor needs from a UPS connection.
pub trait UpsClient {
    fn connect(&mut self) -> Result<(), UpsError>;
    fn authenticate(&mut self, user: &str, pass: &str) -> Result<(), UpsError>;
    fn get_variable(&mut self, ups_name: &str, var_name: &str) -> Value;
}

struct Connection {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

pub struct NutClient {
    host: String,
    port: u16,
    connection: Option<Connection>,
}

impl NutClient {
    pub fn new(host: &str, port: u16) -> NutClient {
        NutClient {
            host: host.to_string(),
            port,
            connection: None,
        }
    }

    pub fn send_command(&mut self, cmd: &str) -> Result<String, UpsError> {
        let connection = self.connection.as_mut().ok_or(UpsError::NotConnected)?;

        // Late replies to earlier commands would otherwise answer this one.
        let dropped = drain_stale(connection)?;
        if dropped > 0 {
            debug!(dropped, "discarded stale replies");
        }

        if cmd.starts_with("PASSWORD") {
            trace!("SEND PASSWORD ****");
        } else {
            trace!("SEND {}", cmd);
        }

        connection
            .writer
            .write_all(format!("{}{}", cmd, TERMINATOR).as_bytes())?;
        connection.writer.flush()?;

        self.read_reply()
    }

    fn read_reply(&mut self) -> Result<String, UpsError> {
        let connection = self.connection.as_mut().ok_or(UpsError::NotConnected)?;
        connection.reader.get_ref().set_read_timeout(Some(READ_TIMEOUT))?;

        let mut line = String::new();
        match connection.reader.read_line(&mut line) {
            Ok(0) => Err(UpsError::Closed),
            Ok(_) => {
                let line = line.trim().to_string();
                trace!("READ {}", line);
                Ok(line)
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Err(UpsError::Timeout)
            }
            Err(e) => Err(UpsError::Io(e)),
        }
    }

    fn expect_ok(&mut self, cmd: &str, what: &str) -> Result<(), UpsError> {
        match self.send_command(cmd) {
            Ok(res) if res.starts_with(OK_PREFIX) => Ok(()),
            Ok(res) => Err(UpsError::Auth(format!("{} rejected: {}", what, res))),
            Err(e) => Err(UpsError::Auth(format!("{} not answered: {}", what, e))),
        }
    }
}

impl UpsClient for NutClient {
    fn connect(&mut self) -> Result<(), UpsError> {
        let addr = format!("{}:{}", self.host, self.port);
        let stream = TcpStream::connect(&addr).map_err(|source| UpsError::Connect {
            addr: addr.clone(),
            source,
        })?;
        let reader = stream.try_clone().map_err(|source| UpsError::Connect {
            addr: addr.clone(),
            source,
        })?;

        self.connection = Some(Connection {
            writer: stream,
            reader: BufReader::new(reader),
        });
        debug!(%addr, "connected to NUT server");
        Ok(())
    }

    fn authenticate(&mut self, user: &str, pass: &str) -> Result<(), UpsError> {
        // Anonymous sessions may still read variables.
        if user.is_empty() {
            return Ok(());
        }

        self.expect_ok(&format!("USERNAME {}", user), "username")?;
        self.expect_ok(&format!("PASSWORD {}", pass), "password")?;
        debug!(user, "authenticated");
        Ok(())
    }

    fn get_variable(&mut self, ups_name: &str, var_name: &str) -> Value {
        let expected = format!("VAR {} {} ", ups_name, var_name);
        let mut res = self.send_command(&format!("GET VAR {} {}", ups_name, var_name));

        // A reply that missed its deadline may still be ahead of ours.
        for _ in 0..MAX_STALE_REPLIES {
            match &res {
                Ok(line) if !line.starts_with(&expected) && !line.starts_with(ERR_PREFIX) => {
                    debug!(var = var_name, stale = %line, "skipping reply to another command");
                    res = self.read_reply();
                }
                _ => break,
            }
        }

        let res = match res {
            Ok(res) => res,
            Err(e) => {
                warn!(var = var_name, error = %e, "variable read failed");
                return Value::Unknown;
            }
        };

        match res.strip_prefix(&expected).and_then(extract_quoted) {
            Some(value) => Value::Known(value.to_string()),
            None => {
                warn!(var = var_name, response = %res, "unexpected variable response");
                Value::Unknown
            }
        }
    }
}

/// Throws away whatever the server already sent, without waiting.
fn drain_stale(connection: &mut Connection) -> io::Result<usize> {
    connection.reader.get_ref().set_nonblocking(true)?;
    let mut dropped = 0;
    let result = loop {
        let mut line = String::new();
        match connection.reader.read_line(&mut line) {
            // Leave EOF for the real read to report.
            Ok(0) => break Ok(dropped),
            Ok(_) => {
                trace!("DROP {}", line.trim());
                dropped += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(dropped),
            Err(e) => break Err(e),
        }
    };
    connection.reader.get_ref().set_nonblocking(false)?;
    result
}

/// Returns the text after the first double quote, up to the next one.
///
/// Values that themselves contain a quote come back truncated at it.
fn extract_quoted(line: &str) -> Option<&str> {
    line.split(QUOTE).nth(1)
}
