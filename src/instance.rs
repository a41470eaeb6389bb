use std::{
    io::{self, BufRead, BufReader, Write},
    net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, warn};

// Loopback port held for as long as a monitor runs.
pub const GUARD_PORT: u16 = 34930;

// What a running monitor answers on the guard port.
const GREETING: &str = "upsmon";
const GREETING_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("UPS monitor is already running")]
    AlreadyRunning,
    #[error("guard port {0} is held by another program")]
    PortTaken(u16),
    #[error("failed to take instance guard: {0}")]
    Io(#[from] io::Error),
}

/// Keeps a second monitor from running while this one is alive.
///
/// The guard is a listening socket, so the OS releases it even when the
/// process dies without unwinding. It greets every connection so a second
/// monitor can tell it apart from an unrelated program on the same port.
pub struct SingletonGuard {
    port: u16,
    stop: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl SingletonGuard {
    pub fn acquire() -> Result<SingletonGuard, InstanceError> {
        SingletonGuard::acquire_on(GUARD_PORT)
    }

    pub fn acquire_on(port: u16) -> Result<SingletonGuard, InstanceError> {
        let listener = match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
            Ok(listener) => listener,
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => return Err(identify_holder(port)),
            Err(e) => return Err(e.into()),
        };

        let stop = Arc::new(AtomicBool::new(false));
        let acceptor = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("instance-guard".into())
                .spawn(move || greet(listener, &stop))?
        };
        debug!(port, "instance guard taken");

        Ok(SingletonGuard {
            port,
            stop,
            acceptor: Some(acceptor),
        })
    }
}

impl Drop for SingletonGuard {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Wake the acceptor so it sees the stop flag and drops the listener.
        let _ = TcpStream::connect_timeout(
            &SocketAddr::from((Ipv4Addr::LOCALHOST, self.port)),
            GREETING_TIMEOUT,
        );
        if let Some(acceptor) = self.acceptor.take() {
            if acceptor.join().is_err() {
                warn!("instance guard thread panicked");
            }
        }
    }
}

fn greet(listener: TcpListener, stop: &AtomicBool) {
    for stream in listener.incoming() {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        if let Ok(mut stream) = stream {
            let _ = writeln!(stream, "{}", GREETING);
        }
    }
}

fn identify_holder(port: u16) -> InstanceError {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let greeting = TcpStream::connect_timeout(&addr, GREETING_TIMEOUT).and_then(|stream| {
        stream.set_read_timeout(Some(GREETING_TIMEOUT))?;
        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line)?;
        Ok(line)
    });

    match greeting {
        Ok(line) if line.trim() == GREETING => InstanceError::AlreadyRunning,
        _ => InstanceError::PortTaken(port),
    }
}
