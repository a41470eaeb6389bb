use crate::ports::{Notifier, ShutdownExecutor};

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread,
    time::{Duration, Instant},
};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Armed,
    Fired,
}

struct Slot {
    state: TimerState,
    // Bumped on every arm and cancel so a timer thread can tell its cycle is over.
    generation: u64,
}

struct Shared {
    slot: Mutex<Slot>,
    wake: Condvar,
    notifier: Arc<dyn Notifier>,
    executor: Arc<dyn ShutdownExecutor>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Holds at most one pending host shutdown.
pub struct ShutdownScheduler {
    shared: Arc<Shared>,
}

impl ShutdownScheduler {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        executor: Arc<dyn ShutdownExecutor>,
    ) -> ShutdownScheduler {
        ShutdownScheduler {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    state: TimerState::Idle,
                    generation: 0,
                }),
                wake: Condvar::new(),
                notifier,
                executor,
            }),
        }
    }

    pub fn state(&self) -> TimerState {
        self.shared.lock().state
    }

    /// Schedules the shutdown to run after `delay`.
    ///
    /// Returns false without touching the pending timer unless idle; the
    /// first arm wins.
    pub fn arm(&self, delay: Duration) -> bool {
        let mut slot = self.shared.lock();
        if slot.state != TimerState::Idle {
            return false;
        }

        slot.generation += 1;
        let generation = slot.generation;
        let deadline = Instant::now() + delay;
        let shared = Arc::clone(&self.shared);

        let spawned = thread::Builder::new()
            .name("shutdown-timer".into())
            .spawn(move || wait_and_fire(shared, generation, deadline));
        if let Err(e) = spawned {
            error!(error = %e, "failed to start shutdown timer");
            return false;
        }

        slot.state = TimerState::Armed;
        info!(delay_ms = delay.as_millis() as u64, "shutdown armed");
        true
    }

    /// Stops a pending shutdown. Safe to call in any state.
    pub fn cancel(&self) -> bool {
        {
            let mut slot = self.shared.lock();
            if slot.state != TimerState::Armed {
                return false;
            }
            slot.state = TimerState::Idle;
            slot.generation += 1;
            self.shared.wake.notify_all();
        }

        info!("shutdown cancelled");
        self.shared
            .notifier
            .notify("Shutdown aborted", "Power returned before the shutdown delay elapsed.");
        true
    }
}

fn wait_and_fire(shared: Arc<Shared>, generation: u64, deadline: Instant) {
    let mut slot = shared.lock();
    loop {
        if slot.state != TimerState::Armed || slot.generation != generation {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        slot = match shared.wake.wait_timeout(slot, deadline - now) {
            Ok((slot, _)) => slot,
            Err(e) => e.into_inner().0,
        };
    }
    slot.state = TimerState::Fired;
    drop(slot);

    on_fire(&shared);
}

fn on_fire(shared: &Shared) {
    warn!("shutdown delay elapsed, shutting down host");
    shared
        .notifier
        .notify("Shutting down", "The computer is shutting down now.");
    if let Err(e) = shared.executor.perform_shutdown() {
        error!(error = %e, "host shutdown failed");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::{io, sync::mpsc};

    #[derive(Clone, Default)]
    pub struct Notes(pub Arc<Mutex<Vec<String>>>);

    impl Notes {
        pub fn titles(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }

        pub fn count(&self, title: &str) -> usize {
            self.titles().iter().filter(|t| *t == title).count()
        }
    }

    impl Notifier for Notes {
        fn notify(&self, title: &str, _message: &str) {
            self.0.lock().unwrap().push(title.to_string());
        }
    }

    /// Reports the instant of every shutdown on a channel.
    pub struct Executor(pub Mutex<mpsc::Sender<Instant>>);

    impl ShutdownExecutor for Executor {
        fn perform_shutdown(&self) -> io::Result<()> {
            self.0.lock().unwrap().send(Instant::now()).unwrap();
            Ok(())
        }
    }

    pub fn scheduler() -> (ShutdownScheduler, Notes, mpsc::Receiver<Instant>) {
        let notes = Notes::default();
        let (tx, rx) = mpsc::channel();
        let scheduler = ShutdownScheduler::new(
            Arc::new(notes.clone()),
            Arc::new(Executor(Mutex::new(tx))),
        );
        (scheduler, notes, rx)
    }

    #[test]
    fn fires_after_delay() {
        let (scheduler, notes, rx) = scheduler();
        let delay = Duration::from_millis(100);
        let armed_at = Instant::now();

        assert!(scheduler.arm(delay));
        assert_eq!(scheduler.state(), TimerState::Armed);

        let fired_at = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(fired_at.duration_since(armed_at) >= delay);
        assert_eq!(scheduler.state(), TimerState::Fired);
        assert_eq!(notes.titles(), vec!["Shutting down"]);
    }

    #[test]
    fn cancel_before_delay_prevents_fire() {
        let (scheduler, notes, rx) = scheduler();

        scheduler.arm(Duration::from_millis(200));
        assert!(scheduler.cancel());
        assert_eq!(scheduler.state(), TimerState::Idle);

        assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
        assert_eq!(notes.titles(), vec!["Shutdown aborted"]);
    }

    #[test]
    fn second_arm_does_not_restart() {
        let (scheduler, _notes, rx) = scheduler();
        let armed_at = Instant::now();

        assert!(scheduler.arm(Duration::from_millis(100)));
        thread::sleep(Duration::from_millis(50));
        assert!(!scheduler.arm(Duration::from_secs(60)));

        let fired_at = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(fired_at.duration_since(armed_at) < Duration::from_secs(5));
        // Only one timer ever fires.
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn cancel_when_idle_or_fired_is_noop() {
        let (scheduler, notes, rx) = scheduler();
        assert!(!scheduler.cancel());

        scheduler.arm(Duration::from_millis(10));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!scheduler.cancel());
        assert_eq!(scheduler.state(), TimerState::Fired);
        assert_eq!(notes.count("Shutdown aborted"), 0);
    }

    #[test]
    fn can_rearm_after_cancel() {
        let (scheduler, _notes, rx) = scheduler();

        scheduler.arm(Duration::from_secs(60));
        scheduler.cancel();
        assert!(scheduler.arm(Duration::from_millis(20)));

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(scheduler.state(), TimerState::Fired);
    }

    #[test]
    fn racing_cancel_never_double_fires() {
        for _ in 0..50 {
            let (scheduler, _notes, rx) = scheduler();
            scheduler.arm(Duration::from_millis(1));
            thread::sleep(Duration::from_millis(1));
            let cancelled = scheduler.cancel();

            let fires = rx.recv_timeout(Duration::from_millis(100)).into_iter().count();
            assert!(rx.try_recv().is_err());
            assert_eq!(fires, usize::from(!cancelled));
        }
    }
}
