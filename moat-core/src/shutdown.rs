//! Cooperative shutdown switch
//!
//! Every infinite loop in this crate (stream reconnection, hedge retries)
//! sleeps through [`ShutdownSwitch::sleep`] so a shutdown request interrupts
//! the wait instead of running out the full backoff delay. The switch is
//! async-signal-safe on the hot path: checking it is a single atomic load.
//!
//! ## Usage
//!
//! ```no_run
//! use moat_core::shutdown::ShutdownSwitch;
//!
//! let switch = ShutdownSwitch::install();
//!
//! while !switch.should_stop() {
//!     // drive the engine...
//! }
//! ```

use parking_lot::{Condvar, Mutex};
use std::panic;
use std::process;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{error, info};

/// Shutdown switch state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShutdownState {
    /// Normal operation
    Running = 0,
    /// Shutting down gracefully
    ShuttingDown = 1,
    /// Emergency stop (skip cleanup)
    EmergencyStop = 2,
}

impl From<u8> for ShutdownState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::ShuttingDown,
            2 => Self::EmergencyStop,
            _ => Self::Running,
        }
    }
}

struct Inner {
    state: AtomicU8,
    reason: Mutex<Option<String>>,
    triggered_at: Mutex<Option<SystemTime>>,
    // Sleepers park on this pair; trigger() wakes them all.
    wake_lock: Mutex<()>,
    wake_cv: Condvar,
}

/// Cooperative cancellation token with interruptible sleeps
#[derive(Clone)]
pub struct ShutdownSwitch {
    inner: Arc<Inner>,
}

impl ShutdownSwitch {
    /// Create a new switch in the Running state
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(ShutdownState::Running as u8),
                reason: Mutex::new(None),
                triggered_at: Mutex::new(None),
                wake_lock: Mutex::new(()),
                wake_cv: Condvar::new(),
            }),
        }
    }

    /// Install SIGTERM/SIGINT handlers and return the switch
    pub fn install() -> Self {
        let switch = Self::new();

        #[cfg(unix)]
        {
            use signal_hook::consts::{SIGINT, SIGTERM};
            use signal_hook::iterator::Signals;

            match Signals::new([SIGTERM, SIGINT]) {
                Ok(mut signals) => {
                    let handler = switch.clone();
                    std::thread::Builder::new()
                        .name("moat-signals".into())
                        .spawn(move || {
                            if let Some(sig) = signals.forever().next() {
                                let name = match sig {
                                    SIGTERM => "SIGTERM",
                                    SIGINT => "SIGINT",
                                    _ => "signal",
                                };
                                handler.trigger(&format!("{} received", name));
                            }
                        })
                        .ok();
                    info!("Shutdown handlers installed (SIGTERM, SIGINT)");
                }
                Err(e) => error!("Failed to register signal handlers: {}", e),
            }
        }

        switch
    }

    /// Check whether loops should stop
    #[inline]
    pub fn should_stop(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) != ShutdownState::Running as u8
    }

    /// Check whether the switch is still in the Running state
    #[inline]
    pub fn is_running(&self) -> bool {
        !self.should_stop()
    }

    /// Request a graceful shutdown and wake all sleepers
    pub fn trigger(&self, reason: &str) {
        info!("Shutdown requested: {}", reason);
        self.transition(ShutdownState::ShuttingDown, reason);
    }

    /// Request an immediate stop and wake all sleepers
    pub fn emergency_stop(&self, reason: &str) {
        error!("EMERGENCY STOP: {}", reason);
        self.transition(ShutdownState::EmergencyStop, reason);
    }

    fn transition(&self, state: ShutdownState, reason: &str) {
        self.inner.state.store(state as u8, Ordering::Release);
        *self.inner.reason.lock() = Some(reason.to_string());
        *self.inner.triggered_at.lock() = Some(SystemTime::now());

        let _guard = self.inner.wake_lock.lock();
        self.inner.wake_cv.notify_all();
    }

    /// Sleep for `duration`, waking early on shutdown.
    ///
    /// Returns `true` if the full duration elapsed and `false` if the sleep
    /// was interrupted (or the switch was already tripped on entry).
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.should_stop() {
            return false;
        }

        let deadline = Instant::now() + duration;
        let mut guard = self.inner.wake_lock.lock();
        while !self.should_stop() {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            self.inner.wake_cv.wait_for(&mut guard, deadline - now);
        }
        false
    }

    /// Get the current state
    pub fn state(&self) -> ShutdownState {
        self.inner.state.load(Ordering::Acquire).into()
    }

    /// Reason recorded when the switch was tripped
    pub fn reason(&self) -> Option<String> {
        self.inner.reason.lock().clone()
    }

    /// Timestamp recorded when the switch was tripped
    pub fn triggered_at(&self) -> Option<SystemTime> {
        *self.inner.triggered_at.lock()
    }
}

impl Default for ShutdownSwitch {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a global panic handler that logs the panic site before the
/// process terminates.
///
/// This does not catch panics; it only makes them observable in the same
/// log stream as everything else, then exits with a non-zero status.
pub fn install_panic_handler() {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_else(|| "<unknown location>".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "<no message>".to_string()
        };

        error!(
            location = %location,
            message = %message,
            "PANIC: terminating"
        );

        default_hook(panic_info);
        process::exit(101);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_starts_running() {
        let switch = ShutdownSwitch::new();
        assert!(switch.is_running());
        assert!(!switch.should_stop());
        assert_eq!(switch.state(), ShutdownState::Running);
    }

    #[test]
    fn test_trigger_records_reason_and_time() {
        let switch = ShutdownSwitch::new();

        switch.trigger("test shutdown");

        assert!(switch.should_stop());
        assert_eq!(switch.state(), ShutdownState::ShuttingDown);
        assert_eq!(switch.reason(), Some("test shutdown".to_string()));
        assert!(switch.triggered_at().is_some());
    }

    #[test]
    fn test_emergency_stop() {
        let switch = ShutdownSwitch::new();

        switch.emergency_stop("critical failure");

        assert!(switch.should_stop());
        assert_eq!(switch.state(), ShutdownState::EmergencyStop);
    }

    #[test]
    fn test_sleep_completes_when_running() {
        let switch = ShutdownSwitch::new();

        let start = Instant::now();
        assert!(switch.sleep(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_sleep_interrupted_by_trigger() {
        let switch = ShutdownSwitch::new();
        let trigger_side = switch.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            trigger_side.trigger("wake up");
        });

        let start = Instant::now();
        let completed = switch.sleep(Duration::from_secs(30));
        handle.join().unwrap();

        assert!(!completed);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_sleep_returns_immediately_when_tripped() {
        let switch = ShutdownSwitch::new();
        switch.trigger("already down");

        let start = Instant::now();
        assert!(!switch.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_clone_shares_state() {
        let switch = ShutdownSwitch::new();
        let other = switch.clone();

        other.trigger("via clone");
        assert!(switch.should_stop());
    }
}
