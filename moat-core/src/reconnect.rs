//! Stream controller with automatic reconnection
//!
//! Wraps a caller-supplied event source with reconnection logic: open the
//! stream, pump events, and on any failure back off exponentially before
//! trying again. The loop never gives up on its own; network partitions are
//! assumed transitory and only the shutdown switch ends it. A single
//! delivered event proves liveness and resets the backoff - real-time data
//! staleness costs more than a spurious reset.

use crate::backoff::{BackoffConfig, ExponentialBackoff};
use crate::monitoring::MetricsRegistry;
use crate::shutdown::ShutdownSwitch;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failures surfaced by an event stream or its transport
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("stream read timed out after {0:?}")]
    ReadTimeout(Duration),
    #[error("stream closed: {0}")]
    Closed(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// A live, attached stream of events.
///
/// `next_event` blocks up to `timeout`; a quiet stream past that bound is
/// reported as [`StreamError::ReadTimeout`] and treated like any other
/// disconnect. `Ok(None)` means the stream ended cleanly - the controller
/// treats both endings identically: reconnect.
pub trait EventStream {
    type Event;

    fn next_event(&mut self, timeout: Duration) -> Result<Option<Self::Event>, StreamError>;
}

/// Something that can open an [`EventStream`], possibly failing.
pub trait EventSource {
    type Event;
    type Stream: EventStream<Event = Self::Event>;

    fn open(&mut self) -> Result<Self::Stream, StreamError>;
}

/// Connection state of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Attempting to open the stream
    Connecting,
    /// Attached and pumping events
    Connected,
    /// Sleeping out a backoff delay before the next attempt
    WaitingRetry,
    /// Shutdown observed; the loop has exited
    Stopped,
}

/// Lifecycle transitions, published to the observer hook and the log
#[derive(Debug, Clone)]
pub enum StreamTransition {
    Connecting { attempt: u64 },
    Connected { attempt: u64 },
    Disconnected { cause: String, next_delay: Duration },
    Stopped,
}

/// Configuration for the stream controller
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Backoff applied between attach attempts
    pub backoff: BackoffConfig,
    /// How long a connected stream may stay silent before it is treated
    /// as dead
    pub read_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            read_timeout: Duration::from_secs(30),
        }
    }
}

/// Counters for reconnection behavior
#[derive(Debug, Clone, Default)]
pub struct ReconnectionStats {
    /// Stream open attempts
    pub connect_attempts: u64,
    /// Successful attaches
    pub connects: u64,
    /// Attempts that failed before attaching
    pub connect_failures: u64,
    /// Streams lost after attaching
    pub disconnects: u64,
    /// Events handed to the caller
    pub events_delivered: u64,
}

type TransitionObserver = Box<dyn Fn(&StreamTransition) + Send>;

/// Reconnecting wrapper around an [`EventSource`].
///
/// One controller instance drives one stream; events reach the caller in
/// stream order with no buffering or reordering.
pub struct StreamController {
    config: ReconnectConfig,
    backoff: ExponentialBackoff,
    stats: ReconnectionStats,
    state: ConnectionState,
    shutdown: ShutdownSwitch,
    connected_at: Option<Instant>,
    observer: Option<TransitionObserver>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl StreamController {
    /// Create a controller; `shutdown` is observed between events and inside
    /// every backoff sleep.
    pub fn new(config: ReconnectConfig, shutdown: ShutdownSwitch) -> Self {
        let backoff = ExponentialBackoff::with_config(config.backoff.clone());
        Self {
            config,
            backoff,
            stats: ReconnectionStats::default(),
            state: ConnectionState::Connecting,
            shutdown,
            connected_at: None,
            observer: None,
            metrics: None,
        }
    }

    /// Publish stream counters to a metrics registry
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register a transition observer (tests, dashboards). Tracing output
    /// happens regardless.
    pub fn on_transition(&mut self, observer: impl Fn(&StreamTransition) + Send + 'static) {
        self.observer = Some(Box::new(observer));
    }

    /// Run until shutdown: open the stream, deliver events to `on_event`,
    /// reconnect with backoff on any failure.
    pub fn run<S, F>(&mut self, source: &mut S, mut on_event: F)
    where
        S: EventSource,
        F: FnMut(S::Event),
    {
        while !self.shutdown.should_stop() {
            self.state = ConnectionState::Connecting;
            self.stats.connect_attempts += 1;
            let attempt = self.stats.connect_attempts;
            debug!(attempt, "Opening event stream");
            self.emit(StreamTransition::Connecting { attempt });
            if let Some(m) = &self.metrics {
                m.stream().connect_attempts_total.inc();
            }

            match source.open() {
                Ok(mut stream) => {
                    self.state = ConnectionState::Connected;
                    self.stats.connects += 1;
                    self.connected_at = Some(Instant::now());
                    info!(attempt, "Event stream connected");
                    self.emit(StreamTransition::Connected { attempt });
                    if let Some(m) = &self.metrics {
                        m.stream().connects_total.inc();
                        m.stream().connected.set(1);
                    }

                    let cause = self.pump(&mut stream, &mut on_event);

                    self.connected_at = None;
                    if let Some(m) = &self.metrics {
                        m.stream().connected.set(0);
                    }
                    if self.shutdown.should_stop() {
                        break;
                    }
                    self.stats.disconnects += 1;
                    if let Some(m) = &self.metrics {
                        m.stream().disconnects_total.inc();
                    }
                    self.back_off(cause);
                }
                Err(e) => {
                    self.stats.connect_failures += 1;
                    if let Some(m) = &self.metrics {
                        m.stream().connect_failures_total.inc();
                    }
                    self.back_off(e.to_string());
                }
            }
        }

        self.state = ConnectionState::Stopped;
        info!("Stream controller stopped");
        self.emit(StreamTransition::Stopped);
    }

    /// Deliver events until the stream fails or shutdown is requested.
    /// Returns the disconnect cause.
    fn pump<St, F>(&mut self, stream: &mut St, on_event: &mut F) -> String
    where
        St: EventStream,
        F: FnMut(St::Event),
    {
        loop {
            if self.shutdown.should_stop() {
                return "shutdown".into();
            }
            match stream.next_event(self.config.read_timeout) {
                Ok(Some(event)) => {
                    // Liveness proven; the next failure starts from the base delay
                    self.backoff.reset();
                    self.stats.events_delivered += 1;
                    if let Some(m) = &self.metrics {
                        m.stream().events_total.inc();
                    }
                    on_event(event);
                }
                Ok(None) => return "end of stream".into(),
                Err(e) => return e.to_string(),
            }
        }
    }

    fn back_off(&mut self, cause: String) {
        let delay = self.backoff.next_delay();
        self.state = ConnectionState::WaitingRetry;
        warn!(
            cause = %cause,
            next_delay_ms = delay.as_millis() as u64,
            "Event stream down; backing off"
        );
        self.emit(StreamTransition::Disconnected {
            cause,
            next_delay: delay,
        });
        self.shutdown.sleep(delay);
    }

    fn emit(&self, transition: StreamTransition) {
        if let Some(observer) = &self.observer {
            observer(&transition);
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnection counters
    pub fn stats(&self) -> &ReconnectionStats {
        &self.stats
    }

    /// Time attached to the current stream (zero when disconnected)
    pub fn uptime(&self) -> Duration {
        self.connected_at.map(|t| t.elapsed()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct ScriptedStream {
        events: VecDeque<Result<Option<u64>, StreamError>>,
    }

    impl EventStream for ScriptedStream {
        type Event = u64;

        fn next_event(&mut self, _timeout: Duration) -> Result<Option<u64>, StreamError> {
            self.events.pop_front().unwrap_or(Ok(None))
        }
    }

    struct ScriptedSource {
        /// One entry per open() call: Err = refuse, Ok = events then close
        opens: VecDeque<Result<Vec<u64>, StreamError>>,
    }

    impl EventSource for ScriptedSource {
        type Event = u64;
        type Stream = ScriptedStream;

        fn open(&mut self) -> Result<ScriptedStream, StreamError> {
            match self.opens.pop_front() {
                Some(Ok(events)) => Ok(ScriptedStream {
                    events: events.into_iter().map(|e| Ok(Some(e))).collect(),
                }),
                Some(Err(e)) => Err(e),
                None => Err(StreamError::Connect("script exhausted".into())),
            }
        }
    }

    fn test_config() -> ReconnectConfig {
        ReconnectConfig {
            backoff: BackoffConfig::aggressive(),
            read_timeout: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_backoff_grows_across_failed_opens_then_resets_on_event() {
        let shutdown = ShutdownSwitch::new();
        let mut controller = StreamController::new(test_config(), shutdown.clone());

        let delays = Arc::new(Mutex::new(Vec::new()));
        let delays_probe = delays.clone();
        controller.on_transition(move |t| {
            if let StreamTransition::Disconnected { next_delay, .. } = t {
                delays_probe.lock().push(*next_delay);
            }
        });

        let mut source = ScriptedSource {
            opens: VecDeque::from([
                Err(StreamError::Connect("refused".into())),
                Err(StreamError::Connect("refused".into())),
                Ok(vec![7, 8]),
            ]),
        };

        let stop = shutdown.clone();
        let mut seen = Vec::new();
        controller.run(&mut source, |event| {
            seen.push(event);
            if seen.len() == 2 {
                stop.trigger("test complete");
            }
        });

        assert_eq!(seen, vec![7, 8]);
        assert_eq!(controller.stats().connect_failures, 2);
        assert_eq!(controller.stats().connects, 1);
        assert_eq!(controller.stats().events_delivered, 2);
        assert_eq!(controller.state(), ConnectionState::Stopped);

        // 10ms then 20ms under the aggressive profile
        let delays = delays.lock();
        assert_eq!(delays[0], Duration::from_millis(10));
        assert_eq!(delays[1], Duration::from_millis(20));

        // First delivered event reset the backoff
        assert_eq!(controller.backoff.attempt(), 0);
    }

    #[test]
    fn test_stream_error_and_end_of_stream_both_reconnect() {
        let shutdown = ShutdownSwitch::new();
        let mut controller = StreamController::new(test_config(), shutdown.clone());

        let mut source = ScriptedSource {
            opens: VecDeque::from([
                Ok(vec![1]),  // closes after one event
                Ok(vec![]),   // immediate end of stream
                Ok(vec![2]),
            ]),
        };

        let stop = shutdown.clone();
        let mut seen = Vec::new();
        controller.run(&mut source, |event| {
            seen.push(event);
            if seen.len() == 2 {
                stop.trigger("done");
            }
        });

        assert_eq!(seen, vec![1, 2]);
        assert_eq!(controller.stats().connects, 3);
        assert_eq!(controller.stats().disconnects, 2);
    }

    #[test]
    fn test_shutdown_stops_promptly_during_backoff() {
        let shutdown = ShutdownSwitch::new();
        let config = ReconnectConfig {
            backoff: BackoffConfig {
                base_delay: Duration::from_secs(60),
                max_delay: Duration::from_secs(60),
                factor: 2.0,
                jitter_factor: 0.0,
            },
            read_timeout: Duration::from_millis(100),
        };
        let mut controller = StreamController::new(config, shutdown.clone());

        let mut source = ScriptedSource {
            opens: VecDeque::from([Err(StreamError::Connect("refused".into()))]),
        };

        let stop = shutdown.clone();
        let trigger = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            stop.trigger("external cancel");
        });

        let start = Instant::now();
        controller.run(&mut source, |_event: u64| {});
        trigger.join().unwrap();

        // Interrupted mid-sleep, nowhere near the 60s delay
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(controller.state(), ConnectionState::Stopped);
    }
}
