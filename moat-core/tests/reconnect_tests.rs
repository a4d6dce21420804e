//! Reconnection sequencing against a scripted event source

use moat_core::backoff::BackoffConfig;
use moat_core::reconnect::{
    EventSource, EventStream, ReconnectConfig, StreamController, StreamError, StreamTransition,
};
use moat_core::shutdown::ShutdownSwitch;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct ScriptedStream {
    events: VecDeque<u64>,
}

impl EventStream for ScriptedStream {
    type Event = u64;

    fn next_event(&mut self, _timeout: Duration) -> Result<Option<u64>, StreamError> {
        Ok(self.events.pop_front())
    }
}

struct ScriptedSource {
    opens: VecDeque<Result<Vec<u64>, StreamError>>,
}

impl ScriptedSource {
    fn new(opens: Vec<Result<Vec<u64>, StreamError>>) -> Self {
        Self {
            opens: opens.into(),
        }
    }
}

impl EventSource for ScriptedSource {
    type Event = u64;
    type Stream = ScriptedStream;

    fn open(&mut self) -> Result<ScriptedStream, StreamError> {
        match self.opens.pop_front() {
            Some(Ok(events)) => Ok(ScriptedStream {
                events: events.into(),
            }),
            Some(Err(e)) => Err(e),
            None => Err(StreamError::Connect("script exhausted".into())),
        }
    }
}

fn fast_config() -> ReconnectConfig {
    ReconnectConfig {
        backoff: BackoffConfig {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            factor: 2.0,
            jitter_factor: 0.0,
        },
        read_timeout: Duration::from_millis(100),
    }
}

fn collect_delays(controller: &mut StreamController) -> Arc<Mutex<Vec<Duration>>> {
    let delays = Arc::new(Mutex::new(Vec::new()));
    let probe = Arc::clone(&delays);
    controller.on_transition(move |transition| {
        if let StreamTransition::Disconnected { next_delay, .. } = transition {
            probe.lock().push(*next_delay);
        }
    });
    delays
}

#[test]
fn two_failures_then_success_waits_base_then_doubled() {
    let shutdown = ShutdownSwitch::new();
    let mut controller = StreamController::new(fast_config(), shutdown.clone());
    let delays = collect_delays(&mut controller);

    let mut source = ScriptedSource::new(vec![
        Err(StreamError::Connect("refused".into())),
        Err(StreamError::Connect("refused".into())),
        Ok(vec![42]),
    ]);

    let stop = shutdown.clone();
    let start = Instant::now();
    let mut events = Vec::new();
    controller.run(&mut source, |event| {
        events.push(event);
        stop.trigger("first event observed");
    });

    assert_eq!(events, vec![42]);

    // Third attempt was preceded by exactly base then base*factor
    let delays = delays.lock();
    assert_eq!(delays.as_slice(), &[
        Duration::from_millis(10),
        Duration::from_millis(20),
    ]);
    assert!(start.elapsed() >= Duration::from_millis(30));

    let stats = controller.stats();
    assert_eq!(stats.connect_attempts, 3);
    assert_eq!(stats.connect_failures, 2);
    assert_eq!(stats.connects, 1);
    assert_eq!(stats.events_delivered, 1);
}

#[test]
fn first_event_resets_the_backoff_sequence() {
    let shutdown = ShutdownSwitch::new();
    let mut controller = StreamController::new(fast_config(), shutdown.clone());
    let delays = collect_delays(&mut controller);

    // Two refusals grow the delay; a delivered event resets it; the next
    // two failures start over from the base delay.
    let mut source = ScriptedSource::new(vec![
        Err(StreamError::Connect("refused".into())),
        Err(StreamError::Connect("refused".into())),
        Ok(vec![1]), // delivers one event, then closes
        Err(StreamError::Connect("refused".into())),
        Ok(vec![2]),
    ]);

    let stop = shutdown.clone();
    let mut events = Vec::new();
    controller.run(&mut source, |event| {
        events.push(event);
        if events.len() == 2 {
            stop.trigger("done");
        }
    });

    assert_eq!(events, vec![1, 2]);
    assert_eq!(
        delays.lock().as_slice(),
        &[
            Duration::from_millis(10), // first refusal
            Duration::from_millis(20), // second refusal
            Duration::from_millis(10), // stream closed after event: reset held
            Duration::from_millis(20), // refusal again
        ]
    );
}

#[test]
fn events_are_delivered_in_stream_order() {
    let shutdown = ShutdownSwitch::new();
    let mut controller = StreamController::new(fast_config(), shutdown.clone());

    let mut source = ScriptedSource::new(vec![Ok(vec![1, 2, 3, 4, 5])]);

    let stop = shutdown.clone();
    let mut events = Vec::new();
    controller.run(&mut source, |event| {
        events.push(event);
        if events.len() == 5 {
            stop.trigger("done");
        }
    });

    assert_eq!(events, vec![1, 2, 3, 4, 5]);
}

#[test]
fn sustained_outage_saturates_at_max_delay() {
    let shutdown = ShutdownSwitch::new();
    let config = ReconnectConfig {
        backoff: BackoffConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            factor: 2.0,
            jitter_factor: 0.0,
        },
        read_timeout: Duration::from_millis(100),
    };
    let mut controller = StreamController::new(config, shutdown.clone());
    let delays = collect_delays(&mut controller);

    let refusals: Vec<Result<Vec<u64>, StreamError>> = (0..6)
        .map(|_| Err(StreamError::Connect("refused".into())))
        .collect();
    let mut source = ScriptedSource::new(refusals);

    let stop = shutdown.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        stop.trigger("enough");
    });

    controller.run(&mut source, |_event: u64| {});

    let delays = delays.lock();
    assert!(delays.len() >= 3);
    // 1ms, 2ms, then pinned at the 4ms ceiling
    assert_eq!(delays[0], Duration::from_millis(1));
    assert_eq!(delays[1], Duration::from_millis(2));
    for delay in delays.iter().skip(2) {
        assert_eq!(*delay, Duration::from_millis(4));
    }
}
