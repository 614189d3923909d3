//! Instance lifecycle events and the poller that waits on them.
//!
//! The orchestration system records events per instance (boot, network setup,
//! console triggers, ...). A scenario learns that a guest is usable by waiting
//! for the `trigger` / `login prompt` event, which the system emits once it
//! sees a login prompt on the instance console.

use crate::clock::{Clock, SystemClock};
use crate::config::PollConfig;
use crate::error::{HarnessError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const TRIGGER_OPERATION: &str = "trigger";
pub const LOGIN_PROMPT_MESSAGE: &str = "login prompt";

/// One lifecycle event as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub operation: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub message: String,
    /// Seconds since the epoch, fractional.
    pub timestamp: f64,
}

fn null_as_empty<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<String, D::Error> {
    Ok(Option::<String>::deserialize(de)?.unwrap_or_default())
}

impl Event {
    pub fn is_login_prompt(&self) -> bool {
        self.operation == TRIGGER_OPERATION && self.message == LOGIN_PROMPT_MESSAGE
    }
}

/// Anything that can list the events of an instance.
pub trait EventSource {
    fn instance_events(&self, instance: &str) -> Result<Vec<Event>>;
}

impl<S: EventSource + ?Sized> EventSource for &S {
    fn instance_events(&self, instance: &str) -> Result<Vec<Event>> {
        (**self).instance_events(instance)
    }
}

/// Polls an [`EventSource`] until an event matches or the deadline passes.
pub struct EventPoller<S, C = SystemClock> {
    source: S,
    clock: C,
    defaults: PollConfig,
}

impl<S: EventSource> EventPoller<S, SystemClock> {
    pub fn new(source: S, defaults: PollConfig) -> Self {
        Self::with_clock(source, SystemClock, defaults)
    }
}

impl<S: EventSource, C: Clock> EventPoller<S, C> {
    pub fn with_clock(source: S, clock: C, defaults: PollConfig) -> Self {
        Self {
            source,
            clock,
            defaults,
        }
    }

    /// Wait for the login prompt trigger using the configured deadlines.
    pub fn await_login_prompt(&self, instance: &str, after: Option<f64>) -> Result<Event> {
        self.await_event(instance, Event::is_login_prompt, after)
    }

    /// [`Self::await_event_within`] with the configured timeout and interval.
    pub fn await_event<P>(&self, instance: &str, predicate: P, after: Option<f64>) -> Result<Event>
    where
        P: Fn(&Event) -> bool,
    {
        self.await_event_within(
            instance,
            predicate,
            after,
            self.defaults.timeout,
            self.defaults.interval,
        )
    }

    /// Return the first event (in source order) at or after `after` that
    /// satisfies `predicate`.
    ///
    /// Each attempt re-fetches the full event list. Between attempts the
    /// thread sleeps `interval`, so the call returns no later than
    /// `timeout + interval` after entry (plus fetch latency). When the
    /// deadline passes, all events are fetched once more, logged, and
    /// returned inside [`HarnessError::Timeout`].
    pub fn await_event_within<P>(
        &self,
        instance: &str,
        predicate: P,
        after: Option<f64>,
        timeout: Duration,
        interval: Duration,
    ) -> Result<Event>
    where
        P: Fn(&Event) -> bool,
    {
        let start = self.clock.now();
        let mut attempt = 0u32;

        while self.clock.elapsed_since(start) < timeout {
            attempt += 1;
            let events = self.source.instance_events(instance)?;
            debug!(instance, attempt, count = events.len(), "polled instance events");

            let found = events
                .into_iter()
                .filter(|event| after.map_or(true, |bound| event.timestamp >= bound))
                .find(|event| predicate(event));

            if let Some(event) = found {
                info!(
                    instance,
                    operation = %event.operation,
                    message = %event.message,
                    timestamp = event.timestamp,
                    "observed awaited event"
                );
                return Ok(event);
            }

            self.clock.sleep(interval);
        }

        let waited = self.clock.elapsed_since(start);
        let events = self.source.instance_events(instance)?;
        warn!(instance, ?after, ?waited, "timed out waiting for event, dumping history");
        for event in &events {
            warn!(
                instance,
                operation = %event.operation,
                message = %event.message,
                timestamp = event.timestamp,
                "event"
            );
        }

        Err(HarnessError::Timeout {
            instance: instance.to_string(),
            after,
            waited,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    fn ev(operation: &str, message: &str, timestamp: f64) -> Event {
        Event {
            operation: operation.into(),
            message: message.into(),
            timestamp,
        }
    }

    /// Returns scripted responses in order, repeating the last one.
    struct ScriptedSource {
        responses: RefCell<VecDeque<Vec<Event>>>,
        calls: Cell<usize>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Vec<Event>>) -> Self {
            Self {
                responses: RefCell::new(responses.into()),
                calls: Cell::new(0),
            }
        }
    }

    impl EventSource for ScriptedSource {
        fn instance_events(&self, _instance: &str) -> Result<Vec<Event>> {
            self.calls.set(self.calls.get() + 1);
            let mut responses = self.responses.borrow_mut();
            if responses.len() > 1 {
                Ok(responses.pop_front().unwrap_or_default())
            } else {
                Ok(responses.front().cloned().unwrap_or_default())
            }
        }
    }

    struct FailingSource;

    impl EventSource for FailingSource {
        fn instance_events(&self, _instance: &str) -> Result<Vec<Event>> {
            Err(HarnessError::Api {
                method: "GET".into(),
                path: "/instances/x/events".into(),
                status: 500,
                body: "boom".into(),
            })
        }
    }

    fn poll_config(timeout: f64, interval: f64) -> PollConfig {
        PollConfig {
            timeout: Duration::from_secs_f64(timeout),
            interval: Duration::from_secs_f64(interval),
        }
    }

    #[test]
    fn login_prompt_predicate() {
        assert!(ev("trigger", "login prompt", 1.0).is_login_prompt());
        assert!(!ev("trigger", "other", 1.0).is_login_prompt());
        assert!(!ev("boot", "login prompt", 1.0).is_login_prompt());
    }

    #[test]
    fn returns_match_on_first_poll_after_bound() {
        let source = ScriptedSource::new(vec![vec![
            ev("boot", "", 10.0),
            ev("trigger", "login prompt", 100.0),
        ]]);
        let clock = ManualClock::new();
        let poller = EventPoller::with_clock(&source, &clock, PollConfig::default());

        let event = poller.await_login_prompt("inst", Some(50.0)).unwrap();

        assert_eq!(event.timestamp, 100.0);
        assert_eq!(source.calls.get(), 1);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn skips_matching_events_before_bound() {
        let source = ScriptedSource::new(vec![
            vec![ev("trigger", "login prompt", 10.0)],
            vec![
                ev("trigger", "login prompt", 10.0),
                ev("trigger", "login prompt", 60.0),
            ],
        ]);
        let clock = ManualClock::new();
        let poller = EventPoller::with_clock(&source, &clock, poll_config(300.0, 5.0));

        let event = poller.await_login_prompt("inst", Some(50.0)).unwrap();

        assert_eq!(event.timestamp, 60.0);
        assert_eq!(source.calls.get(), 2);
        assert_eq!(clock.elapsed(), Duration::from_secs(5));
    }

    #[test]
    fn bound_is_inclusive() {
        let source = ScriptedSource::new(vec![vec![ev("trigger", "login prompt", 50.0)]]);
        let clock = ManualClock::new();
        let poller = EventPoller::with_clock(&source, &clock, PollConfig::default());

        assert!(poller.await_login_prompt("inst", Some(50.0)).is_ok());
    }

    #[test]
    fn first_match_in_source_order_wins() {
        let source = ScriptedSource::new(vec![vec![
            ev("trigger", "login prompt", 300.0),
            ev("trigger", "login prompt", 200.0),
        ]]);
        let clock = ManualClock::new();
        let poller = EventPoller::with_clock(&source, &clock, PollConfig::default());

        let event = poller.await_login_prompt("inst", None).unwrap();
        assert_eq!(event.timestamp, 300.0);
    }

    #[test]
    fn arbitrary_predicate() {
        let source = ScriptedSource::new(vec![vec![
            ev("boot", "", 1.0),
            ev("network", "plugged", 2.0),
        ]]);
        let clock = ManualClock::new();
        let poller = EventPoller::with_clock(&source, &clock, PollConfig::default());

        let event = poller
            .await_event("inst", |e| e.operation == "network", None)
            .unwrap();
        assert_eq!(event.message, "plugged");
    }

    #[test]
    fn times_out_with_full_dump() {
        let history = vec![ev("boot", "", 1.0), ev("trigger", "other", 2.0)];
        let source = ScriptedSource::new(vec![history.clone()]);
        let clock = ManualClock::new();
        let poller = EventPoller::with_clock(&source, &clock, PollConfig::default());

        let err = poller
            .await_event_within(
                "inst",
                Event::is_login_prompt,
                Some(0.0),
                Duration::from_secs(1),
                Duration::from_millis(100),
            )
            .unwrap_err();

        match err {
            HarnessError::Timeout {
                instance,
                after,
                waited,
                events,
            } => {
                assert_eq!(instance, "inst");
                assert_eq!(after, Some(0.0));
                assert_eq!(events, history);
                assert!(waited >= Duration::from_secs(1));
                assert!(waited <= Duration::from_millis(1100));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        // ten polls plus the final diagnostic fetch
        assert_eq!(source.calls.get(), 11);
    }

    #[test]
    fn timeout_dump_ignores_after_bound() {
        // the only login prompt predates the bound
        let history = vec![ev("trigger", "login prompt", 1.0), ev("boot", "", 100.0)];
        let source = ScriptedSource::new(vec![history.clone()]);
        let clock = ManualClock::new();
        let poller = EventPoller::with_clock(&source, &clock, poll_config(10.0, 5.0));

        let err = poller.await_login_prompt("inst", Some(50.0)).unwrap_err();
        match err {
            HarnessError::Timeout { after, events, .. } => {
                assert_eq!(after, Some(50.0));
                assert_eq!(events.len(), 2);
                assert_eq!(events, history);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn never_exceeds_timeout_plus_interval() {
        let source = ScriptedSource::new(vec![vec![]]);
        let clock = ManualClock::new();
        let poller = EventPoller::with_clock(&source, &clock, poll_config(7.0, 3.0));

        let err = poller.await_login_prompt("inst", None).unwrap_err();
        assert!(err.is_timeout());
        assert!(clock.elapsed() <= Duration::from_secs(10));
        assert!(clock.elapsed() >= Duration::from_secs(7));
    }

    #[test]
    fn source_errors_propagate() {
        let clock = ManualClock::new();
        let poller = EventPoller::with_clock(FailingSource, &clock, PollConfig::default());

        let err = poller.await_login_prompt("inst", None).unwrap_err();
        assert!(matches!(err, HarnessError::Api { status: 500, .. }));
    }

    #[test]
    fn decodes_api_events() {
        let raw = r#"[
            {"operation": "trigger", "message": "login prompt", "timestamp": 1601234567.25, "phase": "x"},
            {"operation": "boot", "message": null, "timestamp": 1601234500},
            {"operation": "create", "timestamp": 1601234400.5}
        ]"#;
        let events: Vec<Event> = serde_json::from_str(raw).unwrap();
        assert_eq!(events.len(), 3);
        assert!(events[0].is_login_prompt());
        assert_eq!(events[1].message, "");
        assert_eq!(events[2].message, "");
        assert_eq!(events[1].timestamp, 1601234500.0);
    }
}
