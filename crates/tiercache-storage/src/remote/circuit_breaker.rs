//! Three-state circuit breaker for the remote tier

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Closed,
    Open(Instant), // when it opened
    HalfOpen { probing: bool },
}

#[derive(Debug)]
struct Inner {
    state: State,
    failures: u32,
}

/// Fails fast after repeated failures.
///
/// Closed passes everything through; after `failure_threshold` consecutive
/// failures the breaker opens and rejects without touching the network;
/// after `reset_timeout` it goes half-open and admits exactly one probe —
/// a success closes it again, a failure re-opens it.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    inner: Arc<RwLock<Inner>>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                state: State::Closed,
                failures: 0,
            })),
            failure_threshold,
            reset_timeout,
        }
    }

    /// Whether a request may proceed. In half-open state only the first
    /// caller gets through; the rest fail fast until the probe resolves.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.write();
        match inner.state {
            State::Closed => true,
            State::Open(opened_at) => {
                if opened_at.elapsed() >= self.reset_timeout {
                    inner.state = State::HalfOpen { probing: true };
                    true
                } else {
                    false
                }
            }
            State::HalfOpen { probing } => {
                if probing {
                    false
                } else {
                    inner.state = State::HalfOpen { probing: true };
                    true
                }
            }
        }
    }

    /// Report a successful operation.
    pub fn report_success(&self) {
        let mut inner = self.inner.write();
        inner.failures = 0;
        if matches!(inner.state, State::HalfOpen { .. }) {
            inner.state = State::Closed;
        }
    }

    /// Report a failed operation.
    pub fn report_failure(&self) {
        let mut inner = self.inner.write();
        match inner.state {
            State::Closed => {
                inner.failures += 1;
                if inner.failures >= self.failure_threshold {
                    inner.state = State::Open(Instant::now());
                }
            }
            State::HalfOpen { .. } => {
                inner.state = State::Open(Instant::now());
            }
            State::Open(_) => {}
        }
    }

    /// Whether the breaker currently rejects requests.
    pub fn is_open(&self) -> bool {
        matches!(self.inner.read().state, State::Open(_))
    }
}
