// smartpixl-pipeline: Circuit breaker for the bulk writer

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Failing; flushes short-circuit to failover
    Open,
    /// A single probe attempt is allowed
    HalfOpen,
}

/// Atomically published view of the writer state for the health probe and
/// the internal health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_trip_reason: Option<String>,
    pub last_trip_at: Option<DateTime<Utc>>,
    /// Permanent faults (schema mismatch) stay open until operator reset
    pub permanent: bool,
}

impl CircuitSnapshot {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_trip_reason: None,
            last_trip_at: None,
            permanent: false,
        }
    }
}

/// Operator-side handle forcing the circuit closed. Requesting a reset on
/// an already-closed circuit is a no-op.
#[derive(Clone)]
pub struct CircuitReset {
    requested: Arc<AtomicBool>,
}

impl CircuitReset {
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }
}

/// What the writer may do with the next batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushGate {
    /// Closed: flush normally
    Proceed,
    /// Half-open: this batch is the probe
    Probe,
    /// Open: no database call, spill to failover
    ShortCircuit,
}

/// Three-state breaker owned by the writer task alone; everyone else sees
/// it through the published snapshot.
pub struct WriterCircuit {
    state: CircuitState,
    consecutive_failures: u32,
    failure_threshold: u32,
    cooldown: Duration,
    opened_at: Option<Instant>,
    last_trip_reason: Option<String>,
    last_trip_at: Option<DateTime<Utc>>,
    permanent: bool,
    snapshot: Arc<ArcSwap<CircuitSnapshot>>,
    reset_requested: Arc<AtomicBool>,
}

impl WriterCircuit {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            failure_threshold: failure_threshold.max(1),
            cooldown,
            opened_at: None,
            last_trip_reason: None,
            last_trip_at: None,
            permanent: false,
            snapshot: Arc::new(ArcSwap::from_pointee(CircuitSnapshot::closed())),
            reset_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for the operator reset endpoint
    pub fn reset_handle(&self) -> CircuitReset {
        CircuitReset {
            requested: self.reset_requested.clone(),
        }
    }

    /// Handle for the health probe
    pub fn snapshot_handle(&self) -> Arc<ArcSwap<CircuitSnapshot>> {
        self.snapshot.clone()
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Decide what the next batch may do. Consumes a pending operator
    /// reset and moves Open to HalfOpen once the cooldown elapsed.
    pub fn gate(&mut self) -> FlushGate {
        if self.reset_requested.swap(false, Ordering::AcqRel) {
            self.force_closed();
        }

        match self.state {
            CircuitState::Closed => FlushGate::Proceed,
            CircuitState::HalfOpen => FlushGate::Probe,
            CircuitState::Open => {
                let cooled = !self.permanent
                    && self
                        .opened_at
                        .map(|at| at.elapsed() >= self.cooldown)
                        .unwrap_or(true);
                if cooled {
                    self.state = CircuitState::HalfOpen;
                    self.publish();
                    FlushGate::Probe
                } else {
                    FlushGate::ShortCircuit
                }
            }
        }
    }

    /// A batch flushed; failures reset and a successful probe closes the
    /// circuit
    pub fn on_batch_success(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.permanent = false;
        self.opened_at = None;
        self.publish();
    }

    /// A batch failed after all in-batch retries
    pub fn on_batch_failure(&mut self, reason: &str) {
        self.consecutive_failures += 1;
        if self.state == CircuitState::HalfOpen
            || self.consecutive_failures >= self.failure_threshold
        {
            self.trip(reason, false);
        }
        self.publish();
    }

    /// Permanent fault: open immediately and stay open until operator reset
    pub fn trip_permanent(&mut self, reason: &str) {
        self.consecutive_failures += 1;
        self.trip(reason, true);
        self.publish();
    }

    /// Operator override; idempotent
    pub fn force_closed(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.permanent = false;
        self.opened_at = None;
        self.publish();
    }

    fn trip(&mut self, reason: &str, permanent: bool) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.last_trip_reason = Some(reason.to_string());
        self.last_trip_at = Some(Utc::now());
        self.permanent = permanent;
    }

    fn publish(&self) {
        self.snapshot.store(Arc::new(CircuitSnapshot {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            last_trip_reason: self.last_trip_reason.clone(),
            last_trip_at: self.last_trip_at,
            permanent: self.permanent,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn circuit() -> WriterCircuit {
        WriterCircuit::new(3, Duration::from_millis(50))
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let mut cb = circuit();
        assert_eq!(cb.gate(), FlushGate::Proceed);

        cb.on_batch_failure("timeout");
        cb.on_batch_failure("timeout");
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.on_batch_failure("timeout");
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.gate(), FlushGate::ShortCircuit);

        let snapshot = cb.snapshot_handle().load_full();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.last_trip_reason.as_deref(), Some("timeout"));
        assert!(snapshot.last_trip_at.is_some());
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let mut cb = circuit();
        cb.on_batch_failure("timeout");
        cb.on_batch_failure("timeout");
        cb.on_batch_success();
        cb.on_batch_failure("timeout");
        cb.on_batch_failure("timeout");
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_cooldown_leads_to_probe() {
        let mut cb = circuit();
        for _ in 0..3 {
            cb.on_batch_failure("down");
        }
        assert_eq!(cb.gate(), FlushGate::ShortCircuit);

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cb.gate(), FlushGate::Probe);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_probe_success_closes() {
        let mut cb = circuit();
        for _ in 0..3 {
            cb.on_batch_failure("down");
        }
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cb.gate(), FlushGate::Probe);

        cb.on_batch_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.gate(), FlushGate::Proceed);
    }

    #[test]
    fn test_probe_failure_reopens_with_fresh_cooldown() {
        let mut cb = circuit();
        for _ in 0..3 {
            cb.on_batch_failure("down");
        }
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cb.gate(), FlushGate::Probe);

        cb.on_batch_failure("still down");
        assert_eq!(cb.state(), CircuitState::Open);
        // Cooldown restarted: immediately short-circuits again
        assert_eq!(cb.gate(), FlushGate::ShortCircuit);
    }

    #[test]
    fn test_permanent_fault_ignores_cooldown() {
        let mut cb = circuit();
        cb.trip_permanent("schema mismatch");
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cb.gate(), FlushGate::ShortCircuit);
        assert!(cb.snapshot_handle().load_full().permanent);
    }

    #[test]
    fn test_operator_reset_and_double_reset_noop() {
        let mut cb = circuit();
        let reset = cb.reset_handle();
        cb.trip_permanent("schema mismatch");

        reset.request();
        assert_eq!(cb.gate(), FlushGate::Proceed);
        assert_eq!(cb.state(), CircuitState::Closed);

        // A second reset of an already-closed circuit changes nothing
        reset.request();
        assert_eq!(cb.gate(), FlushGate::Proceed);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot_handle().load_full().consecutive_failures, 0);
    }
}
