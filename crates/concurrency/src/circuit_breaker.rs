//! Per-entity update circuit breaker (§4.12).
//!
//! Guards the write path: each id gets its own rate counter (max 10
//! updates/s) and failure counter (5 consecutive failures trips the
//! circuit open for 30s). While open, writes fail fast with
//! `CircuitOpen` instead of queuing.

use entity_core::error::{EntityError, Result};
use entity_core::limits::{CIRCUIT_FAILURE_THRESHOLD, CIRCUIT_MAX_UPDATES_PER_SEC, CIRCUIT_OPEN_SECONDS};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};

struct EntityCircuit {
    window_start: Instant,
    updates_in_window: u32,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl EntityCircuit {
    fn new(now: Instant) -> Self {
        EntityCircuit {
            window_start: now,
            updates_in_window: 0,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

/// Tracks per-entity write circuits.
pub struct CircuitBreaker {
    circuits: Mutex<FxHashMap<String, EntityCircuit>>,
}

impl CircuitBreaker {
    /// A breaker with no tripped circuits.
    pub fn new() -> Self {
        CircuitBreaker {
            circuits: Mutex::new(FxHashMap::default()),
        }
    }

    /// Check whether `id` may proceed: errors with `CircuitOpen` if the
    /// circuit is tripped and its cooldown hasn't elapsed, otherwise
    /// records a rate-limit tick and allows the write through.
    pub fn check(&self, id: &str) -> Result<()> {
        let now = Instant::now();
        let mut circuits = self.circuits.lock();
        let circuit = circuits.entry(id.to_string()).or_insert_with(|| EntityCircuit::new(now));

        if let Some(opened_at) = circuit.opened_at {
            let elapsed = now.duration_since(opened_at);
            let open_duration = Duration::from_secs(CIRCUIT_OPEN_SECONDS);
            if elapsed < open_duration {
                return Err(EntityError::circuit_open(id, open_duration - elapsed));
            }
            // Cooldown elapsed: close the circuit and reset counters.
            circuit.opened_at = None;
            circuit.consecutive_failures = 0;
        }

        if now.duration_since(circuit.window_start) >= Duration::from_secs(1) {
            circuit.window_start = now;
            circuit.updates_in_window = 0;
        }
        circuit.updates_in_window += 1;

        Ok(())
    }

    /// Record a successful write for `id`, resetting its failure streak.
    pub fn record_success(&self, id: &str) {
        let mut circuits = self.circuits.lock();
        if let Some(circuit) = circuits.get_mut(id) {
            circuit.consecutive_failures = 0;
        }
    }

    /// Record a failed write for `id`; trips the circuit open once
    /// `CIRCUIT_FAILURE_THRESHOLD` consecutive failures accumulate.
    pub fn record_failure(&self, id: &str) {
        let now = Instant::now();
        let mut circuits = self.circuits.lock();
        let circuit = circuits.entry(id.to_string()).or_insert_with(|| EntityCircuit::new(now));
        circuit.consecutive_failures += 1;
        if circuit.consecutive_failures >= CIRCUIT_FAILURE_THRESHOLD {
            circuit.opened_at = Some(now);
        }
    }

    /// `true` if `id`'s update rate this window is at or above the
    /// per-second cap (informational; `check` does not itself enforce
    /// this as a hard reject, only circuit trips do).
    pub fn is_rate_limited(&self, id: &str) -> bool {
        self.circuits
            .lock()
            .get(id)
            .map(|c| c.updates_in_window >= CIRCUIT_MAX_UPDATES_PER_SEC)
            .unwrap_or(false)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_open_after_threshold_failures() {
        let breaker = CircuitBreaker::new();
        for _ in 0..CIRCUIT_FAILURE_THRESHOLD {
            breaker.record_failure("e1");
        }
        assert!(breaker.check("e1").is_err());
    }

    #[test]
    fn success_resets_failure_streak() {
        let breaker = CircuitBreaker::new();
        for _ in 0..CIRCUIT_FAILURE_THRESHOLD - 1 {
            breaker.record_failure("e1");
        }
        breaker.record_success("e1");
        for _ in 0..CIRCUIT_FAILURE_THRESHOLD - 1 {
            breaker.record_failure("e1");
        }
        assert!(breaker.check("e1").is_ok());
    }

    #[test]
    fn unrelated_ids_have_independent_circuits() {
        let breaker = CircuitBreaker::new();
        for _ in 0..CIRCUIT_FAILURE_THRESHOLD {
            breaker.record_failure("e1");
        }
        assert!(breaker.check("e1").is_err());
        assert!(breaker.check("e2").is_ok());
    }
}
