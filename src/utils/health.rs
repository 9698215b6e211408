//! Lifecycle and health tracking for connectors.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// Lifecycle state of a connector instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Built but not started
    Constructed,
    /// Operating normally
    Running,
    /// A transient failure is being recovered from
    Degraded,
    /// Stopped; terminal
    Stopped,
}

impl LifecycleState {
    fn as_u8(self) -> u8 {
        match self {
            LifecycleState::Constructed => 0,
            LifecycleState::Running => 1,
            LifecycleState::Degraded => 2,
            LifecycleState::Stopped => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::Constructed,
            1 => LifecycleState::Running,
            2 => LifecycleState::Degraded,
            _ => LifecycleState::Stopped,
        }
    }
}

/// Lock-free lifecycle state with failure tracking
///
/// Shared between a connector and its background worker. Transitions that
/// recover from degradation are compare-and-swap so a worker can never
/// resurrect a connector that `stop` already marked as stopped.
#[derive(Debug)]
pub struct HealthState {
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
}

impl HealthState {
    /// Create a health state in `Constructed`
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Constructed.as_u8()),
            consecutive_failures: AtomicUsize::new(0),
        }
    }

    /// Create a health state that is already `Running` (sinks are usable once built)
    pub fn running() -> Self {
        let health = Self::new();
        let _ = health.mark_running();
        health
    }

    /// Get the current lifecycle state
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Check if the connector is healthy
    pub fn is_healthy(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// Leave `Constructed` for `Running` and clear the failure count
    ///
    /// Returns `false` (and changes nothing) from any other state, so a start
    /// that finishes after `stop` cannot revive the connector.
    pub fn mark_running(&self) -> bool {
        let entered = self
            .state
            .compare_exchange(
                LifecycleState::Constructed.as_u8(),
                LifecycleState::Running.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if entered {
            self.consecutive_failures.store(0, Ordering::Relaxed);
        }
        entered
    }

    /// Record a transient failure: `Running` becomes `Degraded`
    ///
    /// Returns the consecutive failure count.
    pub fn record_failure(&self) -> usize {
        let _ = self.state.compare_exchange(
            LifecycleState::Running.as_u8(),
            LifecycleState::Degraded.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Leave `Degraded` after a backoff; no effect in any other state
    pub fn recover(&self) {
        let _ = self.state.compare_exchange(
            LifecycleState::Degraded.as_u8(),
            LifecycleState::Running.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Enter the terminal `Stopped` state
    pub fn mark_stopped(&self) {
        self.state
            .store(LifecycleState::Stopped.as_u8(), Ordering::Release);
    }

    /// Get consecutive failure count
    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}
