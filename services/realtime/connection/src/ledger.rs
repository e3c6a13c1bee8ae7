//! Connection attempt bookkeeping.
//!
//! The ledger tracks the attempts of the current unresolved sequence: every
//! Connecting phase opens an attempt, every Disconnected/Suspended phase adds
//! a failure to the latest attempt, and reaching Connected, Closed or Failed
//! resolves the sequence and clears everything. Fallback host rotation and
//! the suspension rule read only from here.

use crate::state::{ConnectionState, State};
use realtime_wire::ErrorInfo;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Clock used to timestamp attempts
pub type Clock = Arc<dyn Fn() -> Instant + Send + Sync>;

/// A failed state observed during an attempt
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    /// State the connection fell into
    pub state: ConnectionState,
    /// Error carried by that state, if any
    pub error: Option<ErrorInfo>,
    /// When the failure was recorded
    pub at: Instant,
}

impl AttemptFailure {
    /// Whether this failure counts towards fallback host rotation.
    ///
    /// Failures without an error are transport level and always count.
    pub fn should_use_fallback(&self) -> bool {
        self.error
            .as_ref()
            .map(|e| e.should_use_fallback())
            .unwrap_or(true)
    }
}

/// One connection attempt
#[derive(Debug, Clone)]
pub struct ConnectionAttempt {
    /// When the attempt started
    pub started: Instant,
    /// Failures observed during the attempt, in order
    pub failures: Vec<AttemptFailure>,
}

/// Attempt history of the current unresolved sequence
pub struct AttemptLedger {
    attempts: Vec<ConnectionAttempt>,
    tried_to_renew_token: bool,
    now: Clock,
}

impl std::fmt::Debug for AttemptLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttemptLedger")
            .field("attempts", &self.attempts)
            .field("tried_to_renew_token", &self.tried_to_renew_token)
            .finish()
    }
}

impl AttemptLedger {
    /// Create an empty ledger using the runtime clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(Instant::now))
    }

    /// Create an empty ledger with an injected clock
    pub fn with_clock(now: Clock) -> Self {
        Self {
            attempts: Vec::new(),
            tried_to_renew_token: false,
            now,
        }
    }

    /// Attempts of the unresolved sequence
    pub fn attempts(&self) -> &[ConnectionAttempt] {
        &self.attempts
    }

    /// Number of attempts recorded
    pub fn number_of_attempts(&self) -> usize {
        self.attempts.len()
    }

    /// Start time of the first attempt of the sequence
    pub fn first_attempt(&self) -> Option<Instant> {
        self.attempts.first().map(|a| a.started)
    }

    /// Time elapsed since the first attempt of the sequence
    pub fn elapsed_since_first_attempt(&self) -> Option<Duration> {
        self.first_attempt()
            .map(|started| (self.now)().saturating_duration_since(started))
    }

    /// Whether a token renewal has already been tried in this sequence
    pub fn tried_to_renew_token(&self) -> bool {
        self.tried_to_renew_token
    }

    /// Note that the token was renewed for this sequence
    pub fn record_token_retry(&mut self) {
        self.tried_to_renew_token = true;
    }

    /// Clear the sequence
    pub fn reset(&mut self) {
        self.attempts.clear();
        self.tried_to_renew_token = false;
    }

    /// Record a failure against the latest attempt, opening one if needed
    pub fn record_failure(&mut self, state: ConnectionState, error: Option<ErrorInfo>) {
        let at = (self.now)();
        if self.attempts.is_empty() {
            self.attempts.push(ConnectionAttempt {
                started: at,
                failures: Vec::new(),
            });
        }
        if let Some(attempt) = self.attempts.last_mut() {
            attempt.failures.push(AttemptFailure { state, error, at });
        }
    }

    /// Update the ledger for a state the connection just entered
    pub fn record_state(&mut self, state: &State) {
        match state.kind() {
            ConnectionState::Connecting => {
                debug!("Recording connection attempt {}", self.attempts.len() + 1);
                self.attempts.push(ConnectionAttempt {
                    started: (self.now)(),
                    failures: Vec::new(),
                });
            }
            ConnectionState::Connected | ConnectionState::Closed | ConnectionState::Failed => {
                if !self.attempts.is_empty() {
                    debug!("Resetting {} connection attempts", self.attempts.len());
                }
                self.reset();
            }
            kind @ (ConnectionState::Disconnected | ConnectionState::Suspended) => {
                debug!("Recording failed attempt for state {}", kind);
                self.record_failure(kind, state.error().cloned());
            }
            ConnectionState::Initialized | ConnectionState::Closing => {}
        }
    }

    /// Disconnected failures in this sequence that qualify for a fallback host
    pub fn disconnected_count(&self) -> usize {
        self.failures()
            .filter(|f| f.state == ConnectionState::Disconnected && f.should_use_fallback())
            .count()
    }

    /// Suspended failures in this sequence
    pub fn suspended_count(&self) -> usize {
        self.failures()
            .filter(|f| f.state == ConnectionState::Suspended)
            .count()
    }

    fn failures(&self) -> impl Iterator<Item = &AttemptFailure> {
        self.attempts.iter().flat_map(|a| a.failures.iter())
    }
}

impl Default for AttemptLedger {
    fn default() -> Self {
        Self::new()
    }
}
