//! Connection lifecycle states and their transition rules.
//!
//! `State` is a closed enum; each variant decides which events it accepts and
//! what comes next. Transitions are pure: side effects (timers, transports,
//! pending acks) are applied by the manager when a state is entered.

use realtime_wire::{error_info, Action, ErrorInfo, ProtocolMessage};
use std::fmt;
use std::time::Duration;

/// Observable connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, no connection attempted yet
    Initialized,
    /// Transport being opened
    Connecting,
    /// Broker confirmed the connection
    Connected,
    /// Temporarily disconnected; will retry
    Disconnected,
    /// Disconnected for too long; retries less often and state is lost
    Suspended,
    /// Close requested, waiting for the broker
    Closing,
    /// Closed by request
    Closed,
    /// Unrecoverable failure
    Failed,
}

impl ConnectionState {
    /// Lowercase name used in logs and the CLI
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Initialized => "initialized",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Suspended => "suspended",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        }
    }

    /// Whether messages can be sent right now
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event delivered to the current state
#[derive(Debug, Clone)]
pub enum StateEvent {
    /// Caller asked to connect
    Connect,
    /// Caller asked to close
    Close,
    /// Connection-level message from the broker
    Message(ProtocolMessage),
    /// The live transport closed
    TransportClosed(Option<ErrorInfo>),
    /// The timer armed by the current state fired
    TimerFired,
    /// Caller asked for a ping
    Ping,
    /// Reconnect immediately, optionally renewing the token first
    RetryNow {
        /// Renew the token before opening the transport
        renew_token: bool,
    },
    /// Token renewal on Connecting entry failed
    TokenRenewalFailed(ErrorInfo),
    /// The host lost network connectivity
    NetworkOffline,
    /// The host regained network connectivity
    NetworkOnline,
}

/// Lifecycle phase with the data it carries
#[derive(Debug, Clone, PartialEq)]
pub enum State {
    /// Nothing attempted yet
    Initialized,
    /// Opening a transport
    Connecting {
        /// Renew the token before opening
        renew_token: bool,
    },
    /// Connected; `update` marks an in-place refresh from a second CONNECTED
    Connected {
        /// Entered from Connected itself
        update: bool,
    },
    /// Waiting to retry
    Disconnected {
        /// Why the connection dropped
        error: Option<ErrorInfo>,
        /// Delay before the next attempt; zero when a follow-up retries at once
        retry_in: Duration,
    },
    /// Waiting to retry after prolonged failure
    Suspended {
        /// Why the connection was suspended
        error: ErrorInfo,
        /// Delay before the next attempt
        retry_in: Duration,
    },
    /// Close sent, waiting for the broker
    Closing,
    /// Closed by request
    Closed,
    /// Unrecoverable failure
    Failed {
        /// What failed the connection
        error: ErrorInfo,
    },
}

/// Facts the transition rules depend on, gathered by the manager
#[derive(Debug, Clone)]
pub struct DecisionContext {
    /// Fallback-eligible disconnects in the current attempt sequence
    pub disconnected_count: usize,
    /// Time since the first attempt of the current sequence
    pub first_attempt_elapsed: Option<Duration>,
    /// How long the broker keeps connection state
    pub connection_state_ttl: Duration,
    /// Suspend once this many disconnects have been seen
    pub suspend_threshold: Option<usize>,
    /// Retry delay while Disconnected
    pub disconnected_retry_timeout: Duration,
    /// Retry delay while Suspended
    pub suspended_retry_timeout: Duration,
    /// A token renewal was already tried in this sequence
    pub tried_to_renew_token: bool,
    /// The credentials can produce a new token
    pub can_renew_token: bool,
}

impl DecisionContext {
    /// Whether a new disconnect should suspend the connection instead
    pub fn should_suspend(&self) -> bool {
        let over_threshold = self
            .suspend_threshold
            .map(|threshold| self.disconnected_count + 1 > threshold)
            .unwrap_or(false);
        let over_ttl = self
            .first_attempt_elapsed
            .map(|elapsed| elapsed > self.connection_state_ttl)
            .unwrap_or(false);
        over_threshold || over_ttl
    }
}

/// Result of delivering an event to a state
#[derive(Debug, Clone, Default)]
pub struct Transition {
    /// State to enter, if any
    pub next: Option<State>,
    /// Event to deliver after `next` has been entered
    pub followup: Option<StateEvent>,
}

impl Transition {
    /// Stay in the current state
    pub fn stay() -> Self {
        Self::default()
    }

    /// Move to `state`
    pub fn to(state: State) -> Self {
        Self {
            next: Some(state),
            followup: None,
        }
    }

    /// Deliver `event` once the next state is entered
    pub fn then(mut self, event: StateEvent) -> Self {
        self.followup = Some(event);
        self
    }
}

impl State {
    /// Observable kind of this state
    pub fn kind(&self) -> ConnectionState {
        match self {
            State::Initialized => ConnectionState::Initialized,
            State::Connecting { .. } => ConnectionState::Connecting,
            State::Connected { .. } => ConnectionState::Connected,
            State::Disconnected { .. } => ConnectionState::Disconnected,
            State::Suspended { .. } => ConnectionState::Suspended,
            State::Closing => ConnectionState::Closing,
            State::Closed => ConnectionState::Closed,
            State::Failed { .. } => ConnectionState::Failed,
        }
    }

    /// Error carried by this state
    pub fn error(&self) -> Option<&ErrorInfo> {
        match self {
            State::Disconnected { error, .. } => error.as_ref(),
            State::Suspended { error, .. } | State::Failed { error } => Some(error),
            _ => None,
        }
    }

    /// Delay until the next automatic attempt
    pub fn retry_in(&self) -> Option<Duration> {
        match self {
            State::Disconnected { retry_in, .. } | State::Suspended { retry_in, .. } => {
                Some(*retry_in)
            }
            _ => None,
        }
    }

    /// Whether the connection can be recovered from this state after a restart
    pub fn persist(&self) -> bool {
        matches!(
            self,
            State::Connected { .. } | State::Disconnected { .. } | State::Suspended { .. }
        )
    }

    /// Connected refreshed in place
    pub fn is_update(&self) -> bool {
        matches!(self, State::Connected { update: true })
    }

    /// Whether this state reacts to `event`; everything else is ignored
    pub fn accepts(&self, event: &StateEvent) -> bool {
        use StateEvent as E;

        match (self, event) {
            (_, E::Message(message)) => self.accepts_message(message),
            (State::Initialized, E::Connect | E::Close | E::RetryNow { .. }) => true,
            (
                State::Connecting { .. },
                E::Close
                | E::TransportClosed(_)
                | E::TimerFired
                | E::TokenRenewalFailed(_)
                | E::NetworkOffline,
            ) => true,
            (
                State::Connected { .. },
                E::Close | E::TransportClosed(_) | E::TimerFired | E::Ping | E::NetworkOffline,
            ) => true,
            (
                State::Disconnected { .. } | State::Suspended { .. },
                E::Connect | E::Close | E::TimerFired | E::RetryNow { .. } | E::NetworkOnline,
            ) => true,
            (State::Closing, E::TransportClosed(_) | E::TimerFired) => true,
            (State::Closed | State::Failed { .. }, E::Connect | E::RetryNow { .. }) => true,
            _ => false,
        }
    }

    fn accepts_message(&self, message: &ProtocolMessage) -> bool {
        if !message.is_connection_level() {
            return false;
        }
        match self {
            State::Connecting { .. } | State::Connected { .. } => matches!(
                message.action,
                Action::Connected | Action::Disconnected | Action::Closed | Action::Error
            ),
            State::Closing => matches!(
                message.action,
                Action::Closed | Action::Disconnected | Action::Error
            ),
            _ => false,
        }
    }

    /// Decide the next state for an accepted event
    pub fn transition(&self, event: StateEvent, ctx: &DecisionContext) -> Transition {
        use StateEvent as E;

        match self {
            State::Initialized => match event {
                E::Connect | E::RetryNow { .. } => Transition::to(State::Connecting {
                    renew_token: false,
                }),
                E::Close => Transition::to(State::Closed),
                _ => Transition::stay(),
            },

            State::Connecting { .. } => match event {
                E::Message(message) => match message.action {
                    Action::Connected => Transition::to(State::Connected { update: false }),
                    Action::Disconnected => {
                        let error = message.error.unwrap_or_else(ErrorInfo::reason_disconnected);
                        if error.is_token_error() {
                            token_error(error, ctx)
                        } else {
                            Transition::to(disconnected_or_suspended(error, ctx))
                        }
                    }
                    Action::Error => {
                        let error = message.error.unwrap_or_else(ErrorInfo::reason_failed);
                        if error.is_token_error() {
                            token_error(error, ctx)
                        } else {
                            Transition::to(State::Failed { error })
                        }
                    }
                    Action::Closed => Transition::to(State::Closed),
                    _ => Transition::stay(),
                },
                E::TransportClosed(error) => Transition::to(disconnected_or_suspended(
                    error.unwrap_or_else(ErrorInfo::reason_disconnected),
                    ctx,
                )),
                E::TimerFired => Transition::to(disconnected_or_suspended(
                    ErrorInfo::timeout("Connection attempt timed out"),
                    ctx,
                )),
                E::TokenRenewalFailed(error) => {
                    if error.code == error_info::TOKEN_NOT_RENEWABLE {
                        Transition::to(State::Failed { error })
                    } else {
                        Transition::to(disconnected_or_suspended(error, ctx))
                    }
                }
                E::NetworkOffline => Transition::to(disconnected_or_suspended(
                    ErrorInfo::reason_disconnected(),
                    ctx,
                )),
                E::Close => Transition::to(State::Closed),
                _ => Transition::stay(),
            },

            State::Connected { .. } => match event {
                E::Message(message) => match message.action {
                    Action::Connected => Transition::to(State::Connected { update: true }),
                    Action::Disconnected => {
                        let error = message.error.unwrap_or_else(ErrorInfo::reason_disconnected);
                        if error.is_token_error() {
                            token_error(error, ctx)
                        } else {
                            reconnect_now(error)
                        }
                    }
                    Action::Error => {
                        let error = message.error.unwrap_or_else(ErrorInfo::reason_failed);
                        if error.is_token_error() {
                            token_error(error, ctx)
                        } else {
                            Transition::to(State::Failed { error })
                        }
                    }
                    Action::Closed => Transition::to(State::Closed),
                    _ => Transition::stay(),
                },
                E::TransportClosed(error) => {
                    reconnect_now(error.unwrap_or_else(ErrorInfo::reason_disconnected))
                }
                E::TimerFired => reconnect_now(ErrorInfo::timeout(
                    "No activity seen from the broker within the idle interval",
                )),
                E::NetworkOffline => Transition::to(State::Disconnected {
                    error: Some(ErrorInfo::reason_disconnected()),
                    retry_in: ctx.disconnected_retry_timeout,
                }),
                E::Close => Transition::to(State::Closing),
                _ => Transition::stay(),
            },

            State::Disconnected { .. } | State::Suspended { .. } => match event {
                E::Connect | E::TimerFired | E::NetworkOnline => {
                    Transition::to(State::Connecting { renew_token: false })
                }
                E::RetryNow { renew_token } => Transition::to(State::Connecting { renew_token }),
                E::Close => Transition::to(State::Closed),
                _ => Transition::stay(),
            },

            State::Closing => match event {
                E::Message(message) => match message.action {
                    Action::Closed | Action::Disconnected | Action::Error => {
                        Transition::to(State::Closed)
                    }
                    _ => Transition::stay(),
                },
                E::TransportClosed(_) | E::TimerFired => Transition::to(State::Closed),
                _ => Transition::stay(),
            },

            State::Closed | State::Failed { .. } => match event {
                E::Connect | E::RetryNow { .. } => Transition::to(State::Connecting {
                    renew_token: false,
                }),
                _ => Transition::stay(),
            },
        }
    }
}

/// Disconnected, or Suspended once the attempt sequence has gone on too long
fn disconnected_or_suspended(error: ErrorInfo, ctx: &DecisionContext) -> State {
    if ctx.should_suspend() {
        State::Suspended {
            error,
            retry_in: ctx.suspended_retry_timeout,
        }
    } else {
        State::Disconnected {
            error: Some(error),
            retry_in: ctx.disconnected_retry_timeout,
        }
    }
}

/// Drop to Disconnected and retry at once on the next host decision
fn reconnect_now(error: ErrorInfo) -> Transition {
    Transition::to(State::Disconnected {
        error: Some(error),
        retry_in: Duration::ZERO,
    })
    .then(StateEvent::RetryNow { renew_token: false })
}

/// Renew the token once per attempt sequence; fail if that is not possible
fn token_error(error: ErrorInfo, ctx: &DecisionContext) -> Transition {
    if !ctx.can_renew_token || ctx.tried_to_renew_token {
        return Transition::to(State::Failed { error });
    }
    Transition::to(State::Disconnected {
        error: Some(error),
        retry_in: Duration::ZERO,
    })
    .then(StateEvent::RetryNow { renew_token: true })
}
