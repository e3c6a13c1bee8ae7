//! Connection manager: applies state transitions and their side effects.
//!
//! The manager is owned by the workflow worker and is the only code that
//! mutates connection state. It owns the live transport, the state timer,
//! the attempt ledger, pending acks and the outbound queue.

use crate::ack::{notify, AckCallback, AckQueue};
use crate::auth::Auth;
use crate::connection::{ConnectionEvent, ConnectionSnapshot, ConnectionStateChange};
use crate::error::{ConnectionError, TransportError};
use crate::hosts::HostSelector;
use crate::keepalive::{next_ping_id, PingReply, PingTracker};
use crate::ledger::AttemptLedger;
use crate::network::NetworkState;
use crate::options::{ConnectionOptions, RecoveryKey};
use crate::state::{ConnectionState, DecisionContext, State, StateEvent};
use crate::transport::{Transport, TransportFactory, TransportListener, TransportParams};
use crate::workflow::{Command, CommandQueue};
use realtime_wire::{
    error_info, Action, EncoderChain, EncodingOptions, ErrorInfo, ProtocolMessage,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const INBOUND_CHANNEL_CAPACITY: usize = 1024;

/// Owns connection state and applies every transition
pub struct ConnectionManager {
    options: ConnectionOptions,
    state: State,
    ledger: AttemptLedger,
    hosts: HostSelector,
    acks: AckQueue,
    queued: VecDeque<(ProtocolMessage, Option<AckCallback>)>,
    pings: PingTracker,
    encoders: EncoderChain,

    factory: Arc<dyn TransportFactory>,
    auth: Arc<dyn Auth>,
    transport: Option<Box<dyn Transport>>,
    transport_id: u64,
    next_transport_id: u64,

    commands: CommandQueue,
    deferred: VecDeque<Command>,
    timer: Option<JoinHandle<()>>,
    timer_generation: u64,

    connection_id: Option<String>,
    connection_key: Option<String>,
    serial: Option<i64>,
    message_serial: i64,
    client_id: Option<String>,
    connection_state_ttl: Duration,
    max_idle_interval: Option<Duration>,
    recover: Option<RecoveryKey>,
    resumed: bool,
    resume_error: Option<ErrorInfo>,

    snapshot: watch::Sender<ConnectionSnapshot>,
    events: broadcast::Sender<ConnectionStateChange>,
    inbound: broadcast::Sender<ProtocolMessage>,
}

impl ConnectionManager {
    /// Create a manager in the Initialized state
    pub fn new(
        options: ConnectionOptions,
        factory: Arc<dyn TransportFactory>,
        auth: Arc<dyn Auth>,
        commands: CommandQueue,
    ) -> Self {
        let recover = options.recover.as_deref().and_then(|value| {
            let parsed = RecoveryKey::parse(value);
            if parsed.is_none() {
                warn!("Ignoring malformed recovery key '{}'", value);
            }
            parsed
        });
        let hosts = HostSelector::new(
            options.host.clone(),
            &options.fallback_hosts,
            options.fallback_seed,
        );

        let initial = ConnectionSnapshot {
            state: ConnectionState::Initialized,
            error_reason: None,
            retry_in: None,
            connection_id: None,
            connection_key: None,
            serial: None,
            message_serial: recover.as_ref().map(|r| r.message_serial).unwrap_or(0),
            connection_state_ttl: options.connection_state_ttl,
            host: hosts.current().to_string(),
            client_id: None,
        };
        let (snapshot, _) = watch::channel(initial.clone());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (inbound, _) = broadcast::channel(INBOUND_CHANNEL_CAPACITY);

        Self {
            state: State::Initialized,
            ledger: AttemptLedger::new(),
            hosts,
            acks: AckQueue::new(),
            queued: VecDeque::new(),
            pings: PingTracker::new(),
            encoders: EncoderChain::default(),
            factory,
            auth,
            transport: None,
            transport_id: 0,
            next_transport_id: 0,
            commands,
            deferred: VecDeque::new(),
            timer: None,
            timer_generation: 0,
            connection_id: None,
            connection_key: None,
            serial: None,
            message_serial: initial.message_serial,
            client_id: None,
            connection_state_ttl: options.connection_state_ttl,
            max_idle_interval: None,
            recover,
            resumed: false,
            resume_error: None,
            snapshot,
            events,
            inbound,
            options,
        }
    }

    /// Receiver for published snapshots
    pub fn snapshot(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.snapshot.subscribe()
    }

    /// Sender used for state change notifications
    pub fn events(&self) -> broadcast::Sender<ConnectionStateChange> {
        self.events.clone()
    }

    /// Sender used for channel-level messages
    pub fn inbound(&self) -> broadcast::Sender<ProtocolMessage> {
        self.inbound.clone()
    }

    /// Fallback hosts in the order they will be tried
    pub fn fallback_hosts(&self) -> &[String] {
        self.hosts.fallbacks()
    }

    /// Current state
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Attempt ledger of the current sequence
    pub fn ledger(&self) -> &AttemptLedger {
        &self.ledger
    }

    /// Number of messages awaiting an ack
    pub fn pending_count(&self) -> usize {
        self.acks.len()
    }

    /// Number of messages queued until connected
    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    /// Process a command and every follow-up command it defers
    pub async fn handle(&mut self, command: Command) -> Result<(), ConnectionError> {
        let mut result = self.process(command).await;
        while let Some(command) = self.deferred.pop_front() {
            let name = command.name();
            if let Err(e) = self.process(command).await {
                error!("Error processing deferred {} command: {}", name, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        self.publish_snapshot();
        result
    }

    /// Queue a command to run before the next external one
    pub fn defer(&mut self, command: Command) {
        self.deferred.push_back(command);
    }

    async fn process(&mut self, command: Command) -> Result<(), ConnectionError> {
        debug!("Processing {} in state {}", command.name(), self.state.kind());
        match command {
            Command::Connect => self.dispatch(StateEvent::Connect).await,
            Command::Close => self.dispatch(StateEvent::Close).await,
            Command::SetConnectingState => {
                self.dispatch(StateEvent::RetryNow { renew_token: false }).await
            }
            Command::Ping { reply } => {
                self.ping(reply);
                Ok(())
            }
            Command::Send { message, callback } => {
                self.send(message, callback);
                Ok(())
            }
            Command::TransportMessageReceived {
                transport_id,
                message,
            } => {
                if !self.is_live_transport(transport_id) {
                    debug!("Ignoring message from stale transport {}", transport_id);
                    return Ok(());
                }
                self.on_message(message).await
            }
            Command::TransportClosed {
                transport_id,
                error,
            } => {
                if !self.is_live_transport(transport_id) {
                    debug!("Ignoring closure of stale transport {}", transport_id);
                    return Ok(());
                }
                self.destroy_transport();
                self.dispatch(StateEvent::TransportClosed(error)).await
            }
            Command::RetryTimerFired { generation } => {
                if generation != self.timer_generation {
                    debug!("Ignoring stale timer generation {}", generation);
                    return Ok(());
                }
                self.timer = None;
                self.dispatch(StateEvent::TimerFired).await
            }
            Command::NetworkStateChanged(network) => {
                let event = match network {
                    NetworkState::Online => StateEvent::NetworkOnline,
                    NetworkState::Offline => StateEvent::NetworkOffline,
                };
                self.dispatch(event).await
            }
            Command::Barrier => Ok(()),
            Command::Shutdown => {
                self.shutdown();
                Ok(())
            }
        }
    }

    /// Deliver an event and every follow-up it produces
    async fn dispatch(&mut self, event: StateEvent) -> Result<(), ConnectionError> {
        let mut events = VecDeque::from([event]);
        let mut steps = 0;

        while let Some(event) = events.pop_front() {
            if !self.state.accepts(&event) {
                debug!("State {} ignores {:?}", self.state.kind(), event);
                continue;
            }

            steps += 1;
            if steps > self.options.max_transition_steps {
                let state = self.state.kind();
                error!("Transitions did not settle after {} steps in {}", steps - 1, state);
                return Err(ConnectionError::TransitionLoop {
                    steps: steps - 1,
                    state,
                });
            }

            if let StateEvent::Message(message) = &event {
                self.apply_connection_metadata(message);
            }

            let ctx = self.decision_context();
            let transition = self.state.transition(event, &ctx);
            if let Some(next) = transition.next {
                if let Some(event) = self.enter(next).await {
                    events.push_back(event);
                }
            }
            if let Some(followup) = transition.followup {
                events.push_back(followup);
            }
        }
        Ok(())
    }

    fn decision_context(&self) -> DecisionContext {
        DecisionContext {
            disconnected_count: self.ledger.disconnected_count(),
            first_attempt_elapsed: self.ledger.elapsed_since_first_attempt(),
            connection_state_ttl: self.connection_state_ttl,
            suspend_threshold: self.options.suspend_threshold,
            disconnected_retry_timeout: self.options.disconnected_retry_timeout,
            suspended_retry_timeout: self.options.suspended_retry_timeout,
            tried_to_renew_token: self.ledger.tried_to_renew_token(),
            can_renew_token: self.auth.can_renew(),
        }
    }

    /// Leave the current state, enter `next`, then publish the change
    async fn enter(&mut self, next: State) -> Option<StateEvent> {
        let previous = self.state.kind();
        let current = next.kind();
        let update = next.is_update();

        self.cancel_timer();
        if previous == ConnectionState::Connected && current != ConnectionState::Connected {
            let reason = next.error().cloned().unwrap_or_else(ErrorInfo::reason_disconnected);
            self.pings
                .fail_all(|| ConnectionError::Protocol(reason.clone()));
        }
        if !matches!(current, ConnectionState::Connected | ConnectionState::Closing) {
            self.destroy_transport();
        }
        if !update {
            self.ledger.record_state(&next);
        }
        self.state = next;

        let followup = self.on_enter(update).await;

        self.publish_snapshot();
        self.emit(previous, update);
        followup
    }

    async fn on_enter(&mut self, update: bool) -> Option<StateEvent> {
        match self.state.clone() {
            State::Initialized => None,
            State::Connecting { renew_token } => {
                self.arm_timer(self.options.realtime_request_timeout);
                if renew_token {
                    self.ledger.record_token_retry();
                    let timeout = self.options.realtime_request_timeout;
                    let renewal = tokio::time::timeout(timeout, self.auth.renew_token()).await;
                    match renewal {
                        Ok(Ok(_)) => info!("Token renewed"),
                        Ok(Err(error)) => {
                            warn!("Token renewal failed: {}", error);
                            return Some(StateEvent::TokenRenewalFailed(error));
                        }
                        Err(_) => {
                            warn!("Token renewal did not complete within {:?}", timeout);
                            return Some(StateEvent::TokenRenewalFailed(ErrorInfo::timeout(
                                "Token renewal timed out",
                            )));
                        }
                    }
                }
                self.open_transport()
            }
            State::Connected { .. } => {
                if !update {
                    self.hosts.confirm();
                    self.recover = None;
                }
                if self.resumed {
                    if !update {
                        self.resend_pending();
                    }
                } else {
                    let error = self.resume_error.take().unwrap_or_else(|| {
                        ErrorInfo::new(
                            error_info::UNABLE_TO_RECOVER,
                            Some(400),
                            "Connection was not resumed",
                        )
                    });
                    self.acks.fail_all(&error);
                }
                self.flush_queued();
                self.arm_idle_timer();
                None
            }
            State::Disconnected { retry_in, .. } => {
                if !retry_in.is_zero() {
                    self.arm_timer(retry_in);
                }
                None
            }
            State::Suspended { error, retry_in } => {
                self.clear_identifiers();
                self.fail_outbound(&error);
                self.arm_timer(retry_in);
                None
            }
            State::Closing => {
                self.arm_timer(self.options.realtime_request_timeout);
                self.write(&ProtocolMessage::new(Action::Close));
                None
            }
            State::Closed => {
                self.clear_identifiers();
                self.fail_outbound(&ErrorInfo::reason_closed());
                self.hosts.reset();
                None
            }
            State::Failed { error } => {
                self.clear_identifiers();
                self.fail_outbound(&error);
                self.hosts.reset();
                self.recover = None;
                None
            }
        }
    }

    fn emit(&self, previous: ConnectionState, update: bool) {
        let current = self.state.kind();
        let change = ConnectionStateChange {
            event: if update {
                ConnectionEvent::Update
            } else {
                ConnectionEvent::from(current)
            },
            previous,
            current,
            retry_in: self.state.retry_in(),
            reason: self.state.error().cloned(),
        };
        match &change.reason {
            Some(reason) => info!("Connection {} -> {}: {}", previous, current, reason),
            None => info!("Connection {} -> {}", previous, current),
        }
        let _ = self.events.send(change);
    }

    fn publish_snapshot(&self) {
        let next = ConnectionSnapshot {
            state: self.state.kind(),
            error_reason: self.state.error().cloned(),
            retry_in: self.state.retry_in(),
            connection_id: self.connection_id.clone(),
            connection_key: self.connection_key.clone(),
            serial: self.serial,
            message_serial: self.message_serial,
            connection_state_ttl: self.connection_state_ttl,
            host: self.hosts.current().to_string(),
            client_id: self.client_id.clone(),
        };
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn apply_connection_metadata(&mut self, message: &ProtocolMessage) {
        if message.action != Action::Connected {
            self.update_serial(message.connection_serial);
            return;
        }

        self.resumed = match (&self.connection_id, &message.connection_id) {
            (Some(current), Some(id)) => current == id,
            (Some(_), None) => true,
            (None, _) => self.recover.is_some() && message.error.is_none(),
        };
        self.resume_error = message.error.clone();

        if self.resumed {
            self.update_serial(message.connection_serial);
        } else {
            if self.connection_id.is_some() {
                info!(
                    "Connection not resumed, new id {:?} replaces {:?}",
                    message.connection_id, self.connection_id
                );
            }
            self.serial = message.connection_serial;
            self.message_serial = 0;
        }

        if let Some(id) = &message.connection_id {
            self.connection_id = Some(id.clone());
        }
        if let Some(key) = message.connection_key() {
            self.connection_key = Some(key.to_string());
        }
        if let Some(details) = &message.connection_details {
            if let Some(ttl) = details.connection_state_ttl {
                self.connection_state_ttl = Duration::from_millis(ttl);
            }
            if let Some(idle) = details.max_idle_interval {
                self.max_idle_interval = Some(Duration::from_millis(idle));
            }
            if let Some(client_id) = &details.client_id {
                self.client_id = Some(client_id.clone());
            }
        }
    }

    fn update_serial(&mut self, serial: Option<i64>) {
        if let Some(serial) = serial {
            self.serial = Some(self.serial.map_or(serial, |current| current.max(serial)));
        }
    }

    fn clear_identifiers(&mut self) {
        self.connection_id = None;
        self.connection_key = None;
        self.serial = None;
    }

    async fn on_message(&mut self, mut message: ProtocolMessage) -> Result<(), ConnectionError> {
        if self.state.kind().is_connected() {
            self.arm_idle_timer();
        }

        match message.action {
            Action::Heartbeat => {
                if let Some(id) = message.id.as_deref() {
                    self.pings.resolve(id);
                }
                Ok(())
            }
            Action::Ack => {
                let serial = message.msg_serial.unwrap_or_default();
                let count = message.count.unwrap_or(1);
                debug!(
                    "ACK for serials {}..{}",
                    serial,
                    serial.saturating_add(i64::from(count))
                );
                self.acks.ack(serial, count);
                Ok(())
            }
            Action::Nack => {
                let serial = message.msg_serial.unwrap_or_default();
                let count = message.count.unwrap_or(1);
                let error = message.error.unwrap_or_else(|| {
                    ErrorInfo::new(error_info::INTERNAL_ERROR, Some(500), "Message rejected")
                });
                warn!(
                    "NACK for serials {}..{}: {}",
                    serial,
                    serial.saturating_add(i64::from(count)),
                    error
                );
                self.acks.nack(serial, count, error);
                Ok(())
            }
            Action::Connected | Action::Disconnected | Action::Closed | Action::Error
                if message.is_connection_level() =>
            {
                self.dispatch(StateEvent::Message(message)).await
            }
            _ => {
                self.update_serial(message.connection_serial);
                if let Err(e) = self.encoders.decode(&mut message, &EncodingOptions::default()) {
                    warn!("Could not decode payload on {:?}: {}", message.channel, e);
                }
                let _ = self.inbound.send(message);
                Ok(())
            }
        }
    }

    fn send(&mut self, mut message: ProtocolMessage, callback: Option<AckCallback>) {
        if let Err(e) = self.encoders.encode(&mut message, &EncodingOptions::default()) {
            warn!("Could not encode payload: {}", e);
            notify(
                callback,
                Err(ErrorInfo::new(error_info::CLIENT_ERROR, Some(400), e.to_string())),
            );
            return;
        }

        match self.state.kind() {
            ConnectionState::Connected => self.send_now(message, callback),
            ConnectionState::Initialized
            | ConnectionState::Connecting
            | ConnectionState::Disconnected
                if self.options.queue_messages =>
            {
                debug!("Queueing message until connected ({} queued)", self.queued.len() + 1);
                self.queued.push_back((message, callback));
            }
            state => {
                warn!("Cannot send message while connection is {}", state);
                notify(
                    callback,
                    Err(ErrorInfo::new(
                        error_info::CONNECTION_FAILED,
                        Some(400),
                        format!("Cannot send message while connection is {}", state),
                    )),
                );
            }
        }
    }

    fn send_now(&mut self, mut message: ProtocolMessage, callback: Option<AckCallback>) {
        if message.action.requires_ack() {
            message.msg_serial = Some(self.message_serial);
            self.message_serial += 1;
            self.write(&message);
            self.acks.push(message, callback);
        } else {
            let written = self.write(&message);
            let result = if written {
                Ok(())
            } else {
                Err(ErrorInfo::reason_disconnected())
            };
            notify(callback, result);
        }
    }

    fn resend_pending(&mut self) {
        let pending: Vec<ProtocolMessage> = self.acks.messages().cloned().collect();
        if !pending.is_empty() {
            info!("Resending {} pending messages after resume", pending.len());
        }
        for message in &pending {
            self.write(message);
        }
    }

    fn flush_queued(&mut self) {
        while let Some((message, callback)) = self.queued.pop_front() {
            self.send_now(message, callback);
        }
    }

    fn fail_outbound(&mut self, error: &ErrorInfo) {
        self.acks.fail_all(error);
        for (_, callback) in self.queued.drain(..) {
            notify(callback, Err(error.clone()));
        }
    }

    fn ping(&mut self, reply: PingReply) {
        if !self.state.accepts(&StateEvent::Ping) {
            let _ = reply.send(Err(ConnectionError::InvalidState {
                operation: "ping",
                state: self.state.kind(),
            }));
            return;
        }

        let id = next_ping_id();
        if self.write(&ProtocolMessage::heartbeat(id.clone())) {
            self.pings.record(id, reply);
        } else {
            let _ = reply.send(Err(ConnectionError::Protocol(ErrorInfo::reason_disconnected())));
        }
    }

    /// Write to the live transport; a failed write is handled as a closure
    fn write(&mut self, message: &ProtocolMessage) -> bool {
        let result = match self.transport.as_mut() {
            Some(transport) => transport.send(message),
            None => Err(TransportError::NotOpen),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("Write of {:?} failed: {}", message.action, e);
                if self.transport.is_some() {
                    let error = e.to_error_info();
                    self.defer(Command::TransportClosed {
                        transport_id: self.transport_id,
                        error: Some(error),
                    });
                }
                false
            }
        }
    }

    fn is_live_transport(&self, transport_id: u64) -> bool {
        self.transport.is_some() && self.transport_id == transport_id
    }

    fn transport_params(&self, host: String) -> TransportParams {
        let mut params = TransportParams::new(host, self.options.port, self.options.format)
            .with_connect_timeout(self.options.realtime_request_timeout);

        if let (Some(key), Some(serial)) = (&self.connection_key, self.serial) {
            params = params
                .with_param("resume", key)
                .with_param("connection_serial", serial);
        } else if let Some(recover) = &self.recover {
            params = params
                .with_param("recover", &recover.key)
                .with_param("connection_serial", recover.serial);
        }
        if let Some(token) = self.auth.current_token() {
            params = params.with_param("access_token", token.token);
        }
        if let Some(client_id) = &self.options.client_id {
            params = params.with_param("client_id", client_id);
        }
        params
    }

    fn open_transport(&mut self) -> Option<StateEvent> {
        self.destroy_transport();

        let use_fallback = self.ledger.disconnected_count() > self.options.fallback_threshold;
        let host = self.hosts.select(use_fallback).to_string();
        let params = self.transport_params(host);

        self.next_transport_id += 1;
        let transport_id = self.next_transport_id;
        let listener = TransportListener::new(transport_id, self.commands.clone());
        let mut transport = self.factory.create(listener);

        info!("Opening transport {} to {}", transport_id, params.address());
        match transport.open(&params) {
            Ok(()) => {
                self.transport = Some(transport);
                self.transport_id = transport_id;
                None
            }
            Err(e) => {
                warn!("Transport {} failed to open: {}", transport_id, e);
                Some(StateEvent::TransportClosed(Some(e.to_error_info())))
            }
        }
    }

    fn destroy_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            debug!("Destroying transport {}", self.transport_id);
            transport.close();
        }
    }

    fn arm_timer(&mut self, delay: Duration) {
        self.cancel_timer();
        let generation = self.timer_generation;
        let commands = self.commands.clone();
        debug!("Arming {} timer for {:?}", self.state.kind(), delay);
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            commands.queue(Command::RetryTimerFired { generation });
        }));
    }

    fn arm_idle_timer(&mut self) {
        if let Some(idle) = self.max_idle_interval {
            self.arm_timer(idle + self.options.realtime_request_timeout);
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.timer_generation += 1;
    }

    fn shutdown(&mut self) {
        info!("Shutting down connection in state {}", self.state.kind());
        self.cancel_timer();
        self.destroy_transport();
        self.pings.fail_all(|| ConnectionError::Disposed);
        self.fail_outbound(&ErrorInfo::reason_closed());
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenAuth;

    /// Factory whose transports never open
    struct RefusingFactory;

    struct RefusingTransport;

    impl Transport for RefusingTransport {
        fn open(&mut self, params: &TransportParams) -> Result<(), TransportError> {
            Err(TransportError::ConnectTimeout(params.address()))
        }

        fn send(&mut self, _message: &ProtocolMessage) -> Result<(), TransportError> {
            Err(TransportError::NotOpen)
        }

        fn close(&mut self) {}
    }

    impl TransportFactory for RefusingFactory {
        fn create(&self, _listener: TransportListener) -> Box<dyn Transport> {
            Box::new(RefusingTransport)
        }
    }

    fn manager(options: ConnectionOptions) -> ConnectionManager {
        let (commands, _rx) = CommandQueue::channel();
        ConnectionManager::new(
            options,
            Arc::new(RefusingFactory),
            Arc::new(StaticTokenAuth::new(None)),
            commands,
        )
    }

    #[tokio::test]
    async fn test_new_manager_is_idle() {
        let manager = manager(ConnectionOptions::default());
        assert_eq!(manager.state(), &State::Initialized);
        assert_eq!(manager.ledger().number_of_attempts(), 0);
        assert_eq!(manager.pending_count(), 0);
        assert_eq!(manager.queued_count(), 0);
    }

    #[tokio::test]
    async fn test_refused_open_disconnects() {
        let mut manager = manager(ConnectionOptions::default());
        manager.handle(Command::Connect).await.unwrap();

        assert_eq!(manager.state().kind(), ConnectionState::Disconnected);
        assert_eq!(manager.state().retry_in(), Some(Duration::from_secs(15)));
        assert_eq!(manager.ledger().number_of_attempts(), 1);
        assert_eq!(manager.ledger().disconnected_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_timer_is_ignored() {
        let mut manager = manager(ConnectionOptions::default());
        manager.handle(Command::Connect).await.unwrap();

        manager
            .handle(Command::RetryTimerFired { generation: 0 })
            .await
            .unwrap();
        assert_eq!(manager.state().kind(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_stale_transport_is_ignored() {
        let mut manager = manager(ConnectionOptions::default());
        manager
            .handle(Command::TransportClosed {
                transport_id: 42,
                error: None,
            })
            .await
            .unwrap();
        assert_eq!(manager.state(), &State::Initialized);
    }

    #[tokio::test]
    async fn test_transition_steps_are_bounded() {
        let mut manager = manager(ConnectionOptions {
            max_transition_steps: 1,
            ..ConnectionOptions::default()
        });

        let result = manager.handle(Command::Connect).await;
        assert!(matches!(
            result,
            Err(ConnectionError::TransitionLoop {
                steps: 1,
                state: ConnectionState::Connecting
            })
        ));
    }

    #[tokio::test]
    async fn test_send_queues_until_connected() {
        let mut manager = manager(ConnectionOptions::default());
        manager
            .handle(Command::Send {
                message: ProtocolMessage::publish("chan", serde_json::json!(1)),
                callback: None,
            })
            .await
            .unwrap();

        assert_eq!(manager.queued_count(), 1);
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_fails_queued_messages() {
        let mut manager = manager(ConnectionOptions::default());
        let (tx, rx) = std::sync::mpsc::channel();
        manager
            .handle(Command::Send {
                message: ProtocolMessage::publish("chan", serde_json::json!(1)),
                callback: Some(Box::new(move |result| {
                    let _ = tx.send(result);
                })),
            })
            .await
            .unwrap();

        manager.handle(Command::Shutdown).await.unwrap();
        let result = rx.try_recv().unwrap();
        assert_eq!(
            result.unwrap_err().code,
            error_info::CONNECTION_CLOSED
        );
        assert_eq!(manager.queued_count(), 0);
    }
}
