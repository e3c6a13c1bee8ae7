//! Public connection handle.
//!
//! `Connection` never touches connection state itself: operations become
//! commands for the worker, and reads come from the snapshot the worker
//! publishes after each transition.

use crate::ack::{AckCallback, AckResult};
use crate::auth::Auth;
use crate::error::ConnectionError;
use crate::manager::ConnectionManager;
use crate::network::{NetworkStateRegistry, NetworkSubscription};
use crate::options::ConnectionOptions;
use crate::state::ConnectionState;
use crate::transport::TransportFactory;
use crate::workflow::{Command, CommandQueue, Workflow};
use realtime_wire::{ErrorInfo, ProtocolMessage};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::debug;

/// Kind of state change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Entered Initialized
    Initialized,
    /// Entered Connecting
    Connecting,
    /// Entered Connected
    Connected,
    /// Entered Disconnected
    Disconnected,
    /// Entered Suspended
    Suspended,
    /// Entered Closing
    Closing,
    /// Entered Closed
    Closed,
    /// Entered Failed
    Failed,
    /// Connection details refreshed while staying Connected
    Update,
}

impl From<ConnectionState> for ConnectionEvent {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Initialized => ConnectionEvent::Initialized,
            ConnectionState::Connecting => ConnectionEvent::Connecting,
            ConnectionState::Connected => ConnectionEvent::Connected,
            ConnectionState::Disconnected => ConnectionEvent::Disconnected,
            ConnectionState::Suspended => ConnectionEvent::Suspended,
            ConnectionState::Closing => ConnectionEvent::Closing,
            ConnectionState::Closed => ConnectionEvent::Closed,
            ConnectionState::Failed => ConnectionEvent::Failed,
        }
    }
}

/// Notification sent for every transition
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStateChange {
    /// What happened
    pub event: ConnectionEvent,
    /// State before the transition
    pub previous: ConnectionState,
    /// State after the transition
    pub current: ConnectionState,
    /// Delay before the next automatic attempt
    pub retry_in: Option<Duration>,
    /// Error that caused the transition
    pub reason: Option<ErrorInfo>,
}

impl ConnectionStateChange {
    /// Whether the change carries an error
    pub fn has_error(&self) -> bool {
        self.reason.is_some()
    }
}

/// Connection state as last published by the worker
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSnapshot {
    /// Current state
    pub state: ConnectionState,
    /// Error of the current state
    pub error_reason: Option<ErrorInfo>,
    /// Delay before the next automatic attempt
    pub retry_in: Option<Duration>,
    /// Broker-assigned connection id
    pub connection_id: Option<String>,
    /// Key used to resume
    pub connection_key: Option<String>,
    /// Last connection serial seen
    pub serial: Option<i64>,
    /// Serial the next ack-requiring message will get
    pub message_serial: i64,
    /// How long the broker keeps connection state
    pub connection_state_ttl: Duration,
    /// Host of the current or last attempt
    pub host: String,
    /// Client id confirmed by the broker
    pub client_id: Option<String>,
}

impl ConnectionSnapshot {
    /// `key:serial:message_serial` when the connection can be recovered
    pub fn recovery_key(&self) -> Option<String> {
        let key = self.connection_key.as_ref()?;
        let serial = self.serial?;
        Some(format!("{}:{}:{}", key, serial, self.message_serial))
    }
}

/// A realtime connection
pub struct Connection {
    commands: CommandQueue,
    snapshot: watch::Receiver<ConnectionSnapshot>,
    events: broadcast::Sender<ConnectionStateChange>,
    inbound: broadcast::Sender<ProtocolMessage>,
    fallback_hosts: Vec<String>,
    command_timeout: Duration,
    request_timeout: Duration,
    workflow: Workflow,
    network: Mutex<Option<NetworkSubscription>>,
}

impl Connection {
    /// Create a connection and start its worker.
    ///
    /// Must be called from within a Tokio runtime. Connects right away when
    /// `auto_connect` is set.
    pub fn new(
        options: ConnectionOptions,
        factory: Arc<dyn TransportFactory>,
        auth: Arc<dyn Auth>,
        network: &NetworkStateRegistry,
    ) -> Self {
        let (commands, rx) = CommandQueue::channel();
        let command_timeout = options.command_timeout;
        let request_timeout = options.realtime_request_timeout;
        let auto_connect = options.auto_connect;

        let manager = ConnectionManager::new(options, factory, auth, commands.clone());
        let snapshot = manager.snapshot();
        let events = manager.events();
        let inbound = manager.inbound();
        let fallback_hosts = manager.fallback_hosts().to_vec();
        let workflow = Workflow::spawn(manager, rx);

        let network_commands = commands.clone();
        let subscription = network.subscribe(move |state| {
            network_commands.queue(Command::NetworkStateChanged(state));
        });

        if auto_connect {
            commands.queue(Command::Connect);
        }

        Self {
            commands,
            snapshot,
            events,
            inbound,
            fallback_hosts,
            command_timeout,
            request_timeout,
            workflow,
            network: Mutex::new(Some(subscription)),
        }
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    /// Broker-assigned connection id
    pub fn id(&self) -> Option<String> {
        self.snapshot.borrow().connection_id.clone()
    }

    /// Connection key used to resume
    pub fn key(&self) -> Option<String> {
        self.snapshot.borrow().connection_key.clone()
    }

    /// Last connection serial seen
    pub fn serial(&self) -> Option<i64> {
        self.snapshot.borrow().serial
    }

    /// Serial the next ack-requiring message will get
    pub fn message_serial(&self) -> i64 {
        self.snapshot.borrow().message_serial
    }

    /// Key to recover this connection from another process
    pub fn recovery_key(&self) -> Option<String> {
        self.snapshot.borrow().recovery_key()
    }

    /// Error of the current state
    pub fn error_reason(&self) -> Option<ErrorInfo> {
        self.snapshot.borrow().error_reason.clone()
    }

    /// How long the broker keeps connection state
    pub fn connection_state_ttl(&self) -> Duration {
        self.snapshot.borrow().connection_state_ttl
    }

    /// Host of the current or last attempt
    pub fn host(&self) -> String {
        self.snapshot.borrow().host.clone()
    }

    /// Fallback hosts in the order they will be tried
    pub fn fallback_hosts(&self) -> &[String] {
        &self.fallback_hosts
    }

    /// Subscribe to state changes from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionStateChange> {
        self.events.subscribe()
    }

    /// Subscribe to channel-level messages from the broker
    pub fn messages(&self) -> broadcast::Receiver<ProtocolMessage> {
        self.inbound.subscribe()
    }

    /// Start connecting
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.execute(Command::Connect).await
    }

    /// Close the connection
    pub async fn close(&self) -> Result<(), ConnectionError> {
        self.execute(Command::Close).await
    }

    /// Send a message; `callback` receives the broker's verdict
    pub async fn send(
        &self,
        message: ProtocolMessage,
        callback: Option<AckCallback>,
    ) -> Result<(), ConnectionError> {
        self.execute(Command::Send { message, callback }).await
    }

    /// Send a message and wait for the broker to ack it
    pub async fn publish(&self, message: ProtocolMessage) -> Result<(), ConnectionError> {
        let (tx, rx) = oneshot::channel::<AckResult>();
        let callback: AckCallback = Box::new(move |result| {
            let _ = tx.send(result);
        });
        self.send(message, Some(callback)).await?;
        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(ConnectionError::Protocol(error)),
            Err(_) => Err(ConnectionError::Disposed),
        }
    }

    /// Measure the round trip to the broker
    pub async fn ping(&self) -> Result<Duration, ConnectionError> {
        let (reply, rx) = oneshot::channel();
        self.execute(Command::Ping { reply }).await?;
        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ConnectionError::WorkflowClosed),
            Err(_) => Err(ConnectionError::Timeout("ping reply".to_string())),
        }
    }

    /// Wait until the connection reaches `state`
    pub async fn wait_for_state(
        &self,
        state: ConnectionState,
        timeout: Duration,
    ) -> Result<(), ConnectionError> {
        let mut snapshot = self.snapshot.clone();
        let reached = snapshot.wait_for(|s| s.state == state);
        let result = match tokio::time::timeout(timeout, reached).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(ConnectionError::WorkflowClosed),
            Err(_) => Err(ConnectionError::Timeout(format!("state {}", state))),
        };
        result
    }

    /// Wait until every command submitted so far has been processed
    pub async fn settle(&self) -> Result<(), ConnectionError> {
        self.execute(Command::Barrier).await
    }

    /// Close, stop the worker and stop listening for network changes
    pub async fn dispose(&self) -> Result<(), ConnectionError> {
        if let Ok(mut network) = self.network.lock() {
            network.take();
        }
        if self.commands.is_closed() {
            return Ok(());
        }
        if let Err(e) = self.execute(Command::Close).await {
            debug!("Close during dispose failed: {}", e);
        }
        // The transport has to stay up until the CLOSE frame is written.
        if self.state() == ConnectionState::Closing {
            if let Err(e) = self
                .wait_for_state(ConnectionState::Closed, self.request_timeout)
                .await
            {
                debug!("Close handshake did not finish during dispose: {}", e);
            }
        }
        match self.execute(Command::Shutdown).await {
            Ok(()) | Err(ConnectionError::WorkflowClosed) | Err(ConnectionError::Disposed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Whether the worker has stopped
    pub fn is_disposed(&self) -> bool {
        self.workflow.is_finished() || self.commands.is_closed()
    }

    async fn execute(&self, command: Command) -> Result<(), ConnectionError> {
        self.commands.execute(command, self.command_timeout).await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.commands.is_closed() {
            self.commands.queue(Command::Close);
            self.commands.queue(Command::Shutdown);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("snapshot", &*self.snapshot.borrow())
            .finish()
    }
}
