//! Serialized command processing.
//!
//! Every change to connection state goes through a single unbounded queue
//! drained by one worker task that owns the `ConnectionManager`. Callers
//! either wait for their command to be processed (`execute`) or fire and
//! forget (`queue`). A caller that stops waiting does not cancel its command.

use crate::ack::{notify, AckCallback};
use crate::error::ConnectionError;
use crate::keepalive::PingReply;
use crate::manager::ConnectionManager;
use crate::network::NetworkState;
use realtime_wire::{ErrorInfo, ProtocolMessage};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Work item for the connection worker
pub enum Command {
    /// Start connecting
    Connect,
    /// Close the connection
    Close,
    /// Probe the broker while connected
    Ping {
        /// Receives the round trip time
        reply: PingReply,
    },
    /// Reconnect now from a waiting state
    SetConnectingState,
    /// Send a message, queueing it while not connected
    Send {
        /// Message to send
        message: ProtocolMessage,
        /// Invoked with the ack outcome
        callback: Option<AckCallback>,
    },
    /// A transport delivered a message
    TransportMessageReceived {
        /// Transport that produced the message
        transport_id: u64,
        /// Decoded message
        message: ProtocolMessage,
    },
    /// A transport closed
    TransportClosed {
        /// Transport that closed
        transport_id: u64,
        /// Failure reported by the transport
        error: Option<ErrorInfo>,
    },
    /// A state timer elapsed
    RetryTimerFired {
        /// Timer generation when it was armed
        generation: u64,
    },
    /// Host connectivity changed
    NetworkStateChanged(NetworkState),
    /// Completes once every command queued before it has been processed
    Barrier,
    /// Release resources and stop the worker
    Shutdown,
}

impl Command {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::Connect => "connect",
            Command::Close => "close",
            Command::Ping { .. } => "ping",
            Command::SetConnectingState => "set_connecting_state",
            Command::Send { .. } => "send",
            Command::TransportMessageReceived { .. } => "transport_message_received",
            Command::TransportClosed { .. } => "transport_closed",
            Command::RetryTimerFired { .. } => "retry_timer_fired",
            Command::NetworkStateChanged(_) => "network_state_changed",
            Command::Barrier => "barrier",
            Command::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A command plus the channel its outcome is reported on
pub struct Envelope {
    /// The command
    pub command: Command,
    /// Completion channel for `execute`
    pub done: Option<oneshot::Sender<Result<(), ConnectionError>>>,
}

/// Cloneable handle for submitting commands
#[derive(Clone, Debug)]
pub struct CommandQueue {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl CommandQueue {
    /// Create a queue and the receiver the worker drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Submit without waiting; returns false once the worker has stopped
    pub fn queue(&self, command: Command) -> bool {
        let name = command.name();
        let sent = self.tx.send(Envelope { command, done: None }).is_ok();
        if !sent {
            debug!("Dropping {} command, worker has stopped", name);
        }
        sent
    }

    /// Submit and wait up to `timeout` for the command to be processed
    pub async fn execute(
        &self,
        command: Command,
        timeout: Duration,
    ) -> Result<(), ConnectionError> {
        let name = command.name();
        let (done, rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                command,
                done: Some(done),
            })
            .map_err(|_| ConnectionError::WorkflowClosed)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ConnectionError::WorkflowClosed),
            Err(_) => Err(ConnectionError::Timeout(format!("{} command", name))),
        }
    }

    /// Whether the worker has stopped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The worker task draining a command queue
pub struct Workflow {
    handle: JoinHandle<()>,
}

impl Workflow {
    /// Spawn the worker; it runs until a `Shutdown` command is processed
    pub fn spawn(manager: ConnectionManager, rx: mpsc::UnboundedReceiver<Envelope>) -> Self {
        Self {
            handle: tokio::spawn(run(manager, rx)),
        }
    }

    /// Whether the worker has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn run(mut manager: ConnectionManager, mut rx: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(Envelope { command, done }) = rx.recv().await {
        let name = command.name();
        let shutdown = matches!(command, Command::Shutdown);

        let result = manager.handle(command).await;
        if let Err(e) = &result {
            error!("Error processing {} command: {}", name, e);
        }
        if let Some(done) = done {
            let _ = done.send(result);
        }

        if shutdown {
            break;
        }
    }

    rx.close();
    while let Ok(Envelope { command, done }) = rx.try_recv() {
        match command {
            Command::Send { callback, .. } => notify(callback, Err(ErrorInfo::reason_closed())),
            Command::Ping { reply } => {
                let _ = reply.send(Err(ConnectionError::Disposed));
            }
            _ => {}
        }
        if let Some(done) = done {
            let _ = done.send(Err(ConnectionError::Disposed));
        }
    }
    debug!("Connection workflow stopped");
}
