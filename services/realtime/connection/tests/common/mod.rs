//! Shared fakes for connection tests.

#![allow(dead_code)]

use async_trait::async_trait;
use realtime_connection::{
    Auth, Connection, ConnectionOptions, ConnectionState, ConnectionStateChange,
    NetworkStateRegistry, Token, Transport, TransportError, TransportFactory, TransportListener,
    TransportParams,
};
use realtime_wire::{Action, ConnectionDetails, ErrorInfo, ProtocolMessage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

#[derive(Default)]
struct FakeTransportState {
    params: Option<TransportParams>,
    sent: Vec<ProtocolMessage>,
    closed: bool,
}

/// Test-side view of a transport the connection created
#[derive(Clone)]
pub struct FakeTransportHandle {
    listener: TransportListener,
    state: Arc<Mutex<FakeTransportState>>,
}

impl FakeTransportHandle {
    pub fn params(&self) -> TransportParams {
        self.state.lock().unwrap().params.clone().expect("transport was never opened")
    }

    pub fn sent(&self) -> Vec<ProtocolMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn sent_with(&self, action: Action) -> Vec<ProtocolMessage> {
        self.sent().into_iter().filter(|m| m.action == action).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Deliver a broker message
    pub fn receive(&self, message: ProtocolMessage) {
        self.listener.on_message(message);
    }

    /// Make every further write fail without reporting a closure
    pub fn break_writes(&self) {
        self.state.lock().unwrap().closed = true;
    }

    /// Simulate the socket dropping
    pub fn drop_connection(&self, error: Option<ErrorInfo>) {
        self.listener.on_closed(error);
    }
}

struct FakeTransport {
    handle: FakeTransportHandle,
}

impl Transport for FakeTransport {
    fn open(&mut self, params: &TransportParams) -> Result<(), TransportError> {
        self.handle.state.lock().unwrap().params = Some(params.clone());
        Ok(())
    }

    fn send(&mut self, message: &ProtocolMessage) -> Result<(), TransportError> {
        let mut state = self.handle.state.lock().unwrap();
        if state.closed {
            return Err(TransportError::NotOpen);
        }
        state.sent.push(message.clone());
        Ok(())
    }

    fn close(&mut self) {
        self.handle.state.lock().unwrap().closed = true;
    }
}

/// Records every transport it creates
#[derive(Clone, Default)]
pub struct FakeTransportFactory {
    created: Arc<Mutex<Vec<FakeTransportHandle>>>,
}

impl FakeTransportFactory {
    pub fn count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn last(&self) -> FakeTransportHandle {
        self.created
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no transport created")
    }

    pub fn all(&self) -> Vec<FakeTransportHandle> {
        self.created.lock().unwrap().clone()
    }
}

impl TransportFactory for FakeTransportFactory {
    fn create(&self, listener: TransportListener) -> Box<dyn Transport> {
        let handle = FakeTransportHandle {
            listener,
            state: Arc::new(Mutex::new(FakeTransportState::default())),
        };
        self.created.lock().unwrap().push(handle.clone());
        Box::new(FakeTransport { handle })
    }
}

/// Token source with scripted renewal outcomes
pub struct FakeAuth {
    renewable: bool,
    hangs: bool,
    outcomes: Mutex<VecDeque<Result<Token, ErrorInfo>>>,
    renew_calls: AtomicUsize,
}

impl FakeAuth {
    pub fn renewable() -> Arc<Self> {
        Arc::new(Self {
            renewable: true,
            hangs: false,
            outcomes: Mutex::new(VecDeque::new()),
            renew_calls: AtomicUsize::new(0),
        })
    }

    /// Renewable, but renewal never completes
    pub fn hanging() -> Arc<Self> {
        Arc::new(Self {
            renewable: true,
            hangs: true,
            outcomes: Mutex::new(VecDeque::new()),
            renew_calls: AtomicUsize::new(0),
        })
    }

    pub fn not_renewable() -> Arc<Self> {
        Arc::new(Self {
            renewable: false,
            hangs: false,
            outcomes: Mutex::new(VecDeque::new()),
            renew_calls: AtomicUsize::new(0),
        })
    }

    pub fn fail_next_renewal(&self, error: ErrorInfo) {
        self.outcomes.lock().unwrap().push_back(Err(error));
    }

    pub fn renew_calls(&self) -> usize {
        self.renew_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Auth for FakeAuth {
    fn can_renew(&self) -> bool {
        self.renewable
    }

    fn current_token(&self) -> Option<Token> {
        Some(Token::new(format!("token-{}", self.renew_calls())))
    }

    async fn renew_token(&self) -> Result<Token, ErrorInfo> {
        let calls = self.renew_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hangs {
            std::future::pending::<()>().await;
        }
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Token::new(format!("token-{}", calls))))
    }
}

pub fn options() -> ConnectionOptions {
    ConnectionOptions {
        auto_connect: false,
        fallback_seed: Some(42),
        ..ConnectionOptions::default()
    }
}

pub fn connected_message(id: &str, key: &str, serial: i64) -> ProtocolMessage {
    let mut message = ProtocolMessage::new(Action::Connected);
    message.connection_id = Some(id.to_string());
    message.connection_serial = Some(serial);
    message.connection_details = Some(ConnectionDetails {
        connection_key: Some(key.to_string()),
        ..ConnectionDetails::default()
    });
    message
}

pub fn message_with_error(action: Action, code: u32, status: u16) -> ProtocolMessage {
    let mut message = ProtocolMessage::new(action);
    message.error = Some(ErrorInfo::new(code, Some(status), "broker error"));
    message
}

pub fn ack(action: Action, serial: i64, count: u32) -> ProtocolMessage {
    let mut message = ProtocolMessage::new(action);
    message.msg_serial = Some(serial);
    message.count = Some(count);
    message
}

pub struct Harness {
    pub connection: Connection,
    pub factory: FakeTransportFactory,
    pub network: NetworkStateRegistry,
}

impl Harness {
    pub fn new(options: ConnectionOptions, auth: Arc<FakeAuth>) -> Self {
        let factory = FakeTransportFactory::default();
        let network = NetworkStateRegistry::new();
        let connection = Connection::new(options, Arc::new(factory.clone()), auth, &network);
        Self {
            connection,
            factory,
            network,
        }
    }

    /// Connect and confirm as connection "1" with key "connectionKey" at serial 100
    pub async fn connected(options: ConnectionOptions, auth: Arc<FakeAuth>) -> Self {
        let harness = Self::new(options, auth);
        harness.connection.connect().await.unwrap();
        harness
            .factory
            .last()
            .receive(connected_message("1", "connectionKey", 100));
        harness.settle().await;
        assert_eq!(harness.connection.state(), ConnectionState::Connected);
        harness
    }

    pub async fn settle(&self) {
        self.connection.settle().await.unwrap();
    }
}

/// Send a publish and record its outcome under `index`
pub async fn send_tracked(
    connection: &Connection,
    index: usize,
    outcomes: &Arc<Mutex<Vec<(usize, Result<(), ErrorInfo>)>>>,
) {
    let outcomes = outcomes.clone();
    connection
        .send(
            ProtocolMessage::publish("chan", serde_json::json!(format!("m{}", index))),
            Some(Box::new(move |result| {
                outcomes.lock().unwrap().push((index, result));
            })),
        )
        .await
        .unwrap();
}

pub fn drain(rx: &mut broadcast::Receiver<ConnectionStateChange>) -> Vec<ConnectionStateChange> {
    let mut changes = Vec::new();
    while let Ok(change) = rx.try_recv() {
        changes.push(change);
    }
    changes
}

pub fn states(changes: &[ConnectionStateChange]) -> Vec<ConnectionState> {
    changes.iter().map(|c| c.current).collect()
}
