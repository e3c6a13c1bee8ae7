//! Transport abstraction and the TCP transport.
//!
//! A transport is a duplex message channel to one host. It reports inbound
//! messages and its own closure through a `TransportListener`, which turns
//! them into commands tagged with the transport id so the manager can ignore
//! events from transports it has already discarded.

use crate::error::TransportError;
use crate::workflow::{Command, CommandQueue};
use bytes::BytesMut;
use realtime_wire::{
    encode_frame, Action, ErrorInfo, Format, FrameDecoder, ProtocolMessage,
    DEFAULT_MAX_FRAME_SIZE, PROTOCOL_VERSION,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything a transport needs to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportParams {
    /// Host to connect to
    pub host: String,
    /// Port to connect to
    pub port: u16,
    /// Body format
    pub format: Format,
    /// How long to wait for the socket to connect
    pub connect_timeout: Duration,
    params: BTreeMap<String, String>,
}

impl TransportParams {
    /// Base parameters announcing format and protocol version
    pub fn new(host: impl Into<String>, port: u16, format: Format) -> Self {
        let mut params = BTreeMap::new();
        params.insert("format".to_string(), format.as_str().to_string());
        params.insert("v".to_string(), PROTOCOL_VERSION.to_string());
        Self {
            host: host.into(),
            port,
            format,
            connect_timeout: Duration::from_secs(10),
            params,
        }
    }

    /// Add a connect parameter
    pub fn with_param(mut self, name: &str, value: impl ToString) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }

    /// Set the socket connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Connect parameter by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// All connect parameters
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// CONNECT message carrying the parameters
    pub fn connect_message(&self) -> ProtocolMessage {
        let mut message = ProtocolMessage::new(Action::Connect);
        message.data = serde_json::to_value(&self.params).ok();
        message
    }
}

/// Reports transport events to the connection worker
#[derive(Debug, Clone)]
pub struct TransportListener {
    transport_id: u64,
    queue: CommandQueue,
}

impl TransportListener {
    /// Listener for transport `transport_id`
    pub fn new(transport_id: u64, queue: CommandQueue) -> Self {
        Self {
            transport_id,
            queue,
        }
    }

    /// Id of the transport this listener belongs to
    pub fn transport_id(&self) -> u64 {
        self.transport_id
    }

    /// A message arrived
    pub fn on_message(&self, message: ProtocolMessage) {
        self.queue.queue(Command::TransportMessageReceived {
            transport_id: self.transport_id,
            message,
        });
    }

    /// The transport closed, with the failure if it was not clean
    pub fn on_closed(&self, error: Option<ErrorInfo>) {
        self.queue.queue(Command::TransportClosed {
            transport_id: self.transport_id,
            error,
        });
    }
}

/// Duplex message channel to a broker host
pub trait Transport: Send {
    /// Start connecting; completion and failure are reported to the listener
    fn open(&mut self, params: &TransportParams) -> Result<(), TransportError>;

    /// Write a message
    fn send(&mut self, message: &ProtocolMessage) -> Result<(), TransportError>;

    /// Close without reporting further events
    fn close(&mut self);
}

/// Creates one transport per connection attempt
pub trait TransportFactory: Send + Sync {
    /// Create an unopened transport reporting to `listener`
    fn create(&self, listener: TransportListener) -> Box<dyn Transport>;
}

/// Length-prefixed frames over TCP
pub struct TcpTransport {
    listener: TransportListener,
    outbound: Option<mpsc::UnboundedSender<ProtocolMessage>>,
    task: Option<JoinHandle<()>>,
}

impl TcpTransport {
    /// Create an unopened transport
    pub fn new(listener: TransportListener) -> Self {
        Self {
            listener,
            outbound: None,
            task: None,
        }
    }
}

impl Transport for TcpTransport {
    fn open(&mut self, params: &TransportParams) -> Result<(), TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound = Some(tx);

        let listener = self.listener.clone();
        let params = params.clone();
        self.task = Some(tokio::spawn(async move {
            match run_tcp(&params, rx, &listener).await {
                Ok(()) => {
                    info!("Transport {} to {} closed", listener.transport_id(), params.address());
                    listener.on_closed(None);
                }
                Err(e) => {
                    warn!("Transport {} to {} failed: {}", listener.transport_id(), params.address(), e);
                    listener.on_closed(Some(e.to_error_info()));
                }
            }
        }));
        Ok(())
    }

    fn send(&mut self, message: &ProtocolMessage) -> Result<(), TransportError> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::NotOpen)?;
        outbound
            .send(message.clone())
            .map_err(|_| TransportError::NotOpen)
    }

    fn close(&mut self) {
        self.outbound = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_tcp(
    params: &TransportParams,
    mut outbound: mpsc::UnboundedReceiver<ProtocolMessage>,
    listener: &TransportListener,
) -> Result<(), TransportError> {
    let address = params.address();
    let stream = tokio::time::timeout(params.connect_timeout, TcpStream::connect(&address))
        .await
        .map_err(|_| TransportError::ConnectTimeout(address.clone()))??;
    stream.set_nodelay(true)?;
    debug!("Transport {} connected to {}", listener.transport_id(), address);

    let (mut reader, mut writer) = stream.into_split();
    let connect = encode_frame(&params.connect_message(), params.format, DEFAULT_MAX_FRAME_SIZE)?;
    writer.write_all(&connect).await?;

    let mut decoder = FrameDecoder::new();
    let mut buf = BytesMut::with_capacity(64 * 1024);
    loop {
        tokio::select! {
            read = reader.read_buf(&mut buf) => {
                if read? == 0 {
                    return Ok(());
                }
                while let Some(message) = decoder.decode(&mut buf)? {
                    listener.on_message(message);
                }
            }
            message = outbound.recv() => match message {
                Some(message) => {
                    let frame = encode_frame(&message, params.format, DEFAULT_MAX_FRAME_SIZE)?;
                    writer.write_all(&frame).await?;
                }
                None => {
                    let _ = writer.shutdown().await;
                    return Ok(());
                }
            },
        }
    }
}

/// Creates `TcpTransport`s
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransportFactory;

impl TransportFactory for TcpTransportFactory {
    fn create(&self, listener: TransportListener) -> Box<dyn Transport> {
        Box::new(TcpTransport::new(listener))
    }
}
