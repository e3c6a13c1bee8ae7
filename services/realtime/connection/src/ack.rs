//! Outbound messages awaiting broker acknowledgement.

use realtime_wire::{ErrorInfo, ProtocolMessage};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error, warn};

/// Outcome delivered to a send callback
pub type AckResult = Result<(), ErrorInfo>;

/// Callback invoked exactly once with the outcome of a send
pub type AckCallback = Box<dyn FnOnce(AckResult) + Send>;

/// Run `callback` with `result`, containing a panic so the worker survives it
pub fn notify(callback: Option<AckCallback>, result: AckResult) {
    let Some(callback) = callback else {
        return;
    };
    if let Err(panic) = catch_unwind(AssertUnwindSafe(move || callback(result))) {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!("Send callback panicked: {}", reason);
    }
}

/// A sent message waiting for ACK or NACK
pub struct PendingAck {
    /// The message as written, including its `msg_serial`
    pub message: ProtocolMessage,
    callback: Option<AckCallback>,
}

impl PendingAck {
    fn serial(&self) -> i64 {
        self.message.msg_serial.unwrap_or_default()
    }

    fn complete(mut self, result: AckResult) {
        notify(self.callback.take(), result);
    }
}

impl std::fmt::Debug for PendingAck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAck")
            .field("msg_serial", &self.message.msg_serial)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Pending acks ordered by `msg_serial`
#[derive(Debug, Default)]
pub struct AckQueue {
    pending: VecDeque<PendingAck>,
}

impl AckQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a message that has been written with a serial
    pub fn push(&mut self, message: ProtocolMessage, callback: Option<AckCallback>) {
        self.pending.push_back(PendingAck { message, callback });
    }

    /// Number of messages awaiting an outcome
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pending messages in send order
    pub fn messages(&self) -> impl Iterator<Item = &ProtocolMessage> {
        self.pending.iter().map(|p| &p.message)
    }

    /// Complete `serial..serial + count` successfully
    pub fn ack(&mut self, serial: i64, count: u32) -> usize {
        self.complete_range(serial, count, Ok(()))
    }

    /// Complete `serial..serial + count` with an error
    pub fn nack(&mut self, serial: i64, count: u32, error: ErrorInfo) -> usize {
        self.complete_range(serial, count, Err(error))
    }

    /// Fail every pending message
    pub fn fail_all(&mut self, error: &ErrorInfo) -> usize {
        let failed = self.pending.len();
        if failed > 0 {
            debug!("Failing {} pending messages: {}", failed, error);
        }
        for pending in self.pending.drain(..) {
            pending.complete(Err(error.clone()));
        }
        failed
    }

    fn complete_range(&mut self, serial: i64, count: u32, result: AckResult) -> usize {
        let end = serial.saturating_add(i64::from(count));
        let mut completed = 0;
        let mut remaining = VecDeque::with_capacity(self.pending.len());

        for pending in self.pending.drain(..) {
            if (serial..end).contains(&pending.serial()) {
                pending.complete(result.clone());
                completed += 1;
            } else {
                remaining.push_back(pending);
            }
        }
        self.pending = remaining;

        if completed < count as usize {
            warn!(
                "Broker completed serials {}..{} but only {} were pending",
                serial, end, completed
            );
        }
        completed
    }
}
