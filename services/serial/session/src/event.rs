//! Delivery events and the observer capability set.

use bytes::Bytes;

use crate::error::SerialError;

/// Events produced by the transport callback surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Link established
    Connected,
    /// Connection attempt failed
    ConnectError(SerialError),
    /// One or more received chunks, in arrival order
    DataReceived(Vec<Bytes>),
    /// Read or write failure on the link
    IoError(SerialError),
}

impl Event {
    /// Short name used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Connected => "connected",
            Event::ConnectError(_) => "connect_error",
            Event::DataReceived(_) => "data_received",
            Event::IoError(_) => "io_error",
        }
    }

    /// Hand this event to the observer, consuming it.
    pub fn deliver_to(self, observer: &dyn Observer) {
        match self {
            Event::Connected => observer.on_connect(),
            Event::ConnectError(e) => observer.on_connect_error(e),
            Event::DataReceived(batch) => observer.on_read(batch),
            Event::IoError(e) => observer.on_io_error(e),
        }
    }
}

/// Consumer of session events.
///
/// At most one observer is attached at a time. Every method runs on the
/// delivery context.
pub trait Observer: Send + Sync {
    /// Link established
    fn on_connect(&self);
    /// Connection attempt failed
    fn on_connect_error(&self, error: SerialError);
    /// Coalesced batch of received chunks
    fn on_read(&self, batch: Vec<Bytes>);
    /// Read or write failure on the link
    fn on_io_error(&self, error: SerialError);
}
