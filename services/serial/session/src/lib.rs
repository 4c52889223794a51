//! Event delivery, buffering, and reconnect gating for a serial peer session.
//!
//! This crate keeps a single byte-stream peer connected independently of any
//! observer that wants its events. Transport callbacks arrive on arbitrary
//! contexts; the session forwards them, in order and exactly once, to at most
//! one attached observer, buffering whatever happens while nobody watches.
//!
//! ## Features
//!
//! - **Delivery core**: single-flight handoffs onto one delivery context
//! - **Buffering**: two queues that catch events around attach/detach
//! - **Read coalescing**: one handoff per burst of received chunks
//! - **Auto-reconnect**: failure streaks capped by total duration
//! - **TCP transport**: serial-over-network links on tokio
//!
//! ## Example
//!
//! ```rust,no_run
//! use serial_session::{
//!     delivery_context, ConnectionSession, LogPresentation, Observer, SerialError,
//!     SessionConfig, TcpTransport, TelemetryNotifier,
//! };
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl Observer for Printer {
//!     fn on_connect(&self) { println!("connected"); }
//!     fn on_connect_error(&self, e: SerialError) { println!("connect error: {}", e); }
//!     fn on_read(&self, batch: Vec<Bytes>) { println!("{} chunks", batch.len()); }
//!     fn on_io_error(&self, e: SerialError) { println!("io error: {}", e); }
//! }
//!
//! # async fn example() {
//! let (ctx, delivery) = delivery_context();
//! let session = ConnectionSession::new(
//!     SessionConfig::default(),
//!     Arc::new(TcpTransport::new()),
//!     ctx.clone(),
//!     Arc::new(LogPresentation),
//!     TelemetryNotifier::disabled(),
//! );
//!
//! session.connect("127.0.0.1:7000");
//!
//! // Attach runs on the delivery context, like every handoff
//! let observer: Arc<dyn Observer> = Arc::new(Printer);
//! let attaching = session.clone();
//! let _ = ctx.post(Box::new(move || attaching.attach(&observer)));
//!
//! delivery.run().await;
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coalescer;
pub mod command;
pub mod context;
pub mod delivery;
pub mod error;
pub mod event;
pub mod presentation;
pub mod queue;
pub mod retry;
pub mod session;
pub mod telemetry;
pub mod transport;

// Re-export main types
pub use coalescer::ReadCoalescer;
pub use command::{Command, CommandParseError};
pub use context::{delivery_context, DeliveryContext, DeliveryLoop, Handoff};
pub use delivery::{DeliveryCore, DeliveryStats, ParkHook};
pub use error::SerialError;
pub use event::{Event, Observer};
pub use presentation::{LogPresentation, Presentation};
pub use queue::EventQueue;
pub use retry::{RetryDecision, RetryGate};
pub use session::{ConnectionSession, SessionConfig, SessionStatus, DEFAULT_RECONNECT_TIMEOUT};
pub use telemetry::{
    start_telemetry_processor, TelemetryBody, TelemetryEventKind, TelemetryFormat,
    TelemetryNotifier, TelemetryRecord,
};
pub use transport::{TcpTransport, Transport, TransportHandle, TransportListener};
