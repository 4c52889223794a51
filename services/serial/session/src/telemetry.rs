//! Best-effort export of session activity.
//!
//! Records go out over an unbounded channel and are never awaited, so a slow
//! or missing consumer cannot stall the session.

use bytes::Bytes;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Named session events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryEventKind {
    /// Link established
    Connected,
    /// Session torn down
    Disconnected,
    /// Error reported by the transport
    Error,
}

/// Payload of an exported record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TelemetryBody {
    /// Human-readable debug string
    Info {
        /// Message text
        text: String,
    },
    /// Named lifecycle event
    Event {
        /// Event name
        kind: TelemetryEventKind,
    },
    /// Received data, lossily decoded as UTF-8
    Data {
        /// Decoded payload
        payload: String,
    },
}

/// One exported record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryRecord {
    /// Monotonic sequence number
    pub sequence: u64,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    /// Record payload
    #[serde(flatten)]
    pub body: TelemetryBody,
}

/// Sender side of the telemetry stream
#[derive(Debug, Clone)]
pub struct TelemetryNotifier {
    /// Channel to the exporter, none when telemetry is off
    event_tx: Option<mpsc::UnboundedSender<TelemetryRecord>>,
    /// Sequence number for records
    sequence_counter: Arc<AtomicU64>,
}

impl TelemetryNotifier {
    /// Create a notifier feeding `event_tx`
    pub fn new(event_tx: mpsc::UnboundedSender<TelemetryRecord>) -> Self {
        Self {
            event_tx: Some(event_tx),
            sequence_counter: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Create a notifier that discards everything
    pub fn disabled() -> Self {
        Self {
            event_tx: None,
            sequence_counter: Arc::new(AtomicU64::new(1)),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence_counter.fetch_add(1, Ordering::SeqCst)
    }

    fn send(&self, body: TelemetryBody) {
        let Some(tx) = &self.event_tx else {
            return;
        };
        let record = TelemetryRecord {
            sequence: self.next_sequence(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            body,
        };
        if tx.send(record).is_err() {
            debug!("Telemetry exporter gone, dropping record");
        }
    }

    /// Export a debug string
    pub fn info(&self, text: impl Into<String>) {
        self.send(TelemetryBody::Info { text: text.into() });
    }

    /// Export a named event
    pub fn event(&self, kind: TelemetryEventKind) {
        self.send(TelemetryBody::Event { kind });
    }

    /// Export received data
    pub fn data(&self, data: &Bytes) {
        self.send(TelemetryBody::Data {
            payload: String::from_utf8_lossy(data).into_owned(),
        });
    }
}

/// How the exporter renders records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryFormat {
    /// One tracing line per record
    Log,
    /// One JSON object per line on stdout
    Json,
}

/// Drain the telemetry stream until every notifier is dropped
pub async fn start_telemetry_processor(
    mut event_rx: mpsc::UnboundedReceiver<TelemetryRecord>,
    format: TelemetryFormat,
) {
    info!("Starting telemetry processor");

    while let Some(record) = event_rx.recv().await {
        match format {
            TelemetryFormat::Log => match &record.body {
                TelemetryBody::Info { text } => {
                    info!(component = "telemetry", "[{}] {}", record.sequence, text)
                }
                TelemetryBody::Event { kind } => {
                    info!(component = "telemetry", "[{}] event {:?}", record.sequence, kind)
                }
                TelemetryBody::Data { payload } => {
                    info!(component = "telemetry", "[{}] data {:?}", record.sequence, payload)
                }
            },
            TelemetryFormat::Json => match serde_json::to_string(&record) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to encode telemetry record {}: {}", record.sequence, e),
            },
        }
    }

    debug!("Telemetry processor ended");
}
