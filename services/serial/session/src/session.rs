//! Connection session: owns the link, the target address, and the retry gate.
//!
//! Transport callbacks land here first. The session drops events from a
//! disconnected link, consults the retry gate on errors, and hands everything
//! else to the [`DeliveryCore`].

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::context::DeliveryContext;
use crate::delivery::{DeliveryCore, DeliveryStats};
use crate::error::SerialError;
use crate::event::{Event, Observer};
use crate::presentation::Presentation;
use crate::retry::{RetryDecision, RetryGate};
use crate::telemetry::{TelemetryEventKind, TelemetryNotifier};
use crate::transport::{Transport, TransportHandle, TransportListener};

/// Default cap on a reconnect streak
pub const DEFAULT_RECONNECT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Configuration for a connection session
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Longest a failure streak may keep reconnecting; zero means forever
    pub reconnect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_timeout: DEFAULT_RECONNECT_TIMEOUT,
        }
    }
}

/// Point-in-time view of a session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionStatus {
    /// Whether the link is considered up
    pub connected: bool,
    /// Address reconnects go to
    pub target: Option<String>,
    /// Whether a failure streak is running
    pub retrying: bool,
    /// Cap on the current or next failure streak
    pub reconnect_timeout: Duration,
    /// Buffering state of the delivery core
    pub delivery: DeliveryStats,
}

struct SessionInner {
    this: Weak<SessionInner>,
    transport: Arc<dyn Transport>,
    core: Arc<DeliveryCore>,
    presentation: Arc<dyn Presentation>,
    telemetry: TelemetryNotifier,
    connected: AtomicBool,
    /// Bumped by every teardown
    epoch: AtomicU64,
    target: Mutex<Option<String>>,
    link: Mutex<Option<Arc<dyn TransportHandle>>>,
    retry: Mutex<RetryGate>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Background keeper for one serial peer
#[derive(Clone)]
pub struct ConnectionSession {
    inner: Arc<SessionInner>,
}

impl ConnectionSession {
    /// Create an idle session. Handoffs go to `context`.
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        context: DeliveryContext,
        presentation: Arc<dyn Presentation>,
        telemetry: TelemetryNotifier,
    ) -> Self {
        let inner = Arc::new_cyclic(|this| SessionInner {
            this: this.clone(),
            transport,
            core: Arc::new(DeliveryCore::new(context)),
            presentation,
            telemetry,
            connected: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            target: Mutex::new(None),
            link: Mutex::new(None),
            retry: Mutex::new(RetryGate::new(config.reconnect_timeout)),
        });
        Self { inner }
    }

    /// Open a link to `address`, dropping any current link first.
    ///
    /// An open failure is reported like an asynchronous connect error.
    pub fn connect(&self, address: &str) {
        if self.is_connected() {
            debug!("Already connected, disconnecting first");
            self.disconnect();
        }

        self.inner
            .telemetry
            .info(format!("Connecting to address: [{}]...", address));
        info!("Connecting to {}", address);
        *lock(&self.inner.target) = Some(address.to_string());

        if let Err(e) = self.inner.open(address) {
            warn!("Failed to open transport to {}: {}", address, e);
            self.inner.on_error(e, ErrorOrigin::Connect);
        }
    }

    /// Tear the session down and stop reconnecting
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Send bytes over the link.
    ///
    /// Fails with [`SerialError::NotConnected`] when no link is up. Transport
    /// write failures are reported later as `IoError` events.
    pub fn write(&self, data: Bytes) -> Result<(), SerialError> {
        if !self.is_connected() {
            return Err(SerialError::NotConnected);
        }
        let link = lock(&self.inner.link).clone();
        match link {
            Some(link) => {
                link.write(data);
                Ok(())
            }
            None => Err(SerialError::NotConnected),
        }
    }

    /// Send text, reporting any failure through the `IoError` path
    pub fn send(&self, text: &str) {
        if let Err(e) = self.write(Bytes::copy_from_slice(text.as_bytes())) {
            self.inner
                .telemetry
                .info(format!("Failed to send string [{}]", text));
            self.inner.on_error(e, ErrorOrigin::Io);
        }
    }

    /// Attach `observer` and replay everything buffered. Must run on the
    /// delivery context.
    pub fn attach(&self, observer: &Arc<dyn Observer>) {
        self.inner.presentation.clear_indicator();
        let replayed = self.inner.core.attach(observer);
        info!("Observer attached, replayed {} events", replayed);
    }

    /// Detach the observer. Must run on the delivery context.
    pub fn detach(&self) {
        self.inner.core.detach();
        self.show_background_indicator();
        info!("Observer detached");
    }

    /// Replace the reconnect streak cap for later failures
    pub fn set_reconnect_timeout(&self, timeout: Duration) {
        lock(&self.inner.retry).set_timeout(timeout);
        debug!("Reconnect timeout set to {:?}", timeout);
    }

    /// Whether the link is considered up
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Address reconnects go to
    pub fn target_address(&self) -> Option<String> {
        lock(&self.inner.target).clone()
    }

    /// Snapshot of session and buffering state
    pub fn status(&self) -> SessionStatus {
        let (retrying, reconnect_timeout) = {
            let gate = lock(&self.inner.retry);
            (gate.window_start().is_some(), gate.timeout())
        };
        SessionStatus {
            connected: self.is_connected(),
            target: self.target_address(),
            retrying,
            reconnect_timeout,
            delivery: self.inner.core.stats(),
        }
    }

    /// Show the indicator when the link is up and nobody is watching
    pub(crate) fn show_background_indicator(&self) {
        if !self.is_connected() || self.inner.core.is_attached() {
            return;
        }
        let link = lock(&self.inner.link).clone();
        if let Some(link) = link {
            self.inner.presentation.show_indicator(link.name());
        }
    }

    pub(crate) fn telemetry(&self) -> &TelemetryNotifier {
        &self.inner.telemetry
    }
}

#[derive(Debug, Clone, Copy)]
enum ErrorOrigin {
    Connect,
    Io,
}

impl ErrorOrigin {
    fn label(self) -> &'static str {
        match self {
            ErrorOrigin::Connect => "SerialConnectError",
            ErrorOrigin::Io => "SerialIoError",
        }
    }

    fn event(self, error: SerialError) -> Event {
        match self {
            ErrorOrigin::Connect => Event::ConnectError(error),
            ErrorOrigin::Io => Event::IoError(error),
        }
    }
}

impl SessionInner {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Construct a link to `address`. The connected flag goes up as soon as
    /// the transport accepts the request, ahead of the link confirmation.
    fn open(&self, address: &str) -> Result<(), SerialError> {
        let listener: Arc<dyn TransportListener> = Arc::new(SessionListener {
            inner: self.this.clone(),
        });
        let link: Arc<dyn TransportHandle> = Arc::from(self.transport.connect(address, listener)?);
        *lock(&self.link) = Some(link);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn release_link(&self) {
        let link = lock(&self.link).take();
        if let Some(link) = link {
            link.disconnect();
        }
    }

    fn disconnect(&self) {
        self.telemetry.info("Disconnecting");
        info!("Disconnecting");

        // Lower the flag first so in-flight callbacks are dropped
        self.connected.store(false, Ordering::SeqCst);
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.presentation.clear_indicator();
        *lock(&self.target) = None;
        self.release_link();
        lock(&self.retry).reset();

        self.telemetry.event(TelemetryEventKind::Disconnected);
        self.presentation.session_ended();
    }

    /// Consult the gate and, if it allows, reopen the link to the target.
    fn retry_connection(&self) -> RetryDecision {
        let target = lock(&self.target).clone();
        let decision = lock(&self.retry).on_failure(Instant::now(), target.is_some());

        let address = match (decision, target) {
            (RetryDecision::Retry, Some(address)) => address,
            _ => {
                lock(&self.retry).reset();
                return RetryDecision::GiveUp;
            }
        };

        self.release_link();
        self.telemetry.info("Trying to reconnect");
        info!("Trying to reconnect to {}", address);

        match self.open(&address) {
            Ok(()) => RetryDecision::Retry,
            Err(e) => {
                warn!("Reconnect to {} could not open transport: {}", address, e);
                self.telemetry
                    .info(format!("Reconnect failed: [{}]", e));
                lock(&self.retry).reset();
                RetryDecision::GiveUp
            }
        }
    }

    fn on_error(&self, error: SerialError, origin: ErrorOrigin) {
        self.telemetry
            .info(format!("{} : [{}]", origin.label(), error));
        self.telemetry.event(TelemetryEventKind::Error);

        let decision = self.retry_connection();
        if decision == RetryDecision::Retry && error.is_transient_status() {
            debug!("Suppressing transient {} while reconnecting", error);
            return;
        }

        if self.is_connected() {
            // An error nobody receives is kept for the next observer and ends
            // the session
            let session = self.this.clone();
            let epoch = self.epoch.load(Ordering::SeqCst);
            self.core.dispatch_or_park(
                origin.event(error),
                Box::new(move || {
                    if let Some(inner) = session.upgrade() {
                        inner.stop_after_parked_error(epoch);
                    }
                }),
            );
        } else {
            debug!("Dropping {} from disconnected session", error);
        }

        if decision == RetryDecision::GiveUp
            && (self.is_connected() || lock(&self.target).is_some())
        {
            warn!("Giving up on reconnecting");
            self.disconnect();
        }
    }

    fn stop_after_parked_error(&self, epoch: u64) {
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Session restarted since the error was parked");
            return;
        }
        warn!("Error parked with no observer attached, stopping session");
        self.disconnect();
    }

    fn on_connect(&self) {
        self.telemetry.info("Connection successful");
        self.telemetry.event(TelemetryEventKind::Connected);
        lock(&self.retry).reset();

        if self.is_connected() {
            self.core.dispatch(Event::Connected);
        } else {
            debug!("Dropping connect confirmation from disconnected session");
        }
    }

    fn on_read(&self, data: Bytes) {
        if !self.is_connected() {
            debug!("Dropping {} bytes from disconnected session", data.len());
            return;
        }
        self.telemetry.data(&data);
        self.core.dispatch(Event::DataReceived(vec![data]));
    }
}

/// Listener handed to the transport. Holds the session weakly so a link never
/// keeps its own session alive.
struct SessionListener {
    inner: Weak<SessionInner>,
}

impl TransportListener for SessionListener {
    fn on_connect(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_connect();
        }
    }

    fn on_connect_error(&self, error: SerialError) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_error(error, ErrorOrigin::Connect);
        }
    }

    fn on_read(&self, data: Bytes) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_read(data);
        }
    }

    fn on_io_error(&self, error: SerialError) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_error(error, ErrorOrigin::Io);
        }
    }
}
