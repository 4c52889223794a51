//! Event delivery to the attached observer.
//!
//! Events come in on arbitrary producer contexts. While an observer is
//! attached they are handed off to the delivery context, which re-checks the
//! observer when the handoff runs. Two queues catch whatever cannot be
//! delivered:
//!
//! - queue A: handoffs that were in flight when the observer detached
//! - queue B: events dispatched while no observer was attached
//!
//! Attach replays A then B, which is original dispatch order because every
//! entry in A was posted before the detach that emptied the slot.

use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, warn};

use crate::coalescer::ReadCoalescer;
use crate::context::{DeliveryContext, Handoff};
use crate::event::{Event, Observer};
use crate::queue::EventQueue;

/// Observer reference and both queues, guarded as one unit
#[derive(Default)]
struct ObserverSlot {
    observer: Option<Weak<dyn Observer>>,
    /// Handoffs that ran after the observer went away
    in_flight_misses: EventQueue,
    /// Events dispatched with no observer attached
    unattached: EventQueue,
}

impl ObserverSlot {
    fn current(&self) -> Option<Arc<dyn Observer>> {
        self.observer.as_ref().and_then(Weak::upgrade)
    }
}

/// Runs once when an event is parked instead of delivered
pub type ParkHook = Box<dyn FnOnce() + Send + 'static>;

/// Where [`DeliveryCore::dispatch`] sent an event
enum Routed {
    Posted,
    Rejected(Handoff),
    Parked(Option<ParkHook>),
}

/// Snapshot of buffered work, for status reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Whether an observer is attached
    pub attached: bool,
    /// Entries in queue A
    pub in_flight_misses: usize,
    /// Entries in queue B
    pub unattached: usize,
    /// Read chunks waiting for a drain
    pub pending_read_chunks: usize,
}

/// Ordering and buffering core between the transport and the observer
pub struct DeliveryCore {
    slot: Mutex<ObserverSlot>,
    reads: ReadCoalescer,
    context: DeliveryContext,
}

impl DeliveryCore {
    /// Create a core that hands off onto `context`
    pub fn new(context: DeliveryContext) -> Self {
        Self {
            slot: Mutex::new(ObserverSlot::default()),
            reads: ReadCoalescer::new(),
            context,
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, ObserverSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `observer` and replay everything buffered while it was away.
    ///
    /// Must run on the delivery context. The core keeps only a weak reference;
    /// an observer dropped without detaching counts as detached.
    /// Returns the number of replayed events.
    pub fn attach(&self, observer: &Arc<dyn Observer>) -> usize {
        let (misses, unattached) = {
            let mut slot = self.lock_slot();
            if slot.current().is_some() {
                debug!("Replacing attached observer");
            }
            slot.observer = Some(Arc::downgrade(observer));
            (slot.in_flight_misses.take(), slot.unattached.take())
        };

        let replayed = misses.len() + unattached.len();
        if replayed > 0 {
            debug!(
                "Replaying {} buffered events ({} in flight, {} unattached)",
                replayed,
                misses.len(),
                unattached.len()
            );
        }
        for event in misses.into_iter().chain(unattached) {
            event.deliver_to(observer.as_ref());
        }
        replayed
    }

    /// Remove the observer. Must run on the delivery context.
    pub fn detach(&self) {
        let mut slot = self.lock_slot();
        if slot.observer.take().is_some() {
            debug!("Observer detached");
        }
    }

    /// Whether a live observer is attached
    pub fn is_attached(&self) -> bool {
        self.lock_slot().current().is_some()
    }

    /// Route an event towards the observer. Callable from any context.
    pub fn dispatch(self: &Arc<Self>, event: Event) {
        self.route(event, None);
    }

    /// Like [`dispatch`](Self::dispatch), but runs `on_park` if the event
    /// ends up in either queue instead of reaching an observer. The hook runs
    /// outside the slot lock: on the calling context when no observer is
    /// attached, on the delivery context when the observer left before the
    /// handoff ran.
    pub fn dispatch_or_park(self: &Arc<Self>, event: Event, on_park: ParkHook) {
        self.route(event, Some(on_park));
    }

    fn route(self: &Arc<Self>, event: Event, on_park: Option<ParkHook>) {
        let event = match event {
            Event::DataReceived(chunks) => return self.dispatch_read(chunks),
            other => other,
        };

        let outcome = {
            let mut slot = self.lock_slot();
            if slot.current().is_some() {
                debug!("Handing off {} event", event.kind());
                // Reads still waiting in the open burst go out ahead of this
                // event; their drain handoff will find the batch empty.
                let reads = self.reads.drain();
                let core = Arc::clone(self);
                let handoff: Handoff = Box::new(move || {
                    if !reads.is_empty() {
                        core.deliver_or_park(Event::DataReceived(reads), None);
                    }
                    core.deliver_or_park(event, on_park);
                });
                match self.context.post(handoff) {
                    Ok(()) => Routed::Posted,
                    Err(handoff) => Routed::Rejected(handoff),
                }
            } else {
                debug!("No observer, queueing {} event", event.kind());
                slot.unattached.push(event);
                Routed::Parked(on_park)
            }
        };

        match outcome {
            Routed::Posted => {}
            Routed::Rejected(handoff) => {
                warn!("Delivery context closed, running handoff inline");
                handoff();
            }
            Routed::Parked(Some(on_park)) => on_park(),
            Routed::Parked(None) => {}
        }
    }

    /// Read chunks join the pending batch; only the chunk that opens a burst
    /// schedules a drain.
    fn dispatch_read(self: &Arc<Self>, chunks: Vec<Bytes>) {
        if chunks.is_empty() {
            return;
        }

        {
            let mut slot = self.lock_slot();
            if slot.current().is_none() {
                slot.unattached.push(Event::DataReceived(chunks));
                return;
            }
        }

        let mut opened = false;
        for chunk in chunks {
            opened |= self.reads.push(chunk);
        }
        if !opened {
            return;
        }

        let core = Arc::clone(self);
        if let Err(handoff) = self.context.post(Box::new(move || core.drain_reads())) {
            warn!("Delivery context closed, running handoff inline");
            handoff();
        }
    }

    fn drain_reads(&self) {
        let batch = self.reads.drain();
        if !batch.is_empty() {
            self.deliver_or_park(Event::DataReceived(batch), None);
        }
    }

    /// Runs on the delivery context: deliver if the observer is still there,
    /// otherwise park the event in queue A and run the park hook.
    fn deliver_or_park(&self, event: Event, on_park: Option<ParkHook>) {
        let mut slot = self.lock_slot();
        let current = slot.current();
        match current {
            Some(observer) => {
                drop(slot);
                event.deliver_to(observer.as_ref());
            }
            None => {
                debug!("Observer gone before handoff ran, parking {} event", event.kind());
                slot.in_flight_misses.push(event);
                drop(slot);
                if let Some(on_park) = on_park {
                    on_park();
                }
            }
        }
    }

    /// Current buffering state
    pub fn stats(&self) -> DeliveryStats {
        let slot = self.lock_slot();
        DeliveryStats {
            attached: slot.current().is_some(),
            in_flight_misses: slot.in_flight_misses.len(),
            unattached: slot.unattached.len(),
            pending_read_chunks: self.reads.pending_chunks(),
        }
    }
}
