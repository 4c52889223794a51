//! The delivery context: a single serialized executor for handoffs.
//!
//! Producers post closures through a cloneable [`DeliveryContext`]; exactly one
//! [`DeliveryLoop`] runs them in posting order. Observer attach/detach must be
//! executed on the same loop so they serialize with handoffs.

use tokio::sync::mpsc;
use tracing::{debug, info};

/// Work posted onto the delivery context
pub type Handoff = Box<dyn FnOnce() + Send + 'static>;

/// Posting side of the delivery context
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    tx: mpsc::UnboundedSender<Handoff>,
}

/// Executing side of the delivery context
#[derive(Debug)]
pub struct DeliveryLoop {
    rx: mpsc::UnboundedReceiver<Handoff>,
}

/// Create a connected context/loop pair
pub fn delivery_context() -> (DeliveryContext, DeliveryLoop) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DeliveryContext { tx }, DeliveryLoop { rx })
}

impl DeliveryContext {
    /// Schedule `handoff` to run on the loop.
    ///
    /// Never blocks. If the loop is gone the handoff is handed back so the
    /// caller can decide what to do with it.
    pub fn post(&self, handoff: Handoff) -> Result<(), Handoff> {
        self.tx.send(handoff).map_err(|e| e.0)
    }
}

impl DeliveryLoop {
    /// Run every handoff that is already queued, without waiting.
    /// Returns the number executed.
    pub fn run_pending(&mut self) -> usize {
        let mut executed = 0;
        while let Ok(handoff) = self.rx.try_recv() {
            handoff();
            executed += 1;
        }
        if executed > 0 {
            debug!("Ran {} pending handoffs", executed);
        }
        executed
    }

    /// Wait for and run the next handoff. Returns false once every
    /// [`DeliveryContext`] has been dropped.
    pub async fn run_next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(handoff) => {
                handoff();
                true
            }
            None => false,
        }
    }

    /// Run handoffs until every [`DeliveryContext`] has been dropped
    pub async fn run(mut self) {
        info!("Delivery loop started");
        while self.run_next().await {}
        info!("Delivery loop ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_handoffs_run_in_post_order() {
        let (ctx, mut delivery) = delivery_context();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let seen = seen.clone();
            assert!(ctx.post(Box::new(move || seen.lock().unwrap().push(i))).is_ok());
        }
        assert!(seen.lock().unwrap().is_empty());

        assert_eq!(delivery.run_pending(), 5);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(delivery.run_pending(), 0);
    }

    #[test]
    fn test_post_after_loop_dropped_returns_handoff() {
        let (ctx, delivery) = delivery_context();
        drop(delivery);

        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        let rejected = ctx
            .post(Box::new(move || *flag.lock().unwrap() = true))
            .unwrap_err();
        rejected();
        assert!(*ran.lock().unwrap());
    }

    #[tokio::test]
    async fn test_run_ends_when_contexts_dropped() {
        let (ctx, delivery) = delivery_context();
        let seen = Arc::new(Mutex::new(0));

        let runner = tokio::spawn(delivery.run());
        for _ in 0..3 {
            let seen = seen.clone();
            ctx.post(Box::new(move || *seen.lock().unwrap() += 1)).ok();
        }
        drop(ctx);

        runner.await.unwrap();
        assert_eq!(*seen.lock().unwrap(), 3);
    }
}
