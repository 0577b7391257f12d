//! Event dispatch: every handler gets its own bounded queue and worker
//! thread, so a slow handler blocks only the pipeline that feeds it and
//! events reach each handler in order.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender};
use tracing::{debug, warn};

/// Receiver of events on a dispatcher's worker thread
pub trait EventHandler<E>: Send + 'static {
    fn handle(&mut self, event: E);
}

impl<E, F> EventHandler<E> for F
where
    F: FnMut(E) + Send + 'static,
{
    fn handle(&mut self, event: E) {
        self(event)
    }
}

/// Handle for queueing events into a dispatcher
pub struct EventSender<E> {
    tx: Sender<E>,
}

impl<E> Clone for EventSender<E> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<E> EventSender<E> {
    /// Queue an event, blocking while the queue is full. Returns false once
    /// the worker has gone away.
    pub fn send(&self, event: E) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Queue several events in order
    pub fn send_all(&self, events: impl IntoIterator<Item = E>) -> bool {
        events.into_iter().all(|e| self.send(e))
    }
}

pub struct Dispatcher<E: Send + 'static> {
    name: String,
    tx: Option<Sender<E>>,
    worker: Option<JoinHandle<()>>,
}

impl<E: Send + 'static> Dispatcher<E> {
    /// Start the worker thread for `handler` with a queue of `depth` events
    pub fn spawn<H: EventHandler<E>>(name: &str, depth: usize, mut handler: H) -> std::io::Result<Self> {
        let (tx, rx) = bounded::<E>(depth.max(1));

        let worker = thread::Builder::new().name(name.to_string()).spawn(move || {
            // Drains what is queued, then ends when every sender is gone
            for event in rx.iter() {
                handler.handle(event);
            }
        })?;
        debug!("Dispatcher {} started (queue depth {})", name, depth);

        Ok(Self {
            name: name.to_string(),
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A handle for producers; the worker stays alive while any exists
    pub fn sender(&self) -> Option<EventSender<E>> {
        self.tx.as_ref().map(|tx| EventSender { tx: tx.clone() })
    }

    pub fn send(&self, event: E) -> bool {
        match &self.tx {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Events waiting in the queue
    pub fn pending(&self) -> usize {
        self.tx.as_ref().map_or(0, |tx| tx.len())
    }

    /// Close the queue and wait for the worker to handle what is left.
    /// Senders handed out earlier must be dropped first.
    pub fn shutdown(&mut self) {
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Event handler {} panicked", self.name);
            }
            debug!("Dispatcher {} stopped", self.name);
        }
    }
}

impl<E: Send + 'static> Drop for Dispatcher<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn test_events_arrive_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut dispatcher = Dispatcher::spawn("test-order", 4, move |n: u32| {
            sink.lock().unwrap().push(n);
        })
        .unwrap();

        for n in 0..100 {
            assert!(dispatcher.send(n));
        }
        dispatcher.shutdown();
        assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
        assert!(!dispatcher.send(1));
    }

    #[test]
    fn test_full_queue_blocks_sender() {
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let dispatcher = Dispatcher::spawn("test-block", 1, move |_: u8| {
            let _ = gate_rx.recv();
        })
        .unwrap();
        let sender = dispatcher.sender().unwrap();

        // First event is taken by the blocked worker, second fills the queue
        assert!(sender.send(1));
        while dispatcher.pending() > 0 {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(sender.send(2));

        let producer = thread::spawn(move || sender.send(3));
        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());

        for _ in 0..3 {
            gate_tx.send(()).unwrap();
        }
        assert!(producer.join().unwrap());
        drop(gate_tx);
        drop(dispatcher);
    }
}
