//! Observer fan-out for state and dispatch events.
//!
//! A [`Signal`] delivers each event to synchronous observers and to bounded
//! channel subscribers. Emission never happens while the registry lock is
//! held; callers release their locks before calling [`Signal::emit`].

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;

/// Handle returned by [`Signal::connect`], used to disconnect an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

type Observer<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct SignalInner<E> {
    observers: Vec<(ConnectionId, Observer<E>)>,
    channels: Vec<Sender<E>>,
    next_id: u64,
}

pub struct Signal<E> {
    inner: Mutex<SignalInner<E>>,
}

impl<E: Clone + Send + 'static> Signal<E> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SignalInner {
                observers: Vec::new(),
                channels: Vec::new(),
                next_id: 0,
            }),
        }
    }

    /// Register an observer called synchronously on the emitting thread.
    pub fn connect(&self, observer: impl Fn(&E) + Send + Sync + 'static) -> ConnectionId {
        let mut inner = self.inner.lock();
        let id = ConnectionId(inner.next_id);
        inner.next_id += 1;
        inner.observers.push((id, Arc::new(observer)));
        id
    }

    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.observers.len();
        inner.observers.retain(|(cid, _)| *cid != id);
        inner.observers.len() != before
    }

    /// Subscribe through a bounded channel. When the channel is full the
    /// event is dropped for that subscriber; dropped receivers are pruned.
    pub fn subscribe(&self, capacity: usize) -> Receiver<E> {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        self.inner.lock().channels.push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.observers.len() + inner.channels.len()
    }

    pub fn emit(&self, event: E) {
        let (observers, channels) = {
            let inner = self.inner.lock();
            let observers: Vec<Observer<E>> =
                inner.observers.iter().map(|(_, o)| Arc::clone(o)).collect();
            (observers, inner.channels.clone())
        };

        for observer in &observers {
            observer(&event);
        }

        let mut disconnected = Vec::new();
        for tx in &channels {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    log::warn!(target: "signal", "subscriber queue full, event dropped");
                }
                Err(TrySendError::Disconnected(_)) => disconnected.push(tx.clone()),
            }
        }

        if !disconnected.is_empty() {
            let mut inner = self.inner.lock();
            inner
                .channels
                .retain(|tx| !disconnected.iter().any(|dead| dead.same_channel(tx)));
        }
    }
}

impl<E: Clone + Send + 'static> Default for Signal<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for Signal<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Signal")
            .field("observers", &inner.observers.len())
            .field("channels", &inner.channels.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn observers_and_channels_both_receive() {
        let signal = Signal::<u32>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        signal.connect(move |v| {
            h.fetch_add(*v as usize, Ordering::SeqCst);
        });
        let rx = signal.subscribe(4);

        signal.emit(3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(rx.try_recv().ok(), Some(3));
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let signal = Signal::<u32>::new();
        let rx = signal.subscribe(1);
        signal.emit(1);
        signal.emit(2);
        assert_eq!(rx.try_recv().ok(), Some(1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let signal = Signal::<u32>::new();
        let rx = signal.subscribe(1);
        drop(rx);
        assert_eq!(signal.subscriber_count(), 1);
        signal.emit(1);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn disconnect_stops_delivery() {
        let signal = Signal::<u32>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let id = signal.connect(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(signal.disconnect(id));
        signal.emit(1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
