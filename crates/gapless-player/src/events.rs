//! Decode notifications and listener registration.

use gapless_types::DecodeEventKind;

use crate::error::DecodeError;

/// Outcome of one decoder attempt, as seen by subscribers.
#[derive(Clone, Debug, PartialEq)]
pub enum DecodeEvent {
    /// A segment was appended to the queue.
    Succeeded,
    /// The accumulated bytes could not be decoded yet; they stay pending.
    Failed { reason: DecodeError },
}

impl DecodeEvent {
    pub fn kind(&self) -> DecodeEventKind {
        match self {
            DecodeEvent::Succeeded => DecodeEventKind::Success,
            DecodeEvent::Failed { .. } => DecodeEventKind::Error,
        }
    }
}

pub type Listener = Box<dyn FnMut(&DecodeEvent) + Send + 'static>;

/// Handle returned by [`EventListeners::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Registered decode listeners, notified in subscription order.
#[derive(Default)]
pub struct EventListeners {
    next_id: u64,
    listeners: Vec<(ListenerId, Listener)>,
}

impl EventListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Returns `true` if the listener was registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn emit(&mut self, event: &DecodeEvent) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(event);
        }
    }

    /// Drop every listener.
    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}

impl std::fmt::Debug for EventListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListeners")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<DecodeEvent>>>, Listener) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, Box::new(move |e: &DecodeEvent| sink.lock().unwrap().push(e.clone())))
    }

    #[test]
    fn emit_reaches_every_listener() {
        let mut listeners = EventListeners::new();
        let (a, la) = recorder();
        let (b, lb) = recorder();
        listeners.subscribe(la);
        listeners.subscribe(lb);

        listeners.emit(&DecodeEvent::Succeeded);

        assert_eq!(a.lock().unwrap().as_slice(), &[DecodeEvent::Succeeded]);
        assert_eq!(b.lock().unwrap().as_slice(), &[DecodeEvent::Succeeded]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut listeners = EventListeners::new();
        let (seen, l) = recorder();
        let id = listeners.subscribe(l);
        assert!(listeners.unsubscribe(id));
        assert!(!listeners.unsubscribe(id));

        listeners.emit(&DecodeEvent::Succeeded);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn clear_drops_all_listeners() {
        let mut listeners = EventListeners::new();
        let (seen, l) = recorder();
        listeners.subscribe(l);
        listeners.clear();
        assert!(listeners.is_empty());
        listeners.emit(&DecodeEvent::Failed {
            reason: DecodeError::Empty,
        });
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn event_kind_maps_variants() {
        assert_eq!(DecodeEvent::Succeeded.kind(), DecodeEventKind::Success);
        let failed = DecodeEvent::Failed {
            reason: DecodeError::NoTrack,
        };
        assert_eq!(failed.kind(), DecodeEventKind::Error);
    }
}
