use link_transport::{Payload, PayloadKind};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Handler = Arc<dyn Fn(&Payload) + Send + Sync>;

/// Cookie identifying one registered handler; used to unregister it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct HandlerId(u64);

/// Per-device table of inbound message handlers keyed by [`PayloadKind`].
///
/// Handlers run on the delivery thread, in registration order, with the table
/// unlocked so they may register or unregister handlers themselves.
#[derive(Default)]
pub struct MessageHandlers {
    entries: Mutex<Vec<(HandlerId, PayloadKind, Handler)>>,
    next: AtomicU64,
}

impl MessageHandlers {
    pub fn register<F>(&self, kind: PayloadKind, handler: F) -> HandlerId
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, kind, Arc::new(handler)));
        id
    }

    /// Returns `false` if the handler was already gone.
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry, _, _)| *entry != id);
        entries.len() != before
    }

    /// Invoke every handler registered for the payload's kind; returns how many ran.
    pub fn dispatch(&self, payload: &Payload) -> usize {
        let kind = payload.kind();
        let matching: Vec<Handler> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, handler)| Arc::clone(handler))
            .collect();
        for handler in &matching {
            handler(payload);
        }
        matching.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
