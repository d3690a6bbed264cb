use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

type Callback = Arc<dyn Fn() + Send + Sync>;

/// Opaque handle returned by [`CallEvery::add`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct CallEveryCookie(u64);

struct Entry {
    callback: Callback,
    last: Instant,
    interval: Duration,
}

/// Runs registered callbacks at fixed intervals, driven by repeated [`run_once`](Self::run_once)
/// calls from a single timer thread.
///
/// Callbacks are invoked without the entry lock held, so a callback may add, change or
/// remove entries (including itself).
#[derive(Default)]
pub struct CallEvery {
    entries: Mutex<HashMap<CallEveryCookie, Entry>>,
    next: AtomicU64,
}

impl CallEvery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback`; its first invocation happens one `interval` from now.
    pub fn add<F>(&self, callback: F, interval: Duration) -> CallEveryCookie
    where
        F: Fn() + Send + Sync + 'static,
    {
        let cookie = CallEveryCookie(self.next.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().insert(
            cookie,
            Entry {
                callback: Arc::new(callback),
                last: Instant::now(),
                interval,
            },
        );
        cookie
    }

    pub fn change(&self, interval: Duration, cookie: CallEveryCookie) {
        if let Some(entry) = self.entries.lock().get_mut(&cookie) {
            entry.interval = interval;
        }
    }

    /// Restart the countdown of an entry.
    pub fn reset(&self, cookie: CallEveryCookie) {
        if let Some(entry) = self.entries.lock().get_mut(&cookie) {
            entry.last = Instant::now();
        }
    }

    pub fn remove(&self, cookie: CallEveryCookie) {
        self.entries.lock().remove(&cookie);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn run_once(&self) {
        let now = Instant::now();
        let due: Vec<Callback> = {
            let mut entries = self.entries.lock();
            entries
                .values_mut()
                .filter(|entry| now.duration_since(entry.last) >= entry.interval)
                .map(|entry| {
                    entry.last = now;
                    Arc::clone(&entry.callback)
                })
                .collect()
        };
        for callback in due {
            callback();
        }
    }
}
