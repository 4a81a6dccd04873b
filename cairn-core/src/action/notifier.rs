use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

struct NotifierInner {
    name: String,
    fired: Mutex<bool>,
    cond: Condvar,
}

/// One-shot signal that a busy resource has become available again.
///
/// Handed to callers whose action came back `Unavailable`; waiting on it
/// never blocks the dispatcher.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

impl Notifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                name: name.into(),
                fired: Mutex::new(false),
                cond: Condvar::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn notify(&self) {
        let mut fired = self.inner.fired.lock();
        *fired = true;
        self.inner.cond.notify_all();
    }

    pub fn is_fired(&self) -> bool {
        *self.inner.fired.lock()
    }

    pub fn wait(&self) {
        let mut fired = self.inner.fired.lock();
        while !*fired {
            self.inner.cond.wait(&mut fired);
        }
    }

    /// Returns false if the timeout elapsed first.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut fired = self.inner.fired.lock();
        while !*fired {
            if self.inner.cond.wait_until(&mut fired, deadline).timed_out() {
                break;
            }
        }
        *fired
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("name", &self.inner.name)
            .field("fired", &self.is_fired())
            .finish()
    }
}
