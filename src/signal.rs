//! Wake primitives shared by the handoff and control protocols.
//!
//! Every thread that blocks owns a [`Waiter`] (a parker). A [`Signal`] is a
//! flag bound to exactly one waiter: setting it unparks that waiter. The
//! shared [`Terminate`] flag unparks every waiter it has handed out, so each
//! blocking wait re-checks it on every wake without polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_utils::sync::{Parker, Unparker};
use parking_lot::Mutex;

use crate::error::Terminated;

/// Cooperative shutdown flag shared by every process thread.
#[derive(Clone, Default)]
pub struct Terminate {
    inner: Arc<TerminateInner>,
}

#[derive(Default)]
struct TerminateInner {
    flag: AtomicBool,
    wakers: Mutex<Vec<Unparker>>,
}

impl Terminate {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// Request shutdown and wake every waiter
    pub fn set(&self) {
        self.inner.flag.store(true, Ordering::Release);
        for waker in self.inner.wakers.lock().iter() {
            waker.unpark();
        }
    }

    /// Create a waiter that is woken by this flag
    pub fn waiter(&self) -> Waiter {
        let parker = Parker::new();
        self.inner.wakers.lock().push(parker.unparker().clone());
        Waiter {
            parker,
            terminate: self.clone(),
        }
    }
}

/// The blocking side of one thread. Not `Sync`: exactly one thread parks on it.
pub struct Waiter {
    parker: Parker,
    terminate: Terminate,
}

impl Waiter {
    /// A new signal that wakes this waiter when set
    pub fn signal(&self) -> Signal {
        Signal {
            inner: Arc::new(SignalInner {
                flag: AtomicBool::new(false),
                waker: self.parker.unparker().clone(),
            }),
        }
    }

    /// Handle for waking this waiter without a flag (a doorbell)
    pub fn unparker(&self) -> Unparker {
        self.parker.unparker().clone()
    }

    #[inline]
    pub fn terminated(&self) -> bool {
        self.terminate.is_set()
    }

    /// Block until `signal` is set. The flag is left set.
    pub fn wait(&self, signal: &Signal) -> Result<(), Terminated> {
        loop {
            if self.terminate.is_set() {
                return Err(Terminated);
            }
            if signal.is_set() {
                return Ok(());
            }
            self.parker.park();
        }
    }

    /// Park until woken or `timeout` elapses. Wakes may be spurious; callers
    /// re-check their own conditions.
    pub fn park_timeout(&self, timeout: Duration) -> Result<(), Terminated> {
        if self.terminate.is_set() {
            return Err(Terminated);
        }
        self.parker.park_timeout(timeout);
        if self.terminate.is_set() {
            return Err(Terminated);
        }
        Ok(())
    }
}

/// A settable flag bound to one [`Waiter`]. Cloning shares the flag.
#[derive(Clone)]
pub struct Signal {
    inner: Arc<SignalInner>,
}

struct SignalInner {
    flag: AtomicBool,
    waker: Unparker,
}

impl Signal {
    /// Set the flag and wake the bound waiter
    #[inline]
    pub fn set(&self) {
        self.inner.flag.store(true, Ordering::Release);
        self.inner.waker.unpark();
    }

    #[inline]
    pub fn clear(&self) {
        self.inner.flag.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// Clear the flag, returning whether it was set
    #[inline]
    pub fn take(&self) -> bool {
        self.inner.flag.swap(false, Ordering::AcqRel)
    }
}
