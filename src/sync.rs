use core::{cell::Cell, future::poll_fn, task::Poll};

use atomic_waker::AtomicWaker;
use embassy_sync::blocking_mutex;

use crate::DefaultRawMutex;

/// A single-slot rendezvous between an event producer and one waiting task.
///
/// The slot holds at most one pending value. Signalling twice before anyone
/// waits leaves a single pending wake with the latest value. Waiting consumes
/// the value. Callers clear the slot before issuing the operation that will
/// eventually signal it, so a stale signal from a previous cycle can never
/// satisfy a new wait.
pub struct Rendezvous<T: Copy> {
    slot: blocking_mutex::Mutex<DefaultRawMutex, Cell<Option<T>>>,
    waker: AtomicWaker,
}

impl<T: Copy> Rendezvous<T> {
    pub const fn new() -> Self {
        Self {
            slot: blocking_mutex::Mutex::new(Cell::new(None)),
            waker: AtomicWaker::new(),
        }
    }
    /// Drain a pending signal, if any, without blocking.
    pub fn clear(&self) {
        self.slot.lock(|slot| slot.set(None));
    }
    /// Deposit `value` and wake the waiter. A previously pending value is
    /// replaced.
    pub fn signal(&self, value: T) {
        self.slot.lock(|slot| slot.set(Some(value)));
        self.waker.wake();
    }
    /// Take a pending value without waiting.
    pub fn try_take(&self) -> Option<T> {
        self.slot.lock(|slot| slot.take())
    }
    /// Wait until a value is signalled and take it.
    pub async fn wait(&self) -> T {
        poll_fn(|cx| {
            if let Some(value) = self.slot.lock(|slot| slot.take()) {
                Poll::Ready(value)
            } else {
                self.waker.register(cx.waker());
                Poll::Pending
            }
        })
        .await
    }
}

impl<T: Copy> Default for Rendezvous<T> {
    fn default() -> Self {
        Self::new()
    }
}
