//! Cooperative cancellation broadcast.
//!
//! A [`Canceller`] fans a one-shot signal out to any number of
//! [`Waiter`]s on the same thread. Connection drivers select on a
//! waiter to notice graceful shutdown at their next suspension point.

use std::{
    cell::RefCell,
    future::Future,
    rc::{Rc, Weak},
    task::{Poll, Waker},
};

struct Shared {
    cancelled: bool,
    slots: Vec<Option<Waker>>,
    free: Vec<usize>,
}

#[derive(Clone)]
pub struct Canceller {
    shared: Rc<RefCell<Shared>>,
}

impl Default for Canceller {
    fn default() -> Self {
        Self::new()
    }
}

impl Canceller {
    pub fn new() -> Self {
        Self {
            shared: Rc::new(RefCell::new(Shared {
                cancelled: false,
                slots: Vec::new(),
                free: Vec::new(),
            })),
        }
    }

    pub fn waiter(&self) -> Waiter {
        Waiter {
            slot: None,
            shared: Rc::downgrade(&self.shared),
        }
    }

    pub fn cancel(&self) {
        let wakers = {
            let mut shared = self.shared.borrow_mut();
            if shared.cancelled {
                return;
            }
            shared.cancelled = true;
            std::mem::take(&mut shared.slots)
        };
        for waker in wakers.into_iter().flatten() {
            waker.wake();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.borrow().cancelled
    }
}

pub struct Waiter {
    slot: Option<usize>,
    shared: Weak<RefCell<Shared>>,
}

impl Clone for Waiter {
    fn clone(&self) -> Self {
        Self {
            slot: None,
            shared: self.shared.clone(),
        }
    }
}

impl Waiter {
    /// True once cancelled, or when the canceller is gone.
    pub fn cancelled(&self) -> bool {
        self.shared
            .upgrade()
            .map_or(true, |shared| shared.borrow().cancelled)
    }
}

impl Future for Waiter {
    type Output = ();

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Self::Output> {
        let shared = match self.shared.upgrade() {
            Some(shared) => shared,
            None => return Poll::Ready(()),
        };
        let mut shared = shared.borrow_mut();
        if shared.cancelled {
            return Poll::Ready(());
        }
        match self.slot {
            Some(idx) => {
                shared.slots[idx] = Some(cx.waker().clone());
            }
            None => {
                let idx = match shared.free.pop() {
                    Some(idx) => {
                        shared.slots[idx] = Some(cx.waker().clone());
                        idx
                    }
                    None => {
                        shared.slots.push(Some(cx.waker().clone()));
                        shared.slots.len() - 1
                    }
                };
                self.slot = Some(idx);
            }
        }
        Poll::Pending
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if let (Some(idx), Some(shared)) = (self.slot, self.shared.upgrade()) {
            let mut shared = shared.borrow_mut();
            if let Some(slot) = shared.slots.get_mut(idx) {
                *slot = None;
                shared.free.push(idx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run<F: Future>(f: F) -> F::Output {
        monoio::RuntimeBuilder::<monoio::LegacyDriver>::new()
            .build()
            .unwrap()
            .block_on(f)
    }

    #[test]
    fn waiters_resolve_after_cancel() {
        run(async {
            let canceller = Canceller::new();
            let waiter = canceller.waiter();
            let also = waiter.clone();

            let task = monoio::spawn(async move {
                waiter.await;
                1u8
            });
            canceller.cancel();
            assert_eq!(task.await, 1);
            assert!(also.cancelled());
            also.await;
        });
    }

    #[test]
    fn dropped_canceller_counts_as_cancelled() {
        run(async {
            let canceller = Canceller::new();
            let waiter = canceller.waiter();
            drop(canceller);
            assert!(waiter.cancelled());
            waiter.await;
        });
    }
}
