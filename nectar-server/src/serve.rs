//! The accept loop.

use std::{
    cell::RefCell,
    fmt::Debug,
    future::Future,
    rc::Rc,
    task::{Poll, Waker},
};

use futures_channel::oneshot::Sender as OSender;
use monoio::io::stream::Stream;
use service_async::Service;
use tracing::{debug, error, info, warn};

/// Tracks in-flight connection tasks so graceful shutdown can wait
/// for them to finish.
#[derive(Clone, Default)]
pub struct ConnTracker {
    inner: Rc<RefCell<TrackerInner>>,
}

#[derive(Default)]
struct TrackerInner {
    active: usize,
    waiters: Vec<Waker>,
}

impl ConnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> usize {
        self.inner.borrow().active
    }

    pub fn track(&self) -> ConnGuard {
        self.inner.borrow_mut().active += 1;
        ConnGuard {
            inner: self.inner.clone(),
        }
    }

    /// Resolves once no tracked connection remains.
    pub fn wait_idle(&self) -> impl Future<Output = ()> + '_ {
        std::future::poll_fn(move |cx| {
            let mut inner = self.inner.borrow_mut();
            if inner.active == 0 {
                Poll::Ready(())
            } else {
                inner.waiters.push(cx.waker().clone());
                Poll::Pending
            }
        })
    }
}

pub struct ConnGuard {
    inner: Rc<RefCell<TrackerInner>>,
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        let waiters = {
            let mut inner = self.inner.borrow_mut();
            inner.active -= 1;
            if inner.active == 0 {
                std::mem::take(&mut inner.waiters)
            } else {
                Vec::new()
            }
        };
        for waker in waiters {
            waker.wake();
        }
    }
}

/// Accept connections until the stop sender's peer is cancelled, then
/// return. Every accepted connection runs as its own task, tracked by
/// `tracker`.
pub async fn serve<S, Svc, A, E>(
    mut listener: S,
    handler: Rc<Svc>,
    mut stop: OSender<()>,
    tracker: ConnTracker,
) where
    S: Stream<Item = Result<A, E>> + 'static,
    E: Debug,
    Svc: Service<A> + 'static,
    Svc::Error: Debug,
    A: 'static,
{
    let mut cancellation = stop.cancellation();
    loop {
        monoio::select! {
            _ = &mut cancellation => {
                info!("server is notified to stop");
                break;
            }
            accept_opt = listener.next() => {
                let accept = match accept_opt {
                    Some(accept) => accept,
                    None => {
                        info!("listener is closed, serve stopped");
                        return;
                    }
                };
                match accept {
                    Ok(accept) => {
                        let svc = handler.clone();
                        let guard = tracker.track();
                        monoio::spawn(async move {
                            let _guard = guard;
                            match svc.call(accept).await {
                                Ok(_) => {
                                    debug!("connection complete");
                                }
                                Err(e) => {
                                    error!("connection error: {e:?}");
                                }
                            }
                        });
                    }
                    Err(e) => warn!("accept connection failed: {e:?}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_waits_for_guards() {
        monoio::RuntimeBuilder::<monoio::LegacyDriver>::new()
            .build()
            .unwrap()
            .block_on(async {
                let tracker = ConnTracker::new();
                let guard = tracker.track();
                assert_eq!(tracker.active(), 1);

                let waiter_tracker = tracker.clone();
                let waited = monoio::spawn(async move {
                    waiter_tracker.wait_idle().await;
                    true
                });
                drop(guard);
                assert!(waited.await);
                assert_eq!(tracker.active(), 0);
            });
    }
}
