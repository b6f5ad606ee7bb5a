//! Thread-per-core worker spawning.
//!
//! The main thread holds a [`WorkerManager`]; each worker thread gets
//! its own runtime (and optionally a pinned core) and runs the future
//! the factory builds for it. Workers observe shutdown through the
//! stop sender handed to the factory: its cancellation fires when the
//! manager drops the matching receiver.

use std::{future::Future, thread::JoinHandle};

use futures_channel::oneshot::{channel, Receiver, Sender};
use monoio::utils::bind_to_cpu_set;
use nectar_core::config::RuntimeConfig;
use tracing::warn;

use crate::runtime::RuntimeWrapper;

pub struct WorkerManager {
    runtime_config: RuntimeConfig,
    workers: Vec<WorkerHandle>,
}

struct WorkerHandle {
    thread: JoinHandle<()>,
    // Dropping this receiver cancels the worker's stop sender, which
    // is how the worker notices shutdown.
    stop: Receiver<()>,
}

impl WorkerManager {
    pub fn new(runtime_config: RuntimeConfig) -> Self {
        Self {
            runtime_config,
            workers: Vec::new(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.runtime_config
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Start the configured number of worker threads. The factory runs
    /// on each worker thread, inside its runtime, and must drive its
    /// future until the stop sender reports cancellation.
    pub fn spawn_workers<FN, F>(&mut self, factory: FN)
    where
        FN: Fn(usize, Sender<()>) -> F + Clone + Send + 'static,
        F: Future<Output = ()>,
    {
        let cores = if self.runtime_config.cpu_affinity {
            std::thread::available_parallelism().ok()
        } else {
            None
        };

        for worker_id in 0..self.runtime_config.worker_threads {
            let (stop_tx, stop_rx) = channel();
            let factory = factory.clone();
            let runtime_config = self.runtime_config.clone();
            let thread = std::thread::Builder::new()
                .name(format!("nectar-worker-{worker_id}"))
                .spawn(move || {
                    // bind thread to cpu core
                    if let Some(cores) = cores {
                        let core = worker_id % cores;
                        if let Err(e) = bind_to_cpu_set([core]) {
                            warn!("bind thread {worker_id} to core {core} failed: {e}");
                        }
                    }
                    let mut runtime = RuntimeWrapper::new(&runtime_config);
                    runtime.block_on(factory(worker_id, stop_tx));
                })
                .expect("start worker thread failed");
            self.workers.push(WorkerHandle {
                thread,
                stop: stop_rx,
            });
        }
    }

    /// Signal every worker to stop and wait for the threads to exit.
    pub fn stop_and_join(&mut self) {
        for worker in self.workers.drain(..) {
            drop(worker.stop);
            if worker.thread.join().is_err() {
                warn!("worker thread panicked during shutdown");
            }
        }
    }

    /// Block until all workers exit on their own.
    pub fn join(&mut self) {
        for worker in self.workers.drain(..) {
            // Keep the stop receiver alive while joining so the worker
            // does not read it as a shutdown signal.
            let WorkerHandle { thread, stop } = worker;
            if thread.join().is_err() {
                warn!("worker thread panicked");
            }
            drop(stop);
        }
    }
}
