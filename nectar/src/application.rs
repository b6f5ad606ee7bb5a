//! Application composition and lifecycle.
//!
//! An [`Application`] owns the router, auxiliary services and startup
//! hooks, and sequences them: `before_server_starts` hooks run first,
//! services start concurrently, the listener binds, `on_server_running`
//! fires, then connections are accepted. Graceful shutdown stops
//! accepting, cancels in-flight work cooperatively, waits for open
//! connections, then for services.

use std::{
    net::SocketAddr,
    rc::Rc,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use futures_channel::oneshot;
use monoio::net::ListenerOpts;
use nectar_core::{
    config::{RuntimeConfig, ServerConfig},
    context::FromContextSource,
    listener::ListenerBuilder,
    AnyResult,
};
use nectar_server::{
    cancel::{Canceller, Waiter},
    http::{HttpDriver, HttpServerTimeout},
    runtime::RuntimeWrapper,
    serve::{serve, ConnTracker},
    workers::WorkerManager,
};
use tracing::{error, info};

use crate::router::Router;

/// A long-running auxiliary task owned by the application: runs until
/// the shutdown waiter resolves.
#[async_trait(?Send)]
pub trait AppService: 'static {
    async fn run(&self, shutdown: Waiter) -> AnyResult<()>;
}

type BeforeHook = Box<dyn FnOnce() -> LocalBoxFuture<'static, AnyResult<()>>>;
type RunningHook = Box<dyn FnOnce(SocketAddr)>;

/// Cross-thread handle that triggers graceful shutdown exactly once.
#[derive(Clone)]
pub struct ShutdownTrigger {
    tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        if let Some(tx) = self.tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }
}

pub struct Application<F, Ctx> {
    router_factory: F,
    _context: std::marker::PhantomData<fn() -> Ctx>,
    services: Vec<Rc<dyn AppService>>,
    before_server_starts: Vec<BeforeHook>,
    on_server_running: Vec<RunningHook>,
    server_config: ServerConfig,
    runtime_config: RuntimeConfig,
    shutdown_rx: oneshot::Receiver<()>,
    trigger: ShutdownTrigger,
}

impl<F, Ctx> Application<F, Ctx>
where
    F: Fn() -> Router<Ctx>,
    Ctx: FromContextSource,
{
    /// The factory builds the route tree; it runs once per worker, so
    /// handlers only need to be constructible there.
    pub fn new(router_factory: F) -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            router_factory,
            _context: std::marker::PhantomData,
            services: Vec::new(),
            before_server_starts: Vec::new(),
            on_server_running: Vec::new(),
            server_config: ServerConfig::default(),
            runtime_config: RuntimeConfig::default(),
            shutdown_rx: rx,
            trigger: ShutdownTrigger {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
        }
    }

    pub fn with_server_config(mut self, config: ServerConfig) -> Self {
        self.server_config = config;
        self
    }

    pub fn with_runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.runtime_config = config;
        self
    }

    pub fn add_service(mut self, service: impl AppService) -> Self {
        self.services.push(Rc::new(service));
        self
    }

    /// Runs sequentially before anything starts; a failure aborts
    /// startup.
    pub fn before_server_starts<Fut>(mut self, hook: impl FnOnce() -> Fut + 'static) -> Self
    where
        Fut: std::future::Future<Output = AnyResult<()>> + 'static,
    {
        self.before_server_starts
            .push(Box::new(move || Box::pin(hook())));
        self
    }

    /// Fires once the listener is bound, with the bound address.
    pub fn on_server_running(mut self, hook: impl FnOnce(SocketAddr) + 'static) -> Self {
        self.on_server_running.push(Box::new(hook));
        self
    }

    /// Handle for initiating graceful shutdown from anywhere.
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.trigger.clone()
    }

    /// Serve on the current runtime with a single accept loop. Returns
    /// after graceful shutdown completes.
    pub async fn serve(self) -> AnyResult<()> {
        let Application {
            router_factory,
            services,
            before_server_starts,
            mut on_server_running,
            server_config,
            runtime_config: _,
            mut shutdown_rx,
            trigger: _,
            _context,
        } = self;

        let router = router_factory();
        router.validate()?;
        let app = router.build();

        for hook in before_server_starts {
            hook().await?;
        }

        let canceller = Canceller::new();
        let mut service_tasks = Vec::with_capacity(services.len());
        for service in services {
            let waiter = canceller.waiter();
            service_tasks.push(monoio::spawn(async move {
                if let Err(e) = service.run(waiter).await {
                    error!("application service failed: {e:?}");
                }
            }));
        }

        let listener =
            ListenerBuilder::bind_tcp(server_config.address, ListenerOpts::default())?.build()?;
        let local_addr = listener.local_addr()?;
        info!("server listening on {local_addr}");
        for hook in on_server_running.drain(..) {
            hook(local_addr);
        }

        let driver = Rc::new(HttpDriver::new(
            app,
            HttpServerTimeout::from(&server_config),
            server_config.server_name.as_deref(),
            canceller.waiter(),
        ));
        let tracker = ConnTracker::new();
        let (stop_tx, stop_rx) = oneshot::channel();
        let accept_loop = monoio::spawn(serve(listener, driver, stop_tx, tracker.clone()));

        let _ = (&mut shutdown_rx).await;
        info!("graceful shutdown initiated");

        // Stop accepting, tell in-flight connections to wind down,
        // then wait for them and for the services.
        drop(stop_rx);
        canceller.cancel();
        accept_loop.await;
        tracker.wait_idle().await;
        for task in service_tasks {
            task.await;
        }
        info!("graceful shutdown complete");
        Ok(())
    }
}

impl<F, Ctx> Application<F, Ctx>
where
    F: Fn() -> Router<Ctx> + Clone + Send + Sync + 'static,
    Ctx: FromContextSource,
{
    /// Thread-per-core mode: spawn one runtime per configured worker,
    /// each with its own reuse-port listener, and block until shutdown.
    /// Services run on the calling thread's runtime.
    pub fn run(self) -> AnyResult<()> {
        let Application {
            router_factory,
            services,
            before_server_starts,
            mut on_server_running,
            server_config,
            runtime_config,
            mut shutdown_rx,
            trigger: _,
            _context,
        } = self;

        // Validate once up front; workers then build without checks.
        router_factory().validate()?;

        let mut main_runtime = RuntimeWrapper::new(&runtime_config);
        let (canceller, service_tasks) = main_runtime.block_on(async {
            for hook in before_server_starts {
                hook().await?;
            }
            let canceller = Canceller::new();
            let mut service_tasks = Vec::with_capacity(services.len());
            for service in services {
                let waiter = canceller.waiter();
                service_tasks.push(monoio::spawn(async move {
                    if let Err(e) = service.run(waiter).await {
                        error!("application service failed: {e:?}");
                    }
                }));
            }
            Ok::<_, nectar_core::AnyError>((canceller, service_tasks))
        })?;

        let address = server_config.address;
        let mut workers = WorkerManager::new(runtime_config);
        workers.spawn_workers(move |worker_id, stop_tx| {
            let router_factory = router_factory.clone();
            let server_config = server_config.clone();
            async move {
                let app = router_factory().build();
                let listener = match ListenerBuilder::bind_tcp_reuseport(address)
                    .and_then(|builder| builder.build())
                {
                    Ok(listener) => listener,
                    Err(e) => {
                        error!("worker {worker_id} failed to bind {address}: {e}");
                        return;
                    }
                };
                let canceller = Canceller::new();
                let tracker = ConnTracker::new();
                let driver = Rc::new(HttpDriver::new(
                    app,
                    HttpServerTimeout::from(&server_config),
                    server_config.server_name.as_deref(),
                    canceller.waiter(),
                ));
                serve(listener, driver, stop_tx, tracker.clone()).await;
                // Accepting stopped; drain in-flight connections.
                canceller.cancel();
                tracker.wait_idle().await;
            }
        });
        info!(
            "server listening on {address} with {} workers",
            workers.worker_count()
        );
        for hook in on_server_running.drain(..) {
            hook(address);
        }

        main_runtime.block_on(async {
            let _ = (&mut shutdown_rx).await;
        });
        info!("graceful shutdown initiated");
        workers.stop_and_join();
        main_runtime.block_on(async {
            canceller.cancel();
            for task in service_tasks {
                task.await;
            }
        });
        info!("graceful shutdown complete");
        Ok(())
    }
}
