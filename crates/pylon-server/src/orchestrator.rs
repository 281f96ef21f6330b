//! Server group orchestration.
//!
//! An [`Orchestrator`] runs a set of [`Server`]s as one unit:
//!
//! 1. startup hooks run;
//! 2. every server is bound. A server that fails to bind is logged and left
//!    out, but if none bind the run fails;
//! 3. each bound server is served on its own task;
//! 4. the first serve failure, a stop signal, or [`Runtime::shutdown`] shuts
//!    down every bound server, each exactly once;
//! 5. once every serve task has joined, shutdown hooks run and the first
//!    serve error is returned.
//!
//! SIGHUP rotates the registered log sinks and keeps serving; with no sinks
//! registered it requests a restart instead, which [`run_with_restart`]
//! honours by assembling and running a fresh orchestrator.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use pylon_core::{LogRotate, Runtime};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::error::{ServerError, ServerResult};
use crate::handle::Server;
use crate::lifecycle::Lifecycle;
use crate::shutdown::{listen_os_signals, ShutdownSignal, StopSignal};

/// Runs a group of servers with all-or-nothing semantics.
#[must_use]
pub struct Orchestrator {
    runtime: Runtime,
    servers: Vec<Arc<dyn Server>>,
    rotators: Vec<Arc<dyn LogRotate>>,
    signals: Option<mpsc::Receiver<StopSignal>>,
    lifecycle: Lifecycle,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.servers.iter().map(|s| s.name()).collect();
        f.debug_struct("Orchestrator")
            .field("profile", &self.runtime.profile())
            .field("servers", &names)
            .field("rotators", &self.rotators.len())
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator with no servers.
    pub fn new(runtime: Runtime) -> Self {
        Self {
            runtime,
            servers: Vec::new(),
            rotators: Vec::new(),
            signals: None,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Adds a server.
    pub fn server(mut self, server: Arc<dyn Server>) -> Self {
        self.servers.push(server);
        self
    }

    /// Adds several servers.
    pub fn servers(mut self, servers: impl IntoIterator<Item = Arc<dyn Server>>) -> Self {
        self.servers.extend(servers);
        self
    }

    /// Registers a log sink to rotate on SIGHUP.
    pub fn rotator(mut self, rotator: Arc<dyn LogRotate>) -> Self {
        self.rotators.push(rotator);
        self
    }

    /// Registers several log sinks.
    pub fn rotators(mut self, rotators: impl IntoIterator<Item = Arc<dyn LogRotate>>) -> Self {
        self.rotators.extend(rotators);
        self
    }

    /// Uses `signals` instead of the process's OS signals.
    pub fn signals(mut self, signals: mpsc::Receiver<StopSignal>) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Sets the startup and shutdown hooks.
    pub fn lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// The runtime this orchestrator reports to.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Number of registered servers.
    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Runs the group until every server has stopped.
    pub async fn run(self) -> ServerResult<()> {
        let Self {
            runtime,
            servers,
            rotators,
            signals,
            lifecycle,
        } = self;

        if servers.is_empty() {
            return Err(ServerError::NoServers);
        }
        let signals = match signals {
            Some(signals) => signals,
            None => listen_os_signals()?,
        };

        lifecycle.run_startup().await?;

        let result = match bind_all(&servers) {
            Ok(bound) if bound.is_empty() => Err(ServerError::NothingBound),
            Ok(bound) => serve_group(&runtime, bound, rotators, signals).await,
            Err(e) => Err(e),
        };

        if let Err(e) = lifecycle.run_shutdown().await {
            tracing::error!(error = %e, "shutdown hooks failed");
        }
        result
    }
}

/// Assembles and runs orchestrators until one finishes without a restart
/// request.
///
/// `assemble` is called once per cycle and should build everything afresh,
/// including the [`Runtime`], since a runtime can only be shut down once.
pub async fn run_with_restart<F, Fut, E>(mut assemble: F) -> Result<(), E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Orchestrator, E>>,
    E: From<ServerError>,
{
    loop {
        let orchestrator = assemble().await?;
        let runtime = orchestrator.runtime().clone();
        orchestrator.run().await?;

        if !runtime.restarting() {
            return Ok(());
        }
        tracing::info!(profile = %runtime.profile(), "restarting");
    }
}

fn bind_all(servers: &[Arc<dyn Server>]) -> ServerResult<Vec<Arc<dyn Server>>> {
    let mut bound: Vec<Arc<dyn Server>> = Vec::with_capacity(servers.len());

    for server in servers {
        match std::panic::catch_unwind(AssertUnwindSafe(|| server.bind())) {
            Ok(Ok(())) => bound.push(Arc::clone(server)),
            Ok(Err(e)) => {
                tracing::error!(server = %server.name(), error = %e, "bind failed");
            }
            Err(payload) => {
                let err = ServerError::from_panic(payload.as_ref());
                tracing::error!(server = %server.name(), error = %err, "bind panicked");
                for server in &bound {
                    shutdown_one(server.as_ref());
                }
                return Err(err);
            }
        }
    }

    Ok(bound)
}

async fn serve_group(
    runtime: &Runtime,
    bound: Vec<Arc<dyn Server>>,
    rotators: Vec<Arc<dyn LogRotate>>,
    signals: mpsc::Receiver<StopSignal>,
) -> ServerResult<()> {
    let group = ShutdownSignal::new();
    let bound = Arc::new(bound);

    let mut tasks = JoinSet::new();
    let mut names = HashMap::new();
    for server in bound.iter() {
        let serving = Arc::clone(server);
        let handle = tasks.spawn(async move { serving.serve().await });
        names.insert(handle.id(), server.name().to_string());
    }
    tracing::info!(count = bound.len(), "servers started");

    let fan_out_task = tokio::spawn(fan_out(group.clone(), runtime.clone(), Arc::clone(&bound)));
    let watcher = tokio::spawn(watch_signals(runtime.clone(), signals, rotators));

    let mut first_error = None;
    while let Some(joined) = tasks.join_next_with_id().await {
        let (id, result) = match joined {
            Ok((id, result)) => (id, result),
            Err(e) if e.is_panic() => {
                let id = e.id();
                (id, Err(ServerError::from_panic(e.into_panic().as_ref())))
            }
            Err(e) => (e.id(), Err(ServerError::Panic(e.to_string()))),
        };

        if let Err(e) = result {
            let name = names.get(&id).map_or("unknown", String::as_str);
            tracing::warn!(server = %name, error = %e, "server stopped with error");
            group.trigger();
            first_error.get_or_insert(e);
        }
    }

    // Servers stopped individually still get the group shutdown.
    group.trigger();
    if let Err(e) = fan_out_task.await {
        tracing::error!(error = %e, "shutdown fan-out failed");
    }
    watcher.abort();

    first_error.map_or(Ok(()), Err)
}

async fn fan_out(group: ShutdownSignal, runtime: Runtime, servers: Arc<Vec<Arc<dyn Server>>>) {
    tokio::select! {
        () = group.recv() => {}
        () = runtime.done() => {}
    }
    group.trigger();

    let shutdowns: Vec<_> = servers
        .iter()
        .map(|server| {
            let server = Arc::clone(server);
            tokio::spawn(async move { shutdown_one(server.as_ref()) })
        })
        .collect();

    for joined in futures_util::future::join_all(shutdowns).await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "server shutdown panicked");
        }
    }
}

fn shutdown_one(server: &dyn Server) {
    if let Err(e) = server.shutdown() {
        tracing::warn!(server = %server.name(), error = %e, "server shutdown failed");
    }
}

async fn watch_signals(
    runtime: Runtime,
    mut signals: mpsc::Receiver<StopSignal>,
    rotators: Vec<Arc<dyn LogRotate>>,
) {
    loop {
        let signal = tokio::select! {
            received = signals.recv() => match received {
                Some(signal) => signal,
                None => {
                    runtime.done().await;
                    StopSignal::Abort
                }
            },
            () = runtime.done() => StopSignal::Abort,
        };
        tracing::info!(signal = %signal, "stop signal");

        if signal == StopSignal::HangUp && !rotators.is_empty() {
            for rotator in &rotators {
                if let Err(e) = rotator.rotate() {
                    tracing::error!(error = %e, "log rotation failed");
                }
            }
            continue;
        }

        runtime.shutdown(signal == StopSignal::HangUp);
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::ListenAddr;
    use crate::shutdown::ShutdownReceiver;
    use pylon_middleware::BoxFuture;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn runtime() -> Runtime {
        Runtime::from_parts("test", PathBuf::from("/tmp"), "pylon", PathBuf::from("/tmp"))
    }

    struct BindPanics;

    impl Server for BindPanics {
        fn name(&self) -> &str {
            "panics"
        }
        fn bind(&self) -> ServerResult<()> {
            panic!("bind exploded")
        }
        fn alive(&self) -> bool {
            false
        }
        fn listen_address(&self) -> ListenAddr {
            ListenAddr::Empty
        }
        fn serve(&self) -> BoxFuture<'_, ServerResult<()>> {
            Box::pin(async { Ok(()) })
        }
        fn shutdown(&self) -> ServerResult<()> {
            Ok(())
        }
        fn shutdown_notified(&self) -> ShutdownReceiver {
            ShutdownSignal::new().recv()
        }
    }

    #[derive(Default)]
    struct Counting {
        shutdowns: AtomicUsize,
        signal: ShutdownSignal,
    }

    impl Server for Counting {
        fn name(&self) -> &str {
            "counting"
        }
        fn bind(&self) -> ServerResult<()> {
            Ok(())
        }
        fn alive(&self) -> bool {
            !self.signal.is_shutdown()
        }
        fn listen_address(&self) -> ListenAddr {
            ListenAddr::Empty
        }
        fn serve(&self) -> BoxFuture<'_, ServerResult<()>> {
            Box::pin(async move {
                self.signal.recv().await;
                Ok(())
            })
        }
        fn shutdown(&self) -> ServerResult<()> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            self.signal.trigger();
            Ok(())
        }
        fn shutdown_notified(&self) -> ShutdownReceiver {
            self.signal.recv()
        }
    }

    #[tokio::test]
    async fn test_no_servers() {
        let (_tx, rx) = mpsc::channel(1);
        let err = Orchestrator::new(runtime()).signals(rx).run().await.unwrap_err();
        assert!(matches!(err, ServerError::NoServers));
    }

    #[tokio::test]
    async fn test_bind_panic_is_recovered() {
        let bound = Arc::new(Counting::default());
        let (_tx, rx) = mpsc::channel(1);
        let err = Orchestrator::new(runtime())
            .server(bound.clone())
            .server(Arc::new(BindPanics))
            .signals(rx)
            .run()
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "recovered on panic: bind exploded");
        assert_eq!(bound.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_runtime_shutdown_stops_group() {
        let rt = runtime();
        let server = Arc::new(Counting::default());
        let (_tx, rx) = mpsc::channel(1);
        let orchestrator = Orchestrator::new(rt.clone()).server(server.clone()).signals(rx);

        let run = tokio::spawn(orchestrator.run());
        tokio::task::yield_now().await;
        rt.shutdown(false);

        run.await.unwrap().unwrap();
        assert_eq!(server.shutdowns.load(Ordering::SeqCst), 1);
        assert!(!rt.restarting());
    }

    #[tokio::test]
    async fn test_hangup_without_rotators_requests_restart() {
        let rt = runtime();
        let server = Arc::new(Counting::default());
        let (tx, rx) = mpsc::channel(1);
        tx.send(StopSignal::HangUp).await.unwrap();

        Orchestrator::new(rt.clone())
            .server(server.clone())
            .signals(rx)
            .run()
            .await
            .unwrap();

        assert!(rt.restarting());
        assert_eq!(server.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_startup_hook_failure_aborts_before_bind() {
        let server = Arc::new(Counting::default());
        let (_tx, rx) = mpsc::channel(1);
        let lifecycle = Lifecycle::new().on_startup("db", || async {
            Err(crate::lifecycle::LifecycleError::new("unreachable"))
        });

        let err = Orchestrator::new(runtime())
            .server(server.clone())
            .signals(rx)
            .lifecycle(lifecycle)
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, ServerError::Lifecycle(_)));
        assert_eq!(server.shutdowns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_with_restart_loops_until_plain_shutdown() {
        let cycles = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&cycles);

        let result: Result<(), ServerError> = run_with_restart(|| {
            let cycle = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                let (tx, rx) = mpsc::channel(1);
                let signal = if cycle == 0 {
                    StopSignal::HangUp
                } else {
                    StopSignal::Terminate
                };
                tx.send(signal).await.map_err(|_| ServerError::NoServers)?;
                Ok::<_, ServerError>(
                    Orchestrator::new(runtime())
                        .server(Arc::new(Counting::default()))
                        .signals(rx),
                )
            }
        })
        .await;

        result.unwrap();
        assert_eq!(cycles.load(Ordering::SeqCst), 2);
    }
}
