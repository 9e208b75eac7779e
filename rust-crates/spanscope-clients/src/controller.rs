use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;

use crate::cell::SubscriptionCell;
use crate::client::ClientRegistry;
use crate::gateway::ServerGateway;

/// Delay between restarts of a failed accept loop
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Handle on the running supervised task
struct Supervisor {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl Supervisor {
    /// Shutdown was signalled or the task already ended
    fn is_stopping(&self) -> bool {
        self.shutdown.is_none() || self.handle.is_finished()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        // Only reached without a completed join when the controller itself goes away.
        self.handle.abort();
    }
}

/// Starts and stops the span server
///
/// While running, a single supervised task keeps the gateway's accept loop alive
/// (retrying after failures) and feeds accepted connections into the registry.
/// The running flag is set when that task is spawned and cleared once it has been joined.
pub struct RunController<G: ServerGateway> {
    gateway: Arc<G>,
    registry: Arc<ClientRegistry<G::Span>>,
    running: SubscriptionCell<bool>,
    task: Mutex<Option<Supervisor>>,
    retry_delay: Duration,
}

impl<G: ServerGateway> RunController<G> {
    pub fn new(gateway: Arc<G>, registry: Arc<ClientRegistry<G::Span>>, retry_delay: Duration) -> Self {
        Self {
            gateway,
            registry,
            running: SubscriptionCell::new(false),
            task: Mutex::new(None),
            retry_delay,
        }
    }

    /// Reactive running flag
    pub fn running(&self) -> &SubscriptionCell<bool> {
        &self.running
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    pub fn registry(&self) -> &Arc<ClientRegistry<G::Span>> {
        &self.registry
    }

    /// Spawn the supervised task. No-op when already running.
    ///
    /// A task left behind by an interrupted [`stop`](Self::stop) is joined first.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if let Some(supervisor) = task.as_ref() {
            if !supervisor.is_stopping() {
                tracing::debug!("Span server already running");
                return;
            }
            tracing::debug!("Finishing interrupted shutdown before restart");
            self.finish(&mut task).await;
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(supervise(
            Arc::clone(&self.gateway),
            Arc::clone(&self.registry),
            self.retry_delay,
            shutdown_rx,
        ));

        *task = Some(Supervisor {
            shutdown: Some(shutdown_tx),
            handle,
        });
        self.running.set(true);

        tracing::info!("Span server started");
    }

    /// Stop the supervised task and wait until every client is released.
    /// No-op when already stopped.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        if task.is_none() {
            tracing::debug!("Span server already stopped");
            return;
        }

        self.finish(&mut task).await;
        tracing::info!("Span server stopped");
    }

    /// Signal the supervised task, wait for it and clear the running flag.
    ///
    /// If the caller is dropped mid-join the supervisor stays in `task` with its
    /// signal spent, and the next `start` or `stop` resumes the join.
    async fn finish(&self, task: &mut Option<Supervisor>) {
        let Some(supervisor) = task.as_mut() else {
            return;
        };

        if let Some(shutdown) = supervisor.shutdown.take() {
            let _ = shutdown.send(());
        }

        if let Err(e) = (&mut supervisor.handle).await {
            if e.is_panic() {
                tracing::error!("Supervised task panicked: {}", e);
            }
        }

        *task = None;
        self.running.set(false);
    }

    /// Start or stop depending on `running`
    pub async fn set_running(&self, running: bool) {
        if running {
            self.start().await;
        } else {
            self.stop().await;
        }
    }
}

/// Body of the supervised task: accept loop and intake side by side until shutdown
async fn supervise<G: ServerGateway>(
    gateway: Arc<G>,
    registry: Arc<ClientRegistry<G::Span>>,
    retry_delay: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut forwarders = JoinSet::new();

    tokio::select! {
        _ = &mut shutdown => {
            tracing::debug!("Shutdown requested");
        }
        _ = accept_forever(gateway.as_ref(), retry_delay) => {}
        _ = registry.intake(gateway.clients(), &mut forwarders) => {}
    }

    let released = forwarders.len();
    forwarders.shutdown().await;

    tracing::info!("Supervised task stopped, {} clients released", released);
}

/// Run the gateway forever, logging failures and waiting `retry_delay` between attempts
async fn accept_forever<G: ServerGateway>(gateway: &G, retry_delay: Duration) {
    loop {
        match gateway.run().await {
            Ok(()) => {
                tracing::warn!("Span server accept loop exited, restarting in {:?}", retry_delay);
            }
            Err(e) => {
                tracing::error!("Span server error: {}. Retrying in {:?}", e, retry_delay);
            }
        }
        sleep(retry_delay).await;
    }
}
