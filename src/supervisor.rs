//! Supervisor: one session task per configured server

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::IngestConfig;
use crate::connection::{Connector, TcpConnector};
use crate::session::{Session, SessionStatus};

/// Starts and owns the per-server sessions.
pub struct Supervisor;

impl Supervisor {
    /// Spawn one TCP session per configured server.
    ///
    /// Must be called within a tokio runtime; use the multi-threaded runtime
    /// so sessions run in parallel.
    pub fn spawn(config: &IngestConfig) -> SupervisorHandle {
        Self::spawn_with(config, TcpConnector::new(config.session.io_timeout))
    }

    /// Spawn sessions using a custom connector.
    pub fn spawn_with<C>(config: &IngestConfig, connector: C) -> SupervisorHandle
    where
        C: Connector + Clone,
    {
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let mut monitors = Vec::with_capacity(config.servers.len());

        for target in &config.servers {
            let (session, status) = Session::new(
                target.clone(),
                config.schema.clone(),
                config.session.clone(),
                &config.output_dir,
                connector.clone(),
            );
            monitors.push((target.name.clone(), status));
            tasks.spawn(session.run(cancel.child_token()));
        }

        info!(
            servers = monitors.len(),
            output_dir = %config.output_dir.display(),
            "Supervisor started"
        );

        SupervisorHandle { tasks, monitors, cancel }
    }
}

/// Handle to running sessions. Dropping it stops them.
pub struct SupervisorHandle {
    tasks: JoinSet<()>,
    monitors: Vec<(String, watch::Receiver<SessionStatus>)>,
    cancel: CancellationToken,
}

impl SupervisorHandle {
    /// Names of the supervised servers, in configuration order.
    pub fn server_names(&self) -> impl Iterator<Item = &str> {
        self.monitors.iter().map(|(name, _)| name.as_str())
    }

    /// Latest status of one server's session.
    pub fn status(&self, server: &str) -> Option<SessionStatus> {
        self.receiver(server).map(|rx| rx.borrow().clone())
    }

    /// A receiver for one server's status changes.
    pub fn subscribe(&self, server: &str) -> Option<watch::Receiver<SessionStatus>> {
        self.receiver(server).cloned()
    }

    /// One server's status changes as a stream, starting with the current value.
    pub fn status_updates(&self, server: &str) -> Option<WatchStream<SessionStatus>> {
        self.subscribe(server).map(WatchStream::new)
    }

    /// Status changes of every server, tagged with the server name.
    pub fn all_status_updates(&self) -> BoxStream<'static, (String, SessionStatus)> {
        let streams = self.monitors.iter().map(|(name, rx)| {
            let name = name.clone();
            WatchStream::new(rx.clone()).map(move |status| (name.clone(), status)).boxed()
        });
        stream::select_all(streams).boxed()
    }

    /// Token that stops every session when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask every session to flush and stop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for every session to end. Sessions only end after [`shutdown`](Self::shutdown).
    pub async fn wait(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!("Session task failed: {}", e);
            }
        }
        info!("All sessions stopped");
    }

    fn receiver(&self, server: &str) -> Option<&watch::Receiver<SessionStatus>> {
        self.monitors.iter().find(|(name, _)| name == server).map(|(_, rx)| rx)
    }
}

impl Drop for SupervisorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
