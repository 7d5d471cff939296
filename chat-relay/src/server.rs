use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{info, warn};

use crate::{registry::SessionRegistry, session::Session};

/// Accepts connections and runs one [`Session`] task per client.
pub struct Server {
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
}

impl Server {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accepts until `shutdown` resolves, then closes every open session and
    /// waits for their tasks to finish.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, registry } = self;
        let closing = CancellationToken::new();
        let sessions = TaskTracker::new();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => break,
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &registry, &closing, &sessions);
                }
            }
        }

        let open_sessions = registry.len().await;
        info!(sessions = open_sessions, "server shutting down");
        drop(listener);
        closing.cancel();
        sessions.close();
        sessions.wait().await;

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(shutdown_signal(tokio::signal::ctrl_c())).await
    }
}

/// Resolves when `signal` fires. If the handler cannot be installed the relay
/// keeps serving instead of stopping straight after bind.
async fn shutdown_signal<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(err) = signal.await {
        warn!(error = ?err, "failed to install ctrl-c handler; running until killed");
        std::future::pending::<()>().await;
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    registry: &Arc<SessionRegistry>,
    closing: &CancellationToken,
    sessions: &TaskTracker,
) {
    match result {
        Ok((stream, remote)) => {
            let session = Session::accept(stream, Arc::clone(registry), closing);
            sessions.spawn(async move {
                if let Err(err) = session.run().await {
                    warn!(remote = %remote, error = ?err, "client connection closed with error");
                }
            });
        }
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}
