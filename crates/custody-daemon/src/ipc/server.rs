//! IPC server implementation

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::vault::Vault;

use super::connection::{IpcTransport, PlatformTransport};
use super::dispatcher::Dispatcher;

/// IPC server
pub struct IpcServer {
    /// Socket path
    socket_path: PathBuf,

    /// Shared dispatcher over the vault
    dispatcher: Arc<Dispatcher<Vault>>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(socket_path: PathBuf, vault: Arc<Vault>, max_pending_requests: usize) -> Self {
        Self {
            socket_path,
            dispatcher: Arc::new(Dispatcher::new(vault, max_pending_requests)),
        }
    }

    /// Serve connections until `shutdown` resolves, then remove the socket
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let transport = PlatformTransport::bind(&self.socket_path).await?;

        info!("IPC server listening on {:?}", self.socket_path);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = transport.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = ?peer, "Accepted connection");
                        let dispatcher = Arc::clone(&self.dispatcher);
                        tokio::spawn(async move {
                            if let Err(e) = dispatcher.run(stream, peer).await {
                                error!("Connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                },
            }
        }

        transport.cleanup().await?;
        info!("IPC server stopped");
        Ok(())
    }
}
