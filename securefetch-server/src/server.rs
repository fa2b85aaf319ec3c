//! TLS listener and connection acceptance

use crate::config::ServerConfig;
use crate::dispatch::{Dispatcher, ServedRoot};
use crate::session::{Session, SessionContext};
use securefetch_core::transport::{accept, server_acceptor};
use securefetch_core::{Error, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// securefetch server
pub struct Server {
    config: ServerConfig,
    acceptor: TlsAcceptor,
    context: Arc<SessionContext>,
}

impl Server {
    /// Validate the configuration and prepare TLS and session state.
    ///
    /// Fails without a credential, a usable root directory, or a loadable
    /// certificate and key.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let credential = config.credential()?;
        let root = ServedRoot::new(&config.root_dir)?;
        let acceptor = server_acceptor(&config.cert_path, &config.key_path)?;

        let context = Arc::new(SessionContext {
            store: Arc::new(credential),
            dispatcher: Dispatcher::new(root, config.chunk_size, config.idle_timeout()),
            max_auth_attempts: config.max_auth_attempts,
            handshake_timeout: config.handshake_timeout(),
            idle_timeout: config.idle_timeout(),
        });

        Ok(Self {
            config,
            acceptor,
            context,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address and serve until ctrl-c
    pub async fn run(self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        let address = format!("{}:{}", self.config.listen_address, self.config.port);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| Error::Config(format!("cannot bind {}: {}", address, e)))?;
        tracing::info!(
            address = %listener.local_addr()?,
            root = %self.context.dispatcher.root().path().display(),
            "securefetch server listening"
        );
        Ok(listener)
    }

    /// Accept connections on `listener` until `shutdown` completes.
    ///
    /// Each connection runs on its own task; a failing session never stops
    /// the accept loop.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((tcp, peer)) => self.spawn_connection(tcp, peer),
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested, no longer accepting connections");
                    return Ok(());
                }
            }
        }
    }

    fn spawn_connection(&self, tcp: tokio::net::TcpStream, peer: SocketAddr) {
        let acceptor = self.acceptor.clone();
        let context = Arc::clone(&self.context);

        tokio::spawn(async move {
            tracing::debug!(%peer, "connection accepted");
            // one bound covers TLS accept and the credential exchange
            let deadline = tokio::time::Instant::now() + context.handshake_timeout;
            let tls = match tokio::time::timeout_at(deadline, accept(&acceptor, tcp)).await {
                Ok(Ok(tls)) => tls,
                Ok(Err(e)) => {
                    tracing::warn!(%peer, error = %e, "TLS handshake failed");
                    return;
                }
                Err(_) => {
                    tracing::warn!(%peer, "TLS handshake timed out");
                    return;
                }
            };

            let session = Session::new(tls, peer.to_string()).with_handshake_deadline(deadline);
            if let Err(e) = session.run(&context).await {
                tracing::debug!(%peer, error = %e, "session finished with error");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refuses_to_start_without_credential() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            root_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        assert!(matches!(Server::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_refuses_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            root_dir: dir.path().join("absent"),
            username: Some("alice".to_string()),
            password: Some("secret".to_string()),
            ..ServerConfig::default()
        };
        assert!(matches!(Server::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_refuses_missing_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            root_dir: dir.path().to_path_buf(),
            cert_path: dir.path().join("cert.pem"),
            key_path: dir.path().join("key.pem"),
            username: Some("alice".to_string()),
            password: Some("secret".to_string()),
            ..ServerConfig::default()
        };
        assert!(matches!(Server::new(config), Err(Error::Config(_))));
    }
}
