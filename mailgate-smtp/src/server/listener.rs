use std::sync::Arc;

use futures_util::future::join_all;
use mailgate_common::{Signal, inbound::InboundDispatcher, internal, tracing};
use tokio::{net::TcpListener, sync::broadcast, task::JoinHandle};

use super::{
    ListenerConfig,
    session::{Session, SessionContext},
};
use crate::{
    connection::{Transport, load_acceptor},
    error::ServerError,
};

/// Accepts SMTP connections and runs one session task per client.
pub struct Listener {
    context: Arc<SessionContext>,
}

impl Listener {
    /// Builds the listener, loading the TLS material if any is configured.
    ///
    /// A certificate that cannot be loaded is logged and STARTTLS is simply
    /// not offered; the listener still serves plaintext.
    pub fn new(config: ListenerConfig, dispatcher: InboundDispatcher) -> Self {
        let acceptor = match config.tls.as_ref() {
            Some(files) => match load_acceptor(files) {
                Ok(acceptor) => Some(acceptor),
                Err(err) => {
                    tracing::warn!("STARTTLS disabled: {err}");
                    None
                }
            },
            None => {
                tracing::warn!("No TLS certificate configured, STARTTLS disabled");
                None
            }
        };

        Self {
            context: Arc::new(SessionContext {
                config,
                acceptor,
                dispatcher,
            }),
        }
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.context.config
    }

    /// Whether STARTTLS will be advertised.
    pub fn tls_enabled(&self) -> bool {
        self.context.acceptor.is_some()
    }

    /// Binds the configured socket and serves until shutdown.
    pub async fn serve(&self, shutdown: broadcast::Receiver<Signal>) -> Result<(), ServerError> {
        let address = self.context.config.socket;
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ServerError::Bind {
                address: address.to_string(),
                source,
            })?;

        self.serve_on(listener, shutdown).await
    }

    /// Serves on an already bound socket until a shutdown signal arrives,
    /// then waits for in-flight sessions to finish.
    #[tracing::instrument(name = "smtp", skip_all, fields(address = ?listener.local_addr().ok()))]
    pub async fn serve_on(
        &self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), ServerError> {
        internal!(level = INFO, "SMTP listener started");
        let mut sessions: Vec<JoinHandle<()>> = Vec::new();

        loop {
            tokio::select! {
                signal = shutdown.recv() => {
                    if matches!(signal, Ok(Signal::Shutdown) | Err(_)) {
                        internal!(level = INFO, "Received shutdown signal, finishing {} session(s)", sessions.len());
                        join_all(sessions).await;
                        break;
                    }
                }

                connection = listener.accept() => {
                    let (stream, peer) = match connection {
                        Ok(connection) => connection,
                        Err(err) => {
                            tracing::warn!("Failed to accept connection: {err}");
                            continue;
                        }
                    };

                    tracing::debug!(%peer, "Connection received");
                    sessions.retain(|session| !session.is_finished());

                    let session = Session::new(Transport::Plain(stream), peer, Arc::clone(&self.context));
                    let shutdown = shutdown.resubscribe();
                    sessions.push(tokio::spawn(async move {
                        if let Err(err) = session.run(shutdown).await {
                            internal!(level = ERROR, "Session error: {err}");
                        }
                    }));
                }
            }
        }

        Ok(())
    }
}
