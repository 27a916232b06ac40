use std::{future::Future, sync::Arc};

use mailgate_common::{Signal, inbound::InboundDispatcher, internal, logging};
use mailgate_smtp::Listener;
use mailgate_webhook::{EventStore, MemoryEventStore, WebhookGateway};
use tokio::sync::broadcast;

use crate::{config::Config, processor::LoggingProcessor};

/// Runs the SMTP listener and the webhook gateway side by side, feeding both
/// into one inbound dispatcher.
pub struct Mailgate {
    config: Config,
    dispatcher: InboundDispatcher,
    store: Arc<dyn EventStore>,
}

impl Mailgate {
    /// A controller wired to the [`LoggingProcessor`] and a process-local
    /// event store.
    pub fn new(config: Config) -> Self {
        Self::with_pipeline(
            config,
            InboundDispatcher::new(Arc::new(LoggingProcessor)),
            Arc::new(MemoryEventStore::new()),
        )
    }

    pub fn with_pipeline(
        config: Config,
        dispatcher: InboundDispatcher,
        store: Arc<dyn EventStore>,
    ) -> Self {
        Self {
            config,
            dispatcher,
            store,
        }
    }

    /// Initialises logging and serves until SIGINT or SIGTERM.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init(&self.config.logging);
        self.serve_until(shutdown_signal()).await
    }

    /// Serves until `shutdown` resolves or either server fails, then waits
    /// for in-flight sessions to finish.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn serve_until(
        self,
        shutdown: impl Future<Output = anyhow::Result<()>>,
    ) -> anyhow::Result<()> {
        let (sender, _) = broadcast::channel(64);

        let listener = Listener::new(self.config.smtp, self.dispatcher.clone());
        let gateway = WebhookGateway::new(self.config.webhook, self.store, self.dispatcher);

        internal!(level = INFO, "Controller running");

        let smtp_shutdown = sender.subscribe();
        let webhook_shutdown = sender.subscribe();
        let servers = async move {
            tokio::try_join!(
                async { listener.serve(smtp_shutdown).await.map_err(anyhow::Error::from) },
                async { gateway.serve(webhook_shutdown).await.map_err(anyhow::Error::from) },
            )
        };
        tokio::pin!(servers);

        let ret = tokio::select! {
            r = &mut servers => r.map(|_| ()),
            r = shutdown => {
                internal!(level = INFO, "Shutting down...");
                let _ = sender.send(Signal::Shutdown);
                r.and(servers.await.map(|_| ()))
            }
        };

        internal!(level = INFO, "Controller stopped");

        ret
    }
}

/// Resolves on the first CTRL+C or SIGTERM.
pub async fn shutdown_signal() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r?;
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate signal received, shutting down");
        }
    };

    Ok(())
}
