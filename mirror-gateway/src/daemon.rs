//! Wires the mirror gateway together and runs its background loops.

use {
    crate::{
        client::CallExecutor,
        config::MirrorConfig,
        discovery::{Discovery, TargetStore},
        error::{MirrorError, Result},
        gateway::Gateway,
        gossip::Discoverer,
        handler::MirrorHandler,
        registry::Mirror,
    },
    futures::{stream::BoxStream, StreamExt},
    log::{error, info},
    std::sync::Arc,
    tokio::sync::mpsc,
    tokio_stream::wrappers::ReceiverStream,
    tokio_util::sync::CancellationToken,
};

pub struct MirrorDaemon {
    config: MirrorConfig,
    executor: Arc<dyn CallExecutor>,
    mirror: Arc<Mirror>,
    handler: Arc<MirrorHandler>,
    discoverer: Arc<Discoverer>,
    discovery: Option<Arc<Discovery>>,
}

impl MirrorDaemon {
    /// Builds every component from `config`.  Declarative discovery only runs
    /// when a `store` is given.
    pub fn new(
        config: MirrorConfig,
        executor: Arc<dyn CallExecutor>,
        store: Option<Arc<dyn TargetStore>>,
    ) -> Result<Self> {
        config.validate()?;
        let local_addr = config.gateway_target()?.addr();
        let mirror = Arc::new(Mirror::new(
            executor.clone(),
            config.self_targets()?,
            [local_addr.clone()],
        ));
        let gateway = Arc::new(Gateway::new(
            executor.clone(),
            mirror.clone(),
            local_addr,
            config.forwarded_name()?,
        ));
        let handler = Arc::new(MirrorHandler::new(gateway.clone(), &config));
        let discoverer = Arc::new(Discoverer::new(gateway, &config));
        let discovery = store
            .map(|store| Discovery::new(mirror.clone(), store, &config))
            .map(Arc::new);

        Ok(Self {
            config,
            executor,
            mirror,
            handler,
            discoverer,
            discovery,
        })
    }

    pub fn mirror(&self) -> &Arc<Mirror> {
        &self.mirror
    }

    /// Entry point for inbound RPCs.
    pub fn handler(&self) -> &Arc<MirrorHandler> {
        &self.handler
    }

    /// Receives resource snapshots, if declarative discovery is enabled.
    pub fn discovery(&self) -> Option<&Arc<Discovery>> {
        self.discovery.as_ref()
    }

    /// Dials the local cluster and starts the discovery loops.
    ///
    /// Every loop error is logged and forwarded to the returned channel, which
    /// closes once all loops have stopped after `token` is cancelled.
    pub async fn start(&self, token: CancellationToken) -> Result<mpsc::Receiver<MirrorError>> {
        let local_addr = self.config.gateway_target()?.addr();
        self.executor.connect(&local_addr).await?;
        info!("connected to local cluster at {local_addr}");

        let mut streams: Vec<BoxStream<'static, MirrorError>> = Vec::with_capacity(2);
        let gossip = self.discoverer.start(token.clone());
        streams.push(ReceiverStream::new(gossip).boxed());
        if let Some(discovery) = &self.discovery {
            let declared = discovery.start(token.clone());
            streams.push(ReceiverStream::new(declared).boxed());
        }

        let (tx, rx) = mpsc::channel(self.config.error_channel_size.max(1));
        let mut errors = futures::stream::select_all(streams);
        tokio::spawn(async move {
            while let Some(err) = errors.next().await {
                error!("mirror gateway background error: {err}");
                if tx.send(err).await.is_err() {
                    break;
                }
            }
            info!("mirror gateway background loops stopped");
        });
        Ok(rx)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
