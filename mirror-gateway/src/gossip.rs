//! Push-style peer discovery.
//!
//! On start the [`Discoverer`] registers this node's own addresses with every
//! connected peer.  Afterwards it advertises everything it knows on a fixed
//! interval; each peer answers with everything *it* knows, and the union of
//! the answers is connected in one pass.  Knowledge of a new mirror therefore
//! spreads transitively, one hop per round.
//!
//! Failures never stop the loop.  They are logged with the peer address and
//! forwarded to the error channel returned by [`Discoverer::start`].

use {
    crate::{
        config::MirrorConfig,
        context::CallContext,
        error::{MirrorError, Result},
        gateway::Gateway,
        payload::MirrorTargets,
        registry::Topology,
        target::PeerTarget,
    },
    log::{debug, info, warn},
    std::{collections::HashSet, fmt, sync::Arc, time::Duration},
    tokio::{
        sync::mpsc,
        time::{interval, MissedTickBehavior},
    },
    tokio_util::sync::CancellationToken,
    tonic::Code,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exchange {
    Register,
    Advertise,
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exchange::Register => f.write_str("Register"),
            Exchange::Advertise => f.write_str("Advertise"),
        }
    }
}

pub struct Discoverer {
    gateway: Arc<Gateway>,
    advertise_interval: Duration,
    error_channel_size: usize,
}

impl Discoverer {
    pub fn new(gateway: Arc<Gateway>, config: &MirrorConfig) -> Self {
        Self {
            gateway,
            advertise_interval: config.advertise_interval(),
            error_channel_size: config.error_channel_size.max(1),
        }
    }

    fn topology(&self) -> &Arc<dyn Topology> {
        self.gateway.topology()
    }

    /// Spawns the register-then-advertise loop.  The loop stops, and the
    /// returned channel closes, once `token` is cancelled.
    pub fn start(self: &Arc<Self>, token: CancellationToken) -> mpsc::Receiver<MirrorError> {
        let (tx, rx) = mpsc::channel(self.error_channel_size);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let ctx = CallContext::with_token(token.child_token());
            match this.register_self(&ctx).await {
                Ok(targets) => {
                    debug!("registered with mirror peers, {} targets", targets.len());
                }
                Err(MirrorError::TargetNotFound) | Err(MirrorError::ConnectionNotFound(_)) => {
                    info!("no mirror peers to register with yet");
                }
                Err(err) => report(&tx, err),
            }

            let mut ticker = interval(this.advertise_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let ctx = CallContext::with_token(token.child_token());
                if let Err(err) = this.advertise_once(&ctx).await {
                    report(&tx, err);
                }
            }
            info!("mirror advertise loop stopped");
        });
        rx
    }

    /// Registers the self targets with every connected peer and connects
    /// whatever they answer.
    pub async fn register_self(&self, ctx: &CallContext) -> Result<Vec<PeerTarget>> {
        let targets = self.topology().self_targets();
        let learned = self.exchange(ctx, Exchange::Register, targets).await?;
        self.topology().connect(ctx, &learned).await?;
        Ok(learned)
    }

    /// One gossip round: advertise the known targets and connect the merged
    /// answers.
    pub async fn advertise_once(&self, ctx: &CallContext) -> Result<Vec<PeerTarget>> {
        let targets = self.topology().mirror_targets()?;
        if targets.is_empty() {
            return Err(MirrorError::TargetNotFound);
        }
        let learned = self.exchange(ctx, Exchange::Advertise, targets).await?;
        self.topology().connect(ctx, &learned).await?;
        Ok(learned)
    }

    /// Sends `targets` to every connected peer and returns the union of the
    /// non-empty answers, deduplicated by address.
    async fn exchange(
        &self,
        ctx: &CallContext,
        kind: Exchange,
        targets: Vec<PeerTarget>,
    ) -> Result<Vec<PeerTarget>> {
        let peers = self.gateway.peer_addrs();
        if peers.is_empty() {
            return Err(MirrorError::TargetNotFound);
        }

        let req = MirrorTargets { targets };
        let req = &req;
        let results = self
            .gateway
            .do_multi(ctx, &peers, |ctx, client| async move {
                match kind {
                    Exchange::Register => client.register(&ctx, req).await,
                    Exchange::Advertise => client.advertise(&ctx, req).await,
                }
            })
            .await;

        let mut seen = HashSet::new();
        let mut learned = Vec::new();
        for (addr, res) in results {
            match res {
                Ok(reply) => {
                    for target in reply.targets {
                        if seen.insert(target.addr()) {
                            learned.push(target);
                        }
                    }
                }
                Err(err) if err.code() == Code::Unimplemented => {
                    warn!("mirror peer {addr} lacks {kind}, disconnecting");
                    self.disconnect_peer(ctx, &addr).await;
                }
                Err(err) => warn!("{kind} to mirror peer {addr} failed: {err}"),
            }
        }

        if learned.is_empty() {
            return Err(MirrorError::TargetNotFound);
        }
        debug!("{kind} learned {} mirror targets", learned.len());
        Ok(learned)
    }

    async fn disconnect_peer(&self, ctx: &CallContext, addr: &str) {
        let target = match PeerTarget::from_addr(addr) {
            Ok(target) => target,
            Err(err) => {
                warn!("cannot disconnect mirror peer: {err}");
                return;
            }
        };
        if let Err(err) = self.topology().disconnect(ctx, &[target]).await {
            warn!("failed to disconnect mirror peer {addr}: {err}");
        }
    }
}

/// Forwards `err` to the supervisor without stalling the loop.
pub(crate) fn report(tx: &mpsc::Sender<MirrorError>, err: MirrorError) {
    debug!("reporting discovery error: {err}");
    if let Err(mpsc::error::TrySendError::Full(err)) = tx.try_send(err) {
        warn!("discovery error channel full, dropping: {err}");
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
