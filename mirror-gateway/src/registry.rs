//! Peer registry.
//!
//! [`Mirror`] is the single source of truth for "which other mirror gateways
//! are we replicating to?".  Every address it knows falls in exactly one
//! class:
//!
//! | Class         | Source                         | Broadcast target |
//! |---------------|--------------------------------|------------------|
//! | self          | `self_mirror_addrs`            | never            |
//! | local cluster | `gateway_addr`                 | always, once     |
//! | other peer    | gossip / declarative discovery | when connected   |
//!
//! Only other-peer addresses are ever stored; self and local-cluster
//! addresses are filtered on the way in.

use {
    crate::{
        client::CallExecutor,
        context::CallContext,
        error::{MirrorError, Result},
        target::PeerTarget,
    },
    async_trait::async_trait,
    dashmap::DashSet,
    log::{debug, info, warn},
    std::{collections::HashSet, sync::Arc},
};

/// The narrow topology contract both discovery mechanisms and the gateway
/// facade depend on.
#[async_trait]
pub trait Topology: Send + Sync {
    /// Dials every target that is not self, not the local cluster and not
    /// already live.  Every target is attempted; failures are joined.
    async fn connect(&self, ctx: &CallContext, targets: &[PeerTarget]) -> Result<()>;

    /// Closes and forgets every non-local-cluster target.
    async fn disconnect(&self, ctx: &CallContext, targets: &[PeerTarget]) -> Result<()>;

    fn is_connected(&self, addr: &str) -> bool;

    /// Calls `f` for each tracked other-peer address until it returns
    /// `false`.
    fn range_mirror_addrs(&self, f: &mut dyn FnMut(&str) -> bool);

    /// Self addresses plus every connected other peer.
    fn mirror_targets(&self) -> Result<Vec<PeerTarget>>;

    /// This node's own advertised addresses.
    fn self_targets(&self) -> Vec<PeerTarget>;
}

pub struct Mirror {
    /// Tracked other-peer addresses.
    addrs: DashSet<String>,
    self_targets: Vec<PeerTarget>,
    self_addrs: HashSet<String>,
    gateway_addrs: HashSet<String>,
    executor: Arc<dyn CallExecutor>,
}

impl Mirror {
    pub fn new(
        executor: Arc<dyn CallExecutor>,
        self_targets: Vec<PeerTarget>,
        gateway_addrs: impl IntoIterator<Item = String>,
    ) -> Self {
        let self_addrs = self_targets.iter().map(PeerTarget::addr).collect();
        Self {
            addrs: DashSet::new(),
            self_targets,
            self_addrs,
            gateway_addrs: gateway_addrs.into_iter().collect(),
            executor,
        }
    }

    pub fn is_self_addr(&self, addr: &str) -> bool {
        self.self_addrs.contains(addr)
    }

    pub fn is_gateway_addr(&self, addr: &str) -> bool {
        self.gateway_addrs.contains(addr)
    }

    /// Number of tracked other-peer addresses.
    pub fn peer_count(&self) -> usize {
        self.addrs.len()
    }

    /// Snapshot of the tracked addresses so callbacks never run under a
    /// shard lock.
    fn tracked(&self) -> Vec<String> {
        self.addrs.iter().map(|addr| addr.key().clone()).collect()
    }
}

#[async_trait]
impl Topology for Mirror {
    async fn connect(&self, ctx: &CallContext, targets: &[PeerTarget]) -> Result<()> {
        if targets.is_empty() {
            return Err(MirrorError::TargetNotFound);
        }

        let mut errs = Vec::new();
        for target in targets {
            let addr = target.addr();
            if self.is_self_addr(&addr) || self.is_gateway_addr(&addr) {
                continue;
            }
            if self.addrs.contains(&addr) && self.executor.is_connected(&addr) {
                continue;
            }
            match ctx.run(self.executor.connect(&addr)).await {
                Ok(()) => {
                    if self.addrs.insert(addr.clone()) {
                        info!("mirror peer {addr} connected");
                    } else {
                        debug!("mirror peer {addr} reconnected");
                    }
                }
                Err(err) => {
                    self.addrs.remove(&addr);
                    warn!("failed to connect mirror peer {addr}: {err}");
                    errs.push(err);
                }
            }
        }
        MirrorError::join(errs)
    }

    async fn disconnect(&self, ctx: &CallContext, targets: &[PeerTarget]) -> Result<()> {
        if targets.is_empty() {
            return Err(MirrorError::TargetNotFound);
        }

        let mut errs = Vec::new();
        for target in targets {
            let addr = target.addr();
            if self.is_gateway_addr(&addr) {
                continue;
            }
            if !self.addrs.contains(&addr) && !self.executor.is_connected(&addr) {
                continue;
            }
            match ctx.run(self.executor.disconnect(&addr)).await {
                Ok(()) | Err(MirrorError::ConnectionNotFound(_)) => {
                    info!("mirror peer {addr} disconnected");
                }
                Err(err) => {
                    warn!("failed to disconnect mirror peer {addr}: {err}");
                    errs.push(err);
                }
            }
            self.addrs.remove(&addr);
        }
        MirrorError::join(errs)
    }

    fn is_connected(&self, addr: &str) -> bool {
        self.executor.is_connected(addr)
    }

    fn range_mirror_addrs(&self, f: &mut dyn FnMut(&str) -> bool) {
        for addr in self.tracked() {
            if self.is_self_addr(&addr) || self.is_gateway_addr(&addr) {
                continue;
            }
            if !f(&addr) {
                break;
            }
        }
    }

    fn mirror_targets(&self) -> Result<Vec<PeerTarget>> {
        let mut seen = HashSet::new();
        let capacity = self.self_targets.len().saturating_add(self.addrs.len());
        let mut targets = Vec::with_capacity(capacity);
        for target in &self.self_targets {
            if seen.insert(target.addr()) {
                targets.push(target.clone());
            }
        }

        let mut peers = Vec::new();
        self.range_mirror_addrs(&mut |addr| {
            if self.executor.is_connected(addr) {
                peers.push(addr.to_owned());
            }
            true
        });
        peers.sort();
        for addr in peers {
            if seen.insert(addr.clone()) {
                targets.push(PeerTarget::from_addr(&addr)?);
            }
        }
        Ok(targets)
    }

    fn self_targets(&self) -> Vec<PeerTarget> {
        self.self_targets.clone()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
