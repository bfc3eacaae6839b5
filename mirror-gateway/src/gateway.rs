//! Call routing on top of the executor and the peer registry.
//!
//! Three routing shapes are offered:
//!
//! - [`Gateway::do_local`]: one call to the local cluster.
//! - [`Gateway::broadcast`]: one call to the local cluster and to every
//!   connected mirror peer, with the forwarded marker attached.
//! - [`Gateway::do_multi`]: one call to each of a named subset of addresses.
//!
//! Fan-out calls run concurrently and never cancel each other; the returned
//! outcomes are only observed after every call has settled or the caller's
//! context fired.

use {
    crate::{
        client::{CallExecutor, MirrorClient},
        context::CallContext,
        error::{MirrorError, Result},
        registry::Topology,
    },
    futures::future::join_all,
    log::debug,
    std::{future::Future, sync::Arc},
    tonic::{metadata::AsciiMetadataValue, Status},
};

/// Outcome of one participant of a fan-out.
pub type PeerResult<T> = (String, Result<T>);

pub struct Gateway {
    executor: Arc<dyn CallExecutor>,
    topology: Arc<dyn Topology>,
    local_addr: String,
    forwarded_name: AsciiMetadataValue,
}

impl Gateway {
    pub fn new(
        executor: Arc<dyn CallExecutor>,
        topology: Arc<dyn Topology>,
        local_addr: String,
        forwarded_name: AsciiMetadataValue,
    ) -> Self {
        Self {
            executor,
            topology,
            local_addr,
            forwarded_name,
        }
    }

    /// Value of the `forwarded-for` marker this node stamps on broadcasts.
    pub fn forwarded_name(&self) -> &AsciiMetadataValue {
        &self.forwarded_name
    }

    pub fn topology(&self) -> &Arc<dyn Topology> {
        &self.topology
    }

    /// Connected mirror peers, excluding the local cluster.
    pub fn peer_addrs(&self) -> Vec<String> {
        let mut addrs = Vec::new();
        self.topology.range_mirror_addrs(&mut |addr| {
            if self.executor.is_connected(addr) {
                addrs.push(addr.to_owned());
            }
            true
        });
        addrs
    }

    /// The local cluster followed by every connected mirror peer.
    pub fn participants(&self) -> Vec<String> {
        let mut addrs = vec![self.local_addr.clone()];
        addrs.extend(
            self.peer_addrs()
                .into_iter()
                .filter(|addr| *addr != self.local_addr),
        );
        addrs
    }

    /// Runs `f` against the client for `addr` under `ctx`.
    pub async fn do_call<T, F, Fut>(&self, ctx: &CallContext, addr: &str, f: F) -> Result<T>
    where
        F: FnOnce(CallContext, Arc<dyn MirrorClient>) -> Fut,
        Fut: Future<Output = std::result::Result<T, Status>>,
    {
        let client = self
            .executor
            .client(addr)
            .ok_or_else(|| MirrorError::ConnectionNotFound(addr.to_owned()))?;
        ctx.run(f(ctx.clone(), client)).await
    }

    pub async fn do_local<T, F, Fut>(&self, ctx: &CallContext, f: F) -> Result<T>
    where
        F: FnOnce(CallContext, Arc<dyn MirrorClient>) -> Fut,
        Fut: Future<Output = std::result::Result<T, Status>>,
    {
        self.do_call(ctx, &self.local_addr, f).await
    }

    /// Runs `f` against each of `addrs` concurrently.
    pub async fn do_multi<T, F, Fut>(
        &self,
        ctx: &CallContext,
        addrs: &[String],
        f: F,
    ) -> Vec<PeerResult<T>>
    where
        F: Fn(CallContext, Arc<dyn MirrorClient>) -> Fut,
        Fut: Future<Output = std::result::Result<T, Status>>,
    {
        let f = &f;
        join_all(addrs.iter().map(|addr| async move {
            let res = self.do_call(ctx, addr, f).await;
            (addr.clone(), res)
        }))
        .await
    }

    /// Runs `f` against every participant with the forwarded marker set, so
    /// receiving gateways treat the call as a terminal hop.
    pub async fn broadcast<T, F, Fut>(&self, ctx: &CallContext, f: F) -> Vec<PeerResult<T>>
    where
        F: Fn(CallContext, Arc<dyn MirrorClient>) -> Fut,
        Fut: Future<Output = std::result::Result<T, Status>>,
    {
        let ctx = ctx.forwarded(&self.forwarded_name);
        let participants = self.participants();
        debug!("broadcasting to {} participants", participants.len());
        self.do_multi(&ctx, &participants, f).await
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
