//! Declarative peer discovery.
//!
//! Operators declare mirror targets as cluster resources.  The resource
//! watch (outside this crate) hands every fresh snapshot to
//! [`Discovery::on_reconcile`]; a periodic sync then
//!
//! 1. diffs the snapshot against the one seen on the previous tick and
//!    connects created targets, disconnects deleted ones and re-dials moved
//!    ones;
//! 2. walks the registry in reverse: declared targets whose connection state
//!    disagrees with their phase get their phase corrected, and peers
//!    learned by gossip that nobody declared get a resource synthesized for
//!    them.
//!
//! ```text
//!  resource watch ──► on_reconcile ──► snapshot (ArcSwap)
//!                                          │ every sync tick
//!                                          ▼
//!              diff(prev, cur) ──► connect / disconnect ──► Topology
//!                                          │
//!              reverse pass    ──► update_phase / create ──► TargetStore
//! ```

use {
    crate::{
        config::MirrorConfig,
        context::CallContext,
        error::{MirrorError, Result},
        gossip::report,
        registry::Topology,
        target::PeerTarget,
    },
    arc_swap::ArcSwap,
    async_trait::async_trait,
    log::{debug, info, warn},
    siphasher::sip::SipHasher,
    std::{
        collections::{HashMap, HashSet},
        fmt,
        hash::Hasher,
        sync::Arc,
        time::Duration,
    },
    tokio::{
        sync::mpsc,
        time::{interval, MissedTickBehavior},
    },
    tokio_util::sync::CancellationToken,
};

/// Name prefix of synthesized mirror target resources.
pub const RESOURCE_PREFIX: &str = "mirror-target";

/// Connection phase recorded on a mirror target resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TargetPhase {
    #[default]
    Unknown,
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for TargetPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            TargetPhase::Unknown => "Unknown",
            TargetPhase::Connecting => "Connecting",
            TargetPhase::Connected => "Connected",
            TargetPhase::Disconnected => "Disconnected",
        };
        f.write_str(phase)
    }
}

/// A declared mirror target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorTargetResource {
    pub name: String,
    pub namespace: String,
    pub labels: HashMap<String, String>,
    pub colocation: String,
    pub target: PeerTarget,
    pub phase: TargetPhase,
}

/// Write side of the resource store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn create(&self, resource: MirrorTargetResource) -> Result<()>;

    async fn update_phase(&self, name: &str, phase: TargetPhase) -> Result<()>;
}

pub struct Discovery {
    topology: Arc<dyn Topology>,
    store: Arc<dyn TargetStore>,
    targets: ArcSwap<HashMap<String, MirrorTargetResource>>,
    self_addrs: String,
    namespace: String,
    labels: HashMap<String, String>,
    colocation: String,
    interval: Duration,
    error_channel_size: usize,
}

impl Discovery {
    pub fn new(
        topology: Arc<dyn Topology>,
        store: Arc<dyn TargetStore>,
        config: &MirrorConfig,
    ) -> Self {
        Self {
            topology,
            store,
            targets: ArcSwap::from_pointee(HashMap::new()),
            self_addrs: config.self_mirror_addrs.join(","),
            namespace: config.namespace.clone(),
            labels: config.labels.clone(),
            colocation: config.colocation.clone(),
            interval: config.discovery_interval(),
            error_channel_size: config.error_channel_size.max(1),
        }
    }

    /// Replaces the declared snapshot.  Called by the resource watch.
    pub fn on_reconcile(&self, targets: HashMap<String, MirrorTargetResource>) {
        debug!("received {} mirror target resources", targets.len());
        self.targets.store(Arc::new(targets));
    }

    /// The current declared snapshot.
    pub fn targets(&self) -> Arc<HashMap<String, MirrorTargetResource>> {
        self.targets.load_full()
    }

    /// Spawns the sync loop.  The loop stops, and the returned channel
    /// closes, once `token` is cancelled.
    pub fn start(self: &Arc<Self>, token: CancellationToken) -> mpsc::Receiver<MirrorError> {
        let (tx, rx) = mpsc::channel(self.error_channel_size);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut prev = Arc::new(HashMap::new());
            let mut ticker = interval(this.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let ctx = CallContext::with_token(token.child_token());
                let cur = this.targets();
                if let Err(err) = this.sync(&ctx, &prev, &cur).await {
                    report(&tx, err);
                }
                prev = cur;
            }
            info!("mirror discovery loop stopped");
        });
        rx
    }

    /// One reconcile pass from `prev` to `cur`.  All errors of the pass are
    /// joined.
    pub async fn sync(
        &self,
        ctx: &CallContext,
        prev: &HashMap<String, MirrorTargetResource>,
        cur: &HashMap<String, MirrorTargetResource>,
    ) -> Result<()> {
        let mut errs = Vec::new();
        let diff = Diff::between(prev, cur);
        let touched: HashSet<String> = diff
            .created
            .iter()
            .copied()
            .chain(diff.updated.iter().map(|(_, res)| *res))
            .map(|res| res.name.clone())
            .collect();
        if !diff.is_empty() {
            debug!(
                "mirror target diff: {} created, {} deleted, {} updated",
                diff.created.len(),
                diff.deleted.len(),
                diff.updated.len()
            );
        }

        for res in diff.created {
            self.connect_target(ctx, res, &mut errs).await;
        }
        for res in diff.deleted {
            self.disconnect_target(ctx, res, &mut errs).await;
        }
        for (old, new) in diff.updated {
            self.update_target(ctx, old, new, &mut errs).await;
        }

        let mut reverse = self.reverse_pass(ctx, cur, &touched).await;
        errs.append(&mut reverse);
        MirrorError::join(errs)
    }

    async fn connect_target(
        &self,
        ctx: &CallContext,
        res: &MirrorTargetResource,
        errs: &mut Vec<MirrorError>,
    ) {
        let phase = match self.topology.connect(ctx, &[res.target.clone()]).await {
            Ok(()) => TargetPhase::Connected,
            Err(err) => {
                warn!("failed to connect mirror target {}: {err}", res.name);
                errs.push(err);
                TargetPhase::Disconnected
            }
        };
        self.set_phase(&res.name, phase, errs).await;
    }

    async fn disconnect_target(
        &self,
        ctx: &CallContext,
        res: &MirrorTargetResource,
        errs: &mut Vec<MirrorError>,
    ) {
        let phase = match self.topology.disconnect(ctx, &[res.target.clone()]).await {
            Ok(()) => TargetPhase::Disconnected,
            Err(err) => {
                warn!("failed to disconnect mirror target {}: {err}", res.name);
                errs.push(err);
                TargetPhase::Unknown
            }
        };
        self.set_phase(&res.name, phase, errs).await;
    }

    async fn update_target(
        &self,
        ctx: &CallContext,
        old: &MirrorTargetResource,
        new: &MirrorTargetResource,
        errs: &mut Vec<MirrorError>,
    ) {
        if let Err(err) = self.topology.disconnect(ctx, &[old.target.clone()]).await {
            warn!("failed to move mirror target {}: {err}", old.name);
            errs.push(err);
            self.set_phase(&new.name, TargetPhase::Unknown, errs).await;
            return;
        }
        self.connect_target(ctx, new, errs).await;
    }

    async fn set_phase(&self, name: &str, phase: TargetPhase, errs: &mut Vec<MirrorError>) {
        if let Err(err) = self.store.update_phase(name, phase).await {
            warn!("failed to set mirror target {name} to {phase}: {err}");
            errs.push(err);
        }
    }

    /// Corrects phases that disagree with the registry and synthesizes
    /// resources for connected peers nobody declared.  Resources whose phase
    /// was already written this tick are left alone.
    async fn reverse_pass(
        &self,
        ctx: &CallContext,
        cur: &HashMap<String, MirrorTargetResource>,
        touched: &HashSet<String>,
    ) -> Vec<MirrorError> {
        let mut errs = Vec::new();

        let declared: HashSet<String> = cur.values().map(|res| res.target.addr()).collect();
        for res in cur.values() {
            if touched.contains(res.name.as_str()) {
                continue;
            }
            let connected = self.topology.is_connected(&res.target.addr());
            let phase = match (res.phase, connected) {
                (TargetPhase::Connected, false) => TargetPhase::Disconnected,
                (phase, true) if phase != TargetPhase::Connected => TargetPhase::Connected,
                _ => continue,
            };
            self.set_phase(&res.name, phase, &mut errs).await;
        }

        let mut undeclared = Vec::new();
        self.topology.range_mirror_addrs(&mut |addr| {
            if !declared.contains(addr) && self.topology.is_connected(addr) {
                undeclared.push(addr.to_owned());
            }
            true
        });

        for addr in undeclared {
            if ctx.is_cancelled() {
                errs.push(MirrorError::Canceled);
                break;
            }
            let target = match PeerTarget::from_addr(&addr) {
                Ok(target) => target,
                Err(err) => {
                    errs.push(err);
                    continue;
                }
            };
            let res = MirrorTargetResource {
                name: self.resource_name(&addr),
                namespace: self.namespace.clone(),
                labels: self.labels.clone(),
                colocation: self.colocation.clone(),
                target,
                phase: TargetPhase::Connecting,
            };
            let name = res.name.clone();
            match self.store.create(res).await {
                Ok(()) => info!("created mirror target resource {name} for {addr}"),
                Err(err) => {
                    warn!("failed to create mirror target resource for {addr}: {err}");
                    errs.push(err);
                }
            }
        }
        errs
    }

    /// Stable resource name for a peer discovered by gossip.
    pub fn resource_name(&self, addr: &str) -> String {
        let mut hasher = SipHasher::new();
        hasher.write(self.self_addrs.as_bytes());
        hasher.write(addr.as_bytes());
        format!("{RESOURCE_PREFIX}-{}", hasher.finish())
    }
}

/// Difference between two snapshots, keyed by resource name.
#[derive(Debug, Default)]
struct Diff<'a> {
    created: Vec<&'a MirrorTargetResource>,
    deleted: Vec<&'a MirrorTargetResource>,
    updated: Vec<(&'a MirrorTargetResource, &'a MirrorTargetResource)>,
}

impl<'a> Diff<'a> {
    fn between(
        prev: &'a HashMap<String, MirrorTargetResource>,
        cur: &'a HashMap<String, MirrorTargetResource>,
    ) -> Self {
        let mut diff = Self::default();
        for (name, res) in cur {
            match prev.get(name) {
                None => diff.created.push(res),
                Some(old) if old.target != res.target => diff.updated.push((old, res)),
                Some(_) => {}
            }
        }
        for (name, res) in prev {
            if !cur.contains_key(name) {
                diff.deleted.push(res);
            }
        }
        diff
    }

    fn is_empty(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty() && self.updated.is_empty()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
