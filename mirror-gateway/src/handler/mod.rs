//! Mirrored write surface.
//!
//! [`MirrorHandler`] answers every mutating RPC.  A call that arrives with a
//! `forwarded-for` marker is a *terminal hop*: it is relayed once to the
//! local cluster and its answer passed back.  Any other call is an *origin
//! hop*: it is broadcast to the local cluster and every connected mirror
//! peer, the per-participant outcomes are folded by [`outcome::Aggregate`],
//! and divergent participants receive one corrective call.
//!
//! ```text
//!  client ──► origin gateway ──┬──► local cluster
//!                              ├──► mirror B ──► B's local cluster (terminal)
//!                              └──► mirror C ──► C's local cluster (terminal)
//! ```
//!
//! | Operation          | Tolerated      | Corrective call          |
//! |--------------------|----------------|--------------------------|
//! | Insert             | AlreadyExists  | Update to AlreadyExists  |
//! | Update             | AlreadyExists, NotFound | Insert to NotFound |
//! | Upsert             | AlreadyExists  | none                     |
//! | Remove             | NotFound       | none                     |
//! | RemoveByTimestamp  | NotFound       | none                     |

pub mod multi;
pub mod outcome;
pub mod stream;

use {
    crate::{
        config::MirrorConfig,
        context::CallContext,
        error::{MirrorError, Result},
        gateway::Gateway,
        payload::{
            now_nanos, InsertConfig, InsertRequest, MirrorTargets, ObjectLocation,
            ObjectLocations, RemoveRequest, RemoveTimestampRequest, UpdateConfig, UpdateRequest,
            UpsertRequest,
        },
        registry::Topology,
    },
    log::{debug, warn},
    outcome::{Aggregate, INSERT, REMOVE, REMOVE_BY_TIMESTAMP, UPDATE, UPSERT},
    std::{collections::HashMap, sync::Arc},
    tonic::Status,
};

pub struct MirrorHandler {
    gateway: Arc<Gateway>,
    stream_concurrency: usize,
    multi_concurrency: usize,
}

impl MirrorHandler {
    pub fn new(gateway: Arc<Gateway>, config: &MirrorConfig) -> Self {
        Self {
            gateway,
            stream_concurrency: config.stream_concurrency.max(1),
            multi_concurrency: config.multi_concurrency.max(1),
        }
    }

    fn topology(&self) -> &Arc<dyn Topology> {
        self.gateway.topology()
    }

    // ── Single-object writes ────────────────────────────────────────────────

    pub async fn insert(
        &self,
        ctx: &CallContext,
        mut req: InsertRequest,
    ) -> std::result::Result<ObjectLocation, Status> {
        if ctx.forwarded_for().is_some() {
            return self
                .gateway
                .do_local(ctx, |ctx, client| async move {
                    client.insert(&ctx, &req).await
                })
                .await
                .map_err(Status::from);
        }
        validate_id(&req.vector.id)?;
        if req.config.timestamp == 0 {
            req.config.timestamp = now_nanos();
        }
        if req.vector.timestamp == 0 {
            req.vector.timestamp = req.config.timestamp;
        }
        self.broadcast_insert(ctx, &req).await.map_err(Status::from)
    }

    async fn broadcast_insert(
        &self,
        ctx: &CallContext,
        req: &InsertRequest,
    ) -> Result<ObjectLocation> {
        let round = self
            .gateway
            .broadcast(ctx, |ctx, client| async move {
                client.insert(&ctx, req).await
            })
            .await;
        let mut agg = Aggregate::new(&INSERT, &req.vector.id, round)?;

        let targets = agg.compensation_targets();
        if !targets.is_empty() {
            debug!(
                "Insert API object {} already exists on {targets:?}, sending Update",
                req.vector.id
            );
            let update = UpdateRequest {
                vector: req.vector.clone(),
                config: UpdateConfig {
                    skip_strict_exist_check: true,
                    timestamp: req.config.timestamp,
                    disable_balanced_update: false,
                },
            };
            let update = &update;
            // corrective calls must not fan out again on the receiving peer
            let ctx = ctx.forwarded(self.gateway.forwarded_name());
            let round = self
                .gateway
                .do_multi(&ctx, &targets, |ctx, client| async move {
                    client.update(&ctx, update).await
                })
                .await;
            agg.compensate(round)?;
        }
        Ok(merge_locations(&req.vector.id, agg.finish()))
    }

    pub async fn update(
        &self,
        ctx: &CallContext,
        mut req: UpdateRequest,
    ) -> std::result::Result<ObjectLocation, Status> {
        if ctx.forwarded_for().is_some() {
            return self
                .gateway
                .do_local(ctx, |ctx, client| async move {
                    client.update(&ctx, &req).await
                })
                .await
                .map_err(Status::from);
        }
        validate_id(&req.vector.id)?;
        if req.config.timestamp == 0 {
            req.config.timestamp = now_nanos();
        }
        if req.vector.timestamp == 0 {
            req.vector.timestamp = req.config.timestamp;
        }
        self.broadcast_update(ctx, &req).await.map_err(Status::from)
    }

    async fn broadcast_update(
        &self,
        ctx: &CallContext,
        req: &UpdateRequest,
    ) -> Result<ObjectLocation> {
        let round = self
            .gateway
            .broadcast(ctx, |ctx, client| async move {
                client.update(&ctx, req).await
            })
            .await;
        let mut agg = Aggregate::new(&UPDATE, &req.vector.id, round)?;

        let targets = agg.compensation_targets();
        if !targets.is_empty() {
            debug!(
                "Update API object {} not found on {targets:?}, sending Insert",
                req.vector.id
            );
            let insert = InsertRequest {
                vector: req.vector.clone(),
                config: InsertConfig {
                    skip_strict_exist_check: true,
                    timestamp: req.config.timestamp,
                },
            };
            let insert = &insert;
            // corrective calls must not fan out again on the receiving peer
            let ctx = ctx.forwarded(self.gateway.forwarded_name());
            let round = self
                .gateway
                .do_multi(&ctx, &targets, |ctx, client| async move {
                    client.insert(&ctx, insert).await
                })
                .await;
            agg.compensate(round)?;
        }
        Ok(merge_locations(&req.vector.id, agg.finish()))
    }

    pub async fn upsert(
        &self,
        ctx: &CallContext,
        mut req: UpsertRequest,
    ) -> std::result::Result<ObjectLocation, Status> {
        if ctx.forwarded_for().is_some() {
            return self
                .gateway
                .do_local(ctx, |ctx, client| async move {
                    client.upsert(&ctx, &req).await
                })
                .await
                .map_err(Status::from);
        }
        validate_id(&req.vector.id)?;
        if req.config.timestamp == 0 {
            req.config.timestamp = now_nanos();
        }
        if req.vector.timestamp == 0 {
            req.vector.timestamp = req.config.timestamp;
        }
        let req = &req;
        let round = self
            .gateway
            .broadcast(ctx, |ctx, client| async move {
                client.upsert(&ctx, req).await
            })
            .await;
        let agg = Aggregate::new(&UPSERT, &req.vector.id, round)?;
        Ok(merge_locations(&req.vector.id, agg.finish()))
    }

    pub async fn remove(
        &self,
        ctx: &CallContext,
        req: RemoveRequest,
    ) -> std::result::Result<ObjectLocation, Status> {
        if ctx.forwarded_for().is_some() {
            return self
                .gateway
                .do_local(ctx, |ctx, client| async move {
                    client.remove(&ctx, &req).await
                })
                .await
                .map_err(Status::from);
        }
        validate_id(&req.id)?;
        let req = &req;
        let round = self
            .gateway
            .broadcast(ctx, |ctx, client| async move {
                client.remove(&ctx, req).await
            })
            .await;
        let agg = Aggregate::new(&REMOVE, &req.id, round)?;
        Ok(merge_locations(&req.id, agg.finish()))
    }

    pub async fn remove_by_timestamp(
        &self,
        ctx: &CallContext,
        req: RemoveTimestampRequest,
    ) -> std::result::Result<ObjectLocations, Status> {
        if ctx.forwarded_for().is_some() {
            return self
                .gateway
                .do_local(ctx, |ctx, client| async move {
                    client.remove_by_timestamp(&ctx, &req).await
                })
                .await
                .map_err(Status::from);
        }
        let req = &req;
        let round = self
            .gateway
            .broadcast(ctx, |ctx, client| async move {
                client.remove_by_timestamp(&ctx, req).await
            })
            .await;
        let agg = Aggregate::new(&REMOVE_BY_TIMESTAMP, "", round)?;
        let locations = agg
            .finish()
            .into_iter()
            .flat_map(|locs| locs.locations)
            .collect::<Vec<_>>();
        Ok(ObjectLocations {
            locations: merge_by_uuid(locations),
        })
    }

    // ── Peer exchange ───────────────────────────────────────────────────────

    /// A peer announced itself on startup: connect what it sent and reply
    /// with everything this node knows.
    pub async fn register(
        &self,
        ctx: &CallContext,
        req: MirrorTargets,
    ) -> std::result::Result<MirrorTargets, Status> {
        self.exchange_targets(ctx, "Register", req).await
    }

    /// Periodic gossip from a peer; same contract as [`Self::register`].
    pub async fn advertise(
        &self,
        ctx: &CallContext,
        req: MirrorTargets,
    ) -> std::result::Result<MirrorTargets, Status> {
        self.exchange_targets(ctx, "Advertise", req).await
    }

    async fn exchange_targets(
        &self,
        ctx: &CallContext,
        rpc: &str,
        req: MirrorTargets,
    ) -> std::result::Result<MirrorTargets, Status> {
        if !req.targets.is_empty() {
            if let Err(err) = self.topology().connect(ctx, &req.targets).await {
                warn!("{rpc} API failed to connect mirror gateway targets: {err}");
                return Err(Status::new(
                    err.code(),
                    format!("{rpc} API failed to connect mirror gateway targets: {err}"),
                ));
            }
        }
        let targets = self.topology().mirror_targets().map_err(Status::from)?;
        Ok(MirrorTargets { targets })
    }
}

fn validate_id(id: &str) -> std::result::Result<(), Status> {
    if id.is_empty() {
        let err = MirrorError::InvalidArgument("object id is empty".to_owned());
        return Err(err.into());
    }
    Ok(())
}

/// Folds OK locations into one: owning cluster names are joined, IPs kept in
/// arrival order.
fn merge_locations(uuid: &str, locs: Vec<ObjectLocation>) -> ObjectLocation {
    let mut merged = ObjectLocation {
        uuid: uuid.to_owned(),
        ..ObjectLocation::default()
    };
    let mut names: Vec<String> = Vec::new();
    for loc in locs {
        merged.ips.extend(loc.ips);
        for name in loc.name.split(',').filter(|name| !name.is_empty()) {
            if !names.iter().any(|known| known == name) {
                names.push(name.to_owned());
            }
        }
    }
    merged.name = names.join(",");
    merged
}

fn merge_by_uuid(locs: Vec<ObjectLocation>) -> Vec<ObjectLocation> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<ObjectLocation>> = HashMap::new();
    for loc in locs {
        if !grouped.contains_key(&loc.uuid) {
            order.push(loc.uuid.clone());
        }
        grouped.entry(loc.uuid.clone()).or_default().push(loc);
    }
    order
        .into_iter()
        .filter_map(|uuid| {
            let locs = grouped.remove(&uuid)?;
            Some(merge_locations(&uuid, locs))
        })
        .collect()
}

#[cfg(test)]
mod tests;
