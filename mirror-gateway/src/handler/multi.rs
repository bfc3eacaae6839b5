//! Batch writes.
//!
//! Each item of a batch runs the full single-object flow on its own; one
//! failing item never blocks or rolls back the others.  At most
//! `multi_concurrency` items are in flight at a time.

use {
    super::MirrorHandler,
    crate::{
        context::CallContext,
        error::MirrorError,
        payload::{
            InsertRequest, MultiLocations, ObjectLocation, RemoveRequest, UpdateRequest,
            UpsertRequest,
        },
    },
    futures::{stream, StreamExt},
    log::warn,
    std::future::Future,
    tonic::Status,
};

impl MirrorHandler {
    pub async fn multi_insert(
        &self,
        ctx: &CallContext,
        reqs: Vec<InsertRequest>,
    ) -> MultiLocations {
        self.run_multi(
            "MultiInsert",
            reqs,
            |req| req.vector.id.clone(),
            |req| self.insert(ctx, req),
        )
        .await
    }

    pub async fn multi_update(
        &self,
        ctx: &CallContext,
        reqs: Vec<UpdateRequest>,
    ) -> MultiLocations {
        self.run_multi(
            "MultiUpdate",
            reqs,
            |req| req.vector.id.clone(),
            |req| self.update(ctx, req),
        )
        .await
    }

    pub async fn multi_upsert(
        &self,
        ctx: &CallContext,
        reqs: Vec<UpsertRequest>,
    ) -> MultiLocations {
        self.run_multi(
            "MultiUpsert",
            reqs,
            |req| req.vector.id.clone(),
            |req| self.upsert(ctx, req),
        )
        .await
    }

    pub async fn multi_remove(
        &self,
        ctx: &CallContext,
        reqs: Vec<RemoveRequest>,
    ) -> MultiLocations {
        self.run_multi(
            "MultiRemove",
            reqs,
            |req| req.id.clone(),
            |req| self.remove(ctx, req),
        )
        .await
    }

    async fn run_multi<Req, Id, F, Fut>(
        &self,
        rpc: &str,
        reqs: Vec<Req>,
        id_of: Id,
        f: F,
    ) -> MultiLocations
    where
        Id: Fn(&Req) -> String,
        F: Fn(Req) -> Fut,
        Fut: Future<Output = Result<ObjectLocation, Status>>,
    {
        let results: Vec<(String, Result<ObjectLocation, Status>)> = stream::iter(reqs)
            .map(|req| {
                let id = id_of(&req);
                let fut = f(req);
                async move { (id, fut.await) }
            })
            .buffered(self.multi_concurrency)
            .collect()
            .await;

        let mut locations = Vec::with_capacity(results.len());
        let mut errs = Vec::new();
        for (id, res) in results {
            match res {
                Ok(loc) => locations.push(Some(loc)),
                Err(status) => {
                    warn!("{rpc} API failed for object {id}: {}", status.message());
                    locations.push(None);
                    errs.push(MirrorError::Object {
                        id,
                        source: Box::new(MirrorError::Rpc(status)),
                    });
                }
            }
        }

        MultiLocations {
            locations,
            error: MirrorError::join(errs).err().map(Status::from),
        }
    }
}
