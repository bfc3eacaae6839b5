//! Streaming writes and the object listing proxy.
//!
//! A write stream keeps up to `stream_concurrency` items in flight.  Every
//! item's outcome, success or failure, becomes one reply message; only an
//! inbound transport error, a closed reply sink, cancellation or end of input
//! ends the stream.

use {
    super::MirrorHandler,
    crate::{
        context::CallContext,
        payload::{
            InsertRequest, ObjectListRequest, ObjectListResponse, RemoveRequest, StreamLocation,
            UpdateRequest, UpsertRequest,
        },
    },
    futures::{stream::FuturesUnordered, Stream, StreamExt},
    log::{debug, warn},
    std::future::Future,
    tokio::sync::mpsc,
    tonic::{Code, Status},
};

/// Drives `inbound` through `f` with at most `concurrency` items in flight
/// and pushes every result to `outbound`.
pub async fn bidirectional_stream<Req, Res, S, F, Fut>(
    ctx: &CallContext,
    mut inbound: S,
    concurrency: usize,
    outbound: &mpsc::Sender<Res>,
    f: F,
) -> Result<(), Status>
where
    S: Stream<Item = Result<Req, Status>> + Unpin,
    F: Fn(Req) -> Fut,
    Fut: Future<Output = Res>,
{
    let concurrency = concurrency.max(1);
    let mut in_flight = FuturesUnordered::new();
    let mut inbound_done = false;

    loop {
        if inbound_done && in_flight.is_empty() {
            return Ok(());
        }
        tokio::select! {
            biased;
            err = ctx.done() => return Err(err.into()),
            Some(res) = in_flight.next(), if !in_flight.is_empty() => {
                // a caller that stops draining must not outlive its own cancellation
                let sent = tokio::select! {
                    biased;
                    err = ctx.done() => return Err(err.into()),
                    sent = outbound.send(res) => sent,
                };
                if sent.is_err() {
                    return Err(Status::unavailable("reply stream closed"));
                }
            }
            next = inbound.next(), if !inbound_done && in_flight.len() < concurrency => {
                match next {
                    Some(Ok(req)) => in_flight.push(f(req)),
                    Some(Err(status)) => {
                        warn!("inbound stream failed: {status}");
                        return Err(status);
                    }
                    None => inbound_done = true,
                }
            }
        }
    }
}

impl MirrorHandler {
    pub async fn stream_insert<S>(
        &self,
        ctx: &CallContext,
        inbound: S,
        outbound: &mpsc::Sender<StreamLocation>,
    ) -> Result<(), Status>
    where
        S: Stream<Item = Result<InsertRequest, Status>> + Unpin,
    {
        bidirectional_stream(ctx, inbound, self.stream_concurrency, outbound, |req| async move {
            StreamLocation::from(self.insert(ctx, req).await)
        })
        .await
    }

    pub async fn stream_update<S>(
        &self,
        ctx: &CallContext,
        inbound: S,
        outbound: &mpsc::Sender<StreamLocation>,
    ) -> Result<(), Status>
    where
        S: Stream<Item = Result<UpdateRequest, Status>> + Unpin,
    {
        bidirectional_stream(ctx, inbound, self.stream_concurrency, outbound, |req| async move {
            StreamLocation::from(self.update(ctx, req).await)
        })
        .await
    }

    pub async fn stream_upsert<S>(
        &self,
        ctx: &CallContext,
        inbound: S,
        outbound: &mpsc::Sender<StreamLocation>,
    ) -> Result<(), Status>
    where
        S: Stream<Item = Result<UpsertRequest, Status>> + Unpin,
    {
        bidirectional_stream(ctx, inbound, self.stream_concurrency, outbound, |req| async move {
            StreamLocation::from(self.upsert(ctx, req).await)
        })
        .await
    }

    pub async fn stream_remove<S>(
        &self,
        ctx: &CallContext,
        inbound: S,
        outbound: &mpsc::Sender<StreamLocation>,
    ) -> Result<(), Status>
    where
        S: Stream<Item = Result<RemoveRequest, Status>> + Unpin,
    {
        bidirectional_stream(ctx, inbound, self.stream_concurrency, outbound, |req| async move {
            StreamLocation::from(self.remove(ctx, req).await)
        })
        .await
    }

    /// Relays the local cluster's object listing to `outbound`.
    ///
    /// A reader pulls from the upstream stream and a forwarder pushes to the
    /// caller; they are joined by a channel of `stream_concurrency` slots.
    /// Upstream end of input cancels the shared scope.  Cancellation-class
    /// upstream errors end the relay without failing it.
    pub async fn stream_list_object(
        &self,
        ctx: &CallContext,
        req: ObjectListRequest,
        outbound: &mpsc::Sender<ObjectListResponse>,
    ) -> Result<(), Status> {
        let scope = ctx.child();
        let mut upstream = self
            .gateway
            .do_local(&scope, |ctx, client| async move {
                client.stream_list_object(&ctx, &req).await
            })
            .await
            .map_err(Status::from)?;

        let (tx, mut rx) = mpsc::channel(self.stream_concurrency);
        let reader = {
            let scope = &scope;
            async move {
                let res = loop {
                    let next = tokio::select! {
                        biased;
                        _ = scope.token().cancelled() => break Ok(()),
                        next = upstream.next() => next,
                    };
                    match next {
                        Some(Ok(msg)) => {
                            if tx.send(msg).await.is_err() {
                                break Ok(());
                            }
                        }
                        Some(Err(status)) if is_cancellation(&status) => {
                            debug!("object listing upstream ended: {status}");
                            break Ok(());
                        }
                        Some(Err(status)) => break Err(status),
                        None => break Ok(()),
                    }
                };
                drop(tx);
                scope.cancel();
                res
            }
        };
        // races the caller's context, not `scope`: the reader cancels `scope` at
        // end of input while buffered messages are still being forwarded
        let forwarder = async {
            while let Some(msg) = rx.recv().await {
                let sent = tokio::select! {
                    biased;
                    err = ctx.done() => {
                        scope.cancel();
                        return Err(Status::from(err));
                    }
                    sent = outbound.send(msg) => sent,
                };
                if sent.is_err() {
                    scope.cancel();
                    return Err(Status::unavailable("reply stream closed"));
                }
            }
            Ok(())
        };

        let (read, forward) = tokio::join!(reader, forwarder);
        read.and(forward)
    }
}

fn is_cancellation(status: &Status) -> bool {
    matches!(status.code(), Code::Cancelled | Code::DeadlineExceeded)
}
