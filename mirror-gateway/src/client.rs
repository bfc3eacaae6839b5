//! Seams to the RPC transport.
//!
//! The gateway never opens sockets itself.  A [`CallExecutor`] owns the
//! connection pool (dialing, closing, liveness) and hands out a
//! [`MirrorClient`] per connected address; the client is the remote
//! gateway's RPC surface, including the local cluster's.

use {
    crate::{
        context::CallContext,
        error::Result,
        payload::{
            InsertRequest, MirrorTargets, ObjectListRequest, ObjectListResponse, ObjectLocation,
            ObjectLocations, RemoveRequest, RemoveTimestampRequest, UpdateRequest, UpsertRequest,
        },
    },
    async_trait::async_trait,
    futures::stream::BoxStream,
    std::sync::Arc,
    tonic::Status,
};

/// Upstream stream of an object listing.
pub type ObjectListStream = BoxStream<'static, std::result::Result<ObjectListResponse, Status>>;

/// The RPC surface of one remote gateway.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MirrorClient: Send + Sync {
    async fn insert(
        &self,
        ctx: &CallContext,
        req: &InsertRequest,
    ) -> std::result::Result<ObjectLocation, Status>;

    async fn update(
        &self,
        ctx: &CallContext,
        req: &UpdateRequest,
    ) -> std::result::Result<ObjectLocation, Status>;

    async fn upsert(
        &self,
        ctx: &CallContext,
        req: &UpsertRequest,
    ) -> std::result::Result<ObjectLocation, Status>;

    async fn remove(
        &self,
        ctx: &CallContext,
        req: &RemoveRequest,
    ) -> std::result::Result<ObjectLocation, Status>;

    async fn remove_by_timestamp(
        &self,
        ctx: &CallContext,
        req: &RemoveTimestampRequest,
    ) -> std::result::Result<ObjectLocations, Status>;

    async fn stream_list_object(
        &self,
        ctx: &CallContext,
        req: &ObjectListRequest,
    ) -> std::result::Result<ObjectListStream, Status>;

    /// Announces `req` to a peer on startup; the peer replies with its own
    /// targets.
    async fn register(
        &self,
        ctx: &CallContext,
        req: &MirrorTargets,
    ) -> std::result::Result<MirrorTargets, Status>;

    /// Periodic gossip exchange of known targets.
    async fn advertise(
        &self,
        ctx: &CallContext,
        req: &MirrorTargets,
    ) -> std::result::Result<MirrorTargets, Status>;
}

/// Connection pool keyed by canonical `host:port` address.
#[async_trait]
pub trait CallExecutor: Send + Sync {
    /// Dials `addr`, replacing any dead connection.
    async fn connect(&self, addr: &str) -> Result<()>;

    /// Closes the connection to `addr`.  Returns
    /// [`MirrorError::ConnectionNotFound`](crate::error::MirrorError::ConnectionNotFound)
    /// when none is open.
    async fn disconnect(&self, addr: &str) -> Result<()>;

    fn is_connected(&self, addr: &str) -> bool;

    /// The client for `addr`, if it is connected.
    fn client(&self, addr: &str) -> Option<Arc<dyn MirrorClient>>;
}
