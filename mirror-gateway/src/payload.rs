//! Request and response payloads of the mirrored write surface.
//!
//! Wire encoding belongs to the transport; these are the decoded shapes the
//! handler and the peer clients exchange.

use {
    crate::target::PeerTarget,
    std::time::{SystemTime, UNIX_EPOCH},
};

/// A stored vector and the timestamp of its last write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectVector {
    pub id: String,
    pub vector: Vec<f32>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertConfig {
    pub skip_strict_exist_check: bool,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertRequest {
    pub vector: ObjectVector,
    pub config: InsertConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateConfig {
    pub skip_strict_exist_check: bool,
    pub timestamp: i64,
    pub disable_balanced_update: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateRequest {
    pub vector: ObjectVector,
    pub config: UpdateConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertConfig {
    pub skip_strict_exist_check: bool,
    pub timestamp: i64,
    pub disable_balanced_update: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertRequest {
    pub vector: ObjectVector,
    pub config: UpsertConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveConfig {
    pub skip_strict_exist_check: bool,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveRequest {
    pub id: String,
    pub config: RemoveConfig,
}

/// Comparison applied between a stored timestamp and the requested one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimestampOperator {
    #[default]
    Eq,
    Ne,
    Ge,
    Gt,
    Le,
    Lt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveTimestamp {
    pub timestamp: i64,
    pub operator: TimestampOperator,
}

/// Removes every object whose timestamp satisfies all conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveTimestampRequest {
    pub timestamps: Vec<RemoveTimestamp>,
}

/// Where an object ended up: owning cluster names and replica IPs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectLocation {
    pub name: String,
    pub uuid: String,
    pub ips: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectLocations {
    pub locations: Vec<ObjectLocation>,
}

/// A status carried inside a stream instead of terminating it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub code: tonic::Code,
    pub message: String,
}

impl From<&tonic::Status> for StatusRecord {
    fn from(status: &tonic::Status) -> Self {
        Self {
            code: status.code(),
            message: status.message().to_owned(),
        }
    }
}

/// One message of a write stream reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLocation {
    Location(ObjectLocation),
    Status(StatusRecord),
}

impl From<Result<ObjectLocation, tonic::Status>> for StreamLocation {
    fn from(res: Result<ObjectLocation, tonic::Status>) -> Self {
        match res {
            Ok(loc) => StreamLocation::Location(loc),
            Err(status) => StreamLocation::Status(StatusRecord::from(&status)),
        }
    }
}

/// Reply of a batch write: one slot per request, `None` where that item
/// failed, plus the combined error of the failed items.
#[derive(Debug, Clone, Default)]
pub struct MultiLocations {
    pub locations: Vec<Option<ObjectLocation>>,
    pub error: Option<tonic::Status>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectListRequest {}

/// One message of an object listing stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectListResponse {
    Vector(ObjectVector),
    Status(StatusRecord),
}

/// The set of mirror targets a gateway knows about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorTargets {
    pub targets: Vec<PeerTarget>,
}

/// Current Unix time in nanoseconds.
pub(crate) fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|elapsed| i64::try_from(elapsed.as_nanos()).ok())
        .unwrap_or(i64::MAX)
}
