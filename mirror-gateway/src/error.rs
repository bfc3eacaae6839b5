//! Error types for the mirror gateway.

use {thiserror::Error, tonic::Code};

/// Errors that can occur while replicating writes or maintaining the peer
/// topology.
#[derive(Error, Debug, Clone)]
pub enum MirrorError {
    /// The caller's cancellation token fired before the call returned.
    #[error("call canceled")]
    Canceled,

    /// The caller's deadline elapsed before the call returned.
    #[error("call deadline exceeded")]
    DeadlineExceeded,

    /// No mirror target was supplied or reachable.
    #[error("mirror target not found")]
    TargetNotFound,

    /// The executor holds no live connection for the address.
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// Dialing a peer was refused or dropped.
    #[error("connection failed to {0}: {1}")]
    ConnectionFailed(String, String),

    /// Every participant already stores the object.
    #[error("{0}")]
    AlreadyExists(String),

    /// No participant stores the object.
    #[error("{0}")]
    NotFound(String),

    /// The request was rejected before any participant was contacted.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A peer address could not be split into host and port.
    #[error("invalid mirror address: {0}")]
    InvalidAddr(String),

    /// A remote participant answered with a non-OK status.
    #[error("rpc error: {0}")]
    Rpc(#[from] tonic::Status),

    /// A broadcast round failed on at least one participant in a way the
    /// operation does not tolerate.
    #[error("{rpc} API failed on {}", display_failures(.failures))]
    Broadcast {
        /// Name of the write operation.
        rpc: &'static str,
        /// Failing participants and their errors.
        failures: Vec<(String, MirrorError)>,
    },

    /// One item of a batch failed.
    #[error("object {id}: {source}")]
    Object {
        /// Object id of the failed item.
        id: String,
        /// Why it failed.
        #[source]
        source: Box<MirrorError>,
    },

    /// The declarative target store rejected an operation.
    #[error("target store error: {0}")]
    Store(String),

    /// The configuration is unusable.
    #[error("invalid config: {0}")]
    Config(String),

    /// Several independent errors collected from one pass.
    #[error("{}", display_joined(.0))]
    Joined(Vec<MirrorError>),
}

fn display_failures(failures: &[(String, MirrorError)]) -> String {
    failures
        .iter()
        .map(|(addr, err)| format!("{addr}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

fn display_joined(errs: &[MirrorError]) -> String {
    errs.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl MirrorError {
    /// Folds collected errors into one result. An empty list is success and a
    /// single error is returned as-is.
    pub fn join(mut errs: Vec<MirrorError>) -> Result<()> {
        match errs.len() {
            0 => Ok(()),
            1 => Err(errs.remove(0)),
            _ => Err(MirrorError::Joined(errs)),
        }
    }

    /// gRPC status code a caller observes for this error.
    pub fn code(&self) -> Code {
        match self {
            MirrorError::Canceled => Code::Cancelled,
            MirrorError::DeadlineExceeded => Code::DeadlineExceeded,
            MirrorError::TargetNotFound => Code::NotFound,
            MirrorError::ConnectionNotFound(_) | MirrorError::ConnectionFailed(..) => {
                Code::Unavailable
            }
            MirrorError::AlreadyExists(_) => Code::AlreadyExists,
            MirrorError::NotFound(_) => Code::NotFound,
            MirrorError::InvalidArgument(_)
            | MirrorError::InvalidAddr(_)
            | MirrorError::Config(_) => Code::InvalidArgument,
            MirrorError::Rpc(status) => status.code(),
            MirrorError::Broadcast { failures, .. } => {
                match unanimous(failures.iter().map(|(_, err)| err.code())) {
                    Some(code @ (Code::Cancelled | Code::DeadlineExceeded)) => code,
                    _ => Code::Internal,
                }
            }
            MirrorError::Object { source, .. } => source.code(),
            MirrorError::Store(_) => Code::Internal,
            MirrorError::Joined(errs) => {
                unanimous(errs.iter().map(MirrorError::code)).unwrap_or(Code::Internal)
            }
        }
    }
}

/// Returns the shared code when every item carries the same one.
fn unanimous(mut codes: impl Iterator<Item = Code>) -> Option<Code> {
    let first = codes.next()?;
    codes.all(|code| code == first).then_some(first)
}

impl From<MirrorError> for tonic::Status {
    fn from(err: MirrorError) -> Self {
        match err {
            MirrorError::Rpc(status) => status,
            err => tonic::Status::new(err.code(), err.to_string()),
        }
    }
}

/// Convenience result type for mirror gateway operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

// ── Tests ───────────────────────────────────────────────────────────────────
