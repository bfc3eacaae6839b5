//! Request-scoped call context.
//!
//! Every inbound call carries a [`CallContext`]: a cancellation token, an
//! optional deadline, and the call metadata.  The metadata is where the
//! forwarded marker lives; a non-empty `forwarded-for` value means the call
//! was already broadcast by another mirror gateway and must not be broadcast
//! again.

use {
    crate::error::MirrorError,
    std::{future::Future, time::Duration},
    tokio::time::Instant,
    tokio_util::sync::CancellationToken,
    tonic::metadata::{AsciiMetadataValue, MetadataMap},
};

/// Metadata key carrying the name of the gateway that broadcast the call.
pub const FORWARDED_FOR: &str = "forwarded-for";

#[derive(Debug, Clone)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    metadata: MetadataMap,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CallContext {
    /// A fresh root context with no deadline.
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
            metadata: MetadataMap::new(),
        }
    }

    /// Returns a copy whose deadline is at most `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now()
            .checked_add(timeout)
            .unwrap_or_else(Instant::now);
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Returns a copy whose token is a child of this one, so cancelling the
    /// child leaves the parent running.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            metadata: self.metadata.clone(),
        }
    }

    /// Returns a copy marked as forwarded by `name`.
    pub fn forwarded(&self, name: &AsciiMetadataValue) -> Self {
        let mut ctx = self.clone();
        ctx.metadata.insert(FORWARDED_FOR, name.clone());
        ctx
    }

    /// The gateway that forwarded this call, if any.
    pub fn forwarded_for(&self) -> Option<&str> {
        self.metadata
            .get(FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
    }

    pub fn metadata_mut(&mut self) -> &mut MetadataMap {
        &mut self.metadata
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the token fires or the deadline passes.
    pub async fn done(&self) -> MirrorError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => MirrorError::Canceled,
                _ = tokio::time::sleep_until(deadline) => MirrorError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                MirrorError::Canceled
            }
        }
    }

    /// Drives `fut` to completion unless the context is cancelled or its
    /// deadline passes first.
    pub async fn run<T, E, F>(&self, fut: F) -> Result<T, MirrorError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<MirrorError>,
    {
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            res = fut => res.map_err(Into::into),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
