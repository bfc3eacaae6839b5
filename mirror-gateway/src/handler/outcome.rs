//! Per-participant outcome classification and broadcast aggregation.
//!
//! A broadcast round yields one [`PeerResult`] per participant.  Once the
//! round has drained, [`Aggregate`] folds the results under the operation's
//! [`WritePolicy`]:
//!
//! 1. any class the policy does not tolerate fails the whole write;
//! 2. if every participant shares one non-OK class, that class is the answer;
//! 3. otherwise the compensate bucket (if any) is retried with a corrective
//!    call and re-checked the same way;
//! 4. the write succeeds with the values of every OK participant.

use {
    crate::{error::MirrorError, gateway::PeerResult},
    log::{debug, warn},
    std::collections::HashMap,
    tonic::Code,
};

/// How one participant answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Class {
    Ok,
    AlreadyExists,
    NotFound,
    Canceled,
    DeadlineExceeded,
    ConnectionNotFound,
    Internal,
}

impl Class {
    pub fn of(err: &MirrorError) -> Self {
        if let MirrorError::ConnectionNotFound(_) = err {
            return Class::ConnectionNotFound;
        }
        match err.code() {
            Code::Ok => Class::Ok,
            Code::AlreadyExists => Class::AlreadyExists,
            Code::NotFound => Class::NotFound,
            Code::Cancelled => Class::Canceled,
            Code::DeadlineExceeded => Class::DeadlineExceeded,
            _ => Class::Internal,
        }
    }
}

/// What a write operation accepts from its participants.
#[derive(Debug)]
pub struct WritePolicy {
    pub rpc: &'static str,
    /// Non-OK classes that do not fail the write.
    pub tolerated: &'static [Class],
    /// Bucket that receives a corrective call, and that call's name.
    pub compensate: Option<(Class, &'static str)>,
    /// Non-OK classes the corrective call may return.
    pub compensation_tolerated: &'static [Class],
}

pub static INSERT: WritePolicy = WritePolicy {
    rpc: "Insert",
    tolerated: &[Class::AlreadyExists],
    compensate: Some((Class::AlreadyExists, "Update")),
    compensation_tolerated: &[Class::AlreadyExists, Class::NotFound],
};

pub static UPDATE: WritePolicy = WritePolicy {
    rpc: "Update",
    tolerated: &[Class::AlreadyExists, Class::NotFound],
    compensate: Some((Class::NotFound, "Insert")),
    compensation_tolerated: &[Class::AlreadyExists],
};

pub static UPSERT: WritePolicy = WritePolicy {
    rpc: "Upsert",
    tolerated: &[Class::AlreadyExists],
    compensate: None,
    compensation_tolerated: &[],
};

pub static REMOVE: WritePolicy = WritePolicy {
    rpc: "Remove",
    tolerated: &[Class::NotFound],
    compensate: None,
    compensation_tolerated: &[],
};

pub static REMOVE_BY_TIMESTAMP: WritePolicy = WritePolicy {
    rpc: "RemoveByTimestamp",
    tolerated: &[Class::NotFound],
    compensate: None,
    compensation_tolerated: &[],
};

/// Folded state of one write across its rounds.
#[derive(Debug)]
pub struct Aggregate<T> {
    policy: &'static WritePolicy,
    id: String,
    successes: Vec<T>,
    classes: HashMap<String, Class>,
    compensated: bool,
}

impl<T> Aggregate<T> {
    /// Folds the primary round.  `id` names the object in not-found errors;
    /// operations without a single object pass an empty id.
    pub fn new(
        policy: &'static WritePolicy,
        id: impl Into<String>,
        round: Vec<PeerResult<T>>,
    ) -> Result<Self, MirrorError> {
        if round.is_empty() {
            return Err(MirrorError::TargetNotFound);
        }
        let mut agg = Self {
            policy,
            id: id.into(),
            successes: Vec::with_capacity(round.len()),
            classes: HashMap::with_capacity(round.len()),
            compensated: false,
        };
        agg.absorb(round, policy.tolerated)?;
        agg.check_unanimous()?;
        Ok(agg)
    }

    /// Participants that need the corrective call.
    pub fn compensation_targets(&self) -> Vec<String> {
        let Some((bucket, _)) = self.policy.compensate else {
            return Vec::new();
        };
        let mut addrs: Vec<String> = self
            .classes
            .iter()
            .filter(|(_, class)| **class == bucket)
            .map(|(addr, _)| addr.clone())
            .collect();
        addrs.sort();
        addrs
    }

    /// Folds the corrective round, replacing the classes of its participants.
    pub fn compensate(&mut self, round: Vec<PeerResult<T>>) -> Result<(), MirrorError> {
        self.compensated = true;
        self.absorb(round, self.policy.compensation_tolerated)?;
        self.check_unanimous()
    }

    /// The value of every participant that answered OK, across both rounds.
    pub fn finish(self) -> Vec<T> {
        debug!(
            "{} API succeeded on {} of {} participants",
            self.policy.rpc,
            self.successes.len(),
            self.classes.len()
        );
        self.successes
    }

    fn rpc_name(&self) -> String {
        match self.policy.compensate {
            Some((_, follow_up)) if self.compensated => {
                format!("{follow_up} for {}", self.policy.rpc)
            }
            _ => self.policy.rpc.to_owned(),
        }
    }

    fn absorb(
        &mut self,
        round: Vec<PeerResult<T>>,
        tolerated: &[Class],
    ) -> Result<(), MirrorError> {
        let mut failures = Vec::new();
        for (addr, res) in round {
            match res {
                Ok(value) => {
                    self.successes.push(value);
                    self.classes.insert(addr, Class::Ok);
                }
                Err(err) => {
                    let class = Class::of(&err);
                    if class != Class::Ok && !tolerated.contains(&class) {
                        warn!("{} API failed on {addr}: {err}", self.policy.rpc);
                        failures.push((addr.clone(), err));
                    } else {
                        debug!("{} API on {addr} answered {class:?}", self.policy.rpc);
                    }
                    self.classes.insert(addr, class);
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            failures.sort_by(|a, b| a.0.cmp(&b.0));
            Err(MirrorError::Broadcast {
                rpc: self.policy.rpc,
                failures,
            })
        }
    }

    fn check_unanimous(&self) -> Result<(), MirrorError> {
        let mut classes = self.classes.values();
        let Some(first) = classes.next() else {
            return Ok(());
        };
        if !classes.all(|class| class == first) {
            return Ok(());
        }
        match first {
            Class::AlreadyExists => Err(MirrorError::AlreadyExists(format!(
                "{} API target same vector already exists",
                self.rpc_name()
            ))),
            Class::NotFound if self.id.is_empty() => Err(MirrorError::NotFound(format!(
                "{} API target not found",
                self.rpc_name()
            ))),
            Class::NotFound => Err(MirrorError::NotFound(format!(
                "{} API id {} not found",
                self.rpc_name(),
                self.id
            ))),
            _ => Ok(()),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
