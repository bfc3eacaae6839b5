//! Mirror Gateway Replication Layer
//!
//! A mirror gateway sits in front of one vector-search cluster and keeps it
//! in step with the same cluster in other regions.  It handles:
//!
//! - **Write broadcast**: every Insert/Update/Upsert/Remove that arrives from
//!   a client is applied to the local cluster and to every connected mirror
//!   peer, and the per-participant outcomes are folded into one answer.
//! - **Compensation**: an Insert that hits an existing object on some
//!   participants becomes an Update there, and an Update that misses becomes
//!   an Insert, so all clusters converge on the same vector.
//! - **Loop prevention**: broadcasts carry a `forwarded-for` marker; a call
//!   that arrives with it is applied locally and never re-broadcast.
//! - **Discovery**: peers gossip their known mirror addresses to each other,
//!   and operators may declare targets as resources that are reconciled
//!   against the live registry.
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────────────────────────────────────────────┐
//!  │  inbound RPCs (single / Multi / Stream)          │
//!  └───────────────┬──────────────────────────────────┘
//!                  │
//!  ┌───────────────▼──────────────────────────────────┐
//!  │  MirrorHandler (handler)                         │
//!  │  • origin vs. terminal hop                       │
//!  │  • broadcast, aggregate, compensate              │
//!  └───────────────┬──────────────────────────────────┘
//!                  │
//!  ┌───────────────▼──────────────────────────────────┐
//!  │  Gateway: do_local / broadcast / do_multi        │
//!  └──────┬─────────────────────────────┬─────────────┘
//!         │                             │
//!  ┌──────▼──────┐   connect     ┌──────▼─────────────┐
//!  │ Mirror      │◄──────────────┤ Discoverer (gossip)│
//!  │ (registry)  │◄──────────────┤ Discovery (decl.)  │
//!  └──────┬──────┘               └────────────────────┘
//!         │
//!  ┌──────▼───────────────────────────────────────────┐
//!  │  CallExecutor: pooled connections per address    │
//!  └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`]    | `MirrorConfig` defaults, TOML loading and dev overrides |
//! | [`context`]   | Per-call cancellation, deadline and metadata |
//! | [`target`]    | Peer addresses and host/port joining |
//! | [`payload`]   | Request and reply types of the mirrored RPCs |
//! | [`client`]    | Executor and per-peer client contracts |
//! | [`registry`]  | Peer registry (`Mirror`) and its `Topology` contract |
//! | [`gateway`]   | Local, broadcast and subset call routing |
//! | [`handler`]   | Write broadcast, aggregation and compensation |
//! | [`gossip`]    | Register/Advertise peer discovery loop |
//! | [`discovery`] | Declarative target reconciliation |
//! | [`daemon`]    | Composition root and background loop supervision |
//! | [`error`]     | Crate-wide error enum |

pub mod client;
pub mod config;
pub mod context;
pub mod daemon;
pub mod discovery;
pub mod error;
pub mod gateway;
pub mod gossip;
pub mod handler;
pub mod payload;
pub mod registry;
pub mod target;

#[cfg(test)]
pub mod test_utils;
