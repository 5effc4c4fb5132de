//! # Rookery Cluster
//!
//! Cluster membership and leader election for Rookery nodes, backed by a
//! Kubernetes-like coordination substrate:
//! - **Membership**: advertise the local member record, keep it fresh with
//!   heartbeats, and track sibling records from the registry
//! - **Leader election**: campaign for the substrate-owned leader lease and
//!   track the current lease holder
//! - **Reconciliation**: a single-writer engine that serializes every state
//!   mutation and converges desired and observed state
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    MembershipConnector                       │
//! ├────────────────┬───────────────────┬─────────────────────────┤
//! │   Reconciler   │    Supervisors    │      Housekeeping       │
//! │ single writer  │  watch + resub    │   heartbeat / purge /   │
//! │ FIFO actions   │  flat backoff     │   campaign realign      │
//! ├────────────────┴───────────────────┴─────────────────────────┤
//! │         MembershipExecutor / LeaderElectionExecutor          │
//! │                  (injected substrate ports)                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use rookery_cluster::{ClusterMember, ConnectorConfig, MembershipConnector, MemberRevision};
//!
//! let connector = MembershipConnector::new(
//!     ClusterMember::new("node-1"),
//!     membership_executor,
//!     leader_election_executor,
//!     ConnectorConfig::default(),
//! )?;
//!
//! // Advertise ourselves; the caller owns revision numbering
//! connector
//!     .register(|member| MemberRevision::new(member.with_active(true), 1, now_millis))
//!     .await?;
//!
//! // Compete for the leader lease
//! connector.join_leadership_group().await?;
//! if let Some(leader) = connector.find_current_leader() {
//!     println!("leader is {}", leader.current.member_id);
//! }
//! ```

pub mod actions;
pub mod clock;
pub mod config;
pub mod connector;
pub mod error;
pub mod event;
pub mod housekeeping;
pub mod leadership;
pub mod member;
pub mod observability;
pub mod reconciler;
pub mod state;
pub mod substrate;

mod supervisor;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConnectorConfig, ConnectorConfigBuilder};
pub use connector::MembershipConnector;
pub use error::{ConnectorError, Result};
pub use event::{ClusterChangeEvent, LeaderElectionEvent, MembershipEvent, StreamKind};
pub use leadership::{LeaderRole, LeadershipRecord};
pub use member::{ClusterMember, MemberAddress, MemberId, MemberRevision};
pub use observability::init_metrics;
pub use reconciler::{ClusterUpdate, ReconcileAction, Reconciler, ReconcilerActionsProvider};
pub use state::ClusterState;
pub use substrate::{LeaderElectionExecutor, MembershipExecutor, SubstrateContext};

/// Re-export common types
pub mod prelude {
    pub use crate::clock::*;
    pub use crate::config::*;
    pub use crate::connector::*;
    pub use crate::error::*;
    pub use crate::event::*;
    pub use crate::leadership::*;
    pub use crate::member::*;
    pub use crate::substrate::*;
}
