//! Substrate executor ports
//!
//! The coordination substrate (a Kubernetes-like registry plus a leader
//! lease) is injected behind these two traits. The connector never talks to
//! the substrate directly; it only issues port calls from the reconciler
//! worker and consumes the watch streams through the supervisor.

use crate::error::Result;
use crate::event::{LeaderElectionEvent, MembershipEvent};
use crate::member::{ClusterMember, MemberRevision};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Port for member-record reads and writes plus the membership watch
#[async_trait]
pub trait MembershipExecutor: Send + Sync {
    /// Upsert this process's member record.
    ///
    /// The substrate may echo back a normalized revision (e.g. a server-side
    /// timestamp); the echoed revision becomes authoritative.
    async fn write_member_record(
        &self,
        revision: MemberRevision<ClusterMember>,
    ) -> Result<MemberRevision<ClusterMember>>;

    /// Delete the member record for `member_id`
    async fn delete_member_record(&self, member_id: &str) -> Result<()>;

    /// Open a watch over membership changes.
    ///
    /// A fresh stream MAY replay the registry as `SiblingAdded`… followed by
    /// `SnapshotEnd`. Failures surface as a terminal `Disconnected` event.
    fn watch_membership_events(&self) -> BoxStream<'static, MembershipEvent>;
}

/// Port for the substrate-run leader-election campaign
#[async_trait]
pub trait LeaderElectionExecutor: Send + Sync {
    /// Register `member_id` as a campaign participant
    async fn join_leader_election(&self, member_id: &str) -> Result<()>;

    /// Withdraw from the campaign (releases the lease if held)
    async fn leave_leader_election(&self) -> Result<()>;

    /// Open a watch over leader-election process updates
    fn watch_leader_election_process_updates(&self) -> BoxStream<'static, LeaderElectionEvent>;
}

/// Bundle of the injected executor ports, cheap to clone into actions
#[derive(Clone)]
pub struct SubstrateContext {
    pub membership: Arc<dyn MembershipExecutor>,
    pub leader_election: Arc<dyn LeaderElectionExecutor>,
}

impl SubstrateContext {
    pub fn new(
        membership: Arc<dyn MembershipExecutor>,
        leader_election: Arc<dyn LeaderElectionExecutor>,
    ) -> Self {
        Self {
            membership,
            leader_election,
        }
    }
}
