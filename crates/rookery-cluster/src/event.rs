//! Substrate watch events and connector delta events

use crate::leadership::LeadershipRecord;
use crate::member::{ClusterMember, MemberId, MemberRevision};

/// Events observed on the substrate membership watch stream.
///
/// A freshly opened stream MAY replay the registry as a sequence of
/// `SiblingAdded` followed by `SnapshotEnd`. Stream failures surface as a
/// terminal `Disconnected` carrying the cause.
#[derive(Debug, Clone)]
pub enum MembershipEvent {
    /// A member record appeared in the registry
    SiblingAdded(MemberRevision<ClusterMember>),
    /// A member record was rewritten
    SiblingUpdated(MemberRevision<ClusterMember>),
    /// A member record was deleted
    SiblingRemoved(MemberId),
    /// End of the initial registry replay
    SnapshotEnd,
    /// The watch broke; the supervisor will resubscribe
    Disconnected { cause: String },
}

/// Events observed on the substrate leader-election watch stream
#[derive(Debug, Clone)]
pub enum LeaderElectionEvent {
    /// A member took the leader lease
    LeaderElected(MemberRevision<LeadershipRecord>),
    /// The named member released or lost the lease
    LeaderLost(MemberId),
    /// Our own campaign is confirmed running
    LocalJoined,
    /// Our own campaign stopped
    LocalLeft,
    /// The watch broke; the supervisor will resubscribe
    Disconnected { cause: String },
}

/// Which substrate stream an event or disconnect originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Membership,
    LeaderElection,
}

impl StreamKind {
    /// Stable label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Membership => "membership",
            StreamKind::LeaderElection => "leader-election",
        }
    }
}

/// Delta events emitted to `membership_change_events()` subscribers.
///
/// The first emission per subscriber is always a `Snapshot`; replaying the
/// snapshot plus every subsequent delta reconstructs the state observable
/// through the connector accessors.
#[derive(Debug, Clone)]
pub enum ClusterChangeEvent {
    /// Full view of the cluster at subscription time
    Snapshot {
        local: MemberRevision<ClusterMember>,
        siblings: Vec<MemberRevision<ClusterMember>>,
        leader: Option<MemberRevision<LeadershipRecord>>,
    },
    /// The local member record changed (registration, heartbeat, labels)
    LocalUpdated(MemberRevision<ClusterMember>),
    /// The local leadership standing changed role
    LocalLeadershipUpdated(MemberRevision<LeadershipRecord>),
    /// A sibling appeared
    SiblingAdded(MemberRevision<ClusterMember>),
    /// A sibling record advanced
    SiblingUpdated(MemberRevision<ClusterMember>),
    /// A sibling disappeared (substrate removal or stale purge)
    SiblingRemoved(MemberId),
    /// A member took the leader lease
    LeaderElected(MemberRevision<LeadershipRecord>),
    /// The leader lease was released or lost
    LeaderLost(MemberId),
    /// A substrate watch dropped; sibling knowledge may be behind until the
    /// stream replays
    Disconnected { stream: StreamKind, cause: String },
}
