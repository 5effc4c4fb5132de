//! Leadership records tracked per member

use crate::member::MemberId;
use serde::{Deserialize, Serialize};

/// Role of a member in the leader-election process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LeaderRole {
    /// Not participating in leader election
    #[default]
    Disabled,
    /// Participating but not holding the lease
    NonLeader,
    /// Holding the leader lease
    Leader,
}

impl LeaderRole {
    /// Check if the role holds the lease
    pub fn is_leader(&self) -> bool {
        matches!(self, LeaderRole::Leader)
    }
}

/// Leadership standing of a single member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadershipRecord {
    /// The member this record describes
    pub member_id: MemberId,

    /// Current role
    pub role: LeaderRole,

    /// When the member was elected, epoch millis (0 when never elected)
    pub elected_at: i64,
}

impl LeadershipRecord {
    /// A member outside the election process
    pub fn disabled(member_id: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            role: LeaderRole::Disabled,
            elected_at: 0,
        }
    }

    /// A campaigning member that does not hold the lease
    pub fn non_leader(member_id: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            role: LeaderRole::NonLeader,
            elected_at: 0,
        }
    }

    /// The lease holder
    pub fn leader(member_id: impl Into<String>, elected_at: i64) -> Self {
        Self {
            member_id: member_id.into(),
            role: LeaderRole::Leader,
            elected_at,
        }
    }
}
