//! Immutable cluster state and its pure transitions
//!
//! `ClusterState` is a value: every transition consumes a reference and
//! returns a fresh state plus the delta events describing what changed.
//! No I/O happens here; the reconciler worker is the only code that commits
//! a transitioned state, which is what makes concurrent readers safe.

use crate::clock::Clock;
use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, Result};
use crate::event::{ClusterChangeEvent, LeaderElectionEvent, MembershipEvent, StreamKind};
use crate::leadership::{LeaderRole, LeadershipRecord};
use crate::member::{ClusterMember, MemberId, MemberRevision};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A transitioned state together with the deltas the transition produced
pub type Transitioned = (ClusterState, Vec<ClusterChangeEvent>);

/// Immutable snapshot of local and sibling membership plus leadership
#[derive(Debug, Clone)]
pub struct ClusterState {
    local: MemberRevision<ClusterMember>,
    local_leadership: MemberRevision<LeadershipRecord>,
    siblings: HashMap<MemberId, MemberRevision<ClusterMember>>,
    current_leader: Option<MemberRevision<LeadershipRecord>>,
    /// Desired participation in leader election
    in_leader_election_process: bool,
    /// Whether a substrate campaign is believed to be running
    campaign_active: bool,
    clock: Arc<dyn Clock>,
    config: ConnectorConfig,
}

impl ClusterState {
    /// Create the initial state for `initial` (revision 0, unregistered,
    /// leadership disabled)
    pub fn new(initial: ClusterMember, config: ConnectorConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.wall_time_millis();
        let member_id = initial.member_id.clone();
        Self {
            local: MemberRevision::new(initial, 0, now),
            local_leadership: MemberRevision::new(LeadershipRecord::disabled(member_id), 0, now),
            siblings: HashMap::new(),
            current_leader: None,
            in_leader_election_process: false,
            campaign_active: false,
            clock,
            config,
        }
    }

    // ==================== Accessors ====================

    /// The local member revision
    pub fn local(&self) -> &MemberRevision<ClusterMember> {
        &self.local
    }

    /// The local member id
    pub fn local_member_id(&self) -> &str {
        &self.local.current.member_id
    }

    /// The local leadership revision
    pub fn local_leadership(&self) -> &MemberRevision<LeadershipRecord> {
        &self.local_leadership
    }

    /// All sibling revisions, including stale ones
    pub fn siblings(&self) -> &HashMap<MemberId, MemberRevision<ClusterMember>> {
        &self.siblings
    }

    /// Sibling revisions younger than the stale threshold
    pub fn non_stale_siblings(&self) -> HashMap<MemberId, MemberRevision<ClusterMember>> {
        let now = self.now_millis();
        self.siblings
            .iter()
            .filter(|(_, rev)| !self.is_stale_at(rev, now))
            .map(|(id, rev)| (id.clone(), rev.clone()))
            .collect()
    }

    /// The substrate-reported current leader, if any
    pub fn find_current_leader(&self) -> Option<&MemberRevision<LeadershipRecord>> {
        self.current_leader.as_ref()
    }

    /// Whether this member wants to participate in leader election
    pub fn in_leader_election_process(&self) -> bool {
        self.in_leader_election_process
    }

    /// Whether a substrate campaign is believed to be running
    pub fn campaign_active(&self) -> bool {
        self.campaign_active
    }

    /// Whether this member currently holds the leader lease
    pub fn is_local_leader(&self) -> bool {
        self.local_leadership.current.role.is_leader()
    }

    /// The injected configuration
    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Current wall-clock time from the injected clock
    pub fn now_millis(&self) -> i64 {
        self.clock.wall_time_millis()
    }

    fn is_stale_at(&self, rev: &MemberRevision<ClusterMember>, now: i64) -> bool {
        now - rev.timestamp > self.config.stale_threshold.as_millis() as i64
    }

    /// Whether any sibling is older than the purge threshold
    pub fn has_expired_siblings(&self) -> bool {
        let cutoff = self.now_millis() - self.config.purge_threshold().as_millis() as i64;
        self.siblings.values().any(|rev| rev.timestamp < cutoff)
    }

    /// Build the snapshot delta emitted to new event-stream subscribers
    pub fn snapshot_event(&self) -> ClusterChangeEvent {
        ClusterChangeEvent::Snapshot {
            local: self.local.clone(),
            siblings: self.non_stale_siblings().into_values().collect(),
            leader: self.current_leader.clone(),
        }
    }

    // ==================== Transitions ====================

    /// Replace the local member record (registration, heartbeat, label
    /// change). Rejects revisions older than the retained one.
    pub fn set_local_member(&self, revision: MemberRevision<ClusterMember>) -> Result<Transitioned> {
        if revision.current.member_id != self.local.current.member_id {
            return Err(ConnectorError::InvalidTransition(format!(
                "local record for {} cannot be replaced by a record for {}",
                self.local.current.member_id, revision.current.member_id
            )));
        }
        if revision.revision < self.local.revision {
            return Err(ConnectorError::InvalidTransition(format!(
                "local revision went backwards: {} -> {}",
                self.local.revision, revision.revision
            )));
        }
        let mut next = self.clone();
        next.local = revision.clone();
        Ok((next, vec![ClusterChangeEvent::LocalUpdated(revision)]))
    }

    /// Replace the local leadership record. Emits a delta only on role change.
    pub fn set_local_leadership(
        &self,
        revision: MemberRevision<LeadershipRecord>,
    ) -> Result<Transitioned> {
        let role_changed = revision.current.role != self.local_leadership.current.role;
        let mut next = self.clone();
        next.local_leadership = revision.clone();
        let events = if role_changed {
            vec![ClusterChangeEvent::LocalLeadershipUpdated(revision)]
        } else {
            vec![]
        };
        Ok((next, events))
    }

    /// Mark whether this member wants to participate in leader election
    pub fn set_in_leader_election_process(&self, desired: bool) -> Transitioned {
        let mut next = self.clone();
        next.in_leader_election_process = desired;
        (next, vec![])
    }

    /// Record that we deliberately started a campaign on the substrate.
    ///
    /// A member that was outside the election process becomes a non-leader
    /// participant.
    pub fn with_campaign_started(&self) -> Transitioned {
        let (mut next, events) = self.with_campaign_confirmed();
        next.in_leader_election_process = true;
        (next, events)
    }

    /// Record that the substrate confirmed a running campaign.
    ///
    /// Does not touch the desired participation flag: a stale confirmation
    /// arriving after a deliberate leave must not re-enter us.
    pub fn with_campaign_confirmed(&self) -> Transitioned {
        let mut next = self.clone();
        next.campaign_active = true;
        let mut events = Vec::new();
        if next.local_leadership.current.role == LeaderRole::Disabled {
            let rev = MemberRevision::new(
                LeadershipRecord::non_leader(self.local_member_id()),
                self.local_leadership.revision + 1,
                self.now_millis(),
            );
            next.local_leadership = rev.clone();
            events.push(ClusterChangeEvent::LocalLeadershipUpdated(rev));
        }
        (next, events)
    }

    /// Record that the campaign was stopped deliberately.
    ///
    /// Drops any leadership standing we held.
    pub fn with_campaign_stopped(&self) -> Transitioned {
        let mut next = self.clone();
        next.in_leader_election_process = false;
        next.campaign_active = false;
        let events = next.drop_leadership_standing(LeaderRole::NonLeader);
        (next, events)
    }

    /// Mark the local record unregistered and drop all leadership standing.
    ///
    /// `campaign_active` is left as observed: if a campaign still runs on the
    /// substrate, the next long cycle issues the actual leave.
    pub fn with_local_unregistered(
        &self,
        revision: MemberRevision<ClusterMember>,
    ) -> Result<Transitioned> {
        let (mut next, mut events) = self.set_local_member(revision)?;
        next.in_leader_election_process = false;
        events.extend(next.drop_leadership_standing(LeaderRole::Disabled));
        Ok((next, events))
    }

    /// Demote the local leadership record to `role` and forget a
    /// self-pointing leader. Mutates in place; returns the deltas.
    fn drop_leadership_standing(&mut self, role: LeaderRole) -> Vec<ClusterChangeEvent> {
        let mut events = Vec::new();
        if self.local_leadership.current.role != role {
            let record = LeadershipRecord {
                member_id: self.local.current.member_id.clone(),
                role,
                elected_at: 0,
            };
            let rev = MemberRevision::new(
                record,
                self.local_leadership.revision + 1,
                self.clock.wall_time_millis(),
            );
            self.local_leadership = rev.clone();
            events.push(ClusterChangeEvent::LocalLeadershipUpdated(rev));
        }
        if let Some(leader) = &self.current_leader {
            if leader.current.member_id == self.local.current.member_id {
                let id = leader.current.member_id.clone();
                self.current_leader = None;
                events.push(ClusterChangeEvent::LeaderLost(id));
            }
        }
        events
    }

    /// Merge one membership watch event.
    ///
    /// Events carrying the local member id are the substrate echoing our own
    /// writes and never overwrite the authoritative local revision.
    pub fn process_membership_event(&self, event: MembershipEvent) -> Result<Transitioned> {
        match event {
            MembershipEvent::SiblingAdded(rev) | MembershipEvent::SiblingUpdated(rev) => {
                if rev.current.member_id == self.local.current.member_id {
                    debug!(member_id = %rev.current.member_id, "Ignoring echo of the local record");
                    return Ok((self.clone(), vec![]));
                }
                Ok(self.merge_sibling(rev))
            }
            MembershipEvent::SiblingRemoved(member_id) => {
                if member_id == self.local.current.member_id {
                    return Ok((self.clone(), vec![]));
                }
                let mut next = self.clone();
                if next.siblings.remove(&member_id).is_some() {
                    Ok((next, vec![ClusterChangeEvent::SiblingRemoved(member_id)]))
                } else {
                    Ok((next, vec![]))
                }
            }
            MembershipEvent::SnapshotEnd => Ok((self.clone(), vec![])),
            MembershipEvent::Disconnected { cause } => Ok((
                self.clone(),
                vec![ClusterChangeEvent::Disconnected {
                    stream: StreamKind::Membership,
                    cause,
                }],
            )),
        }
    }

    fn merge_sibling(&self, rev: MemberRevision<ClusterMember>) -> Transitioned {
        let member_id = rev.current.member_id.clone();
        match self.siblings.get(&member_id) {
            Some(existing) if !rev.supersedes(existing) => (self.clone(), vec![]),
            Some(_) => {
                let mut next = self.clone();
                next.siblings.insert(member_id, rev.clone());
                (next, vec![ClusterChangeEvent::SiblingUpdated(rev)])
            }
            None => {
                let mut next = self.clone();
                next.siblings.insert(member_id, rev.clone());
                (next, vec![ClusterChangeEvent::SiblingAdded(rev)])
            }
        }
    }

    /// Merge one leader-election watch event
    pub fn process_leader_election_event(&self, event: LeaderElectionEvent) -> Result<Transitioned> {
        match event {
            LeaderElectionEvent::LeaderElected(rev) => self.apply_leader_elected(rev),
            LeaderElectionEvent::LeaderLost(member_id) => self.apply_leader_lost(member_id),
            LeaderElectionEvent::LocalJoined => Ok(self.with_campaign_confirmed()),
            LeaderElectionEvent::LocalLeft => {
                // The substrate ended our campaign; keep the desired flag so
                // housekeeping can re-join if the caller still wants in.
                let mut next = self.clone();
                next.campaign_active = false;
                let mut events = Vec::new();
                if next.local_leadership.current.role == LeaderRole::Leader {
                    let rev = MemberRevision::new(
                        LeadershipRecord::non_leader(self.local_member_id()),
                        self.local_leadership.revision + 1,
                        self.now_millis(),
                    );
                    next.local_leadership = rev.clone();
                    events.push(ClusterChangeEvent::LocalLeadershipUpdated(rev));
                }
                Ok((next, events))
            }
            LeaderElectionEvent::Disconnected { cause } => {
                // Campaign liveness is unknown across a disconnect; assume it
                // is gone so the next long cycle re-joins when desired.
                let mut next = self.clone();
                next.campaign_active = false;
                Ok((
                    next,
                    vec![ClusterChangeEvent::Disconnected {
                        stream: StreamKind::LeaderElection,
                        cause,
                    }],
                ))
            }
        }
    }

    fn apply_leader_elected(&self, rev: MemberRevision<LeadershipRecord>) -> Result<Transitioned> {
        if let Some(existing) = &self.current_leader {
            if existing.current.member_id == rev.current.member_id && !rev.supersedes(existing) {
                return Ok((self.clone(), vec![]));
            }
        }
        let mut next = self.clone();
        next.current_leader = Some(rev.clone());
        let mut events = vec![ClusterChangeEvent::LeaderElected(rev.clone())];
        if rev.current.member_id == self.local.current.member_id {
            let local_rev = MemberRevision::new(
                LeadershipRecord::leader(self.local_member_id(), rev.current.elected_at),
                self.local_leadership.revision + 1,
                rev.timestamp,
            );
            if !self.local_leadership.current.role.is_leader() {
                events.push(ClusterChangeEvent::LocalLeadershipUpdated(local_rev.clone()));
            }
            next.local_leadership = local_rev;
        } else if self.local_leadership.current.role.is_leader() {
            // Another member took the lease from us
            let local_rev = MemberRevision::new(
                LeadershipRecord::non_leader(self.local_member_id()),
                self.local_leadership.revision + 1,
                rev.timestamp,
            );
            events.push(ClusterChangeEvent::LocalLeadershipUpdated(local_rev.clone()));
            next.local_leadership = local_rev;
        }
        Ok((next, events))
    }

    fn apply_leader_lost(&self, member_id: MemberId) -> Result<Transitioned> {
        let mut next = self.clone();
        let mut events = Vec::new();
        if let Some(existing) = &self.current_leader {
            if existing.current.member_id == member_id {
                next.current_leader = None;
                events.push(ClusterChangeEvent::LeaderLost(member_id.clone()));
            }
        }
        if member_id == self.local.current.member_id
            && self.local_leadership.current.role.is_leader()
        {
            let rev = MemberRevision::new(
                LeadershipRecord::non_leader(self.local_member_id()),
                self.local_leadership.revision + 1,
                self.now_millis(),
            );
            next.local_leadership = rev.clone();
            events.push(ClusterChangeEvent::LocalLeadershipUpdated(rev));
        }
        Ok((next, events))
    }

    /// Drop siblings older than the purge threshold.
    ///
    /// Entries this old are assumed dead even if the substrate never emitted
    /// a removal for them.
    pub fn purge_expired_siblings(&self) -> Transitioned {
        let cutoff = self.now_millis() - self.config.purge_threshold().as_millis() as i64;
        let mut next = self.clone();
        let mut events = Vec::new();
        next.siblings.retain(|member_id, rev| {
            if rev.timestamp < cutoff {
                events.push(ClusterChangeEvent::SiblingRemoved(member_id.clone()));
                false
            } else {
                true
            }
        });
        (next, events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn test_state(clock: ManualClock) -> ClusterState {
        let config = ConnectorConfig::builder()
            .stale_threshold(Duration::from_millis(1_000))
            .stale_purge_multiplier(3)
            .build();
        ClusterState::new(ClusterMember::new("local"), config, Arc::new(clock))
    }

    fn sibling(id: &str, revision: u64, timestamp: i64) -> MemberRevision<ClusterMember> {
        MemberRevision::new(ClusterMember::new(id).with_active(true), revision, timestamp)
    }

    #[test]
    fn test_local_echo_is_ignored() {
        let state = test_state(ManualClock::new(0));
        let echo = MembershipEvent::SiblingAdded(sibling("local", 7, 10));

        let (next, events) = state.process_membership_event(echo).unwrap();
        assert!(next.siblings().is_empty());
        assert!(events.is_empty());
        assert_eq!(next.local().revision, 0);
    }

    #[test]
    fn test_sibling_merge_keeps_higher_revision() {
        let state = test_state(ManualClock::new(0));
        let (state, events) = state
            .process_membership_event(MembershipEvent::SiblingAdded(sibling("a", 2, 10)))
            .unwrap();
        assert!(matches!(events[0], ClusterChangeEvent::SiblingAdded(_)));

        // A lower revision arriving late is discarded
        let (state, events) = state
            .process_membership_event(MembershipEvent::SiblingUpdated(sibling("a", 1, 99)))
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(state.siblings()["a"].revision, 2);

        let (state, events) = state
            .process_membership_event(MembershipEvent::SiblingUpdated(sibling("a", 3, 11)))
            .unwrap();
        assert!(matches!(events[0], ClusterChangeEvent::SiblingUpdated(_)));
        assert_eq!(state.siblings()["a"].revision, 3);
    }

    #[test]
    fn test_equal_revision_and_timestamp_keeps_existing() {
        let state = test_state(ManualClock::new(0));
        let first = sibling("a", 1, 10);
        let (state, _) = state
            .process_membership_event(MembershipEvent::SiblingAdded(first))
            .unwrap();

        let mut replay = sibling("a", 1, 10);
        replay.current.active = false;
        let (state, events) = state
            .process_membership_event(MembershipEvent::SiblingUpdated(replay))
            .unwrap();
        assert!(events.is_empty());
        assert!(state.siblings()["a"].current.active);
    }

    #[test]
    fn test_stale_sibling_filtered_not_dropped() {
        let clock = ManualClock::new(0);
        let state = test_state(clock.clone());
        let (state, _) = state
            .process_membership_event(MembershipEvent::SiblingAdded(sibling("a", 1, 0)))
            .unwrap();

        clock.advance(Duration::from_millis(2_000));
        assert!(state.non_stale_siblings().is_empty());
        assert_eq!(state.siblings().len(), 1);
        assert!(!state.has_expired_siblings());
    }

    #[test]
    fn test_purge_drops_expired_siblings() {
        let clock = ManualClock::new(0);
        let state = test_state(clock.clone());
        let (state, _) = state
            .process_membership_event(MembershipEvent::SiblingAdded(sibling("a", 1, 0)))
            .unwrap();

        clock.advance(Duration::from_millis(4_000));
        assert!(state.has_expired_siblings());

        let (state, events) = state.purge_expired_siblings();
        assert!(state.siblings().is_empty());
        assert!(matches!(&events[0], ClusterChangeEvent::SiblingRemoved(id) if id == "a"));
    }

    #[test]
    fn test_local_revision_must_not_go_backwards() {
        let state = test_state(ManualClock::new(0));
        let (state, _) = state
            .set_local_member(MemberRevision::new(ClusterMember::new("local"), 5, 10))
            .unwrap();

        let err = state
            .set_local_member(MemberRevision::new(ClusterMember::new("local"), 4, 11))
            .unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn test_leader_elected_self_raises_local_leadership() {
        let state = test_state(ManualClock::new(0));
        let rev = MemberRevision::new(LeadershipRecord::leader("local", 50), 1, 50);

        let (state, events) = state
            .process_leader_election_event(LeaderElectionEvent::LeaderElected(rev))
            .unwrap();
        assert!(state.is_local_leader());
        assert_eq!(
            state.find_current_leader().unwrap().current.member_id,
            "local"
        );
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_leader_lost_clears_current_leader() {
        let state = test_state(ManualClock::new(0));
        let rev = MemberRevision::new(LeadershipRecord::leader("other", 50), 1, 50);
        let (state, _) = state
            .process_leader_election_event(LeaderElectionEvent::LeaderElected(rev))
            .unwrap();

        let (state, events) = state
            .process_leader_election_event(LeaderElectionEvent::LeaderLost("other".into()))
            .unwrap();
        assert!(state.find_current_leader().is_none());
        assert!(matches!(&events[0], ClusterChangeEvent::LeaderLost(id) if id == "other"));
    }

    #[test]
    fn test_disconnect_clears_campaign_liveness() {
        let state = test_state(ManualClock::new(0));
        let (state, _) = state.with_campaign_started();
        assert!(state.campaign_active());

        let (state, events) = state
            .process_leader_election_event(LeaderElectionEvent::Disconnected {
                cause: "watch expired".into(),
            })
            .unwrap();
        assert!(!state.campaign_active());
        assert!(state.in_leader_election_process());
        assert!(matches!(
            events[0],
            ClusterChangeEvent::Disconnected {
                stream: StreamKind::LeaderElection,
                ..
            }
        ));
    }

    #[test]
    fn test_campaign_stopped_drops_leadership() {
        let state = test_state(ManualClock::new(0));
        let (state, _) = state.with_campaign_started();
        let rev = MemberRevision::new(LeadershipRecord::leader("local", 50), 1, 50);
        let (state, _) = state
            .process_leader_election_event(LeaderElectionEvent::LeaderElected(rev))
            .unwrap();

        let (state, events) = state.with_campaign_stopped();
        assert!(!state.in_leader_election_process());
        assert!(!state.is_local_leader());
        assert!(state.find_current_leader().is_none());
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_set_local_leadership_emits_only_on_role_change() {
        let state = test_state(ManualClock::new(0));

        let promoted = MemberRevision::new(LeadershipRecord::non_leader("local"), 1, 10);
        let (state, events) = state.set_local_leadership(promoted).unwrap();
        assert_eq!(events.len(), 1);

        // Same role, newer revision: record advances silently
        let refreshed = MemberRevision::new(LeadershipRecord::non_leader("local"), 2, 20);
        let (state, events) = state.set_local_leadership(refreshed).unwrap();
        assert!(events.is_empty());
        assert_eq!(state.local_leadership().revision, 2);
    }

    #[test]
    fn test_snapshot_event_reflects_accessors() {
        let clock = ManualClock::new(0);
        let state = test_state(clock.clone());
        let (state, _) = state
            .process_membership_event(MembershipEvent::SiblingAdded(sibling("a", 1, 0)))
            .unwrap();

        match state.snapshot_event() {
            ClusterChangeEvent::Snapshot {
                local,
                siblings,
                leader,
            } => {
                assert_eq!(local.current.member_id, "local");
                assert_eq!(siblings.len(), 1);
                assert!(leader.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
