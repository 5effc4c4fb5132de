//! Factories for substrate actions
//!
//! Each factory is pure: given the state at execution time it produces the
//! side effect to run against the substrate and, on success, the transition
//! to commit. The reconciler worker is the only caller of the produced
//! values, so two substrate actions never run concurrently.

use crate::member::{ClusterMember, MemberRevision};
use crate::reconciler::{transition_only, ActionFuture, ActionProducer, Transition};
use crate::state::ClusterState;
use crate::substrate::SubstrateContext;
use futures::future;

/// Caller-supplied mutator producing the next local revision.
///
/// The caller owns revision numbering; the registration actions only force
/// the `registered` flag to match the operation.
pub type SelfUpdate = Box<dyn FnOnce(ClusterMember) -> MemberRevision<ClusterMember> + Send>;

fn identity() -> Transition {
    Box::new(|state: &ClusterState| Ok((state.clone(), Vec::new())))
}

/// Write the caller-updated local record to the substrate and install the
/// echoed revision
pub fn register_local(ctx: SubstrateContext, self_update: SelfUpdate) -> ActionProducer {
    Box::new(move |state: &ClusterState| -> ActionFuture {
        let mut revision = self_update(state.local().current.clone());
        revision.current.registered = true;
        let membership = ctx.membership;
        Box::pin(async move {
            let mut echoed = membership.write_member_record(revision).await?;
            echoed.current.registered = true;
            Ok(Box::new(move |state: &ClusterState| state.set_local_member(echoed)) as Transition)
        })
    })
}

/// Delete the local record from the substrate and drop leadership standing
pub fn unregister_local(ctx: SubstrateContext, self_update: SelfUpdate) -> ActionProducer {
    Box::new(move |state: &ClusterState| -> ActionFuture {
        let mut revision = self_update(state.local().current.clone());
        revision.current.registered = false;
        let member_id = state.local().current.member_id.clone();
        let membership = ctx.membership;
        Box::pin(async move {
            membership.delete_member_record(&member_id).await?;
            Ok(
                Box::new(move |state: &ClusterState| state.with_local_unregistered(revision))
                    as Transition,
            )
        })
    })
}

/// Start a leader-election campaign; no-op when one is already observed
pub fn join_leadership_group(ctx: SubstrateContext) -> ActionProducer {
    Box::new(move |state: &ClusterState| -> ActionFuture {
        if state.campaign_active() {
            // Already campaigning; only reaffirm the desired flag
            return Box::pin(future::ready(Ok(Box::new(|state: &ClusterState| {
                Ok(state.with_campaign_started())
            }) as Transition)));
        }
        let member_id = state.local().current.member_id.clone();
        let leader_election = ctx.leader_election;
        Box::pin(async move {
            leader_election.join_leader_election(&member_id).await?;
            Ok(
                Box::new(|state: &ClusterState| Ok(state.with_campaign_started()))
                    as Transition,
            )
        })
    })
}

/// Stop the campaign.
///
/// With `only_non_leader`, a member holding the lease declines to leave: the
/// side effect is skipped and the transition is identity.
pub fn leave_leadership_group(ctx: SubstrateContext, only_non_leader: bool) -> ActionProducer {
    Box::new(move |state: &ClusterState| -> ActionFuture {
        if only_non_leader && state.is_local_leader() {
            return Box::pin(future::ready(Ok(identity())));
        }
        let leader_election = ctx.leader_election;
        Box::pin(async move {
            leader_election.leave_leader_election().await?;
            Ok(
                Box::new(|state: &ClusterState| Ok(state.with_campaign_stopped()))
                    as Transition,
            )
        })
    })
}

/// Rewrite the local record with a bumped revision and fresh timestamp
pub fn refresh_local(ctx: SubstrateContext) -> ActionProducer {
    Box::new(move |state: &ClusterState| -> ActionFuture {
        let mut revision = state.local().clone();
        revision.revision += 1;
        revision.timestamp = state.now_millis();
        let membership = ctx.membership;
        Box::pin(async move {
            let mut echoed = membership.write_member_record(revision).await?;
            echoed.current.registered = true;
            Ok(Box::new(move |state: &ClusterState| state.set_local_member(echoed)) as Transition)
        })
    })
}

/// Drop siblings past the purge threshold; no substrate side effect
pub fn purge_stale_siblings() -> ActionProducer {
    transition_only(|state: &ClusterState| Ok(state.purge_expired_siblings()))
}
