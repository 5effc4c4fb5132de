//! Periodic convergence actions
//!
//! Consulted by the reconciler once per long cycle. Emits at most one of
//! each action, in a fixed order: heartbeat, stale-sibling purge, leadership
//! reconciliation.

use crate::actions;
use crate::reconciler::{ReconcileAction, ReconcilerActionsProvider};
use crate::state::ClusterState;
use crate::substrate::SubstrateContext;
use tracing::debug;

/// Default housekeeping provider
pub struct Housekeeping {
    ctx: SubstrateContext,
}

impl Housekeeping {
    pub fn new(ctx: SubstrateContext) -> Self {
        Self { ctx }
    }
}

impl ReconcilerActionsProvider for Housekeeping {
    fn plan(&mut self, state: &ClusterState) -> Vec<ReconcileAction> {
        let mut planned = Vec::new();
        let now = state.now_millis();
        let config = state.config();

        // Keep the registered record fresh so siblings never see us stale
        let local = state.local();
        if local.current.registered
            && now - local.timestamp >= config.heartbeat_interval.as_millis() as i64
        {
            planned.push(ReconcileAction::new(
                "heartbeat",
                actions::refresh_local(self.ctx.clone()),
            ));
        }

        // Entries past the purge threshold are dead even without a removal
        // event from the substrate
        if state.has_expired_siblings() {
            planned.push(ReconcileAction::new(
                "purge-stale-siblings",
                actions::purge_stale_siblings(),
            ));
        }

        // Realign campaign liveness with the desired participation
        if state.in_leader_election_process() && !state.campaign_active() {
            debug!("Campaign lost (stream reconnect or substrate restart); re-joining");
            planned.push(ReconcileAction::new(
                "rejoin-leader-election",
                actions::join_leadership_group(self.ctx.clone()),
            ));
        } else if !state.in_leader_election_process() && state.campaign_active() {
            planned.push(ReconcileAction::new(
                "leave-leader-election",
                actions::leave_leadership_group(self.ctx.clone(), false),
            ));
        }

        planned
    }
}
