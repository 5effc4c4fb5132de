//! Connector facade - the public API of the crate
//!
//! Wires the reconciler, the housekeeping provider, and the two watch
//! supervisors together. Every mutating operation is a thin wrapper that
//! submits an action to the reconciler and resolves with data read from the
//! committed state.

use crate::actions;
use crate::clock::{Clock, SystemClock};
use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, Result};
use crate::event::ClusterChangeEvent;
use crate::housekeeping::Housekeeping;
use crate::leadership::LeadershipRecord;
use crate::member::{ClusterMember, MemberId, MemberRevision};
use crate::reconciler::Reconciler;
use crate::state::ClusterState;
use crate::substrate::{LeaderElectionExecutor, MembershipExecutor, SubstrateContext};
use crate::supervisor;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Cluster membership and leader election over an injected substrate.
///
/// Construction spawns the reconciler worker and both watch supervisors, so
/// it must happen inside a Tokio runtime. `shutdown()` releases everything;
/// it is safe to call more than once.
pub struct MembershipConnector {
    reconciler: Arc<Reconciler>,
    ctx: SubstrateContext,
    config: ConnectorConfig,
    shutdown_tx: watch::Sender<bool>,
    /// Supervisors and the update logger, in acquisition order
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl MembershipConnector {
    /// Create a connector for `initial` using the system wall clock
    pub fn new(
        initial: ClusterMember,
        membership: Arc<dyn MembershipExecutor>,
        leader_election: Arc<dyn LeaderElectionExecutor>,
        config: ConnectorConfig,
    ) -> Result<Self> {
        Self::with_clock(
            initial,
            membership,
            leader_election,
            config,
            Arc::new(SystemClock),
        )
    }

    /// Create a connector with an injected clock
    pub fn with_clock(
        initial: ClusterMember,
        membership: Arc<dyn MembershipExecutor>,
        leader_election: Arc<dyn LeaderElectionExecutor>,
        config: ConnectorConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let member_id = initial.member_id.clone();
        let ctx = SubstrateContext::new(membership, leader_election);

        let state = ClusterState::new(initial, config.clone(), clock);
        let reconciler = Arc::new(Reconciler::spawn(
            state,
            Box::new(Housekeeping::new(ctx.clone())),
            config.reconciler_quick_cycle,
            config.reconciler_long_cycle,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            supervisor::spawn_membership(
                reconciler.clone(),
                ctx.clone(),
                config.reconnect_interval,
                shutdown_rx.clone(),
            ),
            supervisor::spawn_leader_election(
                reconciler.clone(),
                ctx.clone(),
                config.reconnect_interval,
                shutdown_rx.clone(),
            ),
            Self::spawn_update_logger(reconciler.clone(), shutdown_rx),
        ];

        info!(member_id = %member_id, "Cluster membership connector started");
        Ok(Self {
            reconciler,
            ctx,
            config,
            shutdown_tx,
            tasks: Mutex::new(tasks),
            shutting_down: AtomicBool::new(false),
        })
    }

    fn spawn_update_logger(
        reconciler: Arc<Reconciler>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut updates = reconciler.changes();
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    update = updates.next() => match update {
                        Some(update) if !update.delta_events.is_empty() => {
                            debug!(deltas = ?update.delta_events, "Reconciler update");
                        }
                        Some(_) => {}
                        None => return,
                    }
                }
            }
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(ConnectorError::ShuttingDown);
        }
        Ok(())
    }

    // ==================== Accessors ====================

    /// The local member revision as last committed
    pub fn local_member_revision(&self) -> MemberRevision<ClusterMember> {
        self.reconciler.current().local().clone()
    }

    /// Sibling revisions younger than the stale threshold
    pub fn sibling_revisions(&self) -> HashMap<MemberId, MemberRevision<ClusterMember>> {
        self.reconciler.current().non_stale_siblings()
    }

    /// The local leadership standing
    pub fn local_leadership_revision(&self) -> MemberRevision<LeadershipRecord> {
        self.reconciler.current().local_leadership().clone()
    }

    /// The substrate-reported current leader, if any
    pub fn find_current_leader(&self) -> Option<MemberRevision<LeadershipRecord>> {
        self.reconciler.current().find_current_leader().cloned()
    }

    /// The full committed state (diagnostics)
    pub fn current_state(&self) -> Arc<ClusterState> {
        self.reconciler.current()
    }

    // ==================== Operations ====================

    /// Write the local record to the substrate registry.
    ///
    /// `self_update` receives the current local member and produces the next
    /// revision; the caller owns revision numbering. Resolves with the
    /// committed (substrate-echoed) local revision.
    pub async fn register<F>(&self, self_update: F) -> Result<MemberRevision<ClusterMember>>
    where
        F: FnOnce(ClusterMember) -> MemberRevision<ClusterMember> + Send + 'static,
    {
        self.ensure_open()?;
        let state = self
            .reconciler
            .apply(actions::register_local(
                self.ctx.clone(),
                Box::new(self_update),
            ))
            .await?;
        Ok(state.local().clone())
    }

    /// Delete the local record from the substrate registry
    pub async fn unregister<F>(&self, self_update: F) -> Result<MemberRevision<ClusterMember>>
    where
        F: FnOnce(ClusterMember) -> MemberRevision<ClusterMember> + Send + 'static,
    {
        self.ensure_open()?;
        let state = self
            .reconciler
            .apply(actions::unregister_local(
                self.ctx.clone(),
                Box::new(self_update),
            ))
            .await?;
        Ok(state.local().clone())
    }

    /// Enter the leader-election process
    pub async fn join_leadership_group(&self) -> Result<()> {
        self.ensure_open()?;
        self.reconciler
            .apply(actions::join_leadership_group(self.ctx.clone()))
            .await?;
        Ok(())
    }

    /// Leave the leader-election process.
    ///
    /// With `only_non_leader`, a member holding the lease declines to leave.
    /// Resolves with whether we are out of the election process afterwards.
    pub async fn leave_leadership_group(&self, only_non_leader: bool) -> Result<bool> {
        self.ensure_open()?;
        let state = self
            .reconciler
            .apply(actions::leave_leadership_group(
                self.ctx.clone(),
                only_non_leader,
            ))
            .await?;
        Ok(!state.in_leader_election_process())
    }

    /// Stream of cluster change events.
    ///
    /// The first emission is a full snapshot; every following emission is a
    /// per-commit delta. Replaying the snapshot plus the deltas reconstructs
    /// the state observable through the accessors. The stream completes on
    /// shutdown.
    pub fn membership_change_events(&self) -> BoxStream<'static, ClusterChangeEvent> {
        self.reconciler
            .changes()
            .enumerate()
            .flat_map(|(index, update)| {
                let events = if index == 0 {
                    vec![update.snapshot.snapshot_event()]
                } else {
                    update.delta_events
                };
                futures::stream::iter(events)
            })
            .boxed()
    }

    /// Stop the connector: refuse new operations, drain queued work within
    /// the configured grace, stop both watch supervisors, complete the event
    /// stream, and release the worker. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down cluster membership connector");
        let _ = self.shutdown_tx.send(true);

        // Release in reverse acquisition order: logger and supervisors
        // first, then the reconciler worker
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for mut task in tasks.into_iter().rev() {
            if tokio::time::timeout(self.config.shutdown_grace, &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
        }
        self.reconciler.shutdown(self.config.shutdown_grace).await;
        info!("Cluster membership connector stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{LeaderElectionEvent, MembershipEvent};
    use async_trait::async_trait;

    struct InertMembership;

    #[async_trait]
    impl MembershipExecutor for InertMembership {
        async fn write_member_record(
            &self,
            revision: MemberRevision<ClusterMember>,
        ) -> Result<MemberRevision<ClusterMember>> {
            Ok(revision)
        }

        async fn delete_member_record(&self, _member_id: &str) -> Result<()> {
            Ok(())
        }

        fn watch_membership_events(&self) -> BoxStream<'static, MembershipEvent> {
            futures::stream::pending().boxed()
        }
    }

    struct InertElection;

    #[async_trait]
    impl LeaderElectionExecutor for InertElection {
        async fn join_leader_election(&self, _member_id: &str) -> Result<()> {
            Ok(())
        }

        async fn leave_leader_election(&self) -> Result<()> {
            Ok(())
        }

        fn watch_leader_election_process_updates(
            &self,
        ) -> BoxStream<'static, LeaderElectionEvent> {
            futures::stream::pending().boxed()
        }
    }

    fn test_connector() -> MembershipConnector {
        MembershipConnector::new(
            ClusterMember::new("local"),
            Arc::new(InertMembership),
            Arc::new(InertElection),
            ConnectorConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_initial_accessors() {
        let connector = test_connector();

        assert_eq!(connector.local_member_revision().revision, 0);
        assert!(!connector.local_member_revision().current.registered);
        assert!(connector.sibling_revisions().is_empty());
        assert!(connector.find_current_leader().is_none());
        assert!(!connector.current_state().in_leader_election_process());

        connector.shutdown().await;
    }

    #[tokio::test]
    async fn test_operations_fail_after_shutdown() {
        let connector = test_connector();
        connector.shutdown().await;
        connector.shutdown().await; // idempotent

        let err = connector
            .register(|m| MemberRevision::new(m, 1, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::ShuttingDown));

        let err = connector.join_leadership_group().await.unwrap_err();
        assert!(matches!(err, ConnectorError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = ConnectorConfig::builder().stale_purge_multiplier(1).build();
        let result = MembershipConnector::new(
            ClusterMember::new("local"),
            Arc::new(InertMembership),
            Arc::new(InertElection),
            config,
        );
        assert!(result.is_err());
    }
}
