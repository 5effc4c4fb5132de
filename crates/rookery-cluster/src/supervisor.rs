//! Substrate watch supervision
//!
//! One loop per stream: subscribe, forward every event to the reconciler as
//! a transition-only action, and when the stream disconnects or completes,
//! sleep the flat reconnect delay and resubscribe. Clean completion is
//! treated as transient; the substrate owns stream lifetimes, not us.

use crate::event::{LeaderElectionEvent, MembershipEvent, StreamKind};
use crate::observability::StreamMetrics;
use crate::reconciler::{transition_only, Reconciler};
use crate::substrate::SubstrateContext;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Spawn the supervision task for the membership watch
pub(crate) fn spawn_membership(
    reconciler: Arc<Reconciler>,
    ctx: SubstrateContext,
    reconnect_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let membership = ctx.membership;
        supervise(
            StreamKind::Membership,
            reconciler,
            move || membership.watch_membership_events(),
            forward_membership,
            reconnect_interval,
            shutdown_rx,
        )
        .await;
    })
}

/// Spawn the supervision task for the leader-election watch
pub(crate) fn spawn_leader_election(
    reconciler: Arc<Reconciler>,
    ctx: SubstrateContext,
    reconnect_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let leader_election = ctx.leader_election;
        supervise(
            StreamKind::LeaderElection,
            reconciler,
            move || leader_election.watch_leader_election_process_updates(),
            forward_leader_election,
            reconnect_interval,
            shutdown_rx,
        )
        .await;
    })
}

/// Forward one membership event; returns true when the stream must be torn
/// down and resubscribed
fn forward_membership(reconciler: &Reconciler, event: MembershipEvent) -> bool {
    let disconnected = matches!(&event, MembershipEvent::Disconnected { .. });
    if let MembershipEvent::Disconnected { cause } = &event {
        info!(
            stream = StreamKind::Membership.as_str(),
            cause = %cause,
            "Substrate event stream disconnected; reconnecting"
        );
    }
    reconciler.submit_background(
        "membership-event",
        transition_only(move |state| state.process_membership_event(event)),
    );
    disconnected
}

fn forward_leader_election(reconciler: &Reconciler, event: LeaderElectionEvent) -> bool {
    let disconnected = matches!(&event, LeaderElectionEvent::Disconnected { .. });
    if let LeaderElectionEvent::Disconnected { cause } = &event {
        info!(
            stream = StreamKind::LeaderElection.as_str(),
            cause = %cause,
            "Substrate event stream disconnected; reconnecting"
        );
    }
    reconciler.submit_background(
        "leader-election-event",
        transition_only(move |state| state.process_leader_election_event(event)),
    );
    disconnected
}

async fn supervise<E, S, F>(
    kind: StreamKind,
    reconciler: Arc<Reconciler>,
    subscribe: S,
    forward: F,
    reconnect_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    E: Send + 'static,
    S: Fn() -> BoxStream<'static, E>,
    F: Fn(&Reconciler, E) -> bool,
{
    loop {
        let mut stream = subscribe();
        debug!(stream = kind.as_str(), "Subscribed to substrate events");

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => return,
                event = stream.next() => match event {
                    Some(event) => {
                        StreamMetrics::increment_events(kind.as_str());
                        if forward(&reconciler, event) {
                            break;
                        }
                    }
                    None => {
                        warn!(
                            stream = kind.as_str(),
                            "Substrate event stream completed; treating as transient and resubscribing"
                        );
                        break;
                    }
                }
            }
        }

        StreamMetrics::increment_reconnects(kind.as_str());
        tokio::select! {
            _ = shutdown_rx.changed() => return,
            _ = tokio::time::sleep(reconnect_interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::ConnectorConfig;
    use crate::error::Result;
    use crate::member::{ClusterMember, MemberRevision};
    use crate::reconciler::{ReconcileAction, ReconcilerActionsProvider};
    use crate::state::ClusterState;
    use crate::substrate::{LeaderElectionExecutor, MembershipExecutor};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;
    use tokio_stream::wrappers::BroadcastStream;

    struct NoActions;

    impl ReconcilerActionsProvider for NoActions {
        fn plan(&mut self, _state: &ClusterState) -> Vec<ReconcileAction> {
            Vec::new()
        }
    }

    /// Membership executor whose watch replays a broadcast channel and counts
    /// subscriptions
    struct ScriptedMembership {
        events_tx: broadcast::Sender<MembershipEvent>,
        watch_calls: AtomicUsize,
    }

    #[async_trait]
    impl MembershipExecutor for ScriptedMembership {
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
            self.watch_calls.fetch_add(1, Ordering::SeqCst);
            BroadcastStream::new(self.events_tx.subscribe())
                .filter_map(|item| futures::future::ready(item.ok()))
                .boxed()
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

    #[tokio::test]
    async fn test_membership_supervisor_forwards_and_resubscribes() {
        let (events_tx, _) = broadcast::channel(16);
        let membership = Arc::new(ScriptedMembership {
            events_tx: events_tx.clone(),
            watch_calls: AtomicUsize::new(0),
        });
        let ctx = SubstrateContext::new(membership.clone(), Arc::new(InertElection));

        let state = ClusterState::new(
            ClusterMember::new("local"),
            ConnectorConfig::default(),
            Arc::new(SystemClock),
        );
        let reconciler = Arc::new(Reconciler::spawn(
            state,
            Box::new(NoActions),
            Duration::from_millis(10),
            Duration::from_millis(200),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_membership(
            reconciler.clone(),
            ctx,
            Duration::from_millis(20),
            shutdown_rx,
        );

        // Let the first subscription settle, then feed a sibling
        tokio::time::sleep(Duration::from_millis(50)).await;
        let sibling = MemberRevision::new(ClusterMember::new("a"), 1, 0);
        events_tx
            .send(MembershipEvent::SiblingAdded(sibling))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(reconciler.current().siblings().contains_key("a"));

        // Break the stream; the supervisor resubscribes after the flat delay
        events_tx
            .send(MembershipEvent::Disconnected {
                cause: "watch expired".into(),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(membership.watch_calls.load(Ordering::SeqCst) >= 2);

        let _ = shutdown_tx.send(true);
        let _ = handle.await;
        reconciler.shutdown(Duration::from_secs(1)).await;
    }
}
