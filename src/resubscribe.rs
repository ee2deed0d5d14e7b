//! Subscription reconciliation after a non-resumed session.
//!
//! When the broker could not resume a prior session, every subscription
//! the application registered is gone on the broker side while the local
//! registry still holds it. [`resubscribe`] rebuilds the broker-side set
//! from a registry snapshot in one batch.
//!
//! The batch is submitted with a zero deadline: the run loop has not
//! started yet, so the enqueue cannot race a consumer and must not block.
//! The broker's answer arrives later, on the engine's completion path, and
//! the continuation registered here prunes each filter the broker
//! individually refused. Refused filters are abandoned, not retried; the
//! loss is recorded on the registry handle so the supervisor can apply the
//! configured abort-on-loss policy.

use tracing::{debug, error, info};

use crate::engine::{
    AgentEngine, Command, QualityOfService, SubscribeAck, SubscribeBatch, SubscribeOutcome,
};
use crate::error::KernelError;
use crate::registry::SubscriptionHandle;

/// Rebuilds the broker-side subscription set from the registry.
///
/// Empty registries succeed trivially without a network submission; many
/// brokers reject a subscribe request carrying zero filters as malformed.
/// All filters are requested at-least-once.
pub fn resubscribe<E: AgentEngine>(
    engine: &mut E,
    subscriptions: &SubscriptionHandle,
) -> Result<(), KernelError> {
    let filters = subscriptions.snapshot();
    if filters.is_empty() {
        debug!("no subscriptions to restore");
        return Ok(());
    }

    info!(count = filters.len(), "restoring subscriptions");
    let batch = SubscribeBatch {
        filters: filters
            .iter()
            .cloned()
            .map(|filter| (filter, QualityOfService::AtLeastOnce))
            .collect(),
    };

    let registry = subscriptions.clone();
    let on_complete: crate::engine::SubscribeCompletion =
        Box::new(move |outcome: &SubscribeOutcome| {
            prune_rejected(&registry, &filters, outcome);
        });

    engine.submit(Command::Subscribe { batch, on_complete })?;
    Ok(())
}

/// Completion continuation for the resubscribe batch.
///
/// A successful batch needs no action: every filter is confirmed. On
/// failure the per-entry codes are inspected positionally and each
/// negatively acknowledged filter is removed from the registry. Entries
/// the broker neither granted nor refused are left untouched.
fn prune_rejected(
    registry: &SubscriptionHandle,
    filters: &[String],
    outcome: &SubscribeOutcome,
) {
    if outcome.accepted {
        debug!(count = filters.len(), "all subscriptions confirmed");
        return;
    }

    for (index, code) in outcome.entry_codes.iter().enumerate() {
        if *code == SubscribeAck::Failure {
            if let Some(filter) = filters.get(index) {
                error!(filter = %filter, "broker refused resubscription, dropping filter");
                registry.prune_rejected(filter);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ConnectRequest, ProtocolError, QueueFull, TerminationReason};

    /// Engine double that captures submitted commands.
    #[derive(Default)]
    struct CapturingEngine {
        commands: Vec<Command>,
        reject_submissions: bool,
    }

    impl AgentEngine for CapturingEngine {
        type Link = ();

        async fn connect(
            &mut self,
            _link: &mut (),
            _request: &ConnectRequest,
        ) -> Result<bool, ProtocolError> {
            Ok(false)
        }

        fn resume_session(&mut self, _session_present: bool) -> Result<(), ProtocolError> {
            Ok(())
        }

        fn submit(&mut self, command: Command) -> Result<(), QueueFull> {
            if self.reject_submissions {
                return Err(QueueFull);
            }
            self.commands.push(command);
            Ok(())
        }

        async fn run_until_terminated(&mut self, _link: &mut ()) -> TerminationReason {
            TerminationReason::Clean
        }
    }

    fn noop() -> crate::registry::PublishHandler {
        Box::new(|_| {})
    }

    fn registry_with(filters: &[&str]) -> SubscriptionHandle {
        let handle = SubscriptionHandle::with_capacity(8);
        for filter in filters {
            handle.add(*filter, noop()).unwrap();
        }
        handle
    }

    fn take_subscribe(engine: &mut CapturingEngine) -> (SubscribeBatch, crate::engine::SubscribeCompletion) {
        assert_eq!(engine.commands.len(), 1, "expected exactly one submission");
        match engine.commands.remove(0) {
            Command::Subscribe { batch, on_complete } => (batch, on_complete),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn empty_registry_submits_nothing() {
        let mut engine = CapturingEngine::default();
        let registry = SubscriptionHandle::with_capacity(4);

        resubscribe(&mut engine, &registry).unwrap();

        assert!(engine.commands.is_empty());
    }

    #[test]
    fn batch_carries_every_filter_in_order_at_qos1() {
        let mut engine = CapturingEngine::default();
        let registry = registry_with(&["alpha", "bravo/#", "charlie/+"]);

        resubscribe(&mut engine, &registry).unwrap();

        let (batch, _) = take_subscribe(&mut engine);
        let expected: Vec<(String, QualityOfService)> = ["alpha", "bravo/#", "charlie/+"]
            .iter()
            .map(|f| (f.to_string(), QualityOfService::AtLeastOnce))
            .collect();
        assert_eq!(batch.filters, expected);
    }

    #[test]
    fn successful_batch_leaves_the_registry_alone() {
        let mut engine = CapturingEngine::default();
        let registry = registry_with(&["a", "b"]);

        resubscribe(&mut engine, &registry).unwrap();
        let (_, on_complete) = take_subscribe(&mut engine);

        on_complete(&SubscribeOutcome {
            accepted: true,
            entry_codes: vec![
                SubscribeAck::Granted(QualityOfService::AtLeastOnce),
                SubscribeAck::Granted(QualityOfService::AtLeastOnce),
            ],
        });

        assert_eq!(registry.snapshot(), vec!["a", "b"]);
        assert_eq!(registry.rejected_total(), 0);
    }

    #[test]
    fn rejected_entries_are_pruned_individually() {
        let mut engine = CapturingEngine::default();
        let registry = registry_with(&["a", "b", "c"]);

        resubscribe(&mut engine, &registry).unwrap();
        let (_, on_complete) = take_subscribe(&mut engine);

        // Broker refused the first and third filters.
        on_complete(&SubscribeOutcome {
            accepted: false,
            entry_codes: vec![
                SubscribeAck::Failure,
                SubscribeAck::Granted(QualityOfService::AtLeastOnce),
                SubscribeAck::Failure,
            ],
        });

        assert_eq!(registry.snapshot(), vec!["b"]);
        assert_eq!(registry.rejected_total(), 2);
    }

    #[test]
    fn short_outcome_vector_leaves_the_tail_untouched() {
        let mut engine = CapturingEngine::default();
        let registry = registry_with(&["a", "b"]);

        resubscribe(&mut engine, &registry).unwrap();
        let (_, on_complete) = take_subscribe(&mut engine);

        on_complete(&SubscribeOutcome {
            accepted: false,
            entry_codes: vec![SubscribeAck::Failure],
        });

        assert_eq!(registry.snapshot(), vec!["b"]);
    }

    #[test]
    fn queue_full_propagates() {
        let mut engine = CapturingEngine {
            reject_submissions: true,
            ..Default::default()
        };
        let registry = registry_with(&["a"]);

        let err = resubscribe(&mut engine, &registry).expect_err("queue full");
        assert!(matches!(err, KernelError::QueueFull(_)));
        assert!(!err.is_fatal());
    }
}
