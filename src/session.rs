//! Protocol session negotiation.
//!
//! [`negotiate`] performs the handshake over an already-established
//! transport link and decides what happens to subscription state. The
//! broker reports whether a prior session actually survived; a session we
//! asked to resume but that came back empty is indistinguishable, from the
//! application's point of view, from a clean one, so the subscription set
//! is rebuilt before the caller proceeds. A clean start never
//! resubscribes: it intentionally discards all prior subscription intent.
//!
//! Any broker-side rejection of the handshake, including an
//! acknowledgement timeout, fails the whole connect cycle.

use std::time::Duration;

use tracing::info;

use crate::config::Config;
use crate::engine::{AgentEngine, ConnectRequest, SessionDescriptor};
use crate::error::KernelError;
use crate::registry::SubscriptionHandle;
use crate::resubscribe::resubscribe;

/// Negotiates a protocol session over `link`.
///
/// With `want_clean_start = false` the broker's resume verdict is relayed
/// to the engine so it can replay or fail in-flight state, and a
/// non-surviving session triggers resubscription before this function
/// returns. Ordering matters: the batch is queued now and drained once the
/// run loop starts, so the run loop never observes a session without its
/// subscribe commands already enqueued.
pub async fn negotiate<E: AgentEngine>(
    engine: &mut E,
    link: &mut E::Link,
    config: &Config,
    subscriptions: &SubscriptionHandle,
    want_clean_start: bool,
) -> Result<SessionDescriptor, KernelError> {
    let request = connect_request(config, want_clean_start);
    let session_present = engine.connect(link, &request).await?;
    info!(
        clean_start = want_clean_start,
        session_present, "broker handshake acknowledged"
    );

    if !want_clean_start {
        engine.resume_session(session_present)?;
        if !session_present {
            // Requested a resume, broker had nothing to resume.
            resubscribe(engine, subscriptions)?;
        }
    }

    Ok(SessionDescriptor {
        clean_start: want_clean_start,
        session_present,
    })
}

fn connect_request(config: &Config, clean_start: bool) -> ConnectRequest {
    ConnectRequest {
        clean_start,
        client_id: config.client_id.clone(),
        keep_alive: Duration::from_secs(config.keep_alive_secs),
        username: config.username.clone(),
        password: config.password.clone(),
        ack_timeout: Duration::from_millis(config.connack_timeout_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Command, ProtocolError, QueueFull, TerminationReason};
    use crate::registry::SubscriptionHandle;

    /// Engine double with a scripted handshake verdict.
    struct ScriptedEngine {
        session_present: bool,
        fail_handshake: bool,
        connects: Vec<ConnectRequest>,
        resumes: Vec<bool>,
        submissions: usize,
    }

    impl ScriptedEngine {
        fn reporting(session_present: bool) -> Self {
            Self {
                session_present,
                fail_handshake: false,
                connects: Vec::new(),
                resumes: Vec::new(),
                submissions: 0,
            }
        }
    }

    impl AgentEngine for ScriptedEngine {
        type Link = ();

        async fn connect(
            &mut self,
            _link: &mut (),
            request: &ConnectRequest,
        ) -> Result<bool, ProtocolError> {
            self.connects.push(request.clone());
            if self.fail_handshake {
                return Err(ProtocolError::HandshakeRejected {
                    reason: "not authorized".into(),
                });
            }
            Ok(self.session_present)
        }

        fn resume_session(&mut self, session_present: bool) -> Result<(), ProtocolError> {
            self.resumes.push(session_present);
            Ok(())
        }

        fn submit(&mut self, _command: Command) -> Result<(), QueueFull> {
            self.submissions += 1;
            Ok(())
        }

        async fn run_until_terminated(&mut self, _link: &mut ()) -> TerminationReason {
            TerminationReason::Clean
        }
    }

    fn noop() -> crate::registry::PublishHandler {
        Box::new(|_| {})
    }

    fn populated_registry() -> SubscriptionHandle {
        let handle = SubscriptionHandle::with_capacity(4);
        handle.add("sensors/#", noop()).unwrap();
        handle.add("commands/+/set", noop()).unwrap();
        handle
    }

    #[tokio::test]
    async fn clean_start_never_resubscribes() {
        let mut engine = ScriptedEngine::reporting(false);
        let registry = populated_registry();

        let session = negotiate(&mut engine, &mut (), &Config::default(), &registry, true)
            .await
            .unwrap();

        assert!(session.clean_start);
        assert!(engine.resumes.is_empty());
        assert_eq!(engine.submissions, 0);
    }

    #[tokio::test]
    async fn resume_with_surviving_session_skips_resubscription() {
        let mut engine = ScriptedEngine::reporting(true);
        let registry = populated_registry();

        let session = negotiate(&mut engine, &mut (), &Config::default(), &registry, false)
            .await
            .unwrap();

        assert!(!session.clean_start);
        assert!(session.session_present);
        assert_eq!(engine.resumes, vec![true]);
        assert_eq!(engine.submissions, 0);
    }

    #[tokio::test]
    async fn resume_without_surviving_session_resubscribes_once() {
        let mut engine = ScriptedEngine::reporting(false);
        let registry = populated_registry();

        let session = negotiate(&mut engine, &mut (), &Config::default(), &registry, false)
            .await
            .unwrap();

        assert!(!session.session_present);
        assert_eq!(engine.resumes, vec![false]);
        assert_eq!(engine.submissions, 1);
    }

    #[tokio::test]
    async fn resume_with_empty_registry_still_succeeds() {
        let mut engine = ScriptedEngine::reporting(false);
        let registry = SubscriptionHandle::with_capacity(4);

        negotiate(&mut engine, &mut (), &Config::default(), &registry, false)
            .await
            .unwrap();

        // Nothing to restore, nothing submitted.
        assert_eq!(engine.submissions, 0);
    }

    #[tokio::test]
    async fn handshake_rejection_is_fatal() {
        let mut engine = ScriptedEngine::reporting(false);
        engine.fail_handshake = true;
        let registry = populated_registry();

        let err = negotiate(&mut engine, &mut (), &Config::default(), &registry, false)
            .await
            .expect_err("broker refused");

        assert!(matches!(err, KernelError::Protocol(_)));
        assert!(err.is_fatal());
        assert!(engine.resumes.is_empty());
    }

    #[tokio::test]
    async fn connect_request_carries_the_configured_identity() {
        let mut engine = ScriptedEngine::reporting(true);
        let registry = SubscriptionHandle::with_capacity(1);
        let config = Config {
            client_id: "pump-station-7".into(),
            keep_alive_secs: 30,
            connack_timeout_ms: 1500,
            username: Some("fleet".into()),
            password: Some("secret".into()),
            ..Default::default()
        };

        negotiate(&mut engine, &mut (), &config, &registry, false)
            .await
            .unwrap();

        let request = &engine.connects[0];
        assert_eq!(request.client_id, "pump-station-7");
        assert_eq!(request.keep_alive, Duration::from_secs(30));
        assert_eq!(request.ack_timeout, Duration::from_millis(1500));
        assert_eq!(request.username.as_deref(), Some("fleet"));
        assert!(!request.clean_start);
    }
}
