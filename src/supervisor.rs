//! The connection lifecycle supervisor.
//!
//! [`Supervisor::run`] is the single task that owns the whole lifecycle:
//! it establishes the secured transport, negotiates the protocol session,
//! then parks inside the engine's run loop until that loop terminates.
//! Clean termination shuts the kernel down for good; error termination
//! tears the transport down and re-drives the establish/negotiate sequence
//! with session resumption requested, forever.
//!
//! The first connect of a process lifetime always asks for a clean start;
//! every reconnect afterwards asks to resume. A fatal result while
//! reconnecting (retry budget exhausted, handshake rejected) is returned
//! to the caller, which is expected to treat it as unrecoverable: a device
//! that cannot reach its broker prefers a loud restart over undefined
//! partial operation.
//!
//! The transport link is owned here across its whole lifetime. The
//! establisher hands it over on success, the engine borrows it for the
//! run loop, and only the supervisor tears it down.

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::engine::{AgentEngine, TerminationReason};
use crate::error::KernelError;
use crate::establish::establish;
use crate::registry::SubscriptionHandle;
use crate::session::negotiate;
use crate::state::LinkState;
use crate::transport::TransportConnector;

/// Drives the connection lifecycle state machine.
///
/// Owns the transport connector, the protocol engine, and a handle to the
/// shared subscription registry. Everything runs on the task that calls
/// [`Supervisor::run`]; the only other way to interact with a running
/// supervisor is the state watch channel.
pub struct Supervisor<C, E>
where
    C: TransportConnector,
    E: AgentEngine<Link = C::Link>,
{
    config: Config,
    connector: C,
    engine: E,
    subscriptions: SubscriptionHandle,
    state_tx: watch::Sender<LinkState>,
    state_rx: watch::Receiver<LinkState>,
}

impl<C, E> Supervisor<C, E>
where
    C: TransportConnector,
    E: AgentEngine<Link = C::Link>,
{
    /// Creates a supervisor over the given collaborators.
    ///
    /// The registry handle is shared: the application registers callbacks
    /// through its own clone, the engine dispatches incoming publishes
    /// through another, and the supervisor reads it for resubscription.
    pub fn new(config: Config, connector: C, engine: E, subscriptions: SubscriptionHandle) -> Self {
        let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);
        Self {
            config,
            connector,
            engine,
            subscriptions,
            state_tx,
            state_rx,
        }
    }

    /// A receiver for lifecycle state transitions.
    ///
    /// The receiver sees the current state immediately; combine with
    /// [`wait_until_running`] to block until traffic can flow.
    pub fn state(&self) -> watch::Receiver<LinkState> {
        self.state_rx.clone()
    }

    /// The shared subscription registry handle.
    pub fn subscriptions(&self) -> SubscriptionHandle {
        self.subscriptions.clone()
    }

    fn set_state(&self, next: LinkState) {
        let changed = *self.state_tx.borrow() != next;
        if changed {
            info!(state = %next, "link state changed");
            let _ = self.state_tx.send(next);
        }
    }

    /// Runs the lifecycle until clean shutdown or a fatal error.
    ///
    /// Never returns during normal operation: error terminations of the
    /// run loop are absorbed by reconnecting. The two ways out are the
    /// engine's clean-termination signal (`Ok`) and a fatal condition
    /// (`Err`, see [`KernelError::is_fatal`]).
    pub async fn run(&mut self) -> Result<(), KernelError> {
        self.set_state(LinkState::Connecting);
        let mut link = establish(&mut self.connector, &self.config.backoff).await?;
        negotiate(
            &mut self.engine,
            &mut link,
            &self.config,
            &self.subscriptions,
            true,
        )
        .await?;
        self.set_state(LinkState::Running);

        let mut losses_seen = self.subscriptions.rejected_total();
        loop {
            let reason = self.engine.run_until_terminated(&mut link).await;

            // Resubscription completions fired during the loop we just
            // left; account for any filters the broker refused.
            let losses_now = self.subscriptions.rejected_total();
            if losses_now > losses_seen {
                let lost = losses_now - losses_seen;
                losses_seen = losses_now;
                error!(lost, "running with a reduced subscription set");
                if self.config.abort_on_subscription_loss {
                    self.set_state(LinkState::Faulted);
                    self.connector.close(link).await;
                    return Err(KernelError::SubscriptionLoss(lost));
                }
            }

            match reason {
                TerminationReason::Clean => {
                    info!("run loop terminated cleanly, shutting down");
                    self.connector.close(link).await;
                    self.set_state(LinkState::Stopped);
                    return Ok(());
                }
                TerminationReason::Error => {
                    warn!("run loop faulted, tearing down transport");
                    self.set_state(LinkState::Faulted);
                    // Best effort; the fault is not inspected further.
                    self.connector.close(link).await;

                    self.set_state(LinkState::Reconnecting);
                    link = establish(&mut self.connector, &self.config.backoff).await?;
                    negotiate(
                        &mut self.engine,
                        &mut link,
                        &self.config,
                        &self.subscriptions,
                        false,
                    )
                    .await?;
                    self.set_state(LinkState::Running);
                }
            }
        }
    }
}

/// Blocks until the supervisor reports [`LinkState::Running`].
///
/// Returns `false` if the supervisor went away without ever reaching it.
pub async fn wait_until_running(state: &mut watch::Receiver<LinkState>) -> bool {
    state.wait_for(LinkState::is_running).await.is_ok()
}
