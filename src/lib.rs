//! # mqtt-kernel: connection-lifecycle kernel for long-lived MQTT sessions
//!
//! A small, single-task kernel that keeps a constrained device connected
//! to its message broker forever: secured-transport establishment with
//! bounded exponential backoff, protocol handshake with optional session
//! resumption, subscription reconciliation when the broker lost the
//! session, and a supervising loop that turns run-loop faults back into
//! fresh connections without external intervention.
//!
//! The wire protocol itself is not implemented here. The kernel consumes
//! an injected protocol engine, secured transport, and subscription
//! registry through narrow interfaces, and owns only the decisions that
//! are hard to get right: give up vs. retry, resume vs. clean-start, and
//! which subscriptions survive a reconnect.
//!
//! # Quick Start
//!
//! ```ignore
//! use mqtt_kernel::{Config, Supervisor, SubscriptionHandle, TlsConnector};
//!
//! #[tokio::main]
//! async fn main() -> mqtt_kernel::Result<()> {
//!     let config = Config::from_file("device.toml")?;
//!
//!     let subscriptions = SubscriptionHandle::with_capacity(config.max_subscriptions);
//!     subscriptions.add("commands/pump-7/#", Box::new(|event| {
//!         // react to an incoming publish
//!     }))?;
//!
//!     let connector = TlsConnector::from_config(&config)?;
//!     let engine = my_engine::Engine::new(subscriptions.clone());
//!
//!     let mut supervisor = Supervisor::new(config, connector, engine, subscriptions);
//!     match supervisor.run().await {
//!         Ok(()) => Ok(()),
//!         Err(err) if err.is_fatal() => {
//!             // cannot proceed without a broker connection; fail loudly
//!             tracing::error!(error = %err, "lifecycle kernel stopped");
//!             std::process::exit(1);
//!         }
//!         Err(err) => Err(err),
//!     }
//! }
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected
//!      |
//!      v                (backoff retry loop)
//! Connecting ---- establish transport + handshake (clean start)
//!      |
//!      v
//!   Running ---- engine run loop, the dominant suspension point
//!      |                                   |
//!  (clean termination)             (error termination)
//!      |                                   |
//!      v                                   v
//!   Stopped                             Faulted
//!                                          |
//!                                          v
//!                                    Reconnecting ---- establish + handshake
//!                                          |           (resume requested)
//!                                          v
//!                                       Running
//! ```
//!
//! Reconnects always request session resumption; only the very first
//! connect of a process lifetime clean-starts. When the broker reports it
//! could not resume, the kernel rebuilds the subscription set from the
//! registry in one batch before the run loop resumes, and prunes any
//! filter the broker refuses.
//!
//! # Failure policy
//!
//! Three different failures get three deliberately different answers:
//!
//! - transient transport faults: retried silently under backoff, never
//!   surfaced past the establisher;
//! - handshake rejection or retry exhaustion: fatal for the process, the
//!   embedding application restarts rather than limping on;
//! - broker-refused subscriptions: pruned locally and reported through the
//!   registry's loss counter, optionally escalated to fatal via
//!   [`Config::abort_on_subscription_loss`].
//!
//! # Concurrency
//!
//! One task drives everything. The only suspension points are the backoff
//! delay before a connection exists and the engine's run loop afterwards.
//! Subscription state is mutated solely by the resubscription completion,
//! which the engine fires on that same task. Applications observe the
//! lifecycle through a `tokio::sync::watch` channel; see
//! [`supervisor::wait_until_running`].

pub mod backoff;
pub mod config;
pub mod engine;
pub mod error;
pub mod establish;
pub mod registry;
pub mod resubscribe;
pub mod session;
pub mod state;
pub mod supervisor;
pub mod tls;
pub mod transport;

// Re-exports: configuration
pub use config::{BackoffConfig, Config, TlsConfig};
// Re-exports: error handling
//
// Every fallible operation returns KernelError
pub use error::KernelError;
// Re-exports: the collaborator seams
pub use engine::{AgentEngine, Command, ConnectRequest, SessionDescriptor, TerminationReason};
pub use transport::{TransportConnector, TransportError};
// Re-exports: subscription registry
pub use registry::{PublishEvent, SubscriptionHandle, SubscriptionStore};
// Re-exports: lifecycle
pub use state::LinkState;
pub use supervisor::{wait_until_running, Supervisor};
// Re-exports: production transport
pub use tls::TlsConnector;

/// Result type for kernel operations.
///
/// Alias for `std::result::Result<T, KernelError>`; check
/// [`KernelError::is_fatal`] before deciding whether to recover or
/// terminate.
pub type Result<T> = std::result::Result<T, KernelError>;
