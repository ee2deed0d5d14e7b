//! Protocol engine seam.
//!
//! The kernel does not speak the wire protocol. It drives an injected
//! [`AgentEngine`] through four narrow operations: a synchronous-style
//! handshake, a session-resume notification, a non-blocking command
//! submission, and a run loop that owns the link until it terminates.
//! Everything the engine does internally (packet serialization, in-flight
//! acknowledgement tracking, keep-alive pings, dispatching incoming
//! publishes into the subscription registry) is its own business.
//!
//! Command completions are explicit continuation values carried inside the
//! [`Command`] union rather than raw context pointers: each request kind
//! owns a strongly-typed payload and the closure invoked exactly once by
//! the run loop when the broker answers.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Why the engine's run loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// An intentional shutdown was requested through the engine. The
    /// supervisor closes the transport and halts.
    Clean,

    /// The loop hit a transport or protocol fault. The supervisor tears
    /// down and reconnects with session resumption.
    Error,
}

/// Broker-side protocol failure.
///
/// Fatal when raised during connect-time negotiation; at run-loop time the
/// engine folds faults into [`TerminationReason::Error`] instead and the
/// supervisor recovers by reconnecting.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The broker refused the CONNECT.
    #[error("broker rejected the handshake: {reason}")]
    HandshakeRejected { reason: String },

    /// No acknowledgement arrived within the receive timeout.
    #[error("no broker acknowledgement within {0:?}")]
    AckTimeout(Duration),

    /// The exchange violated the protocol in some other way.
    #[error("protocol violation: {0}")]
    Violation(String),
}

/// The engine's command queue is full.
///
/// Backpressure is the submitter's problem; the kernel never retries a
/// submission internally.
#[derive(Debug, Error)]
#[error("protocol engine command queue is full")]
pub struct QueueFull;

/// Parameters for the protocol handshake.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Ask the broker to discard any prior session state.
    pub clean_start: bool,

    /// Fixed client identity, unique per device.
    pub client_id: String,

    /// Keep-alive interval advertised to the broker.
    pub keep_alive: Duration,

    /// Optional credential, possibly carrying a metrics string required by
    /// the broker operator.
    pub username: Option<String>,

    /// Optional credential paired with `username`.
    pub password: Option<String>,

    /// How long to wait for the broker's acknowledgement before treating
    /// the handshake as failed.
    pub ack_timeout: Duration,
}

/// One negotiated protocol session.
///
/// Created fresh on every (re)connect and superseded entirely by the next
/// one; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionDescriptor {
    /// Whether the broker was asked to discard prior state.
    pub clean_start: bool,

    /// Broker-reported fact: did a prior session actually survive.
    pub session_present: bool,
}

/// Delivery guarantee requested for a subscription.
///
/// The device only ever subscribes at-least-once; exactly-once is not
/// supported by this kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityOfService {
    AtMostOnce,
    AtLeastOnce,
}

/// Per-filter outcome reported by the broker for a subscribe batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeAck {
    /// The broker granted the subscription at the given level.
    Granted(QualityOfService),

    /// The broker refused this filter.
    Failure,
}

/// An ordered batch of subscription requests.
///
/// Built from a registry snapshot; entry order is enumeration order and
/// must be preserved, because the broker's acknowledgement codes come back
/// positionally.
#[derive(Debug, Clone, Default)]
pub struct SubscribeBatch {
    pub filters: Vec<(String, QualityOfService)>,
}

impl SubscribeBatch {
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// Result of a subscribe batch, delivered to its completion continuation.
#[derive(Debug, Clone)]
pub struct SubscribeOutcome {
    /// Overall batch verdict. When `true` every filter was granted and
    /// `entry_codes` needs no inspection.
    pub accepted: bool,

    /// Per-entry acknowledgement codes, positionally matching the batch.
    pub entry_codes: Vec<SubscribeAck>,
}

/// Continuation invoked exactly once when a subscribe batch completes.
///
/// Runs on the engine's own completion path inside the run loop, on the
/// same execution context as everything else in the kernel.
pub type SubscribeCompletion = Box<dyn FnOnce(&SubscribeOutcome) + Send>;

/// A request submitted to the engine's command queue.
///
/// Tagged union carrying a strongly-typed payload per request kind; the
/// completion travels with its request.
pub enum Command {
    /// Subscribe to a batch of topic filters.
    Subscribe {
        batch: SubscribeBatch,
        on_complete: SubscribeCompletion,
    },

    /// Publish a payload to a topic.
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QualityOfService,
    },
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Subscribe { batch, .. } => f
                .debug_struct("Subscribe")
                .field("filters", &batch.len())
                .finish_non_exhaustive(),
            Command::Publish { topic, payload, qos } => f
                .debug_struct("Publish")
                .field("topic", topic)
                .field("bytes", &payload.len())
                .field("qos", qos)
                .finish(),
        }
    }
}

/// The message-protocol engine, consumed through a narrow interface.
///
/// Implementations are constructed outside the kernel with whatever they
/// need (network buffers, a monotonic clock, the publish-dispatch hook
/// into [`crate::registry::SubscriptionHandle`]); the kernel only threads
/// the transport link through and reacts to outcomes.
#[allow(async_fn_in_trait)]
pub trait AgentEngine {
    /// The transport link type the engine performs traffic on.
    type Link;

    /// Performs the protocol handshake over an established link.
    ///
    /// Returns the broker-reported session-present flag. Waits at most
    /// `request.ack_timeout` for the acknowledgement.
    async fn connect(
        &mut self,
        link: &mut Self::Link,
        request: &ConnectRequest,
    ) -> Result<bool, ProtocolError>;

    /// Informs the engine of the resume verdict after a non-clean
    /// handshake, so it can replay or fail its in-flight state.
    fn resume_session(&mut self, session_present: bool) -> Result<(), ProtocolError>;

    /// Enqueues a command without blocking.
    ///
    /// Submissions made while the run loop is idle are queued and drained
    /// once it resumes.
    fn submit(&mut self, command: Command) -> Result<(), QueueFull>;

    /// Runs the protocol (receive, dispatch, acknowledge, ping) until an
    /// intentional shutdown or a fault.
    ///
    /// This is the dominant suspension point of the whole system.
    async fn run_until_terminated(&mut self, link: &mut Self::Link) -> TerminationReason;
}
