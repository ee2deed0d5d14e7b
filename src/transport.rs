//! Secured transport abstraction consumed by the connection establisher.
//!
//! The kernel never opens sockets or drives TLS handshakes itself. It asks
//! a [`TransportConnector`] for a connected link and hands the link back
//! for teardown when the session ends. Endpoint address, port, trust
//! anchor, and client identity material are all baked into the connector
//! at construction time from validated configuration.
//!
//! The production implementation lives in [`crate::tls`]; tests substitute
//! scripted connectors that fail on demand.

use std::io;

use thiserror::Error;

/// Failure to open or operate the secured transport.
///
/// Transport errors are always recoverable from the kernel's point of
/// view: the establisher retries them under the backoff policy and they
/// never propagate past it on their own.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Endpoint could not be resolved or is malformed.
    #[error("invalid endpoint: {0}")]
    Endpoint(String),

    /// Socket-level failure (connect refused, reset, timeout).
    #[error("transport i/o error: {0}")]
    Io(#[from] io::Error),

    /// TLS-level failure (handshake, certificate verification).
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
}

/// Opens and closes secured sessions to a fixed broker endpoint.
///
/// One connector serves one endpoint for the life of the supervisor. The
/// link type is opaque to the kernel; it is threaded through to the
/// protocol engine, which performs all traffic on it.
#[allow(async_fn_in_trait)]
pub trait TransportConnector {
    /// A connected, encrypted session.
    type Link;

    /// Opens a fresh session.
    ///
    /// On failure no partial state may survive: a subsequent call must
    /// start from scratch.
    async fn open(&mut self) -> Result<Self::Link, TransportError>;

    /// Tears a session down, best effort.
    ///
    /// Errors during teardown are swallowed by implementations; the caller
    /// has already decided the link is done.
    async fn close(&mut self, link: Self::Link);
}
