//! Event system for UI decoupling.
//!
//! The session reports protocol activity through an injected observer so
//! CLI/GUI layers can trace exchanges without coupling to the core. The
//! core itself never prints; `NullObserver` makes the sink optional
//! without changing behavior.

use std::fmt;

/// Direction of a wire frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    Tx,
    Rx,
}

impl fmt::Display for FrameDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameDirection::Tx => write!(f, "TX"),
            FrameDirection::Rx => write!(f, "RX"),
        }
    }
}

/// What kind of request the session issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    GetDirectory,
    MatrixConnect,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::GetDirectory => write!(f, "getDirectory"),
            RequestKind::MatrixConnect => write!(f, "matrixConnect"),
        }
    }
}

/// Events emitted by the session.
#[derive(Debug, Clone)]
pub enum EmberEvent {
    /// TCP session established.
    Connected { host: String, port: u16 },
    /// Transport lost or closed; pending requests were cancelled.
    Disconnected,
    /// A request went out on the wire.
    RequestSent { kind: RequestKind, path: Vec<u32> },
    /// An inbound message completed a pending request.
    RequestMatched { kind: RequestKind, path: Vec<u32> },
    /// Raw frame traffic.
    Frame {
        direction: FrameDirection,
        length: usize,
    },
    /// Keepalive request answered.
    Keepalive,
    /// An inbound payload failed to decode and was dropped.
    MalformedMessage { reason: String },
    /// Connection state update applied (or dropped if path unknown).
    ConnectionState {
        matrix_path: Vec<u32>,
        target: u32,
        sources: Vec<u32>,
    },
}

/// Observer trait for receiving session events.
///
/// Implement this in the embedding layer to trace protocol exchanges.
pub trait EmberObserver {
    fn on_event(&self, event: &EmberEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl EmberObserver for NullObserver {
    fn on_event(&self, _event: &EmberEvent) {
        // Do nothing
    }
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl EmberObserver for TracingObserver {
    fn on_event(&self, event: &EmberEvent) {
        match event {
            EmberEvent::Connected { host, port } => {
                tracing::info!(host = %host, port = port, "Session connected");
            }
            EmberEvent::Disconnected => {
                tracing::warn!("Session disconnected");
            }
            EmberEvent::RequestSent { kind, path } => {
                tracing::debug!(kind = %kind, path = ?path, "Request sent");
            }
            EmberEvent::RequestMatched { kind, path } => {
                tracing::debug!(kind = %kind, path = ?path, "Response matched");
            }
            EmberEvent::Frame { direction, length } => {
                tracing::trace!(dir = %direction, len = length, "Frame");
            }
            EmberEvent::Keepalive => {
                tracing::trace!("Keepalive answered");
            }
            EmberEvent::MalformedMessage { reason } => {
                tracing::warn!(reason = %reason, "Malformed message dropped");
            }
            EmberEvent::ConnectionState {
                matrix_path,
                target,
                sources,
            } => {
                tracing::debug!(
                    matrix = ?matrix_path,
                    target = target,
                    sources = ?sources,
                    "Connection state"
                );
            }
        }
    }
}
