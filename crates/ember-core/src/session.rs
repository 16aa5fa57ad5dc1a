//! Ember+ session - request engine and lazy tree resolver.
//!
//! One session owns one transport, the mirrored tree, and an explicit
//! pending-request table. Ember+ responses carry no correlation id; an
//! inbound message completes the oldest pending request whose target
//! path is a prefix of (or equal to) the message path, FIFO among equal
//! paths. All calls are driven from one control flow: a request-issuing
//! call pumps the receive loop until its request matches, the deadline
//! passes, or the transport drops.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::events::{EmberEvent, EmberObserver, FrameDirection, RequestKind, TracingObserver};
use crate::protocol::glow;
use crate::protocol::s101::{self, Deframer, S101Message};
use crate::protocol::{ChildEntry, DecodedMessage, Disposition, MatrixInfo};
use crate::transport::{TcpTransport, Transport, TransportError};
use crate::tree::{Tree, TreeNode};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Connection(#[from] TransportError),

    #[error("No node at path {path}")]
    NodeNotFound { path: String },

    #[error("Not a valid path: {0}")]
    InvalidPath(String),

    #[error("No matching response within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Session is closed")]
    Disconnected,

    #[error("Device rejected route: sources {sources:?} -> target {target}")]
    InvalidRoute { target: u32, sources: Vec<u32> },
}

/// Configuration for an Ember+ session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Provider host (the Lawo VPRO frame).
    pub host: String,
    /// Provider TCP port.
    pub port: u16,
    /// Deadline for a matching response, per request.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// TCP connect deadline.
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9000,
            timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_timeout_ms(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// A request awaiting its response.
///
/// Completion carries no payload: by the time a request completes, its
/// response has already been applied to the tree, which is the single
/// source of truth for listings and connection state.
#[derive(Debug)]
struct PendingRequest {
    id: u64,
    path: Vec<u32>,
    kind: RequestKind,
    outcome: Option<Result<(), SessionError>>,
}

/// Live Ember+ session over one transport.
pub struct Session<T: Transport> {
    transport: T,
    config: SessionConfig,
    deframer: Deframer,
    tree: Tree,
    pending: VecDeque<PendingRequest>,
    next_id: u64,
    closed: bool,
    observer: Arc<dyn EmberObserver>,
}

impl Session<TcpTransport> {
    /// Connect to a provider with the default tracing observer.
    pub fn connect(config: SessionConfig) -> Result<Self, SessionError> {
        Self::connect_with_observer(config, Arc::new(TracingObserver))
    }

    /// Connect with a custom observer.
    pub fn connect_with_observer(
        config: SessionConfig,
        observer: Arc<dyn EmberObserver>,
    ) -> Result<Self, SessionError> {
        let transport = TcpTransport::open(
            &config.host,
            config.port,
            Duration::from_millis(config.connect_timeout_ms),
        )?;
        observer.on_event(&EmberEvent::Connected {
            host: config.host.clone(),
            port: config.port,
        });
        Ok(Self::with_observer(transport, config, observer))
    }
}

impl<T: Transport> Session<T> {
    /// Wrap an already-open transport (tests use this with the mock).
    pub fn with_transport(transport: T, config: SessionConfig) -> Self {
        Self::with_observer(transport, config, Arc::new(TracingObserver))
    }

    pub fn with_observer(
        transport: T,
        config: SessionConfig,
        observer: Arc<dyn EmberObserver>,
    ) -> Self {
        Self {
            transport,
            config,
            deframer: Deframer::new(),
            tree: Tree::new(),
            pending: VecDeque::new(),
            next_id: 0,
            closed: false,
            observer,
        }
    }

    /// The mirrored tree, as fresh as the last fetch or acknowledgment.
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Fetch the directory of `path` (empty = device root) and merge it
    /// into the tree.
    ///
    /// Providers may answer a matrix listing with connection state
    /// alone; the listing returned is whatever the tree holds for
    /// `path` once the response has been applied.
    #[instrument(level = "debug", skip(self))]
    pub fn get_directory(&mut self, path: &[u32]) -> Result<Vec<ChildEntry>, SessionError> {
        let id = self.submit(
            RequestKind::GetDirectory,
            path.to_vec(),
            glow::encode_get_directory(path),
        )?;
        self.wait(id)?;
        Ok(self.listing(path))
    }

    /// Connect `sources` to `target` on the matrix at `path`.
    ///
    /// A locally cached target/source count that rules the request out
    /// short-circuits to `InvalidRoute` without a round trip; otherwise
    /// the device decides. Never retried.
    #[instrument(level = "debug", skip(self))]
    pub fn matrix_connect(
        &mut self,
        path: &[u32],
        target: u32,
        sources: &[u32],
    ) -> Result<(), SessionError> {
        if let Some(node) = self.tree.get(path)
            && let Some(matrix) = &node.matrix
        {
            let target_bad = matrix.target_count > 0 && target >= matrix.target_count;
            let source_bad = matrix.source_count > 0
                && sources.iter().any(|&s| s >= matrix.source_count);
            if target_bad || source_bad {
                warn!(target, ?sources, "Route outside matrix dimensions");
                return Err(SessionError::InvalidRoute {
                    target,
                    sources: sources.to_vec(),
                });
            }
        }

        let id = self.submit(
            RequestKind::MatrixConnect,
            path.to_vec(),
            glow::encode_matrix_connect(path, target, sources),
        )?;
        self.wait(id)
    }

    /// Resolve a dotted-integer path like `"1.10.1.1.3"` to its node.
    ///
    /// A cached path never touches the network. On a miss, one
    /// `GetDirectory` for the parent is issued and the lookup retried
    /// exactly once; a second miss is a definitive `NodeNotFound`.
    pub fn resolve_path(&mut self, dotted: &str) -> Result<TreeNode, SessionError> {
        let segments = parse_dotted(dotted)?;
        if !self.tree.contains(&segments)
            && let Some((_, parent)) = segments.split_last()
        {
            self.get_directory(parent)?;
        }
        self.tree
            .get(&segments)
            .cloned()
            .ok_or_else(|| SessionError::NodeNotFound {
                path: dotted.to_string(),
            })
    }

    /// Resolve a slash-separated identifier path like
    /// `"pro8/Video-Matrix/Matrix"`, fetching each level on demand.
    pub fn resolve_identifier_path(&mut self, path: &str) -> Result<TreeNode, SessionError> {
        let not_found = || SessionError::NodeNotFound {
            path: path.to_string(),
        };

        let mut cur: Vec<u32> = Vec::new();
        let mut any = false;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            any = true;
            let cached = self
                .tree
                .child_by_identifier(&cur, part)
                .map(|n| n.path.clone());
            cur = match cached {
                Some(next) => next,
                None => {
                    self.get_directory(&cur)?;
                    self.tree
                        .child_by_identifier(&cur, part)
                        .map(|n| n.path.clone())
                        .ok_or_else(not_found)?
                }
            };
        }
        if !any {
            return Err(SessionError::InvalidPath(path.to_string()));
        }
        self.tree.get(&cur).cloned().ok_or_else(not_found)
    }

    /// Close the session: cancel every pending request with
    /// `Disconnected` and refuse all further submissions.
    pub fn close(&mut self) {
        if !self.closed {
            info!("Closing session");
            self.teardown();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn teardown(&mut self) {
        self.closed = true;
        let cancelled = self.pending.len();
        self.pending.clear();
        if cancelled > 0 {
            debug!(cancelled, "Cancelled pending requests");
        }
        self.transport.close();
        self.observer.on_event(&EmberEvent::Disconnected);
    }

    /// Encode, frame and send a request; registers it as pending.
    fn submit(
        &mut self,
        kind: RequestKind,
        path: Vec<u32>,
        payload: Vec<u8>,
    ) -> Result<u64, SessionError> {
        if self.closed || !self.transport.is_connected() {
            return Err(SessionError::Disconnected);
        }

        let frame = s101::encode_ember_frame(&payload);
        match self.transport.send(&frame) {
            Ok(()) => {}
            Err(TransportError::Disconnected) => {
                self.teardown();
                return Err(SessionError::Disconnected);
            }
            Err(e) => {
                self.teardown();
                return Err(e.into());
            }
        }

        self.observer.on_event(&EmberEvent::Frame {
            direction: FrameDirection::Tx,
            length: frame.len(),
        });
        self.observer.on_event(&EmberEvent::RequestSent {
            kind,
            path: path.clone(),
        });

        let id = self.next_id;
        self.next_id += 1;
        self.pending.push_back(PendingRequest {
            id,
            path,
            kind,
            outcome: None,
        });
        Ok(id)
    }

    /// Pump the receive loop until request `id` completes, the deadline
    /// passes, or the transport drops.
    fn wait(&mut self, id: u64) -> Result<(), SessionError> {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(outcome) = self.take_outcome(id) {
                return outcome;
            }
            if self.closed {
                return Err(SessionError::Disconnected);
            }

            let now = Instant::now();
            if now >= deadline {
                self.cancel(id);
                return Err(SessionError::Timeout {
                    timeout_ms: self.config.timeout_ms,
                });
            }

            let chunk = match self.transport.recv(deadline - now) {
                Ok(chunk) => chunk,
                Err(TransportError::Timeout { .. }) => continue,
                Err(TransportError::Disconnected) => {
                    self.teardown();
                    continue;
                }
                Err(e) => {
                    self.teardown();
                    return Err(e.into());
                }
            };

            self.observer.on_event(&EmberEvent::Frame {
                direction: FrameDirection::Rx,
                length: chunk.len(),
            });

            // Responses are applied in arrival order before matching.
            for message in self.deframer.push(&chunk) {
                self.dispatch(message)?;
            }
        }
    }

    fn dispatch(&mut self, message: S101Message) -> Result<(), SessionError> {
        match message {
            S101Message::KeepaliveRequest => {
                self.observer.on_event(&EmberEvent::Keepalive);
                match self.transport.send(&s101::encode_keepalive_response()) {
                    Ok(()) => Ok(()),
                    Err(_) => {
                        self.teardown();
                        Ok(())
                    }
                }
            }
            S101Message::KeepaliveResponse => Ok(()),
            S101Message::Ember(payload) => {
                let decoded = match glow::decode(&payload) {
                    Ok(messages) => messages,
                    Err(e) => {
                        // Decode failures drop the message, not the session.
                        warn!(error = %e, "Dropping undecodable payload");
                        self.observer.on_event(&EmberEvent::MalformedMessage {
                            reason: e.to_string(),
                        });
                        return Ok(());
                    }
                };
                for message in decoded {
                    self.apply(message);
                }
                Ok(())
            }
        }
    }

    /// Apply one decoded message to the tree and the pending table.
    fn apply(&mut self, message: DecodedMessage) {
        match message {
            DecodedMessage::Directory { path, children } => {
                self.tree.merge_children(&path, &children);
                self.complete_oldest(&path, Ok(()));
            }
            DecodedMessage::ConnectionUpdate {
                matrix_path,
                target,
                sources,
                disposition,
            } => {
                if disposition == Some(Disposition::Locked) {
                    // Rejected: report, leave the mirrored state alone.
                    self.complete_oldest(
                        &matrix_path,
                        Err(SessionError::InvalidRoute {
                            target,
                            sources: sources.clone(),
                        }),
                    );
                    return;
                }

                self.tree.apply_connection(&matrix_path, target, &sources);
                self.observer.on_event(&EmberEvent::ConnectionState {
                    matrix_path: matrix_path.clone(),
                    target,
                    sources,
                });
                self.complete_oldest(&matrix_path, Ok(()));
            }
        }
    }

    /// Complete the oldest open pending whose target path is a prefix of
    /// (or equal to) the message path. Matching is by path alone; the
    /// message kind does not enter into it. Returns false when the
    /// message was unsolicited.
    fn complete_oldest(
        &mut self,
        message_path: &[u32],
        outcome: Result<(), SessionError>,
    ) -> bool {
        let Some(pos) = self
            .pending
            .iter()
            .position(|p| p.outcome.is_none() && message_path.starts_with(&p.path))
        else {
            debug!(path = ?message_path, "Unsolicited message, no pending matched");
            return false;
        };
        self.observer.on_event(&EmberEvent::RequestMatched {
            kind: self.pending[pos].kind,
            path: self.pending[pos].path.clone(),
        });
        self.pending[pos].outcome = Some(outcome);
        true
    }

    /// Current listing of `path` from the mirrored tree.
    fn listing(&self, path: &[u32]) -> Vec<ChildEntry> {
        self.tree
            .children(path)
            .into_iter()
            .map(|node| ChildEntry {
                number: node.number(),
                kind: node.kind,
                identifier: node.identifier.clone(),
                matrix: node.matrix.as_ref().map(|m| MatrixInfo {
                    target_count: m.target_count,
                    source_count: m.source_count,
                }),
            })
            .collect()
    }

    fn take_outcome(&mut self, id: u64) -> Option<Result<(), SessionError>> {
        let pos = self
            .pending
            .iter()
            .position(|p| p.id == id && p.outcome.is_some())?;
        self.pending.remove(pos).and_then(|p| p.outcome)
    }

    fn cancel(&mut self, id: u64) {
        if let Some(pos) = self.pending.iter().position(|p| p.id == id) {
            self.pending.remove(pos);
        }
    }
}

fn parse_dotted(dotted: &str) -> Result<Vec<u32>, SessionError> {
    if dotted.is_empty() {
        return Err(SessionError::InvalidPath(dotted.to_string()));
    }
    dotted
        .split('.')
        .map(|seg| seg.parse::<u32>())
        .collect::<Result<Vec<u32>, _>>()
        .map_err(|_| SessionError::InvalidPath(dotted.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::glow::testutil as build;
    use crate::protocol::{ElementKind, MatrixInfo};
    use crate::transport::MockTransport;
    use std::collections::BTreeSet;

    fn test_config() -> SessionConfig {
        SessionConfig {
            timeout_ms: 20,
            ..SessionConfig::default()
        }
    }

    fn session_with(mock: MockTransport) -> Session<MockTransport> {
        Session::with_transport(mock, test_config())
    }

    fn child(number: u32, identifier: &str) -> ChildEntry {
        ChildEntry {
            number,
            kind: ElementKind::Node,
            identifier: Some(identifier.to_string()),
            matrix: None,
        }
    }

    fn matrix_child(number: u32) -> ChildEntry {
        ChildEntry {
            number,
            kind: ElementKind::Matrix,
            identifier: Some("Matrix".to_string()),
            matrix: Some(MatrixInfo {
                target_count: 8,
                source_count: 8,
            }),
        }
    }

    #[test]
    fn test_cold_cache_resolution_fetches_parent() {
        // Empty tree: resolving a deep dotted path fetches the parent
        // directory once.
        let mut mock = MockTransport::new();
        let listing: Vec<ChildEntry> =
            (0..5).map(|i| child(i, &format!("label-{i}"))).collect();
        mock.queue_chunk(&s101::encode_ember_frame(&build::directory_response(
            &[1, 10, 1, 1],
            &listing,
        )));

        let mut session = session_with(mock);
        let node = session.resolve_path("1.10.1.1.3").unwrap();

        assert_eq!(node.path, vec![1, 10, 1, 1, 3]);
        assert_eq!(node.identifier.as_deref(), Some("label-3"));
        assert_eq!(session.transport.sent_count(), 1);
    }

    #[test]
    fn test_cached_resolution_is_offline() {
        let mut mock = MockTransport::new();
        mock.queue_chunk(&s101::encode_ember_frame(&build::directory_response(
            &[1, 10],
            &[child(3, "leaf")],
        )));

        let mut session = session_with(mock);
        session.resolve_path("1.10.3").unwrap();
        let requests = session.transport.sent_count();

        // Second resolution of the same path must not hit the wire.
        let node = session.resolve_path("1.10.3").unwrap();
        assert_eq!(node.identifier.as_deref(), Some("leaf"));
        assert_eq!(session.transport.sent_count(), requests);
    }

    #[test]
    fn test_missing_after_fetch_is_definitive() {
        let mut mock = MockTransport::new();
        mock.queue_chunk(&s101::encode_ember_frame(&build::directory_response(
            &[1],
            &[child(0, "only")],
        )));

        let mut session = session_with(mock);
        let err = session.resolve_path("1.7").unwrap_err();
        assert!(matches!(err, SessionError::NodeNotFound { .. }));
        // One fetch, no loop.
        assert_eq!(session.transport.sent_count(), 1);
    }

    #[test]
    fn test_invalid_dotted_path() {
        let session_err = parse_dotted("1.x.3").unwrap_err();
        assert!(matches!(session_err, SessionError::InvalidPath(_)));
        assert!(matches!(
            parse_dotted("").unwrap_err(),
            SessionError::InvalidPath(_)
        ));
    }

    #[test]
    fn test_identifier_path_resolution() {
        let mut mock = MockTransport::new();
        mock.queue_chunk(&s101::encode_ember_frame(&build::directory_response(
            &[],
            &[child(1, "pro8")],
        )));
        mock.queue_chunk(&s101::encode_ember_frame(&build::directory_response(
            &[1],
            &[child(10, "Video-Matrix")],
        )));
        mock.queue_chunk(&s101::encode_ember_frame(&build::directory_response(
            &[1, 10],
            &[matrix_child(3)],
        )));

        let mut session = session_with(mock);
        let node = session
            .resolve_identifier_path("pro8/Video-Matrix/Matrix")
            .unwrap();
        assert_eq!(node.path, vec![1, 10, 3]);
        assert_eq!(node.kind, ElementKind::Matrix);
        assert_eq!(session.transport.sent_count(), 3);
    }

    #[test]
    fn test_fifo_matching_on_equal_paths() {
        let mut session = session_with(MockTransport::new());
        let r1 = session
            .submit(
                RequestKind::GetDirectory,
                vec![1, 2],
                glow::encode_get_directory(&[1, 2]),
            )
            .unwrap();
        let r2 = session
            .submit(
                RequestKind::GetDirectory,
                vec![1, 2],
                glow::encode_get_directory(&[1, 2]),
            )
            .unwrap();

        // One response arrives; it must complete r1, not r2.
        for message in glow::decode(&build::directory_response(&[1, 2], &[child(0, "a")])).unwrap()
        {
            session.apply(message);
        }

        assert!(session.take_outcome(r1).is_some());
        assert!(session.take_outcome(r2).is_none());
    }

    #[test]
    fn test_prefix_matching() {
        let mut session = session_with(MockTransport::new());
        let id = session
            .submit(
                RequestKind::GetDirectory,
                vec![1],
                glow::encode_get_directory(&[1]),
            )
            .unwrap();

        // A response deeper under the requested path still matches.
        for message in
            glow::decode(&build::directory_response(&[1, 10], &[child(0, "a")])).unwrap()
        {
            session.apply(message);
        }
        assert!(session.take_outcome(id).is_some());
    }

    #[test]
    fn test_get_directory_timeout() {
        let mut session = session_with(MockTransport::new());
        let err = session.get_directory(&[1]).unwrap_err();
        assert!(matches!(err, SessionError::Timeout { timeout_ms: 20 }));
        // The timed-out request is gone from the table.
        assert!(session.pending.is_empty());
    }

    #[test]
    fn test_disconnect_cancels_all_and_blocks_new_requests() {
        let mut mock = MockTransport::new();
        mock.disconnect_after(0);

        let mut session = session_with(mock);
        let err = session.get_directory(&[1]).unwrap_err();
        assert!(matches!(err, SessionError::Disconnected));
        assert!(session.pending.is_empty());
        assert!(session.is_closed());

        // No new request may be submitted after teardown.
        assert!(matches!(
            session.get_directory(&[2]).unwrap_err(),
            SessionError::Disconnected
        ));
    }

    #[test]
    fn test_close_then_submit_rejected() {
        let mut session = session_with(MockTransport::new());
        session.close();
        assert!(matches!(
            session.matrix_connect(&[1], 0, &[0]).unwrap_err(),
            SessionError::Disconnected
        ));
    }

    #[test]
    fn test_matrix_connect_updates_connection_map() {
        let mut mock = MockTransport::new();
        mock.queue_chunk(&s101::encode_ember_frame(&build::directory_response(
            &[1, 10, 1],
            &[matrix_child(3)],
        )));
        mock.queue_chunk(&s101::encode_ember_frame(&build::connection_response(
            &[1, 10, 1, 3],
            2,
            &[5],
            Some(Disposition::Modified),
        )));

        let mut session = session_with(mock);
        session.resolve_path("1.10.1.3").unwrap();
        session.matrix_connect(&[1, 10, 1, 3], 2, &[5]).unwrap();

        let connections = session.tree().connections(&[1, 10, 1, 3]).unwrap();
        assert_eq!(connections[&2], BTreeSet::from([5]));
    }

    #[test]
    fn test_matrix_connect_rejection_leaves_map_unchanged() {
        let mut mock = MockTransport::new();
        mock.queue_chunk(&s101::encode_ember_frame(&build::directory_response(
            &[1, 10, 1],
            &[matrix_child(3)],
        )));
        // Tally for target 2 as part of the fetch.
        mock.queue_chunk(&s101::encode_ember_frame(&build::connection_response(
            &[1, 10, 1, 3],
            2,
            &[1],
            Some(Disposition::Tally),
        )));

        let mut session = session_with(mock);
        session.resolve_path("1.10.1.3").unwrap();
        session.get_directory(&[1, 10, 1, 3]).unwrap(); // pulls the tally in

        session
            .transport
            .queue_chunk(&s101::encode_ember_frame(&build::connection_response(
                &[1, 10, 1, 3],
                2,
                &[5],
                Some(Disposition::Locked),
            )));
        let err = session.matrix_connect(&[1, 10, 1, 3], 2, &[5]).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidRoute { target: 2, .. }
        ));
        let connections = session.tree().connections(&[1, 10, 1, 3]).unwrap();
        assert_eq!(connections[&2], BTreeSet::from([1]));
    }

    #[test]
    fn test_matrix_connect_bounds_checked_locally() {
        let mut mock = MockTransport::new();
        mock.queue_chunk(&s101::encode_ember_frame(&build::directory_response(
            &[1],
            &[matrix_child(3)], // 8x8
        )));

        let mut session = session_with(mock);
        session.resolve_path("1.3").unwrap();
        let sends = session.transport.sent_count();

        let err = session.matrix_connect(&[1, 3], 99, &[0]).unwrap_err();
        assert!(matches!(err, SessionError::InvalidRoute { target: 99, .. }));
        // Rejected before reaching the wire.
        assert_eq!(session.transport.sent_count(), sends);
    }

    #[test]
    fn test_directory_of_matrix_completed_by_connection_state() {
        let mut mock = MockTransport::new();
        mock.queue_chunk(&s101::encode_ember_frame(&build::directory_response(
            &[1, 10, 1],
            &[matrix_child(3)],
        )));
        // Providers commonly answer a matrix getDirectory with the
        // connection state alone, no element listing.
        mock.queue_chunk(&s101::encode_ember_frame(&build::connection_response(
            &[1, 10, 1, 3],
            2,
            &[5],
            Some(Disposition::Tally),
        )));

        let mut session = session_with(mock);
        session.resolve_path("1.10.1.3").unwrap();
        session.get_directory(&[1, 10, 1, 3]).unwrap();

        let connections = session.tree().connections(&[1, 10, 1, 3]).unwrap();
        assert_eq!(connections[&2], BTreeSet::from([5]));
    }

    #[test]
    fn test_unsolicited_update_for_unknown_path_dropped() {
        let mut mock = MockTransport::new();
        mock.queue_chunk(&s101::encode_ember_frame(&build::directory_response(
            &[],
            &[child(1, "pro8")],
        )));

        let mut session = session_with(mock);
        session.get_directory(&[]).unwrap();

        // An update for a path nobody asked about arrives ahead of the
        // answer to an unrelated in-flight request.
        session
            .transport
            .queue_chunk(&s101::encode_ember_frame(&build::connection_response(
                &[9, 9],
                0,
                &[1],
                Some(Disposition::Tally),
            )));
        session
            .transport
            .queue_chunk(&s101::encode_ember_frame(&build::directory_response(
                &[1],
                &[child(10, "Video-Matrix")],
            )));
        session.get_directory(&[1]).unwrap();
        assert!(session.tree().get(&[9, 9]).is_none());
    }

    #[test]
    fn test_keepalive_answered_during_wait() {
        let mut mock = MockTransport::new();
        mock.queue_chunk(&s101::encode_keepalive_request());
        mock.queue_chunk(&s101::encode_ember_frame(&build::directory_response(
            &[],
            &[child(1, "pro8")],
        )));

        let mut session = session_with(mock);
        session.get_directory(&[]).unwrap();

        // Request frame plus one keepalive response.
        assert_eq!(session.transport.sent_count(), 2);
        assert_eq!(
            *session.transport.sent().last().unwrap(),
            s101::encode_keepalive_response()
        );
    }

    #[test]
    fn test_malformed_payload_keeps_session_alive() {
        let mut mock = MockTransport::new();
        // Valid S101 frame around garbage EmBER.
        mock.queue_chunk(&s101::encode_ember_frame(&[0x13, 0x37]));
        mock.queue_chunk(&s101::encode_ember_frame(&build::directory_response(
            &[],
            &[child(1, "pro8")],
        )));

        let mut session = session_with(mock);
        let children = session.get_directory(&[]).unwrap();
        assert_eq!(children.len(), 1);
        assert!(!session.is_closed());
    }

    #[test]
    fn test_response_split_across_chunks() {
        let frame = s101::encode_ember_frame(&build::directory_response(&[], &[child(1, "x")]));
        let (a, b) = frame.split_at(frame.len() / 2);

        let mut mock = MockTransport::new();
        mock.queue_chunk(a);
        mock.queue_chunk(b);

        let mut session = session_with(mock);
        assert_eq!(session.get_directory(&[]).unwrap().len(), 1);
    }

    #[test]
    fn test_leaf_response_lists_child_under_parent() {
        let mut mock = MockTransport::new();
        mock.queue_chunk(&s101::encode_ember_frame(&build::leaf_response(
            &[1, 10, 1, 1, 3],
            "CAM 3",
        )));

        let mut session = session_with(mock);
        // Per-child replies complete a getDirectory of the parent.
        let children = session.get_directory(&[1, 10, 1, 1]).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].identifier.as_deref(), Some("CAM 3"));
        assert!(session.tree().contains(&[1, 10, 1, 1, 3]));
    }
}
