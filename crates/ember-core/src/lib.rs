//! Ember-Core: Ember+ consumer client for Lawo matrix routers.
//!
//! A minimal Ember+ (GDMP) client: it establishes a session, walks the
//! remote object tree lazily, resolves dotted or identifier paths, and
//! issues matrix connect operations.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: ASN.1 BER primitives, S101 framing, Glow messages
//! - **Transport**: TCP byte channel abstraction (tcp, mock)
//! - **Tree**: lazy in-memory mirror of the remote object tree
//! - **Events**: observer pattern for UI decoupling
//! - **Session**: request engine with path-matched response correlation
//!
//! # Example
//!
//! ```no_run
//! use ember_core::{Session, SessionConfig};
//!
//! let config = SessionConfig {
//!     host: "10.0.0.42".to_string(),
//!     port: 9000,
//!     ..Default::default()
//! };
//!
//! let mut session = Session::connect(config).expect("connect failed");
//! let matrix = session
//!     .resolve_identifier_path("pro8/Video-Matrix/Matrix")
//!     .expect("no matrix");
//! session
//!     .matrix_connect(&matrix.path, 2, &[5])
//!     .expect("route rejected");
//! ```

pub mod events;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod tree;

// Re-exports for convenience
pub use events::{EmberEvent, EmberObserver, FrameDirection, NullObserver, RequestKind, TracingObserver};
pub use protocol::{ChildEntry, DecodedMessage, Disposition, ElementKind, MatrixInfo};
pub use session::{Session, SessionConfig, SessionError};
pub use transport::{MockTransport, TcpTransport, Transport, TransportError};
pub use tree::{MatrixState, Tree, TreeNode};
