//! Transport layer: trait plus tcp/mock implementations.

pub mod mock;
pub mod tcp;
pub mod traits;

pub use mock::MockTransport;
pub use tcp::TcpTransport;
pub use traits::{Transport, TransportError};
