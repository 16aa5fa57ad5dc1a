//! Wire protocol: BER primitives, S101 framing, Glow messages.

pub mod ber;
pub mod glow;
pub mod s101;

pub use glow::{ChildEntry, DecodedMessage, Disposition, ElementKind, MatrixInfo};
pub use s101::{Deframer, S101Message};
