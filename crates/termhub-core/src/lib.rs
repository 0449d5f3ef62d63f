//! termhub Core - Shared types for PTY session multiplexing
//!
//! This crate provides the domain types shared between
//! the daemon (termhubd) and the wire protocol.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod ring_buffer;
pub mod session;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use ring_buffer::{BufferLimits, BufferStats, RingBuffer};
pub use session::{ClientId, ExitInfo, SessionInfo, SessionName, TermSize, MAX_SESSION_NAME_LEN};
