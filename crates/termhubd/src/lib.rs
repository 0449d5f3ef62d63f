//! termhub daemon - PTY session registry and broadcast server
//!
//! This crate provides the infrastructure for `termhubd`:
//! - `session` - PTY-backed child processes and their I/O threads
//! - `registry` - actor owning sessions, client bindings and broadcasts
//! - `broadcaster` - fan-out of events to every connection
//! - `server` - Unix socket listener and per-connection dispatcher
//! - `lifecycle` - socket probing, PID file, daemon state
//! - `process_tree` - advisory child-process query
//! - `shortcuts` - persisted shortcut list
//! - `config` / `cli` - configuration layers and the command line
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       termhubd daemon                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │  DaemonServer   │────▶│       RegistryActor         │    │
//! │  │ (Unix Socket)   │     │ (sessions, bindings, queues)│    │
//! │  └────────┬────────┘     └──────┬───────────────▲──────┘    │
//! │           │                     │               │           │
//! │           │ connections         │ lines         │ PtyEvent  │
//! │           ▼                     ▼               │           │
//! │  ┌─────────────────┐     ┌──────────────┐ ┌─────┴───────┐   │
//! │  │ConnectionHandler│◀────│ outbound     │ │ PTY threads │   │
//! │  │ (per connection)│     │ queues       │ │ (per session)│  │
//! │  └─────────────────┘     └──────────────┘ └─────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod broadcaster;
pub mod cli;
pub mod config;
pub mod lifecycle;
pub mod process_tree;
pub mod registry;
pub mod server;
pub mod session;
pub mod shortcuts;
