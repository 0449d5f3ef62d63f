//! termhub Protocol - Wire protocol for daemon communication
//!
//! This crate provides the message types exchanged between the daemon and
//! its front-end connections, plus the newline-delimited JSON framing used
//! on the socket.

pub mod codec;
pub mod message;

pub use codec::{encode_line, Frame, FrameError, JsonLinesCodec, MAX_LINE_LENGTH};
pub use message::{
    BroadcastEvent, ClientMessage, Command, DaemonMessage, DecodeError, Request, RequestId,
    RequestKind, Response, ResponseBody, UNKNOWN_MESSAGE_TYPE,
};
