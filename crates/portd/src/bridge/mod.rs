//! Control connection plumbing between the controller and the daemon.
//!
//! # Architecture
//!
//! - **protocol**: Message types (CommandFrame, Envelope, CommandKind, payloads)
//! - **codec**: Length-prefixed text framing for AsyncRead/AsyncWrite
//! - **transport**: Endpoint connection (websocket, tcp, unix)

pub mod codec;
pub mod protocol;
pub mod transport;
