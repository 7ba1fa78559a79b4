//! portd: a command dispatch daemon for sandboxed worker hosts.
//!
//! - [`daemon`]: serves named commands from a control connection, one at a time
//! - [`port`]: slot-addressed store-and-forward envelopes between processes
//! - [`semaphore`]: FIFO counting semaphore with purge
//! - [`host`] and [`services`]: the file and process capabilities handlers use

pub mod bridge;
pub mod config;
pub mod daemon;
pub mod handlers;
pub mod host;
pub mod logging;
pub mod port;
pub mod pull;
pub mod semaphore;
pub mod services;

pub use bridge::protocol::{CommandFrame, CommandKind, Envelope};
pub use config::{DaemonConfig, HostConfig, PortConfig};
pub use daemon::{Daemon, DaemonContext, DaemonState};
pub use handlers::{HandlerError, Registry};
pub use port::{FileSlotHost, MemorySlotHost, Port, PortNumber, SlotHost};
pub use semaphore::{Lock, Semaphore, SemaphoreError};
