//! Tokio plumbing: a TCP [`Transport`](crate::Transport) and the loop that
//! drives a [`Session`](crate::Session) from its events.

pub mod driver;
pub mod tcp;

pub use driver::{DISCONNECT_TIMEOUT, drive};
pub use tcp::{DEFAULT_PORT, TcpTransport, parse_address};
