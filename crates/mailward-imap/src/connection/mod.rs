//! Connections: transport, framing, the type-state client and IDLE.

mod client;
mod framed;
mod idle;
mod stream;

pub use client::{Authenticated, Client, NotAuthenticated, Selected, Session};
pub use framed::FramedStream;
pub use idle::{IdleEvent, IdleHandle};
pub use stream::{ImapStream, connect, connect_plain, connect_tls, tls_connector};
