//! The `transport` module connects network clients to the broker.
//!
//! Both listeners speak the same line protocol and differ only in framing on
//! the wire: raw TCP carries a plain byte stream, WebSocket carries records
//! inside text or binary messages. Adapters own no protocol state; they open
//! a session per connection through the
//! [`BrokerHandle`](crate::broker::BrokerHandle), forward inbound bytes and
//! write out whatever the session's inbox yields.

pub mod tcp;
pub mod websocket;

pub use tcp::{serve, start_tcp_server};
pub use websocket::{serve_websocket, start_websocket_server};

#[cfg(test)]
mod tests;
