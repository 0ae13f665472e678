//! # SSMP
//!
//! `ssmp` is an in-memory publish/subscribe broker speaking SSMP, the
//! "Stupid-Simple Messaging Protocol": a newline-delimited text protocol in
//! which clients log in under an identity, subscribe to named topics and
//! publish payloads that are fanned out to every other subscriber, along
//! with presence notices as subscribers come and go.
//!
//! ## Core Modules
//!
//! - `protocol`: wire types and the line codec.
//! - `session`: per-connection state and the bounded outbound queue.
//! - `broker`: the topic registry, the dispatch state machine and the arbiter
//!   task that serializes every mutation.
//! - `transport`: TCP and WebSocket listeners feeding connections into the broker.
//! - `client`: an async client for the protocol.
//! - `config`: settings loaded from file and environment.
//! - `utils`: error types and logging initialisation.

pub mod broker;
pub mod client;
pub mod config;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod utils;
