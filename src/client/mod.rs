//! The `client` module provides an async client for SSMP servers.
//!
//! [`SsmpClient`] speaks the line protocol over any async byte stream. It is
//! used by the `ssmp client` subcommand and by the end-to-end tests.

pub mod ssmp_client;
pub use ssmp_client::SsmpClient;
