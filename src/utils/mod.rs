//! The `utils` module provides shared definitions used across the `ssmp`
//! crate: the per-layer error types and logging initialisation.

pub mod error;
pub mod logging;

pub use error::{
    BrokerError, ClientError, FrameError, NameError, RegistryError, SessionError, TransportError,
};
