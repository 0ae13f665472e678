//! The `session` module defines the per-connection state tracked by the
//! broker: the authentication state machine, the subscription set and the
//! outbound event queue that decouples fan-out from the connection's writes.

pub mod outbox;
pub mod state;

pub use outbox::{Inbox, Outbox, SessionClosed};
pub use state::{Session, SessionId, SessionState};
