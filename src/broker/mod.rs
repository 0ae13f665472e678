//! The broker module contains the core of the SSMP server: the topic
//! registry, the protocol state machine that dispatches commands and fans
//! out events, and the arbiter task that serializes access to both.
//!
//! Transports never touch the [`Broker`] directly. They obtain a
//! [`BrokerHandle`], open a [`Connection`] per client with
//! [`BrokerHandle::on_connect`], feed it bytes, and drain the session's
//! [`Inbox`](crate::session::Inbox) to the socket.

pub mod arbiter;
pub mod engine;
pub mod policy;
pub mod registry;

pub use arbiter::{BrokerHandle, Connection};
pub use engine::{Broker, BrokerStats, Delivery};
pub use policy::{BrokerPolicy, EmptyTopicPolicy, IdentityPolicy};
pub use registry::{Subscriber, Topic, TopicRegistry};
