use std::collections::BTreeSet;
use std::fmt;

use uuid::Uuid;

use crate::protocol::{Event, Identity, TopicName};
use crate::session::outbox::Outbox;
use crate::utils::error::SessionError;

/// Opaque handle naming one connection for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Closed,
}

/// Server-side state for one connected client.
///
/// The subscription set mirrors the topic registry and is only modified
/// through [`TopicRegistry`](crate::broker::TopicRegistry), which keeps the
/// two views in step. While unauthenticated the set is always empty.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    identity: Option<Identity>,
    state: SessionState,
    subscriptions: BTreeSet<TopicName>,
    outbox: Option<Outbox>,
    malformed_streak: u32,
}

impl Session {
    pub fn create(id: SessionId, outbox: Outbox) -> Self {
        Self {
            id,
            identity: None,
            state: SessionState::Unauthenticated,
            subscriptions: BTreeSet::new(),
            outbox: Some(outbox),
            malformed_streak: 0,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    pub fn subscriptions(&self) -> &BTreeSet<TopicName> {
        &self.subscriptions
    }

    pub(crate) fn subscriptions_mut(&mut self) -> &mut BTreeSet<TopicName> {
        &mut self.subscriptions
    }

    /// Binds `identity` to the session. Succeeds exactly once per login.
    pub fn authenticate(&mut self, identity: &str) -> Result<&Identity, SessionError> {
        match self.state {
            SessionState::Authenticated => return Err(SessionError::AlreadyAuthenticated),
            SessionState::Closed => return Err(SessionError::Closed),
            SessionState::Unauthenticated => {}
        }
        let identity = Identity::new(identity).map_err(SessionError::InvalidIdentity)?;
        self.state = SessionState::Authenticated;
        Ok(self.identity.insert(identity))
    }

    /// Unbinds the identity. The caller must have removed every subscription
    /// first.
    pub fn logout(&mut self) -> Result<Identity, SessionError> {
        if self.state != SessionState::Authenticated {
            return Err(SessionError::NotAuthenticated);
        }
        debug_assert!(self.subscriptions.is_empty());
        self.state = SessionState::Unauthenticated;
        self.identity.take().ok_or(SessionError::NotAuthenticated)
    }

    pub fn enqueue(&self, event: Event) -> Result<(), SessionError> {
        self.outbox
            .as_ref()
            .ok_or(SessionError::Closed)?
            .push(event)
    }

    pub fn queued(&self) -> usize {
        self.outbox.as_ref().map_or(0, Outbox::len)
    }

    /// Marks the session closed and drops its outbox, which ends the
    /// connection's writer once queued events are flushed. Returns `false`
    /// if it was already closed.
    pub fn close(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.state = SessionState::Closed;
        self.outbox = None;
        true
    }

    pub(crate) fn record_malformed(&mut self) -> u32 {
        self.malformed_streak += 1;
        self.malformed_streak
    }

    pub(crate) fn reset_malformed(&mut self) {
        self.malformed_streak = 0;
    }
}
