//! Broker engine
//!
//! This module contains the protocol state machine responsible for:
//! - tracking connected sessions and the identities bound to them
//! - applying commands against the topic registry
//! - fanning out deliveries and presence events to subscribers
//! - cleaning up after disconnects, malformed input and stalled readers
//!
//! Concurrency and usage notes:
//! - The API here is synchronous and expects a single owner. In the server
//!   that owner is the arbiter task, which serializes every command from
//!   every connection; this is what makes a publish and a subscribe on the
//!   same topic observe a single order.
//! - [`Broker::dispatch`] only computes deliveries. [`Broker::handle`]
//!   computes and applies them.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::broker::policy::{BrokerPolicy, EmptyTopicPolicy, IdentityPolicy};
use crate::broker::registry::TopicRegistry;
use crate::protocol::codec::{MalformedFrame, NO_SEQUENCE};
use crate::protocol::{Command, CommandKind, ErrorCode, Event, Identity, TopicName};
use crate::session::{Inbox, Session, SessionId, outbox};
use crate::utils::error::{BrokerError, SessionError};

/// An event addressed to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub target: SessionId,
    pub event: Event,
}

impl Delivery {
    pub fn new(target: SessionId, event: Event) -> Self {
        Self { target, event }
    }
}

/// Counters describing the broker at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub sessions: usize,
    pub authenticated: usize,
    pub topics: usize,
}

#[derive(Debug, Default)]
pub struct Broker {
    sessions: HashMap<SessionId, Session>,
    identities: HashMap<Identity, SessionId>,
    registry: TopicRegistry,
    policy: BrokerPolicy,
}

impl Broker {
    pub fn new(policy: BrokerPolicy) -> Self {
        Self {
            sessions: HashMap::new(),
            identities: HashMap::new(),
            registry: TopicRegistry::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &BrokerPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Session currently bound to `identity`, if any.
    pub fn session_for(&self, identity: &Identity) -> Option<SessionId> {
        self.identities.get(identity).copied()
    }

    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            sessions: self.sessions.len(),
            authenticated: self.identities.len(),
            topics: self.registry.topic_count(),
        }
    }

    /// Registers a new unauthenticated session and returns the inbox its
    /// writer drains.
    pub fn connect(&mut self) -> Result<(SessionId, Inbox), BrokerError> {
        if self.sessions.len() >= self.policy.max_connections {
            return Err(BrokerError::TooManyConnections {
                limit: self.policy.max_connections,
            });
        }
        let (outbox, inbox) = outbox::channel(self.policy.max_queue_len);
        let id = SessionId::new();
        self.sessions.insert(id, Session::create(id, outbox));
        info!(session = %id, "session opened");
        Ok((id, inbox))
    }

    pub fn handle(&mut self, session: SessionId, command: Command) {
        let deliveries = self.dispatch(session, command);
        self.deliver(deliveries);
    }

    /// Replies `ProtocolError` to a malformed record and closes the session
    /// once too many arrive in a row.
    pub fn handle_malformed(&mut self, id: SessionId, frame: MalformedFrame) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        let streak = session.record_malformed();
        warn!(session = %id, error = %frame.error, streak, "malformed frame");

        let seq = frame.seq.unwrap_or_else(|| NO_SEQUENCE.to_string());
        let reply = Event::error_with(seq, ErrorCode::ProtocolError, frame.error.to_string());
        self.deliver(vec![Delivery::new(id, reply)]);

        if streak >= self.policy.max_malformed_frames {
            info!(session = %id, streak, "closing session after repeated malformed frames");
            self.disconnect(id);
        }
    }

    /// Tears a session down: leaves every topic with offline presence,
    /// releases its identity and drops it. Unknown sessions are ignored.
    pub fn disconnect(&mut self, id: SessionId) {
        let deliveries = self.close_session(id);
        self.deliver(deliveries);
    }

    /// The dispatch table: applies one command and returns the resulting
    /// events, without enqueueing them.
    pub fn dispatch(&mut self, id: SessionId, command: Command) -> Vec<Delivery> {
        let Command { seq, kind } = command;
        let Some(session) = self.sessions.get_mut(&id) else {
            debug!(session = %id, "command for unknown session dropped");
            return Vec::new();
        };
        session.reset_malformed();
        let authenticated = session.is_authenticated();
        debug!(session = %id, seq = %seq, verb = kind.verb(), "dispatch");

        match kind {
            CommandKind::Ping => vec![Delivery::new(id, Event::Pong)],
            CommandKind::Login { identity } => self.login(id, seq, &identity),
            _ if !authenticated => {
                vec![Delivery::new(id, Event::error(seq, ErrorCode::NotAuthenticated))]
            }
            CommandKind::Logout => self.logout(id, seq),
            CommandKind::Subscribe { topic } => self.subscribe(id, seq, topic),
            CommandKind::Unsubscribe { topic } => self.unsubscribe(id, seq, topic),
            CommandKind::Publish { topic, payload } => self.publish(id, seq, topic, payload),
        }
    }

    fn login(&mut self, id: SessionId, seq: String, raw: &str) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        let already_authenticated = self
            .sessions
            .get(&id)
            .is_some_and(Session::is_authenticated);

        if !already_authenticated {
            if let Ok(candidate) = Identity::new(raw) {
                if let Some(holder) = self.session_for(&candidate).filter(|h| *h != id) {
                    match self.policy.identity {
                        IdentityPolicy::Reject => {
                            info!(session = %id, identity = %candidate, "login rejected, identity in use");
                            return vec![Delivery::new(
                                id,
                                Event::error(seq, ErrorCode::IdentityInUse),
                            )];
                        }
                        IdentityPolicy::Takeover => {
                            info!(session = %id, previous = %holder, identity = %candidate, "identity taken over");
                            deliveries.extend(self.close_session(holder));
                        }
                    }
                }
            }
        }

        let Some(session) = self.sessions.get_mut(&id) else {
            return deliveries;
        };
        match session.authenticate(raw) {
            Ok(identity) => {
                info!(session = %id, identity = %identity, "logged in");
                self.identities.insert(identity.clone(), id);
                deliveries.push(Delivery::new(id, Event::ok(seq)));
            }
            Err(e) => {
                debug!(session = %id, error = %e, "login failed");
                let reply = match e {
                    SessionError::InvalidIdentity(ref reason) => {
                        Event::error_with(seq, e.code(), reason.to_string())
                    }
                    _ => Event::error(seq, e.code()),
                };
                deliveries.push(Delivery::new(id, reply));
            }
        }
        deliveries
    }

    fn logout(&mut self, id: SessionId, seq: String) -> Vec<Delivery> {
        let Some(session) = self.sessions.get_mut(&id) else {
            return Vec::new();
        };
        let Some(identity) = session.identity().cloned() else {
            return vec![Delivery::new(id, Event::error(seq, ErrorCode::NotAuthenticated))];
        };

        let topics = self.registry.remove_session_everywhere(session);
        let mut deliveries: Vec<Delivery> = topics
            .iter()
            .flat_map(|topic| presence(&self.registry, topic, &identity, false, id))
            .collect();
        if let Err(e) = session.logout() {
            warn!(session = %id, error = %e, "logout on inconsistent session");
        }
        self.release_identity(&identity, id);
        info!(session = %id, identity = %identity, topics = topics.len(), "logged out");

        deliveries.push(Delivery::new(id, Event::ok(seq)));
        deliveries
    }

    fn subscribe(&mut self, id: SessionId, seq: String, topic: TopicName) -> Vec<Delivery> {
        let Some(session) = self.sessions.get_mut(&id) else {
            return Vec::new();
        };
        if let Err(e) = self.registry.subscribe(&topic, session) {
            return vec![Delivery::new(id, Event::error(seq, e.code()))];
        }
        let Some(identity) = session.identity().cloned() else {
            return Vec::new();
        };
        debug!(session = %id, topic = %topic, "subscribed");

        let mut deliveries = presence(&self.registry, &topic, &identity, true, id);
        deliveries.push(Delivery::new(id, Event::ok(seq)));
        deliveries
    }

    fn unsubscribe(&mut self, id: SessionId, seq: String, topic: TopicName) -> Vec<Delivery> {
        let Some(session) = self.sessions.get_mut(&id) else {
            return Vec::new();
        };
        if let Err(e) = self.registry.unsubscribe(&topic, session) {
            return vec![Delivery::new(id, Event::error(seq, e.code()))];
        }
        let Some(identity) = session.identity().cloned() else {
            return Vec::new();
        };
        debug!(session = %id, topic = %topic, "unsubscribed");

        let mut deliveries = presence(&self.registry, &topic, &identity, false, id);
        deliveries.push(Delivery::new(id, Event::ok(seq)));
        deliveries
    }

    fn publish(
        &mut self,
        id: SessionId,
        seq: String,
        topic: TopicName,
        payload: String,
    ) -> Vec<Delivery> {
        let Some(from) = self.sessions.get(&id).and_then(|s| s.identity().cloned()) else {
            return vec![Delivery::new(id, Event::error(seq, ErrorCode::NotAuthenticated))];
        };

        let subscribers = self.registry.subscribers_of(&topic);
        if subscribers.is_empty() {
            debug!(session = %id, topic = %topic, "publish to topic without subscribers");
            let reply = match self.policy.empty_topic {
                EmptyTopicPolicy::Accept => Event::ok(seq),
                EmptyTopicPolicy::Reject => Event::error(seq, ErrorCode::NoSuchTopic),
            };
            return vec![Delivery::new(id, reply)];
        }

        let mut deliveries: Vec<Delivery> = subscribers
            .into_iter()
            .filter(|s| s.session != id)
            .map(|s| {
                Delivery::new(
                    s.session,
                    Event::Deliver {
                        topic: topic.clone(),
                        from: from.clone(),
                        payload: payload.clone(),
                    },
                )
            })
            .collect();
        debug!(session = %id, topic = %topic, recipients = deliveries.len(), "published");
        deliveries.push(Delivery::new(id, Event::ok(seq)));
        deliveries
    }

    /// Enqueues deliveries in order. Sessions whose queue overflows are
    /// closed afterwards, which may in turn produce presence events.
    fn deliver(&mut self, deliveries: Vec<Delivery>) {
        let mut overflowed = Vec::new();
        for Delivery { target, event } in deliveries {
            let Some(session) = self.sessions.get(&target) else {
                continue;
            };
            match session.enqueue(event) {
                Ok(()) => {}
                Err(SessionError::QueueFull { capacity }) => {
                    warn!(session = %target, capacity, "outbound queue full, disconnecting");
                    if !overflowed.contains(&target) {
                        overflowed.push(target);
                    }
                }
                Err(e) => debug!(session = %target, error = %e, "event not enqueued"),
            }
        }
        for target in overflowed {
            let more = self.close_session(target);
            self.deliver(more);
        }
    }

    fn close_session(&mut self, id: SessionId) -> Vec<Delivery> {
        let Some(mut session) = self.sessions.remove(&id) else {
            return Vec::new();
        };
        let mut deliveries = Vec::new();
        if let Some(identity) = session.identity().cloned() {
            let topics = self.registry.remove_session_everywhere(&mut session);
            deliveries.extend(
                topics
                    .iter()
                    .flat_map(|topic| presence(&self.registry, topic, &identity, false, id)),
            );
            self.release_identity(&identity, id);
        }
        session.close();
        info!(session = %id, "session closed");
        deliveries
    }

    fn release_identity(&mut self, identity: &Identity, id: SessionId) {
        if self.identities.get(identity) == Some(&id) {
            self.identities.remove(identity);
        }
    }
}

/// Presence events for every current subscriber of `topic` except `except`.
fn presence(
    registry: &TopicRegistry,
    topic: &TopicName,
    identity: &Identity,
    online: bool,
    except: SessionId,
) -> Vec<Delivery> {
    registry
        .subscribers_of(topic)
        .into_iter()
        .filter(|s| s.session != except)
        .map(|s| {
            Delivery::new(
                s.session,
                Event::Presence {
                    topic: topic.clone(),
                    identity: identity.clone(),
                    online,
                },
            )
        })
        .collect()
}
