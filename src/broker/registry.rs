//! Topic registry
//!
//! Maps each topic name to its subscribers. The inverse relation lives on
//! each [`Session`] as its subscription set; every method that changes one
//! view changes the other in the same call, so they cannot drift apart.
//!
//! Topics exist only while they have subscribers: the first subscription
//! creates one and the last unsubscription removes it.

use std::collections::{BTreeMap, HashMap};

use crate::protocol::{Identity, TopicName};
use crate::session::{Session, SessionId};
use crate::utils::error::RegistryError;

#[derive(Debug)]
pub struct Topic {
    name: TopicName,
    subscribers: BTreeMap<SessionId, Identity>,
}

impl Topic {
    fn new(name: TopicName) -> Self {
        Self {
            name,
            subscribers: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &TopicName {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn contains(&self, session: SessionId) -> bool {
        self.subscribers.contains_key(&session)
    }
}

/// One entry of a subscriber snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub session: SessionId,
    pub identity: Identity,
}

#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: HashMap<TopicName, Topic>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an authenticated session to `topic`, creating the topic if needed.
    pub fn subscribe(
        &mut self,
        topic: &TopicName,
        session: &mut Session,
    ) -> Result<(), RegistryError> {
        let identity = session
            .identity()
            .cloned()
            .ok_or(RegistryError::NotAuthenticated)?;
        if session.subscriptions().contains(topic) {
            return Err(RegistryError::AlreadySubscribed);
        }

        self.topics
            .entry(topic.clone())
            .or_insert_with(|| Topic::new(topic.clone()))
            .subscribers
            .insert(session.id(), identity);
        session.subscriptions_mut().insert(topic.clone());
        Ok(())
    }

    /// Removes a session from `topic`, deleting the topic once it is empty.
    pub fn unsubscribe(
        &mut self,
        topic: &TopicName,
        session: &mut Session,
    ) -> Result<(), RegistryError> {
        if !session.subscriptions_mut().remove(topic) {
            return Err(RegistryError::NotSubscribed);
        }
        self.detach(topic, session.id());
        Ok(())
    }

    /// Removes a session from every topic it belongs to and returns those
    /// topics in name order.
    pub fn remove_session_everywhere(&mut self, session: &mut Session) -> Vec<TopicName> {
        let topics = std::mem::take(session.subscriptions_mut());
        for topic in &topics {
            self.detach(topic, session.id());
        }
        topics.into_iter().collect()
    }

    /// Point-in-time copy of a topic's subscribers; empty if the topic does
    /// not exist.
    pub fn subscribers_of(&self, topic: &TopicName) -> Vec<Subscriber> {
        self.topics
            .get(topic)
            .map(|t| {
                t.subscribers
                    .iter()
                    .map(|(session, identity)| Subscriber {
                        session: *session,
                        identity: identity.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn topic(&self, name: &TopicName) -> Option<&Topic> {
        self.topics.get(name)
    }

    pub fn contains(&self, name: &TopicName) -> bool {
        self.topics.contains_key(name)
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Names of all live topics, sorted.
    pub fn topics(&self) -> Vec<TopicName> {
        let mut names: Vec<_> = self.topics.keys().cloned().collect();
        names.sort();
        names
    }

    fn detach(&mut self, topic: &TopicName, session: SessionId) {
        if let Some(entry) = self.topics.get_mut(topic) {
            entry.subscribers.remove(&session);
            if entry.subscribers.is_empty() {
                self.topics.remove(topic);
            }
        }
    }
}
