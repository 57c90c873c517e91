//! Topic membership and event fan-out.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::Value;
use tracing::trace;

use super::envelope;
use crate::connection::{ConnectionId, Payload, Transport};

/// Registry of topic subscriptions.
///
/// Topics are created on first subscription and removed as soon as their
/// last subscriber leaves. Each member is recorded with its session
/// identifier so publications can be filtered by session.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: HashMap<String, BTreeMap<ConnectionId, String>>,
    by_connection: HashMap<ConnectionId, BTreeSet<String>>,
}

impl TopicRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Add `id` to `topic`. Returns `false` if it was already a member.
    pub fn subscribe(&mut self, topic: &str, id: ConnectionId, session_id: &str) -> bool {
        let members = self.topics.entry(topic.to_owned()).or_default();
        if members.contains_key(&id) {
            return false;
        }
        members.insert(id, session_id.to_owned());
        self.by_connection
            .entry(id)
            .or_default()
            .insert(topic.to_owned());
        true
    }

    /// Remove `id` from `topic`. Returns `false` if it was not a member.
    pub fn unsubscribe(&mut self, topic: &str, id: ConnectionId) -> bool {
        let Some(members) = self.topics.get_mut(topic) else {
            return false;
        };
        if members.remove(&id).is_none() {
            return false;
        }
        if members.is_empty() {
            self.topics.remove(topic);
        }
        if let Some(topics) = self.by_connection.get_mut(&id) {
            topics.remove(topic);
            if topics.is_empty() {
                self.by_connection.remove(&id);
            }
        }
        true
    }

    /// Remove `id` from every topic, returning the topics it left.
    pub fn remove_connection(&mut self, id: ConnectionId) -> Vec<String> {
        let topics = self.by_connection.remove(&id).unwrap_or_default();
        for topic in &topics {
            if let Some(members) = self.topics.get_mut(topic) {
                members.remove(&id);
                if members.is_empty() {
                    self.topics.remove(topic);
                }
            }
        }
        topics.into_iter().collect()
    }

    /// Returns `true` if `id` is subscribed to `topic`.
    #[must_use]
    pub fn contains(&self, topic: &str, id: ConnectionId) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|members| members.contains_key(&id))
    }

    /// Number of connections subscribed to `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, BTreeMap::len)
    }

    /// Connections subscribed to `topic`, in ascending id order.
    pub fn subscribers(&self, topic: &str) -> impl Iterator<Item = ConnectionId> + '_ {
        self.topics
            .get(topic)
            .into_iter()
            .flat_map(|members| members.keys().copied())
    }

    /// Topics `id` is subscribed to, in lexical order.
    pub fn topics_of(&self, id: ConnectionId) -> impl Iterator<Item = &str> + '_ {
        self.by_connection
            .get(&id)
            .into_iter()
            .flat_map(|topics| topics.iter().map(String::as_str))
    }

    /// Number of live topics.
    #[must_use]
    pub fn topic_count(&self) -> usize { self.topics.len() }

    /// Returns `true` if no topic has subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.topics.is_empty() }

    /// Send `[8, topic, event]` to the members of `topic`.
    ///
    /// Members whose session id appears in `exclude` are skipped. With
    /// `eligible` set, only the listed sessions receive the event, so an
    /// empty list reaches nobody. The envelope is serialized once. Returns
    /// the number of recipients.
    pub fn broadcast(
        &self,
        transport: &mut dyn Transport,
        topic: &str,
        event: &Value,
        exclude: &[String],
        eligible: Option<&[String]>,
    ) -> usize {
        let Some(members) = self.topics.get(topic) else {
            return 0;
        };
        let text = envelope::event(topic, event);
        let mut delivered = 0;
        for (&id, session) in members {
            if exclude.contains(session) || eligible.is_some_and(|allowed| !allowed.contains(session))
            {
                continue;
            }
            transport.send(id, Payload::Text(text.clone()));
            delivered += 1;
        }
        trace!(topic, recipients = delivered, "event broadcast");
        delivered
    }
}
