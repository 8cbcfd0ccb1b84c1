//! Connection index with secondary lookups by user, tenant and topic.
//!
//! # Structure
//!
//! ```text
//! entries:          conn-a ─► { ctx(u1, o1, w1), {vessel:created}, T }
//!                   conn-b ─► { ctx(u2, o1, -),  {},               T }
//!
//! by_user:          u1 ─► {conn-a}        u2 ─► {conn-b}
//! by_organization:  o1 ─► {conn-a, conn-b}
//! by_workspace:     w1 ─► {conn-a}
//! by_topic:         vessel:created ─► {conn-a}
//! ```
//!
//! Every mutation keeps the secondary maps an exact projection of `entries`:
//! no bucket references a missing connection and no bucket is left empty.
//! The index is not synchronized; the hub owns it from a single task.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use thiserror::Error;

use crate::domain::foundation::{ConnectionId, OrganizationId, UserId, WorkspaceId};

use super::connection::ConnectionContext;
use super::event::Topic;

/// Errors from index mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("Connection {0} is already registered")]
    AlreadyPresent(ConnectionId),

    #[error("Connection {0} is not registered")]
    NotPresent(ConnectionId),
}

/// One registered connection plus caller-owned data.
#[derive(Debug)]
pub struct IndexEntry<T> {
    context: ConnectionContext,
    subscriptions: HashSet<Topic>,
    value: T,
}

impl<T> IndexEntry<T> {
    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    pub fn subscriptions(&self) -> &HashSet<Topic> {
        &self.subscriptions
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

/// Primary connection set plus four secondary indexes.
#[derive(Debug)]
pub struct ConnectionIndex<T> {
    entries: HashMap<ConnectionId, IndexEntry<T>>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
    by_organization: HashMap<OrganizationId, HashSet<ConnectionId>>,
    by_workspace: HashMap<WorkspaceId, HashSet<ConnectionId>>,
    by_topic: HashMap<Topic, HashSet<ConnectionId>>,
    subscription_count: usize,
}

fn add_member<K: Hash + Eq>(map: &mut HashMap<K, HashSet<ConnectionId>>, key: K, id: ConnectionId) {
    map.entry(key).or_default().insert(id);
}

fn remove_member<K: Hash + Eq>(map: &mut HashMap<K, HashSet<ConnectionId>>, key: &K, id: &ConnectionId) {
    if let Some(bucket) = map.get_mut(key) {
        bucket.remove(id);
        if bucket.is_empty() {
            map.remove(key);
        }
    }
}

impl<T> ConnectionIndex<T> {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            by_user: HashMap::new(),
            by_organization: HashMap::new(),
            by_workspace: HashMap::new(),
            by_topic: HashMap::new(),
            subscription_count: 0,
        }
    }

    /// Adds a connection to the primary set and its context indexes.
    ///
    /// A duplicate ID is rejected and the existing entry left untouched.
    pub fn insert(
        &mut self,
        id: ConnectionId,
        context: ConnectionContext,
        value: T,
    ) -> Result<(), IndexError> {
        if self.entries.contains_key(&id) {
            return Err(IndexError::AlreadyPresent(id));
        }

        add_member(&mut self.by_user, context.user_id.clone(), id);
        if let Some(org) = &context.organization_id {
            add_member(&mut self.by_organization, org.clone(), id);
        }
        if let Some(ws) = &context.workspace_id {
            add_member(&mut self.by_workspace, ws.clone(), id);
        }

        self.entries.insert(
            id,
            IndexEntry {
                context,
                subscriptions: HashSet::new(),
                value,
            },
        );
        Ok(())
    }

    /// Removes a connection from every index it appears in.
    ///
    /// Returns `None` if the connection was not present, so repeated
    /// removal is harmless.
    pub fn remove(&mut self, id: &ConnectionId) -> Option<IndexEntry<T>> {
        let entry = self.entries.remove(id)?;

        remove_member(&mut self.by_user, &entry.context.user_id, id);
        if let Some(org) = &entry.context.organization_id {
            remove_member(&mut self.by_organization, org, id);
        }
        if let Some(ws) = &entry.context.workspace_id {
            remove_member(&mut self.by_workspace, ws, id);
        }
        for topic in &entry.subscriptions {
            remove_member(&mut self.by_topic, topic, id);
        }
        self.subscription_count -= entry.subscriptions.len();

        Some(entry)
    }

    /// Subscribes a connection to a topic. Returns `false` if already subscribed.
    pub fn subscribe(&mut self, id: &ConnectionId, topic: Topic) -> Result<bool, IndexError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or(IndexError::NotPresent(*id))?;

        if !entry.subscriptions.insert(topic.clone()) {
            return Ok(false);
        }
        add_member(&mut self.by_topic, topic, *id);
        self.subscription_count += 1;
        Ok(true)
    }

    /// Unsubscribes a connection from a topic. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&mut self, id: &ConnectionId, topic: &Topic) -> Result<bool, IndexError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or(IndexError::NotPresent(*id))?;

        if !entry.subscriptions.remove(topic) {
            return Ok(false);
        }
        remove_member(&mut self.by_topic, topic, id);
        self.subscription_count -= 1;
        Ok(true)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&IndexEntry<T>> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConnectionId, &IndexEntry<T>)> {
        self.entries.iter()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.entries.keys().copied().collect()
    }

    pub fn user_connections(&self, user_id: &UserId) -> Option<&HashSet<ConnectionId>> {
        self.by_user.get(user_id)
    }

    pub fn organization_connections(
        &self,
        organization_id: &OrganizationId,
    ) -> Option<&HashSet<ConnectionId>> {
        self.by_organization.get(organization_id)
    }

    pub fn workspace_connections(&self, workspace_id: &WorkspaceId) -> Option<&HashSet<ConnectionId>> {
        self.by_workspace.get(workspace_id)
    }

    pub fn topic_subscribers(&self, topic: &Topic) -> Option<&HashSet<ConnectionId>> {
        self.by_topic.get(topic)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }

    pub fn organization_count(&self) -> usize {
        self.by_organization.len()
    }

    pub fn workspace_count(&self) -> usize {
        self.by_workspace.len()
    }

    pub fn topic_count(&self) -> usize {
        self.by_topic.len()
    }

    /// Total (connection, topic) pairs.
    pub fn subscription_count(&self) -> usize {
        self.subscription_count
    }

    /// Checks that the secondary indexes are an exact projection of the
    /// primary set. Returns a description of the first violation found.
    pub fn verify(&self) -> Result<(), String> {
        fn check_buckets<K: Hash + Eq + std::fmt::Debug, T>(
            name: &str,
            map: &HashMap<K, HashSet<ConnectionId>>,
            entries: &HashMap<ConnectionId, IndexEntry<T>>,
            belongs: impl Fn(&IndexEntry<T>, &K) -> bool,
        ) -> Result<usize, String> {
            let mut members = 0;
            for (key, bucket) in map {
                if bucket.is_empty() {
                    return Err(format!("{name}: empty bucket for {key:?}"));
                }
                for id in bucket {
                    let entry = entries
                        .get(id)
                        .ok_or_else(|| format!("{name}: {key:?} references missing {id}"))?;
                    if !belongs(entry, key) {
                        return Err(format!("{name}: {id} filed under wrong key {key:?}"));
                    }
                }
                members += bucket.len();
            }
            Ok(members)
        }

        let users = check_buckets("by_user", &self.by_user, &self.entries, |e, k| {
            &e.context.user_id == k
        })?;
        let orgs = check_buckets("by_organization", &self.by_organization, &self.entries, |e, k| {
            e.context.organization_id.as_ref() == Some(k)
        })?;
        let workspaces = check_buckets("by_workspace", &self.by_workspace, &self.entries, |e, k| {
            e.context.workspace_id.as_ref() == Some(k)
        })?;
        let topics = check_buckets("by_topic", &self.by_topic, &self.entries, |e, k| {
            e.subscriptions.contains(k)
        })?;

        let expected_orgs = self
            .entries
            .values()
            .filter(|e| e.context.organization_id.is_some())
            .count();
        let expected_workspaces = self
            .entries
            .values()
            .filter(|e| e.context.workspace_id.is_some())
            .count();
        let expected_topics: usize = self.entries.values().map(|e| e.subscriptions.len()).sum();

        if users != self.entries.len() {
            return Err(format!("by_user holds {users}, expected {}", self.entries.len()));
        }
        if orgs != expected_orgs {
            return Err(format!("by_organization holds {orgs}, expected {expected_orgs}"));
        }
        if workspaces != expected_workspaces {
            return Err(format!("by_workspace holds {workspaces}, expected {expected_workspaces}"));
        }
        if topics != expected_topics || topics != self.subscription_count {
            return Err(format!(
                "by_topic holds {topics}, expected {expected_topics} (counter {})",
                self.subscription_count
            ));
        }
        Ok(())
    }
}

impl<T> Default for ConnectionIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}
