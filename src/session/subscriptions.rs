//! Desired subscription state
//!
//! The set records what the caller *wants* to be subscribed to, independent of
//! whether the broker currently agrees. It is replayed in full after every
//! reconnect. Each entry also remembers whether the broker has accepted it on
//! the current connection, so a filter whose SUBSCRIBE failed is sent again
//! when the caller retries.

use crate::protocol::{topic_matches, QoS};
use std::collections::BTreeMap;

/// Outcome of recording a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionChange {
    /// Filter was not in the set
    Added,
    /// Filter was present with a different QoS
    QosChanged { previous: QoS },
    /// Filter was present with the same QoS but never accepted on this connection
    Unconfirmed,
    /// Filter was present with the same QoS and accepted; nothing to send
    Unchanged,
}

impl SubscriptionChange {
    /// Whether the broker has to be told about this change
    pub fn needs_request(&self) -> bool {
        !matches!(self, SubscriptionChange::Unchanged)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    qos: QoS,
    confirmed: bool,
}

/// Topic filter to requested QoS
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    filters: BTreeMap<String, Entry>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a desired subscription
    ///
    /// A new or changed entry starts unconfirmed.
    pub fn insert(&mut self, filter: &str, qos: QoS) -> SubscriptionChange {
        let entry = Entry {
            qos,
            confirmed: false,
        };
        match self.filters.insert(filter.to_string(), entry) {
            None => SubscriptionChange::Added,
            Some(previous) if previous.qos != qos => SubscriptionChange::QosChanged {
                previous: previous.qos,
            },
            Some(previous) if previous.confirmed => {
                self.filters.insert(filter.to_string(), previous);
                SubscriptionChange::Unchanged
            }
            Some(_) => SubscriptionChange::Unconfirmed,
        }
    }

    /// Forget a subscription; returns true if it was present
    pub fn remove(&mut self, filter: &str) -> bool {
        self.filters.remove(filter).is_some()
    }

    pub fn contains(&self, filter: &str) -> bool {
        self.filters.contains_key(filter)
    }

    pub fn qos(&self, filter: &str) -> Option<QoS> {
        self.filters.get(filter).map(|entry| entry.qos)
    }

    /// Whether the broker accepted `filter` on the current connection
    pub fn is_confirmed(&self, filter: &str) -> bool {
        self.filters.get(filter).is_some_and(|entry| entry.confirmed)
    }

    /// Mark accepted requests; entries whose QoS changed since are left alone
    pub fn confirm(&mut self, requests: &[(String, QoS)]) {
        for (filter, qos) in requests {
            if let Some(entry) = self.filters.get_mut(filter) {
                if entry.qos == *qos {
                    entry.confirmed = true;
                }
            }
        }
    }

    /// Forget every confirmation, e.g. when the connection is lost
    pub fn unconfirm_all(&mut self) {
        for entry in self.filters.values_mut() {
            entry.confirmed = false;
        }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Whether any desired filter matches a concrete topic
    pub fn matches(&self, topic: &str) -> bool {
        self.filters.keys().any(|filter| topic_matches(filter, topic))
    }

    /// Full set as subscribe requests, in filter order
    pub fn to_requests(&self) -> Vec<(String, QoS)> {
        self.filters
            .iter()
            .map(|(filter, entry)| (filter.clone(), entry.qos))
            .collect()
    }
}
