//! Bounded event archive with topic and correlation indexes (spec §3).
//! Entries are bounded by count and age; eviction removes the oldest.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;

use crate::context::topic_pattern_matches;
use crate::schema::Event;

pub struct EventStore {
    events: RwLock<VecDeque<Event>>,
    capacity: usize,
    max_age: Duration,
}

impl EventStore {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            events: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            max_age,
        }
    }

    pub fn append(&self, event: Event) {
        let mut events = self.events.write().unwrap();
        events.push_back(event);
        self.evict(&mut events);
    }

    fn evict(&self, events: &mut VecDeque<Event>) {
        while events.len() > self.capacity {
            events.pop_front();
        }
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.max_age).unwrap_or(chrono::Duration::zero());
        while events
            .front()
            .map(|e| e.timestamp < cutoff)
            .unwrap_or(false)
        {
            events.pop_front();
        }
    }

    pub fn by_topic(&self, pattern: &str) -> Vec<Event> {
        self.events
            .read()
            .unwrap()
            .iter()
            .filter(|e| topic_pattern_matches(pattern, &e.topic))
            .cloned()
            .collect()
    }

    pub fn by_correlation(&self, correlation_id: &str) -> Vec<Event> {
        self.events
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.correlation_id.as_deref() == Some(correlation_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().unwrap().is_empty()
    }

    /// Build a correlation index snapshot keyed by correlation id, for
    /// diagnostics/stats.
    pub fn correlation_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for event in self.events.read().unwrap().iter() {
            if let Some(id) = &event.correlation_id {
                *counts.entry(id.clone()).or_insert(0) += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(topic: &str, correlation: Option<&str>) -> Event {
        Event::new(topic, json!({}), "test").with_correlation(correlation.map(String::from))
    }

    #[test]
    fn capacity_evicts_oldest() {
        let store = EventStore::new(2, Duration::from_secs(3600));
        store.append(event("a", None));
        store.append(event("b", None));
        store.append(event("c", None));
        assert_eq!(store.len(), 2);
        assert_eq!(store.by_topic("a").len(), 0);
        assert_eq!(store.by_topic("c").len(), 1);
    }

    #[test]
    fn correlation_lookup_finds_matching_events() {
        let store = EventStore::new(100, Duration::from_secs(3600));
        store.append(event("order.created", Some("corr-1")));
        store.append(event("order.shipped", Some("corr-1")));
        store.append(event("order.created", Some("corr-2")));
        assert_eq!(store.by_correlation("corr-1").len(), 2);
    }

    #[test]
    fn wildcard_topic_query() {
        let store = EventStore::new(100, Duration::from_secs(3600));
        store.append(event("orders.123.created", None));
        store.append(event("orders.456.shipped", None));
        assert_eq!(store.by_topic("orders.**").len(), 2);
        assert_eq!(store.by_topic("orders.*.created").len(), 1);
    }
}
