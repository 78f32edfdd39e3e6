/**
 * ============================================================================
 * DURABLE QUEUE MODULE
 * ============================================================================
 *
 * PURPOSE: Ordered, persisted backlog of records awaiting acknowledgment
 *
 * STORAGE STRUCTURE (one slot per value in the key-value store):
 * - toSend:        "<key>;<line>|<key>;<line>|..."  (oldest first)
 * - lastSent:      key of the most recently enqueued record
 * - lastDelivered: key of the most recently acknowledged record
 *
 * QUEUE BEHAVIOR:
 * - FIFO (First In First Out) ordering
 * - Every mutation rewrites the serialized form before returning
 * - Removal only from the head, only after acknowledgment
 * - Malformed persisted entries are skipped on load
 *
 * ============================================================================
 */

use crate::collector::store::SharedStore;
use crate::collector::types::{QueueItem, RecordKey};

/// Store slot holding the serialized queue
pub const QUEUE_KEY: &str = "toSend";

/// Store slot holding the last enqueued key
pub const LAST_SENT_KEY: &str = "lastSent";

/// Store slot holding the last acknowledged key
pub const LAST_DELIVERED_KEY: &str = "lastDelivered";

/// Separator between serialized items
pub const ITEM_SEPARATOR: char = '|';

/// Separator between key and line inside one item
pub const FIELD_SEPARATOR: char = ';';

/**
 * Serialize items as `key;line` pairs joined by `|`
 */
pub fn serialize_items(items: &[QueueItem]) -> String {
    items
        .iter()
        .map(|item| format!("{}{}{}", item.key, FIELD_SEPARATOR, item.line))
        .collect::<Vec<_>>()
        .join(&ITEM_SEPARATOR.to_string())
}

/**
 * Parse the persisted form back into items
 * Entries without a separator or with a non-integer key are dropped
 */
pub fn deserialize_items(serialized: &str) -> Vec<QueueItem> {
    if serialized.is_empty() {
        return Vec::new();
    }

    serialized
        .split(ITEM_SEPARATOR)
        .filter_map(|entry| {
            let Some((key, line)) = entry.split_once(FIELD_SEPARATOR) else {
                log::warn!("[QUEUE] Skipping persisted entry without key: {:?}", entry);
                return None;
            };
            match key.trim().parse::<RecordKey>() {
                Ok(key) => Some(QueueItem::new(key, line)),
                Err(e) => {
                    log::warn!("[QUEUE] Skipping persisted entry with bad key {:?}: {}", key, e);
                    None
                }
            }
        })
        .collect()
}

/**
 * Durable FIFO queue of pending records
 * Exclusively owned by the queue controller
 */
pub struct DurableQueue {
    store: SharedStore,
    items: Vec<QueueItem>,
}

impl DurableQueue {
    /**
     * Rehydrate the queue from the store
     * An absent or empty slot yields an empty queue
     */
    pub fn load(store: SharedStore) -> Self {
        let items = store
            .get(QUEUE_KEY)
            .map(|serialized| deserialize_items(&serialized))
            .unwrap_or_default();

        if items.is_empty() {
            log::info!("[QUEUE] No pending records, starting with empty queue");
        } else {
            log::info!("[QUEUE] Loaded {} pending records", items.len());
        }

        Self { store, items }
    }

    /**
     * Append one record at the tail
     * Persists the queue and the last enqueued key before returning
     */
    pub fn append(&mut self, key: RecordKey, line: impl Into<String>) {
        self.items.push(QueueItem::new(key, line));
        self.persist_items();
        self.persist_scalar(LAST_SENT_KEY, Some(key));
        log::debug!("[QUEUE] Enqueued record {} ({} pending)", key, self.items.len());
    }

    /**
     * Remove the first `count` items after an acknowledgment
     * Returns the key of the last removed item and records it as delivered.
     *
     * Panics if `count` exceeds the queue length: the dispatcher and the
     * controller disagree about what was sent.
     */
    pub fn remove_delivered(&mut self, count: usize) -> Option<RecordKey> {
        assert!(
            count <= self.items.len(),
            "acknowledged bundle of {} records exceeds queue length {}",
            count,
            self.items.len()
        );

        if count == 0 {
            return None;
        }

        let last_key = self.items.drain(..count).last().map(|item| item.key);
        self.persist_items();
        self.persist_scalar(LAST_DELIVERED_KEY, last_key);

        log::debug!(
            "[QUEUE] Removed {} delivered records ({} remaining)",
            count,
            self.items.len()
        );
        last_key
    }

    /**
     * Up to `count` items from the head, without mutating
     */
    pub fn peek_head(&self, count: usize) -> &[QueueItem] {
        &self.items[..count.min(self.items.len())]
    }

    pub fn head_key(&self) -> Option<RecordKey> {
        self.items.first().map(|item| item.key)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    /// Last enqueued key, 0 when nothing was ever enqueued
    pub fn last_sent(&self) -> RecordKey {
        self.read_scalar(LAST_SENT_KEY).unwrap_or(0)
    }

    pub fn last_delivered(&self) -> Option<RecordKey> {
        self.read_scalar(LAST_DELIVERED_KEY)
    }

    /**
     * Clear the queue and both key markers
     * Used only by the resend reset
     */
    pub fn reset_all(&mut self) {
        log::info!("[QUEUE] Clearing queue ({} records)", self.items.len());
        self.items.clear();
        self.persist_items();
        self.persist_scalar(LAST_SENT_KEY, None);
        self.persist_scalar(LAST_DELIVERED_KEY, None);
    }

    fn persist_items(&self) {
        if let Err(e) = self.store.set(QUEUE_KEY, &serialize_items(&self.items)) {
            log::error!("[QUEUE] Failed to persist queue: {}", e);
        }
    }

    fn persist_scalar(&self, name: &str, value: Option<RecordKey>) {
        let result = match value {
            Some(key) => self.store.set(name, &key.to_string()),
            None => self.store.remove(name),
        };
        if let Err(e) = result {
            log::error!("[QUEUE] Failed to persist {}: {}", name, e);
        }
    }

    fn read_scalar(&self, name: &str) -> Option<RecordKey> {
        self.store.get(name)?.trim().parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::store::{KeyValueStore, MemoryStore};
    use std::sync::Arc;

    fn keys(queue: &DurableQueue) -> Vec<RecordKey> {
        queue.items().iter().map(|item| item.key).collect()
    }

    #[test]
    fn test_append_persists_queue_and_last_sent() {
        let store = Arc::new(MemoryStore::new());
        let mut queue = DurableQueue::load(store.clone());

        queue.append(100, "100,1,2,3,4,5,6,7");
        queue.append(101, "101,1,2,3,4,5,6,7");

        assert_eq!(
            store.get(QUEUE_KEY).as_deref(),
            Some("100;100,1,2,3,4,5,6,7|101;101,1,2,3,4,5,6,7")
        );
        assert_eq!(store.get(LAST_SENT_KEY).as_deref(), Some("101"));
        assert_eq!(queue.last_sent(), 101);
        assert!(queue.last_delivered().is_none());
    }

    #[test]
    fn test_remove_delivered_round_trips_through_store() {
        let store = Arc::new(MemoryStore::new());
        let mut queue = DurableQueue::load(store.clone());
        for key in 1..=5 {
            queue.append(key, format!("{},0", key));
        }

        let last = queue.remove_delivered(2);
        assert_eq!(last, Some(2));
        assert_eq!(keys(&queue), vec![3, 4, 5]);
        assert_eq!(queue.last_delivered(), Some(2));

        // A fresh load reproduces the truncated sequence
        let reloaded = DurableQueue::load(store.clone());
        assert_eq!(reloaded.items(), queue.items());
        assert_eq!(reloaded.last_sent(), 5);
    }

    #[test]
    fn test_remove_zero_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let mut queue = DurableQueue::load(store.clone());
        queue.append(1, "1");

        assert_eq!(queue.remove_delivered(0), None);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    #[should_panic(expected = "exceeds queue length")]
    fn test_remove_more_than_present_panics() {
        let store = Arc::new(MemoryStore::new());
        let mut queue = DurableQueue::load(store);
        queue.append(1, "1");
        queue.remove_delivered(2);
    }

    #[test]
    fn test_peek_head_is_bounded_and_non_mutating() {
        let store = Arc::new(MemoryStore::new());
        let mut queue = DurableQueue::load(store);
        queue.append(1, "a");
        queue.append(2, "b");

        assert_eq!(queue.peek_head(1).len(), 1);
        assert_eq!(queue.peek_head(10).len(), 2);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.head_key(), Some(1));
    }

    #[test]
    fn test_reset_all_clears_markers() {
        let store = Arc::new(MemoryStore::new());
        let mut queue = DurableQueue::load(store.clone());
        queue.append(1, "a");
        queue.append(2, "b");
        queue.remove_delivered(1);

        queue.reset_all();

        assert!(queue.is_empty());
        assert_eq!(store.get(QUEUE_KEY).as_deref(), Some(""));
        assert!(store.get(LAST_SENT_KEY).is_none());
        assert!(store.get(LAST_DELIVERED_KEY).is_none());
        assert_eq!(queue.last_sent(), 0);
    }

    #[test]
    fn test_load_skips_malformed_entries() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(QUEUE_KEY, "1;1,2,3|garbage|x;4,5|2;6,7;8")
            .unwrap();

        let queue = DurableQueue::load(store);
        assert_eq!(
            queue.items(),
            &[QueueItem::new(1, "1,2,3"), QueueItem::new(2, "6,7;8")]
        );
    }

    #[test]
    fn test_empty_serialization_loads_empty() {
        assert!(deserialize_items("").is_empty());
        assert_eq!(serialize_items(&[]), "");
    }
}
