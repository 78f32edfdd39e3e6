/**
 * ============================================================================
 * BUNDLE SELECTION MODULE
 * ============================================================================
 *
 * PURPOSE: Choose the slice of the queue shipped as one request
 *
 * BUNDLING STRATEGY:
 * - Head-anchored: always the oldest pending records
 * - Size-bounded: at most `bundle_max` records (clamped to at least 1)
 * - Near the tail the bundle is shorter; its exact size is what gets
 *   removed once the collector acknowledges
 *
 * ============================================================================
 */

use crate::collector::queue::DurableQueue;
use crate::collector::types::Bundle;

/**
 * Select the next bundle from the queue head
 * Pure: does not mutate the queue. Returns an empty bundle for an empty queue.
 */
pub fn select_bundle(queue: &DurableQueue, bundle_max: usize) -> Bundle {
    let head = queue.peek_head(bundle_max.max(1));

    Bundle {
        lines: head.iter().map(|item| item.line.clone()).collect(),
        size: head.len(),
        first_key: head.first().map(|item| item.key),
        last_key: head.last().map(|item| item.key),
    }
}
