/**
 * ============================================================================
 * COLLECTOR TYPES MODULE
 * ============================================================================
 *
 * PURPOSE: Define the data structures shared across the delivery pipeline
 *
 * TYPES DEFINED:
 * - QueueItem: One pending record (key + raw comma-separated line)
 * - Bundle: Head-anchored slice of the queue selected for one dispatch
 * - DispatchOutcome / DispatchCompletion: Terminal result of one request slot
 * - Notification: Events emitted towards the device session
 * - QueueStatus: Controller state for status display
 * - SyncStatistics: Delivery counters for monitoring
 * - CollectorError: Classified configuration / transport failures
 *
 * ============================================================================
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Record identifier, a device timestamp in practice
pub type RecordKey = i64;

/**
 * One pending record waiting for delivery
 * Items are kept in insertion order; keys are expected to be non-decreasing
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub key: RecordKey,
    pub line: String,
}

impl QueueItem {
    pub fn new(key: RecordKey, line: impl Into<String>) -> Self {
        Self {
            key,
            line: line.into(),
        }
    }
}

/**
 * A bounded prefix of the queue selected for one dispatch attempt
 * `size` is what must be removed from the queue once the collector acknowledges
 */
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bundle {
    pub lines: Vec<String>,
    pub size: usize,
    pub first_key: Option<RecordKey>,
    pub last_key: Option<RecordKey>,
}

impl Bundle {
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// Terminal result of one outbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Acknowledged,
    Failed(String),
}

/**
 * Completion report delivered by the dispatcher for one slot
 * `slot`, `generation` and `dispatch_id` identify which request it belongs to,
 * so a late report from an aborted request can be told apart from the current one
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchCompletion {
    pub slot: usize,
    pub generation: u64,
    pub dispatch_id: Uuid,
    pub bundle_size: usize,
    pub outcome: DispatchOutcome,
}

/**
 * Events emitted outward to the device session
 * Fire-and-forget: nothing is expected back
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notification {
    /// First item of a newly non-empty queue
    UploadStart { key: RecordKey },
    /// Key of the most recently acknowledged item
    UploadDone { key: RecordKey },
    UploadFailed { reason: String },
    ConfigurationMissing,
    /// Startup handshake: last enqueued key and head of the pending backlog
    ResumeState {
        last_sent: RecordKey,
        pending_start: Option<RecordKey>,
    },
}

/**
 * Controller state for status display
 * Mirrors the internal state machine without the per-dispatch details
 */
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum QueueStatus {
    Unconfigured,
    Idle,
    Dispatching,
}

/**
 * Delivery statistics for monitoring and status display
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatistics {
    pub total_records_delivered: u64,
    pub total_bundles_delivered: u64,
    pub total_failures: u64,
    pub last_delivery_time: Option<DateTime<Utc>>,
    pub pending_records: usize,
    pub last_error: Option<String>,
    pub status: QueueStatus,
}

impl Default for SyncStatistics {
    fn default() -> Self {
        Self {
            total_records_delivered: 0,
            total_bundles_delivered: 0,
            total_failures: 0,
            last_delivery_time: None,
            pending_records: 0,
            last_error: None,
            status: QueueStatus::Unconfigured,
        }
    }
}

impl SyncStatistics {
    pub fn record_delivery(&mut self, records: usize) {
        self.total_records_delivered += records as u64;
        self.total_bundles_delivered += 1;
        self.last_delivery_time = Some(Utc::now());
        self.last_error = None;
    }

    pub fn record_failure(&mut self, reason: &str) {
        self.total_failures += 1;
        self.last_error = Some(reason.to_string());
    }
}

/**
 * Collector error types
 * Configuration errors stop startup; transport errors leave the queue untouched
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectorError {
    /// Missing or invalid endpoint / settings blob
    Configuration { message: String },

    /// Network failure or non-success HTTP status on a dispatch
    Transport { message: String },
}

impl CollectorError {
    pub fn configuration(message: impl Into<String>) -> Self {
        CollectorError::Configuration {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        CollectorError::Transport {
            message: message.into(),
        }
    }

    /// Human-readable description without the category prefix
    pub fn message(&self) -> &str {
        match self {
            CollectorError::Configuration { message } => message,
            CollectorError::Transport { message } => message,
        }
    }
}

impl std::fmt::Display for CollectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectorError::Configuration { message } => {
                write!(f, "Configuration error: {}", message)
            }
            CollectorError::Transport { message } => {
                write!(f, "Transport error: {}", message)
            }
        }
    }
}

impl std::error::Error for CollectorError {}
