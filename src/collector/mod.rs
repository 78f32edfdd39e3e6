/**
 * ============================================================================
 * COLLECTOR MODULE
 * ============================================================================
 * 
 * PURPOSE: Durable delivery of device health records to an HTTP collector
 * as bundled JSON POSTs, in order, surviving restarts and network failures.
 * 
 * ARCHITECTURE:
 * - types: Data structures, notifications, errors
 * - formatter: Raw record parsing and JSON payload formatting
 * - store: Persistent key-value slots
 * - queue: Durable FIFO of pending records
 * - batch: Bundle selection from the queue head
 * - config: Settings schema, parsing, and persistence
 * - client: Rotating request slots and the HTTP transport
 * - manager: Queue controller state machine and event loop
 * - bridge: Device session messages in and out
 * 
 * ============================================================================
 */

pub mod types;
pub mod formatter;
pub mod store;
pub mod queue;
pub mod batch;
pub mod config;
pub mod client;
pub mod manager;
pub mod bridge;
