/**
 * ============================================================================
 * QUEUE CONTROLLER MODULE
 * ============================================================================
 *
 * PURPOSE: Orchestrate enqueue, dispatch, acknowledgment, and reset
 *
 * STATES:
 * - Unconfigured: no usable endpoint; records are persisted, nothing is sent
 * - Idle:         nothing outstanding
 * - Dispatching:  exactly one bundle in flight on one dispatcher slot
 *
 * TRANSITIONS:
 * - Startup:   load settings (missing -> ConfigurationMissing), then either
 *              reset (resend flag) or resume the persisted backlog
 * - Enqueue:   append; if Idle, dispatch the head bundle
 * - Ack:       remove exactly the bundle, report UploadDone, pipeline the next
 *              bundle or go Idle
 * - Failure:   keep the queue, report UploadFailed, go Idle (no retry)
 * - Resend:    abort in-flight requests, wipe queue and markers, clear the flag
 * - Drain:     stop once nothing is outstanding; the in-flight bundle and any
 *              pipelined backlog are delivered first
 * - Shutdown:  stop immediately, aborting whatever is in flight
 *
 * EVENT LOOP:
 * - Device records, dispatch completions, and commands share one mpsc channel
 * - A single task applies them in order, so transitions never interleave
 * - Completions from an earlier generation (before a reset) are discarded
 *
 * ============================================================================
 */

use crate::collector::batch;
use crate::collector::client::{CompletionCallback, Dispatcher, Transport};
use crate::collector::config::{self, Settings};
use crate::collector::queue::DurableQueue;
use crate::collector::store::SharedStore;
use crate::collector::types::{
    CollectorError, DispatchCompletion, DispatchOutcome, Notification, QueueStatus, RecordKey,
    SyncStatistics,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/**
 * Everything the controller reacts to
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// A record delivered by the device link
    Enqueue { key: RecordKey, line: String },
    /// A dispatcher slot reached its terminal state
    DispatchCompleted(DispatchCompletion),
    /// The stored settings blob was rewritten
    SettingsChanged,
    /// Explicit reset request
    Resend,
    /// Finish outstanding deliveries, then stop
    Drain,
    Shutdown,
}

/**
 * Cloneable sender side of the controller's event channel
 */
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    events: mpsc::UnboundedSender<ControllerEvent>,
}

impl ControllerHandle {
    pub fn from_sender(events: mpsc::UnboundedSender<ControllerEvent>) -> Self {
        Self { events }
    }

    pub fn send(&self, event: ControllerEvent) -> Result<(), String> {
        self.events
            .send(event)
            .map_err(|_| "Queue controller is not running".to_string())
    }

    pub fn enqueue(&self, key: RecordKey, line: impl Into<String>) -> Result<(), String> {
        self.send(ControllerEvent::Enqueue {
            key,
            line: line.into(),
        })
    }

    pub fn settings_changed(&self) -> Result<(), String> {
        self.send(ControllerEvent::SettingsChanged)
    }

    pub fn resend(&self) -> Result<(), String> {
        self.send(ControllerEvent::Resend)
    }

    pub fn drain(&self) -> Result<(), String> {
        self.send(ControllerEvent::Drain)
    }

    pub fn shutdown(&self) -> Result<(), String> {
        self.send(ControllerEvent::Shutdown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControllerState {
    Unconfigured,
    Idle,
    Dispatching {
        slot: usize,
        generation: u64,
        dispatch_id: Uuid,
        bundle_size: usize,
    },
}

/**
 * The delivery state machine
 * Owns the durable queue and the dispatcher; no other component mutates them
 */
pub struct QueueController<T: Transport> {
    store: SharedStore,
    queue: DurableQueue,
    dispatcher: Dispatcher<T>,
    settings: Option<Settings>,
    state: ControllerState,
    generation: u64,
    draining: bool,
    handle: ControllerHandle,
    notifications: mpsc::UnboundedSender<Notification>,
    statistics: SyncStatistics,
}

impl<T: Transport> QueueController<T> {
    /**
     * Create a controller and its event channel
     * The persisted queue is loaded immediately; call start() (or run()) to
     * read settings and resume delivery
     */
    pub fn new(
        store: SharedStore,
        transport: Arc<T>,
        notifications: mpsc::UnboundedSender<Notification>,
    ) -> (Self, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = ControllerHandle::from_sender(events_tx);

        let completion_handle = handle.clone();
        let on_complete: CompletionCallback = Arc::new(move |completion| {
            if completion_handle
                .send(ControllerEvent::DispatchCompleted(completion))
                .is_err()
            {
                log::debug!("Dispatch completed after controller shutdown");
            }
        });

        let controller = Self {
            queue: DurableQueue::load(Arc::clone(&store)),
            store,
            dispatcher: Dispatcher::new(transport, on_complete),
            settings: None,
            state: ControllerState::Unconfigured,
            generation: 0,
            draining: false,
            handle,
            notifications,
            statistics: SyncStatistics::default(),
        };

        (controller, events_rx)
    }

    pub fn handle(&self) -> ControllerHandle {
        self.handle.clone()
    }

    /**
     * Startup transition
     */
    pub fn start(&mut self) {
        log::info!("Starting queue controller ({} pending records)", self.queue.len());
        self.apply_settings();
    }

    /**
     * Start, then apply events in arrival order until Shutdown or channel close
     */
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ControllerEvent>) {
        self.start();

        while let Some(event) = events.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }

        self.dispatcher.abort_all();
        log::info!("Queue controller stopped ({} records pending)", self.queue.len());
    }

    /**
     * Apply one event
     * Returns false once the controller should stop
     */
    pub fn handle_event(&mut self, event: ControllerEvent) -> bool {
        match event {
            ControllerEvent::Enqueue { key, line } => self.on_enqueue(key, line),
            ControllerEvent::DispatchCompleted(completion) => self.on_completion(completion),
            ControllerEvent::SettingsChanged => self.apply_settings(),
            ControllerEvent::Resend => self.reset(),
            ControllerEvent::Drain => {
                log::info!("Drain requested ({} records pending)", self.queue.len());
                self.draining = true;
            }
            ControllerEvent::Shutdown => {
                log::info!("Shutdown requested");
                return false;
            }
        }

        if self.draining && !matches!(self.state, ControllerState::Dispatching { .. }) {
            log::info!("Nothing in flight, drain complete");
            return false;
        }
        true
    }

    pub fn status(&self) -> QueueStatus {
        match self.state {
            ControllerState::Unconfigured => QueueStatus::Unconfigured,
            ControllerState::Idle => QueueStatus::Idle,
            ControllerState::Dispatching { .. } => QueueStatus::Dispatching,
        }
    }

    pub fn queue(&self) -> &DurableQueue {
        &self.queue
    }

    pub fn settings(&self) -> Option<&Settings> {
        self.settings.as_ref()
    }

    /// Number of bundles currently outstanding (0 or 1)
    pub fn outstanding(&self) -> usize {
        self.dispatcher.in_flight()
    }

    pub fn statistics(&self) -> SyncStatistics {
        let mut stats = self.statistics.clone();
        stats.pending_records = self.queue.len();
        stats.status = self.status();
        stats
    }

    fn notify(&self, notification: Notification) {
        log::debug!("Notify: {:?}", notification);
        if self.notifications.send(notification).is_err() {
            log::debug!("No notification listener");
        }
    }

    /**
     * (Re)load the settings snapshot and react to it
     */
    fn apply_settings(&mut self) {
        let settings = match config::load_settings(self.store.as_ref()) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Collector not configured: {}", e);
                self.settings = None;
                if !matches!(self.state, ControllerState::Dispatching { .. }) {
                    self.state = ControllerState::Unconfigured;
                }
                self.notify(Notification::ConfigurationMissing);
                return;
            }
        };

        let resend = settings.resend;
        self.settings = Some(settings);

        if resend {
            self.reset();
            return;
        }

        if self.state == ControllerState::Unconfigured {
            self.state = ControllerState::Idle;
            self.notify(Notification::ResumeState {
                last_sent: self.queue.last_sent(),
                pending_start: self.queue.head_key(),
            });
            self.dispatch_next();
        }
    }

    fn on_enqueue(&mut self, key: RecordKey, line: String) {
        let was_empty = self.queue.is_empty();
        self.queue.append(key, line);

        match self.state {
            ControllerState::Idle => {
                if was_empty {
                    self.notify(Notification::UploadStart { key });
                }
                self.dispatch_next();
            }
            ControllerState::Dispatching { .. } => {
                // Picked up by a later bundle once the current one completes
            }
            ControllerState::Unconfigured => {
                log::debug!("Record {} stored, not dispatching while unconfigured", key);
            }
        }
    }

    /**
     * Send the head bundle, or settle into Idle / Unconfigured
     */
    fn dispatch_next(&mut self) {
        let Some(settings) = self.settings.as_ref() else {
            self.state = ControllerState::Unconfigured;
            return;
        };

        let bundle = batch::select_bundle(&self.queue, settings.bundle_max);
        if bundle.is_empty() {
            self.state = ControllerState::Idle;
            return;
        }

        match self.dispatcher.send(&bundle, settings, self.generation) {
            Ok(ticket) => {
                self.state = ControllerState::Dispatching {
                    slot: ticket.slot,
                    generation: self.generation,
                    dispatch_id: ticket.dispatch_id,
                    bundle_size: bundle.size,
                };
            }
            Err(e) => {
                log::error!("Failed to dispatch bundle: {}", e);
                self.fail(&e);
            }
        }
    }

    fn on_completion(&mut self, completion: DispatchCompletion) {
        let ControllerState::Dispatching {
            slot,
            generation,
            dispatch_id,
            bundle_size,
        } = self.state
        else {
            log::debug!("Discarding completion with no dispatch outstanding: {:?}", completion);
            return;
        };

        if completion.slot != slot
            || completion.generation != generation
            || completion.dispatch_id != dispatch_id
        {
            log::debug!("Discarding stale completion: {:?}", completion);
            return;
        }

        self.dispatcher.settle(&completion);

        match completion.outcome {
            DispatchOutcome::Acknowledged => self.on_acknowledged(bundle_size),
            DispatchOutcome::Failed(reason) => self.fail(&CollectorError::transport(reason)),
        }
    }

    fn on_acknowledged(&mut self, bundle_size: usize) {
        let delivered = self.queue.remove_delivered(bundle_size);
        self.statistics.record_delivery(bundle_size);

        log::info!(
            "Bundle of {} records acknowledged ({} pending)",
            bundle_size,
            self.queue.len()
        );

        if let Some(key) = delivered {
            self.notify(Notification::UploadDone { key });
        }

        self.dispatch_next();
    }

    fn fail(&mut self, error: &CollectorError) {
        let reason = error.message().to_string();
        log::warn!("Upload failed: {} ({} records kept)", reason, self.queue.len());

        self.statistics.record_failure(&reason);
        self.state = if self.settings.is_some() {
            ControllerState::Idle
        } else {
            ControllerState::Unconfigured
        };
        self.notify(Notification::UploadFailed { reason });
    }

    /**
     * Resend: wipe local delivery state
     * No upload progress is reported; the device gets a fresh resume point
     */
    fn reset(&mut self) {
        log::info!("Resetting delivery state ({} pending records)", self.queue.len());

        self.dispatcher.abort_all();
        self.generation += 1;
        self.queue.reset_all();

        if let Some(settings) = self.settings.as_mut() {
            if settings.resend {
                settings.resend = false;
                if let Err(e) = config::save_settings(self.store.as_ref(), settings) {
                    log::error!("Failed to clear resend flag: {}", e);
                }
            }
        }

        self.state = if self.settings.is_some() {
            ControllerState::Idle
        } else {
            ControllerState::Unconfigured
        };

        self.notify(Notification::ResumeState {
            last_sent: self.queue.last_sent(),
            pending_start: None,
        });
    }
}
