/**
 * ============================================================================
 * DISPATCH CLIENT MODULE
 * ============================================================================
 *
 * PURPOSE: Issue bundle POSTs to the collector and report their outcome
 *
 * PROTOCOL:
 * 1. Parse each bundle line into a record, serialize as a JSON array
 * 2. POST to the endpoint with:
 *      Authorization: Token token=<auth_token>
 *      Content-Type: application/json;charset=UTF-8
 * 3. Any 2xx response is an acknowledgment; the body is not interpreted
 * 4. Network errors and non-2xx statuses are failures with a readable reason
 *
 * SLOT LIFECYCLE:
 * - A fixed pool of request slots used in strict rotation
 * - idle -> in flight -> acknowledged | failed -> (reused on rotation)
 * - Every request carries the caller's generation and a dispatch id, so an
 *   aborted request that completes late is recognizable as stale
 * - abort_all() cancels every in-flight slot without waiting
 *
 * ============================================================================
 */

use crate::collector::config::Settings;
use crate::collector::formatter;
use crate::collector::types::{Bundle, CollectorError, DispatchCompletion, DispatchOutcome};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Content type of every bundle POST
pub const CONTENT_TYPE: &str = "application/json;charset=UTF-8";

/// Reason reported when the request never produced an HTTP response
pub const NETWORK_ERROR: &str = "Network Error";

/// Number of alternating request slots
pub const SLOT_COUNT: usize = 2;

/// Callback receiving every slot completion
pub type CompletionCallback = Arc<dyn Fn(DispatchCompletion) + Send + Sync>;

/**
 * One bundle POST, fully prepared
 */
#[derive(Debug, Clone)]
pub struct PostRequest {
    pub dispatch_id: Uuid,
    pub url: String,
    pub auth_token: String,
    pub body: String,
    pub timeout: Option<Duration>,
}

impl PostRequest {
    pub fn authorization(&self) -> String {
        format!("Token token={}", self.auth_token)
    }
}

/**
 * Outbound HTTP capability
 * Ok(()) means the collector acknowledged the bundle
 */
pub trait Transport: Send + Sync + 'static {
    fn post(&self, request: PostRequest) -> impl Future<Output = Result<(), CollectorError>> + Send;
}

/**
 * reqwest-backed transport
 */
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;
        Ok(Self { client })
    }

    /**
     * Build the reqwest request for a bundle POST
     */
    pub fn build_request(&self, request: &PostRequest) -> Result<reqwest::Request, CollectorError> {
        let mut builder = self
            .client
            .post(&request.url)
            .header(reqwest::header::AUTHORIZATION, request.authorization())
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(request.body.clone());

        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        builder.build().map_err(|e| {
            log::error!("[DISPATCH] Failed to build request for {}: {}", request.url, e);
            CollectorError::transport(NETWORK_ERROR)
        })
    }
}

impl Transport for HttpTransport {
    fn post(&self, request: PostRequest) -> impl Future<Output = Result<(), CollectorError>> + Send {
        let client = self.client.clone();
        let built = self.build_request(&request);

        async move {
            let http_request = built?;

            log::info!(
                "[DISPATCH] POST {} ({} bytes, dispatch {})",
                request.url,
                request.body.len(),
                request.dispatch_id
            );

            let response = client.execute(http_request).await.map_err(|e| {
                log::error!("[DISPATCH] Request {} failed: {}", request.dispatch_id, e);
                CollectorError::transport(NETWORK_ERROR)
            })?;

            let status = response.status();
            log::info!("[DISPATCH] Response status for {}: {}", request.dispatch_id, status);

            if status.is_success() {
                Ok(())
            } else {
                let reason = status
                    .canonical_reason()
                    .map(str::to_string)
                    .unwrap_or_else(|| status.as_str().to_string());
                Err(CollectorError::transport(reason))
            }
        }
    }
}

/// State of one request slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    InFlight,
    Acknowledged,
    Failed,
}

/**
 * One request context in the rotation
 */
#[derive(Debug)]
struct DispatchSlot {
    state: SlotState,
    generation: u64,
    dispatch_id: Option<Uuid>,
    bundle_size: usize,
    handle: Option<JoinHandle<()>>,
}

impl DispatchSlot {
    fn idle() -> Self {
        Self {
            state: SlotState::Idle,
            generation: 0,
            dispatch_id: None,
            bundle_size: 0,
            handle: None,
        }
    }

    fn abort(&mut self) -> bool {
        let was_in_flight = self.state == SlotState::InFlight;
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.state = SlotState::Idle;
        self.dispatch_id = None;
        was_in_flight
    }
}

/// Identifies the request a send() started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTicket {
    pub slot: usize,
    pub dispatch_id: Uuid,
}

/**
 * Bundle dispatcher with rotating, abortable request slots
 * Completions are reported through the callback from a spawned task, never
 * synchronously from send()
 */
pub struct Dispatcher<T: Transport> {
    transport: Arc<T>,
    slots: Vec<DispatchSlot>,
    current: usize,
    on_complete: CompletionCallback,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: Arc<T>, on_complete: CompletionCallback) -> Self {
        Self::with_slots(transport, on_complete, SLOT_COUNT)
    }

    /**
     * Dispatcher with an explicit pool size (at least 2)
     */
    pub fn with_slots(transport: Arc<T>, on_complete: CompletionCallback, slot_count: usize) -> Self {
        let slot_count = slot_count.max(2);
        Self {
            transport,
            slots: (0..slot_count).map(|_| DispatchSlot::idle()).collect(),
            // First send lands on slot 0
            current: slot_count - 1,
            on_complete,
        }
    }

    /**
     * Serialize and POST a bundle on the next slot in rotation
     * Must be called from within a tokio runtime
     */
    pub fn send(
        &mut self,
        bundle: &Bundle,
        settings: &Settings,
        generation: u64,
    ) -> Result<DispatchTicket, CollectorError> {
        let body = formatter::format_bundle(&bundle.lines).map_err(CollectorError::transport)?;

        self.current = (self.current + 1) % self.slots.len();
        let slot_index = self.current;
        let dispatch_id = Uuid::new_v4();

        let slot = &mut self.slots[slot_index];
        if slot.abort() {
            log::warn!("[DISPATCH] Slot {} reused while a request was still in flight", slot_index);
        }

        let request = PostRequest {
            dispatch_id,
            url: settings.endpoint.clone(),
            auth_token: settings.auth_token.clone(),
            body,
            timeout: settings.request_timeout(),
        };

        log::info!(
            "[DISPATCH] Sending bundle of {} records ({:?}..={:?}) on slot {}, dispatch {}",
            bundle.size,
            bundle.first_key,
            bundle.last_key,
            slot_index,
            dispatch_id
        );

        let transport = Arc::clone(&self.transport);
        let on_complete = Arc::clone(&self.on_complete);
        let bundle_size = bundle.size;

        let handle = tokio::spawn(async move {
            let outcome = match transport.post(request).await {
                Ok(()) => DispatchOutcome::Acknowledged,
                Err(e) => DispatchOutcome::Failed(e.message().to_string()),
            };
            on_complete(DispatchCompletion {
                slot: slot_index,
                generation,
                dispatch_id,
                bundle_size,
                outcome,
            });
        });

        slot.state = SlotState::InFlight;
        slot.generation = generation;
        slot.dispatch_id = Some(dispatch_id);
        slot.bundle_size = bundle_size;
        slot.handle = Some(handle);

        Ok(DispatchTicket {
            slot: slot_index,
            dispatch_id,
        })
    }

    /**
     * Move a slot to its terminal state
     * Returns false if the completion does not match the slot's current request
     */
    pub fn settle(&mut self, completion: &DispatchCompletion) -> bool {
        let Some(slot) = self.slots.get_mut(completion.slot) else {
            return false;
        };

        if slot.state != SlotState::InFlight
            || slot.dispatch_id != Some(completion.dispatch_id)
            || slot.generation != completion.generation
        {
            return false;
        }

        slot.state = match completion.outcome {
            DispatchOutcome::Acknowledged => SlotState::Acknowledged,
            DispatchOutcome::Failed(_) => SlotState::Failed,
        };
        slot.handle = None;
        true
    }

    /**
     * Cancel every in-flight request without waiting for it
     * Returns the number of requests cancelled
     */
    pub fn abort_all(&mut self) -> usize {
        let aborted = self
            .slots
            .iter_mut()
            .map(DispatchSlot::abort)
            .filter(|was_in_flight| *was_in_flight)
            .count();
        if aborted > 0 {
            log::info!("[DISPATCH] Aborted {} in-flight request(s)", aborted);
        }
        aborted
    }

    pub fn in_flight(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.state == SlotState::InFlight)
            .count()
    }

    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.slots.get(slot).map(|slot| slot.state)
    }
}
