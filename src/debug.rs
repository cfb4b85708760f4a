//! In-memory request collector for the debug endpoint
//!
//! Subscribed to the event dispatcher when `debug.enabled` is set; its
//! snapshot is served at `GET /n8n/debug`.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::events::{EventListener, N8nEvent};
use crate::types::CommunicationMode;

/// Oldest entries are dropped past this many requests.
pub const DEFAULT_MAX_ENTRIES: usize = 500;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CollectedRequest {
    pub correlation_id: String,
    pub workflow_id: String,
    pub client_id: String,
    pub mode: CommunicationMode,
    pub status_code: u16,
    /// Time spent in the transport call, in milliseconds.
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CollectedResponse {
    pub handler_id: Option<String>,
    pub status_code: u16,
    pub response: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CollectedError {
    pub error: String,
    pub attempt: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

/// Entries keyed by correlation id, evicted oldest-first.
///
/// Overwriting a key keeps its original position.
#[derive(Debug)]
struct Keyed<T> {
    order: VecDeque<String>,
    entries: HashMap<String, T>,
}

impl<T> Default for Keyed<T> {
    fn default() -> Self {
        Self {
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }
}

impl<T: Clone + Serialize> Keyed<T> {
    fn insert(&mut self, key: &str, value: T) {
        if self.entries.insert(key.to_string(), value).is_none() {
            self.order.push_back(key.to_string());
        }
    }

    fn trim(&mut self, max_entries: usize) {
        while self.order.len() > max_entries {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn keys(&self) -> Vec<String> {
        self.order.iter().cloned().collect()
    }

    fn to_map(&self) -> BTreeMap<String, T> {
        self.entries
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn to_json(&self) -> Value {
        let object: Map<String, Value> = self
            .order
            .iter()
            .filter_map(|key| {
                let value = serde_json::to_value(self.entries.get(key)?).ok()?;
                Some((key.clone(), value))
            })
            .collect();
        Value::Object(object)
    }
}

#[derive(Debug, Default)]
struct Collected {
    requests: VecDeque<CollectedRequest>,
    responses: Keyed<CollectedResponse>,
    errors: Keyed<CollectedError>,
    retries: u64,
}

#[derive(Debug)]
pub struct RequestCollector {
    max_entries: usize,
    data: Mutex<Collected>,
}

impl Default for RequestCollector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl RequestCollector {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            data: Mutex::new(Collected::default()),
        }
    }

    pub fn requests(&self) -> Vec<CollectedRequest> {
        self.data.lock().requests.iter().cloned().collect()
    }

    pub fn responses(&self) -> BTreeMap<String, CollectedResponse> {
        self.data.lock().responses.to_map()
    }

    pub fn errors(&self) -> BTreeMap<String, CollectedError> {
        self.data.lock().errors.to_map()
    }

    /// Correlation ids with recorded errors, oldest first.
    pub fn error_ids(&self) -> Vec<String> {
        self.data.lock().errors.keys()
    }

    pub fn total_requests(&self) -> usize {
        self.data.lock().requests.len()
    }

    pub fn total_errors(&self) -> usize {
        self.data.lock().errors.len()
    }

    /// Sum of transport time over the kept requests, in milliseconds.
    pub fn total_time_ms(&self) -> f64 {
        total_time_ms(&self.data.lock().requests)
    }

    pub fn reset(&self) {
        *self.data.lock() = Collected::default();
    }

    pub fn snapshot(&self) -> Value {
        let data = self.data.lock();
        json!({
            "requests": data.requests,
            "responses": data.responses.to_json(),
            "errors": data.errors.to_json(),
            "total_requests": data.requests.len(),
            "total_errors": data.errors.len(),
            "total_retries": data.retries,
            "total_time": total_time_ms(&data.requests),
        })
    }

    fn trim(&self, data: &mut Collected) {
        while data.requests.len() > self.max_entries {
            data.requests.pop_front();
        }
        data.responses.trim(self.max_entries);
        data.errors.trim(self.max_entries);
    }
}

fn total_time_ms(requests: &VecDeque<CollectedRequest>) -> f64 {
    requests.iter().map(|r| r.duration_ms).sum()
}

impl EventListener for RequestCollector {
    fn on_event(&self, event: &N8nEvent) {
        let now = Utc::now();
        let mut data = self.data.lock();

        match event {
            N8nEvent::RequestSent {
                correlation_id,
                workflow_id,
                mode,
                client_id,
                status_code,
                duration,
            } => data.requests.push_back(CollectedRequest {
                correlation_id: correlation_id.clone(),
                workflow_id: workflow_id.clone(),
                client_id: client_id.clone(),
                mode: *mode,
                status_code: *status_code,
                duration_ms: duration.as_micros() as f64 / 1000.0,
                timestamp: now,
            }),
            N8nEvent::ResponseReceived {
                correlation_id,
                handler_id,
                status_code,
                data: response,
                error,
            } => {
                data.responses.insert(
                    correlation_id,
                    CollectedResponse {
                        handler_id: handler_id.clone(),
                        status_code: *status_code,
                        response: response.clone(),
                        timestamp: now,
                    },
                );
                if let Some(error) = error {
                    data.errors.insert(
                        correlation_id,
                        CollectedError {
                            error: error.clone(),
                            attempt: None,
                            timestamp: now,
                        },
                    );
                }
            }
            N8nEvent::Retry { .. } => data.retries += 1,
            N8nEvent::RequestFailed {
                correlation_id,
                attempt,
                error,
                ..
            } => {
                data.errors.insert(
                    correlation_id,
                    CollectedError {
                        error: error.clone(),
                        attempt: Some(*attempt),
                        timestamp: now,
                    },
                );
            }
        }

        self.trim(&mut data);
    }
}
