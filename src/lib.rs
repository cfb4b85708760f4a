//! Ada N8N Client - Library
//!
//! Calls n8n workflow webhooks in fire-and-forget, callback and sync modes,
//! with retry, circuit breaking, callback correlation and response mapping.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ada_n8n_client::{ClientConfig, CommunicationMode, JsonPayload, N8nClient};
//! use serde_json::json;
//!
//! # async fn example() -> ada_n8n_client::Result<()> {
//! let client = N8nClient::new(ClientConfig::new("https://n8n.example.com", "my-app"))?;
//! let payload = Arc::new(JsonPayload::new(json!({"text": "hello"})));
//! let response = client
//!     .send(payload, "moderation", CommunicationMode::Sync)
//!     .await?;
//! println!("{}", response.raw_data);
//! # Ok(())
//! # }
//! ```

pub mod callback;
pub mod circuit;
pub mod client;
pub mod clock;
pub mod config;
pub mod debug;
pub mod error;
pub mod events;
pub mod handlers;
pub mod mapper;
pub mod payload;
pub mod registry;
pub mod retry;
pub mod tasks;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tracker;
pub mod transport;
pub mod types;

pub use callback::CallbackHandler;
pub use circuit::CircuitBreaker;
pub use client::{N8nClient, N8nClientBuilder};
pub use clock::{Clock, SystemClock};
pub use config::{AppState, ClientConfig, N8nSettings};
pub use error::{MappingError, N8nError, Result};
pub use events::{EventDispatcher, EventListener, LoggingListener, N8nEvent};
pub use mapper::{MappedResponse, ResponseMapper, ResponseShape};
pub use payload::{FnHandler, JsonPayload, Payload, ResponseHandler};
pub use registry::ClientRegistry;
pub use retry::RetryPolicy;
pub use tracker::RequestTracker;
pub use transport::{HttpTransport, Transport, TransportResponse};
pub use types::{CommunicationMode, N8nResponse, WebhookRequest, ENVELOPE_KEY};
