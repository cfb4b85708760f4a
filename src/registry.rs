//! Named client registry
//!
//! Builds one independent [`N8nClient`] per configured name. Clients share
//! the response mapper and event dispatcher, nothing else.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::client::N8nClient;
use crate::config::{N8nSettings, DEFAULT_CLIENT_NAME};
use crate::debug::RequestCollector;
use crate::error::{N8nError, Result};
use crate::events::{EventDispatcher, LoggingListener};
use crate::mapper::ResponseMapper;
use crate::types::N8nResponse;

#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: BTreeMap<String, Arc<N8nClient>>,
    mapper: Arc<ResponseMapper>,
    events: Arc<EventDispatcher>,
    collector: Option<Arc<RequestCollector>>,
}

impl ClientRegistry {
    /// Empty registry around shared collaborators; add clients with [`insert`](Self::insert).
    pub fn new(mapper: Arc<ResponseMapper>, events: Arc<EventDispatcher>) -> Self {
        Self {
            clients: BTreeMap::new(),
            mapper,
            events,
            collector: None,
        }
    }

    /// Build every configured client with the reqwest transport.
    pub fn from_settings(settings: &N8nSettings) -> Result<Self> {
        settings.validate()?;

        let mut registry = Self::new(
            Arc::new(ResponseMapper::new()),
            Arc::new(EventDispatcher::new()),
        );

        if settings.debug.log_requests {
            registry.events.subscribe(Arc::new(LoggingListener));
        }
        if settings.debug.enabled {
            let collector = Arc::new(RequestCollector::default());
            registry.events.subscribe(collector.clone());
            registry.collector = Some(collector);
        }

        let callback_url = settings.callback.callback_url();
        if callback_url.is_none() {
            warn!("callback.public_url not set, send_with_callback will be unavailable");
        }

        for (name, config) in &settings.clients {
            let mut builder = N8nClient::builder(config.clone())
                .events(registry.events.clone())
                .mapper(registry.mapper.clone());
            if let Some(url) = &callback_url {
                builder = builder.callback_url(url.clone());
            }

            let client = builder
                .build()
                .map_err(|e| N8nError::Config(format!("client '{name}': {e}")))?;

            info!(
                name = %name,
                client_id = %config.client_id,
                base_url = %config.base_url,
                dry_run = config.dry_run,
                "Registered n8n client"
            );
            registry.insert(name.clone(), client);
        }

        Ok(registry)
    }

    pub fn insert(&mut self, name: impl Into<String>, client: N8nClient) -> Arc<N8nClient> {
        let client = Arc::new(client);
        self.clients.insert(name.into(), client.clone());
        client
    }

    pub fn with_collector(mut self, collector: Arc<RequestCollector>) -> Self {
        self.events.subscribe(collector.clone());
        self.collector = Some(collector);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<N8nClient>> {
        self.clients.get(name)
    }

    /// The client named `default`, or the first one by name.
    pub fn default_client(&self) -> Option<&Arc<N8nClient>> {
        self.clients
            .get(DEFAULT_CLIENT_NAME)
            .or_else(|| self.clients.values().next())
    }

    pub fn by_client_id(&self, client_id: &str) -> Option<&Arc<N8nClient>> {
        self.clients
            .values()
            .find(|client| client.client_id() == client_id)
    }

    pub fn clients(&self) -> impl Iterator<Item = (&str, &Arc<N8nClient>)> {
        self.clients.iter().map(|(name, client)| (name.as_str(), client))
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn mapper(&self) -> &Arc<ResponseMapper> {
        &self.mapper
    }

    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    pub fn collector(&self) -> Option<&Arc<RequestCollector>> {
        self.collector.as_ref()
    }

    /// Client whose tracker should see this callback.
    ///
    /// Prefers the client named in the envelope if it has the request
    /// pending, then any client that has it pending, then the envelope's
    /// client, then the default client.
    pub fn resolve_callback(&self, response: &N8nResponse) -> Option<&Arc<N8nClient>> {
        let correlation_id = response.correlation_id.as_str();
        let named = response
            .client_id
            .as_deref()
            .and_then(|id| self.by_client_id(id));

        if let Some(client) = named {
            if client.tracker().is_pending(correlation_id) {
                return Some(client);
            }
        }

        self.clients
            .values()
            .find(|client| client.tracker().is_pending(correlation_id))
            .or(named)
            .or_else(|| self.default_client())
    }

    /// Route a callback to its client's handler.
    ///
    /// Fails only with [`N8nError::TrackingMiss`]; handler failures are
    /// contained by the callback handler.
    pub async fn handle_callback(&self, response: &N8nResponse) -> Result<()> {
        match self.resolve_callback(response) {
            Some(client) => client.callback_handler().try_handle(response).await,
            None => {
                warn!(
                    correlation_id = %response.correlation_id,
                    "No n8n clients registered, dropping callback"
                );
                Err(N8nError::TrackingMiss(response.correlation_id.clone()))
            }
        }
    }

    /// Sweep every client's tracker; returns the total removed.
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        self.clients
            .values()
            .map(|client| client.tracker().sweep_expired(max_age))
            .sum()
    }

    pub fn pending_count(&self) -> usize {
        self.clients
            .values()
            .map(|client| client.tracker().pending_count())
            .sum()
    }

    /// Health of every client by name.
    pub async fn health(&self) -> BTreeMap<String, bool> {
        let checks = self.clients.iter().map(|(name, client)| async move {
            (name.clone(), client.is_healthy().await)
        });
        futures::future::join_all(checks).await.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::{json, Value};

    use super::*;
    use crate::config::ClientConfig;
    use crate::payload::{FnHandler, JsonPayload};
    use crate::types::ENVELOPE_KEY;

    fn settings() -> N8nSettings {
        N8nSettings::from_yaml_str(
            r#"
clients:
  default:
    base_url: http://n8n-a.test
    client_id: app-a
    dry_run: true
  secondary:
    base_url: http://n8n-b.test
    client_id: app-b
    dry_run: true
callback:
  public_url: http://app.test
debug:
  enabled: true
"#,
        )
        .unwrap()
    }

    fn callback(id: &str, client_id: Option<&str>) -> N8nResponse {
        let mut envelope = json!({"correlation_id": id});
        if let Some(client_id) = client_id {
            envelope["client_id"] = json!(client_id);
        }
        N8nResponse::from_callback_payload(json!({ ENVELOPE_KEY: envelope }), Utc::now()).unwrap()
    }

    #[test]
    fn test_from_settings_builds_independent_clients() {
        let registry = ClientRegistry::from_settings(&settings()).unwrap();

        assert_eq!(registry.len(), 2);
        let a = registry.get("default").unwrap();
        let b = registry.by_client_id("app-b").unwrap();
        assert_eq!(registry.default_client().unwrap().client_id(), "app-a");
        assert_eq!(a.callback_url(), Some("http://app.test/n8n/callback"));
        assert!(!Arc::ptr_eq(a.tracker(), b.tracker()));
        assert!(Arc::ptr_eq(a.mapper(), b.mapper()));
        assert!(registry.collector().is_some());
        assert_eq!(registry.events().listener_count(), 2);
    }

    #[test]
    fn test_default_client_falls_back_to_first() {
        let mut registry = ClientRegistry::default();
        assert!(registry.default_client().is_none());

        registry.insert("zeta", N8nClient::new(ClientConfig::new("http://z", "z")).unwrap());
        registry.insert("alpha", N8nClient::new(ClientConfig::new("http://a", "a")).unwrap());

        assert_eq!(registry.default_client().unwrap().client_id(), "a");
    }

    #[tokio::test]
    async fn test_callback_routed_to_pending_client() {
        let registry = ClientRegistry::from_settings(&settings()).unwrap();
        let b = registry.get("secondary").unwrap();
        let id = b
            .send_with_callback(
                Arc::new(JsonPayload::new(json!({}))),
                "wf",
                Arc::new(FnHandler::new("h", |_: &Value, _: &str| Ok(()))),
            )
            .await
            .unwrap();

        let resolved = registry.resolve_callback(&callback(&id, Some("app-a"))).unwrap();
        assert_eq!(resolved.client_id(), "app-b");

        registry.handle_callback(&callback(&id, None)).await.unwrap();
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_callback_goes_to_named_or_default_client() {
        let registry = ClientRegistry::from_settings(&settings()).unwrap();

        let named = registry.resolve_callback(&callback("nope", Some("app-b"))).unwrap();
        assert_eq!(named.client_id(), "app-b");

        let fallback = registry.resolve_callback(&callback("nope", None)).unwrap();
        assert_eq!(fallback.client_id(), "app-a");

        let miss = registry.handle_callback(&callback("nope", None)).await;
        assert!(matches!(miss, Err(N8nError::TrackingMiss(ref id)) if id == "nope"));
    }

    #[tokio::test]
    async fn test_empty_registry_reports_tracking_miss() {
        let registry = ClientRegistry::default();
        let result = registry.handle_callback(&callback("abc", None)).await;
        assert!(matches!(result, Err(N8nError::TrackingMiss(_))));
    }

    #[tokio::test]
    async fn test_health_reports_every_client() {
        let registry = ClientRegistry::from_settings(&settings()).unwrap();
        let health = registry.health().await;

        assert_eq!(health.len(), 2);
        assert!(health.values().all(|healthy| *healthy));
    }
}
