//! Registered services and their authentication.
//!
//! A service's `apiml.authentication.*` metadata is parsed and checked once,
//! when it registers. Proxied calls only look the result up.

use crate::schemes::{Authentication, SchemeConfigError, SchemeDispatcher, SchemeHandler};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::instrument;

/// What the broker keeps about a registered service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredService {
    pub service_id: String,
    pub authentication: Authentication,
    pub handler: SchemeHandler,
}

/// Registry file contents: service id to metadata.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct RegistryFile(HashMap<String, HashMap<String, String>>);

pub struct ServiceRegistry {
    dispatcher: Arc<SchemeDispatcher>,
    services: RwLock<HashMap<String, RegisteredService>>,
}

impl ServiceRegistry {
    pub fn new(dispatcher: Arc<SchemeDispatcher>) -> Self {
        Self {
            dispatcher,
            services: RwLock::new(HashMap::new()),
        }
    }

    pub fn dispatcher(&self) -> &SchemeDispatcher {
        &self.dispatcher
    }

    /// Register (or re-register) a service. Service ids are case-insensitive.
    ///
    /// # Errors
    ///
    /// Returns `SchemeConfigError` when the metadata is invalid or names a
    /// scheme this deployment cannot serve; the previous registration, if
    /// any, is kept.
    #[instrument(skip(self, metadata))]
    pub async fn register(
        &self,
        service_id: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<RegisteredService, SchemeConfigError> {
        let service_id = service_id.trim().to_lowercase();
        if service_id.is_empty() {
            return Err(SchemeConfigError::InvalidRegistry(
                "empty service id".to_string(),
            ));
        }

        let authentication = Authentication::from_metadata(metadata)?;
        let handler = SchemeHandler::try_from(&authentication)?;
        self.dispatcher.supports(&service_id, &handler)?;

        let service = RegisteredService {
            service_id: service_id.clone(),
            authentication,
            handler,
        };
        self.services
            .write()
            .await
            .insert(service_id, service.clone());

        tracing::info!(
            target: "broker.services.registry",
            service_id = %service.service_id,
            scheme = %service.handler.scheme(),
            "Service registered"
        );
        Ok(service)
    }

    pub async fn get(&self, service_id: &str) -> Option<RegisteredService> {
        self.services
            .read()
            .await
            .get(&service_id.trim().to_lowercase())
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.services.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Register every service of a JSON registry file.
    ///
    /// Stops at the first invalid entry.
    pub async fn load_file(&self, path: &Path) -> Result<usize, SchemeConfigError> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            SchemeConfigError::InvalidRegistry(format!("{}: {}", path.display(), e))
        })?;
        self.load_json(&contents).await
    }

    pub async fn load_json(&self, contents: &str) -> Result<usize, SchemeConfigError> {
        let RegistryFile(entries) = serde_json::from_str(contents)
            .map_err(|e| SchemeConfigError::InvalidRegistry(e.to_string()))?;

        let mut service_ids: Vec<&String> = entries.keys().collect();
        service_ids.sort();
        for service_id in &service_ids {
            if let Some(metadata) = entries.get(*service_id) {
                self.register(service_id, metadata).await?;
            }
        }
        Ok(service_ids.len())
    }
}
