use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::common::error::Result;
use crate::domain::canonical;
use crate::domain::cap::Reference;

/// The durable alert store collaborator.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Whether an alert with this reference identity is already stored.
    async fn has(&self, reference: &Reference) -> Result<bool>;

    /// Inserts an alert. Idempotent by alert id.
    async fn add(&self, alert: canonical::Alert) -> Result<()>;
}

/// In-memory store implementation for development/testing.
#[derive(Default)]
pub struct InMemoryAlertStore {
    alerts: Mutex<HashMap<String, canonical::Alert>>,
}

impl InMemoryAlertStore {
    pub fn new() -> InMemoryAlertStore {
        InMemoryAlertStore::default()
    }

    pub fn get(&self, id: &str) -> Option<canonical::Alert> {
        self.alerts.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn has(&self, reference: &Reference) -> Result<bool> {
        Ok(self.alerts.lock().unwrap().contains_key(&reference.key()))
    }

    async fn add(&self, alert: canonical::Alert) -> Result<()> {
        let mut alerts = self.alerts.lock().unwrap();
        debug!(id = %alert.id, sender = %alert.sender, "stored alert");
        alerts.insert(alert.id.clone(), alert);
        Ok(())
    }
}
