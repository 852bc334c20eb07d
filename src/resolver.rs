use std::sync::Arc;

use crate::bus::KeyedView;
use crate::common::error::Result;
use crate::domain::cap::Reference;
use crate::store::AlertStore;

/// Classification of a cross-reference against the system's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The alert store already holds the referenced alert.
    Known,
    /// A fetch for the reference has already been requested.
    Pending,
    /// Nobody has the alert and nobody asked for it yet.
    Unknown,
}

/// Classifies references against the alert store and the dedup view
/// over the fetch-request stream. No side effects; callers decide
/// whether to emit a fetch request for `Unknown` references.
#[derive(Clone)]
pub struct ReferenceResolver {
    store: Arc<dyn AlertStore>,
    requested: Arc<dyn KeyedView>,
}

impl ReferenceResolver {
    pub fn new(store: Arc<dyn AlertStore>, requested: Arc<dyn KeyedView>) -> ReferenceResolver {
        ReferenceResolver { store, requested }
    }

    pub async fn resolve(&self, reference: &Reference) -> Result<Resolution> {
        if self.store.has(reference).await? {
            return Ok(Resolution::Known);
        }
        if self.requested.has(&reference.key()).await? {
            return Ok(Resolution::Pending);
        }
        Ok(Resolution::Unknown)
    }
}
