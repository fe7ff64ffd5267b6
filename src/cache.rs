//! Session cache of completed audits, keyed by document content.
//!
//! Re-uploading the same bytes (under any file name) returns the earlier
//! verdict without extracting, rendering, redacting, writing to the vault or
//! calling the risk assessor again. Failed audits are not cached so a retry
//! can succeed.
//!
//! Each document id owns one [`OnceCell`] slot. Concurrent audits of the same
//! bytes queue on that slot, so only the first runs the pipeline and the rest
//! receive its verdict.

use crate::output::{AuditReport, ExtractedInvoice};
use crate::pipeline::input::DocumentId;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::debug;

/// A cached audit outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedAudit {
    pub invoice: ExtractedInvoice,
    pub report: AuditReport,
    pub artifact: Option<PathBuf>,
}

type Slot = Arc<OnceCell<CachedAudit>>;

/// In-memory map from content hash to audit outcome.
#[derive(Debug, Default)]
pub struct ReportCache {
    entries: RwLock<HashMap<DocumentId, Slot>>,
}

impl ReportCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &DocumentId) -> Option<CachedAudit> {
        let hit = self
            .entries
            .read()
            .await
            .get(id)
            .and_then(|slot| slot.get().cloned());
        if hit.is_some() {
            debug!("Cache hit for {}", id.short());
        }
        hit
    }

    /// Return the cached audit for `id`, running `audit` only if no other
    /// caller has produced one.
    ///
    /// The flag is `true` when the value came from the cache. An `Err` from
    /// `audit` leaves the slot empty and is handed back unchanged; the next
    /// waiter on the same id then runs its own `audit`.
    pub async fn get_or_audit<F, Fut, E>(
        &self,
        id: &DocumentId,
        audit: F,
    ) -> Result<(CachedAudit, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedAudit, E>>,
    {
        let slot = self.slot(id).await;
        let mut ran = false;
        let value = slot
            .get_or_try_init(|| {
                ran = true;
                audit()
            })
            .await?
            .clone();
        if !ran {
            debug!("Cache hit for {}", id.short());
        }
        Ok((value, !ran))
    }

    pub async fn insert(&self, id: DocumentId, audit: CachedAudit) {
        self.entries
            .write()
            .await
            .insert(id, Arc::new(OnceCell::new_with(Some(audit))));
    }

    /// Number of completed audits held.
    pub async fn len(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    async fn slot(&self, id: &DocumentId) -> Slot {
        if let Some(slot) = self.entries.read().await.get(id) {
            return Arc::clone(slot);
        }
        Arc::clone(self.entries.write().await.entry(id.clone()).or_default())
    }
}
